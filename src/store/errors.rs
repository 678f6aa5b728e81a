use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the durable store.
///
/// Corruption variants are fatal: the log violates an invariant and the store
/// refuses to open. Torn writes strictly at the tail are not errors — the
/// recovery scan repairs them by truncation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A store already exists at the configured location (`create`).
    #[error("store already exists at {0}")]
    AlreadyExists(PathBuf),

    /// No store exists at the configured location (`load`).
    #[error("no store found at {0}")]
    NotFound(PathBuf),

    /// The journal file header is missing, unrecognized, or checksum-invalid.
    #[error("invalid journal file header at {0}")]
    InvalidFileHeader(PathBuf),

    /// Sequence gap or duplicate: entry index does not follow its predecessor.
    #[error("journal monotonicity violation: expected seq {expected}, found {found}")]
    MonotonicityViolation { expected: u64, found: u64 },

    /// Checksum failure with valid data ahead of it.
    #[error("mid-journal corruption at offset {offset} (after seq {seq})")]
    MidJournalCorruption { offset: u64, seq: u64 },

    /// Zeroed region followed by non-zero data.
    #[error("zero-hole in journal: zeros at offset {zero_offset}, data at offset {data_offset}")]
    ZeroHole { zero_offset: u64, data_offset: u64 },

    /// Frame payload exceeds the maximum allowed size.
    #[error("journal payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: u32, max: u32 },

    /// Payload hash mismatch on a read-back entry.
    #[error("payload hash mismatch at seq {seq}")]
    PayloadHashMismatch { seq: u64 },

    /// Snapshot file failed validation.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Command payload could not be encoded or decoded.
    #[error("codec error at seq {seq}: {message}")]
    Codec { seq: u64, message: String },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Torn-write conditions detected strictly at the journal tail.
///
/// These are repairable: the scan truncates the log at the last valid frame.
/// They never escape the recovery module.
#[derive(Debug)]
pub(crate) enum TornWrite {
    /// Frame header CRC mismatch at the tail.
    HeaderCrcMismatch { offset: u64 },

    /// Payload hash mismatch at the tail.
    PayloadHashMismatch { offset: u64, seq: u64 },

    /// EOF before the expected byte count.
    IncompleteRead {
        offset: u64,
        expected: usize,
        got: usize,
    },
}

impl std::fmt::Display for TornWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TornWrite::HeaderCrcMismatch { offset } => {
                write!(f, "header CRC mismatch at offset {}", offset)
            }
            TornWrite::PayloadHashMismatch { offset, seq } => {
                write!(f, "payload hash mismatch at offset {} (seq {})", offset, seq)
            }
            TornWrite::IncompleteRead {
                offset,
                expected,
                got,
            } => {
                write!(
                    f,
                    "incomplete read at offset {}: expected {} bytes, got {}",
                    offset, expected, got
                )
            }
        }
    }
}
