//! Journal recovery scan.
//!
//! Recovery is deterministic. Given a disk state, there is only one valid
//! outcome:
//! 1. Clean: the journal is intact and verified.
//! 2. Truncated: a torn write strictly at the tail was cut off.
//! 3. Error: the journal violates an invariant and the store refuses to open.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::warn;

use crate::store::errors::{StoreError, TornWrite};
use crate::store::format::{
    compute_payload_hash, frame_size, FileHeader, FrameHeader, FILE_HEADER_SIZE,
    FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE,
};

/// Window scanned ahead of a failed frame to distinguish a torn tail from
/// mid-journal corruption.
const SCAN_AHEAD_BYTES: u64 = 10_000 * 64;

/// Outcome of a recovery scan.
#[derive(Debug)]
pub enum RecoveryOutcome {
    /// Journal verified, no entries.
    CleanEmpty,
    /// Journal verified with entries.
    Clean { last_seq: u64, next_offset: u64 },
    /// Torn write at the tail was truncated away.
    Truncated {
        /// Highest surviving sequence number, if any entry survived.
        last_seq: Option<u64>,
        /// Offset the file was truncated to.
        truncated_at: u64,
        /// Offset at which the next append lands.
        next_offset: u64,
    },
}

impl RecoveryOutcome {
    /// Sequence number the writer should assign next.
    pub fn next_seq(&self) -> u64 {
        match self {
            RecoveryOutcome::CleanEmpty => 0,
            RecoveryOutcome::Clean { last_seq, .. } => last_seq + 1,
            RecoveryOutcome::Truncated { last_seq, .. } => last_seq.map_or(0, |s| s + 1),
        }
    }

    /// Offset the writer should append at next.
    pub fn next_offset(&self) -> u64 {
        match self {
            RecoveryOutcome::CleanEmpty => FILE_HEADER_SIZE as u64,
            RecoveryOutcome::Clean { next_offset, .. } => *next_offset,
            RecoveryOutcome::Truncated { next_offset, .. } => *next_offset,
        }
    }
}

/// Recovery scanner state.
pub struct JournalRecovery {
    file: File,
    file_size: u64,
    path: std::path::PathBuf,
}

impl JournalRecovery {
    /// Open a journal file for recovery. Returns `None` if the file does not
    /// exist.
    pub fn open(path: &Path) -> Result<Option<Self>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_size = file.metadata()?.len();

        Ok(Some(JournalRecovery {
            file,
            file_size,
            path: path.to_path_buf(),
        }))
    }

    /// Run the recovery scan.
    pub fn scan(mut self) -> Result<RecoveryOutcome, StoreError> {
        // The file header is written before any entry; a file too short to
        // hold it never held a durable entry either.
        if self.file_size < FILE_HEADER_SIZE as u64 {
            return Err(StoreError::InvalidFileHeader(self.path.clone()));
        }

        let mut file_header_buf = [0u8; FILE_HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut file_header_buf)?;
        if !FileHeader::from_bytes(&file_header_buf).is_valid() {
            return Err(StoreError::InvalidFileHeader(self.path.clone()));
        }

        let mut expected_seq: u64 = 0;
        let mut scan_offset: u64 = FILE_HEADER_SIZE as u64;
        let mut header_buf = [0u8; FRAME_HEADER_SIZE];

        loop {
            // Clean termination at EOF.
            if scan_offset >= self.file_size {
                if expected_seq == 0 {
                    return Ok(RecoveryOutcome::CleanEmpty);
                }
                return Ok(RecoveryOutcome::Clean {
                    last_seq: expected_seq - 1,
                    next_offset: scan_offset,
                });
            }

            self.file.seek(SeekFrom::Start(scan_offset))?;
            let bytes_read = self.file.read(&mut header_buf)?;

            if bytes_read < FRAME_HEADER_SIZE {
                // Incomplete header at the tail.
                return self.handle_potential_torn_write(
                    scan_offset,
                    expected_seq,
                    TornWrite::IncompleteRead {
                        offset: scan_offset,
                        expected: FRAME_HEADER_SIZE,
                        got: bytes_read,
                    },
                );
            }

            // A zeroed header region marks the end of the log, provided
            // everything after it is zero too.
            if FrameHeader::is_zero(&header_buf) {
                return self.verify_zero_tail(scan_offset, expected_seq);
            }

            let header = FrameHeader::from_bytes(&header_buf);

            if !header.verify_checksum() {
                return self.handle_potential_torn_write(
                    scan_offset,
                    expected_seq,
                    TornWrite::HeaderCrcMismatch {
                        offset: scan_offset,
                    },
                );
            }

            // Gapless monotonicity: a CRC-valid header with the wrong seq is
            // not a torn write, it is corruption or a forked log.
            if header.seq != expected_seq {
                return Err(StoreError::MonotonicityViolation {
                    expected: expected_seq,
                    found: header.seq,
                });
            }

            if header.payload_size > MAX_PAYLOAD_SIZE {
                return Err(StoreError::PayloadTooLarge {
                    size: header.payload_size,
                    max: MAX_PAYLOAD_SIZE,
                });
            }

            let payload_offset = scan_offset + FRAME_HEADER_SIZE as u64;
            let mut payload = vec![0u8; header.payload_size as usize];

            self.file.seek(SeekFrom::Start(payload_offset))?;
            let payload_read = self.file.read(&mut payload)?;

            if payload_read < header.payload_size as usize {
                return self.handle_potential_torn_write(
                    scan_offset,
                    expected_seq,
                    TornWrite::IncompleteRead {
                        offset: payload_offset,
                        expected: header.payload_size as usize,
                        got: payload_read,
                    },
                );
            }

            if compute_payload_hash(&payload) != header.payload_hash {
                return self.handle_potential_torn_write(
                    scan_offset,
                    expected_seq,
                    TornWrite::PayloadHashMismatch {
                        offset: scan_offset,
                        seq: header.seq,
                    },
                );
            }

            expected_seq += 1;
            scan_offset += frame_size(header.payload_size) as u64;
        }
    }

    /// Verify that all bytes from `zero_offset` to EOF are zeros.
    fn verify_zero_tail(
        &mut self,
        zero_offset: u64,
        expected_seq: u64,
    ) -> Result<RecoveryOutcome, StoreError> {
        const CHUNK_SIZE: usize = 4096;
        let mut buf = [0u8; CHUNK_SIZE];
        let mut offset = zero_offset + FRAME_HEADER_SIZE as u64;

        while offset < self.file_size {
            self.file.seek(SeekFrom::Start(offset))?;
            let to_read = std::cmp::min(CHUNK_SIZE, (self.file_size - offset) as usize);
            let bytes_read = self.file.read(&mut buf[..to_read])?;

            if bytes_read == 0 {
                break;
            }

            if let Some(pos) = buf[..bytes_read].iter().position(|&b| b != 0) {
                // Zeros followed by data: something overwrote history.
                return Err(StoreError::ZeroHole {
                    zero_offset,
                    data_offset: offset + pos as u64,
                });
            }

            offset += bytes_read as u64;
        }

        if expected_seq == 0 {
            Ok(RecoveryOutcome::CleanEmpty)
        } else {
            Ok(RecoveryOutcome::Clean {
                last_seq: expected_seq - 1,
                next_offset: zero_offset,
            })
        }
    }

    /// Handle a potential torn write at the tail.
    ///
    /// A failure is repairable only when it is strictly local to the tail:
    /// no valid frame candidate may exist ahead of it. Anything else is
    /// mid-journal corruption.
    fn handle_potential_torn_write(
        &mut self,
        failure_offset: u64,
        expected_seq: u64,
        torn: TornWrite,
    ) -> Result<RecoveryOutcome, StoreError> {
        if self.has_valid_frame_ahead(failure_offset, expected_seq)? {
            return Err(StoreError::MidJournalCorruption {
                offset: failure_offset,
                seq: expected_seq.saturating_sub(1),
            });
        }

        self.truncate_to(failure_offset)?;

        warn!(
            offset = failure_offset,
            seq = expected_seq,
            reason = %torn,
            "torn write repaired, journal truncated"
        );

        Ok(RecoveryOutcome::Truncated {
            last_seq: expected_seq.checked_sub(1),
            truncated_at: failure_offset,
            next_offset: failure_offset,
        })
    }

    /// Scan ahead for a frame header candidate that validates.
    fn has_valid_frame_ahead(
        &mut self,
        start_offset: u64,
        expected_min_seq: u64,
    ) -> Result<bool, StoreError> {
        let end_offset = std::cmp::min(self.file_size, start_offset + SCAN_AHEAD_BYTES);
        let mut header_buf = [0u8; FRAME_HEADER_SIZE];
        let mut offset = start_offset + 8;

        while offset + FRAME_HEADER_SIZE as u64 <= end_offset {
            self.file.seek(SeekFrom::Start(offset))?;
            let bytes_read = self.file.read(&mut header_buf)?;

            if bytes_read < FRAME_HEADER_SIZE {
                break;
            }

            if header_buf.iter().all(|&b| b == 0) {
                offset += 8;
                continue;
            }

            if Self::is_valid_frame_candidate(&header_buf, expected_min_seq) {
                return Ok(true);
            }

            offset += 8;
        }

        Ok(false)
    }

    /// Predicate: does this buffer look like a real frame header?
    fn is_valid_frame_candidate(buf: &[u8; FRAME_HEADER_SIZE], expected_min_seq: u64) -> bool {
        let header = FrameHeader::from_bytes(buf);

        if !header.verify_checksum() {
            return false;
        }
        if header.payload_size > MAX_PAYLOAD_SIZE {
            return false;
        }
        if header.schema_version == 0 || header.schema_version > 100 {
            return false;
        }
        if header.seq < expected_min_seq {
            return false;
        }

        true
    }

    /// Truncate the file and sync the new length.
    fn truncate_to(&self, len: u64) -> Result<(), StoreError> {
        self.file.set_len(len)?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// A raw journal entry as read off disk.
#[derive(Debug)]
pub struct RawEntry {
    pub seq: u64,
    pub stamp_ns: u64,
    pub payload: Vec<u8>,
}

/// Read all entries with `seq >= from_seq`, up to `end_offset`.
///
/// `end_offset` must come from a successful recovery scan, so every frame in
/// range is known-valid; checksums are still verified to catch bit rot
/// between scan and read.
pub fn read_entries(
    path: &Path,
    from_seq: u64,
    end_offset: u64,
) -> Result<Vec<RawEntry>, StoreError> {
    let mut file = File::open(path)?;
    let mut entries = Vec::new();
    let mut offset = FILE_HEADER_SIZE as u64;
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];

    while offset < end_offset {
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut header_buf)?;

        let header = FrameHeader::from_bytes(&header_buf);
        if !header.verify_checksum() {
            return Err(StoreError::MidJournalCorruption {
                offset,
                seq: header.seq,
            });
        }

        let mut payload = vec![0u8; header.payload_size as usize];
        file.read_exact(&mut payload)?;

        if compute_payload_hash(&payload) != header.payload_hash {
            return Err(StoreError::PayloadHashMismatch { seq: header.seq });
        }

        if header.seq >= from_seq {
            entries.push(RawEntry {
                seq: header.seq,
                stamp_ns: header.stamp_ns,
                payload,
            });
        }

        offset += frame_size(header.payload_size) as u64;
    }

    Ok(entries)
}
