//! Snapshot files: exported model state pinned to a journal sequence number.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use thiserror::Error;
use tracing::warn;

/// Snapshot file magic bytes: "SNAP".
pub const SNAPSHOT_MAGIC: [u8; 4] = [0x53, 0x4E, 0x41, 0x50];

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Snapshot header size in bytes.
pub const SNAPSHOT_HEADER_SIZE: usize = 64;

/// The on-disk snapshot manifest.
///
/// # Layout (64-byte header + variable state)
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     magic ("SNAP")
/// 4       2     version
/// 6       2     flags
/// 8       8     seq (highest journal seq included)
/// 16      4     schema_version (model state schema)
/// 20      8     state_size
/// 28      4     state_checksum (CRC32C)
/// 32      4     header_checksum (CRC32C of bytes 0..32)
/// 36      28    reserved (must be zero)
/// 64      var   state payload
/// ```
#[derive(Clone, Debug)]
pub struct SnapshotManifest {
    /// Highest journal sequence number included in this snapshot.
    pub seq: u64,

    /// Schema version of the exported model state.
    pub schema_version: u32,

    /// Serialized model state.
    pub state: Vec<u8>,
}

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid snapshot magic")]
    InvalidMagic,

    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u16),

    #[error("snapshot header checksum mismatch: expected {expected}, got {actual}")]
    HeaderChecksumMismatch { expected: u32, actual: u32 },

    #[error("snapshot state checksum mismatch: expected {expected}, got {actual}")]
    StateChecksumMismatch { expected: u32, actual: u32 },

    #[error("file too small for snapshot header")]
    FileTooSmall,

    #[error("snapshot state size mismatch: expected {expected}, got {actual}")]
    StateSizeMismatch { expected: u64, actual: usize },
}

impl SnapshotManifest {
    pub fn new(seq: u64, schema_version: u32, state: Vec<u8>) -> Self {
        SnapshotManifest {
            seq,
            schema_version,
            state,
        }
    }

    /// Serialize the snapshot header to bytes.
    fn serialize_header(&self) -> [u8; SNAPSHOT_HEADER_SIZE] {
        let mut header = [0u8; SNAPSHOT_HEADER_SIZE];

        header[0..4].copy_from_slice(&SNAPSHOT_MAGIC);
        header[4..6].copy_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        header[6..8].copy_from_slice(&0u16.to_le_bytes());
        header[8..16].copy_from_slice(&self.seq.to_le_bytes());
        header[16..20].copy_from_slice(&self.schema_version.to_le_bytes());
        header[20..28].copy_from_slice(&(self.state.len() as u64).to_le_bytes());

        let state_checksum = crc32c::crc32c(&self.state);
        header[28..32].copy_from_slice(&state_checksum.to_le_bytes());

        let header_checksum = crc32c::crc32c(&header[0..32]);
        header[32..36].copy_from_slice(&header_checksum.to_le_bytes());

        header
    }

    /// Save the snapshot atomically: write to a temp file, fsync, rename.
    ///
    /// No partial snapshot is ever visible under the final name.
    pub fn save_to_file(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("snap.tmp");

        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&self.serialize_header())?;
            file.write_all(&self.state)?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Load a snapshot with strict validation: magic, version, header
    /// checksum, state checksum, state size.
    pub fn load_from_file(path: &Path) -> Result<Self, SnapshotError> {
        let mut file = File::open(path)?;

        let mut header = [0u8; SNAPSHOT_HEADER_SIZE];
        let bytes_read = file.read(&mut header)?;
        if bytes_read < SNAPSHOT_HEADER_SIZE {
            return Err(SnapshotError::FileTooSmall);
        }

        if header[0..4] != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic);
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let stored_header_checksum =
            u32::from_le_bytes([header[32], header[33], header[34], header[35]]);
        let computed_header_checksum = crc32c::crc32c(&header[0..32]);
        if stored_header_checksum != computed_header_checksum {
            return Err(SnapshotError::HeaderChecksumMismatch {
                expected: stored_header_checksum,
                actual: computed_header_checksum,
            });
        }

        let seq = u64::from_le_bytes([
            header[8], header[9], header[10], header[11], header[12], header[13], header[14],
            header[15],
        ]);
        let schema_version =
            u32::from_le_bytes([header[16], header[17], header[18], header[19]]);
        let state_size = u64::from_le_bytes([
            header[20], header[21], header[22], header[23], header[24], header[25], header[26],
            header[27],
        ]);
        let stored_state_checksum =
            u32::from_le_bytes([header[28], header[29], header[30], header[31]]);

        let mut state = vec![0u8; state_size as usize];
        let state_bytes_read = file.read(&mut state)?;
        if state_bytes_read != state_size as usize {
            return Err(SnapshotError::StateSizeMismatch {
                expected: state_size,
                actual: state_bytes_read,
            });
        }

        let computed_state_checksum = crc32c::crc32c(&state);
        if stored_state_checksum != computed_state_checksum {
            return Err(SnapshotError::StateChecksumMismatch {
                expected: stored_state_checksum,
                actual: computed_state_checksum,
            });
        }

        Ok(SnapshotManifest {
            seq,
            schema_version,
            state,
        })
    }

    /// Generate the snapshot filename for a given sequence number.
    pub fn filename_for_seq(seq: u64) -> String {
        format!("snapshot_{:020}.snap", seq)
    }

    /// Parse the sequence number from a snapshot filename.
    pub fn seq_from_filename(filename: &str) -> Option<u64> {
        // Expected format: "snapshot_XXXXXXXXXXXXXXXXXXXX.snap",
        // 20-digit zero-padded seq.
        if !filename.starts_with("snapshot_") || !filename.ends_with(".snap") {
            return None;
        }
        if filename.len() != 34 {
            return None;
        }
        filename[9..29].parse().ok()
    }

    /// Find the latest valid snapshot in a directory.
    ///
    /// Scans candidates in descending seq order and returns the first one
    /// that passes full validation, skipping corrupt files.
    pub fn find_latest(dir: &Path) -> Result<Option<SnapshotManifest>, SnapshotError> {
        if !dir.exists() {
            return Ok(None);
        }

        let mut seqs: Vec<u64> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let filename = entry.file_name();
            if let Some(seq) = Self::seq_from_filename(&filename.to_string_lossy()) {
                seqs.push(seq);
            }
        }

        seqs.sort_by(|a, b| b.cmp(a));

        for seq in seqs {
            let path = dir.join(Self::filename_for_seq(seq));
            match Self::load_from_file(&path) {
                Ok(manifest) => return Ok(Some(manifest)),
                Err(e) => {
                    warn!(seq, error = %e, "snapshot failed validation, trying older");
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.snap");

        let manifest = SnapshotManifest::new(100, 2, b"test state data".to_vec());
        manifest.save_to_file(&path).unwrap();

        let loaded = SnapshotManifest::load_from_file(&path).unwrap();
        assert_eq!(loaded.seq, 100);
        assert_eq!(loaded.schema_version, 2);
        assert_eq!(loaded.state, b"test state data");
    }

    #[test]
    fn test_snapshot_invalid_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.snap");
        fs::write(&path, [0u8; 64]).unwrap();

        let result = SnapshotManifest::load_from_file(&path);
        assert!(matches!(result, Err(SnapshotError::InvalidMagic)));
    }

    #[test]
    fn test_snapshot_corrupted_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.snap");

        let manifest = SnapshotManifest::new(100, 1, b"state".to_vec());
        manifest.save_to_file(&path).unwrap();

        let mut data = fs::read(&path).unwrap();
        data[10] ^= 0xFF;
        fs::write(&path, &data).unwrap();

        let result = SnapshotManifest::load_from_file(&path);
        assert!(matches!(
            result,
            Err(SnapshotError::HeaderChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_snapshot_corrupted_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.snap");

        let manifest = SnapshotManifest::new(100, 1, b"state data here".to_vec());
        manifest.save_to_file(&path).unwrap();

        let mut data = fs::read(&path).unwrap();
        data[70] ^= 0xFF;
        fs::write(&path, &data).unwrap();

        let result = SnapshotManifest::load_from_file(&path);
        assert!(matches!(
            result,
            Err(SnapshotError::StateChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_snapshot_atomic_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.snap");
        let temp_path = path.with_extension("snap.tmp");

        let manifest = SnapshotManifest::new(100, 1, b"state".to_vec());
        manifest.save_to_file(&path).unwrap();

        assert!(!temp_path.exists());
        assert!(path.exists());
    }

    #[test]
    fn test_snapshot_filename_roundtrip() {
        assert_eq!(
            SnapshotManifest::filename_for_seq(0),
            "snapshot_00000000000000000000.snap"
        );
        assert_eq!(
            SnapshotManifest::seq_from_filename("snapshot_00000000000000012345.snap"),
            Some(12345)
        );
        assert_eq!(SnapshotManifest::seq_from_filename("invalid.snap"), None);
        assert_eq!(SnapshotManifest::seq_from_filename("snapshot_abc.snap"), None);
    }

    #[test]
    fn test_find_latest_skips_corrupt() {
        let dir = tempdir().unwrap();

        SnapshotManifest::new(10, 1, b"older".to_vec())
            .save_to_file(&dir.path().join(SnapshotManifest::filename_for_seq(10)))
            .unwrap();
        SnapshotManifest::new(20, 1, b"newer".to_vec())
            .save_to_file(&dir.path().join(SnapshotManifest::filename_for_seq(20)))
            .unwrap();

        // Corrupt the newest snapshot; find_latest should fall back.
        let newest = dir.path().join(SnapshotManifest::filename_for_seq(20));
        let mut data = fs::read(&newest).unwrap();
        data[33] ^= 0xFF;
        fs::write(&newest, &data).unwrap();

        let found = SnapshotManifest::find_latest(dir.path()).unwrap().unwrap();
        assert_eq!(found.seq, 10);
        assert_eq!(found.state, b"older");
    }

    #[test]
    fn test_find_latest_empty_dir() {
        let dir = tempdir().unwrap();
        assert!(SnapshotManifest::find_latest(dir.path()).unwrap().is_none());
    }
}
