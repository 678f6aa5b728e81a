//! Single-writer append path for the journal file.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::store::errors::StoreError;
use crate::store::format::{
    calculate_padding, frame_size, FileHeader, FrameHeader, FILE_HEADER_SIZE, MAX_PAYLOAD_SIZE,
};

/// The journal writer.
///
/// Exactly one writer exists per store; the engine serializes access to it
/// behind the exclusive command slot, so appends are observed in the same
/// order commands execute.
pub struct JournalWriter {
    /// Open journal file (read + write).
    file: File,
    /// Offset at which the next frame will be written.
    write_offset: u64,
    /// Next sequence number to assign.
    next_seq: u64,
}

impl JournalWriter {
    /// Create a fresh journal file containing only the file header.
    ///
    /// Fails if the file already exists.
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        file.write_all(&FileHeader::new().to_bytes())?;
        file.sync_all()?;

        Ok(JournalWriter {
            file,
            write_offset: FILE_HEADER_SIZE as u64,
            next_seq: 0,
        })
    }

    /// Open an existing journal for appending, positioned by recovery.
    ///
    /// `next_seq` and `write_offset` come from the recovery scan; anything
    /// beyond `write_offset` (a truncated torn tail) is dead and will be
    /// overwritten by the next append.
    pub fn open(path: &Path, next_seq: u64, write_offset: u64) -> Result<Self, StoreError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(JournalWriter {
            file,
            write_offset,
            next_seq,
        })
    }

    /// Append one entry and make it durable.
    ///
    /// Pipeline: prepare the frame speculatively, write it in one call, then
    /// hit the durability barrier (`sync_data`). Sequencing state advances
    /// only after the barrier returns — a crash mid-append leaves a torn
    /// tail that the recovery scan truncates.
    pub fn append(&mut self, payload: &[u8], stamp_ns: u64) -> Result<u64, StoreError> {
        if payload.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(StoreError::PayloadTooLarge {
                size: payload.len() as u32,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let seq = self.next_seq;
        let header = FrameHeader::new(seq, stamp_ns, payload);

        // Single contiguous write: header + payload + alignment padding.
        let padding_len = calculate_padding(payload.len() as u32);
        let mut frame = Vec::with_capacity(frame_size(payload.len() as u32));
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&[0u8; 8][..padding_len]);

        self.file.seek(SeekFrom::Start(self.write_offset))?;
        self.file.write_all(&frame)?;

        // Durability barrier. The entry is durable if and only if this
        // returns success; that is the commit point.
        self.file.sync_data()?;

        self.next_seq += 1;
        self.write_offset += frame.len() as u64;

        Ok(seq)
    }

    /// Next sequence number that will be assigned.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Current append offset.
    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    /// Flush any pending file metadata to stable storage.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::recovery::{JournalRecovery, RecoveryOutcome};
    use tempfile::tempdir;

    #[test]
    fn test_create_then_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        let mut writer = JournalWriter::create(&path).unwrap();
        assert_eq!(writer.next_seq(), 0);

        let seq = writer.append(b"first", 100).unwrap();
        assert_eq!(seq, 0);
        let seq = writer.append(b"second entry", 200).unwrap();
        assert_eq!(seq, 1);
        assert_eq!(writer.next_seq(), 2);
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        let writer = JournalWriter::create(&path).unwrap();
        drop(writer);

        assert!(matches!(
            JournalWriter::create(&path),
            Err(StoreError::Io(_))
        ));
    }

    #[test]
    fn test_payload_too_large_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        let mut writer = JournalWriter::create(&path).unwrap();
        let oversized = vec![0u8; MAX_PAYLOAD_SIZE as usize + 1];
        assert!(matches!(
            writer.append(&oversized, 0),
            Err(StoreError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_appended_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        let mut writer = JournalWriter::create(&path).unwrap();
        writer.append(b"alpha", 1).unwrap();
        writer.append(b"beta", 2).unwrap();
        drop(writer);

        let recovery = JournalRecovery::open(&path).unwrap().unwrap();
        let outcome = recovery.scan().unwrap();
        match outcome {
            RecoveryOutcome::Clean {
                last_seq,
                next_offset,
            } => {
                let mut writer = JournalWriter::open(&path, last_seq + 1, next_offset).unwrap();
                assert_eq!(writer.append(b"gamma", 3).unwrap(), 2);
            }
            other => panic!("expected clean recovery, got {:?}", other),
        }
    }
}
