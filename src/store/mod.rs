//! The durable store: an append-only journal of executed commands plus
//! sequence-numbered snapshots of exported model state.
//!
//! Only the sequencing and replay contract is load-bearing; the byte-level
//! layout lives behind the [`Store`] trait so the backing medium stays
//! pluggable.

pub mod errors;
pub mod format;
pub mod journal;
pub mod recovery;
pub mod snapshot;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::kernel::traits::{SnapshotStream, Timestamp};
use crate::kernel::value::Value;

pub use errors::StoreError;
use journal::JournalWriter;
use recovery::{JournalRecovery, RecoveryOutcome};
use snapshot::{SnapshotError, SnapshotManifest};

/// Journal file name inside a store directory.
const JOURNAL_FILE: &str = "journal.log";

/// Snapshot subdirectory inside a store directory.
const SNAPSHOT_DIR: &str = "snapshots";

/// The journaled form of a command: operation name plus fully bound
/// arguments. Replay re-resolves it through the dispatch table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JournalCommand {
    pub name: String,
    pub args: Vec<Value>,
}

/// One journal entry: a command, its sequence number, and its admission
/// timestamp. Immutable once written.
#[derive(Clone, Debug)]
pub struct JournalEntry {
    pub seq: u64,
    pub stamp: Timestamp,
    pub command: JournalCommand,
}

/// A snapshot read back from the store.
#[derive(Clone, Debug)]
pub struct StoredSnapshot {
    /// Highest journal seq included in the snapshot.
    pub seq: u64,
    /// The exported model state.
    pub state: SnapshotStream,
}

/// The durable store abstraction the engine runs against.
pub trait Store: Send + 'static {
    /// Sequence number the next appended command will receive.
    fn next_seq(&self) -> u64;

    /// Append a command, returning its sequence number. The entry is durable
    /// when this returns.
    fn append(&mut self, command: &JournalCommand, stamp: Timestamp) -> Result<u64, StoreError>;

    /// Read every entry with `seq >= from`, in ascending order.
    fn read_from(&self, from: u64) -> Result<Vec<JournalEntry>, StoreError>;

    /// Persist a snapshot of exported state covering entries `..= seq`.
    fn write_snapshot(&mut self, seq: u64, state: &SnapshotStream) -> Result<(), StoreError>;

    /// The most recent fully valid snapshot, if any.
    fn latest_snapshot(&self) -> Result<Option<StoredSnapshot>, StoreError>;

    /// Flush pending writes to stable storage.
    fn sync(&mut self) -> Result<(), StoreError>;
}

/// File-backed store: one directory holding `journal.log` and `snapshots/`.
pub struct FileStore {
    dir: PathBuf,
    writer: JournalWriter,
}

impl FileStore {
    /// Create a fresh store. Fails if one already exists at `dir`.
    pub fn create(dir: &Path) -> Result<Self, StoreError> {
        let journal_path = dir.join(JOURNAL_FILE);
        if journal_path.exists() {
            return Err(StoreError::AlreadyExists(dir.to_path_buf()));
        }

        fs::create_dir_all(dir)?;
        let writer = JournalWriter::create(&journal_path)?;

        debug!(dir = %dir.display(), "created store");

        Ok(FileStore {
            dir: dir.to_path_buf(),
            writer,
        })
    }

    /// Open an existing store, running the recovery scan. Fails if none
    /// exists at `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let journal_path = dir.join(JOURNAL_FILE);
        let recovery = match JournalRecovery::open(&journal_path)? {
            Some(recovery) => recovery,
            None => return Err(StoreError::NotFound(dir.to_path_buf())),
        };

        let outcome = recovery.scan()?;
        if let RecoveryOutcome::Truncated { truncated_at, .. } = &outcome {
            debug!(dir = %dir.display(), truncated_at, "store opened after tail repair");
        }

        let writer = JournalWriter::open(&journal_path, outcome.next_seq(), outcome.next_offset())?;

        Ok(FileStore {
            dir: dir.to_path_buf(),
            writer,
        })
    }

    /// Whether a store exists at `dir`.
    pub fn exists(dir: &Path) -> bool {
        dir.join(JOURNAL_FILE).exists()
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    fn snapshot_dir(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_DIR)
    }
}

impl Store for FileStore {
    fn next_seq(&self) -> u64 {
        self.writer.next_seq()
    }

    fn append(&mut self, command: &JournalCommand, stamp: Timestamp) -> Result<u64, StoreError> {
        let seq = self.writer.next_seq();
        let payload = bincode::serialize(command).map_err(|e| StoreError::Codec {
            seq,
            message: e.to_string(),
        })?;
        self.writer.append(&payload, stamp.as_nanos())
    }

    fn read_from(&self, from: u64) -> Result<Vec<JournalEntry>, StoreError> {
        let raw = recovery::read_entries(&self.journal_path(), from, self.writer.write_offset())?;

        let mut entries = Vec::with_capacity(raw.len());
        for entry in raw {
            let command: JournalCommand =
                bincode::deserialize(&entry.payload).map_err(|e| StoreError::Codec {
                    seq: entry.seq,
                    message: e.to_string(),
                })?;
            entries.push(JournalEntry {
                seq: entry.seq,
                stamp: Timestamp::from_nanos(entry.stamp_ns),
                command,
            });
        }

        Ok(entries)
    }

    fn write_snapshot(&mut self, seq: u64, state: &SnapshotStream) -> Result<(), StoreError> {
        // A snapshot may never claim entries the journal does not hold.
        if seq >= self.writer.next_seq() {
            return Err(StoreError::Snapshot(format!(
                "snapshot seq {} beyond journal tail {}",
                seq,
                self.writer.next_seq()
            )));
        }

        let manifest = SnapshotManifest::new(seq, state.schema_version, state.data.clone());
        let path = self
            .snapshot_dir()
            .join(SnapshotManifest::filename_for_seq(seq));
        manifest.save_to_file(&path)?;

        debug!(seq, "snapshot written");
        Ok(())
    }

    fn latest_snapshot(&self) -> Result<Option<StoredSnapshot>, StoreError> {
        let manifest = SnapshotManifest::find_latest(&self.snapshot_dir())?;
        Ok(manifest.map(|m| StoredSnapshot {
            seq: m.seq,
            state: SnapshotStream {
                schema_version: m.schema_version,
                data: m.state,
            },
        }))
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.writer.sync()
    }
}

impl From<SnapshotError> for StoreError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::Io(io) => StoreError::Io(io),
            other => StoreError::Snapshot(other.to_string()),
        }
    }
}
