//! Write-ahead log and snapshot files backing the durable store

use crate::core::{Key, Result, StoreError};
use crate::storage::collection::{Collection, CollectionSnapshot, Record};
use crate::storage::engine::DatabaseState;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;

pub const SNAPSHOT_FORMAT_VERSION: u16 = 1;

// ============================================================================
// WAL Entry Types
// ============================================================================

/// A single mutation inside a committed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalOp {
    Put { collection: String, record: Record },
    Delete { collection: String, key: Key },
}

/// One frame per committed transaction, so replay is all-or-nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    Commit { tx_id: u64, ops: Vec<WalOp> },
}

// ============================================================================
// Database Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub format_version: u16,
    pub schema_version: u32,
    pub collections: Vec<CollectionSnapshot>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: i64,
    pub record_count: usize,
    pub collection_count: usize,
}

impl DatabaseSnapshot {
    pub fn capture(state: &DatabaseState) -> Self {
        let collections: Vec<CollectionSnapshot> =
            state.collections.values().map(Collection::to_snapshot).collect();
        let record_count = collections.iter().map(|c| c.records.len()).sum();
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version: state.version,
            metadata: SnapshotMetadata {
                created_at: chrono::Utc::now().timestamp_millis(),
                record_count,
                collection_count: collections.len(),
            },
            collections,
        }
    }

    pub fn into_state(self) -> Result<DatabaseState> {
        if self.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(StoreError::Serialization(format!(
                "Snapshot format {} is newer than supported format {}",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        let mut state = DatabaseState {
            version: self.schema_version,
            ..DatabaseState::default()
        };
        for snapshot in self.collections {
            let collection = Collection::from_snapshot(snapshot)?;
            state
                .collections
                .insert(collection.schema().name().to_string(), collection);
        }
        Ok(state)
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// fsync after every committed transaction
    Sync,
    /// flush to the OS after every committed transaction
    #[default]
    Async,
    /// nothing touches disk
    None,
}

impl FromStr for DurabilityMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            "none" | "memory" => Ok(Self::None),
            other => Err(StoreError::Validation(format!(
                "Unknown durability mode '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DurabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sync => "sync",
            Self::Async => "async",
            Self::None => "none",
        })
    }
}

fn io_err(context: &str, err: impl fmt::Display) -> StoreError {
    StoreError::Io(format!("{}: {}", context, err))
}

fn codec_err(context: &str, err: impl fmt::Display) -> StoreError {
    StoreError::Serialization(format!("{}: {}", context, err))
}

// ============================================================================
// WAL Manager
// ============================================================================

/// Destination of WAL frames.
pub(crate) trait WalSink: Write + Send {
    fn sync(&mut self) -> std::io::Result<()>;
}

impl WalSink for File {
    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_all()
    }
}

type WalWriter = BufWriter<Box<dyn WalSink>>;

fn open_writer(path: &Path) -> Result<WalWriter> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err("Failed to open WAL file", e))?;
    Ok(BufWriter::new(Box::new(file)))
}

fn write_frame(writer: &mut WalWriter, frame: &[u8], sync: bool) -> std::io::Result<()> {
    writer.write_all(frame)?;
    writer.flush()?;
    if sync {
        writer.get_mut().sync()?;
    }
    Ok(())
}

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<WalWriter>,
    durability_mode: DurabilityMode,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err("Failed to create WAL directory", e))?;
        }

        let wal_file = if durability_mode != DurabilityMode::None {
            Some(open_writer(&wal_path)?)
        } else {
            None
        };

        Ok(Self {
            wal_path,
            wal_file,
            durability_mode,
            entries_since_checkpoint: 0,
            checkpoint_threshold: 1000,
        })
    }

    /// Appends one frame. On failure the file is cut back to its length
    /// before the call, so a transaction reported as failed never replays.
    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let serialized =
            rmp_serde::to_vec(entry).map_err(|e| codec_err("Failed to serialize WAL entry", e))?;
        let len = u32::try_from(serialized.len())
            .map_err(|_| StoreError::Serialization("WAL entry too large".to_string()))?;
        let mut frame = Vec::with_capacity(serialized.len() + 4);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&serialized);

        // Every append flushes, so the writer buffer is empty here and the
        // file length is the committed length.
        let committed_len = fs::metadata(&self.wal_path)
            .map_err(|e| io_err("Failed to stat WAL", e))?
            .len();
        let sync = self.durability_mode == DurabilityMode::Sync;
        let file = self
            .wal_file
            .as_mut()
            .ok_or_else(|| StoreError::Io("WAL file not initialized".to_string()))?;

        if let Err(err) = write_frame(file, &frame, sync) {
            if let Err(rollback_err) = self.rollback(committed_len) {
                warn!(
                    "Could not roll back {} after a failed append: {}",
                    self.wal_path.display(),
                    rollback_err
                );
            }
            return Err(io_err("Failed to append WAL frame", err));
        }
        self.entries_since_checkpoint += 1;
        Ok(())
    }

    /// Drops buffered bytes of a failed frame and truncates the file to
    /// `committed_len`. Leaves no writer behind if the file cannot be reopened.
    fn rollback(&mut self, committed_len: u64) -> Result<()> {
        if let Some(writer) = self.wal_file.take() {
            // into_parts hands back the unflushed tail instead of writing it on drop
            let (_sink, _unflushed) = writer.into_parts();
        }
        let file = OpenOptions::new()
            .write(true)
            .open(&self.wal_path)
            .map_err(|e| io_err("Failed to reopen WAL", e))?;
        file.set_len(committed_len)
            .map_err(|e| io_err("Failed to truncate WAL", e))?;
        file.sync_all().map_err(|e| io_err("Failed to sync WAL", e))?;
        drop(file);
        self.wal_file = Some(open_writer(&self.wal_path)?);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_sink(&mut self, sink: Box<dyn WalSink>) {
        self.wal_file = Some(BufWriter::new(sink));
    }

    /// Reads every complete frame. A frame cut short by a crash mid-append
    /// ends the log; its transaction never committed.
    pub fn read_all(&self) -> Result<Vec<WalEntry>> {
        if !self.wal_path.exists() {
            return Ok(Vec::new());
        }
        let file =
            File::open(&self.wal_path).map_err(|e| io_err("Failed to open WAL for reading", e))?;
        let file_len = file
            .metadata()
            .map_err(|e| io_err("Failed to stat WAL", e))?
            .len();
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut offset: u64 = 0;
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(io_err("Failed to read WAL entry length", e)),
            }
            offset += 4;
            let len = u64::from(u32::from_le_bytes(len_bytes));
            if len > file_len.saturating_sub(offset) {
                warn!(
                    "Ignoring torn WAL frame at end of {}",
                    self.wal_path.display()
                );
                break;
            }
            let mut data = vec![0u8; len as usize];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    warn!(
                        "Ignoring torn WAL frame at end of {}",
                        self.wal_path.display()
                    );
                    break;
                }
                Err(e) => return Err(io_err("Failed to read WAL entry data", e)),
            }
            offset += len;
            let entry: WalEntry = rmp_serde::from_slice(&data)
                .map_err(|e| codec_err("Failed to deserialize WAL entry", e))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.wal_file = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.wal_path)
            .map_err(|e| io_err("Failed to truncate WAL", e))?;
        drop(file);
        self.wal_file = Some(open_writer(&self.wal_path)?);
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold.max(1);
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Writes to a temp file in the same directory, syncs, then renames over
    /// the previous snapshot. Readers see either the old or the new file.
    pub fn save(&self, snapshot: &DatabaseSnapshot) -> Result<()> {
        let parent = self
            .snapshot_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent).map_err(|e| io_err("Failed to create snapshot directory", e))?;

        let serialized =
            rmp_serde::to_vec(snapshot).map_err(|e| codec_err("Failed to serialize snapshot", e))?;
        let mut temp =
            NamedTempFile::new_in(&parent).map_err(|e| io_err("Failed to create temp file", e))?;
        temp.write_all(&serialized)
            .map_err(|e| io_err("Failed to write snapshot", e))?;
        temp.flush().map_err(|e| io_err("Failed to flush snapshot", e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| io_err("Failed to sync snapshot", e))?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| io_err("Failed to rename snapshot", e))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<DatabaseSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file =
            File::open(&self.snapshot_path).map_err(|e| io_err("Failed to open snapshot", e))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| io_err("Failed to read snapshot", e))?;
        let snapshot: DatabaseSnapshot = rmp_serde::from_slice(&data)
            .map_err(|e| codec_err("Failed to deserialize snapshot", e))?;
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(
        data_dir: P,
        database: &str,
        durability_mode: DurabilityMode,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let wal = WalManager::new(data_dir.join(format!("{}.wal", database)), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(format!("{}.snapshot", database)));
        Ok(Self {
            wal,
            snapshot,
            durability_mode,
        })
    }

    pub fn log(&mut self, entry: &WalEntry) -> Result<()> {
        self.wal.append(entry)
    }

    pub fn checkpoint(&mut self, state: &DatabaseState) -> Result<()> {
        self.checkpoint_snapshot(&DatabaseSnapshot::capture(state))
    }

    /// Checkpoint from an already captured snapshot, for callers that hand
    /// the file work to a blocking thread.
    pub fn checkpoint_snapshot(&mut self, snapshot: &DatabaseSnapshot) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.snapshot.save(snapshot)?;
        self.wal.clear()?;
        debug!(
            "Checkpointed database at schema version {}",
            snapshot.schema_version
        );
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    /// Loads the latest snapshot and replays committed transactions on top.
    pub fn recover(&self) -> Result<Option<DatabaseState>> {
        let snapshot = self.snapshot.load()?;
        let wal_entries = self.wal.read_all()?;
        if snapshot.is_none() && wal_entries.is_empty() {
            return Ok(None);
        }

        let mut state = match snapshot {
            Some(snapshot) => snapshot.into_state()?,
            None => DatabaseState::default(),
        };

        for entry in wal_entries {
            let WalEntry::Commit { tx_id, ops } = entry;
            for op in ops {
                match op {
                    WalOp::Put { collection, record } => match state.collections.get_mut(&collection) {
                        Some(target) => {
                            target.put(record)?;
                        }
                        None => warn!(
                            "WAL transaction {} writes to unknown collection '{}'",
                            tx_id, collection
                        ),
                    },
                    WalOp::Delete { collection, key } => {
                        if let Some(target) = state.collections.get_mut(&collection) {
                            target.delete(&key);
                        }
                    }
                }
            }
        }
        Ok(Some(state))
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }

    pub fn snapshot(&self) -> &SnapshotManager {
        &self.snapshot
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::collection::{CollectionSchema, IndexSchema};
    use serde_json::json;
    use tempfile::TempDir;

    fn state_with_annotations() -> DatabaseState {
        let mut collection = Collection::new(CollectionSchema::auto_increment("annotations", "id"));
        collection.create_index(IndexSchema::on("documentId")).unwrap();
        let mut state = DatabaseState {
            version: 2,
            ..DatabaseState::default()
        };
        state.collections.insert("annotations".to_string(), collection);
        state
    }

    #[test]
    fn test_wal_append_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let mut wal = WalManager::new(temp_dir.path().join("test.wal"), DurabilityMode::Sync).unwrap();
        wal.append(&WalEntry::Commit {
            tx_id: 1,
            ops: vec![WalOp::Put {
                collection: "readingStates".to_string(),
                record: json!({ "documentId": "alice", "positionIndex": 4 }),
            }],
        })
        .unwrap();
        wal.append(&WalEntry::Commit {
            tx_id: 2,
            ops: vec![WalOp::Delete {
                collection: "readingStates".to_string(),
                key: Key::from("alice"),
            }],
        })
        .unwrap();
        assert_eq!(wal.read_all().unwrap().len(), 2);
        assert_eq!(wal.entries_since_checkpoint(), 2);
    }

    #[test]
    fn test_torn_trailing_frame_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("torn.wal");
        let mut wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        wal.append(&WalEntry::Commit { tx_id: 1, ops: vec![] }).unwrap();
        drop(wal);

        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(&64u32.to_le_bytes()).unwrap();
        file.write_all(&[0x92, 0x01]).unwrap();
        drop(file);

        let wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        assert_eq!(wal.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_oversized_length_prefix_is_a_torn_tail() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("corrupt.wal");
        let mut wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        wal.append(&WalEntry::Commit { tx_id: 1, ops: vec![] }).unwrap();
        drop(wal);

        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(&u32::MAX.to_le_bytes()).unwrap();
        file.write_all(&[0x92, 0x01, 0x90]).unwrap();
        drop(file);

        let wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        assert_eq!(wal.read_all().unwrap().len(), 1);
    }

    /// Writes at most `budget` bytes to the real file, then fails like a full disk.
    struct ShortWrite {
        file: File,
        budget: usize,
    }

    impl Write for ShortWrite {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.budget == 0 {
                return Err(std::io::Error::other("no space left on device"));
            }
            let n = self.file.write(&buf[..buf.len().min(self.budget)])?;
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.file.flush()
        }
    }

    impl WalSink for ShortWrite {
        fn sync(&mut self) -> std::io::Result<()> {
            self.file.sync_all()
        }
    }

    #[test]
    fn test_failed_append_never_replays() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("full.wal");
        let mut wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        wal.append(&WalEntry::Commit { tx_id: 1, ops: vec![] }).unwrap();
        let committed_len = fs::metadata(&wal_path).unwrap().len();

        let file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        wal.set_sink(Box::new(ShortWrite { file, budget: 3 }));
        let failed = WalEntry::Commit {
            tx_id: 2,
            ops: vec![WalOp::Delete {
                collection: "annotations".to_string(),
                key: Key::from(7i64),
            }],
        };
        assert!(matches!(wal.append(&failed), Err(StoreError::Io(_))));
        assert_eq!(fs::metadata(&wal_path).unwrap().len(), committed_len);
        assert_eq!(wal.entries_since_checkpoint(), 1);

        wal.append(&WalEntry::Commit { tx_id: 3, ops: vec![] }).unwrap();
        let tx_ids: Vec<u64> = wal
            .read_all()
            .unwrap()
            .into_iter()
            .map(|WalEntry::Commit { tx_id, .. }| tx_id)
            .collect();
        assert_eq!(tx_ids, vec![1, 3]);
    }

    #[test]
    fn test_snapshot_round_trip_keeps_version() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp_dir.path().join("db.snapshot"));
        let mut state = state_with_annotations();
        state
            .collections
            .get_mut("annotations")
            .unwrap()
            .put(json!({ "documentId": "alice", "positionIndex": 1 }))
            .unwrap();

        manager.save(&DatabaseSnapshot::capture(&state)).unwrap();
        assert!(manager.exists());

        let loaded = manager.load().unwrap().unwrap();
        assert_eq!(loaded.metadata.record_count, 1);
        let restored = loaded.into_state().unwrap();
        assert_eq!(restored.version, 2);
        assert_eq!(restored.collections["annotations"].len(), 1);
    }

    #[test]
    fn test_recover_replays_wal_after_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        let mut persistence =
            PersistenceManager::new(temp_dir.path(), "readit-db", DurabilityMode::Sync).unwrap();
        let state = state_with_annotations();
        persistence.checkpoint(&state).unwrap();
        assert_eq!(persistence.wal().entries_since_checkpoint(), 0);

        persistence
            .log(&WalEntry::Commit {
                tx_id: 1,
                ops: vec![
                    WalOp::Put {
                        collection: "annotations".to_string(),
                        record: json!({ "id": 1, "documentId": "alice" }),
                    },
                    WalOp::Put {
                        collection: "annotations".to_string(),
                        record: json!({ "id": 2, "documentId": "alice" }),
                    },
                ],
            })
            .unwrap();
        persistence
            .log(&WalEntry::Commit {
                tx_id: 2,
                ops: vec![WalOp::Delete {
                    collection: "annotations".to_string(),
                    key: Key::Integer(1),
                }],
            })
            .unwrap();

        let recovered = persistence.recover().unwrap().unwrap();
        let annotations = &recovered.collections["annotations"];
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations.next_id(), 3);
    }

    #[test]
    fn test_recover_empty_dir_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let persistence =
            PersistenceManager::new(temp_dir.path(), "readit-db", DurabilityMode::Async).unwrap();
        assert!(persistence.recover().unwrap().is_none());
    }

    #[test]
    fn test_durability_mode_parsing() {
        assert_eq!("SYNC".parse::<DurabilityMode>().unwrap(), DurabilityMode::Sync);
        assert_eq!("memory".parse::<DurabilityMode>().unwrap(), DurabilityMode::None);
        assert!("fast".parse::<DurabilityMode>().is_err());
    }
}
