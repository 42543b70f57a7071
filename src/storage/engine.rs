use super::collection::{Collection, CollectionSchema, Record};
use super::persistence::{DatabaseSnapshot, DurabilityMode, PersistenceManager, WalEntry, WalOp};
use crate::connection::StoreConfig;
use crate::core::{Key, Result, StoreError};
use crate::migration::{self, MigrationPlan};
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::info_span;

/// Schema version plus every collection, as one unit.
#[derive(Debug, Clone, Default)]
pub struct DatabaseState {
    pub(crate) version: u32,
    pub(crate) collections: BTreeMap<String, Collection>,
}

impl DatabaseState {
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }
}

/// An open durable store.
///
/// Reads share the state; writes are serialized, staged on copies of the
/// collections they touch, and swapped in only after the WAL frame is
/// written.
pub struct Database {
    name: String,
    version: u32,
    state: RwLock<DatabaseState>,
    // File work runs on blocking threads, so the manager is shared with them.
    persistence: Option<Arc<Mutex<PersistenceManager>>>,
    next_tx_id: AtomicU64,
}

impl Database {
    /// Opens (and if needed upgrades) the store described by `config`.
    ///
    /// Recovery, upgrade and the closing checkpoint form one unit: if any of
    /// them fails nothing is written and the error is a
    /// [`StoreError::Connection`].
    pub async fn open(config: &StoreConfig, plan: &MigrationPlan) -> Result<Database> {
        let span = info_span!(
            "open_database",
            database = %config.database,
            target_version = plan.target_version()
        );
        span.in_scope(|| Self::open_inner(config, plan)).map_err(|err| match err {
            StoreError::Connection(_) => err,
            other => StoreError::Connection(other.to_string()),
        })
    }

    fn open_inner(config: &StoreConfig, plan: &MigrationPlan) -> Result<Database> {
        plan.validate()?;

        let mut persistence = match config.durability {
            DurabilityMode::None => None,
            mode => {
                let mut manager = PersistenceManager::new(&config.data_dir, &config.database, mode)?;
                manager
                    .wal_mut()
                    .set_checkpoint_threshold(config.checkpoint_threshold);
                Some(manager)
            }
        };

        let mut state = match &persistence {
            Some(manager) => manager.recover()?.unwrap_or_default(),
            None => DatabaseState::default(),
        };

        let applied = migration::upgrade(plan, &mut state)?;
        if !applied.is_empty() {
            info!(
                "Upgraded '{}' to schema version {} (steps {:?})",
                config.database, state.version, applied
            );
        }

        // Compacts the WAL and commits any upgrade in one atomic rename.
        if let Some(manager) = persistence.as_mut() {
            manager.checkpoint(&state)?;
        }

        Ok(Database {
            name: config.database.clone(),
            version: state.version,
            state: RwLock::new(state),
            persistence: persistence.map(|manager| Arc::new(Mutex::new(manager))),
            next_tx_id: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_durable(&self) -> bool {
        self.persistence.is_some()
    }

    pub async fn collection_names(&self) -> Vec<String> {
        self.state.read().await.collections.keys().cloned().collect()
    }

    pub async fn schemas(&self) -> Vec<CollectionSchema> {
        self.state
            .read()
            .await
            .collections
            .values()
            .map(|c| c.schema().clone())
            .collect()
    }

    /// Number of records held by each collection.
    pub async fn record_counts(&self) -> BTreeMap<String, usize> {
        self.state
            .read()
            .await
            .collections
            .iter()
            .map(|(name, c)| (name.clone(), c.len()))
            .collect()
    }

    /// Runs `f` in a read-only transaction over `scope`.
    pub async fn read<T, F>(&self, scope: &[&str], f: F) -> Result<T>
    where
        F: FnOnce(&ReadTransaction<'_>) -> Result<T>,
    {
        let state = self.state.read().await;
        let tx = ReadTransaction::new(&state, scope)?;
        f(&tx)
    }

    /// Runs `f` in a read-write transaction over `scope`. Either every
    /// mutation `f` made becomes visible (and durable), or none does.
    pub async fn write<T, F>(&self, scope: &[&str], f: F) -> Result<T>
    where
        F: FnOnce(&mut WriteTransaction) -> Result<T>,
    {
        let mut state = self.state.write().await;
        let mut tx = WriteTransaction::begin(&state, scope)?;
        let value = f(&mut tx)?;
        let (staged, ops) = tx.finish();
        if ops.is_empty() {
            return Ok(value);
        }

        match &self.persistence {
            Some(persistence) => {
                let tx_id = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
                let entry = WalEntry::Commit { tx_id, ops };
                let manager = Arc::clone(persistence);
                // The state write guard stays held, so frames land in commit order.
                let checkpoint_due = run_blocking(move || {
                    let mut manager = manager.lock()?;
                    manager.log(&entry)?;
                    Ok(manager.needs_checkpoint())
                })
                .await?;
                state.collections.extend(staged);
                if checkpoint_due {
                    let snapshot = DatabaseSnapshot::capture(&state);
                    let manager = Arc::clone(persistence);
                    let checkpointed = run_blocking(move || {
                        let mut manager = manager.lock()?;
                        manager.checkpoint_snapshot(&snapshot)
                    })
                    .await;
                    if let Err(err) = checkpointed {
                        // The transaction is already durable in the WAL.
                        warn!("Checkpoint of '{}' failed: {}", self.name, err);
                    }
                }
            }
            None => state.collections.extend(staged),
        }
        Ok(value)
    }

    /// Folds the WAL into a fresh snapshot.
    pub async fn checkpoint(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let snapshot = DatabaseSnapshot::capture(&*self.state.read().await);
        let manager = Arc::clone(persistence);
        run_blocking(move || {
            let mut manager = manager.lock()?;
            manager.checkpoint_snapshot(&snapshot)
        })
        .await
    }
}

/// Runs WAL and snapshot file work off the async executor.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(format!("Persistence task failed: {}", e)))?
}

fn out_of_scope(name: &str) -> StoreError {
    StoreError::ConstraintViolation(format!(
        "Collection '{}' is not part of this transaction",
        name
    ))
}

pub struct ReadTransaction<'a> {
    state: &'a DatabaseState,
    scope: Vec<String>,
}

impl<'a> ReadTransaction<'a> {
    fn new(state: &'a DatabaseState, scope: &[&str]) -> Result<Self> {
        for name in scope {
            if !state.collections.contains_key(*name) {
                return Err(StoreError::CollectionNotFound(name.to_string()));
            }
        }
        Ok(Self {
            state,
            scope: scope.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn collection(&self, name: &str) -> Result<&'a Collection> {
        if !self.scope.iter().any(|s| s == name) {
            return Err(out_of_scope(name));
        }
        self.state
            .collections
            .get(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }

    pub fn get(&self, collection: &str, key: &Key) -> Result<Option<&'a Record>> {
        Ok(self.collection(collection)?.get(key))
    }

    pub fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Key,
    ) -> Result<Vec<&'a Record>> {
        self.collection(collection)?.get_all_by_index(index, value)
    }
}

pub struct WriteTransaction {
    staged: BTreeMap<String, Collection>,
    ops: Vec<WalOp>,
}

impl WriteTransaction {
    fn begin(state: &DatabaseState, scope: &[&str]) -> Result<Self> {
        let mut staged = BTreeMap::new();
        for name in scope {
            let collection = state
                .collections
                .get(*name)
                .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;
            staged.insert(name.to_string(), collection.clone());
        }
        Ok(Self {
            staged,
            ops: Vec::new(),
        })
    }

    fn finish(self) -> (BTreeMap<String, Collection>, Vec<WalOp>) {
        (self.staged, self.ops)
    }

    pub fn collection(&self, name: &str) -> Result<&Collection> {
        self.staged.get(name).ok_or_else(|| out_of_scope(name))
    }

    fn collection_mut(&mut self, name: &str) -> Result<&mut Collection> {
        self.staged.get_mut(name).ok_or_else(|| out_of_scope(name))
    }

    pub fn get(&self, collection: &str, key: &Key) -> Result<Option<&Record>> {
        Ok(self.collection(collection)?.get(key))
    }

    pub fn get_all_by_index(&self, collection: &str, index: &str, value: &Key) -> Result<Vec<&Record>> {
        self.collection(collection)?.get_all_by_index(index, value)
    }

    /// Upsert. Returns the primary key, assigned here for auto-increment
    /// collections.
    pub fn put(&mut self, collection: &str, record: Record) -> Result<Key> {
        let target = self.collection_mut(collection)?;
        let key = target.put(record)?;
        self.log_put(collection, &key)?;
        Ok(key)
    }

    /// Insert-only variant of [`put`](Self::put).
    pub fn add(&mut self, collection: &str, record: Record) -> Result<Key> {
        let target = self.collection_mut(collection)?;
        let key = target.add(record)?;
        self.log_put(collection, &key)?;
        Ok(key)
    }

    /// Deleting a missing key is not an error; the return value says whether
    /// anything was removed.
    pub fn delete(&mut self, collection: &str, key: &Key) -> Result<bool> {
        let removed = self.collection_mut(collection)?.delete(key);
        if removed {
            self.ops.push(WalOp::Delete {
                collection: collection.to_string(),
                key: key.clone(),
            });
        }
        Ok(removed)
    }

    fn log_put(&mut self, collection: &str, key: &Key) -> Result<()> {
        let record = self
            .collection(collection)?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::Io(format!("Record {} vanished after write", key)))?;
        self.ops.push(WalOp::Put {
            collection: collection.to_string(),
            record,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::readit_plan;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_failed_write_leaves_state_untouched() {
        let db = Database::open(&StoreConfig::in_memory(), &readit_plan())
            .await
            .unwrap();

        let result: Result<()> = db
            .write(&["readingStates"], |tx| {
                tx.put("readingStates", json!({ "documentId": "a", "positionIndex": 1 }))?;
                Err(StoreError::Validation("abort".into()))
            })
            .await;
        assert!(result.is_err());

        let found = db
            .read(&["readingStates"], |tx| {
                Ok(tx.get("readingStates", &Key::from("a"))?.cloned())
            })
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_scope_is_enforced() {
        let db = Database::open(&StoreConfig::in_memory(), &readit_plan())
            .await
            .unwrap();
        let err = db
            .read(&["readingStates"], |tx| tx.collection("annotations").map(|_| ()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));

        let err = db.read(&["nope"], |_| Ok(())).await.unwrap_err();
        assert_eq!(err, StoreError::CollectionNotFound("nope".into()));
    }

    #[tokio::test]
    async fn test_committed_writes_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::new(temp_dir.path()).durability(DurabilityMode::Sync);
        {
            let db = Database::open(&config, &readit_plan()).await.unwrap();
            db.write(&["readingStates"], |tx| {
                tx.put("readingStates", json!({ "documentId": "a", "positionIndex": 7 }))
            })
            .await
            .unwrap();
        }

        let db = Database::open(&config, &readit_plan()).await.unwrap();
        let record = db
            .read(&["readingStates"], |tx| {
                Ok(tx.get("readingStates", &Key::from("a"))?.cloned())
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["positionIndex"], 7);
    }

    #[tokio::test]
    async fn test_checkpoint_threshold_folds_wal() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::new(temp_dir.path())
            .durability(DurabilityMode::Async)
            .checkpoint_threshold(2);
        let db = Database::open(&config, &readit_plan()).await.unwrap();
        for i in 0..5 {
            db.write(&["readingStates"], |tx| {
                tx.put("readingStates", json!({ "documentId": "a", "positionIndex": i }))
            })
            .await
            .unwrap();
        }
        let pending = db
            .persistence
            .as_ref()
            .unwrap()
            .lock()
            .unwrap()
            .wal()
            .entries_since_checkpoint();
        assert!(pending < 2);
    }

    #[tokio::test]
    async fn test_record_counts() {
        let db = Database::open(&StoreConfig::in_memory(), &readit_plan())
            .await
            .unwrap();
        db.write(&["readingStates"], |tx| {
            tx.put("readingStates", json!({ "documentId": "a", "positionIndex": 1 }))?;
            tx.put("readingStates", json!({ "documentId": "b", "positionIndex": 2 }))
        })
        .await
        .unwrap();

        let counts = db.record_counts().await;
        assert_eq!(counts.get("readingStates"), Some(&2));
        assert_eq!(counts.get("annotations"), Some(&0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_durable_writes_all_replay() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::new(temp_dir.path())
            .durability(DurabilityMode::Sync)
            .checkpoint_threshold(3);
        let db = Arc::new(Database::open(&config, &readit_plan()).await.unwrap());

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let db = Arc::clone(&db);
                tokio::spawn(async move {
                    db.write(&["readingStates"], |tx| {
                        tx.put(
                            "readingStates",
                            json!({ "documentId": format!("doc-{}", i), "positionIndex": i }),
                        )
                    })
                    .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }
        drop(db);

        let db = Database::open(&config, &readit_plan()).await.unwrap();
        assert_eq!(db.record_counts().await.get("readingStates"), Some(&8));
    }
}
