pub mod config;

pub use config::StoreConfig;

use crate::core::Result;
use crate::migration::{MigrationPlan, readit_plan};
use crate::storage::Database;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{info, warn};
use std::sync::{Arc, Mutex};

type PendingOpen = Shared<BoxFuture<'static, Result<Arc<Database>>>>;

/// Lazily opens the durable store and hands every caller the same handle.
///
/// The first caller starts the open; callers arriving while it is in flight
/// await the same future, so the upgrade runs once. A failed open stays
/// failed for everyone until [`Connector::reset`] is called.
///
/// ```
/// # use readmark::{Connector, StoreConfig};
/// # #[tokio::main]
/// # async fn main() -> readmark::Result<()> {
/// let connector = Connector::new(StoreConfig::in_memory());
/// let a = connector.connection().await?;
/// let b = connector.connection().await?;
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
/// # Ok(())
/// # }
/// ```
pub struct Connector {
    config: StoreConfig,
    plan: Arc<MigrationPlan>,
    pending: Mutex<Option<PendingOpen>>,
}

impl Connector {
    /// Connector using the built-in reader schema at `config.schema_version`.
    pub fn new(config: StoreConfig) -> Arc<Self> {
        Self::with_plan(config, readit_plan())
    }

    /// Connector using a custom schema registry, opened at
    /// `config.schema_version`.
    pub fn with_plan(config: StoreConfig, plan: MigrationPlan) -> Arc<Self> {
        let plan = plan.with_target(config.schema_version);
        Arc::new(Self {
            config,
            plan: Arc::new(plan),
            pending: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The shared connection, opening the store on first use.
    pub async fn connection(&self) -> Result<Arc<Database>> {
        let pending = {
            let mut guard = self.pending.lock()?;
            guard
                .get_or_insert_with(|| {
                    let config = self.config.clone();
                    let plan = Arc::clone(&self.plan);
                    async move {
                        let opened = Database::open(&config, &plan).await;
                        match &opened {
                            Ok(db) => info!(
                                "Opened '{}' at schema version {}",
                                db.name(),
                                db.version()
                            ),
                            Err(err) => warn!("Failed to open '{}': {}", config.database, err),
                        }
                        opened.map(Arc::new)
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };
        pending.await
    }

    /// Forgets the memoized open so the next caller starts a fresh one.
    /// Handles already handed out stay valid.
    pub fn reset(&self) -> Result<()> {
        self.pending.lock()?.take();
        Ok(())
    }
}
