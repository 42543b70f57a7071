// ============================================================================
// readmark Library
// ============================================================================

//! Reading-position and annotation persistence for a document reader.
//!
//! Two storage tiers back a [`ReaderSession`]: a versioned, migrated durable
//! store reached through a shared [`Connector`], and a fast
//! [`PositionCache`] written on every position change.
//!
//! ```
//! use readmark::{AnnotationDraft, Connector, RecordStore, StoreConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> readmark::Result<()> {
//! let records = RecordStore::new(Connector::new(StoreConfig::in_memory()));
//!
//! records.put_reading_state("alice", 12).await?;
//! records.add_annotation(AnnotationDraft::bookmark("alice", 3)).await?;
//!
//! let state = records.get_reading_state("alice").await?.unwrap();
//! assert_eq!(state.position_index, 12);
//! assert_eq!(records.get_annotations_for_document("alice").await?.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod annotation;
pub mod cache;
pub mod connection;
pub mod core;
pub mod migration;
pub mod reader;
pub mod storage;
pub mod store;

// Re-export main types for convenience
pub use core::{
    Annotation, AnnotationDraft, AnnotationId, AnnotationKind, Degrade, DocumentId, Key,
    ReadingState, Result, StoreError,
};

pub use annotation::AnnotationList;
pub use cache::{CacheBackend, FileBackend, MemoryBackend, PositionCache};
pub use connection::{Connector, StoreConfig};
pub use migration::{MigrationPlan, MigrationStep, UpgradeTransaction, readit_plan};
pub use reader::{
    DirectorySource, Document, DocumentSource, DocumentSummary, HttpSource, ReaderSession,
};
pub use storage::{Database, DurabilityMode};
pub use store::RecordStore;
