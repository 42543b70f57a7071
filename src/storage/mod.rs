pub mod collection;
pub mod engine;
pub mod persistence;

pub use collection::{Collection, CollectionSchema, IndexSchema, Record};
pub use engine::{Database, DatabaseState, ReadTransaction, WriteTransaction};
pub use persistence::{DurabilityMode, PersistenceManager, WalEntry, WalOp};
