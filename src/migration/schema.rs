use super::plan::{MigrationPlan, MigrationStep};
use crate::storage::{CollectionSchema, IndexSchema};

pub const READING_STATES: &str = "readingStates";
pub const ANNOTATIONS: &str = "annotations";
pub const BY_DOCUMENT_INDEX: &str = "documentId";
pub const BY_LAST_UPDATED_INDEX: &str = "lastUpdated";

pub const LATEST_SCHEMA_VERSION: u32 = 3;

/// Layout history of the reader store:
///
/// 1. `readingStates`, keyed by `documentId`
/// 2. `annotations`, auto-increment `id`, indexed by `documentId`
/// 3. `lastUpdated` index on `readingStates`
pub fn readit_plan() -> MigrationPlan {
    let steps = [
        MigrationStep::new(1, "create readingStates", |tx| {
            tx.ensure_collection(CollectionSchema::keyed(READING_STATES, "documentId"))?;
            Ok(())
        }),
        MigrationStep::new(2, "create annotations with documentId index", |tx| {
            tx.ensure_collection(CollectionSchema::auto_increment(ANNOTATIONS, "id"))?;
            tx.ensure_index(ANNOTATIONS, IndexSchema::on(BY_DOCUMENT_INDEX))?;
            Ok(())
        }),
        MigrationStep::new(3, "index readingStates by lastUpdated", |tx| {
            tx.ensure_index(READING_STATES, IndexSchema::on(BY_LAST_UPDATED_INDEX))?;
            Ok(())
        }),
    ];

    MigrationPlan::from_known_steps(LATEST_SCHEMA_VERSION, steps.into())
}
