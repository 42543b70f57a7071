//! Versioned schema upgrades for the durable store.
//!
//! A store records a single schema version. Opening it at a higher version
//! runs every registered step in between, in order, against a staged copy of
//! the store; the copy replaces the original only if every step succeeded.
//! Steps may only add collections and indexes, and must tolerate finding
//! them already in place.

pub mod plan;
pub mod schema;

pub use plan::{MigrationPlan, MigrationStep, UpgradeFn};
pub use schema::{
    ANNOTATIONS, BY_DOCUMENT_INDEX, BY_LAST_UPDATED_INDEX, LATEST_SCHEMA_VERSION, READING_STATES,
    readit_plan,
};

use crate::core::{Result, StoreError};
use crate::storage::{Collection, CollectionSchema, DatabaseState, IndexSchema};
use tracing::{Level, event};

/// Schema-changing view of the store handed to upgrade steps.
pub struct UpgradeTransaction<'a> {
    state: &'a mut DatabaseState,
    old_version: u32,
    new_version: u32,
}

impl<'a> UpgradeTransaction<'a> {
    fn new(state: &'a mut DatabaseState, old_version: u32, new_version: u32) -> Self {
        Self {
            state,
            old_version,
            new_version,
        }
    }

    /// Version the store had before this open.
    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    pub fn contains_collection(&self, name: &str) -> bool {
        self.state.collections.contains_key(name)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.state.collections.keys().cloned().collect()
    }

    pub fn collection(&self, name: &str) -> Result<&Collection> {
        self.state
            .collections
            .get(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }

    /// Creates a collection; it is an error if one with that name exists.
    pub fn create_collection(&mut self, schema: CollectionSchema) -> Result<()> {
        let name = schema.name().to_string();
        if self.state.collections.contains_key(&name) {
            return Err(StoreError::ConstraintViolation(format!(
                "Collection '{}' already exists",
                name
            )));
        }
        self.state.collections.insert(name, Collection::new(schema));
        Ok(())
    }

    /// Creates the collection unless it already exists. Returns whether it
    /// was created.
    pub fn ensure_collection(&mut self, schema: CollectionSchema) -> Result<bool> {
        if self.contains_collection(schema.name()) {
            return Ok(false);
        }
        self.create_collection(schema)?;
        Ok(true)
    }

    /// Creates the index unless an identical one exists. Returns whether it
    /// was created.
    pub fn ensure_index(&mut self, collection: &str, index: IndexSchema) -> Result<bool> {
        self.state
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?
            .create_index(index)
    }
}

/// Brings `state` up to the plan's target version. Returns the versions of
/// the steps that ran. On error `state` is left exactly as it was.
pub fn upgrade(plan: &MigrationPlan, state: &mut DatabaseState) -> Result<Vec<u32>> {
    let stored_version = state.version;
    let steps = plan.pending_steps(stored_version)?;
    let target_version = plan.target_version();

    if steps.is_empty() {
        if stored_version < target_version {
            state.version = target_version;
        }
        return Ok(Vec::new());
    }

    let mut staged = state.clone();
    let mut applied = Vec::with_capacity(steps.len());
    {
        let mut tx = UpgradeTransaction::new(&mut staged, stored_version, target_version);
        for step in steps {
            event!(
                Level::INFO,
                version = step.version,
                description = %step.description,
                "applying upgrade step"
            );
            (step.apply)(&mut tx).map_err(|err| {
                StoreError::Connection(format!(
                    "Upgrade step {} ({}) failed: {}",
                    step.version, step.description, err
                ))
            })?;
            applied.push(step.version);
        }
    }
    staged.version = target_version;
    *state = staged;
    Ok(applied)
}
