use super::UpgradeTransaction;
use crate::core::{Result, StoreError};
use std::collections::HashSet;
use std::sync::Arc;

/// The body of an upgrade step.
pub type UpgradeFn = Arc<dyn Fn(&mut UpgradeTransaction<'_>) -> Result<()> + Send + Sync>;

/// Upgrade step that brings the store to `version`.
#[derive(Clone)]
pub struct MigrationStep {
    pub version: u32,
    pub description: String,
    pub(crate) apply: UpgradeFn,
}

impl std::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish()
    }
}

impl MigrationStep {
    pub fn new<F>(version: u32, description: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&mut UpgradeTransaction<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            version,
            description: description.into(),
            apply: Arc::new(apply),
        }
    }
}

/// Every known upgrade step plus the version the store should be opened at.
///
/// Steps above the target are registered but not run; this lets one registry
/// open older layouts (handy for tests and staged rollouts).
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    target_version: u32,
    steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    pub fn new(target_version: u32) -> Self {
        Self {
            target_version,
            steps: Vec::new(),
        }
    }

    /// Builds a plan from a step list that is valid by construction.
    pub(crate) fn from_known_steps(target_version: u32, mut steps: Vec<MigrationStep>) -> Self {
        steps.sort_by_key(|s| s.version);
        let plan = Self {
            target_version,
            steps,
        };
        debug_assert!(plan.validate().is_ok());
        plan
    }

    pub fn target_version(&self) -> u32 {
        self.target_version
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Adds a step, validating the plan immediately.
    pub fn add_step(&mut self, step: MigrationStep) -> Result<()> {
        self.steps.push(step);
        self.steps.sort_by_key(|s| s.version);
        self.validate()
    }

    pub fn with_step(mut self, step: MigrationStep) -> Result<Self> {
        self.add_step(step)?;
        Ok(self)
    }

    /// Same registry, opened at a different version.
    pub fn with_target(mut self, target_version: u32) -> Self {
        self.target_version = target_version;
        self
    }

    /// Checks for:
    /// - a target version >= 1,
    /// - step versions >= 1,
    /// - duplicate step versions.
    pub fn validate(&self) -> Result<()> {
        if self.target_version == 0 {
            return Err(StoreError::Validation(
                "Schema version must be >= 1".to_string(),
            ));
        }

        let mut seen = HashSet::<u32>::new();
        for step in &self.steps {
            if step.version == 0 {
                return Err(StoreError::Validation(
                    "Migration step version must be >= 1".to_string(),
                ));
            }
            if !seen.insert(step.version) {
                return Err(StoreError::Validation(format!(
                    "Duplicate migration step for version {}",
                    step.version
                )));
            }
        }
        Ok(())
    }

    /// Steps in `(stored_version, target_version]`, strictly increasing.
    pub fn pending_steps(&self, stored_version: u32) -> Result<Vec<&MigrationStep>> {
        if stored_version > self.target_version {
            return Err(StoreError::Connection(format!(
                "Stored schema version {} is newer than requested version {}",
                stored_version, self.target_version
            )));
        }
        Ok(self
            .steps
            .iter()
            .filter(|s| s.version > stored_version && s.version <= self.target_version)
            .collect())
    }
}
