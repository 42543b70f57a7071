use log::warn;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The durable store could not be opened or upgraded.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A read failed; callers usually degrade this to absent/empty.
    #[error("Transient read error: {0}")]
    TransientRead(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// An annotation mutation could not be confirmed as committed.
    #[error("Write confirmation error: {0}")]
    WriteConfirmation(String),

    #[error("Position {position} out of bounds for {unit_count} content units")]
    Bounds { position: u64, unit_count: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl StoreError {
    /// Re-labels any failure as a transient read failure, keeping the message.
    pub fn into_transient_read(self) -> Self {
        match self {
            Self::TransientRead(_) => self,
            other => Self::TransientRead(other.to_string()),
        }
    }

    /// Re-labels a mutation failure so callers see that the write did not land.
    /// Validation and connection failures keep their own kind.
    pub fn into_write_confirmation(self) -> Self {
        match self {
            Self::Validation(_) | Self::Connection(_) | Self::WriteConfirmation(_) => self,
            other => Self::WriteConfirmation(other.to_string()),
        }
    }
}

/// Explicit opt-in to the "log and carry on" side of the error policy.
///
/// ```
/// use readmark::{Degrade, Result, StoreError};
///
/// let missing: Result<Option<u64>> = Err(StoreError::TransientRead("closed".into()));
/// assert_eq!(missing.degrade("reading position"), None);
/// ```
pub trait Degrade<T> {
    fn degrade(self, context: &str) -> T;
}

impl<T: Default> Degrade<T> for Result<T> {
    fn degrade(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                warn!("{} failed, continuing without it: {}", context, err);
                T::default()
            }
        }
    }
}
