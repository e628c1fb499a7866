//! Errors raised by the moderation pipeline.

use mediagate_core::TaskError;
use mediagate_db::CoordinationError;
use mediagate_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Classification failed: {0:#}")]
    Oracle(anyhow::Error),

    #[error("Virus scan failed: {0}")]
    Scan(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),
}

impl ModerationError {
    /// Whether redelivering the triggering message could succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ModerationError::Config(_) | ModerationError::InvalidInput(_)
        )
    }
}

impl From<ModerationError> for TaskError {
    fn from(err: ModerationError) -> Self {
        if err.is_recoverable() {
            TaskError::recoverable(err)
        } else {
            TaskError::unrecoverable(err)
        }
    }
}
