use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Action '{action}' does not define a handler for '{method}'")]
    MissingActionHandler { action: String, method: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    #[error("Job '{job}' has been attempted too many times ({attempts})")]
    MaxAttemptsExceeded { job: String, attempts: u32 },

    #[error("Batch '{0}' was cancelled")]
    BatchCancelled(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ActionError {
    pub fn missing_handler(action: impl Into<String>, method: impl Into<String>) -> Self {
        Self::MissingActionHandler {
            action: action.into(),
            method: method.into(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Configuration and input errors never succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::MissingActionHandler { .. }
                | Self::Validation(_)
                | Self::BatchCancelled(_)
                | Self::MaxAttemptsExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ActionError>;

impl<T> From<std::sync::PoisonError<T>> for ActionError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_not_retryable() {
        assert!(!ActionError::missing_handler("Archive", "handle").is_retryable());
        assert!(!ActionError::Validation("bad".into()).is_retryable());
        assert!(ActionError::handler("boom").is_retryable());
        assert!(ActionError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn anyhow_errors_convert() {
        let err: ActionError = anyhow::anyhow!("remote api down").into();
        assert_eq!(err.to_string(), "remote api down");
    }
}
