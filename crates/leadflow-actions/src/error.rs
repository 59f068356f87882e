//! Action execution error types.

use thiserror::Error;

/// Errors that can occur while running an action handler.
#[derive(Debug, Error)]
pub enum ActionError {
    /// No handler registered for the requested `action_type`.
    #[error("Action not found: {0}")]
    NotFound(String),

    /// The handler ran and reported a failure.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The step config is unusable for this handler.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Execution timed out.
    #[error("Execution timed out after {0} seconds")]
    Timeout(u64),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
}

impl ActionError {
    /// Whether this error comes from the step definition rather than the
    /// outside world. Such errors are never worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ActionError::NotFound(_) | ActionError::Configuration(_))
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(e: serde_json::Error) -> Self {
        ActionError::Json(e.to_string())
    }
}

impl From<reqwest::Error> for ActionError {
    fn from(e: reqwest::Error) -> Self {
        ActionError::Http(e.to_string())
    }
}
