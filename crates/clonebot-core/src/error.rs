//! Error types for clonebot core operations.

use thiserror::Error;

/// Errors that can occur while provisioning or running user instances.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required setting is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An external command exited with a non-zero status.
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// A required binary is not on PATH.
    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    /// The content sent as creds.json is not valid JSON.
    #[error("creds.json is not valid JSON: {0}")]
    InvalidCreds(String),

    /// A launched instance died during its start-up grace period.
    #[error("Instance exited with status {code:?}:\n{log_tail}")]
    InstanceExited { code: Option<i32>, log_tail: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
