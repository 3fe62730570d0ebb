//! Error types for controller operations

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControllerError>;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Server error (HTTP {status}): {message}")]
    Server {
        status: u16,
        message: String,
        traceback: Option<String>,
    },

    #[error("Task error{}: {message}", code.as_ref().map(|c| format!(" [{}]", c)).unwrap_or_default())]
    Task {
        code: Option<String>,
        message: String,
    },

    #[error("Job {jobpk} entered fatal state '{status}'")]
    FatalJobState { jobpk: String, status: String },

    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout { operation: String, after: Duration },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ControllerError {
    /// Build a task-domain error without an error code
    pub fn task(message: impl Into<String>) -> Self {
        ControllerError::Task {
            code: None,
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        ControllerError::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ControllerError::Timeout { .. })
    }

    pub fn is_task_error(&self) -> bool {
        matches!(self, ControllerError::Task { .. })
    }

    /// HTTP status carried by a server error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ControllerError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ControllerError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts are mapped by the session, which knows its configured limit
        if let Some(status) = err.status() {
            ControllerError::Server {
                status: status.as_u16(),
                message: err.to_string(),
                traceback: None,
            }
        } else {
            ControllerError::Transport(err.to_string())
        }
    }
}

impl From<zeromq::ZmqError> for ControllerError {
    fn from(err: zeromq::ZmqError) -> Self {
        ControllerError::Transport(err.to_string())
    }
}
