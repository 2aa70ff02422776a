//! Backend client errors

use thiserror::Error;

/// Errors that can occur when talking to the installer backend
#[derive(Debug, Error)]
pub enum InstallerError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend returned an unexpected error
    #[error("backend API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Request rejected as invalid
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request conflicts with the current resource state
    #[error("conflict: {0}")]
    Conflict(String),
}

impl InstallerError {
    /// True when the backend reported the resource missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, InstallerError::NotFound(_))
    }
}
