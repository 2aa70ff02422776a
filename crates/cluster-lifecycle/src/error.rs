//! Lifecycle manager errors

use crate::fsm::TransitionError;
use thiserror::Error;

/// Errors raised by a `ClusterStore` implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record does not exist
    #[error("record not found: {0}")]
    NotFound(String),

    /// Conditional update lost a race with another writer
    #[error("conflicting update: {0}")]
    Conflict(String),

    /// Storage backend failure
    #[error("store error: {0}")]
    Backend(String),
}

/// Errors returned by `ClusterManager` operations.
///
/// Each variant maps to one class of the error taxonomy: conflicts may be
/// retried by the caller, bad requests may not.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No transition matched or a concurrent writer moved the record
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation not valid for the current cluster state
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Cluster does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Store, object storage or subscription failure
    #[error("internal error: {0}")]
    Internal(String),

    /// Stored payload failed to (de)serialize
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LifecycleError {
    /// HTTP status class of the error
    pub fn http_status(&self) -> u16 {
        match self {
            LifecycleError::Conflict(_) => 409,
            LifecycleError::BadRequest(_) => 400,
            LifecycleError::NotFound(_) => 404,
            LifecycleError::Internal(_) | LifecycleError::Serialization(_) => 500,
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(m) => LifecycleError::NotFound(m),
            StoreError::Conflict(m) => LifecycleError::Conflict(m),
            StoreError::Backend(m) => LifecycleError::Internal(m),
        }
    }
}

impl From<TransitionError> for LifecycleError {
    fn from(err: TransitionError) -> Self {
        LifecycleError::Conflict(err.to_string())
    }
}

/// Failure reported by an injected collaborator (event sink, metrics,
/// object storage, subscription activation)
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<CollaboratorError> for LifecycleError {
    fn from(err: CollaboratorError) -> Self {
        LifecycleError::Internal(err.0)
    }
}
