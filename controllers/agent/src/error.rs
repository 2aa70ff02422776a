//! Controller-specific error types.
//!
//! Reconcile functions report recoverable backend failures through
//! `ReconcileOutcome` and the SpecSynced condition; these errors are what is
//! left: startup failures, watch failures and invariant violations.

use assisted_client::InstallerError;
use cluster_lifecycle::LifecycleError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Agent Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Installer backend error
    #[error("Installer backend error: {0}")]
    Installer(#[from] InstallerError),

    /// Cluster lifecycle manager error
    #[error("Cluster lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Spoke cluster access failed
    #[error("Spoke cluster error: {0}")]
    Spoke(String),
}
