//! Assisted installer backend client
//!
//! Typed model of the backend cluster and host records plus a REST client for
//! the host operations the agent controller performs.
//!
//! # Example
//!
//! ```no_run
//! use assisted_client::{InstallerClient, InstallerClientTrait, KubeKey};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = InstallerClient::new("http://assisted-service:8090".to_string(), None)?;
//! let host = client.get_host_by_kube_key(&KubeKey::new("default", "agent-1")).await?;
//! println!("host {} is {}", host.id, host.status);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod installer_args;
pub mod inventory;
mod json_text;
pub mod models;
#[path = "trait.rs"]
pub mod installer_trait;
pub mod validations;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::InstallerClient;
pub use error::InstallerError;
pub use installer_args::{IgnitionOverrides, InstallerArgs};
pub use installer_trait::InstallerClientTrait;
pub use inventory::*;
pub use models::*;
pub use validations::{ValidationResult, ValidationStatus, ValidationsStatus};
#[cfg(feature = "test-util")]
pub use mock::{MockCall, MockInstallerClient, MockOp};
