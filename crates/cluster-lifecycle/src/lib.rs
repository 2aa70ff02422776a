//! Cluster installation lifecycle
//!
//! Drives assisted-installer clusters from registration through
//! installation to installed, error or cancelled. Status changes go through
//! a declarative transition table (`fsm`, `statemachine`); `ClusterManager`
//! runs the table against a `ClusterStore` and emits events and metrics.
//! `monitor` sweeps every live cluster periodically.
//!
//! # Example
//!
//! ```no_run
//! use cluster_lifecycle::{ClusterManager, LifecycleConfig, MemoryClusterStore, MemoryObjectStore};
//! use std::sync::Arc;
//!
//! # async fn example(id: uuid::Uuid) -> Result<(), cluster_lifecycle::LifecycleError> {
//! let manager = ClusterManager::new(
//!     LifecycleConfig::default(),
//!     Arc::new(MemoryClusterStore::new()),
//!     Arc::new(MemoryObjectStore::new()),
//! )?;
//! let cluster = manager.refresh_status(id).await?;
//! println!("cluster {} is {}", cluster.id, cluster.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod fsm;
pub mod leader;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod network;
pub mod objectstore;
pub mod progress;
pub mod statemachine;
pub mod store;
pub mod subscription;
pub mod validations;

#[cfg(test)]
mod test_utils;

pub use config::LifecycleConfig;
pub use error::{CollaboratorError, LifecycleError, StoreError};
pub use events::{ClusterEvent, EventSink, Events, LogEventSink, RecordingEventSink, Severity};
pub use fsm::{TransitionError, TransitionHooks, TransitionRule, TransitionTable};
pub use leader::{AlwaysLeader, LeaderGate};
pub use manager::ClusterManager;
pub use metrics::{MetricsApi, NoopMetrics, PrometheusMetrics};
pub use monitor::{MonitorScheduler, MonitorState};
pub use network::{InventoryNetworkCalculator, NetworkCalculator};
pub use objectstore::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use statemachine::{ClusterContext, ClusterMachine, TransitionType};
pub use store::{ClusterStore, ClusterUpdate, DependentRecord, MemoryClusterStore, RestClusterStore};
pub use subscription::SubscriptionActivator;
