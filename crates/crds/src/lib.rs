//! Agent CRD Definitions
//!
//! Kubernetes Custom Resource Definitions consumed and produced by the agent controller:
//! - `Agent`: declarative mirror of a discovered host
//! - `ClusterDeployment`: the target cluster an agent is bound to
//! - `Condition`: status conditions shared by the resources above

pub mod agent;
pub mod cluster_deployment;
pub mod condition;
pub mod references;

pub use agent::*;
pub use cluster_deployment::*;
pub use condition::*;
pub use references::*;
