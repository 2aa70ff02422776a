//! External subscription activation on successful installation

use crate::error::CollaboratorError;
use assisted_client::Cluster;

#[async_trait::async_trait]
pub trait SubscriptionActivator: Send + Sync {
    /// Activate the subscription recorded on the cluster
    async fn activate(&self, cluster: &Cluster) -> Result<(), CollaboratorError>;
}
