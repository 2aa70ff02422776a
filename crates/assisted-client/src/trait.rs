//! InstallerClient trait for mocking
//!
//! Abstracts the backend so reconcilers can be unit tested against
//! `MockInstallerClient` instead of a running service.

use crate::error::InstallerError;
use crate::installer_args::InstallerArgs;
use crate::models::*;
use uuid::Uuid;

/// Backend operations used by the agent controller.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait InstallerClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Host mirrored by the given Agent key
    async fn get_host_by_kube_key(&self, key: &KubeKey) -> Result<Host, InstallerError>;

    /// Cluster mirrored by the given ClusterDeployment key
    async fn get_cluster_by_kube_key(&self, key: &KubeKey) -> Result<Cluster, InstallerError>;

    async fn update_host(
        &self,
        host_id: Uuid,
        infra_env_id: Uuid,
        params: &HostUpdateParams,
    ) -> Result<Host, InstallerError>;

    async fn update_host_approved(
        &self,
        host_id: Uuid,
        infra_env_id: Uuid,
        cluster_id: Option<Uuid>,
        approved: bool,
    ) -> Result<(), InstallerError>;

    async fn update_host_ignition(
        &self,
        host_id: Uuid,
        infra_env_id: Uuid,
        overrides: &str,
    ) -> Result<Host, InstallerError>;

    async fn update_host_installer_args(
        &self,
        host_id: Uuid,
        infra_env_id: Uuid,
        args: &InstallerArgs,
    ) -> Result<Host, InstallerError>;

    async fn bind_host(&self, host_id: Uuid, infra_env_id: Uuid, cluster_id: Uuid) -> Result<Host, InstallerError>;

    async fn unbind_host(&self, host_id: Uuid, infra_env_id: Uuid, reason: &str) -> Result<Host, InstallerError>;

    async fn update_host_install_progress(
        &self,
        host_id: Uuid,
        infra_env_id: Uuid,
        stage: HostStage,
        info: &str,
    ) -> Result<(), InstallerError>;

    async fn deregister_host(&self, host_id: Uuid, infra_env_id: Uuid) -> Result<(), InstallerError>;
}
