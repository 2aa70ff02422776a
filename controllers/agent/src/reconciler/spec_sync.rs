//! Pushing the Agent spec to the backend host.
//!
//! Each concern is diffed separately and only written when it differs, so a
//! pass over an unchanged Agent makes no backend writes.

use super::csr::{self, NodeProgress};
use super::Reconciler;
use crate::error::ControllerError;
use assisted_client::{
    Cluster, DiskConfigParams, DiskRole, Host, HostRole, HostStage, HostUpdateParams, IgnitionOverrides,
    InstallerArgs, InstallerError,
};
use crds::{Agent, AgentRole};
use tracing::{debug, info, warn};

/// Secret key holding the ignition endpoint token
pub const IGNITION_TOKEN_KEY: &str = "ignition-token";
/// Secret key holding the admin kubeconfig of an installed cluster
pub const KUBECONFIG_KEY: &str = "kubeconfig";

const UNBIND_REASON: &str = "cluster deployment reference changed";

/// Why the host fields could not be applied
#[derive(Debug)]
pub(super) enum FieldSyncError {
    /// The Agent spec does not parse; retried when the spec changes
    Input(String),
    Backend(InstallerError),
}

impl From<InstallerError> for FieldSyncError {
    fn from(e: InstallerError) -> Self {
        FieldSyncError::Backend(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BindingChange {
    None,
    Bound,
    Unbound,
    /// Unbinding failed; logged and retried later
    UnbindFailed,
}

fn host_role(role: AgentRole) -> HostRole {
    match role {
        AgentRole::AutoAssign => HostRole::AutoAssign,
        AgentRole::Master => HostRole::Master,
        AgentRole::Worker => HostRole::Worker,
        AgentRole::Bootstrap => HostRole::Bootstrap,
    }
}

impl Reconciler {
    /// Move the host to the cluster the spec points at.
    ///
    /// A host bound elsewhere is only unbound in this pass; binding to the new
    /// cluster happens on the next one.
    pub(super) async fn sync_binding(
        &self,
        key: &str,
        host: &mut Host,
        target: Option<&Cluster>,
    ) -> Result<BindingChange, InstallerError> {
        let desired = target.map(|c| c.id);
        if host.cluster_id == desired {
            return Ok(BindingChange::None);
        }

        if let Some(current) = host.cluster_id {
            return match self.installer.unbind_host(host.id, host.infra_env_id, UNBIND_REASON).await {
                Ok(updated) => {
                    info!("Unbound host {} of Agent {} from cluster {}", host.id, key, current);
                    *host = updated;
                    Ok(BindingChange::Unbound)
                }
                Err(e) => {
                    warn!("Failed to unbind host {} of Agent {}: {}", host.id, key, e);
                    Ok(BindingChange::UnbindFailed)
                }
            };
        }

        let Some(cluster_id) = desired else {
            return Ok(BindingChange::None);
        };
        let updated = self.installer.bind_host(host.id, host.infra_env_id, cluster_id).await?;
        info!("Bound host {} of Agent {} to cluster {}", host.id, key, cluster_id);
        *host = updated;
        Ok(BindingChange::Bound)
    }

    /// Hostname, role, disk, token, ignition overrides and installer args.
    /// Skipped once the host is past the point where these can change, so
    /// later edits of a locked host are neither parsed nor reported.
    pub(super) async fn sync_host_fields(&self, agent: &Agent, host: &mut Host) -> Result<(), FieldSyncError> {
        if host.status.is_locked() {
            debug!("Host {} is {}, not syncing spec fields", host.id, host.status);
            return Ok(());
        }
        let spec = &agent.spec;

        let installer_args = InstallerArgs::parse(&spec.installer_args).map_err(|e| {
            FieldSyncError::Input(format!(
                "failed to parse installer args {:?}: {}",
                spec.installer_args, e
            ))
        })?;
        let ignition_overrides = IgnitionOverrides::parse(&spec.ignition_config_overrides)
            .map_err(|e| FieldSyncError::Input(format!("failed to parse ignition config overrides: {}", e)))?;

        let mut params = HostUpdateParams::default();
        if !spec.hostname.is_empty() && spec.hostname != host.hostname() {
            params.host_name = Some(spec.hostname.clone());
        }
        if let Some(role) = spec.role.map(host_role) {
            if role != host.role {
                params.host_role = Some(role);
            }
        }
        if !spec.installation_disk_id.is_empty() && spec.installation_disk_id != host.installation_disk_id {
            params.disks_selected_config = vec![DiskConfigParams {
                id: spec.installation_disk_id.clone(),
                role: DiskRole::Install,
            }];
        }
        if let Some(token) = self.resolve_ignition_token(agent).await {
            if token != host.ignition_endpoint_token {
                params.ignition_endpoint_token = Some(token);
            }
        }
        if !params.is_empty() {
            *host = self.installer.update_host(host.id, host.infra_env_id, &params).await?;
            info!("Updated host {}: {:?}", host.id, params);
        }

        let overrides_differ = match &ignition_overrides {
            Some(overrides) => !overrides.matches(&host.ignition_config_overrides),
            None => !host.ignition_config_overrides.is_empty(),
        };
        if overrides_differ {
            let raw = ignition_overrides.map(|o| o.to_json_string()).unwrap_or_default();
            *host = self
                .installer
                .update_host_ignition(host.id, host.infra_env_id, &raw)
                .await?;
            info!("Updated ignition config overrides of host {}", host.id);
        }

        let desired_args = installer_args.unwrap_or_default();
        if !desired_args.equivalent(&host.installer_args) {
            *host = self
                .installer
                .update_host_installer_args(host.id, host.infra_env_id, &desired_args)
                .await?;
            info!("Updated installer args of host {}", host.id);
        }
        Ok(())
    }

    pub(super) async fn sync_approval(&self, agent: &Agent, host: &mut Host) -> Result<(), InstallerError> {
        if agent.spec.approved == host.approved {
            return Ok(());
        }
        self.installer
            .update_host_approved(host.id, host.infra_env_id, host.cluster_id, agent.spec.approved)
            .await?;
        host.approved = agent.spec.approved;
        info!("Set approval of host {} to {}", host.id, host.approved);
        Ok(())
    }

    /// Token from the referenced Secret; a missing Secret or key is only logged
    async fn resolve_ignition_token(&self, agent: &Agent) -> Option<String> {
        let reference = agent.spec.ignition_endpoint_token_reference.as_ref()?;
        let namespace = reference
            .namespace
            .clone()
            .or_else(|| agent.metadata.namespace.clone())
            .unwrap_or_default();
        let secret = match self.kube.get_secret(&namespace, &reference.name).await {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                warn!("Ignition token secret {}/{} not found", namespace, reference.name);
                return None;
            }
            Err(e) => {
                warn!("Failed to read ignition token secret {}/{}: {}", namespace, reference.name, e);
                return None;
            }
        };
        let token = secret
            .data
            .as_ref()
            .and_then(|d| d.get(IGNITION_TOKEN_KEY))
            .and_then(|v| String::from_utf8(v.0.clone()).ok());
        if token.is_none() {
            warn!(
                "Secret {}/{} has no {} key",
                namespace, reference.name, IGNITION_TOKEN_KEY
            );
        }
        token
    }

    /// One round of CSR approval for a day-2 host; true once its Node is Ready
    /// and the host stage has been moved to Done
    pub(super) async fn bootstrap_day2_host(&self, agent: &Agent, host: &mut Host) -> Result<bool, ControllerError> {
        let reference = agent
            .spec
            .cluster_deployment_name
            .as_ref()
            .ok_or_else(|| ControllerError::Spoke("Agent has no cluster deployment reference".to_string()))?;
        let cluster_deployment = self
            .kube
            .get_cluster_deployment(&reference.namespace, &reference.name)
            .await?
            .ok_or_else(|| ControllerError::Spoke(format!("cluster deployment {} not found", reference)))?;
        let secret_name = cluster_deployment
            .spec
            .cluster_metadata
            .as_ref()
            .map(|m| m.admin_kubeconfig_secret_ref.name.clone())
            .ok_or_else(|| ControllerError::Spoke(format!("cluster deployment {} has no metadata", reference)))?;
        let secret = self
            .kube
            .get_secret(&reference.namespace, &secret_name)
            .await?
            .ok_or_else(|| ControllerError::Spoke(format!("secret {}/{} not found", reference.namespace, secret_name)))?;
        let kubeconfig = secret
            .data
            .as_ref()
            .and_then(|d| d.get(KUBECONFIG_KEY))
            .and_then(|v| String::from_utf8(v.0.clone()).ok())
            .ok_or_else(|| {
                ControllerError::Spoke(format!(
                    "secret {}/{} has no {} key",
                    reference.namespace, secret_name, KUBECONFIG_KEY
                ))
            })?;

        let client = self
            .spoke_factory
            .create(&kubeconfig)
            .await
            .map_err(|e| ControllerError::Spoke(e.to_string()))?;
        let hostname = host.hostname().to_string();
        let progress = csr::bootstrap_node(client.as_ref(), &hostname)
            .await
            .map_err(|e| ControllerError::Spoke(e.to_string()))?;
        if progress == NodeProgress::Joining {
            return Ok(false);
        }

        self.installer
            .update_host_install_progress(host.id, host.infra_env_id, HostStage::Done, "")
            .await?;
        let host_progress = host.progress.get_or_insert_with(Default::default);
        host_progress.current_stage = Some(HostStage::Done);
        Ok(true)
    }
}
