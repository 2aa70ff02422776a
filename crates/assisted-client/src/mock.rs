//! Mock InstallerClient for unit testing
//!
//! Keeps hosts and clusters in memory, records every call, and can be told to
//! fail specific operations so reconcilers can be driven through error paths.

use crate::error::InstallerError;
use crate::installer_args::InstallerArgs;
use crate::installer_trait::InstallerClientTrait;
use crate::models::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Operations the mock can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    GetHost,
    GetCluster,
    UpdateHost,
    UpdateApproved,
    UpdateIgnition,
    UpdateInstallerArgs,
    BindHost,
    UnbindHost,
    UpdateProgress,
    DeregisterHost,
}

/// A recorded call with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    GetHost(KubeKey),
    GetCluster(KubeKey),
    UpdateHost {
        host_id: Uuid,
        infra_env_id: Uuid,
        params: HostUpdateParams,
    },
    UpdateApproved {
        host_id: Uuid,
        cluster_id: Option<Uuid>,
        approved: bool,
    },
    UpdateIgnition {
        host_id: Uuid,
        overrides: String,
    },
    UpdateInstallerArgs {
        host_id: Uuid,
        args: InstallerArgs,
    },
    BindHost {
        host_id: Uuid,
        cluster_id: Uuid,
    },
    UnbindHost {
        host_id: Uuid,
        reason: String,
    },
    UpdateProgress {
        host_id: Uuid,
        stage: HostStage,
    },
    DeregisterHost {
        host_id: Uuid,
    },
}

impl MockCall {
    pub fn op(&self) -> MockOp {
        match self {
            MockCall::GetHost(_) => MockOp::GetHost,
            MockCall::GetCluster(_) => MockOp::GetCluster,
            MockCall::UpdateHost { .. } => MockOp::UpdateHost,
            MockCall::UpdateApproved { .. } => MockOp::UpdateApproved,
            MockCall::UpdateIgnition { .. } => MockOp::UpdateIgnition,
            MockCall::UpdateInstallerArgs { .. } => MockOp::UpdateInstallerArgs,
            MockCall::BindHost { .. } => MockOp::BindHost,
            MockCall::UnbindHost { .. } => MockOp::UnbindHost,
            MockCall::UpdateProgress { .. } => MockOp::UpdateProgress,
            MockCall::DeregisterHost { .. } => MockOp::DeregisterHost,
        }
    }

    /// True for calls that change backend state
    pub fn is_write(&self) -> bool {
        !matches!(self, MockCall::GetHost(_) | MockCall::GetCluster(_))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock InstallerClient for testing
#[derive(Clone, Debug)]
pub struct MockInstallerClient {
    base_url: String,
    hosts: Arc<Mutex<HashMap<KubeKey, Host>>>,
    clusters: Arc<Mutex<HashMap<KubeKey, Cluster>>>,
    failures: Arc<Mutex<HashMap<MockOp, String>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockInstallerClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            hosts: Arc::new(Mutex::new(HashMap::new())),
            clusters: Arc::new(Mutex::new(HashMap::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add or replace a host (for test setup)
    pub fn add_host(&self, key: KubeKey, host: Host) {
        lock(&self.hosts).insert(key, host);
    }

    /// Add or replace a cluster (for test setup)
    pub fn add_cluster(&self, key: KubeKey, cluster: Cluster) {
        lock(&self.clusters).insert(key, cluster);
    }

    pub fn remove_cluster(&self, key: &KubeKey) {
        lock(&self.clusters).remove(key);
    }

    /// Current state of a host
    pub fn host(&self, key: &KubeKey) -> Option<Host> {
        lock(&self.hosts).get(key).cloned()
    }

    /// Mutate a stored host in place
    pub fn modify_host(&self, key: &KubeKey, f: impl FnOnce(&mut Host)) {
        if let Some(host) = lock(&self.hosts).get_mut(key) {
            f(host);
        }
    }

    /// Make every call of `op` fail with an API error until cleared
    pub fn fail(&self, op: MockOp, message: impl Into<String>) {
        lock(&self.failures).insert(op, message.into());
    }

    pub fn clear_failure(&self, op: MockOp) {
        lock(&self.failures).remove(&op);
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls of one operation
    pub fn count(&self, op: MockOp) -> usize {
        lock(&self.calls).iter().filter(|c| c.op() == op).count()
    }

    /// Number of state-changing calls
    pub fn write_count(&self) -> usize {
        lock(&self.calls).iter().filter(|c| c.is_write()).count()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: MockCall) -> Result<(), InstallerError> {
        let op = call.op();
        lock(&self.calls).push(call);
        match lock(&self.failures).get(&op) {
            Some(message) => Err(InstallerError::Api(message.clone())),
            None => Ok(()),
        }
    }

    fn with_host<T>(&self, host_id: Uuid, f: impl FnOnce(&mut Host) -> T) -> Result<T, InstallerError> {
        let mut hosts = lock(&self.hosts);
        hosts
            .values_mut()
            .find(|h| h.id == host_id)
            .map(f)
            .ok_or_else(|| InstallerError::NotFound(format!("host {}", host_id)))
    }
}

#[async_trait::async_trait]
impl InstallerClientTrait for MockInstallerClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_host_by_kube_key(&self, key: &KubeKey) -> Result<Host, InstallerError> {
        self.record(MockCall::GetHost(key.clone()))?;
        lock(&self.hosts)
            .get(key)
            .cloned()
            .ok_or_else(|| InstallerError::NotFound(format!("host {}", key)))
    }

    async fn get_cluster_by_kube_key(&self, key: &KubeKey) -> Result<Cluster, InstallerError> {
        self.record(MockCall::GetCluster(key.clone()))?;
        lock(&self.clusters)
            .get(key)
            .cloned()
            .ok_or_else(|| InstallerError::NotFound(format!("cluster {}", key)))
    }

    async fn update_host(
        &self,
        host_id: Uuid,
        infra_env_id: Uuid,
        params: &HostUpdateParams,
    ) -> Result<Host, InstallerError> {
        self.record(MockCall::UpdateHost {
            host_id,
            infra_env_id,
            params: params.clone(),
        })?;
        self.with_host(host_id, |host| {
            if let Some(name) = &params.host_name {
                host.requested_hostname.clone_from(name);
            }
            if let Some(role) = params.host_role {
                host.role = role;
            }
            if let Some(disk) = params.disks_selected_config.iter().find(|d| d.role == DiskRole::Install) {
                host.installation_disk_id.clone_from(&disk.id);
            }
            if let Some(token) = &params.ignition_endpoint_token {
                host.ignition_endpoint_token.clone_from(token);
            }
            host.clone()
        })
    }

    async fn update_host_approved(
        &self,
        host_id: Uuid,
        _infra_env_id: Uuid,
        cluster_id: Option<Uuid>,
        approved: bool,
    ) -> Result<(), InstallerError> {
        self.record(MockCall::UpdateApproved {
            host_id,
            cluster_id,
            approved,
        })?;
        self.with_host(host_id, |host| host.approved = approved)
    }

    async fn update_host_ignition(
        &self,
        host_id: Uuid,
        _infra_env_id: Uuid,
        overrides: &str,
    ) -> Result<Host, InstallerError> {
        self.record(MockCall::UpdateIgnition {
            host_id,
            overrides: overrides.to_string(),
        })?;
        self.with_host(host_id, |host| {
            host.ignition_config_overrides = overrides.to_string();
            host.clone()
        })
    }

    async fn update_host_installer_args(
        &self,
        host_id: Uuid,
        _infra_env_id: Uuid,
        args: &InstallerArgs,
    ) -> Result<Host, InstallerError> {
        self.record(MockCall::UpdateInstallerArgs {
            host_id,
            args: args.clone(),
        })?;
        self.with_host(host_id, |host| {
            host.installer_args = args.clone();
            host.clone()
        })
    }

    async fn bind_host(&self, host_id: Uuid, _infra_env_id: Uuid, cluster_id: Uuid) -> Result<Host, InstallerError> {
        self.record(MockCall::BindHost { host_id, cluster_id })?;
        self.with_host(host_id, |host| {
            host.cluster_id = Some(cluster_id);
            host.status = HostStatus::Binding;
            host.clone()
        })
    }

    async fn unbind_host(&self, host_id: Uuid, _infra_env_id: Uuid, reason: &str) -> Result<Host, InstallerError> {
        self.record(MockCall::UnbindHost {
            host_id,
            reason: reason.to_string(),
        })?;
        self.with_host(host_id, |host| {
            host.cluster_id = None;
            host.status = HostStatus::Unbinding;
            host.clone()
        })
    }

    async fn update_host_install_progress(
        &self,
        host_id: Uuid,
        _infra_env_id: Uuid,
        stage: HostStage,
        info: &str,
    ) -> Result<(), InstallerError> {
        self.record(MockCall::UpdateProgress { host_id, stage })?;
        self.with_host(host_id, |host| {
            let progress = host.progress.get_or_insert_with(HostProgress::default);
            progress.current_stage = Some(stage);
            progress.progress_info = info.to_string();
        })
    }

    async fn deregister_host(&self, host_id: Uuid, _infra_env_id: Uuid) -> Result<(), InstallerError> {
        self.record(MockCall::DeregisterHost { host_id })?;
        let mut hosts = lock(&self.hosts);
        let before = hosts.len();
        hosts.retain(|_, h| h.id != host_id);
        if hosts.len() == before {
            return Err(InstallerError::NotFound(format!("host {}", host_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> KubeKey {
        KubeKey::new("default", "agent-1")
    }

    #[tokio::test]
    async fn test_mock_records_and_applies_updates() {
        let mock = MockInstallerClient::new("http://assisted");
        let host = Host::new(Uuid::new_v4(), Uuid::new_v4(), HostStatus::Known);
        mock.add_host(key(), host.clone());

        let params = HostUpdateParams {
            host_name: Some("node-1".to_string()),
            ..Default::default()
        };
        let updated = mock.update_host(host.id, host.infra_env_id, &params).await.unwrap();
        assert_eq!(updated.requested_hostname, "node-1");
        assert_eq!(mock.count(MockOp::UpdateHost), 1);
        assert_eq!(mock.write_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let mock = MockInstallerClient::new("http://assisted");
        let host = Host::new(Uuid::new_v4(), Uuid::new_v4(), HostStatus::Known);
        mock.add_host(key(), host.clone());
        mock.fail(MockOp::UpdateApproved, "boom");

        let result = mock.update_host_approved(host.id, host.infra_env_id, None, true).await;
        assert!(matches!(result, Err(InstallerError::Api(ref m)) if m == "boom"));
        assert_eq!(mock.count(MockOp::UpdateApproved), 1);
        assert_eq!(mock.host(&key()).map(|h| h.approved), Some(false));
    }

    #[tokio::test]
    async fn test_mock_missing_host_is_not_found() {
        let mock = MockInstallerClient::new("http://assisted");
        let err = mock.get_host_by_kube_key(&key()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
