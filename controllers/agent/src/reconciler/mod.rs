//! Reconciliation of `Agent` resources against backend hosts.
//!
//! One pass loads the Agent, makes sure the finalizer is in place, resolves
//! the target cluster and the backend host, pushes spec changes to the
//! backend, drives the CSR bootstrap of day-2 hosts and finally projects the
//! host back onto the Agent status, labels and annotations.
//!
//! - `spec_sync`: binding, host fields, approval
//! - `csr` / `spoke`: node certificate approval on the joined cluster
//! - `conditions` / `status` / `labels`: status projection

pub mod conditions;
pub mod csr;
pub mod labels;
mod spec_sync;
pub mod spoke;
pub mod status;

#[cfg(test)]
mod agent_test;

use crate::backoff::BackoffTracker;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::kube_api::AgentKubeApi;
use assisted_client::{Host, HostStage, HostStatus, InstallerClientTrait, KubeKey};
use chrono::Utc;
use conditions::SyncResult;
use crds::{Agent, AgentStatus, AGENT_FINALIZER};
use spoke::SpokeClientFactory;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound of the backend error backoff
const MAX_BACKOFF: Duration = Duration::from_secs(600);

/// What the controller should do with an Agent after a reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Settled; only the periodic resync applies
    Done,
    RequeueNow,
    RequeueAfter(Duration),
}

/// Tunables of the reconcile loop
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Public base for events and logs URLs, without a trailing slash
    pub service_base_url: String,
    pub label_prefix: String,
    pub reconcile_requeue: Duration,
    pub csr_requeue: Duration,
    pub resync_interval: Duration,
}

impl ReconcilerSettings {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            service_base_url: config.service_base_url.clone(),
            label_prefix: config.label_prefix.clone(),
            reconcile_requeue: config.reconcile_requeue,
            csr_requeue: config.csr_requeue,
            resync_interval: config.resync_interval,
        }
    }
}

/// Reconciles Agents.
pub struct Reconciler {
    pub(crate) installer: Box<dyn InstallerClientTrait>,
    pub(crate) kube: Arc<dyn AgentKubeApi>,
    pub(crate) spoke_factory: Arc<dyn SpokeClientFactory>,
    pub(crate) settings: ReconcilerSettings,
    /// Backend error retry delays per Agent (namespace/name)
    backoff: BackoffTracker,
}

impl Reconciler {
    pub fn new(
        installer: Box<dyn InstallerClientTrait>,
        kube: Arc<dyn AgentKubeApi>,
        spoke_factory: Arc<dyn SpokeClientFactory>,
        settings: ReconcilerSettings,
    ) -> Self {
        let backoff = BackoffTracker::new(settings.reconcile_requeue, MAX_BACKOFF.max(settings.reconcile_requeue));
        Self {
            installer,
            kube,
            spoke_factory,
            settings,
            backoff,
        }
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    /// Run one reconcile pass for the Agent `namespace/name`
    pub async fn reconcile_agent(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome, ControllerError> {
        let key = format!("{}/{}", namespace, name);
        let Some(agent) = self.kube.get_agent(namespace, name).await? else {
            debug!("Agent {} no longer exists", key);
            self.backoff.forget(&key);
            return Ok(ReconcileOutcome::Done);
        };

        if agent.metadata.deletion_timestamp.is_some() {
            return self.finalize_agent(&agent, namespace, name, &key).await;
        }

        if !has_finalizer(&agent) {
            let mut finalizers = agent.metadata.finalizers.clone().unwrap_or_default();
            finalizers.push(AGENT_FINALIZER.to_string());
            self.kube.set_agent_finalizers(namespace, name, &finalizers).await?;
            debug!("Added finalizer to Agent {}", key);
            return Ok(ReconcileOutcome::RequeueNow);
        }

        info!("Reconciling Agent {}", key);

        let target = match &agent.spec.cluster_deployment_name {
            None => None,
            Some(reference) => {
                match self
                    .installer
                    .get_cluster_by_kube_key(&KubeKey::new(&reference.namespace, &reference.name))
                    .await
                {
                    Ok(cluster) => Some(cluster),
                    Err(e) => {
                        let message = format!("failed to resolve cluster deployment {}: {}", reference, e);
                        return self.backend_error(&agent, None, &key, message).await;
                    }
                }
            }
        };

        let mut host = match self.installer.get_host_by_kube_key(&KubeKey::new(namespace, name)).await {
            Ok(host) => host,
            Err(e) if e.is_not_found() => {
                info!("Host of Agent {} is gone from the inventory, deleting the Agent", key);
                self.kube.delete_agent(namespace, name).await?;
                return Ok(ReconcileOutcome::Done);
            }
            Err(e) => {
                let message = format!("failed to get host: {}", e);
                return self.backend_error(&agent, None, &key, message).await;
            }
        };

        match self.sync_binding(&key, &mut host, target.as_ref()).await {
            Ok(spec_sync::BindingChange::None | spec_sync::BindingChange::Bound) => {}
            Ok(spec_sync::BindingChange::Unbound) => {
                // The spec is applied against the new cluster on the next pass
                self.write_status(&agent, &host, SyncResult::Synced).await?;
                return Ok(ReconcileOutcome::RequeueNow);
            }
            Ok(spec_sync::BindingChange::UnbindFailed) => {
                self.write_status(&agent, &host, SyncResult::Synced).await?;
                return Ok(ReconcileOutcome::RequeueAfter(self.settings.reconcile_requeue));
            }
            Err(e) => {
                let message = format!("failed to bind host: {}", e);
                return self.backend_error(&agent, Some(&host), &key, message).await;
            }
        }

        match self.sync_host_fields(&agent, &mut host).await {
            Ok(()) => {}
            Err(spec_sync::FieldSyncError::Input(message)) => {
                return self.input_error(&agent, &host, &key, message).await;
            }
            Err(spec_sync::FieldSyncError::Backend(e)) => {
                let message = format!("failed to update host: {}", e);
                return self.backend_error(&agent, Some(&host), &key, message).await;
            }
        }

        if let Err(e) = self.sync_approval(&agent, &mut host).await {
            let message = format!("failed to update host approval: {}", e);
            return self.backend_error(&agent, Some(&host), &key, message).await;
        }

        let mut outcome = ReconcileOutcome::Done;
        if host.status == HostStatus::AddedToExistingCluster && host.current_stage() != Some(HostStage::Done) {
            match self.bootstrap_day2_host(&agent, &mut host).await {
                Ok(true) => info!("Host of Agent {} joined its cluster", key),
                Ok(false) => outcome = ReconcileOutcome::RequeueAfter(self.settings.csr_requeue),
                Err(e) => {
                    warn!("CSR bootstrap of Agent {} did not complete: {}", key, e);
                    outcome = ReconcileOutcome::RequeueAfter(self.settings.csr_requeue);
                }
            }
        }

        self.write_status(&agent, &host, SyncResult::Synced).await?;
        self.write_inventory_metadata(&agent, &host).await?;
        self.backoff.reset(&key);
        Ok(outcome)
    }

    async fn finalize_agent(
        &self,
        agent: &Agent,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<ReconcileOutcome, ControllerError> {
        if !has_finalizer(agent) {
            return Ok(ReconcileOutcome::Done);
        }

        match self.installer.get_host_by_kube_key(&KubeKey::new(namespace, name)).await {
            Ok(host) => match self.installer.deregister_host(host.id, host.infra_env_id).await {
                Ok(()) => info!("Deregistered host {} of Agent {}", host.id, key),
                Err(e) if e.is_not_found() => debug!("Host {} of Agent {} already deregistered", host.id, key),
                Err(e) => {
                    warn!("Failed to deregister host of Agent {}: {}", key, e);
                    return Ok(ReconcileOutcome::RequeueAfter(self.backoff.next(key)));
                }
            },
            Err(e) if e.is_not_found() => debug!("No host left for deleted Agent {}", key),
            Err(e) => {
                warn!("Failed to look up host of deleted Agent {}: {}", key, e);
                return Ok(ReconcileOutcome::RequeueAfter(self.backoff.next(key)));
            }
        }

        let finalizers: Vec<String> = agent
            .metadata
            .finalizers
            .iter()
            .flatten()
            .filter(|f| f.as_str() != AGENT_FINALIZER)
            .cloned()
            .collect();
        self.kube.set_agent_finalizers(namespace, name, &finalizers).await?;
        self.backoff.forget(key);
        info!("Removed finalizer from Agent {}", key);
        Ok(ReconcileOutcome::Done)
    }

    /// Report a recoverable backend failure and retry with backoff
    async fn backend_error(
        &self,
        agent: &Agent,
        host: Option<&Host>,
        key: &str,
        message: String,
    ) -> Result<ReconcileOutcome, ControllerError> {
        warn!("Backend error reconciling Agent {}: {}", key, message);
        let sync = SyncResult::BackendError(message);
        match host {
            Some(host) => self.write_status(agent, host, sync).await?,
            None => {
                let desired = status::with_sync_result(agent.status.as_ref(), &sync, Utc::now());
                self.patch_status_if_changed(agent, desired).await?;
            }
        }
        Ok(ReconcileOutcome::RequeueAfter(self.backoff.next(key)))
    }

    /// Report a spec the backend cannot accept; retried only when the spec changes
    async fn input_error(
        &self,
        agent: &Agent,
        host: &Host,
        key: &str,
        message: String,
    ) -> Result<ReconcileOutcome, ControllerError> {
        warn!("Invalid spec on Agent {}: {}", key, message);
        self.write_status(agent, host, SyncResult::InputError(message)).await?;
        Ok(ReconcileOutcome::Done)
    }

    async fn write_status(&self, agent: &Agent, host: &Host, sync: SyncResult) -> Result<(), ControllerError> {
        let desired = status::project(
            agent.status.as_ref(),
            host,
            host.approved,
            &sync,
            &self.settings.service_base_url,
            Utc::now(),
        );
        self.patch_status_if_changed(agent, desired).await
    }

    async fn patch_status_if_changed(&self, agent: &Agent, desired: AgentStatus) -> Result<(), ControllerError> {
        if agent.status.as_ref() == Some(&desired) {
            return Ok(());
        }
        let (namespace, name) = agent_key(agent);
        self.kube.patch_agent_status(&namespace, &name, &desired).await?;
        Ok(())
    }

    async fn write_inventory_metadata(&self, agent: &Agent, host: &Host) -> Result<(), ControllerError> {
        let Some(inventory) = host.inventory.as_ref() else {
            return Ok(());
        };
        let prefix = &self.settings.label_prefix;
        let desired_labels = labels::inventory_labels(prefix, inventory);
        let desired_annotations = labels::inventory_annotations(prefix);
        if labels::contains_all(agent.metadata.labels.as_ref(), &desired_labels)
            && labels::contains_all(agent.metadata.annotations.as_ref(), &desired_annotations)
        {
            return Ok(());
        }
        let (namespace, name) = agent_key(agent);
        self.kube
            .patch_agent_metadata(&namespace, &name, &desired_labels, &desired_annotations)
            .await?;
        debug!("Updated inventory labels of Agent {}/{}", namespace, name);
        Ok(())
    }
}

fn has_finalizer(agent: &Agent) -> bool {
    agent.metadata.finalizers.iter().flatten().any(|f| f == AGENT_FINALIZER)
}

fn agent_key(agent: &Agent) -> (String, String) {
    (
        agent.metadata.namespace.clone().unwrap_or_default(),
        agent.metadata.name.clone().unwrap_or_default(),
    )
}
