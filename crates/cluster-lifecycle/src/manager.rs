//! Cluster lifecycle manager
//!
//! Owns the transition table and the injected collaborators. Every status
//! change runs through `TransitionTable::run` with the manager as hooks:
//! the action writes a conditional update keyed on the status the
//! transition started from, and the after hook emits events and metrics.

use crate::config::LifecycleConfig;
use crate::error::{CollaboratorError, LifecycleError};
use crate::events::Events;
use crate::fsm::{TransitionHooks, TransitionRule, TransitionTable};
use crate::leader::{AlwaysLeader, LeaderGate};
use crate::metrics::{self, MetricsApi, NoopMetrics};
use crate::network::{self, InventoryNetworkCalculator, NetworkCalculator};
use crate::objectstore::ObjectStore;
use crate::progress;
use crate::statemachine::{
    ClusterAction, ClusterContext, ClusterMachine, INSTALLATION_STATUSES, PostEffect, TransitionType, cluster_table,
    plan_update,
};
use crate::store::{ClusterStore, ClusterUpdate, DependentRecord};
use crate::subscription::SubscriptionActivator;
use crate::validations::{self, ValidationChange};
use assisted_client::{
    Cluster, ClusterKind, ClusterProgress, ClusterStatus, KubeKey, LogsState, OperatorStatus, PreparationStatus,
    ValidationStatus,
};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Statuses in which hosts may register and the cluster may be edited
const UPDATABLE_STATUSES: [ClusterStatus; 4] = [
    ClusterStatus::Insufficient,
    ClusterStatus::Ready,
    ClusterStatus::PendingForInput,
    ClusterStatus::AddingHosts,
];

const DOWNLOAD_STATUSES: [ClusterStatus; 7] = [
    ClusterStatus::Installing,
    ClusterStatus::InstallingPendingUserAction,
    ClusterStatus::Finalizing,
    ClusterStatus::Installed,
    ClusterStatus::Error,
    ClusterStatus::Cancelled,
    ClusterStatus::AddingHosts,
];

fn status_list(statuses: &[ClusterStatus]) -> String {
    statuses.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}

fn install_duration(cluster: &Cluster, now: DateTime<Utc>) -> Option<Duration> {
    cluster.install_started_at.and_then(|started| (now - started).to_std().ok())
}

/// Runs cluster transitions against the store and reports them through events and metrics.
pub struct ClusterManager {
    config: LifecycleConfig,
    store: Arc<dyn ClusterStore>,
    objects: Arc<dyn ObjectStore>,
    events: Events,
    metrics: Arc<dyn MetricsApi>,
    network: Arc<dyn NetworkCalculator>,
    leader: Arc<dyn LeaderGate>,
    subscriptions: Option<Arc<dyn SubscriptionActivator>>,
    table: TransitionTable<ClusterMachine>,
}

impl fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterManager")
            .field("config", &self.config)
            .field("rules", &self.table.rules().len())
            .finish_non_exhaustive()
    }
}

impl ClusterManager {
    /// Create a manager with log-only events, no metrics, the inventory
    /// network calculator and a permanent leader.
    pub fn new(
        config: LifecycleConfig,
        store: Arc<dyn ClusterStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self, LifecycleError> {
        let table = cluster_table().map_err(|e| LifecycleError::Internal(e.to_string()))?;
        Ok(Self {
            config,
            store,
            objects,
            events: Events::default(),
            metrics: Arc::new(NoopMetrics),
            network: Arc::new(InventoryNetworkCalculator),
            leader: Arc::new(AlwaysLeader),
            subscriptions: None,
            table,
        })
    }

    #[must_use]
    pub fn with_events(mut self, events: Events) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsApi>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_network_calculator(mut self, network: Arc<dyn NetworkCalculator>) -> Self {
        self.network = network;
        self
    }

    #[must_use]
    pub fn with_leader_gate(mut self, leader: Arc<dyn LeaderGate>) -> Self {
        self.leader = leader;
        self
    }

    #[must_use]
    pub fn with_subscription_activator(mut self, activator: Arc<dyn SubscriptionActivator>) -> Self {
        self.subscriptions = Some(activator);
        self
    }

    /// Timeouts and thresholds in effect
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn ClusterStore {
        self.store.as_ref()
    }

    pub(crate) fn events(&self) -> &Events {
        &self.events
    }

    pub(crate) fn metrics(&self) -> &dyn MetricsApi {
        self.metrics.as_ref()
    }

    pub(crate) fn leader(&self) -> &dyn LeaderGate {
        self.leader.as_ref()
    }

    fn context(&self, cluster: Cluster) -> ClusterContext {
        ClusterContext::new(cluster, self.config.clone(), Utc::now())
    }

    async fn run(&self, transition: TransitionType, ctx: &mut ClusterContext) -> Result<Cluster, LifecycleError> {
        let current = ctx.cluster.status;
        self.table.run(transition, Some(current), ctx, self).await
    }

    /// Stored cluster by id
    pub async fn get_cluster(&self, id: Uuid) -> Result<Cluster, LifecycleError> {
        Ok(self.store.get_cluster(id).await?)
    }

    /// Stored cluster by the namespace and name of its ClusterDeployment
    pub async fn get_cluster_by_kube_key(&self, key: &KubeKey) -> Result<Cluster, LifecycleError> {
        Ok(self.store.get_cluster_by_kube_key(key).await?)
    }

    /// Persist a new day-1 cluster in `insufficient`
    pub async fn register_cluster(&self, cluster: Cluster) -> Result<Cluster, LifecycleError> {
        self.register(TransitionType::RegisterCluster, cluster).await
    }

    /// Persist a new day-2 cluster in `adding-hosts`
    pub async fn register_add_hosts_cluster(&self, mut cluster: Cluster) -> Result<Cluster, LifecycleError> {
        cluster.kind = ClusterKind::AddHostsCluster;
        self.register(TransitionType::RegisterAddHostsCluster, cluster).await
    }

    async fn register(&self, transition: TransitionType, cluster: Cluster) -> Result<Cluster, LifecycleError> {
        let id = cluster.id;
        let kind = cluster.kind;
        let mut ctx = self.context(cluster);
        let result = self.table.run(transition, None, &mut ctx, self).await;
        match &result {
            Ok(_) => {
                self.events
                    .info(id, "cluster_registration_succeeded", format!("Successfully registered cluster of kind {:?}", kind))
                    .await;
            }
            Err(e) => {
                self.events
                    .error(id, "cluster_registration_failed", format!("Failed to register cluster: {}", e))
                    .await;
            }
        }
        result
    }

    /// Re-evaluate validations and run the refresh transition
    pub async fn refresh_status(&self, id: Uuid) -> Result<Cluster, LifecycleError> {
        let cluster = self.store.get_cluster(id).await?;
        self.refresh_cluster(cluster).await
    }

    pub(crate) async fn refresh_cluster(&self, mut cluster: Cluster) -> Result<Cluster, LifecycleError> {
        let fresh = validations::evaluate(&cluster);
        let stored = cluster.validations_info.clone();
        if validations::is_informative(&stored, &fresh) && fresh != stored {
            // Changes are reported against the stored result before it is overwritten
            self.report_validation_changes(&cluster, &validations::diff(&stored, &fresh))
                .await;
            let update = ClusterUpdate {
                validations_info: Some(fresh.clone()),
                ..Default::default()
            };
            cluster = self.store.update_cluster(cluster.id, Some(cluster.status), &update).await?;
        }
        let mut ctx = self.context(cluster).with_validations(fresh);
        self.run(TransitionType::RefreshStatus, &mut ctx).await
    }

    async fn report_validation_changes(&self, cluster: &Cluster, changes: &[ValidationChange]) {
        for change in changes {
            if change.is_failure() {
                metrics::report(
                    self.metrics
                        .cluster_validation_changed(cluster.id, &change.id, change.current.as_str()),
                    "cluster validation changed",
                );
                self.events
                    .warning(
                        cluster.id,
                        "cluster_validation_failed",
                        format!("Cluster validation '{}' that used to succeed is now failing: {}", change.id, change.message),
                    )
                    .await;
            } else if change.is_fixed() {
                self.events
                    .info(
                        cluster.id,
                        "cluster_validation_fixed",
                        format!("Cluster validation '{}' is now fixed", change.id),
                    )
                    .await;
            }
        }
    }

    /// Move a Ready cluster into PreparingForInstallation
    pub async fn prepare_for_installation(&self, id: Uuid) -> Result<Cluster, LifecycleError> {
        let cluster = self.store.get_cluster(id).await?;
        let mut ctx = self.context(cluster);
        self.run(TransitionType::PrepareForInstallation, &mut ctx).await
    }

    /// Record a failed preparation; the next refresh moves the cluster back
    pub async fn handle_pre_installation_error(&self, id: Uuid, reason: &str) -> Result<(), LifecycleError> {
        warn!("Failed to prepare installation of cluster {}: {}", id, reason);
        let update = ClusterUpdate {
            last_installation_preparation: Some(PreparationStatus::Failed),
            last_installation_preparation_reason: Some(reason.to_string()),
            ..Default::default()
        };
        if let Err(e) = self.store.update_cluster(id, None, &update).await {
            error!("Failed to handle pre installation error for cluster {}: {}", id, e);
            return Err(e.into());
        }
        self.events
            .error(
                id,
                "prepare_installation_failed",
                format!("Failed to prepare the installation due to an unexpected error: {}", reason),
            )
            .await;
        Ok(())
    }

    /// Record a successful preparation; the next refresh starts installing
    pub async fn handle_pre_installation_success(&self, id: Uuid) -> Result<(), LifecycleError> {
        let update = ClusterUpdate {
            last_installation_preparation: Some(PreparationStatus::Success),
            ..Default::default()
        };
        if let Err(e) = self.store.update_cluster(id, None, &update).await {
            error!("Failed to handle pre installation success for cluster {}: {}", id, e);
            return Err(e.into());
        }
        info!("Successfully handled pre-installation success, cluster {}", id);
        self.events
            .info(id, "cluster_prepare_installation_succeeded", "Cluster was prepared successfully for installation")
            .await;
        Ok(())
    }

    /// Cancel a running installation; `reason` becomes the status info
    pub async fn cancel_installation(&self, id: Uuid, reason: &str) -> Result<Cluster, LifecycleError> {
        let cluster = self.store.get_cluster(id).await?;
        let previous = cluster.clone();
        let mut ctx = self.context(cluster).with_reason(reason);
        let result = self.run(TransitionType::CancelInstallation, &mut ctx).await;
        match &result {
            Ok(_) => {
                self.events
                    .info(id, "cluster_installation_canceled", "Canceled cluster installation")
                    .await;
                self.report_stopped_installation(&previous, ClusterStatus::Cancelled, ctx.now);
            }
            Err(e) => {
                self.events
                    .error(id, "cancel_installation_failed", format!("Failed to cancel installation: {}", e))
                    .await;
            }
        }
        result
    }

    /// Return a preparing, installing or stopped cluster to Insufficient
    pub async fn reset_cluster(&self, id: Uuid, reason: &str) -> Result<Cluster, LifecycleError> {
        let cluster = self.store.get_cluster(id).await?;
        let previous = cluster.clone();
        let mut ctx = self.context(cluster).with_reason(reason);
        let result = self.run(TransitionType::ResetCluster, &mut ctx).await;
        match &result {
            Ok(_) => {
                self.events
                    .info(id, "cluster_installation_reset", "Reset cluster installation")
                    .await;
                self.report_stopped_installation(&previous, ClusterStatus::Insufficient, ctx.now);
            }
            Err(e) => {
                self.events
                    .error(id, "reset_installation_failed", format!("Failed to reset installation: {}", e))
                    .await;
            }
        }
        result
    }

    /// The completion metric only counts interruptions of a running installation
    fn report_stopped_installation(&self, previous: &Cluster, result: ClusterStatus, now: DateTime<Utc>) {
        if INSTALLATION_STATUSES.contains(&previous.status) {
            metrics::report(
                self.metrics
                    .installation_completed(previous.id, result.as_str(), install_duration(previous, now)),
                "installation completed",
            );
        }
    }

    /// Finish a finalizing cluster. On success the subscription is
    /// activated first and an activation failure leaves the cluster as is.
    pub async fn complete_installation(&self, id: Uuid, success: bool, reason: &str) -> Result<Cluster, LifecycleError> {
        let cluster = self.store.get_cluster(id).await?;
        let mut ctx = self.context(cluster).with_success(success).with_reason(reason);
        self.table
            .select(TransitionType::CompleteInstallation, Some(ctx.cluster.status), &ctx)?;

        if success {
            if let Some(activator) = &self.subscriptions {
                if let Err(e) = activator.activate(&ctx.cluster).await {
                    error!("Failed to activate subscription for cluster {}: {}", id, e);
                    return Err(LifecycleError::Internal(format!(
                        "failed to activate subscription for cluster {}: {}",
                        id, e
                    )));
                }
            }
        }

        let updated = self.run(TransitionType::CompleteInstallation, &mut ctx).await?;
        metrics::report(
            self.metrics
                .installation_completed(id, updated.status.as_str(), install_duration(&updated, ctx.now)),
            "installation completed",
        );
        if success {
            self.events
                .info(id, "cluster_installation_completed", "Successfully completed installing cluster")
                .await;
        } else {
            self.events
                .error(
                    id,
                    "cluster_installation_failed",
                    format!("Failed installing cluster {}. Reason: {}", updated.name, reason),
                )
                .await;
        }
        Ok(updated)
    }

    /// Turn an installed cluster into a day-2 cluster that accepts new hosts
    pub async fn transform_to_day2(&self, id: Uuid) -> Result<Cluster, LifecycleError> {
        let cluster = self.store.get_cluster(id).await?;
        if cluster.status != ClusterStatus::Installed {
            let message = format!(
                "cannot transform cluster {} to day2. Expected cluster status: {}, but cluster status is: {}",
                id,
                ClusterStatus::Installed,
                cluster.status
            );
            error!("{}", message);
            return Err(LifecycleError::BadRequest(message));
        }
        if cluster.kind != ClusterKind::Cluster {
            let message = format!(
                "cannot transform cluster {} to day2. Expected cluster kind: Cluster, but cluster kind is: {:?}",
                id, cluster.kind
            );
            error!("{}", message);
            return Err(LifecycleError::BadRequest(message));
        }
        let update = ClusterUpdate {
            status: Some(ClusterStatus::AddingHosts),
            kind: Some(ClusterKind::AddHostsCluster),
            api_vip_dns_name: Some(format!("api.{}.{}", cluster.name, cluster.base_dns_domain)),
            ..Default::default()
        };
        Ok(self
            .store
            .update_cluster(id, Some(ClusterStatus::Installed), &update)
            .await?)
    }

    /// Report failed validations of the cluster and its hosts. Failures are
    /// collected and logged without stopping the loop.
    fn report_failed_validations(&self, cluster: &Cluster) -> Vec<CollaboratorError> {
        let mut errors = Vec::new();
        for host in &cluster.hosts {
            for validation in host.validations_info.with_status(ValidationStatus::Failure) {
                if let Err(e) = self.metrics.host_validation_failed(host.id, &validation.id) {
                    error!(
                        "Failed to report metrics for failed validations on host {} in cluster {}: {}",
                        host.id, cluster.id, e
                    );
                    errors.push(e);
                }
            }
        }
        if cluster.validations_info.is_empty() {
            warn!(
                "Cluster {} doesn't contain any validations info, cannot report metrics for that cluster",
                cluster.id
            );
        }
        for validation in cluster.validations_info.with_status(ValidationStatus::Failure) {
            if let Err(e) = self.metrics.cluster_validation_failed(cluster.id, &validation.id) {
                error!("Failed to report metrics for failed validations on cluster {}: {}", cluster.id, e);
                errors.push(e);
            }
        }
        errors
    }

    /// Delete the cluster record and its files, emitting the outcome as an event
    pub async fn deregister_cluster(&self, id: Uuid) -> Result<(), LifecycleError> {
        let cluster = self.store.get_cluster(id).await?;
        self.deregister(&cluster).await
    }

    async fn deregister(&self, cluster: &Cluster) -> Result<(), LifecycleError> {
        let metric_errors = self.report_failed_validations(cluster);
        if !metric_errors.is_empty() {
            warn!(
                "{} validation metrics could not be reported for cluster {}",
                metric_errors.len(),
                cluster.id
            );
        }

        let image = cluster.discovery_image_key();
        let exists = self.objects.exists(&image).await.map_err(|e| {
            error!("Failed to find cluster discovery image {}: {}", image, e);
            LifecycleError::from(e)
        })?;
        if exists {
            self.objects.delete(&image).await.map_err(|e| {
                error!("Failed to delete cluster discovery image {}: {}", image, e);
                LifecycleError::from(e)
            })?;
        }

        match self.store.soft_delete_cluster(cluster.id, Utc::now()).await {
            Ok(()) => {
                self.events
                    .info(cluster.id, "cluster_deregistered", format!("Deregistered cluster: {}", cluster.id))
                    .await;
                Ok(())
            }
            Err(e) => {
                self.events
                    .error(
                        cluster.id,
                        "cluster_deregister_failed",
                        format!("Failed to deregister cluster. Error: {}", e),
                    )
                    .await;
                Err(e.into())
            }
        }
    }

    /// Deregister up to `limit` clusters not updated since `since`. Returns
    /// how many were deregistered.
    pub async fn deregister_inactive_clusters(&self, since: DateTime<Utc>, limit: usize) -> Result<usize, LifecycleError> {
        let clusters = self.store.list_inactive_clusters(since, limit).await?;
        let mut deregistered = 0;
        for cluster in clusters {
            self.events
                .info(
                    cluster.id,
                    "cluster_deregistered_after_inactivity",
                    format!("Cluster is deregistered due to inactivity since {}", since),
                )
                .await;
            info!(
                "Cluster {} is deregistered due to inactivity since {:?}",
                cluster.id, cluster.updated_at
            );
            match self.deregister(&cluster).await {
                Ok(()) => deregistered += 1,
                Err(e) => error!("failed to deregister inactive cluster {}: {}", cluster.id, e),
            }
        }
        Ok(deregistered)
    }

    /// Delete the objects under `<id>/<folder>/`. With no folder the logs and
    /// manifests are left in place.
    async fn delete_cluster_files(&self, id: Uuid, folder: Option<&str>) -> Result<(), LifecycleError> {
        let prefix = match folder {
            Some(folder) => format!("{}/{}/", id, folder),
            None => format!("{}/", id),
        };
        let files = self.objects.list_by_prefix(&prefix).await.map_err(|e| {
            error!("Failed to list files in {}: {}", prefix, e);
            LifecycleError::Internal(format!("Failed to list files in {}", prefix))
        })?;

        let mut failed = Vec::new();
        for file in files {
            if folder.is_none() && (file.contains("logs") || file.contains("manifests")) {
                continue;
            }
            debug!("Deleting cluster {} file: {}", id, file);
            if let Err(e) = self.objects.delete(&file).await {
                error!("failed deleting file {}: {}", file, e);
                failed.push(file);
            }
        }
        if !failed.is_empty() {
            return Err(LifecycleError::Internal(format!("failed to delete files: {:?}", failed)));
        }
        Ok(())
    }

    /// Remove collected logs of the cluster
    pub async fn delete_cluster_logs(&self, id: Uuid) -> Result<(), LifecycleError> {
        self.delete_cluster_files(id, Some("logs")).await
    }

    /// Purge clusters soft-deleted before `older_than`. A cluster row is only
    /// removed once every stored artifact of it was deleted.
    pub async fn permanent_clusters_deletion(&self, older_than: DateTime<Utc>) -> Result<(), LifecycleError> {
        let clusters = self.store.list_deleted_clusters(older_than).await?;
        for cluster in clusters {
            let id = cluster.id;
            info!(
                "Permanently deleting cluster {} that was de-registered before {}",
                id, older_than
            );

            let mut delete_row = true;
            for folder in [None, Some("logs"), Some("manifests")] {
                if let Err(e) = self.delete_cluster_files(id, folder).await {
                    delete_row = false;
                    warn!("Failed deleting {} files of cluster {}: {}", folder.unwrap_or("stored"), id, e);
                }
            }
            if let Err(e) = self.objects.delete(&id.to_string()).await {
                delete_row = false;
                warn!("Failed deleting cluster directory {}: {}", id, e);
            }
            if !delete_row {
                continue;
            }

            for kind in DependentRecord::ALL {
                if let Err(e) = self.store.delete_dependent_records(id, kind).await {
                    warn!("Failed deleting {} records of cluster {}: {}", kind, id, e);
                }
            }
            match self.store.purge_cluster(id).await {
                Ok(()) => debug!("Deleted cluster {} from the store", id),
                Err(e) => warn!("Failed deleting cluster {} from the store: {}", id, e),
            }
        }
        Ok(())
    }

    /// Store VIPs reported by DHCP or the user
    pub async fn set_vips_data(
        &self,
        id: Uuid,
        api_vip: &str,
        ingress_vip: &str,
        api_vip_lease: &str,
        ingress_vip_lease: &str,
    ) -> Result<(), LifecycleError> {
        let cluster = self.store.get_cluster(id).await?;
        let vips_changed = api_vip != cluster.api_vip || ingress_vip != cluster.ingress_vip;
        let leases_changed = api_vip_lease != cluster.api_vip_lease || ingress_vip_lease != cluster.ingress_vip_lease;
        if !vips_changed && !leases_changed {
            return Ok(());
        }
        let mismatch = || {
            format!(
                "Got VIPs different than those that are stored for cluster {}. APIVip = {} stored = {}, IngressVIP = {} stored = {}",
                id, api_vip, cluster.api_vip, ingress_vip, cluster.ingress_vip
            )
        };

        match cluster.status {
            ClusterStatus::PendingForInput | ClusterStatus::Insufficient | ClusterStatus::Ready => {
                let update = ClusterUpdate {
                    api_vip: Some(api_vip.to_string()),
                    ingress_vip: Some(ingress_vip.to_string()),
                    api_vip_lease: Some(api_vip_lease.to_string()),
                    ingress_vip_lease: Some(ingress_vip_lease.to_string()),
                    ..Default::default()
                };
                if let Err(e) = self.store.update_cluster(id, Some(cluster.status), &update).await {
                    warn!("Update vips of cluster {}: {}", id, e);
                    return Err(e.into());
                }
                if vips_changed {
                    if !cluster.api_vip.is_empty() || !cluster.ingress_vip.is_empty() {
                        warn!("VIPs changed: {}", mismatch());
                    }
                    self.events
                        .info(
                            id,
                            "api_ingress_vip_updated",
                            format!("Cluster was updated with api-vip {}, ingress-vip {}", api_vip, ingress_vip),
                        )
                        .await;
                }
                Ok(())
            }
            status if INSTALLATION_STATUSES.contains(&status) => {
                if vips_changed {
                    let message = mismatch();
                    error!("VIPs changed during installation: {}", message);
                    return Err(LifecycleError::Conflict(message));
                }
                let update = ClusterUpdate {
                    api_vip_lease: Some(api_vip_lease.to_string()),
                    ingress_vip_lease: Some(ingress_vip_lease.to_string()),
                    ..Default::default()
                };
                self.store.update_cluster(id, Some(status), &update).await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// `(status == Ready, status info)`
    pub fn is_ready_for_installation(cluster: &Cluster) -> (bool, String) {
        if cluster.status != ClusterStatus::Ready {
            return (false, cluster.status_info.clone());
        }
        (true, String::new())
    }

    /// Installation files exist once installation has started
    pub fn can_download_files(cluster: &Cluster) -> Result<(), LifecycleError> {
        if DOWNLOAD_STATUSES.contains(&cluster.status) {
            return Ok(());
        }
        Err(LifecycleError::Conflict(format!(
            "cluster {} is in {} state, files can be downloaded only when status is one of: {}",
            cluster.id,
            cluster.status,
            status_list(&DOWNLOAD_STATUSES)
        )))
    }

    /// Like [`ClusterManager::can_download_files`] but not while Installing
    pub fn can_download_kubeconfig(cluster: &Cluster) -> Result<(), LifecycleError> {
        let allowed: Vec<ClusterStatus> = DOWNLOAD_STATUSES
            .into_iter()
            .filter(|s| *s != ClusterStatus::Installing)
            .collect();
        if allowed.contains(&cluster.status) {
            return Ok(());
        }
        Err(LifecycleError::Conflict(format!(
            "cluster {} is in {} state, kubeconfig can be downloaded only when status is one of: {}",
            cluster.id,
            cluster.status,
            status_list(&allowed)
        )))
    }

    /// Whether an operator is available. Without a name, or for clusters
    /// that carry no operator data, this falls back to the cluster status.
    pub fn is_operator_available(cluster: &Cluster, name: Option<&str>) -> bool {
        match name {
            Some(name) if !cluster.monitored_operators.is_empty() => cluster
                .monitored_operators
                .iter()
                .find(|o| o.name == name)
                .is_some_and(|o| o.status == Some(OperatorStatus::Available)),
            _ => matches!(
                cluster.status,
                ClusterStatus::Installing
                    | ClusterStatus::InstallingPendingUserAction
                    | ClusterStatus::Finalizing
                    | ClusterStatus::Installed
            ),
        }
    }

    /// Whether new hosts may register to the cluster
    pub fn accept_registration(cluster: &Cluster) -> Result<(), LifecycleError> {
        if UPDATABLE_STATUSES.contains(&cluster.status) {
            return Ok(());
        }
        if cluster.status == ClusterStatus::Installed {
            return Err(LifecycleError::BadRequest(
                "Cannot add hosts to an existing cluster using the original Discovery ISO.".to_string(),
            ));
        }
        Err(LifecycleError::Conflict(format!(
            "Host can register only in one of the following states: {}",
            status_list(&UPDATABLE_STATUSES)
        )))
    }

    /// Whether the cluster accepts user updates
    pub fn verify_cluster_updatability(cluster: &Cluster) -> Result<(), LifecycleError> {
        if UPDATABLE_STATUSES.contains(&cluster.status) {
            return Ok(());
        }
        Err(LifecycleError::BadRequest(format!(
            "Cluster {} is in {} state, cluster can be updated only in one of {}",
            cluster.id,
            cluster.status,
            status_list(&UPDATABLE_STATUSES)
        )))
    }

    /// Store the subscription id
    pub async fn update_ams_subscription_id(&self, id: Uuid, subscription_id: &str) -> Result<(), LifecycleError> {
        let update = ClusterUpdate {
            ams_subscription_id: Some(subscription_id.to_string()),
            ..Default::default()
        };
        self.store.update_cluster(id, None, &update).await?;
        Ok(())
    }

    /// Recompute and store connectivity majority groups
    pub async fn set_connectivity_majority_groups(&self, id: Uuid) -> Result<(), LifecycleError> {
        let cluster = self.store.get_cluster(id).await?;
        self.update_majority_groups(&cluster).await
    }

    pub(crate) async fn update_majority_groups(&self, cluster: &Cluster) -> Result<(), LifecycleError> {
        let groups = self.network.majority_groups(cluster);
        if groups == cluster.connectivity_majority_groups {
            return Ok(());
        }
        let update = ClusterUpdate {
            connectivity_majority_groups: Some(groups),
            ..Default::default()
        };
        self.store.update_cluster(cluster.id, None, &update).await?;
        Ok(())
    }

    /// Stamp the controller log upload time with now
    pub async fn set_upload_controller_logs_at(&self, id: Uuid) -> Result<(), LifecycleError> {
        let update = ClusterUpdate {
            controller_logs_collected_at: Some(Some(Utc::now())),
            ..Default::default()
        };
        self.store.update_cluster(id, None, &update).await.map_err(|e| {
            LifecycleError::Internal(format!("failed to set controller_logs_collected_at to cluster {}: {}", id, e))
        })?;
        Ok(())
    }

    /// Record the controller log collection state; a request also marks
    /// the collection start.
    pub async fn update_logs_progress(&self, id: Uuid, state: LogsState) -> Result<(), LifecycleError> {
        let mut update = ClusterUpdate {
            logs_info: Some(Some(state)),
            ..Default::default()
        };
        if state == LogsState::Requested {
            update.controller_logs_started_at = Some(Some(Utc::now()));
        }
        self.store.update_cluster(id, None, &update).await?;
        Ok(())
    }

    /// Recompute installation progress from the hosts
    pub async fn update_install_progress(&self, id: Uuid) -> Result<(), LifecycleError> {
        let cluster = self.store.get_cluster(id).await?;
        let Some(progress) = progress::install_progress(&cluster) else {
            return Ok(());
        };
        self.write_progress(&cluster, progress).await
    }

    /// Recompute finalizing progress; never moves the total backwards
    pub async fn update_finalizing_progress(&self, id: Uuid) -> Result<(), LifecycleError> {
        let cluster = self.store.get_cluster(id).await?;
        let Some(progress) = progress::finalizing_progress(&cluster) else {
            debug!("cluster {}: finalizing progress would decrease, keeping the stored value", id);
            return Ok(());
        };
        self.write_progress(&cluster, progress).await
    }

    async fn write_progress(
        &self,
        cluster: &Cluster,
        progress: ClusterProgress,
    ) -> Result<(), LifecycleError> {
        if progress == cluster.progress {
            return Ok(());
        }
        let update = ClusterUpdate {
            progress: Some(progress),
            ..Default::default()
        };
        self.store.update_cluster(cluster.id, None, &update).await?;
        Ok(())
    }

    /// Derive the machine network of clusters waiting for input. Returns
    /// whether the stored networks changed.
    pub async fn auto_assign_machine_cidr(&self, cluster: &Cluster) -> Result<bool, LifecycleError> {
        if !matches!(cluster.status, ClusterStatus::PendingForInput | ClusterStatus::Insufficient) {
            return Ok(false);
        }
        let networks = if cluster.vip_dhcp_allocation {
            self.dhcp_machine_networks(cluster)
        } else if cluster.is_single_node() {
            self.single_node_machine_networks(cluster)
        } else {
            None
        };
        let Some(networks) = networks else {
            return Ok(false);
        };
        if networks == cluster.machine_networks {
            return Ok(false);
        }
        info!("cluster {}: setting machine networks to {:?}", cluster.id, networks);
        let update = ClusterUpdate {
            machine_networks: Some(networks),
            machine_network_cidr_updated_at: Some(Utc::now()),
            ..Default::default()
        };
        self.store.update_cluster(cluster.id, Some(cluster.status), &update).await?;
        Ok(true)
    }

    /// Only a single discovered host network can be picked automatically
    fn dhcp_machine_networks(&self, cluster: &Cluster) -> Option<Vec<String>> {
        match self.network.candidate_machine_networks(cluster).as_slice() {
            [only] => Some(vec![only.to_string()]),
            _ => None,
        }
    }

    fn single_node_machine_networks(&self, cluster: &Cluster) -> Option<Vec<String>> {
        if !cluster.machine_networks.is_empty() {
            return None;
        }
        let cluster_families = network::families(cluster.cluster_networks.iter().map(|n| n.cidr.as_str()));
        let service_families = network::families(cluster.service_networks.iter().map(String::as_str));
        if cluster_families.is_empty() || cluster_families != service_families {
            return None;
        }
        let candidates = self.network.candidate_machine_networks(cluster);
        let by_family = network::candidates_by_family(&candidates);
        let mut networks = Vec::new();
        for family in &cluster_families {
            match by_family.get(family).map(Vec::as_slice) {
                Some([only]) => networks.push(only.to_string()),
                _ => return None,
            }
        }
        Some(networks)
    }
}

#[async_trait::async_trait]
impl TransitionHooks<ClusterMachine> for ClusterManager {
    type Output = Cluster;
    type Error = LifecycleError;

    async fn action(
        &self,
        ctx: &mut ClusterContext,
        current: Option<ClusterStatus>,
        rule: &TransitionRule<ClusterMachine>,
    ) -> Result<Cluster, LifecycleError> {
        let update = plan_update(ctx, current, rule);
        match current {
            None => {
                let mut cluster = ctx.cluster.clone();
                update.apply(&mut cluster, ctx.now);
                self.store.insert_cluster(&cluster).await?;
                Ok(cluster)
            }
            Some(_) if update.is_empty() => Ok(ctx.cluster.clone()),
            Some(status) => Ok(self.store.update_cluster(ctx.cluster.id, Some(status), &update).await?),
        }
    }

    async fn after(
        &self,
        ctx: &ClusterContext,
        current: Option<ClusterStatus>,
        rule: &TransitionRule<ClusterMachine>,
        output: &Cluster,
    ) {
        let ClusterAction { effect, .. } = rule.action;
        if effect == PostEffect::MarkLogsTimeout && ctx.cluster.logs_info != output.logs_info {
            warn!("cluster {}: log collection timed out", output.id);
        }
        let Some(previous) = current else {
            return;
        };
        if previous == output.status {
            return;
        }
        info!(
            "cluster {}: status changed from {} to {}",
            output.id, previous, output.status
        );
        let message = format!("Updated status of the cluster to {}", output.status);
        if output.status == ClusterStatus::Error {
            self.events.error(output.id, "cluster_status_updated", message).await;
        } else {
            self.events.info(output.id, "cluster_status_updated", message).await;
        }

        // Failures detected by the refresh end the installation
        if rule.transition == TransitionType::RefreshStatus
            && output.status == ClusterStatus::Error
            && INSTALLATION_STATUSES.contains(&previous)
        {
            metrics::report(
                self.metrics.installation_completed(
                    output.id,
                    output.status.as_str(),
                    install_duration(&ctx.cluster, ctx.now),
                ),
                "installation completed",
            );
        }
    }
}
