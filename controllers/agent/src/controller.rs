//! Main controller implementation.
//!
//! `Controller` wires the backend client, the Agent reconciler and the
//! cluster lifecycle manager together and runs their background tasks:
//! - the Agent watcher (kube-runtime controller)
//! - Lease leader election gating the monitoring sweep
//! - the cluster monitoring and garbage collection scheduler
//! - the metrics and probe server

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::kube_api::KubeAgentApi;
use crate::leader::LeaderElector;
use crate::metrics_server;
use crate::reconciler::spoke::KubeSpokeClientFactory;
use crate::reconciler::{Reconciler, ReconcilerSettings};
use crate::watcher::Watcher;
use assisted_client::InstallerClient;
use cluster_lifecycle::{
    ClusterManager, Events, FsObjectStore, LogEventSink, MonitorScheduler, PrometheusMetrics, RestClusterStore,
};
use crds::{Agent, ClusterDeployment};
use kube::{Api, Client};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Garbage collection period of deleted and inactive clusters
const GC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Main controller for Agents and cluster lifecycle.
pub struct Controller {
    agent_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
    leader_election: JoinHandle<()>,
    cluster_monitor: JoinHandle<()>,
    elector: Arc<LeaderElector>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Agent Controller");

        let kube_client = Client::try_default().await?;

        let installer = InstallerClient::new(
            config.assisted_service_url.clone(),
            config.assisted_service_token.clone(),
        )?;
        let cluster_store = RestClusterStore::new(
            config.assisted_service_url.clone(),
            config.assisted_service_token.clone(),
        )
        .map_err(|e| ControllerError::InvalidConfig(format!("cluster store: {}", e)))?;

        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry)
            .map_err(|e| ControllerError::InvalidConfig(format!("metrics registry: {}", e)))?;

        let elector = Arc::new(LeaderElector::new(
            kube_client.clone(),
            &config.lease_name,
            &config.pod_namespace,
            &config.pod_name,
        ));

        let manager = ClusterManager::new(
            config.lifecycle.clone(),
            Arc::new(cluster_store),
            Arc::new(FsObjectStore::new(config.object_store_root.clone())),
        )?
        .with_events(Events::new(Arc::new(LogEventSink)))
        .with_metrics(Arc::new(metrics))
        .with_leader_gate(elector.clone());

        let reconciler = Arc::new(Reconciler::new(
            Box::new(installer),
            Arc::new(KubeAgentApi::new(kube_client.clone())),
            Arc::new(KubeSpokeClientFactory),
            ReconcilerSettings::from_config(&config),
        ));

        let (agent_api, cluster_deployment_api): (Api<Agent>, Api<ClusterDeployment>) = match &config.namespace {
            Some(ns) => (
                Api::namespaced(kube_client.clone(), ns),
                Api::namespaced(kube_client.clone(), ns),
            ),
            None => (Api::all(kube_client.clone()), Api::all(kube_client)),
        };
        let watcher = Watcher::new(reconciler, agent_api, cluster_deployment_api);

        let agent_watcher = tokio::spawn(async move { watcher.watch_agents().await });

        let leader_election = {
            let elector = elector.clone();
            tokio::spawn(async move { elector.run().await })
        };

        let cluster_monitor = MonitorScheduler::new(Arc::new(manager), config.monitor_interval)
            .with_garbage_collection(GC_INTERVAL, config.inactive_after, Some(config.deleted_retention))
            .spawn();

        let metrics_addr = config.metrics_addr;
        let metrics_server = tokio::spawn(async move { metrics_server::serve(metrics_addr, registry).await });

        Ok(Self {
            agent_watcher,
            metrics_server,
            leader_election,
            cluster_monitor,
            elector,
        })
    }

    /// Runs the controller until a task exits or the process is interrupted.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Agent Controller running");

        let result = tokio::select! {
            result = &mut self.agent_watcher => {
                result
                    .map_err(|e| ControllerError::Watch(format!("Agent watcher panicked: {}", e)))
                    .and_then(|r| r.map_err(|e| ControllerError::Watch(format!("Agent watcher error: {}", e))))
            }
            result = &mut self.metrics_server => {
                result
                    .map_err(|e| ControllerError::Watch(format!("metrics server panicked: {}", e)))
                    .and_then(|r| r)
            }
            result = &mut self.leader_election => {
                result.map_err(|e| ControllerError::Watch(format!("leader election panicked: {}", e)))
            }
            result = &mut self.cluster_monitor => {
                result.map_err(|e| ControllerError::Watch(format!("cluster monitor panicked: {}", e)))
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                Ok(())
            }
        };

        self.leader_election.abort();
        self.cluster_monitor.abort();
        if let Err(e) = self.elector.release().await {
            warn!("Failed to release leadership: {}", e);
        }
        result
    }
}
