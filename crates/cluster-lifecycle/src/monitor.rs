//! Periodic cluster monitoring
//!
//! The sweep pages over every live cluster that is not installed and, for
//! each one, derives the machine network, refreshes majority groups and runs
//! the refresh transition. Only the leader sweeps.

use crate::config;
use crate::manager::ClusterManager;
use crate::metrics;
use assisted_client::{Cluster, ClusterStatus, LogsState};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// State carried between sweeps
#[derive(Debug, Clone, Copy)]
pub struct MonitorState {
    /// When the previous sweep ran; bounds the lease timeout window
    pub prev_monitor_invoked_at: DateTime<Utc>,
}

impl MonitorState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            prev_monitor_invoked_at: now,
        }
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

/// Failed or cancelled clusters whose log collection is over need no sweep
pub fn skip_monitoring(cluster: &Cluster) -> bool {
    matches!(cluster.status, ClusterStatus::Error | ClusterStatus::Cancelled)
        && matches!(cluster.logs_info, Some(LogsState::Completed | LogsState::Timeout))
}

/// Whether the DHCP lease window of the cluster expired since the last sweep.
/// Fires once: only the sweep whose window contains the deadline reports it.
pub fn should_trigger_lease_timeout(
    cluster: &Cluster,
    prev: DateTime<Utc>,
    now: DateTime<Utc>,
    timeout: Duration,
) -> bool {
    if matches!(
        cluster.status,
        ClusterStatus::Installed | ClusterStatus::Error | ClusterStatus::Cancelled
    ) {
        return false;
    }
    if !cluster.vip_dhcp_allocation || (!cluster.api_vip.is_empty() && !cluster.ingress_vip.is_empty()) {
        return false;
    }
    if cluster.machine_networks.is_empty() {
        return false;
    }
    let Some(updated_at) = cluster.machine_network_cidr_updated_at else {
        return false;
    };
    let deadline = config::after(updated_at, timeout);
    prev <= deadline && deadline < now
}

impl ClusterManager {
    /// One monitoring sweep
    pub async fn cluster_monitoring(&self, state: &mut MonitorState) {
        if !self.leader().is_leader() {
            debug!("Not a leader, skipping cluster monitoring");
            return;
        }
        let started = Instant::now();
        let now = Utc::now();
        let limit = self.config().monitor_batch_size.max(1);
        let mut offset = 0;
        let mut monitored = 0;

        loop {
            let page = match self.store().list_clusters(offset, limit).await {
                Ok(page) => page,
                Err(e) => {
                    error!("failed to list clusters for monitoring: {}", e);
                    break;
                }
            };
            let fetched = page.len();
            for cluster in page {
                if !self.leader().is_leader() {
                    debug!("Lost leadership, exiting cluster monitoring");
                    return;
                }
                if cluster.status == ClusterStatus::Installed || skip_monitoring(&cluster) {
                    continue;
                }
                monitored += 1;
                self.monitor_cluster(cluster, state.prev_monitor_invoked_at, now).await;
            }
            if fetched < limit {
                break;
            }
            offset += fetched;
        }

        metrics::report(self.metrics().monitored_clusters(monitored), "monitored clusters");
        metrics::report(self.metrics().monitor_duration(started.elapsed()), "monitor duration");
        state.prev_monitor_invoked_at = now;
    }

    async fn monitor_cluster(&self, mut cluster: Cluster, prev: DateTime<Utc>, now: DateTime<Utc>) {
        let id = cluster.id;
        match self.auto_assign_machine_cidr(&cluster).await {
            Ok(true) => match self.store().get_cluster(id).await {
                Ok(fresh) => cluster = fresh,
                Err(e) => {
                    error!("failed to reload cluster {} after machine network update: {}", id, e);
                    return;
                }
            },
            Ok(false) => {}
            Err(e) => error!("failed to set machine cidr for cluster {}: {}", id, e),
        }

        if let Err(e) = self.update_majority_groups(&cluster).await {
            error!("failed to set majority groups for cluster {}: {}", id, e);
        }

        // The lease window is judged on the cluster as the sweep found it
        let before_refresh = cluster.clone();
        if let Err(e) = self.refresh_cluster(cluster).await {
            warn!("failed to refresh cluster {} state: {}", id, e);
        }

        if should_trigger_lease_timeout(&before_refresh, prev, now, self.config().dhcp_lease_timeout) {
            self.events()
                .warning(
                    id,
                    "api_ingress_vip_timed_out",
                    "API and Ingress VIPs lease allocation has been timed out",
                )
                .await;
        }
    }
}

/// Background loop driving the sweep and garbage collection.
pub struct MonitorScheduler {
    manager: Arc<ClusterManager>,
    monitor_interval: Duration,
    gc_interval: Duration,
    /// Deregister clusters idle for longer than this
    inactive_after: Option<Duration>,
    /// Purge soft-deleted clusters after this long
    deleted_retention: Option<Duration>,
}

impl MonitorScheduler {
    pub fn new(manager: Arc<ClusterManager>, monitor_interval: Duration) -> Self {
        Self {
            manager,
            monitor_interval,
            gc_interval: Duration::from_secs(60 * 60),
            inactive_after: None,
            deleted_retention: None,
        }
    }

    #[must_use]
    pub fn with_garbage_collection(
        mut self,
        gc_interval: Duration,
        inactive_after: Option<Duration>,
        deleted_retention: Option<Duration>,
    ) -> Self {
        self.gc_interval = gc_interval;
        self.inactive_after = inactive_after;
        self.deleted_retention = deleted_retention;
        self
    }

    /// Start the loop on the runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        info!(
            "Starting cluster monitor (interval {:?}, gc interval {:?})",
            self.monitor_interval, self.gc_interval
        );
        let mut state = MonitorState::default();
        let mut monitor_tick = tokio::time::interval(self.monitor_interval);
        let mut gc_tick = tokio::time::interval(self.gc_interval);
        monitor_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        gc_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = monitor_tick.tick() => {
                    self.manager.cluster_monitoring(&mut state).await;
                }
                _ = gc_tick.tick() => {
                    self.collect_garbage().await;
                }
            }
        }
    }

    async fn collect_garbage(&self) {
        if !self.manager.leader().is_leader() {
            return;
        }
        let now = Utc::now();
        if let Some(inactive_after) = self.inactive_after {
            let since = config::before(now, inactive_after);
            let limit = self.manager.config().monitor_batch_size.max(1);
            match self.manager.deregister_inactive_clusters(since, limit).await {
                Ok(0) => {}
                Ok(count) => info!("Deregistered {} inactive clusters", count),
                Err(e) => error!("failed to deregister inactive clusters: {}", e),
            }
        }
        if let Some(retention) = self.deleted_retention {
            let older_than = config::before(now, retention);
            if let Err(e) = self.manager.permanent_clusters_deletion(older_than).await {
                error!("failed to permanently delete clusters: {}", e);
            }
        }
    }
}
