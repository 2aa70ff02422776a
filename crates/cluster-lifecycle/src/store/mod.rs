//! Cluster persistence
//!
//! The store is the only shared state between replicas. Status writes are
//! conditional on the expected current status so that two writers racing on
//! the same cluster cannot both transition it.

mod memory;
mod rest;

pub use memory::MemoryClusterStore;
pub use rest::RestClusterStore;

use crate::error::StoreError;
use assisted_client::{
    Cluster, ClusterKind, ClusterProgress, ClusterStatus, KubeKey, LogsState, MajorityGroups, PreparationStatus,
    ValidationsStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Field-level cluster update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ClusterStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validations_info: Option<ValidationsStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ClusterKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_vip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_vip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_vip_lease: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_vip_lease: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_vip_dns_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_networks: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_network_cidr_updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectivity_majority_groups: Option<MajorityGroups>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ClusterProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_installation_preparation: Option<PreparationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_installation_preparation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_started_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_completed_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller_logs_started_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller_logs_collected_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_info: Option<Option<LogsState>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ams_subscription_id: Option<String>,
}

impl ClusterUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ClusterUpdate::default()
    }

    /// Apply the populated fields to `cluster`
    pub fn apply(&self, cluster: &mut Cluster, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            if status != cluster.status {
                cluster.status_updated_at = Some(now);
            }
            cluster.status = status;
        }
        macro_rules! set {
            ($($field:ident),+ $(,)?) => {
                $(if let Some(value) = &self.$field {
                    cluster.$field = value.clone();
                })+
            };
        }
        set!(
            status_info,
            validations_info,
            kind,
            api_vip,
            ingress_vip,
            api_vip_lease,
            ingress_vip_lease,
            api_vip_dns_name,
            machine_networks,
            connectivity_majority_groups,
            progress,
            last_installation_preparation_reason,
            install_started_at,
            install_completed_at,
            controller_logs_started_at,
            controller_logs_collected_at,
            logs_info,
            ams_subscription_id,
        );
        if let Some(at) = self.machine_network_cidr_updated_at {
            cluster.machine_network_cidr_updated_at = Some(at);
        }
        if let Some(preparation) = self.last_installation_preparation {
            cluster.last_installation_preparation = Some(preparation);
        }
        cluster.updated_at = Some(now);
    }
}

/// Rows owned by a cluster that are purged before the cluster itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependentRecord {
    Events,
    MonitoredOperators,
    ClusterNetworks,
    ServiceNetworks,
    MachineNetworks,
    Hosts,
}

impl DependentRecord {
    pub const ALL: [DependentRecord; 6] = [
        DependentRecord::Events,
        DependentRecord::MonitoredOperators,
        DependentRecord::ClusterNetworks,
        DependentRecord::ServiceNetworks,
        DependentRecord::MachineNetworks,
        DependentRecord::Hosts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DependentRecord::Events => "events",
            DependentRecord::MonitoredOperators => "monitored-operators",
            DependentRecord::ClusterNetworks => "cluster-networks",
            DependentRecord::ServiceNetworks => "service-networks",
            DependentRecord::MachineNetworks => "machine-networks",
            DependentRecord::Hosts => "hosts",
        }
    }
}

impl fmt::Display for DependentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transactional cluster store
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    /// Cluster with its hosts; soft-deleted clusters are not found
    async fn get_cluster(&self, id: Uuid) -> Result<Cluster, StoreError>;

    async fn get_cluster_by_kube_key(&self, key: &KubeKey) -> Result<Cluster, StoreError>;

    /// Page of live clusters ordered by id
    async fn list_clusters(&self, offset: usize, limit: usize) -> Result<Vec<Cluster>, StoreError>;

    async fn insert_cluster(&self, cluster: &Cluster) -> Result<(), StoreError>;

    /// Apply `update`. With `expected_status` set the write only happens
    /// while the stored status still equals it, otherwise `Conflict`.
    async fn update_cluster(
        &self,
        id: Uuid,
        expected_status: Option<ClusterStatus>,
        update: &ClusterUpdate,
    ) -> Result<Cluster, StoreError>;

    /// Live clusters not updated since `since`
    async fn list_inactive_clusters(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Cluster>, StoreError>;

    async fn soft_delete_cluster(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Soft-deleted clusters deleted before `older_than`
    async fn list_deleted_clusters(&self, older_than: DateTime<Utc>) -> Result<Vec<Cluster>, StoreError>;

    async fn delete_dependent_records(&self, id: Uuid, kind: DependentRecord) -> Result<(), StoreError>;

    /// Remove the cluster row permanently
    async fn purge_cluster(&self, id: Uuid) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_sets_status_timestamp_on_change_only() {
        let mut cluster = Cluster::default();
        let t0 = Utc::now();
        let update = ClusterUpdate {
            status: Some(ClusterStatus::Ready),
            status_info: Some("ready".to_string()),
            ..Default::default()
        };
        update.apply(&mut cluster, t0);
        assert_eq!(cluster.status, ClusterStatus::Ready);
        assert_eq!(cluster.status_updated_at, Some(t0));

        let t1 = t0 + chrono::Duration::seconds(5);
        update.apply(&mut cluster, t1);
        assert_eq!(cluster.status_updated_at, Some(t0));
        assert_eq!(cluster.updated_at, Some(t1));
    }

    #[test]
    fn test_update_serializes_only_populated_fields() {
        let update = ClusterUpdate {
            logs_info: Some(Some(LogsState::Timeout)),
            install_started_at: Some(None),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({"logs_info": "timeout", "install_started_at": null})
        );
        assert!(ClusterUpdate::default().is_empty());
    }
}
