//! Shared builders for unit tests

use crate::config::LifecycleConfig;
use crate::error::CollaboratorError;
use crate::events::{Events, RecordingEventSink};
use crate::manager::ClusterManager;
use crate::metrics::MetricsApi;
use crate::objectstore::MemoryObjectStore;
use crate::store::MemoryClusterStore;
use assisted_client::{
    Cluster, ClusterKind, ClusterNetwork, ClusterStatus, HighAvailabilityMode, Host, HostProgress, HostRole,
    HostStage, HostStatus, Interface, Inventory,
};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const TEST_CLUSTER_ID: Uuid = Uuid::from_u128(0x0c1a_57e4);
pub const TEST_INFRA_ENV_ID: Uuid = Uuid::from_u128(0x1eaf);

fn host(index: u128, status: HostStatus, role: HostRole) -> Host {
    let mut host = Host::new(Uuid::from_u128(index), TEST_INFRA_ENV_ID, status);
    host.cluster_id = Some(TEST_CLUSTER_ID);
    host.role = role;
    host.requested_hostname = format!("host-{}", index);
    host.inventory = Some(Inventory {
        hostname: format!("host-{}", index),
        interfaces: vec![Interface {
            name: "eth0".to_string(),
            ipv4_addresses: vec![format!("192.168.111.{}/24", 10 + index)],
            ..Default::default()
        }],
        ..Default::default()
    });
    host
}

pub fn master_host(index: u128, status: HostStatus) -> Host {
    host(index, status, HostRole::Master)
}

pub fn worker_host(index: u128, status: HostStatus) -> Host {
    host(index, status, HostRole::Worker)
}

/// Three known masters with every validation passing
pub fn ready_cluster() -> Cluster {
    Cluster {
        id: TEST_CLUSTER_ID,
        name: "test-cluster".to_string(),
        kind: ClusterKind::Cluster,
        openshift_version: "4.14".to_string(),
        base_dns_domain: "example.com".to_string(),
        pull_secret_set: true,
        status: ClusterStatus::Ready,
        status_updated_at: Some(Utc::now()),
        high_availability_mode: HighAvailabilityMode::Full,
        api_vip: "192.168.111.100".to_string(),
        ingress_vip: "192.168.111.101".to_string(),
        machine_networks: vec!["192.168.111.0/24".to_string()],
        cluster_networks: vec![ClusterNetwork {
            cidr: "10.128.0.0/14".to_string(),
            host_prefix: 23,
        }],
        service_networks: vec!["172.30.0.0/16".to_string()],
        hosts: (1..=3).map(|i| master_host(i, HostStatus::Known)).collect(),
        ..Default::default()
    }
}

/// `ready_cluster` moved into installation with every host installing
pub fn installing_cluster() -> Cluster {
    let mut cluster = ready_cluster();
    cluster.status = ClusterStatus::Installing;
    cluster.last_installation_preparation = Some(assisted_client::PreparationStatus::Success);
    cluster.install_started_at = Some(Utc::now());
    cluster.progress.preparing_stage_percentage = 100;
    for host in &mut cluster.hosts {
        host.status = HostStatus::Installing;
    }
    cluster
}

pub fn set_stage(host: &mut Host, stage: HostStage) {
    let progress = host.progress.get_or_insert_with(HostProgress::default);
    progress.current_stage = Some(stage);
}

/// Metrics recorder; each call is kept as `name:labels`
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingMetrics {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::default(),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, name: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.starts_with(name)).collect()
    }

    fn record(&self, call: String) -> Result<(), CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::new("metrics backend unavailable"));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl MetricsApi for RecordingMetrics {
    fn cluster_validation_failed(&self, _cluster_id: Uuid, validation_id: &str) -> Result<(), CollaboratorError> {
        self.record(format!("cluster_validation_failed:{}", validation_id))
    }

    fn host_validation_failed(&self, _host_id: Uuid, validation_id: &str) -> Result<(), CollaboratorError> {
        self.record(format!("host_validation_failed:{}", validation_id))
    }

    fn cluster_validation_changed(&self, _cluster_id: Uuid, validation_id: &str, status: &str) -> Result<(), CollaboratorError> {
        self.record(format!("cluster_validation_changed:{}:{}", validation_id, status))
    }

    fn installation_completed(&self, _cluster_id: Uuid, result: &str, _duration: Option<Duration>) -> Result<(), CollaboratorError> {
        self.record(format!("installation_completed:{}", result))
    }

    fn monitored_clusters(&self, count: usize) -> Result<(), CollaboratorError> {
        self.record(format!("monitored_clusters:{}", count))
    }

    fn monitor_duration(&self, _duration: Duration) -> Result<(), CollaboratorError> {
        self.record("monitor_duration".to_string())
    }
}

/// Manager wired to in-memory collaborators the test can inspect
pub struct Harness {
    pub manager: ClusterManager,
    pub store: MemoryClusterStore,
    pub objects: MemoryObjectStore,
    pub events: RecordingEventSink,
    pub metrics: Arc<RecordingMetrics>,
}

pub fn harness() -> Harness {
    harness_with_metrics(RecordingMetrics::default())
}

pub fn harness_with_metrics(metrics: RecordingMetrics) -> Harness {
    let store = MemoryClusterStore::new();
    let objects = MemoryObjectStore::new();
    let events = RecordingEventSink::new();
    let metrics = Arc::new(metrics);
    let manager = ClusterManager::new(
        LifecycleConfig::default(),
        Arc::new(store.clone()),
        Arc::new(objects.clone()),
    )
    .unwrap()
    .with_events(Events::new(Arc::new(events.clone())))
    .with_metrics(metrics.clone());
    Harness {
        manager,
        store,
        objects,
        events,
        metrics,
    }
}
