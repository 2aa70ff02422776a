//! Backend domain model
//!
//! Mirrors the cluster and host records of the installer backend. Statuses are
//! enums internally and only become strings at the serde boundary.

use crate::installer_args::InstallerArgs;
use crate::inventory::{ConnectivityReport, Inventory};
use crate::json_text;
use crate::validations::ValidationsStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Implements `as_str` and `Display` from a variant-to-wire-string table.
macro_rules! wire_names {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Wire form of the value
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Cluster lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterStatus {
    #[default]
    Insufficient,
    Ready,
    Error,
    PreparingForInstallation,
    PendingForInput,
    Installing,
    Finalizing,
    Installed,
    AddingHosts,
    Cancelled,
    InstallingPendingUserAction,
}

wire_names!(ClusterStatus {
    Insufficient => "insufficient",
    Ready => "ready",
    Error => "error",
    PreparingForInstallation => "preparing-for-installation",
    PendingForInput => "pending-for-input",
    Installing => "installing",
    Finalizing => "finalizing",
    Installed => "installed",
    AddingHosts => "adding-hosts",
    Cancelled => "cancelled",
    InstallingPendingUserAction => "installing-pending-user-action",
});

impl ClusterStatus {
    /// Every status, for exhaustive table checks
    pub const ALL: [ClusterStatus; 11] = [
        ClusterStatus::Insufficient,
        ClusterStatus::Ready,
        ClusterStatus::Error,
        ClusterStatus::PreparingForInstallation,
        ClusterStatus::PendingForInput,
        ClusterStatus::Installing,
        ClusterStatus::Finalizing,
        ClusterStatus::Installed,
        ClusterStatus::AddingHosts,
        ClusterStatus::Cancelled,
        ClusterStatus::InstallingPendingUserAction,
    ];
}

/// Host status. `*Unbound` variants apply while the host has no cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum HostStatus {
    Discovering,
    Known,
    Disconnected,
    Insufficient,
    Disabled,
    PreparingForInstallation,
    PreparingFailed,
    PreparingSuccessful,
    PendingForInput,
    Installing,
    InstallingInProgress,
    InstallingPendingUserAction,
    Resetting,
    ResettingPendingUserAction,
    Installed,
    Error,
    Cancelled,
    AddedToExistingCluster,
    Binding,
    Unbinding,
    UnbindingPendingUserAction,
    KnownUnbound,
    DisconnectedUnbound,
    InsufficientUnbound,
    DisabledUnbound,
    DiscoveringUnbound,
    Reclaiming,
    ReclaimingRebooting,
}

wire_names!(HostStatus {
    Discovering => "discovering",
    Known => "known",
    Disconnected => "disconnected",
    Insufficient => "insufficient",
    Disabled => "disabled",
    PreparingForInstallation => "preparing-for-installation",
    PreparingFailed => "preparing-failed",
    PreparingSuccessful => "preparing-successful",
    PendingForInput => "pending-for-input",
    Installing => "installing",
    InstallingInProgress => "installing-in-progress",
    InstallingPendingUserAction => "installing-pending-user-action",
    Resetting => "resetting",
    ResettingPendingUserAction => "resetting-pending-user-action",
    Installed => "installed",
    Error => "error",
    Cancelled => "cancelled",
    AddedToExistingCluster => "added-to-existing-cluster",
    Binding => "binding",
    Unbinding => "unbinding",
    UnbindingPendingUserAction => "unbinding-pending-user-action",
    KnownUnbound => "known-unbound",
    DisconnectedUnbound => "disconnected-unbound",
    InsufficientUnbound => "insufficient-unbound",
    DisabledUnbound => "disabled-unbound",
    DiscoveringUnbound => "discovering-unbound",
    Reclaiming => "reclaiming",
    ReclaimingRebooting => "reclaiming-rebooting",
});

impl HostStatus {
    /// Statuses of a host with no cluster assignment
    pub fn is_unbound(&self) -> bool {
        matches!(
            self,
            HostStatus::KnownUnbound
                | HostStatus::DisconnectedUnbound
                | HostStatus::InsufficientUnbound
                | HostStatus::DisabledUnbound
                | HostStatus::DiscoveringUnbound
        )
    }

    /// Statuses from which the Agent spec can no longer change host fields
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            HostStatus::PreparingForInstallation
                | HostStatus::PreparingSuccessful
                | HostStatus::Installing
                | HostStatus::InstallingInProgress
                | HostStatus::InstallingPendingUserAction
                | HostStatus::Installed
                | HostStatus::Error
                | HostStatus::Cancelled
                | HostStatus::AddedToExistingCluster
                | HostStatus::Resetting
                | HostStatus::ResettingPendingUserAction
        )
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, HostStatus::Disconnected | HostStatus::DisconnectedUnbound)
    }
}

/// Installation stage reported by a host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HostStage {
    #[serde(rename = "Starting installation")]
    StartingInstallation,
    #[serde(rename = "Waiting for control plane")]
    WaitingForControlPlane,
    #[serde(rename = "Waiting for bootkube")]
    WaitingForBootkube,
    #[serde(rename = "Waiting for controller")]
    WaitingForController,
    #[serde(rename = "Installing")]
    Installing,
    #[serde(rename = "Writing image to disk")]
    WritingImageToDisk,
    #[serde(rename = "Rebooting")]
    Rebooting,
    #[serde(rename = "Waiting for ignition")]
    WaitingForIgnition,
    #[serde(rename = "Configuring")]
    Configuring,
    #[serde(rename = "Joined")]
    Joined,
    #[serde(rename = "Done")]
    Done,
    #[serde(rename = "Failed")]
    Failed,
}

wire_names!(HostStage {
    StartingInstallation => "Starting installation",
    WaitingForControlPlane => "Waiting for control plane",
    WaitingForBootkube => "Waiting for bootkube",
    WaitingForController => "Waiting for controller",
    Installing => "Installing",
    WritingImageToDisk => "Writing image to disk",
    Rebooting => "Rebooting",
    WaitingForIgnition => "Waiting for ignition",
    Configuring => "Configuring",
    Joined => "Joined",
    Done => "Done",
    Failed => "Failed",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HostRole {
    #[default]
    AutoAssign,
    Master,
    Worker,
    Bootstrap,
}

wire_names!(HostRole {
    AutoAssign => "auto-assign",
    Master => "master",
    Worker => "worker",
    Bootstrap => "bootstrap",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ClusterKind {
    #[default]
    Cluster,
    AddHostsCluster,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum HostKind {
    #[default]
    Host,
    AddToExistingClusterHost,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum HighAvailabilityMode {
    #[default]
    Full,
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperatorType {
    Builtin,
    Olm,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperatorStatus {
    Available,
    Progressing,
    Failed,
}

/// Log collection state of a cluster or host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogsState {
    Requested,
    Collecting,
    Completed,
    Timeout,
}

/// Outcome of the last installation preparation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PreparationStatus {
    Preparing,
    Failed,
    Success,
}

/// Namespaced key of the Kubernetes resource mirroring a backend record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct KubeKey {
    pub namespace: String,
    pub name: String,
}

impl KubeKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for KubeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitoredOperator {
    pub name: String,
    pub operator_type: OperatorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OperatorStatus>,
    #[serde(default)]
    pub status_info: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClusterNetwork {
    pub cidr: String,
    #[serde(default)]
    pub host_prefix: u8,
}

/// Progress percentages, each 0..=100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClusterProgress {
    #[serde(default)]
    pub preparing_stage_percentage: i64,
    #[serde(default)]
    pub installing_stage_percentage: i64,
    #[serde(default)]
    pub finalizing_stage_percentage: i64,
    #[serde(default)]
    pub total_percentage: i64,
}

/// Hosts reachable within each network, keyed by CIDR or address family.
pub type MajorityGroups = BTreeMap<String, Vec<Uuid>>;

/// Cluster aggregate as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Cluster {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: ClusterKind,
    #[serde(default)]
    pub openshift_version: String,
    #[serde(default)]
    pub base_dns_domain: String,
    #[serde(default)]
    pub pull_secret_set: bool,
    pub status: ClusterStatus,
    #[serde(default)]
    pub status_info: String,
    #[serde(default)]
    pub status_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "json_text")]
    pub validations_info: ValidationsStatus,
    #[serde(default)]
    pub high_availability_mode: HighAvailabilityMode,
    #[serde(default)]
    pub user_managed_networking: bool,
    #[serde(default)]
    pub vip_dhcp_allocation: bool,
    #[serde(default)]
    pub api_vip: String,
    #[serde(default)]
    pub ingress_vip: String,
    #[serde(default)]
    pub api_vip_lease: String,
    #[serde(default)]
    pub ingress_vip_lease: String,
    #[serde(default)]
    pub api_vip_dns_name: String,
    #[serde(default)]
    pub machine_networks: Vec<String>,
    #[serde(default)]
    pub cluster_networks: Vec<ClusterNetwork>,
    #[serde(default)]
    pub service_networks: Vec<String>,
    #[serde(default)]
    pub machine_network_cidr_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "json_text")]
    pub connectivity_majority_groups: MajorityGroups,
    #[serde(default)]
    pub progress: ClusterProgress,
    #[serde(default)]
    pub last_installation_preparation: Option<PreparationStatus>,
    #[serde(default)]
    pub last_installation_preparation_reason: String,
    #[serde(default)]
    pub install_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub install_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub controller_logs_collected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub controller_logs_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub logs_info: Option<LogsState>,
    #[serde(default)]
    pub monitored_operators: Vec<MonitoredOperator>,
    #[serde(default)]
    pub ams_subscription_id: String,
    #[serde(default)]
    pub kube_key: Option<KubeKey>,
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Cluster {
    pub fn is_single_node(&self) -> bool {
        self.high_availability_mode == HighAvailabilityMode::None
    }

    pub fn is_day2(&self) -> bool {
        self.kind == ClusterKind::AddHostsCluster
    }

    /// Name of the discovery image object for this cluster
    pub fn discovery_image_key(&self) -> String {
        format!("discovery-image-{}.iso", self.id)
    }
}

/// Host install progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HostProgress {
    #[serde(default)]
    pub current_stage: Option<HostStage>,
    #[serde(default)]
    pub progress_info: String,
    #[serde(default)]
    pub stage_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stage_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NtpSource {
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub source_state: String,
}

/// Host record as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Host {
    pub id: Uuid,
    pub infra_env_id: Uuid,
    #[serde(default)]
    pub cluster_id: Option<Uuid>,
    pub status: HostStatus,
    #[serde(default)]
    pub status_info: String,
    #[serde(default)]
    pub kind: HostKind,
    #[serde(default)]
    pub role: HostRole,
    #[serde(default)]
    pub suggested_role: Option<HostRole>,
    #[serde(default)]
    pub bootstrap: bool,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub requested_hostname: String,
    #[serde(default, with = "json_text")]
    pub inventory: Option<Inventory>,
    #[serde(default)]
    pub installation_disk_id: String,
    #[serde(default)]
    pub installation_disk_path: String,
    #[serde(default, with = "json_text")]
    pub installer_args: InstallerArgs,
    #[serde(default)]
    pub ignition_config_overrides: String,
    #[serde(default)]
    pub ignition_endpoint_token: String,
    #[serde(default)]
    pub progress: Option<HostProgress>,
    #[serde(default, with = "json_text")]
    pub ntp_sources: Vec<NtpSource>,
    #[serde(default, with = "json_text")]
    pub validations_info: ValidationsStatus,
    #[serde(default, with = "json_text")]
    pub connectivity: ConnectivityReport,
    #[serde(default)]
    pub logs_collected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub logs_info: Option<LogsState>,
}

impl Host {
    /// Minimal host with the given ids, used as a starting point by builders
    pub fn new(id: Uuid, infra_env_id: Uuid, status: HostStatus) -> Self {
        Self {
            id,
            infra_env_id,
            cluster_id: None,
            status,
            status_info: String::new(),
            kind: HostKind::default(),
            role: HostRole::default(),
            suggested_role: None,
            bootstrap: false,
            approved: false,
            requested_hostname: String::new(),
            inventory: None,
            installation_disk_id: String::new(),
            installation_disk_path: String::new(),
            installer_args: InstallerArgs::default(),
            ignition_config_overrides: String::new(),
            ignition_endpoint_token: String::new(),
            progress: None,
            ntp_sources: Vec::new(),
            validations_info: ValidationsStatus::default(),
            connectivity: ConnectivityReport::default(),
            logs_collected_at: None,
            logs_info: None,
        }
    }

    /// Requested hostname, falling back to the discovered one
    pub fn hostname(&self) -> &str {
        if !self.requested_hostname.is_empty() {
            return &self.requested_hostname;
        }
        self.inventory.as_ref().map_or("", |i| i.hostname.as_str())
    }

    /// Role after resolving auto-assign to the suggested role
    pub fn effective_role(&self) -> HostRole {
        match (self.role, self.suggested_role) {
            (HostRole::AutoAssign, Some(suggested)) => suggested,
            (role, _) => role,
        }
    }

    pub fn current_stage(&self) -> Option<HostStage> {
        self.progress.as_ref().and_then(|p| p.current_stage)
    }
}

/// Disk role in a host update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DiskRole {
    None,
    Install,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskConfigParams {
    pub id: String,
    pub role: DiskRole,
}

/// Fields of a host update; only the populated ones are sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HostUpdateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_role: Option<HostRole>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks_selected_config: Vec<DiskConfigParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignition_endpoint_token: Option<String>,
}

impl HostUpdateParams {
    pub fn is_empty(&self) -> bool {
        self.host_name.is_none()
            && self.host_role.is_none()
            && self.disks_selected_config.is_empty()
            && self.ignition_endpoint_token.is_none()
    }
}
