//! Agent CRD
//!
//! Declarative mirror of a discovered host. The spec carries the desired host
//! configuration; the status is derived entirely by the agent controller from
//! the backend host and cluster records.

use crate::condition::Condition;
use crate::references::{ClusterReference, SecretReference};
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Finalizer that lets the controller deregister the backend host before the Agent goes away
pub const AGENT_FINALIZER: &str = "agent.agent-install.openshift.io/ai-deprovision";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "agent-install.openshift.io",
    version = "v1beta1",
    kind = "Agent",
    namespaced,
    status = "AgentStatus",
    shortname = "ag",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterDeploymentName.name"}"#,
    printcolumn = r#"{"name":"Approved","type":"boolean","jsonPath":".spec.approved"}"#,
    printcolumn = r#"{"name":"Role","type":"string","jsonPath":".status.role"}"#,
    printcolumn = r#"{"name":"Stage","type":"string","jsonPath":".status.progress.currentStage"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    /// Desired hostname (empty keeps the discovered one)
    #[serde(default)]
    pub hostname: String,

    /// Desired role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AgentRole>,

    /// Whether the host is approved for installation
    #[serde(default)]
    pub approved: bool,

    /// Disk id to install on (empty keeps the backend choice)
    #[serde(default)]
    pub installation_disk_id: String,

    /// Ignition config overrides as a JSON document
    #[serde(default)]
    pub ignition_config_overrides: String,

    /// Extra coreos-installer arguments as a JSON list of strings
    #[serde(default)]
    pub installer_args: String,

    /// ClusterDeployment this agent should join
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_deployment_name: Option<ClusterReference>,

    /// Secret holding a token for the ignition endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignition_endpoint_token_reference: Option<SecretReference>,
}

/// Role of an agent in the cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AgentRole {
    /// Let the backend pick
    #[default]
    AutoAssign,
    /// Control plane node
    Master,
    /// Compute node
    Worker,
    /// Bootstrap node
    Bootstrap,
}

impl AgentRole {
    /// Wire form of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::AutoAssign => "auto-assign",
            AgentRole::Master => "master",
            AgentRole::Worker => "worker",
            AgentRole::Bootstrap => "bootstrap",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Status conditions, one per type
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Hardware inventory summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<HostInventory>,

    /// Validation results by category
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub validations_info: BTreeMap<String, Vec<ValidationInfo>>,

    /// Installation progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<HostProgressInfo>,

    /// Effective role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AgentRole>,

    /// Whether this host bootstraps the control plane
    #[serde(default)]
    pub bootstrap: bool,

    /// Backend debugging pointers
    #[serde(default)]
    pub debug_info: DebugInfo,

    /// NTP sources reported by the host
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ntp_sources: Vec<HostNtpSource>,

    /// Disk selected for installation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_disk_id: Option<String>,
}

/// A single validation result.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationInfo {
    /// Validation id
    pub id: String,
    /// success, failure, pending or disabled
    pub status: String,
    /// Human-readable result
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    /// Backend host status
    #[serde(default)]
    pub state: String,

    /// Backend host status info
    #[serde(default)]
    pub state_info: String,

    /// Where to download host logs once collected
    #[serde(default, rename = "logsURL")]
    pub logs_url: String,

    /// Where to list host events
    #[serde(default, rename = "eventsURL")]
    pub events_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostProgressInfo {
    /// Current install stage
    #[serde(default)]
    pub current_stage: String,

    /// Free-form progress text
    #[serde(default)]
    pub progress_info: String,

    /// When the current stage started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_start_time: Option<DateTime<Utc>>,

    /// Last progress update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostNtpSource {
    /// NTP server name
    #[serde(default)]
    pub source_name: String,
    /// Synchronization state
    #[serde(default)]
    pub source_state: String,
}

/// Hardware inventory summary mirrored from the backend.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostInventory {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub bmc_address: String,
    #[serde(default)]
    pub system_vendor: HostSystemVendor,
    #[serde(default)]
    pub cpu: HostCpu,
    #[serde(default)]
    pub memory: HostMemory,
    #[serde(default)]
    pub interfaces: Vec<HostInterface>,
    #[serde(default)]
    pub disks: Vec<HostDisk>,
    #[serde(default)]
    pub boot_mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostSystemVendor {
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostCpu {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub clock_megahertz: f64,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostMemory {
    #[serde(default)]
    pub physical_bytes: i64,
    #[serde(default)]
    pub usable_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostInterface {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub ipv4_addresses: Vec<String>,
    #[serde(default)]
    pub ipv6_addresses: Vec<String>,
    #[serde(default)]
    pub speed_mbps: i64,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostDisk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub drive_type: String,
    #[serde(default)]
    pub size_bytes: i64,
    #[serde(default)]
    pub bootable: bool,
}
