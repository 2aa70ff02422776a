//! Hardware inventory and connectivity reports sent by the discovery agent.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Inventory {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub bmc_address: String,
    #[serde(default)]
    pub system_vendor: SystemVendor,
    #[serde(default)]
    pub cpu: Cpu,
    #[serde(default)]
    pub memory: Memory,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub disks: Vec<Disk>,
    #[serde(default)]
    pub boot: Boot,
}

impl Inventory {
    /// All interface addresses in CIDR notation, IPv4 first
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.interfaces
            .iter()
            .flat_map(|i| i.ipv4_addresses.iter())
            .chain(self.interfaces.iter().flat_map(|i| i.ipv6_addresses.iter()))
            .map(String::as_str)
    }

    /// Find a disk by id
    pub fn disk(&self, id: &str) -> Option<&Disk> {
        self.disks.iter().find(|d| d.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SystemVendor {
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Cpu {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub frequency: f64,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Memory {
    #[serde(default)]
    pub physical_bytes: i64,
    #[serde(default)]
    pub usable_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Interface {
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

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Disk {
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

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Boot {
    #[serde(default)]
    pub current_boot_mode: String,
}

/// Reachability of the other cluster hosts as seen from one host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConnectivityReport {
    #[serde(default)]
    pub remote_hosts: Vec<ConnectivityRemoteHost>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectivityRemoteHost {
    pub host_id: Uuid,
    #[serde(default)]
    pub l2_connectivity: Vec<L2Connectivity>,
    #[serde(default)]
    pub l3_connectivity: Vec<L3Connectivity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct L2Connectivity {
    #[serde(default)]
    pub outgoing_nic: String,
    #[serde(default)]
    pub remote_ip_address: String,
    #[serde(default)]
    pub remote_mac: String,
    #[serde(default)]
    pub successful: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct L3Connectivity {
    #[serde(default)]
    pub remote_ip_address: String,
    #[serde(default)]
    pub successful: bool,
}
