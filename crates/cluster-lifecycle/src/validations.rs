//! Cluster validation engine
//!
//! `evaluate` is a pure function of the cluster snapshot (hosts included):
//! the same snapshot always yields the same `ValidationsStatus`, which is what
//! makes diffing against the stored result meaningful.

use crate::network::{self, Cidr};
use assisted_client::{
    Cluster, HostRole, HostStatus, ValidationResult, ValidationStatus, ValidationsStatus,
};
use std::net::IpAddr;

pub const CATEGORY_NETWORK: &str = "network";
pub const CATEGORY_HOSTS_DATA: &str = "hosts-data";
pub const CATEGORY_CONFIGURATION: &str = "configuration";

pub const API_VIPS_DEFINED: &str = "api-vips-defined";
pub const API_VIPS_VALID: &str = "api-vips-valid";
pub const CLUSTER_CIDR_DEFINED: &str = "cluster-cidr-defined";
pub const INGRESS_VIPS_DEFINED: &str = "ingress-vips-defined";
pub const INGRESS_VIPS_VALID: &str = "ingress-vips-valid";
pub const MACHINE_CIDR_DEFINED: &str = "machine-cidr-defined";
pub const MACHINE_CIDR_EQUALS_CALCULATED: &str = "machine-cidr-equals-to-calculated-cidr";
pub const NETWORK_PREFIX_VALID: &str = "network-prefix-valid";
pub const NETWORKS_SAME_ADDRESS_FAMILIES: &str = "networks-same-address-families";
pub const SERVICE_CIDR_DEFINED: &str = "service-cidr-defined";
pub const ALL_HOSTS_READY: &str = "all-hosts-are-ready-to-install";
pub const SUFFICIENT_MASTERS_COUNT: &str = "sufficient-masters-count";
pub const DNS_DOMAIN_DEFINED: &str = "dns-domain-defined";
pub const PULL_SECRET_SET: &str = "pull-secret-set";

/// Validations whose failure means the user still has to supply input
pub const REQUIRED_INPUT: [&str; 7] = [
    MACHINE_CIDR_DEFINED,
    CLUSTER_CIDR_DEFINED,
    SERVICE_CIDR_DEFINED,
    API_VIPS_DEFINED,
    INGRESS_VIPS_DEFINED,
    DNS_DOMAIN_DEFINED,
    PULL_SECRET_SET,
];

const MASTERS_FOR_HA: usize = 3;

/// Run every day-1 check. Day-2 clusters have no cluster-level checks.
pub fn evaluate(cluster: &Cluster) -> ValidationsStatus {
    let mut status = ValidationsStatus::new();
    if cluster.is_day2() {
        return status;
    }

    status.push(CATEGORY_NETWORK, vips_defined(cluster, API_VIPS_DEFINED, "API", &cluster.api_vip));
    status.push(CATEGORY_NETWORK, vip_valid(cluster, API_VIPS_VALID, "API", &cluster.api_vip));
    status.push(CATEGORY_NETWORK, cluster_cidr_defined(cluster));
    status.push(
        CATEGORY_NETWORK,
        vips_defined(cluster, INGRESS_VIPS_DEFINED, "Ingress", &cluster.ingress_vip),
    );
    status.push(
        CATEGORY_NETWORK,
        vip_valid(cluster, INGRESS_VIPS_VALID, "Ingress", &cluster.ingress_vip),
    );
    status.push(CATEGORY_NETWORK, machine_cidr_defined(cluster));
    status.push(CATEGORY_NETWORK, machine_cidr_equals_calculated(cluster));
    status.push(CATEGORY_NETWORK, network_prefix_valid(cluster));
    status.push(CATEGORY_NETWORK, networks_same_address_families(cluster));
    status.push(CATEGORY_NETWORK, service_cidr_defined(cluster));

    status.push(CATEGORY_HOSTS_DATA, all_hosts_ready(cluster));
    status.push(CATEGORY_HOSTS_DATA, sufficient_masters_count(cluster));

    status.push(CATEGORY_CONFIGURATION, dns_domain_defined(cluster));
    status.push(CATEGORY_CONFIGURATION, pull_secret_set(cluster));

    status
}

/// True when a required-input validation is failing
pub fn is_required_input_missing(validations: &ValidationsStatus) -> bool {
    REQUIRED_INPUT.iter().any(|id| {
        validations
            .get(id)
            .is_some_and(|v| v.status == ValidationStatus::Failure)
    })
}

/// True when every enabled validation succeeds
pub fn all_pass(validations: &ValidationsStatus) -> bool {
    validations
        .iter()
        .all(|(_, v)| matches!(v.status, ValidationStatus::Success | ValidationStatus::Disabled))
}

/// A fresh result carries less information than the stored one when it is
/// empty or has fewer entries; it must not overwrite the stored one.
pub fn is_informative(stored: &ValidationsStatus, fresh: &ValidationsStatus) -> bool {
    !fresh.is_empty() && fresh.len() >= stored.len()
}

/// Status change of one validation between two results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationChange {
    pub id: String,
    pub previous: Option<ValidationStatus>,
    pub current: ValidationStatus,
    pub message: String,
}

impl ValidationChange {
    /// success -> failure
    pub fn is_failure(&self) -> bool {
        self.previous == Some(ValidationStatus::Success) && self.current == ValidationStatus::Failure
    }

    /// failure -> success
    pub fn is_fixed(&self) -> bool {
        self.previous == Some(ValidationStatus::Failure) && self.current == ValidationStatus::Success
    }
}

/// Validations whose status differs between `stored` and `fresh`, by id
pub fn diff(stored: &ValidationsStatus, fresh: &ValidationsStatus) -> Vec<ValidationChange> {
    let mut changes: Vec<ValidationChange> = fresh
        .iter()
        .filter_map(|(_, current)| {
            let previous = stored.get(&current.id).map(|v| v.status);
            (previous != Some(current.status)).then(|| ValidationChange {
                id: current.id.clone(),
                previous,
                current: current.status,
                message: current.message.clone(),
            })
        })
        .collect();
    changes.sort_by(|a, b| a.id.cmp(&b.id));
    changes
}

fn success(id: &str, message: impl Into<String>) -> ValidationResult {
    ValidationResult::new(id, ValidationStatus::Success, message)
}

fn failure(id: &str, message: impl Into<String>) -> ValidationResult {
    ValidationResult::new(id, ValidationStatus::Failure, message)
}

fn pending(id: &str, message: impl Into<String>) -> ValidationResult {
    ValidationResult::new(id, ValidationStatus::Pending, message)
}

fn vips_required(cluster: &Cluster) -> bool {
    !cluster.user_managed_networking
}

fn vips_defined(cluster: &Cluster, id: &str, kind: &str, vip: &str) -> ValidationResult {
    if !vips_required(cluster) {
        return success(
            id,
            format!("{} virtual IPs are not required: User Managed Networking", kind),
        );
    }
    if vip.is_empty() {
        if cluster.vip_dhcp_allocation {
            return pending(id, format!("{} virtual IPs are waiting to be allocated by DHCP", kind));
        }
        return failure(id, format!("{} virtual IPs are undefined and must be provided.", kind));
    }
    success(id, format!("{} virtual IPs are defined.", kind))
}

fn first_machine_network(cluster: &Cluster) -> Option<Cidr> {
    cluster.machine_networks.first().and_then(|c| c.parse::<Cidr>().ok())
}

fn vip_valid(cluster: &Cluster, id: &str, kind: &str, vip: &str) -> ValidationResult {
    if !vips_required(cluster) {
        return success(
            id,
            format!("{} virtual IPs are not required: User Managed Networking", kind),
        );
    }
    if vip.is_empty() {
        return pending(id, format!("{} virtual IPs are undefined.", kind));
    }
    let Ok(ip) = vip.parse::<IpAddr>() else {
        return failure(id, format!("{} virtual IP {} is not a valid IP address", kind, vip));
    };
    let Some(machine_network) = first_machine_network(cluster) else {
        return pending(id, "Machine Network CIDR is undefined.");
    };
    if !machine_network.contains(ip) {
        return failure(
            id,
            format!(
                "{} virtual IP {} does not belong to machine-network-cidr {}",
                kind,
                vip,
                machine_network.network()
            ),
        );
    }
    if cluster.api_vip == cluster.ingress_vip {
        return failure(id, "API and Ingress virtual IPs must be different.");
    }
    success(id, format!("{} virtual IP {} belongs to the Machine CIDR.", kind, vip))
}

fn cluster_cidr_defined(cluster: &Cluster) -> ValidationResult {
    if cluster.cluster_networks.is_empty() {
        return failure(CLUSTER_CIDR_DEFINED, "The Cluster Network CIDR is undefined.");
    }
    success(CLUSTER_CIDR_DEFINED, "The Cluster Network CIDR is defined.")
}

fn service_cidr_defined(cluster: &Cluster) -> ValidationResult {
    if cluster.service_networks.is_empty() {
        return failure(SERVICE_CIDR_DEFINED, "The Service Network CIDR is undefined.");
    }
    success(SERVICE_CIDR_DEFINED, "The Service Network CIDR is defined.")
}

fn machine_cidr_defined(cluster: &Cluster) -> ValidationResult {
    if cluster.user_managed_networking && !cluster.is_single_node() {
        return success(
            MACHINE_CIDR_DEFINED,
            "No Machine Network CIDR needed: User Managed Networking",
        );
    }
    if cluster.machine_networks.is_empty() {
        if cluster.vip_dhcp_allocation {
            return failure(MACHINE_CIDR_DEFINED, "The Machine Network CIDR is undefined.");
        }
        return failure(
            MACHINE_CIDR_DEFINED,
            "The Machine Network CIDR is undefined; the Machine Network CIDR can be defined by setting either the API or Ingress virtual IPs.",
        );
    }
    success(MACHINE_CIDR_DEFINED, "The Machine Network CIDR is defined.")
}

fn machine_cidr_equals_calculated(cluster: &Cluster) -> ValidationResult {
    let id = MACHINE_CIDR_EQUALS_CALCULATED;
    if cluster.user_managed_networking {
        return success(id, "The Cluster Machine CIDR is not required: User Managed Networking");
    }
    if cluster.vip_dhcp_allocation {
        return success(id, "The Cluster Machine CIDR will be calculated on DHCP");
    }
    let (Ok(api_vip), Some(machine_network)) = (cluster.api_vip.parse::<IpAddr>(), first_machine_network(cluster))
    else {
        return pending(
            id,
            "Make sure all hosts are discovered and the API virtual IP is defined.",
        );
    };
    let calculated = network::networks_containing(cluster, api_vip);
    let Some(calculated) = calculated.into_iter().next() else {
        return failure(
            id,
            format!("Cannot calculate machine CIDR: no host network contains the API virtual IP {}", api_vip),
        );
    };
    if calculated == machine_network.network() {
        return success(id, "The Cluster Machine CIDR is equivalent to the calculated CIDR.");
    }
    failure(
        id,
        format!(
            "The Cluster Machine CIDR {} is different than the calculated CIDR {}.",
            machine_network, calculated
        ),
    )
}

fn network_prefix_valid(cluster: &Cluster) -> ValidationResult {
    let id = NETWORK_PREFIX_VALID;
    if cluster.cluster_networks.is_empty() {
        return pending(id, "The Cluster Network CIDR is undefined.");
    }
    for net in &cluster.cluster_networks {
        let Ok(cidr) = net.cidr.parse::<Cidr>() else {
            return failure(id, format!("Cluster network {} is not a valid CIDR.", net.cidr));
        };
        let max_host_prefix = match cidr.family() {
            network::AddressFamily::IPv4 => 30,
            network::AddressFamily::IPv6 => 126,
        };
        if net.host_prefix <= cidr.prefix() || net.host_prefix > max_host_prefix {
            return failure(
                id,
                format!("Host prefix {} is not valid for cluster network {}.", net.host_prefix, net.cidr),
            );
        }
        // Every host needs its own subnet
        let subnets = 1u128.checked_shl(u32::from(net.host_prefix - cidr.prefix())).unwrap_or(u128::MAX);
        if subnets < cluster.hosts.len() as u128 {
            return failure(
                id,
                format!(
                    "Cluster network {} with host prefix {} cannot hold {} hosts.",
                    net.cidr,
                    net.host_prefix,
                    cluster.hosts.len()
                ),
            );
        }
    }
    success(id, "The Cluster Network prefix is valid.")
}

fn networks_same_address_families(cluster: &Cluster) -> ValidationResult {
    let id = NETWORKS_SAME_ADDRESS_FAMILIES;
    let machine = network::families(cluster.machine_networks.iter().map(String::as_str));
    let cluster_nets = network::families(cluster.cluster_networks.iter().map(|n| n.cidr.as_str()));
    let service = network::families(cluster.service_networks.iter().map(String::as_str));

    let machine_required = !(cluster.user_managed_networking && !cluster.is_single_node());
    if cluster_nets.is_empty() || service.is_empty() || (machine_required && machine.is_empty()) {
        return pending(id, "At least one of the networks is undefined.");
    }
    if cluster_nets != service || (machine_required && machine != cluster_nets) {
        return failure(id, "Address families of the defined networks are not the same.");
    }
    success(id, "Same address families for all networks.")
}

fn all_hosts_ready(cluster: &Cluster) -> ValidationResult {
    let not_ready = cluster
        .hosts
        .iter()
        .filter(|h| h.status != HostStatus::Known)
        .count();
    if not_ready > 0 {
        return failure(ALL_HOSTS_READY, "The cluster has hosts that are not ready to install.");
    }
    success(ALL_HOSTS_READY, "All hosts in the cluster are ready to install.")
}

fn sufficient_masters_count(cluster: &Cluster) -> ValidationResult {
    let id = SUFFICIENT_MASTERS_COUNT;
    if cluster.is_single_node() {
        let workers = cluster
            .hosts
            .iter()
            .filter(|h| h.effective_role() == HostRole::Worker)
            .count();
        if cluster.hosts.len() == 1 && workers == 0 {
            return success(id, "The cluster has the exact amount of dedicated control plane nodes.");
        }
        return failure(id, "Single-node clusters must have a single control plane node and no workers.");
    }

    let masters = cluster
        .hosts
        .iter()
        .filter(|h| matches!(h.effective_role(), HostRole::Master | HostRole::Bootstrap))
        .count();
    let auto_assign = cluster
        .hosts
        .iter()
        .filter(|h| h.effective_role() == HostRole::AutoAssign)
        .count();
    if masters == MASTERS_FOR_HA || (masters < MASTERS_FOR_HA && masters + auto_assign >= MASTERS_FOR_HA) {
        return success(id, "The cluster has the exact amount of dedicated control plane nodes.");
    }
    failure(
        id,
        "Clusters must have exactly 3 dedicated control plane nodes. Add or remove hosts, or change their roles configurations to meet the requirement.",
    )
}

fn dns_domain_defined(cluster: &Cluster) -> ValidationResult {
    if cluster.base_dns_domain.is_empty() {
        return failure(DNS_DOMAIN_DEFINED, "The base domain is undefined and must be provided.");
    }
    success(DNS_DOMAIN_DEFINED, "The base domain is defined.")
}

fn pull_secret_set(cluster: &Cluster) -> ValidationResult {
    if !cluster.pull_secret_set {
        return failure(PULL_SECRET_SET, "The pull secret is not set.");
    }
    success(PULL_SECRET_SET, "The pull secret is set.")
}
