//! Network helpers
//!
//! CIDR arithmetic over `std::net`, candidate machine networks derived from
//! host inventories, and connectivity majority groups.

use assisted_client::{Cluster, Host, MajorityGroups};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

/// Address family of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressFamily {
    IPv4,
    IPv6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::IPv4 => f.write_str("IPv4"),
            AddressFamily::IPv6 => f.write_str("IPv6"),
        }
    }
}

/// An address with a prefix length, e.g. `10.0.0.5/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

/// CIDR parse failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid CIDR: {0}")]
pub struct CidrParseError(pub String);

impl FromStr for Cidr {
    type Err = CidrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(|| CidrParseError(s.to_string()))?;
        let addr: IpAddr = addr.parse().map_err(|_| CidrParseError(s.to_string()))?;
        let prefix: u8 = prefix.parse().map_err(|_| CidrParseError(s.to_string()))?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(CidrParseError(s.to_string()));
        }
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl Cidr {
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn family(&self) -> AddressFamily {
        family_of(self.addr)
    }

    /// Same prefix with host bits cleared
    #[must_use]
    pub fn network(&self) -> Cidr {
        let addr = match self.addr {
            IpAddr::V4(v4) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                IpAddr::V4((u32::from(v4) & mask).into())
            }
            IpAddr::V6(v6) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                IpAddr::V6((u128::from(v6) & mask).into())
            }
        };
        Cidr {
            addr,
            prefix: self.prefix,
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        if family_of(ip) != self.family() {
            return false;
        }
        Cidr {
            addr: ip,
            prefix: self.prefix,
        }
        .network()
            == self.network()
    }
}

pub fn family_of(ip: IpAddr) -> AddressFamily {
    match ip {
        IpAddr::V4(_) => AddressFamily::IPv4,
        IpAddr::V6(_) => AddressFamily::IPv6,
    }
}

/// Address families of a list of CIDR strings; unparseable entries are skipped
pub fn families<'a>(cidrs: impl IntoIterator<Item = &'a str>) -> BTreeSet<AddressFamily> {
    cidrs
        .into_iter()
        .filter_map(|c| c.parse::<Cidr>().ok())
        .map(|c| c.family())
        .collect()
}

/// Interface addresses of a host as parsed CIDRs
pub fn host_addresses(host: &Host) -> Vec<Cidr> {
    host.inventory
        .as_ref()
        .map(|inv| inv.addresses().filter_map(|a| a.parse::<Cidr>().ok()).collect())
        .unwrap_or_default()
}

/// Networks on which every inventoried host has an address, ordered
pub fn common_host_networks(cluster: &Cluster) -> BTreeSet<Cidr> {
    let mut common: Option<BTreeSet<Cidr>> = None;
    for host in cluster.hosts.iter().filter(|h| h.inventory.is_some()) {
        let networks: BTreeSet<Cidr> = host_addresses(host).iter().map(Cidr::network).collect();
        common = Some(match common {
            None => networks,
            Some(acc) => acc.intersection(&networks).copied().collect(),
        });
    }
    common.unwrap_or_default()
}

/// Host networks containing the given address
pub fn networks_containing(cluster: &Cluster, ip: IpAddr) -> BTreeSet<Cidr> {
    cluster
        .hosts
        .iter()
        .flat_map(host_addresses)
        .map(|c| c.network())
        .filter(|net| net.contains(ip))
        .collect()
}

/// Network facts the lifecycle manager needs from host inventories.
pub trait NetworkCalculator: Send + Sync {
    /// Candidate machine networks shared by all hosts of the cluster
    fn candidate_machine_networks(&self, cluster: &Cluster) -> Vec<Cidr>;

    /// Hosts mutually reachable within each network
    fn majority_groups(&self, cluster: &Cluster) -> MajorityGroups;
}

/// Derives networks and majority groups from the inventory and
/// connectivity reports carried on each host.
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryNetworkCalculator;

impl NetworkCalculator for InventoryNetworkCalculator {
    fn candidate_machine_networks(&self, cluster: &Cluster) -> Vec<Cidr> {
        common_host_networks(cluster).into_iter().collect()
    }

    fn majority_groups(&self, cluster: &Cluster) -> MajorityGroups {
        let mut groups = MajorityGroups::new();

        let all_networks: BTreeSet<Cidr> = cluster
            .hosts
            .iter()
            .flat_map(host_addresses)
            .map(|c| c.network())
            .collect();

        for network in all_networks {
            let members: Vec<&Host> = cluster
                .hosts
                .iter()
                .filter(|h| host_addresses(h).iter().any(|a| network.contains(a.addr())))
                .collect();
            let group = largest_group(&members, |a, b| l2_reachable(a, b, &network));
            groups.insert(network.to_string(), group);
        }

        for family in [AddressFamily::IPv4, AddressFamily::IPv6] {
            let members: Vec<&Host> = cluster
                .hosts
                .iter()
                .filter(|h| host_addresses(h).iter().any(|a| a.family() == family))
                .collect();
            if members.is_empty() {
                continue;
            }
            let group = largest_group(&members, |a, b| l3_reachable(a, b, family));
            groups.insert(family.to_string(), group);
        }

        groups
    }
}

fn remote_report(from: &Host, to: Uuid) -> Option<&assisted_client::ConnectivityRemoteHost> {
    from.connectivity.remote_hosts.iter().find(|r| r.host_id == to)
}

fn l2_reachable(from: &Host, to: &Host, network: &Cidr) -> bool {
    remote_report(from, to.id).is_some_and(|r| {
        r.l2_connectivity.iter().any(|l2| {
            l2.successful
                && l2
                    .remote_ip_address
                    .parse::<IpAddr>()
                    .is_ok_and(|ip| network.contains(ip))
        })
    })
}

fn l3_reachable(from: &Host, to: &Host, family: AddressFamily) -> bool {
    remote_report(from, to.id).is_some_and(|r| {
        r.l3_connectivity.iter().any(|l3| {
            l3.successful
                && l3
                    .remote_ip_address
                    .parse::<IpAddr>()
                    .is_ok_and(|ip| family_of(ip) == family)
        })
    })
}

/// Largest set of hosts that are pairwise reachable in both directions.
///
/// Greedy from every starting host in id order; ties keep the first found,
/// so the result is deterministic for a given input.
fn largest_group<F>(hosts: &[&Host], reachable: F) -> Vec<Uuid>
where
    F: Fn(&Host, &Host) -> bool,
{
    let mut sorted: Vec<&Host> = hosts.to_vec();
    sorted.sort_by_key(|h| h.id);

    let connected = |a: &Host, b: &Host| reachable(a, b) && reachable(b, a);

    let mut best: Vec<&Host> = Vec::new();
    for (start, seed) in sorted.iter().enumerate() {
        let mut group = vec![*seed];
        for candidate in sorted.iter().skip(start + 1) {
            if group.iter().all(|member| connected(*member, *candidate)) {
                group.push(*candidate);
            }
        }
        if group.len() > best.len() {
            best = group;
        }
    }

    // A lone host is not a majority of anything
    if best.len() < 2 {
        return Vec::new();
    }
    let mut ids: Vec<Uuid> = best.iter().map(|h| h.id).collect();
    ids.sort();
    ids
}

/// Candidate networks grouped by address family, input order kept
pub fn candidates_by_family(candidates: &[Cidr]) -> BTreeMap<AddressFamily, Vec<Cidr>> {
    let mut by_family: BTreeMap<AddressFamily, Vec<Cidr>> = BTreeMap::new();
    for cidr in candidates {
        by_family.entry(cidr.family()).or_default().push(*cidr);
    }
    by_family
}
