//! Node CSR approval for hosts added to an existing cluster.
//!
//! A day-2 host reboots into the spoke cluster and its kubelet asks for two
//! certificates. First a client certificate, requested by the node
//! bootstrapper service account before the Node exists. Then a serving
//! certificate, requested by the node itself once it has registered. Both are
//! approved only when the request names this host and, for serving
//! certificates, only the addresses the Node reports.

use super::spoke::{SpokeClient, SpokeError};
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, info};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::FromDer;

/// Service account that requests kubelet client certificates
pub const NODE_BOOTSTRAPPER_USERNAME: &str =
    "system:serviceaccount:openshift-machine-config-operator:node-bootstrapper";
/// Username prefix of node identities
pub const NODE_USER_PREFIX: &str = "system:node:";
/// Organization of node identities
pub const NODE_GROUP: &str = "system:nodes";

const USAGE_DIGITAL_SIGNATURE: &str = "digital signature";
const USAGE_KEY_ENCIPHERMENT: &str = "key encipherment";
const USAGE_CLIENT_AUTH: &str = "client auth";
const USAGE_SERVER_AUTH: &str = "server auth";

/// Where the joining node stands on the spoke cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeProgress {
    /// Waiting for certificates or for the Node to become Ready
    Joining,
    /// The Node is Ready
    Ready,
}

/// Identity fields of a PEM-encoded certificate request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    pub common_name: String,
    pub organizations: Vec<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
}

/// Parse the request carried by a CSR, `None` when it is not a valid PEM request
pub fn parse_request(pem: &[u8]) -> Option<RequestIdentity> {
    let (_, pem) = parse_x509_pem(pem).ok()?;
    let (_, request) = X509CertificationRequest::from_der(&pem.contents).ok()?;
    let subject = &request.certification_request_info.subject;

    let mut identity = RequestIdentity {
        common_name: subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string(),
        organizations: subject
            .iter_organization()
            .filter_map(|o| o.as_str().ok())
            .map(str::to_string)
            .collect(),
        ..RequestIdentity::default()
    };

    if let Some(extensions) = request.requested_extensions() {
        for extension in extensions {
            let ParsedExtension::SubjectAlternativeName(san) = extension else {
                continue;
            };
            for name in &san.general_names {
                match name {
                    GeneralName::DNSName(dns) => identity.dns_names.push((*dns).to_string()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            identity.ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    Some(identity)
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    if let Ok(v4) = <[u8; 4]>::try_from(bytes) {
        return Some(IpAddr::V4(Ipv4Addr::from(v4)));
    }
    <[u8; 16]>::try_from(bytes).ok().map(|v6| IpAddr::V6(Ipv6Addr::from(v6)))
}

/// True once the CSR carries an Approved or Denied condition
pub fn is_decided(csr: &CertificateSigningRequest) -> bool {
    csr.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| (c.type_ == "Approved" || c.type_ == "Denied") && c.status == "True")
        })
}

fn usages(csr: &CertificateSigningRequest) -> BTreeSet<&str> {
    csr.spec.usages.iter().flatten().map(String::as_str).collect()
}

fn is_node_identity(identity: &RequestIdentity, hostname: &str) -> bool {
    identity.common_name == format!("{}{}", NODE_USER_PREFIX, hostname)
        && identity.organizations.len() == 1
        && identity.organizations[0] == NODE_GROUP
}

/// Kubelet client certificate request for `hostname`
pub fn is_client_csr_for(csr: &CertificateSigningRequest, hostname: &str) -> bool {
    if csr.spec.username.as_deref() != Some(NODE_BOOTSTRAPPER_USERNAME) {
        return false;
    }
    let usages = usages(csr);
    let with_encipherment = BTreeSet::from([USAGE_DIGITAL_SIGNATURE, USAGE_KEY_ENCIPHERMENT, USAGE_CLIENT_AUTH]);
    let without_encipherment = BTreeSet::from([USAGE_DIGITAL_SIGNATURE, USAGE_CLIENT_AUTH]);
    if usages != with_encipherment && usages != without_encipherment {
        return false;
    }
    parse_request(&csr.spec.request.0).is_some_and(|identity| {
        is_node_identity(&identity, hostname) && identity.dns_names.is_empty() && identity.ip_addresses.is_empty()
    })
}

/// Kubelet serving certificate request for `hostname` listing only `addresses`
pub fn is_server_csr_for(csr: &CertificateSigningRequest, hostname: &str, addresses: &[IpAddr]) -> bool {
    if csr.spec.username.as_deref() != Some(format!("{}{}", NODE_USER_PREFIX, hostname).as_str()) {
        return false;
    }
    let usages = usages(csr);
    let allowed = BTreeSet::from([USAGE_DIGITAL_SIGNATURE, USAGE_KEY_ENCIPHERMENT, USAGE_SERVER_AUTH]);
    if !usages.contains(USAGE_SERVER_AUTH) || !usages.is_subset(&allowed) {
        return false;
    }
    let Some(identity) = parse_request(&csr.spec.request.0) else {
        return false;
    };
    is_node_identity(&identity, hostname)
        && identity.dns_names.iter().any(|d| d == hostname)
        && identity.dns_names.iter().all(|d| d == hostname)
        && !identity.ip_addresses.is_empty()
        && identity.ip_addresses.iter().all(|ip| addresses.contains(ip))
}

/// The Node reports a Ready condition with status True
pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

/// IP addresses the Node reports
pub fn node_addresses(node: &Node) -> Vec<IpAddr> {
    node.status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .into_iter()
        .flatten()
        .filter(|a| a.type_ == "InternalIP" || a.type_ == "ExternalIP")
        .filter_map(|a| a.address.parse().ok())
        .collect()
}

async fn approve_matching(
    client: &dyn SpokeClient,
    matches: impl Fn(&CertificateSigningRequest) -> bool,
    kind: &str,
    hostname: &str,
) -> Result<usize, SpokeError> {
    let mut approved = 0;
    for csr in client.list_csrs().await? {
        if is_decided(&csr) || !matches(&csr) {
            continue;
        }
        client.approve_csr(&csr).await?;
        approved += 1;
        info!(
            "Approved {} CSR {} for node {}",
            kind,
            csr.metadata.name.as_deref().unwrap_or(""),
            hostname
        );
    }
    Ok(approved)
}

/// One pass of the bootstrap: approve whatever the node is waiting for and
/// report whether it has become Ready
pub async fn bootstrap_node(client: &dyn SpokeClient, hostname: &str) -> Result<NodeProgress, SpokeError> {
    match client.get_node(hostname).await? {
        None => {
            debug!("Node {} not registered yet, looking for client CSRs", hostname);
            approve_matching(client, |csr| is_client_csr_for(csr, hostname), "client", hostname).await?;
            Ok(NodeProgress::Joining)
        }
        Some(node) => {
            let addresses = node_addresses(&node);
            approve_matching(
                client,
                |csr| is_server_csr_for(csr, hostname, &addresses),
                "server",
                hostname,
            )
            .await?;
            if node_is_ready(&node) {
                Ok(NodeProgress::Ready)
            } else {
                Ok(NodeProgress::Joining)
            }
        }
    }
}
