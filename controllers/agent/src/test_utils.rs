//! Test utilities for unit testing the Agent reconciler
//!
//! In-memory stand-ins for the Kubernetes API and the spoke cluster, plus
//! builders for Agents, hosts, clusters, Nodes and CSRs.

use crate::kube_api::AgentKubeApi;
use crate::reconciler::spoke::{approval_condition, SpokeClient, SpokeClientFactory, SpokeError};
use crate::reconciler::{Reconciler, ReconcilerSettings};
use assisted_client::{Cluster, Cpu, Disk, Host, HostStatus, Inventory, KubeKey, MockInstallerClient, SystemVendor};
use async_trait::async_trait;
use chrono::Utc;
use crds::*;
use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestSpec, CertificateSigningRequestStatus,
};
use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeCondition, NodeStatus, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::ByteString;
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair, SanType};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const TEST_NAMESPACE: &str = "test-namespace";
pub const TEST_AGENT: &str = "agent-1";
pub const TEST_CLUSTER_DEPLOYMENT: &str = "test-cluster";
pub const TEST_HOSTNAME: &str = "ostest-extraworker-3";
pub const TEST_NODE_IP: &str = "192.168.111.28";
pub const BASE_URL: &str = "https://assisted.example.com";

type ObjectKey = (String, String);

fn object_key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

/// In-memory `AgentKubeApi` that applies patches to its stored objects
#[derive(Debug, Default)]
pub struct MockKubeApi {
    agents: Mutex<HashMap<ObjectKey, Agent>>,
    cluster_deployments: Mutex<HashMap<ObjectKey, ClusterDeployment>>,
    secrets: Mutex<HashMap<ObjectKey, Secret>>,
    pub status_patches: AtomicUsize,
    pub metadata_patches: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MockKubeApi {
    pub fn add_agent(&self, agent: Agent) {
        let key = object_key(
            agent.metadata.namespace.as_deref().unwrap_or_default(),
            agent.metadata.name.as_deref().unwrap_or_default(),
        );
        self.agents.lock().unwrap().insert(key, agent);
    }

    pub fn agent(&self, namespace: &str, name: &str) -> Option<Agent> {
        self.agents.lock().unwrap().get(&object_key(namespace, name)).cloned()
    }

    pub fn modify_agent(&self, namespace: &str, name: &str, f: impl FnOnce(&mut Agent)) {
        if let Some(agent) = self.agents.lock().unwrap().get_mut(&object_key(namespace, name)) {
            f(agent);
        }
    }

    pub fn add_cluster_deployment(&self, cd: ClusterDeployment) {
        let key = object_key(
            cd.metadata.namespace.as_deref().unwrap_or_default(),
            cd.metadata.name.as_deref().unwrap_or_default(),
        );
        self.cluster_deployments.lock().unwrap().insert(key, cd);
    }

    pub fn add_secret(&self, secret: Secret) {
        let key = object_key(
            secret.metadata.namespace.as_deref().unwrap_or_default(),
            secret.metadata.name.as_deref().unwrap_or_default(),
        );
        self.secrets.lock().unwrap().insert(key, secret);
    }

    pub fn status_patch_count(&self) -> usize {
        self.status_patches.load(Ordering::SeqCst)
    }

    pub fn metadata_patch_count(&self) -> usize {
        self.metadata_patches.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentKubeApi for MockKubeApi {
    async fn get_agent(&self, namespace: &str, name: &str) -> Result<Option<Agent>, kube::Error> {
        Ok(self.agent(namespace, name))
    }

    async fn patch_agent_status(&self, namespace: &str, name: &str, status: &AgentStatus) -> Result<(), kube::Error> {
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        self.modify_agent(namespace, name, |agent| agent.status = Some(status.clone()));
        Ok(())
    }

    async fn patch_agent_metadata(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), kube::Error> {
        self.metadata_patches.fetch_add(1, Ordering::SeqCst);
        self.modify_agent(namespace, name, |agent| {
            agent.metadata.labels.get_or_insert_with(BTreeMap::new).extend(labels.clone());
            agent
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(annotations.clone());
        });
        Ok(())
    }

    async fn set_agent_finalizers(&self, namespace: &str, name: &str, finalizers: &[String]) -> Result<(), kube::Error> {
        let key = object_key(namespace, name);
        let mut agents = self.agents.lock().unwrap();
        let remove = match agents.get_mut(&key) {
            Some(agent) => {
                agent.metadata.finalizers = Some(finalizers.to_vec());
                finalizers.is_empty() && agent.metadata.deletion_timestamp.is_some()
            }
            None => false,
        };
        if remove {
            agents.remove(&key);
        }
        Ok(())
    }

    async fn delete_agent(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let key = object_key(namespace, name);
        let mut agents = self.agents.lock().unwrap();
        let has_finalizers = agents
            .get(&key)
            .is_some_and(|a| a.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty()));
        if has_finalizers {
            if let Some(agent) = agents.get_mut(&key) {
                agent.metadata.deletion_timestamp = Some(Time(Utc::now()));
            }
        } else {
            agents.remove(&key);
        }
        Ok(())
    }

    async fn get_cluster_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterDeployment>, kube::Error> {
        Ok(self.cluster_deployments.lock().unwrap().get(&object_key(namespace, name)).cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        Ok(self.secrets.lock().unwrap().get(&object_key(namespace, name)).cloned())
    }
}

/// In-memory spoke cluster
#[derive(Debug, Clone, Default)]
pub struct MockSpokeClient {
    pub node: Arc<Mutex<Option<Node>>>,
    pub csrs: Arc<Mutex<Vec<CertificateSigningRequest>>>,
    pub approved: Arc<Mutex<Vec<String>>>,
}

impl MockSpokeClient {
    pub fn set_node(&self, node: Option<Node>) {
        *self.node.lock().unwrap() = node;
    }

    pub fn add_csr(&self, csr: CertificateSigningRequest) {
        self.csrs.lock().unwrap().push(csr);
    }

    pub fn approved_names(&self) -> Vec<String> {
        self.approved.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpokeClient for MockSpokeClient {
    async fn get_node(&self, _name: &str) -> Result<Option<Node>, SpokeError> {
        Ok(self.node.lock().unwrap().clone())
    }

    async fn list_csrs(&self) -> Result<Vec<CertificateSigningRequest>, SpokeError> {
        Ok(self.csrs.lock().unwrap().clone())
    }

    async fn approve_csr(&self, csr: &CertificateSigningRequest) -> Result<(), SpokeError> {
        let name = csr.metadata.name.clone().unwrap_or_default();
        let mut csrs = self.csrs.lock().unwrap();
        if let Some(stored) = csrs.iter_mut().find(|c| c.metadata.name.as_deref() == Some(name.as_str())) {
            stored
                .status
                .get_or_insert_with(Default::default)
                .conditions
                .get_or_insert_with(Vec::new)
                .push(approval_condition());
        }
        self.approved.lock().unwrap().push(name);
        Ok(())
    }
}

/// Factory handing out clones of one `MockSpokeClient`
#[derive(Debug, Clone, Default)]
pub struct MockSpokeClientFactory {
    pub client: MockSpokeClient,
    pub created: Arc<AtomicUsize>,
    pub kubeconfigs: Arc<Mutex<Vec<String>>>,
}

impl MockSpokeClientFactory {
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpokeClientFactory for MockSpokeClientFactory {
    async fn create(&self, kubeconfig: &str) -> Result<Box<dyn SpokeClient>, SpokeError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.kubeconfigs.lock().unwrap().push(kubeconfig.to_string());
        Ok(Box::new(self.client.clone()))
    }
}

/// Everything a reconciler test needs, wired together
pub struct TestContext {
    pub installer: MockInstallerClient,
    pub kube: Arc<MockKubeApi>,
    pub spoke: MockSpokeClientFactory,
    pub reconciler: Reconciler,
}

pub fn test_settings() -> ReconcilerSettings {
    ReconcilerSettings {
        service_base_url: BASE_URL.to_string(),
        label_prefix: crate::config::DEFAULT_LABEL_PREFIX.to_string(),
        reconcile_requeue: Duration::from_secs(60),
        csr_requeue: Duration::from_secs(60),
        resync_interval: Duration::from_secs(120),
    }
}

pub fn create_test_context() -> TestContext {
    let installer = MockInstallerClient::new(BASE_URL);
    let kube = Arc::new(MockKubeApi::default());
    let spoke = MockSpokeClientFactory::default();
    let reconciler = Reconciler::new(
        Box::new(installer.clone()),
        kube.clone(),
        Arc::new(spoke.clone()),
        test_settings(),
    );
    TestContext {
        installer,
        kube,
        spoke,
        reconciler,
    }
}

impl TestContext {
    pub async fn reconcile(&self) -> crate::reconciler::ReconcileOutcome {
        self.reconciler
            .reconcile_agent(TEST_NAMESPACE, TEST_AGENT)
            .await
            .unwrap()
    }

    pub fn agent(&self) -> Agent {
        self.kube.agent(TEST_NAMESPACE, TEST_AGENT).unwrap()
    }

    pub fn host(&self) -> Host {
        self.installer.host(&agent_key()).unwrap()
    }

    pub fn condition(&self, r#type: ConditionType) -> Condition {
        let agent = self.agent();
        let status = agent.status.unwrap();
        find_condition(&status.conditions, r#type).unwrap().clone()
    }
}

pub fn agent_key() -> KubeKey {
    KubeKey::new(TEST_NAMESPACE, TEST_AGENT)
}

pub fn cluster_key() -> KubeKey {
    KubeKey::new(TEST_NAMESPACE, TEST_CLUSTER_DEPLOYMENT)
}

/// Agent with the finalizer already in place and bound to the test cluster deployment
pub fn create_test_agent() -> Agent {
    Agent {
        metadata: ObjectMeta {
            name: Some(TEST_AGENT.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            finalizers: Some(vec![AGENT_FINALIZER.to_string()]),
            ..Default::default()
        },
        spec: AgentSpec {
            cluster_deployment_name: Some(ClusterReference::new(TEST_NAMESPACE, TEST_CLUSTER_DEPLOYMENT)),
            ..Default::default()
        },
        status: None,
    }
}

pub fn create_test_inventory() -> Inventory {
    Inventory {
        hostname: TEST_HOSTNAME.to_string(),
        cpu: Cpu {
            architecture: "x86_64".to_string(),
            count: 8,
            flags: vec!["vmx".to_string()],
            ..Default::default()
        },
        system_vendor: SystemVendor {
            manufacturer: "Red Hat".to_string(),
            product_name: "KVM".to_string(),
            is_virtual: true,
            ..Default::default()
        },
        disks: vec![Disk {
            id: "/dev/disk/by-id/wwn-0x1111".to_string(),
            name: "sda".to_string(),
            drive_type: "HDD".to_string(),
            size_bytes: 120_000_000_000,
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Host in `status` with a discovered inventory, bound to `cluster_id`
pub fn create_test_host(status: HostStatus, cluster_id: Option<Uuid>) -> Host {
    let mut host = Host::new(Uuid::new_v4(), Uuid::new_v4(), status);
    host.cluster_id = cluster_id;
    host.inventory = Some(create_test_inventory());
    host
}

pub fn create_test_cluster() -> Cluster {
    Cluster {
        id: Uuid::new_v4(),
        name: TEST_CLUSTER_DEPLOYMENT.to_string(),
        kube_key: Some(cluster_key()),
        ..Default::default()
    }
}

pub fn create_test_cluster_deployment(admin_secret: &str) -> ClusterDeployment {
    let mut cd = ClusterDeployment::new(
        TEST_CLUSTER_DEPLOYMENT,
        ClusterDeploymentSpec {
            cluster_name: TEST_CLUSTER_DEPLOYMENT.to_string(),
            base_domain: "example.com".to_string(),
            cluster_metadata: Some(ClusterMetadata {
                cluster_id: Uuid::new_v4().to_string(),
                infra_id: "test-infra".to_string(),
                admin_kubeconfig_secret_ref: LocalObjectReference {
                    name: admin_secret.to_string(),
                },
            }),
            installed: true,
        },
    );
    cd.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    cd
}

pub fn create_test_secret(name: &str, key: &str, value: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(key.to_string(), ByteString(value.as_bytes().to_vec()))])),
        ..Default::default()
    }
}

pub fn create_test_node(hostname: &str, ip: &str, ready: bool) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(hostname.to_string()),
            ..Default::default()
        },
        status: Some(NodeStatus {
            addresses: Some(vec![
                NodeAddress {
                    type_: "InternalIP".to_string(),
                    address: ip.to_string(),
                },
                NodeAddress {
                    type_: "Hostname".to_string(),
                    address: hostname.to_string(),
                },
            ]),
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn csr_pem(common_name: &str, organization: &str, dns: &[&str], ips: &[&str]) -> String {
    let key_pair = KeyPair::generate().unwrap();
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn.push(DnType::OrganizationName, DnValue::Utf8String(organization.to_string()));
    params.distinguished_name = dn;
    for name in dns {
        params
            .subject_alt_names
            .push(SanType::DnsName((*name).try_into().unwrap()));
    }
    for ip in ips {
        params.subject_alt_names.push(SanType::IpAddress(ip.parse::<IpAddr>().unwrap()));
    }
    params.serialize_request(&key_pair).unwrap().pem().unwrap()
}

pub fn create_test_csr(name: &str, username: &str, usages: &[&str], pem: String) -> CertificateSigningRequest {
    CertificateSigningRequest {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: CertificateSigningRequestSpec {
            request: ByteString(pem.into_bytes()),
            signer_name: "kubernetes.io/kube-apiserver-client-kubelet".to_string(),
            username: Some(username.to_string()),
            usages: Some(usages.iter().map(|u| (*u).to_string()).collect()),
            ..Default::default()
        },
        status: Some(CertificateSigningRequestStatus::default()),
    }
}

/// Kubelet client CSR as filed by the node bootstrapper
pub fn create_client_csr(name: &str, hostname: &str) -> CertificateSigningRequest {
    create_test_csr(
        name,
        crate::reconciler::csr::NODE_BOOTSTRAPPER_USERNAME,
        &["digital signature", "key encipherment", "client auth"],
        csr_pem(&format!("system:node:{}", hostname), "system:nodes", &[], &[]),
    )
}

/// Kubelet serving CSR as filed by the node itself
pub fn create_server_csr(name: &str, hostname: &str, ip: &str) -> CertificateSigningRequest {
    let mut csr = create_test_csr(
        name,
        &format!("system:node:{}", hostname),
        &["digital signature", "key encipherment", "server auth"],
        csr_pem(&format!("system:node:{}", hostname), "system:nodes", &[hostname], &[ip]),
    );
    csr.spec.signer_name = "kubernetes.io/kubelet-serving".to_string();
    csr
}

/// Mark a CSR as already approved
pub fn approved(mut csr: CertificateSigningRequest) -> CertificateSigningRequest {
    csr.status = Some(CertificateSigningRequestStatus {
        conditions: Some(vec![approval_condition()]),
        ..Default::default()
    });
    csr
}
