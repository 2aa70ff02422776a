//! Access to the cluster a day-2 host joins.
//!
//! The CSR bootstrap only needs three calls on the spoke cluster: look up a
//! Node, list CSRs and approve one. The factory builds a client from the
//! admin kubeconfig stored for the ClusterDeployment.

use async_trait::async_trait;
use k8s_openapi::api::certificates::v1::{CertificateSigningRequest, CertificateSigningRequestCondition};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use thiserror::Error;

/// Failures talking to the spoke cluster
#[derive(Debug, Error)]
pub enum SpokeError {
    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(String),

    #[error("spoke API error: {0}")]
    Api(#[from] kube::Error),
}

/// Operations on the spoke cluster
#[async_trait]
pub trait SpokeClient: Send + Sync {
    /// Node by name, `None` when it does not exist yet
    async fn get_node(&self, name: &str) -> Result<Option<Node>, SpokeError>;

    async fn list_csrs(&self) -> Result<Vec<CertificateSigningRequest>, SpokeError>;

    async fn approve_csr(&self, csr: &CertificateSigningRequest) -> Result<(), SpokeError>;
}

/// Builds spoke clients from a kubeconfig document
#[async_trait]
pub trait SpokeClientFactory: Send + Sync {
    async fn create(&self, kubeconfig: &str) -> Result<Box<dyn SpokeClient>, SpokeError>;
}

/// Condition written on CSRs approved by this controller
pub fn approval_condition() -> CertificateSigningRequestCondition {
    CertificateSigningRequestCondition {
        type_: "Approved".to_string(),
        status: "True".to_string(),
        reason: Some("NodeCSRApprove".to_string()),
        message: Some("This CSR was approved by the agent controller".to_string()),
        last_update_time: Some(Time(chrono::Utc::now())),
        ..Default::default()
    }
}

/// Factory producing kube-backed spoke clients
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeSpokeClientFactory;

#[async_trait]
impl SpokeClientFactory for KubeSpokeClientFactory {
    async fn create(&self, kubeconfig: &str) -> Result<Box<dyn SpokeClient>, SpokeError> {
        let kubeconfig = Kubeconfig::from_yaml(kubeconfig).map_err(|e| SpokeError::Kubeconfig(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| SpokeError::Kubeconfig(e.to_string()))?;
        let client = Client::try_from(config)?;
        Ok(Box::new(KubeSpokeClient { client }))
    }
}

struct KubeSpokeClient {
    client: Client,
}

#[async_trait]
impl SpokeClient for KubeSpokeClient {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, SpokeError> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_csrs(&self) -> Result<Vec<CertificateSigningRequest>, SpokeError> {
        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn approve_csr(&self, csr: &CertificateSigningRequest) -> Result<(), SpokeError> {
        let name = csr.metadata.name.clone().unwrap_or_default();
        let mut conditions = csr
            .status
            .as_ref()
            .and_then(|s| s.conditions.clone())
            .unwrap_or_default();
        conditions.push(approval_condition());
        let patch = json!({ "status": { "conditions": conditions } });
        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        api.patch_approval(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
