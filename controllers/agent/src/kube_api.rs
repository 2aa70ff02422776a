//! Kubernetes access used by the Agent reconciler.
//!
//! The reconciler only needs a handful of reads and patches; routing them
//! through `AgentKubeApi` keeps the reconcile flow testable without an API
//! server.

use async_trait::async_trait;
use crds::{Agent, AgentStatus, ClusterDeployment};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// Kubernetes operations performed while reconciling an Agent
#[async_trait]
pub trait AgentKubeApi: Send + Sync {
    /// Fresh copy of an Agent, `None` when it no longer exists
    async fn get_agent(&self, namespace: &str, name: &str) -> Result<Option<Agent>, kube::Error>;

    /// Merge-patch the status subresource
    async fn patch_agent_status(&self, namespace: &str, name: &str, status: &AgentStatus) -> Result<(), kube::Error>;

    /// Merge-patch labels and annotations
    async fn patch_agent_metadata(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), kube::Error>;

    /// Replace the finalizer list
    async fn set_agent_finalizers(&self, namespace: &str, name: &str, finalizers: &[String]) -> Result<(), kube::Error>;

    async fn delete_agent(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;

    async fn get_cluster_deployment(&self, namespace: &str, name: &str)
    -> Result<Option<ClusterDeployment>, kube::Error>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error>;
}

/// `AgentKubeApi` backed by a live cluster
#[derive(Clone)]
pub struct KubeAgentApi {
    client: Client,
    field_manager: String,
}

impl std::fmt::Debug for KubeAgentApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeAgentApi")
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl KubeAgentApi {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: "agent-controller".to_string(),
        }
    }

    fn agents(&self, namespace: &str) -> Api<Agent> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..PatchParams::default()
        }
    }
}

#[async_trait]
impl AgentKubeApi for KubeAgentApi {
    async fn get_agent(&self, namespace: &str, name: &str) -> Result<Option<Agent>, kube::Error> {
        self.agents(namespace).get_opt(name).await
    }

    async fn patch_agent_status(&self, namespace: &str, name: &str, status: &AgentStatus) -> Result<(), kube::Error> {
        let patch = json!({ "status": status });
        self.agents(namespace)
            .patch_status(name, &self.patch_params(), &Patch::Merge(&patch))
            .await?;
        debug!("Patched status of Agent {}/{}", namespace, name);
        Ok(())
    }

    async fn patch_agent_metadata(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), kube::Error> {
        let patch = json!({
            "metadata": {
                "labels": labels,
                "annotations": annotations,
            }
        });
        self.agents(namespace)
            .patch(name, &self.patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn set_agent_finalizers(&self, namespace: &str, name: &str, finalizers: &[String]) -> Result<(), kube::Error> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.agents(namespace)
            .patch(name, &self.patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_agent(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        match self.agents(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_cluster_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterDeployment>, kube::Error> {
        let api: Api<ClusterDeployment> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }
}
