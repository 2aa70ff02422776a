//! ClusterDeployment CRD
//!
//! Only the fields the agent controller reads are modelled; unknown fields are
//! preserved by the API server and ignored here.

use crate::references::LocalObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "hive.openshift.io",
    version = "v1",
    kind = "ClusterDeployment",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDeploymentSpec {
    /// Cluster name
    pub cluster_name: String,

    /// Base DNS domain of the cluster
    pub base_domain: String,

    /// Set once the cluster is installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_metadata: Option<ClusterMetadata>,

    /// Whether the cluster finished installing
    #[serde(default)]
    pub installed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetadata {
    /// Cluster id
    #[serde(default, rename = "clusterID")]
    pub cluster_id: String,

    /// Infrastructure id
    #[serde(default, rename = "infraID")]
    pub infra_id: String,

    /// Secret holding the admin kubeconfig under the `kubeconfig` key
    pub admin_kubeconfig_secret_ref: LocalObjectReference,
}
