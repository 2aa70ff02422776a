//! Cross-resource references used by the agent CRDs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Namespaced reference to a `ClusterDeployment`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReference {
    /// Name of the ClusterDeployment
    pub name: String,

    /// Namespace of the ClusterDeployment
    pub namespace: String,
}

impl ClusterReference {
    /// Create a new cluster reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for ClusterReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reference to a Secret, optionally in another namespace.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the Secret
    pub name: String,

    /// Namespace of the Secret (defaults to the namespace of the referencing resource)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Reference to an object in the same namespace.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    /// Name of the referenced object
    pub name: String,
}
