//! The discovery configuration record: which remote clusters, namespaces
//! and kinds to shadow into the catalog.

use crate::conditions::Condition;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Remote runtime kinds the discovery plane can watch.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum DiscoveryResourceType {
    #[serde(rename = "MCPServer")]
    McpServer,
    Agent,
    ModelConfig,
}

impl DiscoveryResourceType {
    /// Kind string as it appears on the remote object and in cache keys.
    pub fn kind(&self) -> &'static str {
        match self {
            DiscoveryResourceType::McpServer => "MCPServer",
            DiscoveryResourceType::Agent => "Agent",
            DiscoveryResourceType::ModelConfig => "ModelConfig",
        }
    }

    /// The default watch set when an environment lists none.
    pub fn all() -> Vec<DiscoveryResourceType> {
        vec![
            DiscoveryResourceType::McpServer,
            DiscoveryResourceType::Agent,
            DiscoveryResourceType::ModelConfig,
        ]
    }
}

/// One target cluster to discover from, and optionally deploy into.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    pub name: String,
    /// Cluster reference recorded on shadow records and managed resources.
    pub cluster: String,
    /// Secret holding the kubeconfig for the remote cluster; absent means
    /// the local cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_secret_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    /// Kinds to watch; empty means all of them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<DiscoveryResourceType>,
    #[serde(default = "default_true")]
    pub deploy_enabled: bool,
    /// Delegated tool-server executing cluster writes on our behalf.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_server_url: Option<String>,
    /// Extra labels stamped onto shadow records from this environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl EnvironmentSpec {
    /// The watch set, defaulted when the spec lists none.
    pub fn effective_resource_types(&self) -> Vec<DiscoveryResourceType> {
        if self.resource_types.is_empty() {
            DiscoveryResourceType::all()
        } else {
            self.resource_types.clone()
        }
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "agentregistry.dev",
    version = "v1alpha1",
    kind = "DiscoveryConfig",
    plural = "discoveryconfigs",
    namespaced,
    status = "DiscoveryConfigStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfigSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<EnvironmentSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfigStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_wire_format() {
        assert_eq!(serde_json::to_string(&DiscoveryResourceType::McpServer).unwrap(), "\"MCPServer\"");
        assert_eq!(serde_json::to_string(&DiscoveryResourceType::ModelConfig).unwrap(), "\"ModelConfig\"");
    }

    #[test]
    fn empty_resource_types_default_to_all() {
        let env: EnvironmentSpec = serde_json::from_value(serde_json::json!({
            "name": "dev",
            "cluster": "dev-cluster"
        }))
        .unwrap();
        assert!(env.deploy_enabled);
        assert_eq!(env.effective_resource_types().len(), 3);
    }
}
