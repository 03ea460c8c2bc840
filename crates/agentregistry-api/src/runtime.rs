//! Runtime object kinds: what the deployment translator emits into target
//! clusters and what the discovery plane watches there.

use crate::conditions::{Condition, CONDITION_READY};
use crate::deployment::ManagedResource;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use crate::catalog::TransportType;

/// Status shared by the runtime kinds. A primary object is ready iff it
/// carries a `Ready` condition of `True`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RuntimeStatus {
    pub fn is_ready(&self) -> bool {
        self.conditions.iter().any(|c| c.type_ == CONDITION_READY && c.is_true())
    }

    /// Message of the first non-true condition, for status surfacing.
    pub fn not_ready_message(&self) -> Option<String> {
        self.conditions
            .iter()
            .find(|c| c.type_ == CONDITION_READY && !c.is_true())
            .and_then(|c| c.message.clone())
    }
}

/// Pod-shaped deployment settings for a locally hosted MCP server.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerDeployment {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A locally hosted MCP server workload.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "runtime.agentregistry.dev",
    version = "v1alpha1",
    kind = "MCPServer",
    plural = "mcpservers",
    namespaced,
    status = "RuntimeStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct MCPServerSpec {
    pub deployment: ServerDeployment,
    #[serde(default)]
    pub transport: TransportType,
}

/// Literal header sent to a remote MCP endpoint.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteHeader {
    pub name: String,
    pub value: String,
}

/// A remotely hosted MCP endpoint registered into the mesh.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "runtime.agentregistry.dev",
    version = "v1alpha1",
    kind = "RemoteMCPServer",
    plural = "remotemcpservers",
    namespaced,
    status = "RuntimeStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMCPServerSpec {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub transport: TransportType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<RemoteHeader>,
}

/// An agent workload.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "runtime.agentregistry.dev",
    version = "v1alpha1",
    kind = "Agent",
    plural = "agents",
    namespaced,
    status = "RuntimeStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a2a_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A model endpoint configuration.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "runtime.agentregistry.dev",
    version = "v1alpha1",
    kind = "ModelConfig",
    plural = "modelconfigs",
    namespaced,
    status = "RuntimeStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// A concrete object the translator emits. One primary object per
/// deployment plus optional sidecar ConfigMaps.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeObject {
    Server(MCPServer),
    Remote(RemoteMCPServer),
    Agent(Agent),
    ConfigMap(ConfigMap),
}

impl RuntimeObject {
    pub fn api_version(&self) -> String {
        match self {
            RuntimeObject::Server(_) => MCPServer::api_version(&()).to_string(),
            RuntimeObject::Remote(_) => RemoteMCPServer::api_version(&()).to_string(),
            RuntimeObject::Agent(_) => Agent::api_version(&()).to_string(),
            RuntimeObject::ConfigMap(_) => "v1".to_string(),
        }
    }

    pub fn kind(&self) -> String {
        match self {
            RuntimeObject::Server(_) => MCPServer::kind(&()).to_string(),
            RuntimeObject::Remote(_) => RemoteMCPServer::kind(&()).to_string(),
            RuntimeObject::Agent(_) => Agent::kind(&()).to_string(),
            RuntimeObject::ConfigMap(_) => "ConfigMap".to_string(),
        }
    }

    pub fn name(&self) -> String {
        self.meta().name.clone().unwrap_or_default()
    }

    pub fn namespace(&self) -> String {
        self.meta().namespace.clone().unwrap_or_default()
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            RuntimeObject::Server(o) => &o.metadata,
            RuntimeObject::Remote(o) => &o.metadata,
            RuntimeObject::Agent(o) => &o.metadata,
            RuntimeObject::ConfigMap(o) => &o.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            RuntimeObject::Server(o) => &mut o.metadata,
            RuntimeObject::Remote(o) => &mut o.metadata,
            RuntimeObject::Agent(o) => &mut o.metadata,
            RuntimeObject::ConfigMap(o) => &mut o.metadata,
        }
    }

    /// Stamp the fixed ownership labels. Must match across processes for
    /// garbage collection to find every managed object.
    pub fn set_owner_labels(&mut self, deployment_name: &str, deployment_namespace: &str) {
        let labels = self.meta_mut().labels.get_or_insert_with(BTreeMap::new);
        labels.insert(crate::labels::MANAGED_BY.to_string(), crate::labels::MANAGED_BY_VALUE.to_string());
        labels.insert(crate::labels::DEPLOYMENT_NAME.to_string(), deployment_name.to_string());
        labels.insert(crate::labels::DEPLOYMENT_NAMESPACE.to_string(), deployment_namespace.to_string());
    }

    pub fn managed_resource(&self, cluster: Option<String>) -> ManagedResource {
        ManagedResource {
            api_version: self.api_version(),
            kind: self.kind(),
            name: self.name(),
            namespace: self.namespace(),
            cluster,
        }
    }

    /// Serialize to the wire shape the target store (or the delegated
    /// tool-server) accepts: typed spec plus explicit apiVersion/kind.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        let mut value = match self {
            RuntimeObject::Server(o) => serde_json::to_value(o)?,
            RuntimeObject::Remote(o) => serde_json::to_value(o)?,
            RuntimeObject::Agent(o) => serde_json::to_value(o)?,
            RuntimeObject::ConfigMap(o) => serde_json::to_value(o)?,
        };
        if let Some(map) = value.as_object_mut() {
            map.insert("apiVersion".to_string(), serde_json::Value::String(self.api_version()));
            map.insert("kind".to_string(), serde_json::Value::String(self.kind()));
        }
        Ok(value)
    }
}
