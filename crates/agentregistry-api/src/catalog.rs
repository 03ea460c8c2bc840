//! Catalog record kinds: `McpServer`, `Agent`, `Skill`, `Model`.
//!
//! All four kinds share one status shape ([`CatalogStatus`]) and are
//! reconciled by the same generic core; [`CatalogRecord`] is the seam the
//! reconcilers program against.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Who produced a catalog entry.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ManagementType {
    /// A deployment record produced runtime objects for this entry.
    Managed,
    /// Shadowed from an independently created runtime object.
    External,
}

/// Cross-catalog reference, e.g. an agent listed in a server's `usedBy`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Where a shadowed record was observed.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub environment: String,
    pub cluster: String,
    pub namespace: String,
    pub name: String,
}

/// Liveness of the runtime object backing an external catalog entry.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentBackRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status shared by every catalog kind. Controller-written, updated through
/// the status subresource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_latest: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_type: Option<ManagementType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentBackRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub used_by: Vec<Reference>,
}

/// Package registry a server package is fetched from.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistryType {
    Npm,
    Pypi,
    Oci,
}

/// MCP transport a package or remote speaks.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TransportType {
    #[default]
    Stdio,
    Http,
    StreamableHttp,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageTransport {
    #[serde(rename = "type", default)]
    pub type_: TransportType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Environment variable slot on a package. `value` may carry `${key}`
/// placeholders substituted from a deployment's config map.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentType {
    #[default]
    Positional,
    Named,
}

/// Command-line argument slot on a package.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentSpec {
    #[serde(rename = "type", default)]
    pub type_: ArgumentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_hint: Option<String>,
}

/// An installable distribution of an MCP server.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    pub registry_type: RegistryType,
    /// Registry-specific identifier: npm package, pypi project, or OCI
    /// image reference.
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Alternate launcher, e.g. `npx` or `uvx`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_hint: Option<String>,
    #[serde(default)]
    pub transport: PackageTransport,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_arguments: Vec<ArgumentSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_arguments: Vec<ArgumentSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<EnvVarSpec>,
}

/// Substitution variable on a remote header template.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeaderVariable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Header template on a remote transport.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeaderSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, HeaderVariable>,
}

/// A remotely hosted MCP endpoint.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSpec {
    #[serde(default)]
    pub transport_type: TransportType,
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderSpec>,
}

/// Curated description of an MCP server.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "agentregistry.dev",
    version = "v1alpha1",
    kind = "McpServer",
    plural = "mcpservers",
    shortname = "mcps",
    namespaced,
    status = "CatalogStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct McpServerSpec {
    /// Logical name shared by every version of this server.
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PackageSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<RemoteSpec>,
    /// Opaque registry metadata, including publisher-identity attestations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<SourceRef>,
}

/// Curated description of an AI agent.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "agentregistry.dev",
    version = "v1alpha1",
    kind = "Agent",
    plural = "agents",
    namespaced,
    status = "CatalogStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    /// Logical name of the Model catalog entry this agent runs on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_ref: Option<String>,
    /// Logical names of the McpServer catalog entries this agent uses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a2a_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<SourceRef>,
}

/// Curated description of an agent skill.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "agentregistry.dev",
    version = "v1alpha1",
    kind = "Skill",
    plural = "skills",
    namespaced,
    status = "CatalogStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct SkillSpec {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Curated model configuration.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "agentregistry.dev",
    version = "v1alpha1",
    kind = "Model",
    plural = "models",
    namespaced,
    status = "CatalogStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Provider-side model identifier, e.g. `gpt-4o-mini`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Base URL of the OpenAI-compatible endpoint serving this model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_secret_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<SourceRef>,
}

/// Common surface of the four catalog kinds.
///
/// The reconcilers are generic over this trait; each implementation is a
/// thin field map onto the kind's spec and status.
pub trait CatalogRecord:
    kube::Resource<DynamicType = ()>
    + Clone
    + std::fmt::Debug
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Lowercase kind tag used in resource identities and log lines.
    const KIND_TAG: &'static str;
    /// Finalizer attached on first sight of a live record.
    const FINALIZER: &'static str;
    /// Runtime kind shadowed into this catalog kind, when one exists.
    const SOURCE_KIND: Option<&'static str>;

    fn logical_name(&self) -> &str;
    fn version(&self) -> &str;
    fn catalog_status(&self) -> Option<&CatalogStatus>;
    fn catalog_status_mut(&mut self) -> &mut CatalogStatus;
    fn source_ref(&self) -> Option<&SourceRef>;
    fn meta_payload(&self) -> Option<&serde_json::Value>;
}

macro_rules! impl_catalog_record {
    ($ty:ty, $tag:literal, $finalizer:path, $source:expr, $meta:ident) => {
        impl CatalogRecord for $ty {
            const KIND_TAG: &'static str = $tag;
            const FINALIZER: &'static str = $finalizer;
            const SOURCE_KIND: Option<&'static str> = $source;

            fn logical_name(&self) -> &str {
                &self.spec.name
            }

            fn version(&self) -> &str {
                &self.spec.version
            }

            fn catalog_status(&self) -> Option<&CatalogStatus> {
                self.status.as_ref()
            }

            fn catalog_status_mut(&mut self) -> &mut CatalogStatus {
                self.status.get_or_insert_with(CatalogStatus::default)
            }

            fn source_ref(&self) -> Option<&SourceRef> {
                self.spec.source_ref.as_ref()
            }

            fn meta_payload(&self) -> Option<&serde_json::Value> {
                self.spec.$meta.as_ref()
            }
        }
    };
}

impl_catalog_record!(McpServer, "mcpserver", crate::finalizers::MCP_SERVER, Some("MCPServer"), meta);
impl_catalog_record!(Agent, "agent", crate::finalizers::AGENT, Some("Agent"), meta);
impl_catalog_record!(Model, "model", crate::finalizers::MODEL, Some("ModelConfig"), meta);

impl CatalogRecord for Skill {
    const KIND_TAG: &'static str = "skill";
    const FINALIZER: &'static str = crate::finalizers::SKILL;
    const SOURCE_KIND: Option<&'static str> = None;

    fn logical_name(&self) -> &str {
        &self.spec.name
    }

    fn version(&self) -> &str {
        &self.spec.version
    }

    fn catalog_status(&self) -> Option<&CatalogStatus> {
        self.status.as_ref()
    }

    fn catalog_status_mut(&mut self) -> &mut CatalogStatus {
        self.status.get_or_insert_with(CatalogStatus::default)
    }

    fn source_ref(&self) -> Option<&SourceRef> {
        None
    }

    fn meta_payload(&self) -> Option<&serde_json::Value> {
        self.spec.meta.as_ref()
    }
}
