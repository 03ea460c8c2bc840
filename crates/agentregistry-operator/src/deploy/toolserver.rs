//! Delegated tool-server channel: cluster writes executed by a remote MCP
//! endpoint when the control plane has no direct store connection.

use super::target::{DeployTarget, Readiness};
use crate::error::{Error, Result};
use agentregistry_agent::error::AgentError;
use agentregistry_agent::mcp::McpEndpointClient;
use agentregistry_api::deployment::ManagedResource;
use agentregistry_api::runtime::RuntimeObject;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

/// Tool executing a serialized manifest apply.
const APPLY_TOOL: &str = "k8s_apply_manifest";
/// Tool deleting one resource by coordinates.
const DELETE_TOOL: &str = "k8s_delete_resource";
/// Attempts per tool call.
const TOOL_ATTEMPTS: u32 = 3;

pub struct ToolServerTarget {
    client: McpEndpointClient,
    cluster: Option<String>,
}

impl ToolServerTarget {
    pub async fn connect(url: &str, cluster: Option<String>) -> Result<Self> {
        let client = McpEndpointClient::connect("tool-server", url).await?;
        info!(url, "connected to delegated tool-server");
        Ok(Self { client, cluster })
    }
}

#[async_trait]
impl DeployTarget for ToolServerTarget {
    fn cluster(&self) -> Option<String> {
        self.cluster.clone()
    }

    async fn apply(&self, obj: &RuntimeObject) -> Result<()> {
        let manifest = serde_yaml::to_string(&obj.to_json()?)?;
        let output = self
            .client
            .call_tool_with_retry(APPLY_TOOL, Some(json!({"manifest": manifest})), TOOL_ATTEMPTS)
            .await?;
        if output.is_error {
            return Err(Error::Agent(AgentError::McpToolCall {
                server: "tool-server".to_string(),
                tool: APPLY_TOOL.to_string(),
                message: output.text,
            }));
        }
        debug!(kind = %obj.kind(), name = %obj.name(), "manifest applied via tool-server");
        Ok(())
    }

    async fn delete(&self, resource: &ManagedResource) -> Result<()> {
        let output = self
            .client
            .call_tool_with_retry(
                DELETE_TOOL,
                Some(json!({
                    "apiVersion": resource.api_version,
                    "kind": resource.kind,
                    "name": resource.name,
                    "namespace": resource.namespace,
                })),
                TOOL_ATTEMPTS,
            )
            .await?;
        if output.is_error {
            // An already-deleted object is success for garbage collection.
            if output.text.to_ascii_lowercase().contains("not found") {
                return Ok(());
            }
            return Err(Error::Agent(AgentError::McpToolCall {
                server: "tool-server".to_string(),
                tool: DELETE_TOOL.to_string(),
                message: output.text,
            }));
        }
        Ok(())
    }

    async fn readiness(&self, _resource: &ManagedResource) -> Result<Readiness> {
        // The tool surface has no read channel; the object is assumed
        // ready once the apply was accepted.
        Ok(Readiness::Ready)
    }
}
