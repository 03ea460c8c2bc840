//! MCP endpoint client over the streamable-HTTP transport.
//!
//! Used twice: the pipeline auto-discovers tools from every configured
//! endpoint and exposes them to the model, and the deployment reconciler
//! drives a delegated tool-server's `k8s_apply_manifest`/`k8s_delete_resource`
//! through the same client.

use crate::error::{AgentError, Result};
use crate::llm::ToolDefinition;
use crate::tools::{ToolInvoker, ToolRegistry};
use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{serve_client, RoleClient, RunningService};
use rmcp::transport::StreamableHttpClientTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Default deadline for connect and tool calls.
pub const DEFAULT_MCP_TIMEOUT_SECS: u64 = 30;

/// Handler for MCP client events.
#[derive(Clone, Default)]
struct ClientHandler;

impl rmcp::handler::client::ClientHandler for ClientHandler {}

/// A tool advertised by an endpoint.
#[derive(Clone, Debug)]
pub struct McpToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Result of a tool call, flattened to text.
#[derive(Clone, Debug)]
pub struct McpToolOutput {
    pub text: String,
    pub is_error: bool,
}

/// A connected MCP endpoint.
pub struct McpEndpointClient {
    name: String,
    service: RunningService<RoleClient, ClientHandler>,
    tools: Vec<McpToolInfo>,
    timeout: Duration,
}

impl McpEndpointClient {
    /// Connect over streamable HTTP and list the endpoint's tools.
    pub async fn connect(name: &str, url: &str) -> Result<Self> {
        Self::connect_with_timeout(name, url, Duration::from_secs(DEFAULT_MCP_TIMEOUT_SECS)).await
    }

    pub async fn connect_with_timeout(name: &str, url: &str, deadline: Duration) -> Result<Self> {
        info!(endpoint = %name, url = %url, "connecting to MCP endpoint");

        let transport = StreamableHttpClientTransport::from_uri(url.to_string());
        let service = timeout(deadline, serve_client(ClientHandler, transport))
            .await
            .map_err(|_| AgentError::McpTimeout {
                name: name.to_string(),
                timeout_secs: deadline.as_secs(),
            })?
            .map_err(|e| AgentError::McpInit {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let listed = timeout(
            deadline,
            service.list_tools(None::<rmcp::model::PaginatedRequestParam>),
        )
        .await
        .map_err(|_| AgentError::McpTimeout {
            name: name.to_string(),
            timeout_secs: deadline.as_secs(),
        })?
        .map_err(|e| AgentError::McpInit {
            name: name.to_string(),
            message: format!("failed to list tools: {e}"),
        })?;

        let tools: Vec<McpToolInfo> = listed
            .tools
            .into_iter()
            .map(|tool| McpToolInfo {
                name: tool.name.to_string(),
                description: tool.description.as_ref().map(|d| d.to_string()),
                input_schema: serde_json::to_value(&tool.input_schema)
                    .unwrap_or_else(|_| serde_json::json!({"type": "object"})),
            })
            .collect();

        info!(endpoint = %name, tools = tools.len(), "connected to MCP endpoint");
        for tool in &tools {
            debug!(endpoint = %name, tool = %tool.name, "discovered tool");
        }

        Ok(Self {
            name: name.to_string(),
            service,
            tools,
            timeout: deadline,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tools(&self) -> &[McpToolInfo] {
        &self.tools
    }

    /// Call a tool and flatten its content to text.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<McpToolOutput> {
        debug!(endpoint = %self.name, tool = %tool, "calling MCP tool");
        let params = CallToolRequestParam {
            name: tool.to_string().into(),
            arguments: arguments.and_then(|v| v.as_object().cloned()),
        };

        let result = timeout(self.timeout, self.service.call_tool(params))
            .await
            .map_err(|_| AgentError::McpTimeout {
                name: self.name.clone(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| AgentError::McpToolCall {
                server: self.name.clone(),
                tool: tool.to_string(),
                message: e.to_string(),
            })?;

        let text = result
            .content
            .into_iter()
            .filter_map(|c| match c.raw {
                rmcp::model::RawContent::Text(text) => Some(text.text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(McpToolOutput {
            text,
            is_error: result.is_error.unwrap_or(false),
        })
    }

    /// Call a tool, retrying transient failures with linear backoff.
    pub async fn call_tool_with_retry(
        &self,
        tool: &str,
        arguments: Option<serde_json::Value>,
        max_attempts: u32,
    ) -> Result<McpToolOutput> {
        let mut attempt = 0;
        loop {
            match self.call_tool(tool, arguments.clone()).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    attempt += 1;
                    let retryable = matches!(
                        e,
                        AgentError::McpToolCall { .. } | AgentError::McpTimeout { .. }
                    );
                    if !retryable || attempt >= max_attempts {
                        return Err(e);
                    }
                    let delay = Duration::from_millis(500 * u64::from(attempt));
                    debug!(
                        endpoint = %self.name,
                        tool = %tool,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying MCP tool call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Adapter exposing one endpoint tool as a pipeline tool.
struct McpToolAdapter {
    client: Arc<McpEndpointClient>,
    tool: String,
}

#[async_trait]
impl ToolInvoker for McpToolAdapter {
    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value> {
        let output = self.client.call_tool(&self.tool, Some(args)).await?;
        if output.is_error {
            return Err(AgentError::McpToolCall {
                server: self.client.name().to_string(),
                tool: self.tool.clone(),
                message: output.text,
            });
        }
        Ok(serde_json::Value::String(output.text))
    }
}

/// Register every tool of a connected endpoint under
/// `<endpoint>_<tool>`, so names stay unique across endpoints.
pub fn register_endpoint_tools(registry: &mut ToolRegistry, client: Arc<McpEndpointClient>) {
    for tool in client.tools().to_vec() {
        let qualified = format!("{}_{}", client.name(), tool.name);
        registry.register(
            ToolDefinition {
                name: qualified,
                description: tool.description.clone().unwrap_or_default(),
                parameters: tool.input_schema.clone(),
            },
            Arc::new(McpToolAdapter {
                client: client.clone(),
                tool: tool.name,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_unreachable_endpoint_fails() {
        let result = McpEndpointClient::connect_with_timeout(
            "api",
            "http://127.0.0.1:1/mcp",
            Duration::from_secs(1),
        )
        .await;
        assert!(result.is_err());
        match result.err().unwrap() {
            AgentError::McpTimeout { .. } | AgentError::McpInit { .. } => {}
            other => panic!("expected timeout or init error, got: {other:?}"),
        }
    }
}
