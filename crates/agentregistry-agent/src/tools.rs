//! Tool registry for the LLM tool loop: the built-in world-state and A2A
//! tools plus whatever the configured MCP endpoints contribute.

use crate::a2a::A2aClient;
use crate::error::{AgentError, Result};
use crate::events::Severity;
use crate::llm::ToolDefinition;
use crate::world::WorldState;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A typed tool implementation.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, args: Value) -> Result<Value>;
}

/// Mapping from tool name to definition and invoker.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, (ToolDefinition, Arc<dyn ToolInvoker>)>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ToolDefinition, invoker: Arc<dyn ToolInvoker>) {
        if !self.tools.contains_key(&definition.name) {
            self.order.push(definition.name.clone());
        }
        self.tools.insert(definition.name.clone(), (definition, invoker));
    }

    /// Definitions in registration order, as advertised to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name).map(|(def, _)| def.clone()))
            .collect()
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        let (_, invoker) = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        invoker.invoke(args).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn required_str(args: &Value, key: &str, tool: &str) -> Result<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AgentError::ToolFailed {
            tool: tool.to_string(),
            message: format!("missing required argument '{key}'"),
        })
}

fn parse_severity(raw: &str) -> Severity {
    match raw.to_ascii_lowercase().as_str() {
        "critical" => Severity::Critical,
        "warning" => Severity::Warning,
        _ => Severity::Info,
    }
}

/// `get_world_state`: `{summary, active_incidents}`.
pub struct GetWorldStateTool {
    pub world: Arc<WorldState>,
}

#[async_trait]
impl ToolInvoker for GetWorldStateTool {
    async fn invoke(&self, _args: Value) -> Result<Value> {
        Ok(json!({
            "summary": self.world.get_summary(),
            "active_incidents": self.world.active_incidents_summary(),
        }))
    }
}

/// `update_world_state`: sets the narrative summary.
pub struct UpdateWorldStateTool {
    pub world: Arc<WorldState>,
}

#[async_trait]
impl ToolInvoker for UpdateWorldStateTool {
    async fn invoke(&self, args: Value) -> Result<Value> {
        let summary = required_str(&args, "summary", "update_world_state")?;
        self.world.set_summary(summary);
        Ok(json!({"ok": true}))
    }
}

/// `create_incident`: add-or-update with the severity floor.
pub struct CreateIncidentTool {
    pub world: Arc<WorldState>,
}

#[async_trait]
impl ToolInvoker for CreateIncidentTool {
    async fn invoke(&self, args: Value) -> Result<Value> {
        let id = required_str(&args, "id", "create_incident")?;
        let severity = parse_severity(&required_str(&args, "severity", "create_incident")?);
        let source = required_str(&args, "source", "create_incident")?;
        let summary = required_str(&args, "summary", "create_incident")?;
        self.world.add_or_update_incident(&id, severity, source, summary);
        Ok(json!({"ok": true, "id": id}))
    }
}

/// `resolve_incident`: marks an incident resolved.
pub struct ResolveIncidentTool {
    pub world: Arc<WorldState>,
}

#[async_trait]
impl ToolInvoker for ResolveIncidentTool {
    async fn invoke(&self, args: Value) -> Result<Value> {
        let id = required_str(&args, "id", "resolve_incident")?;
        let resolved = self.world.resolve_incident(&id);
        Ok(json!({"ok": resolved, "id": id}))
    }
}

/// Lookup from agent name to A2A endpoint URL.
pub trait A2aDirectory: Send + Sync {
    fn endpoint_for(&self, agent_name: &str) -> Option<String>;
}

impl A2aDirectory for HashMap<String, String> {
    fn endpoint_for(&self, agent_name: &str) -> Option<String> {
        self.get(agent_name).cloned()
    }
}

/// `call_a2a_agent`: forward a message to a named remote agent.
pub struct CallA2aAgentTool {
    pub client: A2aClient,
    pub directory: Arc<dyn A2aDirectory>,
}

#[async_trait]
impl ToolInvoker for CallA2aAgentTool {
    async fn invoke(&self, args: Value) -> Result<Value> {
        let agent_name = required_str(&args, "agent_name", "call_a2a_agent")?;
        let message = required_str(&args, "message", "call_a2a_agent")?;
        let endpoint = self
            .directory
            .endpoint_for(&agent_name)
            .ok_or_else(|| AgentError::UnknownA2aAgent(agent_name.clone()))?;
        let reply = self.client.send_message(&agent_name, &endpoint, &message).await?;
        match reply.state {
            Some(state) => Ok(json!({"state": state, "text": reply.text})),
            None => Ok(json!({"text": reply.text})),
        }
    }
}

/// Register the built-in tools with their definitions.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    world: Arc<WorldState>,
    a2a: A2aClient,
    directory: Arc<dyn A2aDirectory>,
) {
    registry.register(
        ToolDefinition {
            name: "get_world_state".to_string(),
            description: "Read the current world summary and the active incidents.".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        },
        Arc::new(GetWorldStateTool { world: world.clone() }),
    );
    registry.register(
        ToolDefinition {
            name: "update_world_state".to_string(),
            description: "Replace the narrative world summary.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string", "description": "New narrative summary"}
                },
                "required": ["summary"]
            }),
        },
        Arc::new(UpdateWorldStateTool { world: world.clone() }),
    );
    registry.register(
        ToolDefinition {
            name: "create_incident".to_string(),
            description: "Create or update an incident. Severity never downgrades. \
                          Use a stable human-readable slug as the id, never a UUID."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "Stable incident slug, e.g. db-connection-exhaustion"},
                    "severity": {"type": "string", "enum": ["info", "warning", "critical"]},
                    "source": {"type": "string"},
                    "summary": {"type": "string"}
                },
                "required": ["id", "severity", "source", "summary"]
            }),
        },
        Arc::new(CreateIncidentTool { world: world.clone() }),
    );
    registry.register(
        ToolDefinition {
            name: "resolve_incident".to_string(),
            description: "Mark an incident as resolved.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"id": {"type": "string"}},
                "required": ["id"]
            }),
        },
        Arc::new(ResolveIncidentTool { world }),
    );
    registry.register(
        ToolDefinition {
            name: "call_a2a_agent".to_string(),
            description: "Forward a message to a named remote A2A agent and return its reply.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "agent_name": {"type": "string"},
                    "message": {"type": "string"}
                },
                "required": ["agent_name", "message"]
            }),
        },
        Arc::new(CallA2aAgentTool { client: a2a, directory }),
    );
}
