//! The master-agent configuration record: lifecycle switch and tuning for
//! the event pipeline, plus the world-state snapshot written back to status.

use crate::conditions::Condition;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An MCP endpoint whose tools are exposed to the master agent.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpEndpoint {
    pub name: String,
    pub url: String,
}

/// Embedded A2A server toggle.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct A2aSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_a2a_port")]
    pub port: u16,
}

pub fn default_a2a_port() -> u16 {
    8084
}

/// Batch-triage tuning. When enabled, events are grouped and prioritised in
/// aggregated LLM calls instead of one call per event.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchTriageSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_queue_threshold")]
    pub queue_threshold: usize,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

pub fn default_queue_threshold() -> usize {
    10
}

pub fn default_window_seconds() -> u64 {
    30
}

pub fn default_max_concurrent_events() -> usize {
    5
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "agentregistry.dev",
    version = "v1alpha1",
    kind = "MasterAgentConfig",
    plural = "masteragentconfigs",
    namespaced,
    status = "MasterAgentStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct MasterAgentConfigSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Logical name of the Model catalog entry to run on.
    pub model_ref: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_endpoints: Vec<McpEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a2a: Option<A2aSpec>,
    #[serde(default = "default_max_concurrent_events")]
    pub max_concurrent_events: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_triage: Option<BatchTriageSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Incident snapshot surfaced in status.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IncidentStatus {
    pub id: String,
    pub severity: String,
    pub source: String,
    pub summary: String,
    pub status: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MasterAgentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incidents: Vec<IncidentStatus>,
    #[serde(default)]
    pub queue_depth: usize,
    #[serde(default)]
    pub events_processed: u64,
    #[serde(default)]
    pub llm_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a2a_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults() {
        let spec: MasterAgentConfigSpec = serde_json::from_value(serde_json::json!({
            "enabled": true,
            "modelRef": "ops-model"
        }))
        .unwrap();
        assert_eq!(spec.max_concurrent_events, 5);
        assert!(spec.batch_triage.is_none());
    }

    #[test]
    fn batch_triage_defaults() {
        let triage: BatchTriageSpec = serde_json::from_value(serde_json::json!({"enabled": true})).unwrap();
        assert_eq!(triage.queue_threshold, 10);
        assert_eq!(triage.window_seconds, 30);
    }
}
