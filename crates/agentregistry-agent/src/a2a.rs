//! Outgoing A2A calls: a JSON-RPC `message/send` with a user-role text part,
//! answered by either a `Message` or a `Task`.

use crate::error::{AgentError, Result};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

/// Default deadline for a single A2A call.
pub const DEFAULT_A2A_TIMEOUT_SECS: u64 = 60;

/// Reply from a remote agent. `state` is present only for task-shaped
/// responses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct A2aReply {
    pub state: Option<String>,
    pub text: String,
}

/// JSON-RPC client for remote A2A endpoints.
#[derive(Clone)]
pub struct A2aClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl A2aClient {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_A2A_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// Send a user-role text message and extract the reply.
    pub async fn send_message(&self, agent: &str, endpoint: &str, message: &str) -> Result<A2aReply> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": "message/send",
            "params": {
                "message": {
                    "role": "user",
                    "messageId": Uuid::new_v4().to_string(),
                    "parts": [{"kind": "text", "text": message}],
                }
            }
        });

        let send = async {
            let response = self
                .http
                .post(endpoint)
                .json(&request)
                .send()
                .await?
                .error_for_status()?;
            response.json::<Value>().await
        };

        let body = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| AgentError::A2aTimeout {
                agent: agent.to_string(),
                timeout_secs: self.timeout.as_secs(),
            })??;

        if let Some(error) = body.get("error") {
            return Err(AgentError::A2a(format!("agent '{agent}' returned error: {error}")));
        }
        let result = body
            .get("result")
            .ok_or_else(|| AgentError::A2a(format!("agent '{agent}' returned no result")))?;
        parse_result(result)
            .ok_or_else(|| AgentError::A2a(format!("agent '{agent}' returned an unrecognised result shape")))
    }
}

impl Default for A2aClient {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_result(result: &Value) -> Option<A2aReply> {
    match result.get("kind").and_then(Value::as_str) {
        Some("message") => Some(A2aReply {
            state: None,
            text: collect_text(result.get("parts")),
        }),
        Some("task") => {
            let state = result
                .pointer("/status/state")
                .and_then(Value::as_str)
                .map(str::to_string);
            // Prefer the status message; fall back to artifact parts.
            let mut text = collect_text(result.pointer("/status/message/parts"));
            if text.is_empty() {
                if let Some(artifacts) = result.get("artifacts").and_then(Value::as_array) {
                    text = artifacts
                        .iter()
                        .map(|a| collect_text(a.get("parts")))
                        .filter(|t| !t.is_empty())
                        .collect::<Vec<_>>()
                        .join("\n");
                }
            }
            Some(A2aReply { state, text })
        }
        _ => None,
    }
}

fn collect_text(parts: Option<&Value>) -> String {
    parts
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.get("kind").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}
