//! Error types for the master-agent runtime.

use thiserror::Error;

/// Agent result type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur in the master-agent runtime.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AgentError {
    /// LLM endpoint returned an error or unusable payload.
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// Response could not be interpreted.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Tool is not registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool execution failed.
    #[error("Tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    /// MCP endpoint could not be initialized.
    #[error("MCP endpoint '{name}' initialization failed: {message}")]
    McpInit { name: String, message: String },

    /// MCP operation timed out.
    #[error("MCP endpoint '{name}' timed out after {timeout_secs}s")]
    McpTimeout { name: String, timeout_secs: u64 },

    /// MCP tool call failed.
    #[error("MCP tool '{tool}' on '{server}' failed: {message}")]
    McpToolCall {
        server: String,
        tool: String,
        message: String,
    },

    /// A2A agent is not known to the directory.
    #[error("Unknown A2A agent: {0}")]
    UnknownA2aAgent(String),

    /// A2A call failed.
    #[error("A2A error: {0}")]
    A2a(String),

    /// A2A call timed out.
    #[error("A2A call to '{agent}' timed out after {timeout_secs}s")]
    A2aTimeout { agent: String, timeout_secs: u64 },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
