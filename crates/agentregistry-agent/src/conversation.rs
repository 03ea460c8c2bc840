//! Conversation model for the LLM tool loop.
//!
//! A turn is a sequence of [`ChatMessage`] values; the variants carry only
//! the fields their role can legally have, so a tool-call id cannot appear
//! on a user message and tool calls cannot appear outside an assistant
//! turn. The call id is the only thing pairing a [`ToolCall`] with the
//! [`ChatMessage::ToolResult`] that answers it — it is assigned by the
//! provider and travels through the loop verbatim.

/// One message in a tool-loop conversation. In-memory only; the wire
/// adapter in [`crate::llm`] maps it to the provider's request shape.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatMessage {
    /// Standing instructions for the whole loop.
    System { content: String },
    /// The prompt driving this turn.
    User { content: String },
    /// A model turn; `tool_calls` is empty on a final turn.
    Assistant {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    /// Answer to one tool call, paired by the provider-assigned id.
    ToolResult { call_id: String, content: String },
}

impl ChatMessage {
    /// Tool calls requested by this message; empty for every non-assistant
    /// variant.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            ChatMessage::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ChatMessage::System { content }
            | ChatMessage::User { content }
            | ChatMessage::Assistant { content, .. }
            | ChatMessage::ToolResult { content, .. } => content,
        }
    }
}

/// A tool invocation requested by the model. The id is opaque and owned by
/// the provider; nothing in this crate mints one.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}
