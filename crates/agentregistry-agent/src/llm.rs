//! Chat-model seam and the OpenAI-compatible implementation.
//!
//! The pipeline programs against [`ChatModel`]; production wires in
//! [`OpenAiChatModel`], which speaks the chat-completions protocol against
//! any OpenAI-compatible base URL. Tests substitute hand-written stubs.

use crate::conversation::{ChatMessage, ToolCall};
use crate::error::{AgentError, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall,
        FunctionObject,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default deadline for a single chat-completions call.
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

/// Tool surface advertised to the model. The three-field shape is the wire
/// format's.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool parameters.
    pub parameters: serde_json::Value,
}

/// Why a model turn ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// `stop`: the turn is complete.
    TurnComplete,
    /// `tool_calls`: the turn continues after tool results.
    ToolCalls,
    /// `length`: output truncated at the token limit.
    MaxTokens,
}

/// Token accounting for one call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// One model reply. Not itself a conversation message: the caller decides
/// how (and whether) it enters the history, carrying the tool-call ids
/// through unchanged.
#[derive(Clone, Debug)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub outcome: TurnOutcome,
    pub usage: Option<TokenUsage>,
}

/// The seam between the pipeline and the wire.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse>;

    /// Identity of the backing endpoint, used to detect config changes.
    fn identity(&self) -> String;
}

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    /// Base URL; the client appends `/v1/chat/completions`.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl LlmConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            temperature: None,
            max_tokens: None,
            timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
            max_retries: 2,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiChatModel {
    client: Client<OpenAIConfig>,
    config: LlmConfig,
}

impl OpenAiChatModel {
    pub fn new(config: LlmConfig) -> Self {
        let mut openai_config = OpenAIConfig::default().with_api_base(format!(
            "{}/v1",
            config.base_url.trim_end_matches('/')
        ));
        if let Some(key) = &config.api_key {
            openai_config = openai_config.with_api_key(key.clone());
        }
        Self {
            client: Client::with_config(openai_config),
            config,
        }
    }

    async fn generate_once(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse> {
        let request_messages: Vec<ChatCompletionRequestMessage> =
            messages.iter().map(convert_message).collect::<Result<Vec<_>>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.config.model).messages(request_messages);
        if let Some(temperature) = self.config.temperature {
            builder.temperature(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            builder.max_tokens(max_tokens);
        }
        if !tools.is_empty() {
            let request_tools: Vec<ChatCompletionTool> =
                tools.iter().map(convert_tool_definition).collect();
            builder.tools(request_tools);
        }
        let request = builder
            .build()
            .map_err(|e| AgentError::LlmApi(format!("failed to build request: {e}")))?;

        let response = tokio::time::timeout(self.config.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| AgentError::LlmApi(format!(
                "chat completion timed out after {}s",
                self.config.timeout.as_secs()
            )))?
            .map_err(|e| AgentError::LlmApi(e.to_string()))?;

        let usage = response.usage.as_ref().and_then(|u| {
            if u.prompt_tokens == 0 && u.completion_tokens == 0 {
                None
            } else {
                Some(TokenUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                })
            }
        });

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::InvalidResponse("no choices in response".to_string()))?;

        let content = choice.message.content.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                // A malformed argument payload still travels through the
                // loop so the paired result can report the failure.
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::String(tc.function.arguments)),
            })
            .collect();

        let outcome = match choice.finish_reason {
            Some(async_openai::types::FinishReason::ToolCalls) => TurnOutcome::ToolCalls,
            Some(async_openai::types::FinishReason::Length) => TurnOutcome::MaxTokens,
            _ if !tool_calls.is_empty() => TurnOutcome::ToolCalls,
            _ => TurnOutcome::TurnComplete,
        };

        Ok(LlmResponse {
            content,
            tool_calls,
            outcome,
            usage,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse> {
        let mut attempt = 0;
        loop {
            match self.generate_once(messages, tools).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let message = e.to_string();
                    if attempt >= self.config.max_retries || !is_retryable(&message) {
                        return Err(e);
                    }
                    let delay = Duration::from_millis(500 * u64::from(attempt + 1));
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %message,
                        delay_ms = delay.as_millis() as u64,
                        "retrying chat completion after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn identity(&self) -> String {
        format!("{}#{}", self.config.base_url, self.config.model)
    }
}

fn is_retryable(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("timed out")
        || lowered.contains("timeout")
        || lowered.contains("429")
        || lowered.contains("rate limit")
        || lowered.contains("500")
        || lowered.contains("502")
        || lowered.contains("503")
        || lowered.contains("overloaded")
        || lowered.contains("connection")
}

fn convert_tool_definition(tool: &ToolDefinition) -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: tool.name.clone(),
            description: if tool.description.is_empty() {
                None
            } else {
                Some(tool.description.clone())
            },
            parameters: Some(tool.parameters.clone()),
            strict: None,
        },
    }
}

fn convert_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
    match message {
        ChatMessage::System { content } => {
            let msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(content.clone())
                .build()
                .map_err(|e| AgentError::InvalidResponse(format!("bad system message: {e}")))?;
            Ok(ChatCompletionRequestMessage::System(msg))
        }
        ChatMessage::User { content } => {
            let msg = ChatCompletionRequestUserMessageArgs::default()
                .content(content.clone())
                .build()
                .map_err(|e| AgentError::InvalidResponse(format!("bad user message: {e}")))?;
            Ok(ChatCompletionRequestMessage::User(msg))
        }
        ChatMessage::Assistant {
            content,
            tool_calls,
        } => {
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
            builder.content(content.clone());
            if !tool_calls.is_empty() {
                let calls: Vec<ChatCompletionMessageToolCall> = tool_calls
                    .iter()
                    .map(|tc| ChatCompletionMessageToolCall {
                        id: tc.id.clone(),
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.to_string(),
                        },
                    })
                    .collect();
                builder.tool_calls(calls);
            }
            let msg = builder
                .build()
                .map_err(|e| AgentError::InvalidResponse(format!("bad assistant message: {e}")))?;
            Ok(ChatCompletionRequestMessage::Assistant(msg))
        }
        ChatMessage::ToolResult { call_id, content } => {
            let msg = ChatCompletionRequestToolMessageArgs::default()
                .content(content.clone())
                .tool_call_id(call_id.clone())
                .build()
                .map_err(|e| AgentError::InvalidResponse(format!("bad tool message: {e}")))?;
            Ok(ChatCompletionRequestMessage::Tool(msg))
        }
    }
}
