//! The chat transport contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A sampling failure reported by the transport.
///
/// The orchestrator makes a single attempt per iteration and converts
/// this into a low-confidence result.
#[derive(Debug, Error)]
#[error("sampling request error: {message}")]
pub struct SamplingError {
    /// Transport-provided failure message.
    pub message: String,
}

impl SamplingError {
    /// Creates a sampling error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        SamplingError {
            message: message.into(),
        }
    }
}

/// The role of a conversation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sent by the orchestrator.
    User,
    /// Produced by the model.
    Assistant,
}

/// One typed block of message content.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// A tool invocation requested by the model.
    ToolUse {
        /// Correlation id echoed back in the tool result.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input object.
        input: Value,
    },
    /// The result of a tool invocation.
    ToolResult {
        /// The `id` of the corresponding tool use.
        tool_use_id: String,
        /// Whether the tool failed.
        #[serde(default)]
        is_error: bool,
        /// Tool output, possibly truncated.
        content: String,
    },
}

/// One conversation message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced the message.
    pub role: Role,
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    /// A user message with a single text block.
    pub fn user_text(text: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}

/// A tool made available to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema of the input object.
    pub input_schema: Value,
}

/// A sampling request submitted to the transport.
#[derive(Clone, Debug, Serialize)]
pub struct ChatRequest {
    /// System prompt for the investigation.
    pub system_prompt: String,
    /// The conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Token budget for the reply.
    pub max_tokens: u32,
    /// The fixed tool set.
    pub tools: Vec<ToolDefinition>,
    /// Always `auto`; the model decides when to call tools.
    pub tool_choice: String,
}

/// A transport reply.
#[derive(Clone, Debug, Deserialize)]
pub struct ChatResponse {
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
    /// Model identifier, when the transport reports one.
    pub model: Option<String>,
}

/// The conversational transport underneath the orchestrator.
///
/// Implementations wrap an external model endpoint; the orchestrator
/// treats every call as synchronous and cancellation-observing.
pub trait ChatTransport {
    /// Whether the transport can sample at all.
    fn is_sampling_supported(&self) -> bool;

    /// Whether the transport honors the `tools` contract.
    fn is_tool_use_supported(&self) -> bool;

    /// Submits one request and returns the model's reply.
    fn submit(&mut self, request: &ChatRequest) -> Result<ChatResponse, SamplingError>;
}
