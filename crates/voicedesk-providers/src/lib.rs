//! Completion service abstraction.
//!
//! The orchestration engine treats the language-model service as opaque:
//! either a single request/response completion (guardrails, triage
//! classification) or a token stream (specialist replies). Implementations
//! provide the [`CompletionClient`] trait.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub mod openai;
pub mod sse;

/// A request to the completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    /// Chat messages in provider wire format; build with the [`messages`]
    /// helpers.
    pub messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub tools: Option<Vec<serde_json::Value>>,
    pub system: Option<String>,
    /// Request a strict-JSON reply (guardrail verdicts, routing decisions).
    pub json_mode: bool,
}

/// A complete (non-streamed) reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub stop_reason: Option<String>,
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A streamed chunk of a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub delta: Option<String>,
    pub tool_use: Option<ToolUseChunk>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseChunk {
    pub id: String,
    pub name: String,
    pub input_json: String,
}

/// Tool metadata advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<CompletionChunk>> + Send>>;

/// The completion service trait. One single in-flight call per turn stage.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Client identifier (e.g. "openai").
    fn id(&self) -> &str;

    /// One-shot completion; used by the guardrail stage and the router.
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<Completion>;

    /// Streamed completion; used by specialist execution.
    async fn stream(&self, request: &CompletionRequest) -> anyhow::Result<ChunkStream>;

    /// Whether a stop reason means the model wants tool results.
    fn is_tool_use_stop(&self, stop_reason: &str) -> bool;
}

/// Wire-format message constructors.
pub mod messages {
    use super::*;

    pub fn user(text: &str) -> serde_json::Value {
        json!({ "role": "user", "content": text })
    }

    pub fn assistant(text: &str) -> serde_json::Value {
        json!({ "role": "assistant", "content": text })
    }

    pub fn assistant_tool_calls(
        text: &str,
        calls: &[ToolCallRequest],
    ) -> serde_json::Value {
        let tool_calls: Vec<serde_json::Value> = calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": {
                        "name": c.name,
                        "arguments": c.arguments.to_string(),
                    }
                })
            })
            .collect();
        let mut msg = json!({ "role": "assistant", "tool_calls": tool_calls });
        if !text.is_empty() {
            msg["content"] = json!(text);
        }
        msg
    }

    pub fn tool_result(tool_call_id: &str, content: &str) -> serde_json::Value {
        json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "content": content,
        })
    }
}

/// Format tool definitions for an OpenAI-style function-calling API.
pub fn format_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters_schema,
                }
            })
        })
        .collect()
}
