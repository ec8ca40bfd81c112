//! OpenAI-compatible Chat Completions client.
//!
//! Implements both the one-shot completion used by the guardrail stage and
//! the triage router (optionally in strict-JSON mode) and the streaming
//! completion used by specialist execution.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use crate::sse::parse_sse_stream;
use crate::{
    ChunkStream, Completion, CompletionChunk, CompletionClient, CompletionRequest,
    ToolCallRequest, ToolUseChunk,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiClient {
    pub base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> ChatRequest {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(request.messages.iter().cloned());

        ChatRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            stream,
            temperature: request.temperature,
            tools: request.tools.clone(),
            response_format: request
                .json_mode
                .then(|| json!({ "type": "json_object" })),
        }
    }

    async fn post(&self, body: &ChatRequest) -> anyhow::Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("completion API error {status}: {text}");
        }
        Ok(response)
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates tool call data across streaming deltas.
#[derive(Debug, Clone)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_chunk(self) -> CompletionChunk {
        CompletionChunk {
            delta: None,
            tool_use: Some(ToolUseChunk {
                id: self.id,
                name: self.name,
                input_json: self.arguments,
            }),
            stop_reason: None,
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn id(&self) -> &str {
        "openai"
    }

    fn is_tool_use_stop(&self, stop_reason: &str) -> bool {
        stop_reason == "tool_calls"
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<Completion> {
        let body = self.build_body(request, false);
        debug!(model = %body.model, json_mode = request.json_mode, "Requesting completion");

        let response: ChatResponse = self.post(&body).await?.json().await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("completion reply carried no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(json!({})),
            })
            .collect();

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            stop_reason: choice.finish_reason,
        })
    }

    async fn stream(&self, request: &CompletionRequest) -> anyhow::Result<ChunkStream> {
        let body = self.build_body(request, true);
        debug!(model = %body.model, base_url = %self.base_url, "Streaming completion");

        let response = self.post(&body).await?;
        let sse_stream = parse_sse_stream(response);

        let chunk_stream = futures::stream::unfold(
            StreamState {
                sse: Box::pin(sse_stream),
                tool_calls: Vec::new(),
            },
            |mut state| async move {
                loop {
                    match state.sse.next().await {
                        Some(Ok(sse_event)) => {
                            let data = sse_event.data.trim();

                            // The stream terminates with "data: [DONE]"
                            if data == "[DONE]" {
                                if !state.tool_calls.is_empty() {
                                    let acc = state.tool_calls.remove(0);
                                    return Some((Ok(acc.into_chunk()), state));
                                }
                                return None;
                            }

                            let chunk: ChatChunk = match serde_json::from_str(data) {
                                Ok(c) => c,
                                Err(e) => {
                                    trace!(%e, data, "Failed to parse completion chunk");
                                    continue;
                                }
                            };

                            let choice = match chunk.choices.first() {
                                Some(c) => c,
                                None => continue,
                            };

                            // Accumulate tool call deltas
                            if let Some(ref tc_deltas) = choice.delta.tool_calls {
                                for tc in tc_deltas {
                                    while state.tool_calls.len() <= tc.index {
                                        state.tool_calls.push(ToolCallAccumulator {
                                            id: String::new(),
                                            name: String::new(),
                                            arguments: String::new(),
                                        });
                                    }
                                    let acc = &mut state.tool_calls[tc.index];
                                    if let Some(ref id) = tc.id {
                                        acc.id = id.clone();
                                    }
                                    if let Some(ref f) = tc.function {
                                        if let Some(ref name) = f.name {
                                            acc.name = name.clone();
                                        }
                                        if let Some(ref args) = f.arguments {
                                            acc.arguments.push_str(args);
                                        }
                                    }
                                }
                            }

                            if let Some(ref content) = choice.delta.content {
                                if !content.is_empty() {
                                    let c = CompletionChunk {
                                        delta: Some(content.clone()),
                                        tool_use: None,
                                        stop_reason: None,
                                    };
                                    return Some((Ok(c), state));
                                }
                            }

                            if let Some(ref reason) = choice.finish_reason {
                                // Flush accumulated tool calls before the stop
                                if reason == "tool_calls" && !state.tool_calls.is_empty() {
                                    let acc = state.tool_calls.remove(0);
                                    let mut c = acc.into_chunk();
                                    if state.tool_calls.is_empty() {
                                        c.stop_reason = Some(reason.clone());
                                    }
                                    return Some((Ok(c), state));
                                }

                                let c = CompletionChunk {
                                    delta: None,
                                    tool_use: None,
                                    stop_reason: Some(reason.clone()),
                                };
                                return Some((Ok(c), state));
                            }

                            continue;
                        }
                        Some(Err(e)) => {
                            return Some((Err(e), state));
                        }
                        None => {
                            if !state.tool_calls.is_empty() {
                                let acc = state.tool_calls.remove(0);
                                return Some((Ok(acc.into_chunk()), state));
                            }
                            return None;
                        }
                    }
                }
            },
        );

        Ok(Box::pin(chunk_stream))
    }
}

struct StreamState {
    sse: Pin<Box<dyn Stream<Item = anyhow::Result<crate::sse::SseEvent>> + Send>>,
    tool_calls: Vec<ToolCallAccumulator>,
}
