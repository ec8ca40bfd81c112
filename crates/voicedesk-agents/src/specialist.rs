//! Specialist runtime loop — streams the model reply and executes tools.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use voicedesk_core::error::{Result, VoicedeskError};
use voicedesk_core::types::UserContext;
use voicedesk_providers::{
    format_tools, messages, CompletionClient, CompletionRequest, ToolCallRequest,
};

use crate::prompt;
use crate::tools::{ToolContext, ToolOutput, ToolRegistry};
use crate::{SpecialistDescriptor, TurnEvent};

/// Runs one specialist's reply generation for a turn.
pub struct SpecialistRuntime {
    client: Arc<dyn CompletionClient>,
    model: String,
    max_tokens: u32,
    max_tool_iterations: u32,
    max_reply_chars: usize,
}

impl SpecialistRuntime {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        model: String,
        max_tokens: u32,
        max_tool_iterations: u32,
        max_reply_chars: usize,
    ) -> Self {
        Self {
            client,
            model,
            max_tokens,
            max_tool_iterations,
            max_reply_chars,
        }
    }

    /// Run the specialist loop: stream the model, execute requested tools,
    /// feed results back, until the model stops asking for tools or the
    /// iteration cap is hit. Returns the complete reply text.
    pub async fn run(
        &self,
        descriptor: &SpecialistDescriptor,
        user: &UserContext,
        tools: &ToolRegistry,
        context: &ToolContext,
        history: Vec<serde_json::Value>,
        text: &str,
        event_tx: &mpsc::UnboundedSender<TurnEvent>,
    ) -> Result<String> {
        let system = prompt::specialist_instructions(descriptor, user);
        let tool_defs = if descriptor.tools.is_empty() {
            None
        } else {
            Some(format_tools(&tools.definitions_for(&descriptor.tools)))
        };

        let mut msgs = history;
        msgs.push(messages::user(text));

        let mut final_text = String::new();

        for iteration in 0..self.max_tool_iterations {
            debug!(specialist = %descriptor.name, iteration, "Specialist loop iteration");

            let request = CompletionRequest {
                model: self.model.clone(),
                messages: msgs.clone(),
                max_tokens: self.max_tokens,
                temperature: None,
                tools: tool_defs.clone(),
                system: Some(system.clone()),
                json_mode: false,
            };

            let mut stream = self
                .client
                .stream(&request)
                .await
                .map_err(|e| VoicedeskError::SpecialistExecution(e.to_string()))?;

            let mut response_text = String::new();
            let mut tool_uses: Vec<ToolCallRequest> = Vec::new();
            let mut stop_reason = None;

            while let Some(chunk_result) = stream.next().await {
                let chunk =
                    chunk_result.map_err(|e| VoicedeskError::SpecialistExecution(e.to_string()))?;

                if let Some(ref delta) = chunk.delta {
                    response_text.push_str(delta);
                    let _ = event_tx.send(TurnEvent::PartialReply {
                        delta: delta.clone(),
                    });
                }

                if let Some(tool_use) = chunk.tool_use {
                    let arguments: serde_json::Value =
                        serde_json::from_str(&tool_use.input_json).unwrap_or(json!({}));
                    tool_uses.push(ToolCallRequest {
                        id: tool_use.id,
                        name: tool_use.name,
                        arguments,
                    });
                }

                if let Some(reason) = chunk.stop_reason {
                    stop_reason = Some(reason);
                }
            }

            let wants_tools = stop_reason
                .as_deref()
                .is_some_and(|r| self.client.is_tool_use_stop(r));

            if !wants_tools || tool_uses.is_empty() {
                final_text = response_text;
                break;
            }

            // Cap reached: keep what the model streamed rather than
            // dropping the turn's reply on the floor.
            if iteration + 1 == self.max_tool_iterations {
                warn!(
                    specialist = %descriptor.name,
                    cap = self.max_tool_iterations,
                    "Tool iteration cap reached; returning the last streamed text"
                );
                final_text = response_text;
                break;
            }

            msgs.push(messages::assistant_tool_calls(&response_text, &tool_uses));

            for call in &tool_uses {
                info!(tool = %call.name, specialist = %descriptor.name, "Executing tool");
                let _ = event_tx.send(TurnEvent::ToolCall {
                    tool: call.name.clone(),
                    params: call.arguments.clone(),
                });

                let output = self.execute_tool(descriptor, tools, context, call).await;

                let _ = event_tx.send(TurnEvent::ToolResult {
                    tool: call.name.clone(),
                    content: output.content.clone(),
                    is_error: output.is_error,
                });
                msgs.push(messages::tool_result(&call.id, &output.content));
            }
        }

        if final_text.len() > self.max_reply_chars {
            warn!(
                specialist = %descriptor.name,
                len = final_text.len(),
                "Reply exceeds the spoken-reply limit; truncating"
            );
            final_text = truncate_at_boundary(&final_text, self.max_reply_chars);
        }

        Ok(final_text)
    }

    async fn execute_tool(
        &self,
        descriptor: &SpecialistDescriptor,
        tools: &ToolRegistry,
        context: &ToolContext,
        call: &ToolCallRequest,
    ) -> ToolOutput {
        // The model only sees the descriptor's tools, but enforce the
        // assignment anyway.
        if !descriptor.tools.iter().any(|t| t == &call.name) {
            return ToolOutput {
                content: format!("Tool not available to this specialist: {}", call.name),
                is_error: true,
            };
        }
        match tools.get(&call.name) {
            Some(tool) => match tool.execute(call.arguments.clone(), context).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(%e, tool = %call.name, "Tool execution error");
                    ToolOutput {
                        content: format!("Tool error: {e}"),
                        is_error: true,
                    }
                }
            },
            None => ToolOutput {
                content: format!("Unknown tool: {}", call.name),
                is_error: true,
            },
        }
    }
}

/// Cut at a char boundary at or below `limit` bytes.
fn truncate_at_boundary(text: &str, limit: usize) -> String {
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
