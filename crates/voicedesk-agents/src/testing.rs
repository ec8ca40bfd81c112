//! Scripted completion client for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use voicedesk_providers::{
    ChunkStream, Completion, CompletionChunk, CompletionClient, CompletionRequest, ToolUseChunk,
};

/// One scripted backend interaction, consumed in order across both
/// `complete` and `stream` calls.
pub enum Step {
    /// `complete()` returns this text.
    Complete(String),
    /// `stream()` yields these chunks, then a stop.
    Stream(Vec<StreamItem>),
    /// The next call fails with this message.
    Fail(String),
}

pub enum StreamItem {
    Delta(String),
    Tool {
        id: String,
        name: String,
        input_json: String,
    },
}

pub struct ScriptedClient {
    steps: Mutex<VecDeque<Step>>,
}

impl ScriptedClient {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
        }
    }

    pub fn completing(texts: Vec<String>) -> Self {
        Self::new(texts.into_iter().map(Step::Complete).collect())
    }

    pub fn failing(message: &str) -> Self {
        Self::new(vec![Step::Fail(message.into())])
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap().len()
    }

    fn pop(&self) -> Option<Step> {
        self.steps.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    fn id(&self) -> &str {
        "scripted"
    }

    fn is_tool_use_stop(&self, stop_reason: &str) -> bool {
        stop_reason == "tool_calls"
    }

    async fn complete(&self, _request: &CompletionRequest) -> anyhow::Result<Completion> {
        match self.pop() {
            Some(Step::Complete(text)) => Ok(Completion {
                text,
                tool_calls: vec![],
                stop_reason: Some("stop".into()),
            }),
            Some(Step::Fail(message)) => Err(anyhow::anyhow!(message)),
            Some(Step::Stream(_)) => Err(anyhow::anyhow!("script expected a stream call")),
            None => Err(anyhow::anyhow!("script exhausted")),
        }
    }

    async fn stream(&self, _request: &CompletionRequest) -> anyhow::Result<ChunkStream> {
        match self.pop() {
            Some(Step::Stream(items)) => {
                let mut chunks: Vec<anyhow::Result<CompletionChunk>> = Vec::new();
                let mut saw_tool = false;
                for item in items {
                    match item {
                        StreamItem::Delta(text) => chunks.push(Ok(CompletionChunk {
                            delta: Some(text),
                            tool_use: None,
                            stop_reason: None,
                        })),
                        StreamItem::Tool {
                            id,
                            name,
                            input_json,
                        } => {
                            saw_tool = true;
                            chunks.push(Ok(CompletionChunk {
                                delta: None,
                                tool_use: Some(ToolUseChunk {
                                    id,
                                    name,
                                    input_json,
                                }),
                                stop_reason: None,
                            }));
                        }
                    }
                }
                chunks.push(Ok(CompletionChunk {
                    delta: None,
                    tool_use: None,
                    stop_reason: Some(if saw_tool { "tool_calls" } else { "stop" }.into()),
                }));
                Ok(Box::pin(futures::stream::iter(chunks)))
            }
            Some(Step::Complete(text)) => Ok(Box::pin(futures::stream::iter(vec![
                Ok(CompletionChunk {
                    delta: Some(text),
                    tool_use: None,
                    stop_reason: None,
                }),
                Ok(CompletionChunk {
                    delta: None,
                    tool_use: None,
                    stop_reason: Some("stop".into()),
                }),
            ]))),
            Some(Step::Fail(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("script exhausted")),
        }
    }
}
