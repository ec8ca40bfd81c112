//! Minimal SSE (Server-Sent Events) parser over a reqwest byte stream.

use futures::Stream;
use tokio_stream::StreamExt;

/// A parsed SSE event. Only `event:` and `data:` fields are kept.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

struct SseState {
    byte_stream: std::pin::Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    buffer: String,
    current_event: Option<String>,
    current_data: Vec<String>,
}

impl SseState {
    fn take_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            return None;
        }
        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
        };
        self.current_data.clear();
        Some(event)
    }
}

/// Parse a reqwest response body as an SSE stream.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = anyhow::Result<SseEvent>> {
    futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            current_event: None,
            current_data: Vec::new(),
        },
        |mut state| async move {
            loop {
                // Lines may span byte chunks; consume complete lines first.
                if let Some(newline_pos) = state.buffer.find('\n') {
                    let line = state.buffer[..newline_pos].trim_end_matches('\r').to_string();
                    state.buffer = state.buffer[newline_pos + 1..].to_string();

                    if line.is_empty() {
                        // Blank line dispatches the pending event
                        if let Some(event) = state.take_event() {
                            return Some((Ok(event), state));
                        }
                        continue;
                    }

                    if line.starts_with(':') {
                        // Comment
                        continue;
                    }

                    if let Some(value) = line.strip_prefix("event:") {
                        state.current_event = Some(value.trim_start().to_string());
                    } else if let Some(value) = line.strip_prefix("data:") {
                        state.current_data.push(value.trim_start().to_string());
                    }
                    // Other fields are ignored
                    continue;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    }
                    Some(Err(e)) => {
                        return Some((Err(anyhow::anyhow!("SSE stream error: {e}")), state));
                    }
                    None => {
                        // Stream ended; dispatch any trailing event.
                        if let Some(event) = state.take_event() {
                            return Some((Ok(event), state));
                        }
                        return None;
                    }
                }
            }
        },
    )
}
