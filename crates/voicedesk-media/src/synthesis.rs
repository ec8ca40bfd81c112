//! Speech synthesis — turns reply text into PCM audio frames.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use voicedesk_core::error::{Result, VoicedeskError};

use crate::AudioFrame;

/// Converts one text chunk into a sequence of fixed-size PCM frames.
///
/// Implementations send frames through `frame_tx` as they become available;
/// the bounded channel provides backpressure against a slow sink. A dropped
/// receiver means the pipeline is shutting down and is not an error.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, frame_tx: &mpsc::Sender<AudioFrame>) -> Result<()>;

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;
}

/// Synthesizer for an OpenAI-style `/v1/audio/speech` endpoint returning a
/// raw s16le PCM byte stream.
pub struct HttpSynthesizer {
    base_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    sample_rate: u32,
    frame_samples: usize,
    client: reqwest::Client,
}

impl HttpSynthesizer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
        sample_rate: u32,
        frame_samples: usize,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            voice: voice.into(),
            sample_rate,
            frame_samples,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, frame_tx: &mpsc::Sender<AudioFrame>) -> Result<()> {
        let url = format!("{}/v1/audio/speech", self.base_url.trim_end_matches('/'));
        debug!(url, voice = %self.voice, text_len = text.len(), "Starting synthesis request");

        let mut request = self.client.post(&url).json(&serde_json::json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
            "response_format": "pcm",
        }));
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| VoicedeskError::Synthesis(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(VoicedeskError::Synthesis(format!(
                "synthesis API error {status}: {body}"
            )));
        }

        let mut stream = resp.bytes_stream();
        let mut framer = Framer::new(self.frame_samples);

        while let Some(chunk_result) = stream.next().await {
            let bytes = chunk_result.map_err(|e| VoicedeskError::Synthesis(e.to_string()))?;
            for frame in framer.push(&bytes) {
                if frame_tx.send(frame).await.is_err() {
                    debug!("Frame receiver dropped, stopping synthesis stream");
                    return Ok(());
                }
            }
        }

        if let Some(frame) = framer.flush() {
            let _ = frame_tx.send(frame).await;
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Re-frames an s16le byte stream into fixed-size sample frames, carrying
/// the odd trailing byte between pushes.
struct Framer {
    frame_samples: usize,
    pending: Vec<i16>,
    carry: Option<u8>,
}

impl Framer {
    fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
            carry: None,
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        let mut iter = bytes.iter().copied();

        if let Some(low) = self.carry.take() {
            match iter.next() {
                Some(high) => self.pending.push(i16::from_le_bytes([low, high])),
                None => {
                    self.carry = Some(low);
                    return frames;
                }
            }
        }

        loop {
            let Some(low) = iter.next() else { break };
            let Some(high) = iter.next() else {
                self.carry = Some(low);
                break;
            };
            self.pending.push(i16::from_le_bytes([low, high]));
            if self.pending.len() == self.frame_samples {
                frames.push(AudioFrame::new(std::mem::take(&mut self.pending)));
            }
        }
        frames
    }

    fn flush(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            None
        } else {
            Some(AudioFrame::new(std::mem::take(&mut self.pending)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_emits_full_frames_and_flushes_the_tail() {
        let mut framer = Framer::new(2);
        // Three samples: 1, 2, 3
        let frames = framer.push(&[1, 0, 2, 0, 3, 0]);
        assert_eq!(frames, vec![AudioFrame::new(vec![1, 2])]);
        let tail = framer.flush().unwrap();
        assert_eq!(tail.samples, vec![3]);
        assert!(framer.flush().is_none());
    }

    #[test]
    fn framer_carries_an_odd_byte_across_pushes() {
        let mut framer = Framer::new(4);
        assert!(framer.push(&[0x34]).is_empty());
        assert!(framer.push(&[0x12]).is_empty());
        let tail = framer.flush().unwrap();
        assert_eq!(tail.samples, vec![0x1234]);
    }

    #[test]
    fn framer_handles_negative_samples() {
        let mut framer = Framer::new(1);
        let frames = framer.push(&[0xFE, 0xFF]);
        assert_eq!(frames, vec![AudioFrame::new(vec![-2])]);
    }
}
