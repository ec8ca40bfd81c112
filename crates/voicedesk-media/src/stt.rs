//! Speech-to-text for whole utterances.

use std::path::Path;

use tracing::debug;

use voicedesk_core::error::{Result, VoicedeskError};

/// Wrap raw 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len() * 2; // 2 bytes per i16 sample
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in pcm {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

/// Client for an OpenAI-compatible `/v1/audio/transcriptions` endpoint.
pub struct Transcriber {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl Transcriber {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Transcribe raw mono 16-bit PCM at the given sample rate.
    pub async fn transcribe_pcm(&self, pcm: &[i16], sample_rate: u32) -> Result<String> {
        let wav = pcm_to_wav(pcm, sample_rate, 1, 16);
        self.transcribe_wav_bytes(wav).await
    }

    /// Transcribe an existing WAV file.
    pub async fn transcribe_wav_file(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        self.transcribe_wav_bytes(bytes).await
    }

    async fn transcribe_wav_bytes(&self, wav: Vec<u8>) -> Result<String> {
        let url = format!("{}/v1/audio/transcriptions", self.base_url.trim_end_matches('/'));
        debug!(url, model = %self.model, wav_bytes = wav.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoicedeskError::Transcription(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", part);

        let mut request = self.client.post(&url).multipart(form);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| VoicedeskError::Transcription(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(VoicedeskError::Transcription(format!(
                "transcription API error {status}: {body}"
            )));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| VoicedeskError::Transcription(e.to_string()))?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_header_generation() {
        let pcm = vec![0i16; 24_000]; // 1 second at 24kHz
        let wav = pcm_to_wav(&pcm, 24_000, 1, 16);

        // WAV header is 44 bytes
        assert_eq!(wav.len(), 44 + 24_000 * 2);

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        // Sample rate at bytes 24-27
        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 24_000);

        // Mono, 16-bit
        let channels = u16::from_le_bytes([wav[22], wav[23]]);
        assert_eq!(channels, 1);
        let bits = u16::from_le_bytes([wav[34], wav[35]]);
        assert_eq!(bits, 16);
    }

    #[test]
    fn test_wav_samples_are_little_endian() {
        let wav = pcm_to_wav(&[0x0102, -2], 24_000, 1, 16);
        assert_eq!(&wav[44..48], &[0x02, 0x01, 0xFE, 0xFF]);
    }
}
