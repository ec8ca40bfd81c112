//! Streaming audio pipeline — synthesis producer, playback consumer, joined
//! by a bounded frame buffer.
//!
//! One pipeline instance serves one turn. The producer synthesizes each
//! incoming text chunk into frames; a full buffer suspends it until the
//! sink catches up (no frame is ever dropped). The sink is closed exactly
//! once, on end-of-stream, cancellation, or error.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use voicedesk_core::error::{Result, VoicedeskError};

use crate::synthesis::SpeechSynthesizer;
use crate::AudioFrame;

/// Where played frames go.
#[async_trait]
pub trait PlaybackSink: Send {
    async fn play(&mut self, frame: &AudioFrame) -> Result<()>;

    /// Called exactly once when the pipeline ends.
    async fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Capacity of the synthesis-to-playback frame buffer.
    pub buffer_frames: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { buffer_frames: 32 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub text_chunks: usize,
    pub frames_played: usize,
    pub samples_played: usize,
    pub cancelled: bool,
}

/// Run one pipeline pass: consume text chunks until `text_rx` closes,
/// synthesize them into frames, and play every frame in order.
///
/// Cancellation stops playback, drains the frame buffer, and still closes
/// the sink. A synthesis or playback error is returned after the sink has
/// been closed.
pub async fn run_pipeline<S: PlaybackSink>(
    mut text_rx: mpsc::Receiver<String>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: &mut S,
    options: PipelineOptions,
    cancel: CancellationToken,
) -> Result<PipelineStats> {
    let (frame_tx, mut frame_rx) = mpsc::channel::<AudioFrame>(options.buffer_frames.max(1));

    let producer_cancel = cancel.clone();
    let producer = tokio::spawn(async move {
        let mut chunks = 0usize;
        loop {
            tokio::select! {
                _ = producer_cancel.cancelled() => {
                    debug!("Synthesis producer cancelled");
                    break;
                }
                maybe_text = text_rx.recv() => match maybe_text {
                    Some(text) => {
                        synthesizer.synthesize(&text, &frame_tx).await?;
                        chunks += 1;
                    }
                    None => break,
                }
            }
        }
        Ok::<usize, VoicedeskError>(chunks)
        // frame_tx drops here; the consumer sees end-of-stream.
    });

    let mut frames_played = 0usize;
    let mut samples_played = 0usize;
    let mut play_error: Option<VoicedeskError> = None;

    while let Some(frame) = frame_rx.recv().await {
        if cancel.is_cancelled() || play_error.is_some() {
            // Keep receiving so the producer is never stuck on a full
            // buffer; frames are discarded, not played.
            continue;
        }
        match sink.play(&frame).await {
            Ok(()) => {
                frames_played += 1;
                samples_played += frame.len();
            }
            Err(e) => {
                warn!(%e, "Playback sink error; draining and shutting down");
                cancel.cancel();
                play_error = Some(e);
            }
        }
    }

    sink.close().await?;

    let text_chunks = match producer.await {
        Ok(Ok(chunks)) => chunks,
        Ok(Err(e)) => return Err(e),
        Err(e) => {
            return Err(VoicedeskError::Synthesis(format!(
                "synthesis task panicked: {e}"
            )))
        }
    };

    if let Some(e) = play_error {
        return Err(e);
    }

    Ok(PipelineStats {
        text_chunks,
        frames_played,
        samples_played,
        cancelled: cancel.is_cancelled(),
    })
}

/// Accumulates frames and writes a WAV file on close.
pub struct WavFileSink {
    path: std::path::PathBuf,
    sample_rate: u32,
    samples: Vec<i16>,
}

impl WavFileSink {
    pub fn new(path: impl Into<std::path::PathBuf>, sample_rate: u32) -> Self {
        Self {
            path: path.into(),
            sample_rate,
            samples: Vec::new(),
        }
    }
}

#[async_trait]
impl PlaybackSink for WavFileSink {
    async fn play(&mut self, frame: &AudioFrame) -> Result<()> {
        self.samples.extend_from_slice(&frame.samples);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let wav = crate::stt::pcm_to_wav(&self.samples, self.sample_rate, 1, 16);
        tokio::fs::write(&self.path, wav).await?;
        debug!(path = %self.path.display(), samples = self.samples.len(), "WAV file written");
        Ok(())
    }
}

/// In-memory sink for assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub frames: Vec<AudioFrame>,
    pub closes: usize,
}

#[async_trait]
impl PlaybackSink for RecordingSink {
    async fn play(&mut self, frame: &AudioFrame) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Emits `frames_per_chunk` frames per text chunk; the first sample of
    /// each frame is its sequence number so order is checkable.
    struct StubSynthesizer {
        frames_per_chunk: usize,
        frame_samples: usize,
        frame_delay: Option<Duration>,
    }

    #[async_trait]
    impl SpeechSynthesizer for StubSynthesizer {
        async fn synthesize(
            &self,
            _text: &str,
            frame_tx: &mpsc::Sender<AudioFrame>,
        ) -> Result<()> {
            for i in 0..self.frames_per_chunk {
                let mut samples = vec![0i16; self.frame_samples];
                samples[0] = i as i16;
                if frame_tx.send(AudioFrame::new(samples)).await.is_err() {
                    return Ok(());
                }
                if let Some(delay) = self.frame_delay {
                    tokio::time::sleep(delay).await;
                }
            }
            Ok(())
        }

        fn sample_rate(&self) -> u32 {
            24_000
        }
    }

    struct FailingSynthesizer;

    #[async_trait]
    impl SpeechSynthesizer for FailingSynthesizer {
        async fn synthesize(
            &self,
            _text: &str,
            _frame_tx: &mpsc::Sender<AudioFrame>,
        ) -> Result<()> {
            Err(VoicedeskError::Synthesis("voice service down".into()))
        }

        fn sample_rate(&self) -> u32 {
            24_000
        }
    }

    #[tokio::test]
    async fn end_of_stream_plays_everything_and_closes_once() {
        let (text_tx, text_rx) = mpsc::channel(8);
        text_tx.send("First sentence.".to_string()).await.unwrap();
        text_tx.send("Second sentence.".to_string()).await.unwrap();
        drop(text_tx);

        let mut sink = RecordingSink::default();
        let stats = run_pipeline(
            text_rx,
            Arc::new(StubSynthesizer {
                frames_per_chunk: 3,
                frame_samples: 4,
                frame_delay: None,
            }),
            &mut sink,
            PipelineOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(stats.text_chunks, 2);
        assert_eq!(stats.frames_played, 6);
        assert_eq!(stats.samples_played, 24);
        assert!(!stats.cancelled);
        assert_eq!(sink.closes, 1);
        // Per-chunk frame order is preserved.
        let order: Vec<i16> = sink.frames.iter().map(|f| f.samples[0]).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
    }

    /// A sink slower than the producer: the bounded buffer must suspend the
    /// producer rather than drop frames.
    struct SlowSink {
        inner: RecordingSink,
    }

    #[async_trait]
    impl PlaybackSink for SlowSink {
        async fn play(&mut self, frame: &AudioFrame) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.inner.play(frame).await
        }

        async fn close(&mut self) -> Result<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn full_buffer_suspends_the_producer_without_dropping_frames() {
        let (text_tx, text_rx) = mpsc::channel(1);
        text_tx.send("long reply".to_string()).await.unwrap();
        drop(text_tx);

        let mut sink = SlowSink {
            inner: RecordingSink::default(),
        };
        let stats = run_pipeline(
            text_rx,
            Arc::new(StubSynthesizer {
                frames_per_chunk: 20,
                frame_samples: 2,
                frame_delay: None,
            }),
            &mut sink,
            PipelineOptions { buffer_frames: 2 },
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(stats.frames_played, 20);
        let order: Vec<i16> = sink.inner.frames.iter().map(|f| f.samples[0]).collect();
        let expected: Vec<i16> = (0..20).collect();
        assert_eq!(order, expected);
        assert_eq!(sink.inner.closes, 1);
    }

    #[tokio::test]
    async fn cancellation_drains_and_still_closes_the_sink() {
        let (text_tx, text_rx) = mpsc::channel(8);
        text_tx.send("a very long reply".to_string()).await.unwrap();
        drop(text_tx);

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                cancel.cancel();
            })
        };

        let mut sink = RecordingSink::default();
        let stats = run_pipeline(
            text_rx,
            Arc::new(StubSynthesizer {
                frames_per_chunk: 100,
                frame_samples: 2,
                frame_delay: Some(Duration::from_millis(5)),
            }),
            &mut sink,
            PipelineOptions { buffer_frames: 4 },
            cancel,
        )
        .await
        .unwrap();

        canceller.await.unwrap();
        assert!(stats.cancelled);
        assert!(stats.frames_played < 100);
        assert_eq!(sink.closes, 1);
    }

    #[tokio::test]
    async fn synthesis_error_closes_the_sink_and_surfaces() {
        let (text_tx, text_rx) = mpsc::channel(8);
        text_tx.send("anything".to_string()).await.unwrap();
        drop(text_tx);

        let mut sink = RecordingSink::default();
        let err = run_pipeline(
            text_rx,
            Arc::new(FailingSynthesizer),
            &mut sink,
            PipelineOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, VoicedeskError::Synthesis(_)));
        assert_eq!(sink.closes, 1);
    }

    #[tokio::test]
    async fn wav_file_sink_writes_a_playable_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.wav");

        let mut sink = WavFileSink::new(&path, 24_000);
        sink.play(&AudioFrame::new(vec![1, 2, 3])).await.unwrap();
        sink.play(&AudioFrame::new(vec![4, 5])).await.unwrap();
        sink.close().await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // 5 samples, 2 bytes each
        assert_eq!(bytes.len(), 44 + 10);
        let sr = u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
        assert_eq!(sr, 24_000);
    }
}
