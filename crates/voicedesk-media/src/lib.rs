//! Media layer: whole-utterance transcription, speech synthesis, and the
//! producer/consumer pipeline joining synthesis to playback.

pub mod pipeline;
pub mod stt;
pub mod synthesis;

/// One frame of mono 16-bit PCM audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
