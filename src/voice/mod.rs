//! Voice collaborators: microphone capture, transcription, speech output
//!
//! The conversation pipeline only sees the [`Transcriber`] and
//! [`SpeechOutput`] traits; the front end drives a [`Recorder`] and hands the
//! finished [`AudioBuffer`] to the pipeline.

mod capture;
mod playback;
mod speaker;
mod stt;
mod tts;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::Result;

pub use capture::{AudioBuffer, AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3};
pub use speaker::VoiceSpeaker;
pub use stt::WhisperTranscriber;
pub use tts::{AVAILABLE_VOICES, TextToSpeech, select_voice};

/// Start/stop audio recording
pub trait Recorder {
    /// Begin capturing; a no-op if already recording
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be opened
    fn start(&mut self) -> Result<()>;

    /// Stop capturing and return everything recorded since `start`
    fn stop(&mut self) -> AudioBuffer;

    fn is_recording(&self) -> bool;
}

/// Turns a finished recording into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Recognize speech in `audio`
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String>;

    /// Whether a transcription request is currently running
    fn is_busy(&self) -> bool {
        false
    }
}

/// Cancel handle for one utterance
///
/// Created before the utterance is handed to a [`SpeechOutput`], so it can be
/// cancelled even if playback has not started yet. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct Utterance {
    cancelled: Arc<AtomicBool>,
}

impl Utterance {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Raw flag for blocking players
    #[must_use]
    pub fn flag(&self) -> &AtomicBool {
        &self.cancelled
    }
}

/// Renders text as spoken audio
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Speak `text`, resolving when playback ends or `utterance` is cancelled
    ///
    /// Starting a new utterance supersedes any in progress.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, text: &str, utterance: &Utterance) -> Result<()>;

    /// Stop the current utterance immediately
    fn cancel(&self);
}
