//! Speech output: synthesize with TTS, play through the speakers

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{AudioPlayback, SpeechOutput, TextToSpeech, Utterance};
use crate::{Error, Result};

/// Speaks replies aloud; a new utterance cuts off the one before it
pub struct VoiceSpeaker {
    tts: TextToSpeech,
    playback: AudioPlayback,
    current: Mutex<Utterance>,
}

impl VoiceSpeaker {
    #[must_use]
    pub fn new(tts: TextToSpeech, playback: AudioPlayback) -> Self {
        Self {
            tts,
            playback,
            current: Mutex::new(Utterance::new()),
        }
    }

    /// Make `next` the current utterance and cancel the one it replaces
    fn supersede(&self, next: &Utterance) {
        let previous = std::mem::replace(
            &mut *self.current.lock().unwrap_or_else(PoisonError::into_inner),
            next.clone(),
        );
        previous.cancel();
    }
}

#[async_trait]
impl SpeechOutput for VoiceSpeaker {
    async fn speak(&self, text: &str, utterance: &Utterance) -> Result<()> {
        self.supersede(utterance);
        if utterance.is_cancelled() {
            return Ok(());
        }

        let audio = self.tts.synthesize(text).await?;

        if utterance.is_cancelled() {
            tracing::debug!("utterance cancelled before playback");
            return Ok(());
        }

        let playback = self.playback.clone();
        let utterance = utterance.clone();
        tokio::task::spawn_blocking(move || playback.play_mp3_blocking(&audio, utterance.flag()))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }

    fn cancel(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}
