//! Text-to-speech (TTS) synthesis

use crate::credential::Credential;
use crate::{Error, Result};

/// Voices offered by the OpenAI speech endpoint
pub const AVAILABLE_VOICES: &[&str] = &["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// Pick `preferred` if it is among `available` (case-insensitive), else the first voice
#[must_use]
pub fn select_voice<'a>(preferred: Option<&str>, available: &[&'a str]) -> Option<&'a str> {
    preferred
        .and_then(|p| {
            available
                .iter()
                .find(|v| v.eq_ignore_ascii_case(p.trim()))
                .copied()
        })
        .or_else(|| available.first().copied())
}

/// Synthesizes speech with `POST {base_url}/audio/speech`
pub struct TextToSpeech {
    client: reqwest::Client,
    credential: Credential,
    endpoint: String,
    voice: String,
    speed: f32,
    model: String,
}

impl TextToSpeech {
    /// Create a TTS client
    ///
    /// `preferred_voice` falls back to the first available voice when unknown.
    ///
    /// # Errors
    ///
    /// Returns error if no voice can be selected or speed is out of range
    pub fn new(
        base_url: &str,
        model: String,
        preferred_voice: Option<&str>,
        speed: f32,
        credential: Credential,
    ) -> Result<Self> {
        let voice = select_voice(preferred_voice, AVAILABLE_VOICES)
            .ok_or_else(|| Error::Config("no TTS voice available".to_string()))?;

        if preferred_voice.is_some_and(|p| !p.trim().eq_ignore_ascii_case(voice)) {
            tracing::warn!(
                preferred = preferred_voice.unwrap_or_default(),
                fallback = voice,
                "preferred voice unavailable, using fallback"
            );
        }

        if !(0.25..=4.0).contains(&speed) {
            return Err(Error::Config(format!(
                "TTS speed must be between 0.25 and 4.0, got {speed}"
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            credential,
            endpoint: format!("{}/audio/speech", base_url.trim_end_matches('/')),
            voice: voice.to_string(),
            speed,
            model,
        })
    }

    /// Selected voice
    #[must_use]
    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Synthesize text to speech
    ///
    /// # Returns
    ///
    /// Audio bytes (MP3 format)
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let authorization = self.credential.bearer()?;

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        tracing::debug!(chars = text.len(), voice = %self.voice, "requesting speech synthesis");

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", authorization)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}
