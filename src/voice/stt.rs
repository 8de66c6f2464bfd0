//! Speech-to-text via an OpenAI-compatible transcription endpoint

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use super::{AudioBuffer, Transcriber};
use crate::credential::Credential;
use crate::{Error, Result};

/// Response from the Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes recordings with `POST {base_url}/audio/transcriptions`
pub struct WhisperTranscriber {
    client: reqwest::Client,
    credential: Credential,
    endpoint: String,
    model: String,
    language: Option<String>,
    in_flight: AtomicBool,
}

impl WhisperTranscriber {
    /// Create a transcriber against `base_url`
    #[must_use]
    pub fn new(base_url: &str, model: String, credential: Credential) -> Self {
        Self {
            client: reqwest::Client::new(),
            credential,
            endpoint: format!("{}/audio/transcriptions", base_url.trim_end_matches('/')),
            model,
            language: None,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Hint the spoken language (ISO-639-1, e.g. "en")
    #[must_use]
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }
}

/// Clears the in-flight flag however the request ends
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String> {
        if audio.is_empty() {
            return Err(Error::Stt("recording is empty".to_string()));
        }

        let authorization = self.credential.bearer()?;
        let wav = audio.to_wav()?;
        let _in_flight = InFlight::enter(&self.in_flight);

        tracing::debug!(
            audio_bytes = wav.len(),
            duration_secs = audio.duration_secs(),
            "starting Whisper transcription"
        );

        let part = Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Stt(e.to_string()))?;

        let mut form = Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        if let Some(ref lang) = self.language {
            form = form.text("language", lang.clone());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", authorization)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            Error::Stt(format!("malformed response: {e}"))
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}
