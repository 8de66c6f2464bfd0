//! Configuration management for Parley
//!
//! Every setting resolves as env > `config.toml` > default.

pub mod file;

use std::path::PathBuf;

use secrecy::SecretString;

use crate::{Error, Result};
use file::ParleyConfigFile;

/// Default OpenAI-compatible API base URL
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Default chat model
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default system prompt seeding each conversation
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly voice assistant. Keep replies short and conversational, since they are read aloud.";

/// Parley configuration
#[derive(Debug)]
pub struct Config {
    /// Base URL for chat, transcription and speech endpoints
    pub api_base_url: String,

    /// Chat model identifier
    pub model: String,

    /// Seed message for every conversation
    pub system_prompt: String,

    /// Directory holding the stored API key
    pub data_dir: PathBuf,

    /// Spoken reply configuration
    pub speech: SpeechConfig,

    /// Speech recognition configuration
    pub transcription: TranscriptionConfig,

    /// Key from `OPENAI_API_KEY`, used when nothing is stored yet
    pub env_api_key: Option<SecretString>,
}

/// Spoken reply configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Read replies aloud at startup
    pub enabled: bool,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// Preferred voice; unknown voices fall back to the first available
    pub voice: Option<String>,

    /// TTS speed multiplier (0.25 to 4.0)
    pub speed: f32,
}

/// Speech recognition configuration
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    /// STT model (e.g. "whisper-1")
    pub model: String,

    /// Spoken language hint
    pub language: Option<String>,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a resolved value is invalid
    pub fn load() -> Result<Self> {
        Self::resolve(|key| std::env::var(key).ok(), file::load_config_file())
    }

    /// Resolve configuration from an env lookup and a parsed config file
    ///
    /// # Errors
    ///
    /// Returns error if the API base URL is not a valid http(s) URL or the
    /// speech speed is out of range
    pub fn resolve(env: impl Fn(&str) -> Option<String>, fc: ParleyConfigFile) -> Result<Self> {
        let api_base_url = env("PARLEY_API_BASE_URL")
            .or(fc.api.base_url)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        validate_base_url(&api_base_url)?;

        let model = env("PARLEY_MODEL")
            .or(fc.api.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let system_prompt = env("PARLEY_SYSTEM_PROMPT")
            .or(fc.chat.system_prompt)
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let data_dir = resolve_data_dir(env("PARLEY_DATA_DIR"), fc.data_dir);

        let speech = SpeechConfig {
            enabled: env("PARLEY_SPEECH_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.speech.enabled)
                .unwrap_or(true),
            tts_model: env("PARLEY_TTS_MODEL")
                .or(fc.speech.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            voice: env("PARLEY_VOICE").or(fc.speech.voice),
            speed: fc.speech.speed.unwrap_or(1.0),
        };

        if !(0.25..=4.0).contains(&speech.speed) {
            return Err(Error::Config(format!(
                "speech speed must be between 0.25 and 4.0, got {}",
                speech.speed
            )));
        }

        let transcription = TranscriptionConfig {
            model: env("PARLEY_STT_MODEL")
                .or(fc.transcription.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            language: fc.transcription.language,
        };

        let env_api_key = env("OPENAI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        Ok(Self {
            api_base_url,
            model,
            system_prompt,
            data_dir,
            speech,
            transcription,
            env_api_key,
        })
    }
}

/// Check that `raw` is an absolute http(s) URL
///
/// # Errors
///
/// Returns `Error::Config` describing what is wrong with the URL
pub(crate) fn validate_base_url(raw: &str) -> Result<()> {
    let url = url::Url::parse(raw)
        .map_err(|e| Error::Config(format!("invalid API base URL {raw:?}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "API base URL must be http or https, got {}",
            url.scheme()
        )));
    }

    Ok(())
}

/// Data directory from env, then file, then `~/.local/share/parley`
///
/// Needs nothing else from the config, so it works even when other values
/// are invalid.
pub(crate) fn resolve_data_dir(env_value: Option<String>, file_value: Option<String>) -> PathBuf {
    env_value
        .or(file_value)
        .map_or_else(default_data_dir, PathBuf::from)
}

/// Default data directory: `~/.local/share/parley`
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/parley"),
        |d| d.data_dir().join("parley"),
    )
}
