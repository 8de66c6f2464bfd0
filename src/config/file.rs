//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ParleyConfigFile {
    /// Directory holding the stored API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Chat completion endpoint settings
    #[serde(default)]
    pub api: ApiFileConfig,

    /// Conversation settings
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Spoken reply settings
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Speech recognition settings
    #[serde(default)]
    pub transcription: TranscriptionFileConfig,
}

/// Endpoint configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ApiFileConfig {
    /// Base URL of an OpenAI-compatible API (e.g. "https://api.openai.com/v1")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Chat model identifier (e.g. "gpt-4o-mini")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ChatFileConfig {
    /// System prompt seeding every conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SpeechFileConfig {
    /// Read replies aloud at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// TTS model (e.g. "tts-1")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_model: Option<String>,

    /// Preferred voice (e.g. "nova")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// TTS speed multiplier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TranscriptionFileConfig {
    /// STT model (e.g. "whisper-1")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Spoken language hint (e.g. "en")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ParleyConfigFile {
    config_file_path().map_or_else(ParleyConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_from(path: &Path) -> ParleyConfigFile {
    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ParleyConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Write `config` to `path`, creating parent directories
///
/// # Errors
///
/// Returns error if serialization or the write fails
pub fn write_config_to(path: &Path, config: &ParleyConfigFile) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;

    tracing::info!(path = %path.display(), "wrote config file");
    Ok(())
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}
