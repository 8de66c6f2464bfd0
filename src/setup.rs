//! Interactive first-run setup wizard (`parley setup`)

use std::path::PathBuf;

use dialoguer::{Confirm, Input, Select};

use crate::config::file::{
    self, ApiFileConfig, ParleyConfigFile, SpeechFileConfig, TranscriptionFileConfig,
};
use crate::config::{DEFAULT_API_BASE_URL, DEFAULT_MODEL, resolve_data_dir, validate_base_url};
use crate::credential::{CredentialStore, FileCredentialStore};
use crate::voice::{AVAILABLE_VOICES, select_voice};

/// Run the interactive setup wizard
///
/// # Errors
///
/// Returns error if user input fails or config cannot be written
pub fn run_setup() -> anyhow::Result<()> {
    println!("Parley Setup\n");

    let existing = file::load_config_file();
    let config_path = file::config_file_path()
        .unwrap_or_else(|| PathBuf::from("~/.config/parley/config.toml"));

    if config_path.exists() {
        println!("Existing config found at {}\n", config_path.display());
    }

    // 1. Endpoint
    let base_url: String = Input::new()
        .with_prompt("API base URL")
        .default(base_url_default(&existing))
        .validate_with(|input: &String| {
            validate_base_url(input.trim()).map_err(|e| e.to_string())
        })
        .interact_text()?;
    let base_url = base_url.trim().to_string();

    let model: String = Input::new()
        .with_prompt("Chat model")
        .default(
            existing
                .api
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        )
        .interact_text()?;

    // 2. API key
    // Only the data dir is needed; the rest of the old config may be invalid
    let data_dir = resolve_data_dir(
        std::env::var("PARLEY_DATA_DIR").ok(),
        existing.data_dir.clone(),
    );
    let store = FileCredentialStore::in_dir(&data_dir);
    let existing_key = store.load()?;

    let prompt = existing_key.as_deref().map_or_else(
        || "API key".to_string(),
        |k| format!("API key (current: {}, leave blank to keep)", mask_key(k)),
    );

    let api_key_input: String = Input::new()
        .with_prompt(&prompt)
        .allow_empty(true)
        .interact_text()?;

    if !api_key_input.trim().is_empty() {
        store.save(&api_key_input)?;
        println!("API key saved to {}", store.path().display());
    }

    // 3. Speech
    let enable_speech = Confirm::new()
        .with_prompt("Read replies aloud?")
        .default(existing.speech.enabled.unwrap_or(true))
        .interact()?;

    let speech = if enable_speech {
        let current = select_voice(existing.speech.voice.as_deref(), AVAILABLE_VOICES);
        let default_idx = current
            .and_then(|v| AVAILABLE_VOICES.iter().position(|&a| a == v))
            .unwrap_or(0);

        let voice_idx = Select::new()
            .with_prompt("Voice")
            .items(AVAILABLE_VOICES)
            .default(default_idx)
            .interact()?;

        SpeechFileConfig {
            enabled: Some(true),
            tts_model: existing.speech.tts_model.or_else(|| Some("tts-1".to_string())),
            voice: Some(AVAILABLE_VOICES[voice_idx].to_string()),
            speed: existing.speech.speed.or(Some(1.0)),
        }
    } else {
        SpeechFileConfig {
            enabled: Some(false),
            ..existing.speech
        }
    };

    // 4. Build and write config
    let config_file = ParleyConfigFile {
        data_dir: existing.data_dir,
        api: ApiFileConfig {
            base_url: Some(base_url),
            model: Some(model),
        },
        chat: existing.chat,
        speech,
        transcription: TranscriptionFileConfig {
            model: existing
                .transcription
                .model
                .or_else(|| Some("whisper-1".to_string())),
            language: existing.transcription.language,
        },
    };

    file::write_config_to(&config_path, &config_file)?;
    println!("\nConfig written to {}", config_path.display());

    println!("\nSetup complete! Run `parley` to start chatting.");

    Ok(())
}

/// Previous base URL if it is still usable, else the default
fn base_url_default(existing: &ParleyConfigFile) -> String {
    existing
        .api
        .base_url
        .clone()
        .filter(|url| validate_base_url(url).is_ok())
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
}

/// Show only the ends of a key
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "****".to_string()
    }
}
