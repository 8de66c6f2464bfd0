use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use parley::voice::{
    AudioCapture, AudioPlayback, PLAYBACK_SAMPLE_RATE, Recorder, SpeechOutput, TextToSpeech,
    Utterance, VoiceSpeaker, WhisperTranscriber,
};
use parley::{
    Collaborators, Config, ConversationPipeline, Credential, CredentialStore, FileCredentialStore,
    Message, MessageRole, OpenAiChatClient, PipelineEvent, PipelineOptions, SubmitOutcome,
};

/// Parley - talk to a hosted LLM and hear it answer
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Chat model (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Start with spoken replies turned off
    #[arg(long)]
    mute: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive chat session (default)
    Chat,
    /// Store the API key
    SetKey {
        /// API key; an empty string clears it
        key: String,
    },
    /// Interactive first-run setup
    Setup,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so the conversation on stdout stays readable
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info,parley=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Command::SetKey { key }) => set_key(&key),
        Some(Command::Setup) => parley::setup::run_setup(),
        Some(Command::TestMic { duration }) => test_mic(duration).await,
        Some(Command::TestSpeaker) => test_speaker().await,
        Some(Command::TestTts { text }) => test_tts(&text).await,
        Some(Command::Chat) | None => chat(cli.model, cli.mute).await,
    }
}

/// Speech output used when no audio device is available
struct Muted;

#[async_trait]
impl SpeechOutput for Muted {
    async fn speak(&self, _text: &str, _utterance: &Utterance) -> parley::Result<()> {
        Ok(())
    }

    fn cancel(&self) {}
}

/// Slash commands understood by the chat session
#[derive(Debug, PartialEq, Eq)]
enum ChatCommand<'a> {
    Help,
    Quit,
    Record,
    Speech,
    Replay(Option<usize>),
    Key(&'a str),
    History,
    Status,
    Unknown(&'a str),
    Say(&'a str),
}

impl<'a> ChatCommand<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Say(line);
        };

        let (name, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(n, a)| (n, a.trim()));

        match name {
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "record" | "rec" => Self::Record,
            "speech" | "mute" => Self::Speech,
            "replay" => Self::Replay(arg.parse().ok()),
            "key" => Self::Key(arg),
            "history" => Self::History,
            "status" => Self::Status,
            _ => Self::Unknown(name),
        }
    }
}

const HELP: &str = "\
Type a message and press Enter to send it.
  /record          start recording; run again to stop and send
  /speech          turn spoken replies on or off
  /replay [N]      speak message N again (default: last reply)
  /key <KEY>       set the API key
  /history         show the conversation
  /status          show session flags
  /quit            leave";

/// Message picked by `/replay [N]`: 1-based N, else the last reply
fn replay_target(visible: &[Message], index: Option<usize>) -> Option<&Message> {
    match index {
        Some(n) => n.checked_sub(1).and_then(|i| visible.get(i)),
        None => visible
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant),
    }
}

/// Seed the shared credential from `OPENAI_API_KEY`; the store is read by the pipeline
fn env_credential(config: &Config) -> Credential {
    Credential::new(config.env_api_key.as_ref().map(ExposeSecret::expose_secret))
}

/// Run the interactive chat session
#[allow(clippy::future_not_send, clippy::too_many_lines)]
async fn chat(model_override: Option<String>, mute: bool) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(model) = model_override {
        config.model = model;
    }
    tracing::debug!(?config, "loaded configuration");

    let credential = env_credential(&config);
    let store = FileCredentialStore::in_dir(&config.data_dir);

    let completion = OpenAiChatClient::new(
        &config.api_base_url,
        config.model.clone(),
        credential.clone(),
    );
    let transcriber = WhisperTranscriber::new(
        &config.api_base_url,
        config.transcription.model.clone(),
        credential.clone(),
    )
    .with_language(config.transcription.language.clone());

    let speech: Arc<dyn SpeechOutput> = match AudioPlayback::new() {
        Ok(playback) => {
            let tts = TextToSpeech::new(
                &config.api_base_url,
                config.speech.tts_model.clone(),
                config.speech.voice.as_deref(),
                config.speech.speed,
                credential.clone(),
            )?;
            Arc::new(VoiceSpeaker::new(tts, playback))
        }
        Err(e) => {
            tracing::warn!(error = %e, "no audio output, replies will not be spoken");
            Arc::new(Muted)
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let pipeline = ConversationPipeline::new(
        PipelineOptions {
            system_prompt: config.system_prompt.clone(),
            speech_enabled: config.speech.enabled && !mute,
        },
        credential,
        Collaborators {
            completion: Arc::new(completion),
            transcriber: Arc::new(transcriber),
            speech,
            credential_store: Box::new(store),
        },
        Some(tx),
    );

    // Render pipeline events as they arrive
    let renderer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::MessageAppended(message) => match message.role {
                    MessageRole::Assistant => println!("assistant> {}\n", message.content),
                    MessageRole::User => println!("you> {}", message.content),
                    MessageRole::System => {}
                },
                PipelineEvent::CredentialRequired => {
                    println!("! No API key set. Use /key <KEY> or `parley set-key <KEY>`.");
                }
                PipelineEvent::BusyChanged(true) => println!("..."),
                PipelineEvent::BusyChanged(false) | PipelineEvent::SpeakingChanged(_) => {}
            }
        }
    });

    println!("Parley ({}). Type /help for commands.\n", config.model);
    if !pipeline.has_credential() {
        println!("! No API key set. Use /key <KEY> before sending a message.\n");
    }

    let mut capture: Option<AudioCapture> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match ChatCommand::parse(&line) {
            ChatCommand::Say(text) => {
                if pipeline.submit_text(text).await == SubmitOutcome::Busy {
                    println!("! Still waiting on the previous reply.");
                }
            }
            ChatCommand::Record => {
                let recording = capture.as_ref().is_some_and(Recorder::is_recording);
                if recording {
                    let Some(cap) = capture.as_mut() else { continue };
                    let audio = cap.stop();
                    pipeline.set_recording(false);
                    println!("(recorded {:.1}s)", audio.duration_secs());
                    if pipeline.submit_recording(&audio).await == SubmitOutcome::Busy {
                        println!("! Still waiting on the previous reply.");
                    }
                } else {
                    if capture.is_none() {
                        match AudioCapture::new() {
                            Ok(cap) => capture = Some(cap),
                            Err(e) => {
                                println!("! Microphone unavailable: {e}");
                                continue;
                            }
                        }
                    }
                    let Some(cap) = capture.as_mut() else { continue };
                    match cap.start() {
                        Ok(()) => {
                            pipeline.set_recording(true);
                            println!("(recording, /record again to send)");
                        }
                        Err(e) => println!("! Could not start recording: {e}"),
                    }
                }
            }
            ChatCommand::Speech => {
                let enabled = pipeline.toggle_speech_enabled();
                println!("(spoken replies {})", if enabled { "on" } else { "off" });
            }
            ChatCommand::Replay(index) => {
                let visible = pipeline.visible_messages();
                match replay_target(&visible, index) {
                    Some(message) => {
                        if !pipeline.replay(&message.content) {
                            println!("(spoken replies are off)");
                        }
                    }
                    None => println!("! Nothing to replay."),
                }
            }
            ChatCommand::Key(key) => match pipeline.set_credential(key) {
                Ok(()) if key.is_empty() => println!("(API key cleared)"),
                Ok(()) => println!("(API key saved)"),
                Err(e) => println!("! API key set for this session but not saved: {e}"),
            },
            ChatCommand::History => {
                for (i, message) in pipeline.visible_messages().iter().enumerate() {
                    println!("{:>3} {:>9}> {}", i + 1, message.role.as_str(), message.content);
                }
            }
            ChatCommand::Status => {
                let state = pipeline.state();
                println!(
                    "busy={} recording={} transcribing={} speech={} speaking={} key={}",
                    state.busy,
                    state.recording,
                    state.transcribing,
                    state.speech_enabled,
                    state.speaking,
                    pipeline.has_credential()
                );
            }
            ChatCommand::Help => println!("{HELP}"),
            ChatCommand::Unknown(name) => println!("! Unknown command /{name}. Try /help."),
            ChatCommand::Quit => break,
        }
    }

    if let Some(mut cap) = capture {
        let _ = cap.stop();
    }
    drop(pipeline);
    renderer.abort();

    Ok(())
}

/// Store the API key without starting a session
fn set_key(key: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = FileCredentialStore::in_dir(&config.data_dir);
    store.save(key)?;
    println!("API key saved to {}", store.path().display());
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        capture.clear_buffer();
    }

    let _ = capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (PLAYBACK_SAMPLE_RATE as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());

    tokio::task::spawn_blocking(move || {
        playback.play_samples_blocking(samples, &AtomicBool::new(false))
    })
    .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output against the configured endpoint
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load()?;
    let credential = env_credential(&config);
    if let Some(stored) = FileCredentialStore::in_dir(&config.data_dir).load()? {
        credential.set(&stored);
    }

    let tts = TextToSpeech::new(
        &config.api_base_url,
        config.speech.tts_model.clone(),
        config.speech.voice.as_deref(),
        config.speech.speed,
        credential,
    )?;

    println!("Synthesizing speech with voice {}...", tts.voice());
    let mp3_data = tts.synthesize(text).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    println!("Playing audio...");
    let playback = AudioPlayback::new()?;
    tokio::task::spawn_blocking(move || {
        playback.play_mp3_blocking(&mp3_data, &AtomicBool::new(false))
    })
    .await??;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
