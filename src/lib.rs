//! Parley - voice-enabled chat client for hosted LLM completion endpoints
//!
//! Typed text or a finished microphone recording becomes a user turn; the
//! whole conversation is sent to an OpenAI-compatible chat endpoint and the
//! reply is read aloud.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Terminal front end                   │
//! │   typed input  │  /record  │  /speech  │  /replay    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Conversation pipeline                  │
//! │   conversation log  │  busy guard  │  speech toggle  │
//! └──────┬──────────────┬───────────────┬───────────────┘
//!        │              │               │
//! ┌──────▼──────┐ ┌─────▼──────┐ ┌──────▼──────────────┐
//! │ Transcriber │ │ Completion │ │ Speech output       │
//! │ (Whisper)   │ │ (chat API) │ │ (TTS + playback)    │
//! └─────────────┘ └────────────┘ └─────────────────────┘
//! ```

pub mod completion;
pub mod config;
pub mod conversation;
pub mod credential;
pub mod error;
pub mod pipeline;
pub mod setup;
pub mod voice;

pub use completion::{ChatCompletion, OpenAiChatClient};
pub use config::Config;
pub use conversation::{Conversation, Message, MessageRole};
pub use credential::{Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{Error, Result};
pub use pipeline::{
    COMPLETION_FAILURE_REPLY, Collaborators, ConversationPipeline, PipelineEvent, PipelineOptions,
    SessionState, SubmitOutcome, TRANSCRIPTION_FAILURE_REPLY,
};
