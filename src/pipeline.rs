//! Conversation pipeline: capture → transcribe → complete → speak
//!
//! The pipeline owns the conversation and the session flags. Every failure of
//! an external collaborator is turned into an assistant message so the
//! conversation stays usable; only a missing API key is reported out of band,
//! as a [`PipelineEvent::CredentialRequired`] notice.
//!
//! At most one turn runs at a time. A turn holds the busy guard from before
//! its first await until it returns, on every exit path.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::UnboundedSender;

use crate::Result;
use crate::completion::ChatCompletion;
use crate::conversation::{Conversation, Message};
use crate::credential::{Credential, CredentialStore};
use crate::voice::{AudioBuffer, SpeechOutput, Transcriber, Utterance};

/// Assistant reply appended when the completion request fails
pub const COMPLETION_FAILURE_REPLY: &str =
    "Sorry, I couldn't get a response. Please check your API key and connection, then try again.";

/// Assistant reply appended when a recording cannot be transcribed
pub const TRANSCRIPTION_FAILURE_REPLY: &str =
    "Sorry, I couldn't understand that recording. Please try again.";

/// Result of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// User message and assistant reply appended
    Replied,
    /// User message (if any) and a failure reply appended
    Failed,
    /// Nothing to send; conversation unchanged
    Empty,
    /// No API key; conversation unchanged
    MissingCredential,
    /// Another turn is in flight; conversation unchanged
    Busy,
}

/// Notifications for the front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A submission was refused because no API key is set
    CredentialRequired,
    /// A message was appended to the conversation
    MessageAppended(Message),
    BusyChanged(bool),
    SpeakingChanged(bool),
}

/// Snapshot of the session flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    pub busy: bool,
    pub recording: bool,
    pub speech_enabled: bool,
    pub speaking: bool,
    /// Reported by the transcriber
    pub transcribing: bool,
}

/// Startup options
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Seed message for the conversation
    pub system_prompt: String,
    /// Initial state of the speech toggle
    pub speech_enabled: bool,
}

/// External services the pipeline coordinates
pub struct Collaborators {
    pub completion: Arc<dyn ChatCompletion>,
    pub transcriber: Arc<dyn Transcriber>,
    pub speech: Arc<dyn SpeechOutput>,
    pub credential_store: Box<dyn CredentialStore>,
}

/// Sequences conversation turns; cheap to clone
#[derive(Clone)]
pub struct ConversationPipeline {
    inner: Arc<Inner>,
}

struct Inner {
    completion: Arc<dyn ChatCompletion>,
    transcriber: Arc<dyn Transcriber>,
    speech: Arc<dyn SpeechOutput>,
    credential_store: Box<dyn CredentialStore>,
    credential: Credential,
    state: Mutex<State>,
    notify: Option<UnboundedSender<PipelineEvent>>,
}

struct State {
    conversation: Conversation,
    busy: bool,
    recording: bool,
    speech_enabled: bool,
    speaking: bool,
    /// Generation of the latest utterance; stale completions are ignored
    utterance: u64,
    /// Cancel handle of the latest utterance
    playing: Utterance,
}

/// Holds the single turn slot; releases it on drop
struct BusyGuard<'a> {
    inner: &'a Inner,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.inner.lock().busy = false;
        self.inner.emit(PipelineEvent::BusyChanged(false));
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.notify {
            // Receiver gone means nobody is rendering; the state is still authoritative
            let _ = tx.send(event);
        }
    }

    fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        {
            let mut state = self.lock();
            if state.busy {
                return None;
            }
            state.busy = true;
        }
        self.emit(PipelineEvent::BusyChanged(true));
        Some(BusyGuard { inner: self })
    }

    fn append_assistant(&self, content: &str) {
        self.lock().conversation.push_assistant(content);
        self.emit(PipelineEvent::MessageAppended(Message::assistant(content)));
    }

    fn finish_utterance(&self, generation: u64) {
        let cleared = {
            let mut state = self.lock();
            if state.utterance == generation && state.speaking {
                state.speaking = false;
                true
            } else {
                false
            }
        };
        if cleared {
            self.emit(PipelineEvent::SpeakingChanged(false));
        }
    }
}

impl ConversationPipeline {
    /// Create a pipeline and load the stored API key into `credential`
    ///
    /// `credential` is the handle shared with the HTTP collaborators. A key
    /// found in the store replaces whatever it already holds.
    #[must_use]
    pub fn new(
        options: PipelineOptions,
        credential: Credential,
        collaborators: Collaborators,
        notify: Option<UnboundedSender<PipelineEvent>>,
    ) -> Self {
        match collaborators.credential_store.load() {
            Ok(Some(stored)) => credential.set(&stored),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "failed to load stored credential"),
        }

        tracing::debug!(
            credential_present = credential.is_present(),
            speech_enabled = options.speech_enabled,
            "conversation pipeline ready"
        );

        Self {
            inner: Arc::new(Inner {
                completion: collaborators.completion,
                transcriber: collaborators.transcriber,
                speech: collaborators.speech,
                credential_store: collaborators.credential_store,
                credential,
                state: Mutex::new(State {
                    conversation: Conversation::new(options.system_prompt),
                    busy: false,
                    recording: false,
                    speech_enabled: options.speech_enabled,
                    speaking: false,
                    utterance: 0,
                    playing: Utterance::new(),
                }),
                notify,
            }),
        }
    }

    /// Send typed text as the next user turn
    pub async fn submit_text(&self, text: &str) -> SubmitOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SubmitOutcome::Empty;
        }
        if !self.check_credential() {
            return SubmitOutcome::MissingCredential;
        }
        let Some(_busy) = self.inner.try_acquire() else {
            tracing::debug!("submission ignored, turn already in flight");
            return SubmitOutcome::Busy;
        };

        self.run_turn(text).await
    }

    /// Transcribe a finished recording and send it as the next user turn
    pub async fn submit_recording(&self, audio: &AudioBuffer) -> SubmitOutcome {
        if !self.check_credential() {
            return SubmitOutcome::MissingCredential;
        }
        let Some(_busy) = self.inner.try_acquire() else {
            tracing::debug!("recording ignored, turn already in flight");
            return SubmitOutcome::Busy;
        };

        match self.inner.transcriber.transcribe(audio).await {
            Ok(transcript) => {
                let transcript = transcript.trim();
                if transcript.is_empty() {
                    tracing::info!("no speech recognized in recording");
                    return SubmitOutcome::Empty;
                }
                self.run_turn(transcript).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                self.inner.append_assistant(TRANSCRIPTION_FAILURE_REPLY);
                SubmitOutcome::Failed
            }
        }
    }

    /// Flip the speech toggle, returning the new value
    ///
    /// Turning speech off while an utterance is playing cancels it.
    pub fn toggle_speech_enabled(&self) -> bool {
        let (enabled, was_speaking) = {
            let mut state = self.inner.lock();
            state.speech_enabled = !state.speech_enabled;
            let was_speaking = state.speaking;
            if !state.speech_enabled {
                state.speaking = false;
                state.utterance += 1;
                state.playing.cancel();
            }
            (state.speech_enabled, was_speaking)
        };

        if !enabled && was_speaking {
            self.inner.speech.cancel();
            self.inner.emit(PipelineEvent::SpeakingChanged(false));
        }

        tracing::debug!(enabled, "speech toggled");
        enabled
    }

    /// Speak arbitrary content again; returns false if speech is disabled
    pub fn replay(&self, content: &str) -> bool {
        self.start_speaking(content)
    }

    /// Replace the API key and persist it immediately
    ///
    /// # Errors
    ///
    /// Returns error if the credential store cannot be written; the new key
    /// is still used for the rest of the session
    pub fn set_credential(&self, value: &str) -> Result<()> {
        self.inner.credential.set(value);
        self.inner.credential_store.save(value)
    }

    /// Record whether the microphone is capturing
    pub fn set_recording(&self, recording: bool) {
        self.inner.lock().recording = recording;
    }

    /// Current session flags
    #[must_use]
    pub fn state(&self) -> SessionState {
        let state = self.inner.lock();
        SessionState {
            busy: state.busy,
            recording: state.recording,
            speech_enabled: state.speech_enabled,
            speaking: state.speaking,
            transcribing: self.inner.transcriber.is_busy(),
        }
    }

    /// Full history, seed included
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().conversation.messages().to_vec()
    }

    /// Messages to render (seed excluded)
    #[must_use]
    pub fn visible_messages(&self) -> Vec<Message> {
        self.inner.lock().conversation.visible().to_vec()
    }

    /// Whether an API key is available
    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.inner.credential.is_present()
    }

    fn check_credential(&self) -> bool {
        if self.inner.credential.is_present() {
            return true;
        }
        tracing::warn!("submission refused, no API key set");
        self.inner.emit(PipelineEvent::CredentialRequired);
        false
    }

    /// One turn with the busy slot already held
    async fn run_turn(&self, text: &str) -> SubmitOutcome {
        let history = {
            let mut state = self.inner.lock();
            state.conversation.push_user(text);
            state.conversation.messages().to_vec()
        };
        self.inner.emit(PipelineEvent::MessageAppended(Message::user(text)));

        match self.inner.completion.complete(&history).await {
            Ok(reply) => {
                self.inner.append_assistant(&reply);
                self.start_speaking(&reply);
                SubmitOutcome::Replied
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat completion failed");
                self.inner.append_assistant(COMPLETION_FAILURE_REPLY);
                SubmitOutcome::Failed
            }
        }
    }

    /// Hand `text` to the speech collaborator on a background task
    fn start_speaking(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }

        let (generation, utterance) = {
            let mut state = self.inner.lock();
            if !state.speech_enabled {
                return false;
            }
            state.utterance += 1;
            state.speaking = true;
            let utterance = Utterance::new();
            std::mem::replace(&mut state.playing, utterance.clone()).cancel();
            (state.utterance, utterance)
        };
        self.inner.emit(PipelineEvent::SpeakingChanged(true));

        let inner = Arc::clone(&self.inner);
        let text = text.to_string();
        tokio::spawn(async move {
            if let Err(e) = inner.speech.speak(&text, &utterance).await {
                tracing::warn!(error = %e, "speech playback failed");
            }
            inner.finish_utterance(generation);
        });

        true
    }
}
