//! Shared test utilities: scripted collaborators for the conversation pipeline

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley::voice::{AudioBuffer, SpeechOutput, Transcriber, Utterance};
use parley::{
    ChatCompletion, Collaborators, ConversationPipeline, Credential, CredentialStore, Error,
    MemoryCredentialStore, Message, PipelineEvent, PipelineOptions,
};
use tokio::sync::{Notify, mpsc};

pub const SYSTEM_PROMPT: &str = "You are a test assistant.";

/// Completion that returns a fixed reply, or fails when it has none
pub struct MockCompletion {
    reply: Option<String>,
    gate: Option<Arc<Notify>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockCompletion {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Hold every request until `gate` is notified
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompletion for MockCompletion {
    async fn complete(&self, messages: &[Message]) -> parley::Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.reply
            .clone()
            .ok_or_else(|| Error::Completion("API error 401 Unauthorized".to_string()))
    }
}

/// Transcriber with a fixed transcript, or failing when it has none
pub struct MockTranscriber {
    transcript: Option<String>,
    calls: AtomicUsize,
}

impl MockTranscriber {
    pub fn hearing(transcript: &str) -> Self {
        Self {
            transcript: Some(transcript.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            transcript: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _audio: &AudioBuffer) -> parley::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transcript
            .clone()
            .ok_or_else(|| Error::Stt("API error 500".to_string()))
    }
}

/// Speech output that records what it was asked to say
///
/// A holding speaker keeps each utterance "playing" until `release` or
/// `cancel` is called; a failing speaker errors every utterance.
#[derive(Default)]
pub struct MockSpeech {
    hold: bool,
    fail: bool,
    spoken: Mutex<Vec<String>>,
    cancels: AtomicUsize,
    finished: AtomicUsize,
    started_cancelled: AtomicUsize,
    release: Notify,
}

impl MockSpeech {
    pub fn holding() -> Self {
        Self {
            hold: true,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Let the oldest held utterance finish
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Utterances that were already cancelled when `speak` began
    pub fn started_cancelled(&self) -> usize {
        self.started_cancelled.load(Ordering::SeqCst)
    }

    /// Utterances whose `speak` call has returned
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechOutput for MockSpeech {
    async fn speak(&self, text: &str, utterance: &Utterance) -> parley::Result<()> {
        if utterance.is_cancelled() {
            self.started_cancelled.fetch_add(1, Ordering::SeqCst);
        }
        self.spoken.lock().unwrap().push(text.to_string());
        if self.hold {
            self.release.notified().await;
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Audio("no output device".to_string()));
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.release.notify_one();
    }
}

/// Credential store the test can still inspect after handing it over
#[derive(Clone, Default)]
pub struct SharedStore(pub Arc<MemoryCredentialStore>);

impl SharedStore {
    pub fn with_value(value: &str) -> Self {
        Self(Arc::new(MemoryCredentialStore::with_value(value)))
    }

    pub fn saved(&self) -> Option<String> {
        self.0.saved()
    }
}

impl CredentialStore for SharedStore {
    fn load(&self) -> parley::Result<Option<String>> {
        self.0.load()
    }

    fn save(&self, value: &str) -> parley::Result<()> {
        self.0.save(value)
    }
}

/// A pipeline wired to mocks, plus handles to inspect them
pub struct Harness {
    pub pipeline: ConversationPipeline,
    pub events: mpsc::UnboundedReceiver<PipelineEvent>,
    pub completion: Arc<MockCompletion>,
    pub transcriber: Arc<MockTranscriber>,
    pub speech: Arc<MockSpeech>,
    pub store: SharedStore,
    pub credential: Credential,
}

impl Harness {
    pub fn new(
        completion: MockCompletion,
        transcriber: MockTranscriber,
        speech: MockSpeech,
        store: SharedStore,
        speech_enabled: bool,
    ) -> Self {
        Self::with_credential(
            completion,
            transcriber,
            speech,
            store,
            speech_enabled,
            Credential::default(),
        )
    }

    pub fn with_credential(
        completion: MockCompletion,
        transcriber: MockTranscriber,
        speech: MockSpeech,
        store: SharedStore,
        speech_enabled: bool,
        credential: Credential,
    ) -> Self {
        let completion = Arc::new(completion);
        let transcriber = Arc::new(transcriber);
        let speech = Arc::new(speech);
        let (tx, events) = mpsc::unbounded_channel();

        let pipeline = ConversationPipeline::new(
            PipelineOptions {
                system_prompt: SYSTEM_PROMPT.to_string(),
                speech_enabled,
            },
            credential.clone(),
            Collaborators {
                completion: completion.clone(),
                transcriber: transcriber.clone(),
                speech: speech.clone(),
                credential_store: Box::new(store.clone()),
            },
            Some(tx),
        );

        Self {
            pipeline,
            events,
            completion,
            transcriber,
            speech,
            store,
            credential,
        }
    }

    /// Everything emitted so far
    pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Wait for background work (spawned speech) to reach a condition
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// A short burst of "speech" at the capture rate
pub fn recording() -> AudioBuffer {
    AudioBuffer::new(vec![0.1; 1600], parley::voice::SAMPLE_RATE)
}
