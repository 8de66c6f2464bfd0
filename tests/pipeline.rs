//! Conversation pipeline integration tests
//!
//! Drives the pipeline with scripted collaborators; no network or audio

use std::sync::Arc;

use parley::{
    COMPLETION_FAILURE_REPLY, Credential, Message, MessageRole, PipelineEvent, SubmitOutcome,
    TRANSCRIPTION_FAILURE_REPLY,
};
use tokio::sync::Notify;

mod common;
use common::{
    Harness, MockCompletion, MockSpeech, MockTranscriber, SYSTEM_PROMPT, SharedStore, eventually,
    recording,
};

fn keyed(completion: MockCompletion, speech_enabled: bool) -> Harness {
    Harness::new(
        completion,
        MockTranscriber::hearing("hello"),
        MockSpeech::default(),
        SharedStore::with_value("sk-test"),
        speech_enabled,
    )
}

#[tokio::test]
async fn test_text_round_trip() {
    let mut h = keyed(MockCompletion::replying("Hi! How can I help?"), false);

    let outcome = h.pipeline.submit_text("hello").await;
    assert_eq!(outcome, SubmitOutcome::Replied);

    let messages = h.pipeline.messages();
    assert_eq!(
        messages,
        vec![
            Message::system(SYSTEM_PROMPT),
            Message::user("hello"),
            Message::assistant("Hi! How can I help?"),
        ]
    );
    assert_eq!(h.pipeline.visible_messages().len(), 2);

    // The completion saw the seed and the new user turn
    let calls = h.completion.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], messages[..2].to_vec());

    assert_eq!(
        h.drain_events(),
        vec![
            PipelineEvent::BusyChanged(true),
            PipelineEvent::MessageAppended(Message::user("hello")),
            PipelineEvent::MessageAppended(Message::assistant("Hi! How can I help?")),
            PipelineEvent::BusyChanged(false),
        ]
    );
    assert!(!h.pipeline.state().busy);
}

#[tokio::test]
async fn test_history_accumulates_across_turns() {
    let h = keyed(MockCompletion::replying("ok"), false);

    h.pipeline.submit_text("one").await;
    h.pipeline.submit_text("two").await;

    let calls = h.completion.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].len(), 4);
    assert_eq!(calls[1][3], Message::user("two"));
    assert_eq!(h.pipeline.visible_messages().len(), 4);
}

#[tokio::test]
async fn test_submitted_text_is_trimmed() {
    let h = keyed(MockCompletion::replying("ok"), false);

    h.pipeline.submit_text("  hello \n").await;

    assert_eq!(h.pipeline.visible_messages()[0], Message::user("hello"));
}

#[tokio::test]
async fn test_empty_text_is_ignored() {
    let mut h = keyed(MockCompletion::replying("unused"), false);

    assert_eq!(h.pipeline.submit_text("").await, SubmitOutcome::Empty);
    assert_eq!(h.pipeline.submit_text("   \t").await, SubmitOutcome::Empty);

    assert_eq!(h.pipeline.messages().len(), 1);
    assert!(h.completion.calls().is_empty());
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn test_missing_credential_blocks_submission() {
    let mut h = Harness::new(
        MockCompletion::replying("unused"),
        MockTranscriber::hearing("hello"),
        MockSpeech::default(),
        SharedStore::default(),
        true,
    );
    assert!(!h.pipeline.has_credential());

    assert_eq!(
        h.pipeline.submit_text("hello").await,
        SubmitOutcome::MissingCredential
    );
    assert_eq!(
        h.pipeline.submit_recording(&recording()).await,
        SubmitOutcome::MissingCredential
    );

    assert_eq!(h.pipeline.messages().len(), 1);
    assert!(h.completion.calls().is_empty());
    assert_eq!(h.transcriber.calls(), 0);
    assert_eq!(
        h.drain_events(),
        vec![
            PipelineEvent::CredentialRequired,
            PipelineEvent::CredentialRequired,
        ]
    );
}

#[tokio::test]
async fn test_completion_failure_appends_fixed_reply() {
    let h = keyed(MockCompletion::failing(), true);

    assert_eq!(h.pipeline.submit_text("hello").await, SubmitOutcome::Failed);

    assert_eq!(
        h.pipeline.visible_messages(),
        vec![
            Message::user("hello"),
            Message::assistant(COMPLETION_FAILURE_REPLY),
        ]
    );
    assert!(!h.pipeline.state().busy);
    // Failure text is not read aloud
    assert!(!h.pipeline.state().speaking);
    assert!(h.speech.spoken().is_empty());
}

#[tokio::test]
async fn test_recording_matches_typed_text() {
    let typed = keyed(MockCompletion::replying("Hi!"), false);
    typed.pipeline.submit_text("hello").await;

    let spoken = keyed(MockCompletion::replying("Hi!"), false);
    let outcome = spoken.pipeline.submit_recording(&recording()).await;

    assert_eq!(outcome, SubmitOutcome::Replied);
    assert_eq!(spoken.transcriber.calls(), 1);
    assert_eq!(spoken.pipeline.messages(), typed.pipeline.messages());
    assert_eq!(spoken.completion.calls(), typed.completion.calls());
}

#[tokio::test]
async fn test_empty_transcript_changes_nothing() {
    let h = Harness::new(
        MockCompletion::replying("unused"),
        MockTranscriber::hearing("  "),
        MockSpeech::default(),
        SharedStore::with_value("sk-test"),
        false,
    );

    assert_eq!(
        h.pipeline.submit_recording(&recording()).await,
        SubmitOutcome::Empty
    );
    assert_eq!(h.pipeline.messages().len(), 1);
    assert!(h.completion.calls().is_empty());
    assert!(!h.pipeline.state().busy);
}

#[tokio::test]
async fn test_transcription_failure_appends_fixed_reply() {
    let h = Harness::new(
        MockCompletion::replying("unused"),
        MockTranscriber::failing(),
        MockSpeech::default(),
        SharedStore::with_value("sk-test"),
        false,
    );

    assert_eq!(
        h.pipeline.submit_recording(&recording()).await,
        SubmitOutcome::Failed
    );
    assert_eq!(
        h.pipeline.visible_messages(),
        vec![Message::assistant(TRANSCRIPTION_FAILURE_REPLY)]
    );
    assert!(h.completion.calls().is_empty());
    assert!(!h.pipeline.state().busy);
}

#[tokio::test]
async fn test_reply_is_spoken_when_enabled() {
    let h = keyed(MockCompletion::replying("Hi there"), true);

    h.pipeline.submit_text("hello").await;

    let speech = h.speech.clone();
    assert!(eventually(|| speech.spoken() == vec!["Hi there".to_string()]).await);
    let pipeline = h.pipeline.clone();
    assert!(eventually(|| !pipeline.state().speaking).await);
}

#[tokio::test]
async fn test_reply_is_silent_when_disabled() {
    let h = keyed(MockCompletion::replying("Hi there"), false);

    h.pipeline.submit_text("hello").await;
    tokio::task::yield_now().await;

    assert!(h.speech.spoken().is_empty());
    assert!(!h.pipeline.state().speaking);
}

#[tokio::test]
async fn test_toggle_off_cancels_speech() {
    let mut h = Harness::new(
        MockCompletion::replying("A long answer"),
        MockTranscriber::hearing("hello"),
        MockSpeech::holding(),
        SharedStore::with_value("sk-test"),
        true,
    );

    h.pipeline.submit_text("hello").await;
    let speech = h.speech.clone();
    assert!(eventually(|| !speech.spoken().is_empty()).await);
    assert!(h.pipeline.state().speaking);
    h.drain_events();

    assert!(!h.pipeline.toggle_speech_enabled());

    let state = h.pipeline.state();
    assert!(!state.speech_enabled);
    assert!(!state.speaking);
    assert_eq!(h.speech.cancels(), 1);
    assert_eq!(h.drain_events(), vec![PipelineEvent::SpeakingChanged(false)]);

    // The cancelled task finishing later does not emit a second stop
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(h.drain_events().is_empty());
    assert!(!h.pipeline.state().speaking);
}

#[tokio::test]
async fn test_toggle_off_before_playback_starts_cancels_utterance() {
    let h = keyed(MockCompletion::replying("Hi there"), true);

    // The speech task is spawned but has not run yet
    h.pipeline.submit_text("hello").await;
    assert!(!h.pipeline.toggle_speech_enabled());

    let speech = h.speech.clone();
    assert!(eventually(|| speech.finished() == 1).await);
    assert_eq!(h.speech.started_cancelled(), 1);
    assert!(!h.pipeline.state().speaking);
}

#[tokio::test]
async fn test_playback_failure_clears_speaking_without_message() {
    let mut h = Harness::new(
        MockCompletion::replying("Hi there"),
        MockTranscriber::hearing("hello"),
        MockSpeech::failing(),
        SharedStore::with_value("sk-test"),
        true,
    );

    assert_eq!(h.pipeline.submit_text("hello").await, SubmitOutcome::Replied);

    let speech = h.speech.clone();
    assert!(eventually(|| speech.finished() == 1).await);
    assert!(!h.pipeline.state().speaking);
    assert_eq!(h.pipeline.messages().len(), 3);

    let events = h.drain_events();
    assert_eq!(events.last(), Some(&PipelineEvent::SpeakingChanged(false)));
}

#[tokio::test]
async fn test_superseded_utterance_leaves_newer_one_speaking() {
    let h = Harness::new(
        MockCompletion::replying("first answer"),
        MockTranscriber::hearing("hello"),
        MockSpeech::holding(),
        SharedStore::with_value("sk-test"),
        true,
    );

    h.pipeline.submit_text("hello").await;
    let speech = h.speech.clone();
    assert!(eventually(|| speech.spoken().len() == 1).await);

    assert!(h.pipeline.replay("again"));
    assert!(eventually(|| speech.spoken().len() == 2).await);

    // The first utterance ends while the replay is still playing
    h.speech.release();
    assert!(eventually(|| speech.finished() == 1).await);
    assert!(h.pipeline.state().speaking);

    h.speech.release();
    let pipeline = h.pipeline.clone();
    assert!(eventually(|| !pipeline.state().speaking).await);
}

#[tokio::test]
async fn test_toggle_while_silent_does_not_cancel() {
    let h = keyed(MockCompletion::replying("ok"), true);

    assert!(!h.pipeline.toggle_speech_enabled());
    assert!(h.pipeline.toggle_speech_enabled());
    assert_eq!(h.speech.cancels(), 0);
}

#[tokio::test]
async fn test_replay_respects_speech_toggle() {
    let h = keyed(MockCompletion::replying("ok"), false);

    assert!(!h.pipeline.replay("Hi there"));
    tokio::task::yield_now().await;
    assert!(h.speech.spoken().is_empty());

    h.pipeline.toggle_speech_enabled();
    assert!(h.pipeline.replay("Hi there"));
    let speech = h.speech.clone();
    assert!(eventually(|| speech.spoken() == vec!["Hi there".to_string()]).await);

    // Replay never touches the conversation
    assert_eq!(h.pipeline.messages().len(), 1);
}

#[tokio::test]
async fn test_replay_of_blank_content_is_ignored() {
    let h = keyed(MockCompletion::replying("ok"), true);
    assert!(!h.pipeline.replay("   "));
}

#[tokio::test]
async fn test_concurrent_submission_is_rejected() {
    let gate = Arc::new(Notify::new());
    let h = keyed(MockCompletion::replying("first reply").gated(gate.clone()), false);

    let pipeline = h.pipeline.clone();
    let first = tokio::spawn(async move { pipeline.submit_text("first").await });

    let pipeline = h.pipeline.clone();
    assert!(eventually(|| pipeline.state().busy).await);

    assert_eq!(h.pipeline.submit_text("second").await, SubmitOutcome::Busy);
    assert_eq!(
        h.pipeline.submit_recording(&recording()).await,
        SubmitOutcome::Busy
    );
    assert_eq!(h.transcriber.calls(), 0);

    gate.notify_one();
    assert_eq!(first.await.unwrap(), SubmitOutcome::Replied);

    assert_eq!(
        h.pipeline.visible_messages(),
        vec![Message::user("first"), Message::assistant("first reply")]
    );
    assert!(!h.pipeline.state().busy);
}

#[tokio::test]
async fn test_set_credential_persists_and_unblocks() {
    let h = Harness::new(
        MockCompletion::replying("ok"),
        MockTranscriber::hearing("hello"),
        MockSpeech::default(),
        SharedStore::default(),
        false,
    );
    assert_eq!(
        h.pipeline.submit_text("hello").await,
        SubmitOutcome::MissingCredential
    );

    h.pipeline.set_credential("sk-new").unwrap();

    assert_eq!(h.store.saved().as_deref(), Some("sk-new"));
    assert!(h.credential.is_present());
    assert_eq!(h.pipeline.submit_text("hello").await, SubmitOutcome::Replied);
}

#[tokio::test]
async fn test_stored_credential_loaded_at_startup() {
    let credential = Credential::default();
    let h = Harness::with_credential(
        MockCompletion::replying("ok"),
        MockTranscriber::hearing("hello"),
        MockSpeech::default(),
        SharedStore::with_value("sk-stored"),
        false,
        credential.clone(),
    );

    assert!(h.pipeline.has_credential());
    assert_eq!(credential.bearer().unwrap(), "Bearer sk-stored");
}

#[tokio::test]
async fn test_env_credential_used_when_store_empty() {
    let h = Harness::with_credential(
        MockCompletion::replying("ok"),
        MockTranscriber::hearing("hello"),
        MockSpeech::default(),
        SharedStore::default(),
        false,
        Credential::new(Some("sk-env")),
    );

    assert_eq!(h.pipeline.submit_text("hello").await, SubmitOutcome::Replied);
}

#[tokio::test]
async fn test_recording_flag_is_tracked() {
    let h = keyed(MockCompletion::replying("ok"), false);

    h.pipeline.set_recording(true);
    assert!(h.pipeline.state().recording);
    h.pipeline.set_recording(false);
    assert!(!h.pipeline.state().recording);
}

#[tokio::test]
async fn test_seed_is_never_visible() {
    let h = keyed(MockCompletion::replying("ok"), false);

    assert!(h.pipeline.visible_messages().is_empty());
    assert_eq!(h.pipeline.messages()[0].role, MessageRole::System);
}
