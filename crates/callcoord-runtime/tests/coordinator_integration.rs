#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use async_trait::async_trait;
use callcoord_core::{
    AgentConfig, AnsweredBy, CallStatus, CollectedData, CoordError, CoordResult,
    DataCollectionField, TerminationReason,
};
use callcoord_runtime::{
    BlobBackend, CallCoordinator, CoordinatorConfig, StartCall, StatusCallback, StoreBackend,
};
use callcoord_session::{GeneratedReply, ResponseContext, ResponseGenerator, TurnInput, TurnOutcome};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Pulls `name` and `email` out of utterances and remembers how many past
/// calls it was shown.
#[derive(Default)]
struct Intake {
    past_calls_seen: AtomicUsize,
}

#[async_trait]
impl ResponseGenerator for Intake {
    async fn generate(&self, context: &ResponseContext<'_>) -> CoordResult<GeneratedReply> {
        self.past_calls_seen
            .store(context.past_calls.len(), Ordering::SeqCst);
        let mut extracted = CollectedData::new();
        if let Some(name) = context.utterance.strip_prefix("my name is ") {
            extracted.insert("name".into(), json!(name));
        }
        if context.utterance.contains('@') {
            extracted.insert("email".into(), json!(context.utterance));
        }
        let text = match context.missing_fields.first() {
            Some(field) => format!("Could you tell me your {field}?"),
            None => "Thanks, I have everything.".to_string(),
        };
        Ok(GeneratedReply { text, extracted })
    }
}

fn intake_agent() -> AgentConfig {
    AgentConfig::new("intake", "Intake", "Collect contact details.")
        .with_field("name", DataCollectionField::required("What is your name?"))
        .with_field("email", DataCollectionField::required("What is your email?"))
}

async fn boot(config: CoordinatorConfig) -> (CallCoordinator, Arc<Intake>) {
    let generator = Arc::new(Intake::default());
    let coordinator = CallCoordinator::from_config(config, generator.clone())
        .await
        .unwrap();
    (coordinator, generator)
}

fn start(call_id: &str, agent_id: &str) -> StartCall {
    StartCall {
        call_id: call_id.into(),
        agent_id: agent_id.into(),
        recipient_phone: "+15551230000".into(),
        caller_phone: "+15550000000".into(),
    }
}

async fn say(coordinator: &CallCoordinator, call_id: &str, text: &str) -> TurnOutcome {
    coordinator
        .handle_turn(call_id, TurnInput::new(text, 0.95))
        .await
        .unwrap()
}

#[tokio::test]
async fn full_call_lifecycle() {
    let (coordinator, _) = boot(CoordinatorConfig::default()).await;
    coordinator.agents().create_agent(&intake_agent()).await.unwrap();

    let started = coordinator.start_call(start("CA1", "intake")).await.unwrap();
    assert_eq!(started.agent.agent_id, "intake");
    assert_eq!(started.greeting, "Hello! How can I help you today?");
    assert_eq!(started.past_calls, 0);

    match say(&coordinator, "CA1", "my name is Ann").await {
        TurnOutcome::Reply { text, data_complete } => {
            assert_eq!(text, "Could you tell me your email?");
            assert!(!data_complete);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(matches!(
        say(&coordinator, "CA1", "ann@example.com").await,
        TurnOutcome::Reply { data_complete: true, .. }
    ));
    assert!(matches!(
        say(&coordinator, "CA1", "Okay, goodbye").await,
        TurnOutcome::Terminated { reason: TerminationReason::User, .. }
    ));

    let mut callback = StatusCallback::new("CA1", CallStatus::Completed);
    callback.duration_seconds = Some(42);
    callback.answered_by = Some("human".into());
    let summary = coordinator.handle_status(callback).await.unwrap().unwrap();
    assert_eq!(summary.ended_by, TerminationReason::User);
    assert!(summary.finalized);
    assert_eq!(summary.message_count, 4);
    assert_eq!(summary.data_collected["email"], "ann@example.com");
    assert!(coordinator.registry().is_empty());

    let record = coordinator.store().get_call_record("CA1").await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Completed);
    assert_eq!(record.ended_by, Some(TerminationReason::User));
    assert_eq!(record.duration_seconds, Some(42));
    assert_eq!(record.answered_by, Some(AnsweredBy::Human));
    assert_eq!(record.conversation_history.len(), 4);
    assert_eq!(record.data_collected["name"], "Ann");
}

#[tokio::test]
async fn past_calls_are_loaded_for_the_next_call() {
    let (coordinator, generator) = boot(CoordinatorConfig::default()).await;
    coordinator.agents().create_agent(&intake_agent()).await.unwrap();

    coordinator.start_call(start("CA1", "intake")).await.unwrap();
    say(&coordinator, "CA1", "my name is Ann").await;
    coordinator
        .handle_status(StatusCallback::new("CA1", CallStatus::Completed))
        .await
        .unwrap();

    let started = coordinator.start_call(start("CA2", "intake")).await.unwrap();
    assert_eq!(started.past_calls, 1);
    say(&coordinator, "CA2", "hello again").await;
    assert_eq!(generator.past_calls_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unusable_agent_falls_back_to_default() {
    let (coordinator, _) = boot(CoordinatorConfig::default()).await;
    let started = coordinator.start_call(start("CA1", "missing")).await.unwrap();
    assert_eq!(started.agent.agent_id, "default");
    assert!(coordinator.registry().contains("CA1"));

    let mut config = CoordinatorConfig::default();
    config.session.fallback_to_default_agent = false;
    let (strict, _) = boot(config).await;
    let err = strict.start_call(start("CA2", "missing")).await.unwrap_err();
    assert!(matches!(err, CoordError::NotFound(_)));
    assert!(strict.registry().is_empty());
    assert!(strict.store().get_call_record("CA2").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_start_is_rejected() {
    let (coordinator, _) = boot(CoordinatorConfig::default()).await;
    coordinator.start_call(start("CA1", "missing")).await.unwrap();
    let err = coordinator.start_call(start("CA1", "missing")).await.unwrap_err();
    assert!(matches!(err, CoordError::Conflict(_)));
}

#[tokio::test]
async fn non_terminal_status_keeps_the_call() {
    let (coordinator, _) = boot(CoordinatorConfig::default()).await;
    coordinator.start_call(start("CA1", "missing")).await.unwrap();
    for status in [CallStatus::Ringing, CallStatus::InProgress] {
        let result = coordinator
            .handle_status(StatusCallback::new("CA1", status))
            .await
            .unwrap();
        assert!(result.is_none());
    }
    assert!(coordinator.registry().contains("CA1"));
}

#[tokio::test]
async fn unknown_call_is_session_not_found() {
    let (coordinator, _) = boot(CoordinatorConfig::default()).await;
    let err = coordinator
        .handle_turn("CA-nope", TurnInput::new("hello", 0.9))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordError::SessionNotFound(_)));
    assert!(coordinator.registry().is_empty());
}

#[tokio::test]
async fn silent_call_ends_with_system_timeout() {
    let (coordinator, _) = boot(CoordinatorConfig::default()).await;
    coordinator.agents().create_agent(&intake_agent()).await.unwrap();
    coordinator.start_call(start("CA1", "intake")).await.unwrap();

    for _ in 0..2 {
        assert!(matches!(
            coordinator.handle_turn("CA1", TurnInput::silence()).await.unwrap(),
            TurnOutcome::PromptRetry { .. }
        ));
    }
    assert!(matches!(
        coordinator.handle_turn("CA1", TurnInput::silence()).await.unwrap(),
        TurnOutcome::Terminated { reason: TerminationReason::SystemTimeout, .. }
    ));

    let summary = coordinator
        .handle_status(StatusCallback::new("CA1", CallStatus::Completed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.ended_by, TerminationReason::SystemTimeout);
}

#[tokio::test]
async fn hangup_without_termination_is_unknown() {
    let (coordinator, _) = boot(CoordinatorConfig::default()).await;
    coordinator.start_call(start("CA1", "missing")).await.unwrap();
    let summary = coordinator
        .handle_status(StatusCallback::new("CA1", CallStatus::NoAnswer))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.ended_by, TerminationReason::Unknown);

    let record = coordinator.store().get_call_record("CA1").await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::NoAnswer);
    assert_eq!(record.ended_by, Some(TerminationReason::Unknown));
    assert!(record.duration_seconds.is_some());
}

#[tokio::test]
async fn duplicate_completion_does_not_refinalize() {
    let (coordinator, _) = boot(CoordinatorConfig::default()).await;
    coordinator.start_call(start("CA1", "missing")).await.unwrap();
    say(&coordinator, "CA1", "bye").await;
    let first = coordinator
        .handle_status(StatusCallback::new("CA1", CallStatus::Completed))
        .await
        .unwrap()
        .unwrap();
    assert!(first.finalized);

    let again = coordinator
        .handle_status(StatusCallback::new("CA1", CallStatus::Failed))
        .await
        .unwrap()
        .unwrap();
    assert!(!again.finalized);
    assert_eq!(again.ended_by, TerminationReason::User);

    let record = coordinator.store().get_call_record("CA1").await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Completed);
    assert!(coordinator.registry().is_empty());
}

#[tokio::test]
async fn late_turn_after_end_does_not_reopen_the_call() {
    let (coordinator, _) = boot(CoordinatorConfig::default()).await;
    coordinator.start_call(start("CA1", "missing")).await.unwrap();
    say(&coordinator, "CA1", "hello").await;
    coordinator
        .handle_status(StatusCallback::new("CA1", CallStatus::Completed))
        .await
        .unwrap();
    assert!(coordinator.registry().is_empty());

    assert!(matches!(
        say(&coordinator, "CA1", "hello?").await,
        TurnOutcome::Closed { .. }
    ));
    assert!(coordinator.registry().is_empty());

    coordinator.shutdown().await;
    let record = coordinator.store().get_call_record("CA1").await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Completed);
    assert_eq!(record.conversation_history.len(), 2);
}

#[tokio::test]
async fn file_store_recovers_session_after_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = CoordinatorConfig::default();
    config.store.backend = StoreBackend::File;
    config.store.data_dir = dir.path().to_path_buf();
    config.session.sync_frequency = 1;

    {
        let (first, _) = boot(config.clone()).await;
        first.agents().create_agent(&intake_agent()).await.unwrap();
        first.start_call(start("CA1", "intake")).await.unwrap();
        say(&first, "CA1", "my name is Ann").await;
    }

    let (second, _) = boot(config).await;
    assert!(second.registry().is_empty());
    assert!(matches!(
        say(&second, "CA1", "ann@example.com").await,
        TurnOutcome::Reply { .. }
    ));
    {
        let guard = second.registry().get("CA1").await.unwrap();
        assert!(guard.is_recovered());
        assert_eq!(guard.history().len(), 4);
        assert_eq!(guard.data_collected()["name"], "Ann");
    }

    let summary = second
        .handle_status(StatusCallback::new("CA1", CallStatus::Completed))
        .await
        .unwrap()
        .unwrap();
    assert!(summary.finalized);
    let record = second.store().get_call_record("CA1").await.unwrap().unwrap();
    assert_eq!(record.conversation_history.len(), 4);
    assert_eq!(record.data_collected["email"], "ann@example.com");
}

fn archival_config(server: &MockServer) -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.archival.enabled = true;
    config.archival.retry_delay_secs = 0;
    config.archival.request_timeout_secs = 5;
    config.archival.presign_secret = Some("presign".into());
    config.archival.presign_base_url = format!("{}/blobs/", server.uri());
    config
}

#[tokio::test]
async fn recording_is_archived_when_call_ends() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp3-bytes".to_vec()))
        .mount(&server)
        .await;

    let (coordinator, _) = boot(archival_config(&server)).await;
    coordinator.start_call(start("CA1", "missing")).await.unwrap();

    let mut callback = StatusCallback::new("CA1", CallStatus::Completed);
    callback.recording_url = Some(format!("{}/Recordings/RE1", server.uri()));
    callback.recording_sid = Some("RE1".into());
    let summary = coordinator.handle_status(callback).await.unwrap().unwrap();

    let expected = "s3://call-recordings/recordings/CA1.mp3";
    assert_eq!(summary.archived_recording_url.as_deref(), Some(expected));
    let record = coordinator.store().get_call_record("CA1").await.unwrap().unwrap();
    assert_eq!(record.archived_recording_url.as_deref(), Some(expected));
    assert_eq!(record.call_recording_sid.as_deref(), Some("RE1"));

    let url = coordinator.recording_url("CA1").unwrap();
    assert!(url.starts_with(&format!("{}/blobs/call-recordings/recordings/CA1.mp3?", server.uri())));
}

#[tokio::test]
async fn archival_failure_still_finalizes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (coordinator, _) = boot(archival_config(&server)).await;
    coordinator.start_call(start("CA1", "missing")).await.unwrap();
    let mut callback = StatusCallback::new("CA1", CallStatus::Completed);
    callback.recording_url = Some(format!("{}/Recordings/RE1", server.uri()));
    let summary = coordinator.handle_status(callback).await.unwrap().unwrap();

    assert!(summary.finalized);
    assert!(summary.archived_recording_url.is_none());
    assert!(coordinator.registry().is_empty());
    let record = coordinator.store().get_call_record("CA1").await.unwrap().unwrap();
    assert!(record.archived_recording_url.is_none());
    assert!(record.call_recording_url.is_some());
}

#[tokio::test]
async fn encrypted_blob_backend_from_config() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp3-bytes".to_vec()))
        .mount(&server)
        .await;
    let blobs = TempDir::new().unwrap();
    let mut config = archival_config(&server);
    config.archival.blob_backend = BlobBackend::File;
    config.archival.blob_dir = blobs.path().to_path_buf();
    config.archival.encryption_key = Some("AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=".into());

    let (coordinator, _) = boot(config).await;
    coordinator.start_call(start("CA1", "missing")).await.unwrap();
    let mut callback = StatusCallback::new("CA1", CallStatus::Completed);
    callback.recording_url = Some(format!("{}/Recordings/RE1", server.uri()));
    coordinator.handle_status(callback).await.unwrap();

    let on_disk =
        std::fs::read(blobs.path().join("call-recordings/recordings/CA1.mp3")).unwrap();
    assert_ne!(on_disk.as_slice(), b"mp3-bytes");
    let stored = coordinator
        .archiver()
        .unwrap()
        .blobs()
        .get_object("recordings/CA1.mp3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.body, b"mp3-bytes");
}

#[tokio::test]
async fn recording_url_requires_archival() {
    let (coordinator, _) = boot(CoordinatorConfig::default()).await;
    assert!(matches!(
        coordinator.recording_url("CA1"),
        Err(CoordError::Config(_))
    ));
}

#[tokio::test]
async fn shutdown_flushes_live_sessions() {
    let mut config = CoordinatorConfig::default();
    config.session.sync_frequency = 100;
    let (coordinator, _) = boot(config).await;
    coordinator.start_call(start("CA1", "missing")).await.unwrap();
    say(&coordinator, "CA1", "hello there").await;

    let before = coordinator.store().get_call_record("CA1").await.unwrap().unwrap();
    assert!(before.conversation_history.is_empty());

    coordinator.shutdown().await;
    let after = coordinator.store().get_call_record("CA1").await.unwrap().unwrap();
    assert_eq!(after.conversation_history.len(), 2);
}
