#![allow(clippy::unwrap_used, clippy::expect_used)]

use callcoord_core::{
    AgentConfig, AgentStatus, AnsweredBy, CallKey, CallRecord, CallStatus, CollectedData,
    ConversationMessage, CoordError, DataCollectionField, RecordingRef, RetryPolicy,
    TerminationReason,
};
use callcoord_store::{
    AgentUpdate, CallFinalization, DurableStore, FileRecordStore, ItemKey, MemoryRecordStore,
    PutCondition, RecordStore, Table,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn memory_store() -> DurableStore {
    DurableStore::new(
        Arc::new(MemoryRecordStore::new()),
        RetryPolicy::none(),
        Duration::from_secs(2),
    )
}

async fn file_store(dir: &TempDir) -> DurableStore {
    let records = FileRecordStore::new(dir.path().to_path_buf()).await.unwrap();
    DurableStore::new(Arc::new(records), RetryPolicy::none(), Duration::from_secs(2))
}

fn intake_agent() -> AgentConfig {
    AgentConfig::new("agent-1", "Intake", "Collect name and email.")
        .with_field("name", DataCollectionField::required("What is your name?"))
        .with_field("email", DataCollectionField::required("What is your email?"))
}

fn call(call_id: &str, recipient: &str, minutes_ago: i64) -> CallRecord {
    let mut record = CallRecord::new(call_id, "agent-1", recipient, "+15550000000", CallStatus::InProgress);
    record.started_at = Utc::now() - ChronoDuration::minutes(minutes_ago);
    record
}

#[tokio::test]
async fn agent_admin_lifecycle() {
    let store = memory_store();
    store.create_agent(&intake_agent()).await.unwrap();

    let err = store.create_agent(&intake_agent()).await.unwrap_err();
    assert!(matches!(err, CoordError::Conflict(_)));

    store
        .update_agent(
            "agent-1",
            AgentUpdate {
                greeting: Some("Hi there!".into()),
                ..AgentUpdate::default()
            },
        )
        .await
        .unwrap();
    let agent = store.get_agent("agent-1").await.unwrap().unwrap();
    assert_eq!(agent.greeting, "Hi there!");
    assert!(agent.updated_at.is_some());
    assert_eq!(agent.data_to_fill.len(), 2);

    store
        .update_agent("agent-1", AgentUpdate::status(AgentStatus::Inactive))
        .await
        .unwrap();
    assert!(store.list_agents(AgentStatus::Active, 10).await.unwrap().is_empty());
    let inactive = store.list_agents(AgentStatus::Inactive, 10).await.unwrap();
    assert_eq!(inactive.len(), 1);

    let err = store
        .update_agent("ghost", AgentUpdate::status(AgentStatus::Active))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordError::Conflict(_)));
}

#[tokio::test]
async fn create_agent_rejects_invalid_config() {
    let store = memory_store();
    let mut agent = intake_agent();
    agent.voice = "robot".into();
    let err = store.create_agent(&agent).await.unwrap_err();
    assert!(matches!(err, CoordError::InvalidConfig(_)));
    assert!(store.get_agent("agent-1").await.unwrap().is_none());
}

#[tokio::test]
async fn call_sync_then_finalize() {
    let store = memory_store();
    let record = call("CA1", "+15551234567", 0);
    let key = record.key();
    store.create_call_record(&record).await.unwrap();

    let history = vec![
        ConversationMessage::assistant("Hello! How can I help you today?"),
        ConversationMessage::user("My name is Jane", 0.91, None),
    ];
    let mut data = CollectedData::new();
    data.insert("name".into(), json!("Jane"));
    store.sync_conversation(&key, &history, &data).await.unwrap();

    let synced = store.get_call_record("CA1").await.unwrap().unwrap();
    assert_eq!(synced.conversation_history.len(), 2);
    assert_eq!(synced.data_collected["name"], "Jane");
    assert_eq!(synced.status, CallStatus::InProgress);

    store
        .finalize_call(
            &key,
            CallFinalization {
                status: CallStatus::Completed,
                ended_at: Utc::now(),
                duration_seconds: Some(42),
                ended_by: TerminationReason::User,
                conversation_history: history.clone(),
                data_collected: data.clone(),
                call_recording: RecordingRef::from_parts(
                    Some("https://provider/rec/RE1".into()),
                    Some("RE1".into()),
                ),
                archived_recording_url: Some("s3://recordings-bucket/recordings/CA1.mp3".into()),
                answered_by: Some(AnsweredBy::Human),
            },
        )
        .await
        .unwrap();

    let done = store.get_call_record("CA1").await.unwrap().unwrap();
    assert_eq!(done.status, CallStatus::Completed);
    assert_eq!(done.duration_seconds, Some(42));
    assert_eq!(done.ended_by, Some(TerminationReason::User));
    assert_eq!(done.call_recording_sid.as_deref(), Some("RE1"));
    assert_eq!(
        done.archived_recording_url.as_deref(),
        Some("s3://recordings-bucket/recordings/CA1.mp3")
    );
    assert_eq!(done.answered_by, Some(AnsweredBy::Human));
    assert!(done.ended_at.is_some());

    store.sync_conversation(&key, &history, &data).await.unwrap();
    let after = store.get_call_record("CA1").await.unwrap().unwrap();
    assert_eq!(after.status, CallStatus::Completed);
}

#[tokio::test]
async fn sync_of_unknown_call_is_a_conflict() {
    let store = memory_store();
    let err = store
        .sync_conversation(&CallKey::new("agent-1", "CA404"), &[], &CollectedData::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CoordError::Conflict(_)));
}

#[tokio::test]
async fn past_conversations_are_scoped_and_newest_first() {
    let store = memory_store();
    store.create_call_record(&call("CA-old", "+1555", 60)).await.unwrap();
    store.create_call_record(&call("CA-mid", "+1555", 30)).await.unwrap();
    store.create_call_record(&call("CA-new", "+1555", 5)).await.unwrap();
    store.create_call_record(&call("CA-other", "+1666", 1)).await.unwrap();

    let past = store.past_conversations("agent-1", "+1555", 2).await.unwrap();
    let ids: Vec<&str> = past.iter().map(|c| c.call_id.as_str()).collect();
    assert_eq!(ids, vec!["CA-new", "CA-mid"]);

    let by_recipient = store.calls_by_recipient("+1666", 10).await.unwrap();
    assert_eq!(by_recipient.len(), 1);

    let in_progress = store.calls_by_status(CallStatus::InProgress, 10).await.unwrap();
    assert_eq!(in_progress.len(), 4);
    assert_eq!(in_progress[0].call_id, "CA-other");
}

#[tokio::test]
async fn legacy_call_items_decode() {
    let records = Arc::new(MemoryRecordStore::new());
    let item = json!({
        "call_sid": "CA-legacy",
        "agent_id": "agent-1",
        "status": "completed",
        "started_at": "2024-06-01T10:00:00.123",
        "duration_seconds": "17",
        "s3_recording_url": "s3://old-bucket/recordings/CA-legacy.mp3",
        "ended_by": "operator",
        "answered_by": "machine_end_beep",
    });
    records
        .put(
            Table::Calls,
            &ItemKey::composite("agent-1", "CA-legacy"),
            item.as_object().unwrap().clone(),
            PutCondition::Always,
        )
        .await
        .unwrap();
    let store = DurableStore::new(records, RetryPolicy::none(), Duration::from_secs(1));

    let past = store.calls_by_status(CallStatus::Completed, 1).await.unwrap();
    let legacy = &past[0];
    assert_eq!(legacy.call_id, "CA-legacy");
    assert_eq!(legacy.duration_seconds, Some(17));
    assert_eq!(legacy.ended_by, Some(TerminationReason::Unknown));
    assert_eq!(legacy.answered_by, Some(AnsweredBy::Machine));
    assert_eq!(
        legacy.archived_recording_url.as_deref(),
        Some("s3://old-bucket/recordings/CA-legacy.mp3")
    );
}

#[tokio::test]
async fn file_backend_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let store = file_store(&dir).await;
        store.create_agent(&intake_agent()).await.unwrap();
        store.create_call_record(&call("CA1", "+1555", 0)).await.unwrap();
        store
            .sync_conversation(
                &CallKey::new("agent-1", "CA1"),
                &[ConversationMessage::assistant("Hello")],
                &CollectedData::new(),
            )
            .await
            .unwrap();
    }

    let store = file_store(&dir).await;
    let agent = store.get_agent("agent-1").await.unwrap().unwrap();
    assert_eq!(agent.name, "Intake");
    let record = store.get_call_record("CA1").await.unwrap().unwrap();
    assert_eq!(record.conversation_history.len(), 1);
    assert_eq!(record.conversation_history[0].content, "Hello");
}
