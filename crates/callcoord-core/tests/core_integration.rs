#![allow(clippy::unwrap_used, clippy::expect_used)]

use callcoord_core::*;

// ---------------------------------------------------------------------------
// 1. CallRecord serialization keeps history and collected data
// ---------------------------------------------------------------------------

#[test]
fn call_record_serialization_roundtrip() {
    let mut record = CallRecord::new("CA100", "agent-7", "+15550100", "+15550199", CallStatus::InProgress);
    record.conversation_history.push(ConversationMessage::user(
        "my name is John",
        0.91,
        RecordingRef::from_parts(Some("https://rec/RE1".into()), Some("RE1".into())),
    ));
    record
        .conversation_history
        .push(ConversationMessage::assistant("Thanks John, what's your email?"));
    record
        .data_collected
        .insert("name".into(), serde_json::json!("John"));
    record.ended_by = Some(TerminationReason::User);
    record.answered_by = Some(AnsweredBy::Human);

    let json = serde_json::to_string(&record).unwrap();
    let back: CallRecord = serde_json::from_str(&json).unwrap();

    assert_eq!(back, record);
    assert_eq!(back.conversation_history[0].confidence, Some(0.91));
    assert_eq!(back.status, CallStatus::InProgress);
}

// ---------------------------------------------------------------------------
// 2. AgentConfig JSON defaults
// ---------------------------------------------------------------------------

#[test]
fn agent_config_field_defaults() {
    let json = serde_json::json!({
        "agent_id": "agent-1",
        "name": "Intake",
        "prompt": "Collect details",
        "voice": "Polly.Amy",
        "language": "en-GB",
        "greeting": "Hi",
        "status": "active",
        "created_at": "2025-01-01T00:00:00Z",
        "data_to_fill": {
            "email": { "prompt": "What's your email?" }
        }
    });

    let agent: AgentConfig = serde_json::from_value(json).unwrap();
    agent.validate().unwrap();
    assert!(agent.data_to_fill["email"].required);
    assert!(agent.few_shot.is_empty());
    assert!(agent.updated_at.is_none());
}

// ---------------------------------------------------------------------------
// 3. Error taxonomy
// ---------------------------------------------------------------------------

#[test]
fn json_errors_convert() {
    fn parse(raw: &str) -> CoordResult<CallRecord> {
        Ok(serde_json::from_str(raw)?)
    }
    let err = parse("{not json").unwrap_err();
    assert!(matches!(err, CoordError::Json(_)));
    assert!(!err.is_transient());
}
