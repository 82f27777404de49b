//! Translation between raw stored items and validated entities.
//!
//! Stored items come from more than one producer, and decoding is permissive
//! about shape: optional keys may be missing,
//! numbers may arrive as strings, data fields may be declared as a bare prompt
//! string, legacy attribute names are accepted, and naive timestamps are read
//! as UTC. Everything that leaves this module is strongly typed; anything that
//! cannot be made sense of is a [`DecodeError`].

use crate::record::Item;
use callcoord_core::{
    AgentConfig, AgentStatus, AnsweredBy, CallRecord, CallStatus, CollectedData,
    ConversationMessage, DataCollectionField, FewShotExample, RecordingRef, Role,
    TerminationReason,
};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a stored item could not be turned into an entity.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    /// A required attribute is absent or null.
    #[error("missing attribute '{0}'")]
    Missing(&'static str),

    /// An attribute is present but unusable.
    #[error("invalid attribute '{field}': {reason}")]
    Invalid {
        /// Attribute name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> DecodeError {
    DecodeError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Scalar helpers
// ---------------------------------------------------------------------------

/// Canonical timestamp encoding: fixed-width RFC 3339, so lexical order is time order.
pub fn encode_timestamp(ts: &DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn parse_timestamp(field: &'static str, raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| invalid(field, format!("{raw:?}: {e}")))
}

fn present<'a>(item: &'a Item, key: &str) -> Option<&'a Value> {
    item.get(key).filter(|v| !v.is_null())
}

fn req_str(item: &Item, key: &'static str) -> Result<String, DecodeError> {
    match present(item, key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(invalid(key, format!("expected string, got {other}"))),
        None => Err(DecodeError::Missing(key)),
    }
}

fn opt_str(item: &Item, key: &'static str) -> Result<Option<String>, DecodeError> {
    match present(item, key) {
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(invalid(key, format!("expected string, got {other}"))),
        None => Ok(None),
    }
}

fn str_or(item: &Item, key: &'static str, default: &str) -> Result<String, DecodeError> {
    Ok(opt_str(item, key)?.unwrap_or_else(|| default.to_string()))
}

fn opt_f64(item: &Item, key: &'static str) -> Result<Option<f64>, DecodeError> {
    match present(item, key) {
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| invalid(key, format!("{s:?}: {e}"))),
        Some(other) => Err(invalid(key, format!("expected number, got {other}"))),
        None => Ok(None),
    }
}

fn opt_u64(item: &Item, key: &'static str) -> Result<Option<u64>, DecodeError> {
    match opt_f64(item, key)? {
        Some(n) if n >= 0.0 && n.is_finite() => Ok(Some(n.round() as u64)),
        Some(n) => Err(invalid(key, format!("expected non-negative number, got {n}"))),
        None => Ok(None),
    }
}

fn opt_timestamp(item: &Item, key: &'static str) -> Result<Option<DateTime<Utc>>, DecodeError> {
    opt_str(item, key)?
        .map(|raw| parse_timestamp(key, &raw))
        .transpose()
}

fn first_present(item: &Item, keys: &[&'static str]) -> Option<&'static str> {
    keys.iter().copied().find(|k| present(item, k).is_some())
}

fn as_object(value: &Value) -> Option<&Item> {
    value.as_object()
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Encodes an agent as a stored item.
pub fn encode_agent(agent: &AgentConfig) -> Item {
    let fields: serde_json::Map<String, Value> = agent
        .data_to_fill
        .iter()
        .map(|(name, field)| (name.clone(), encode_field(field)))
        .collect();
    let few_shot: Vec<Value> = agent
        .few_shot
        .iter()
        .map(|ex| json!({ "user": ex.user, "assistant": ex.assistant }))
        .collect();

    let mut item = Item::new();
    item.insert("agent_id".into(), json!(agent.agent_id));
    item.insert("name".into(), json!(agent.name));
    item.insert("prompt".into(), json!(agent.prompt));
    item.insert("voice".into(), json!(agent.voice));
    item.insert("language".into(), json!(agent.language));
    item.insert("greeting".into(), json!(agent.greeting));
    item.insert("data_to_fill".into(), Value::Object(fields));
    item.insert("few_shot".into(), Value::Array(few_shot));
    item.insert("status".into(), json!(agent.status.as_str()));
    item.insert("created_at".into(), encode_timestamp(&agent.created_at));
    if let Some(updated) = &agent.updated_at {
        item.insert("updated_at".into(), encode_timestamp(updated));
    }
    item
}

/// Encodes one data-collection field.
pub fn encode_field(field: &DataCollectionField) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("required".into(), json!(field.required));
    obj.insert("prompt".into(), json!(field.prompt));
    if let Some(example) = &field.example {
        obj.insert("example".into(), json!(example));
    }
    if let Some(pattern) = &field.validation_pattern {
        obj.insert("validation_pattern".into(), json!(pattern));
    }
    Value::Object(obj)
}

fn decode_field(name: &str, value: &Value) -> Result<DataCollectionField, DecodeError> {
    match value {
        Value::String(prompt) => Ok(DataCollectionField::required(prompt.clone())),
        Value::Object(obj) => {
            let required = match present(obj, "required") {
                None => true,
                Some(Value::Bool(b)) => *b,
                Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
                Some(other) => {
                    return Err(invalid(
                        "data_to_fill",
                        format!("field '{name}' has non-boolean 'required': {other}"),
                    ))
                }
            };
            let prompt = opt_str(obj, "prompt")?
                .ok_or_else(|| invalid("data_to_fill", format!("field '{name}' has no prompt")))?;
            Ok(DataCollectionField {
                required,
                prompt,
                example: opt_str(obj, "example")?,
                validation_pattern: opt_str(obj, "validation_pattern")?,
            })
        }
        other => Err(invalid(
            "data_to_fill",
            format!("field '{name}' must be an object or a prompt string, got {other}"),
        )),
    }
}

fn decode_few_shot(value: Option<&Value>) -> Result<Vec<FewShotExample>, DecodeError> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let entries = value
        .as_array()
        .ok_or_else(|| invalid("few_shot", "expected an array"))?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let obj = as_object(entry).ok_or_else(|| invalid("few_shot", "expected objects"))?;
        out.push(FewShotExample {
            user: str_or(obj, "user", "")?,
            assistant: str_or(obj, "assistant", "")?,
        });
    }
    Ok(out)
}

/// Decodes a stored agent item. Schema checks beyond shape are left to
/// [`AgentConfig::validate`].
pub fn decode_agent(item: &Item) -> Result<AgentConfig, DecodeError> {
    let mut data_to_fill = BTreeMap::new();
    if let Some(raw) = present(item, "data_to_fill") {
        let obj = as_object(raw).ok_or_else(|| invalid("data_to_fill", "expected an object"))?;
        for (name, spec) in obj {
            data_to_fill.insert(name.clone(), decode_field(name, spec)?);
        }
    }

    let status_raw = str_or(item, "status", "active")?;
    let status = AgentStatus::parse(&status_raw)
        .ok_or_else(|| invalid("status", format!("unknown status {status_raw:?}")))?;

    let defaults = AgentConfig::new("", "", "");
    Ok(AgentConfig {
        agent_id: req_str(item, "agent_id")?,
        name: req_str(item, "name")?,
        prompt: req_str(item, "prompt")?,
        voice: str_or(item, "voice", &defaults.voice)?,
        language: str_or(item, "language", &defaults.language)?,
        greeting: str_or(item, "greeting", &defaults.greeting)?,
        data_to_fill,
        few_shot: decode_few_shot(present(item, "few_shot"))?,
        status,
        created_at: opt_timestamp(item, "created_at")?.unwrap_or(defaults.created_at),
        updated_at: opt_timestamp(item, "updated_at")?,
    })
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Encodes one conversation message; absent optional attributes are omitted.
pub fn encode_message(msg: &ConversationMessage) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("role".into(), json!(msg.role.as_str()));
    obj.insert("content".into(), json!(msg.content));
    obj.insert("timestamp".into(), encode_timestamp(&msg.timestamp));
    if let Some(confidence) = msg.confidence {
        obj.insert("confidence".into(), json!(confidence));
    }
    if let Some(rec) = &msg.recording {
        obj.insert("recording_url".into(), json!(rec.url));
        if let Some(sid) = &rec.sid {
            obj.insert("recording_sid".into(), json!(sid));
        }
    }
    Value::Object(obj)
}

/// Encodes a conversation history.
pub fn encode_history(history: &[ConversationMessage]) -> Value {
    Value::Array(history.iter().map(encode_message).collect())
}

/// Decodes one stored conversation message.
pub fn decode_message(value: &Value) -> Result<ConversationMessage, DecodeError> {
    let obj = as_object(value)
        .ok_or_else(|| invalid("conversation_history", "expected message objects"))?;
    let role_raw = req_str(obj, "role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| invalid("role", format!("unknown role {role_raw:?}")))?;
    Ok(ConversationMessage {
        role,
        content: str_or(obj, "content", "")?,
        timestamp: opt_timestamp(obj, "timestamp")?.unwrap_or_else(Utc::now),
        confidence: opt_f64(obj, "confidence")?.map(|c| c as f32),
        recording: RecordingRef::from_parts(
            opt_str(obj, "recording_url")?,
            opt_str(obj, "recording_sid")?,
        ),
    })
}

fn decode_history(value: Option<&Value>) -> Result<Vec<ConversationMessage>, DecodeError> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::Array(entries)) => entries.iter().map(decode_message).collect(),
        Some(_) => Err(invalid("conversation_history", "expected an array")),
    }
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// Encodes collected data as an attribute value.
pub fn encode_collected(data: &CollectedData) -> Value {
    Value::Object(data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Encodes a call record, including its secondary lookup key.
pub fn encode_call(record: &CallRecord) -> Item {
    let mut item = Item::new();
    item.insert("call_id".into(), json!(record.call_id));
    item.insert("agent_id".into(), json!(record.agent_id));
    item.insert("recipient_phone".into(), json!(record.recipient_phone));
    item.insert("caller_phone".into(), json!(record.caller_phone));
    item.insert("status".into(), json!(record.status.as_str()));
    item.insert("started_at".into(), encode_timestamp(&record.started_at));
    item.insert("agent_recipient_key".into(), json!(record.agent_recipient_key()));
    item.insert(
        "conversation_history".into(),
        encode_history(&record.conversation_history),
    );
    item.insert("data_collected".into(), encode_collected(&record.data_collected));
    if let Some(ended) = &record.ended_at {
        item.insert("ended_at".into(), encode_timestamp(ended));
    }
    if let Some(duration) = record.duration_seconds {
        item.insert("duration_seconds".into(), json!(duration));
    }
    if let Some(reason) = record.ended_by {
        item.insert("ended_by".into(), json!(reason.as_str()));
    }
    if let Some(url) = &record.call_recording_url {
        item.insert("call_recording_url".into(), json!(url));
    }
    if let Some(sid) = &record.call_recording_sid {
        item.insert("call_recording_sid".into(), json!(sid));
    }
    if let Some(url) = &record.archived_recording_url {
        item.insert("archived_recording_url".into(), json!(url));
    }
    if let Some(answered_by) = record.answered_by {
        item.insert("answered_by".into(), json!(answered_by.as_str()));
    }
    item
}

/// Decodes a stored call record.
pub fn decode_call(item: &Item) -> Result<CallRecord, DecodeError> {
    let call_id_key =
        first_present(item, &["call_id", "call_sid"]).ok_or(DecodeError::Missing("call_id"))?;
    let status_raw = req_str(item, "status")?;
    let status = CallStatus::parse(&status_raw)
        .ok_or_else(|| invalid("status", format!("unknown call status {status_raw:?}")))?;

    let data_collected = match present(item, "data_collected") {
        None => CollectedData::new(),
        Some(Value::Object(obj)) => obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Some(_) => return Err(invalid("data_collected", "expected an object")),
    };

    let archived_key = first_present(item, &["archived_recording_url", "s3_recording_url"]);
    let archived_recording_url = match archived_key {
        Some(key) => opt_str(item, key)?,
        None => None,
    };

    Ok(CallRecord {
        call_id: req_str(item, call_id_key)?,
        agent_id: req_str(item, "agent_id")?,
        recipient_phone: str_or(item, "recipient_phone", "")?,
        caller_phone: str_or(item, "caller_phone", "")?,
        status,
        started_at: opt_timestamp(item, "started_at")?.ok_or(DecodeError::Missing("started_at"))?,
        ended_at: opt_timestamp(item, "ended_at")?,
        duration_seconds: opt_u64(item, "duration_seconds")?,
        ended_by: opt_str(item, "ended_by")?
            .map(|raw| TerminationReason::parse(&raw).unwrap_or(TerminationReason::Unknown)),
        conversation_history: decode_history(present(item, "conversation_history"))?,
        data_collected,
        call_recording_url: opt_str(item, "call_recording_url")?,
        call_recording_sid: opt_str(item, "call_recording_sid")?,
        archived_recording_url,
        answered_by: opt_str(item, "answered_by")?.map(|raw| AnsweredBy::classify(&raw)),
    })
}
