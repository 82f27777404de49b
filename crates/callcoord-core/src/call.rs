use crate::message::ConversationMessage;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Structured data collected from the caller, keyed by field name.
pub type CollectedData = BTreeMap<String, serde_json::Value>;

/// Telephony lifecycle status of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    /// Call created, not yet ringing.
    Initiated,
    /// Recipient's phone is ringing.
    Ringing,
    /// Call answered and live.
    InProgress,
    /// Call ended normally.
    Completed,
    /// Call could not be connected.
    Failed,
    /// Recipient was busy.
    Busy,
    /// Recipient did not answer.
    NoAnswer,
    /// Call was canceled before it connected.
    Canceled,
}

impl CallStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Busy => "busy",
            CallStatus::NoAnswer => "no-answer",
            CallStatus::Canceled => "canceled",
        }
    }

    /// Parses a wire status name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "initiated" => Some(CallStatus::Initiated),
            "ringing" => Some(CallStatus::Ringing),
            "in-progress" => Some(CallStatus::InProgress),
            "completed" => Some(CallStatus::Completed),
            "failed" => Some(CallStatus::Failed),
            "busy" => Some(CallStatus::Busy),
            "no-answer" => Some(CallStatus::NoAnswer),
            "canceled" => Some(CallStatus::Canceled),
            _ => None,
        }
    }

    /// Whether the call is over once this status is reported.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Failed
                | CallStatus::Busy
                | CallStatus::NoAnswer
                | CallStatus::Canceled
        )
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session stopped accepting turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The caller said goodbye.
    User,
    /// The agent finished collecting what it needed.
    SystemComplete,
    /// Repeated empty utterances.
    SystemTimeout,
    /// Turn processing failed.
    Error,
    /// The call ended without the session deciding why.
    Unknown,
}

impl TerminationReason {
    /// Wire name of the reason.
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::User => "user",
            TerminationReason::SystemComplete => "system_complete",
            TerminationReason::SystemTimeout => "system_timeout",
            TerminationReason::Error => "error",
            TerminationReason::Unknown => "unknown",
        }
    }

    /// Parses a wire reason name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(TerminationReason::User),
            "system_complete" => Some(TerminationReason::SystemComplete),
            "system_timeout" => Some(TerminationReason::SystemTimeout),
            "error" => Some(TerminationReason::Error),
            "unknown" => Some(TerminationReason::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answering classification reported by the telephony provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnsweredBy {
    /// A person picked up.
    Human,
    /// Voicemail or an answering machine.
    Machine,
    /// A fax line.
    Fax,
    /// Detection was inconclusive.
    Unknown,
}

impl AnsweredBy {
    /// Maps a provider value such as `machine_end_beep` onto a classification.
    pub fn classify(value: &str) -> Self {
        let lower = value.to_ascii_lowercase();
        if lower == "human" {
            AnsweredBy::Human
        } else if lower.starts_with("machine") {
            AnsweredBy::Machine
        } else if lower == "fax" {
            AnsweredBy::Fax
        } else {
            AnsweredBy::Unknown
        }
    }

    /// Wire name of the classification.
    pub fn as_str(self) -> &'static str {
        match self {
            AnsweredBy::Human => "human",
            AnsweredBy::Machine => "machine",
            AnsweredBy::Fax => "fax",
            AnsweredBy::Unknown => "unknown",
        }
    }
}

/// Composite durable key of a call record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    /// Agent that served the call.
    pub agent_id: String,
    /// Provider call identifier.
    pub call_id: String,
}

impl CallKey {
    /// Builds a key from its parts.
    pub fn new(agent_id: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            call_id: call_id.into(),
        }
    }
}

/// Durable projection of a call and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Provider call identifier.
    pub call_id: String,
    /// Agent that served the call.
    pub agent_id: String,
    /// Number that was called.
    pub recipient_phone: String,
    /// Number the call came from.
    pub caller_phone: String,
    /// Telephony status.
    pub status: CallStatus,
    /// When the call record was created.
    pub started_at: DateTime<Utc>,
    /// When the call was finalised.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Call duration in seconds.
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    /// Why the session ended.
    #[serde(default)]
    pub ended_by: Option<TerminationReason>,
    /// Full conversation history.
    #[serde(default)]
    pub conversation_history: Vec<ConversationMessage>,
    /// Data collected during the call.
    #[serde(default)]
    pub data_collected: CollectedData,
    /// Provider URL of the whole-call recording.
    #[serde(default)]
    pub call_recording_url: Option<String>,
    /// Provider identifier of the whole-call recording.
    #[serde(default)]
    pub call_recording_sid: Option<String>,
    /// Blob-store URL of the archived recording.
    #[serde(default)]
    pub archived_recording_url: Option<String>,
    /// Answering classification.
    #[serde(default)]
    pub answered_by: Option<AnsweredBy>,
}

impl CallRecord {
    /// A fresh record for a call that is just starting.
    pub fn new(
        call_id: impl Into<String>,
        agent_id: impl Into<String>,
        recipient_phone: impl Into<String>,
        caller_phone: impl Into<String>,
        status: CallStatus,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            agent_id: agent_id.into(),
            recipient_phone: recipient_phone.into(),
            caller_phone: caller_phone.into(),
            status,
            started_at: Utc::now(),
            ended_at: None,
            duration_seconds: None,
            ended_by: None,
            conversation_history: Vec::new(),
            data_collected: CollectedData::new(),
            call_recording_url: None,
            call_recording_sid: None,
            archived_recording_url: None,
            answered_by: None,
        }
    }

    /// Composite durable key.
    pub fn key(&self) -> CallKey {
        CallKey::new(&self.agent_id, &self.call_id)
    }

    /// Secondary key grouping calls by agent and recipient, ordered by start time.
    pub fn agent_recipient_key(&self) -> String {
        format!(
            "{}{}",
            agent_recipient_prefix(&self.agent_id, &self.recipient_phone),
            self.started_at.to_rfc3339_opts(SecondsFormat::Micros, true)
        )
    }
}

/// Prefix shared by every [`CallRecord::agent_recipient_key`] of one agent+recipient pair.
pub fn agent_recipient_prefix(agent_id: &str, recipient_phone: &str) -> String {
    format!("{agent_id}#{recipient_phone}#")
}
