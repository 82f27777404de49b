use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of the participant that authored a [`ConversationMessage`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller.
    User,
    /// The voice agent.
    Assistant,
    /// A system-level instruction or event.
    System,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Parses a wire role name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// Reference to the provider-side recording of a single utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingRef {
    /// Provider URL of the recording.
    pub url: String,
    /// Provider identifier of the recording, when known.
    #[serde(default)]
    pub sid: Option<String>,
}

impl RecordingRef {
    /// Builds a reference, treating an empty URL as "no recording".
    pub fn from_parts(url: Option<String>, sid: Option<String>) -> Option<Self> {
        let url = url.filter(|u| !u.is_empty())?;
        Some(Self {
            url,
            sid: sid.filter(|s| !s.is_empty()),
        })
    }
}

/// A single message exchanged within a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// The role of the message author.
    pub role: Role,
    /// The textual content of the message.
    pub content: String,
    /// UTC timestamp of when the message was recorded.
    pub timestamp: DateTime<Utc>,
    /// Speech recognition confidence in `[0, 1]` for caller messages.
    #[serde(default)]
    pub confidence: Option<f32>,
    /// Provider recording of the utterance.
    #[serde(default)]
    pub recording: Option<RecordingRef>,
}

impl ConversationMessage {
    /// Creates a message stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            confidence: None,
            recording: None,
        }
    }

    /// Creates a caller message carrying recognition metadata.
    pub fn user(
        content: impl Into<String>,
        confidence: f32,
        recording: Option<RecordingRef>,
    ) -> Self {
        Self {
            confidence: Some(confidence),
            recording,
            ..Self::new(Role::User, content)
        }
    }

    /// Creates a message with [`Role::Assistant`].
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Creates a message with [`Role::System`].
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}
