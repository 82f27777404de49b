use crate::error::{CoordError, CoordResult};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Voices accepted without the `Polly.` prefix.
const BASIC_VOICES: &[&str] = &["woman", "man", "alice"];

/// Lifecycle status of an agent. Only [`AgentStatus::Active`] agents are servable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Servable.
    Active,
    /// Temporarily disabled.
    Inactive,
    /// Soft-deleted.
    Archived,
}

impl AgentStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Archived => "archived",
        }
    }

    /// Parses a wire status name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(AgentStatus::Active),
            "inactive" => Some(AgentStatus::Inactive),
            "archived" => Some(AgentStatus::Archived),
            _ => None,
        }
    }
}

/// Definition of a single structured field the agent must collect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCollectionField {
    /// Whether the field gates data-collection completeness.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Prompt used to elicit the field from the caller.
    pub prompt: String,
    /// Example value shown to the response generator.
    #[serde(default)]
    pub example: Option<String>,
    /// Regular expression a collected value is expected to match.
    #[serde(default)]
    pub validation_pattern: Option<String>,
}

fn default_required() -> bool {
    true
}

impl DataCollectionField {
    /// A required field with only an elicitation prompt.
    pub fn required(prompt: impl Into<String>) -> Self {
        Self {
            required: true,
            prompt: prompt.into(),
            example: None,
            validation_pattern: None,
        }
    }

    /// An optional field with only an elicitation prompt.
    pub fn optional(prompt: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(prompt)
        }
    }
}

/// A user/assistant exemplar exchange fed to the response generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    /// What the caller says.
    pub user: String,
    /// How the agent answers.
    pub assistant: String,
}

/// Configuration of a voice agent.
///
/// Immutable per fetch: a call snapshots the config by value when it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent identifier.
    pub agent_id: String,
    /// Human-readable agent name.
    pub name: String,
    /// System prompt for the response generator.
    pub prompt: String,
    /// Provider voice selector (`Polly.*` or a basic voice).
    pub voice: String,
    /// Language code in `xx-XX` form.
    pub language: String,
    /// Opening line spoken when the call is answered.
    pub greeting: String,
    /// Fields to collect, keyed by field name.
    #[serde(default)]
    pub data_to_fill: BTreeMap<String, DataCollectionField>,
    /// Few-shot dialogue exemplars.
    #[serde(default)]
    pub few_shot: Vec<FewShotExample>,
    /// Servability status.
    pub status: AgentStatus,
    /// Provisioning timestamp.
    pub created_at: DateTime<Utc>,
    /// Last administrative update.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AgentConfig {
    /// Creates an active agent with default voice, language and greeting.
    pub fn new(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            prompt: prompt.into(),
            voice: "Polly.Joanna".to_string(),
            language: "en-US".to_string(),
            greeting: "Hello! How can I help you today?".to_string(),
            data_to_fill: BTreeMap::new(),
            few_shot: Vec::new(),
            status: AgentStatus::Active,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Adds a field definition.
    pub fn with_field(mut self, name: impl Into<String>, field: DataCollectionField) -> Self {
        self.data_to_fill.insert(name.into(), field);
        self
    }

    /// Whether calls may be served with this config.
    pub fn is_servable(&self) -> bool {
        self.status == AgentStatus::Active
    }

    /// Names of fields marked required.
    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.data_to_fill
            .iter()
            .filter(|(_, f)| f.required)
            .map(|(name, _)| name.as_str())
    }

    /// Checks the record against the schema rules a servable config must meet.
    pub fn validate(&self) -> CoordResult<()> {
        if self.agent_id.trim().is_empty() {
            return Err(CoordError::InvalidConfig("agent_id is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(CoordError::InvalidConfig(format!(
                "agent {} has an empty name",
                self.agent_id
            )));
        }
        if self.prompt.trim().is_empty() {
            return Err(CoordError::InvalidConfig(format!(
                "agent {} has an empty prompt",
                self.agent_id
            )));
        }
        validate_voice(&self.voice)?;
        validate_language(&self.language)?;
        for (name, field) in &self.data_to_fill {
            if let Some(pattern) = &field.validation_pattern {
                Regex::new(pattern).map_err(|e| {
                    CoordError::InvalidConfig(format!(
                        "field '{name}' has an invalid validation pattern: {e}"
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// Accepts any `Polly.*` voice or one of the basic provider voices.
pub fn validate_voice(voice: &str) -> CoordResult<()> {
    let polly = voice
        .strip_prefix("Polly.")
        .is_some_and(|rest| !rest.is_empty());
    if polly || BASIC_VOICES.contains(&voice) {
        Ok(())
    } else {
        Err(CoordError::InvalidConfig(format!("invalid voice: {voice}")))
    }
}

/// Accepts codes shaped like `en-US`.
pub fn validate_language(language: &str) -> CoordResult<()> {
    let bytes = language.as_bytes();
    let well_formed = bytes.len() == 5
        && bytes[2] == b'-'
        && bytes[..2].iter().all(u8::is_ascii_alphabetic)
        && bytes[3..].iter().all(u8::is_ascii_alphabetic);
    if well_formed {
        Ok(())
    } else {
        Err(CoordError::InvalidConfig(format!(
            "invalid language code: {language} (expected xx-XX)"
        )))
    }
}
