use crate::session::PastCallSummary;
use async_trait::async_trait;
use callcoord_core::{AgentConfig, CollectedData, ConversationMessage, CoordResult};

/// Everything the response generator sees for one turn.
#[derive(Debug, Clone)]
pub struct ResponseContext<'a> {
    /// Call being served.
    pub call_id: &'a str,
    /// Agent config snapshot; `None` for recovered sessions.
    pub agent: Option<&'a AgentConfig>,
    /// What the caller just said.
    pub utterance: &'a str,
    /// Most recent committed messages, oldest first, ending with the utterance.
    pub recent_history: &'a [ConversationMessage],
    /// Earlier calls with the same recipient.
    pub past_calls: &'a [PastCallSummary],
    /// Required fields with no value yet.
    pub missing_fields: Vec<String>,
    /// Fields already collected.
    pub data_collected: &'a CollectedData,
}

/// Output of the response generator for one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedReply {
    /// What the agent says next.
    pub text: String,
    /// Field values extracted from the utterance, if any.
    pub extracted: CollectedData,
}

impl GeneratedReply {
    /// A reply with no extracted fields.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            extracted: CollectedData::new(),
        }
    }
}

/// Produces the agent's reply to a caller utterance.
///
/// Prompt construction and model choice live behind this trait.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate the next assistant message.
    async fn generate(&self, context: &ResponseContext<'_>) -> CoordResult<GeneratedReply>;
}
