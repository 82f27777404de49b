use callcoord_core::{
    AgentConfig, CallKey, CallRecord, CallStatus, CollectedData, ConversationMessage,
    TerminationReason,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a live call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Loaded, not yet accepting turns.
    Created,
    /// Accepting turns.
    Active,
    /// Ended; only the final flush may still touch the session.
    Terminated,
}

/// What the response generator is told about an earlier call with the same recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PastCallSummary {
    /// Provider call identifier.
    pub call_id: String,
    /// When that call started.
    pub started_at: DateTime<Utc>,
    /// Final telephony status.
    pub status: CallStatus,
    /// How it ended, if it was finalised.
    pub ended_by: Option<TerminationReason>,
    /// Data collected during that call.
    pub data_collected: CollectedData,
    /// Number of messages exchanged.
    pub message_count: usize,
}

impl From<&CallRecord> for PastCallSummary {
    fn from(record: &CallRecord) -> Self {
        Self {
            call_id: record.call_id.clone(),
            started_at: record.started_at,
            status: record.status,
            ended_by: record.ended_by,
            data_collected: record.data_collected.clone(),
            message_count: record.conversation_history.len(),
        }
    }
}

/// In-memory state of one live call.
///
/// Counters only move forward, and the termination reason is written once.
/// Sessions are owned by the [`SessionRegistry`](crate::SessionRegistry) and
/// mutated only through its per-call guard.
#[derive(Debug, Clone)]
pub struct Session {
    call_id: String,
    agent_id: String,
    agent: Option<AgentConfig>,
    recipient_phone: String,
    caller_phone: String,
    history: Vec<ConversationMessage>,
    data_collected: CollectedData,
    turn_counter: u64,
    last_synced_turn_counter: u64,
    no_input_count: u32,
    low_confidence_count: u32,
    termination: Option<TerminationReason>,
    state: SessionState,
    started_at: DateTime<Utc>,
    past_calls: Vec<PastCallSummary>,
    recovered: bool,
    data_complete_announced: bool,
    finalized: bool,
}

impl Session {
    /// A freshly answered call, holding a snapshot of its agent config.
    pub fn new(
        call_id: impl Into<String>,
        agent: AgentConfig,
        recipient_phone: impl Into<String>,
        caller_phone: impl Into<String>,
        past_calls: Vec<PastCallSummary>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            agent_id: agent.agent_id.clone(),
            agent: Some(agent),
            recipient_phone: recipient_phone.into(),
            caller_phone: caller_phone.into(),
            history: Vec::new(),
            data_collected: CollectedData::new(),
            turn_counter: 0,
            last_synced_turn_counter: 0,
            no_input_count: 0,
            low_confidence_count: 0,
            termination: None,
            state: SessionState::Created,
            started_at: Utc::now(),
            past_calls,
            recovered: false,
            data_complete_announced: false,
            finalized: false,
        }
    }

    /// Rebuild a degraded session from its durable record.
    ///
    /// History, collected data, endpoints and agent id come back; the agent
    /// config and past-call summaries do not. Everything restored counts as
    /// already synced. A record that was already finalized comes back
    /// terminated and finalized.
    pub fn recover(record: &CallRecord) -> Self {
        let restored = record.conversation_history.len() as u64;
        let ended = record.status.is_terminal();
        let termination = ended.then(|| record.ended_by.unwrap_or(TerminationReason::Unknown));
        Self {
            call_id: record.call_id.clone(),
            agent_id: record.agent_id.clone(),
            agent: None,
            recipient_phone: record.recipient_phone.clone(),
            caller_phone: record.caller_phone.clone(),
            history: record.conversation_history.clone(),
            data_collected: record.data_collected.clone(),
            turn_counter: restored,
            last_synced_turn_counter: restored,
            no_input_count: 0,
            low_confidence_count: 0,
            termination,
            state: if ended {
                SessionState::Terminated
            } else {
                SessionState::Active
            },
            started_at: record.started_at,
            past_calls: Vec::new(),
            recovered: true,
            data_complete_announced: false,
            finalized: ended,
        }
    }

    /// Move from `Created` to `Active`. No-op in any other state.
    pub fn activate(&mut self) {
        if self.state == SessionState::Created {
            self.state = SessionState::Active;
        }
    }

    /// Record why the session ended. Returns `false` if it had already ended.
    pub fn terminate(&mut self, reason: TerminationReason) -> bool {
        if self.termination.is_some() {
            return false;
        }
        self.termination = Some(reason);
        self.state = SessionState::Terminated;
        true
    }

    pub(crate) fn push_message(&mut self, message: ConversationMessage) {
        self.history.push(message);
        self.turn_counter += 1;
    }

    /// Record an extracted value unless the field already has one.
    pub(crate) fn record_field(&mut self, name: String, value: Value) -> bool {
        if self.data_collected.contains_key(&name) {
            return false;
        }
        self.data_collected.insert(name, value);
        true
    }

    pub(crate) fn bump_no_input(&mut self) -> u32 {
        self.no_input_count += 1;
        self.no_input_count
    }

    pub(crate) fn reset_no_input(&mut self) {
        self.no_input_count = 0;
    }

    pub(crate) fn bump_low_confidence(&mut self) -> u32 {
        self.low_confidence_count += 1;
        self.low_confidence_count
    }

    pub(crate) fn reset_low_confidence(&mut self) {
        self.low_confidence_count = 0;
    }

    pub(crate) fn mark_synced(&mut self, at: u64) {
        self.last_synced_turn_counter = at.min(self.turn_counter);
    }

    pub(crate) fn mark_data_complete(&mut self) -> bool {
        !std::mem::replace(&mut self.data_complete_announced, true)
    }

    pub(crate) fn mark_finalized(&mut self) -> bool {
        !std::mem::replace(&mut self.finalized, true)
    }

    /// Provider call identifier.
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Agent serving the call.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Composite durable key of the call record.
    pub fn key(&self) -> CallKey {
        CallKey::new(&self.agent_id, &self.call_id)
    }

    /// Agent config snapshot; `None` for recovered sessions.
    pub fn agent(&self) -> Option<&AgentConfig> {
        self.agent.as_ref()
    }

    /// Number that was called.
    pub fn recipient_phone(&self) -> &str {
        &self.recipient_phone
    }

    /// Number the call came from.
    pub fn caller_phone(&self) -> &str {
        &self.caller_phone
    }

    /// Committed conversation, oldest first.
    pub fn history(&self) -> &[ConversationMessage] {
        &self.history
    }

    /// The last `n` committed messages.
    pub fn recent_history(&self, n: usize) -> &[ConversationMessage] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// Fields collected so far.
    pub fn data_collected(&self) -> &CollectedData {
        &self.data_collected
    }

    /// Messages committed to the session, restored ones included.
    pub fn turn_counter(&self) -> u64 {
        self.turn_counter
    }

    /// Value of `turn_counter` at the last successful flush.
    pub fn last_synced_turn_counter(&self) -> u64 {
        self.last_synced_turn_counter
    }

    /// Messages not yet flushed.
    pub fn pending_turns(&self) -> u64 {
        self.turn_counter - self.last_synced_turn_counter
    }

    /// Consecutive empty utterances.
    pub fn no_input_count(&self) -> u32 {
        self.no_input_count
    }

    /// Consecutive low-confidence utterances since the last repeat request.
    pub fn low_confidence_count(&self) -> u32 {
        self.low_confidence_count
    }

    /// Why the call ended, once it has.
    pub fn termination(&self) -> Option<TerminationReason> {
        self.termination
    }

    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session has ended.
    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// When the session was created, or when the recovered call started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Earlier calls with the same recipient, most recent first.
    pub fn past_calls(&self) -> &[PastCallSummary] {
        &self.past_calls
    }

    /// Whether this session was rebuilt from the durable store.
    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    /// Whether data collection was ever observed complete.
    pub fn data_complete_announced(&self) -> bool {
        self.data_complete_announced
    }

    /// Whether the final flush has been attempted.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            "CA1",
            AgentConfig::new("a1", "Intake", "p"),
            "+15551230000",
            "+15550000000",
            Vec::new(),
        )
    }

    #[test]
    fn termination_reason_is_set_once() {
        let mut s = session();
        s.activate();
        assert!(s.terminate(TerminationReason::User));
        assert!(!s.terminate(TerminationReason::SystemTimeout));
        assert_eq!(s.termination(), Some(TerminationReason::User));
        assert_eq!(s.state(), SessionState::Terminated);
        s.activate();
        assert_eq!(s.state(), SessionState::Terminated);
    }

    #[test]
    fn synced_counter_never_passes_turn_counter() {
        let mut s = session();
        s.push_message(ConversationMessage::assistant("hi"));
        s.mark_synced(10);
        assert_eq!(s.last_synced_turn_counter(), 1);
        assert_eq!(s.pending_turns(), 0);
    }

    #[test]
    fn first_extracted_value_wins() {
        let mut s = session();
        assert!(s.record_field("name".into(), Value::from("Jane")));
        assert!(!s.record_field("name".into(), Value::from("John")));
        assert_eq!(s.data_collected()["name"], "Jane");
    }

    #[test]
    fn recovered_session_counts_history_as_synced() {
        let mut record = CallRecord::new("CA1", "a1", "+1555", "+1666", CallStatus::InProgress);
        record.conversation_history = vec![
            ConversationMessage::assistant("Hello"),
            ConversationMessage::user("Hi", 0.9, None),
        ];
        let s = Session::recover(&record);
        assert!(s.is_recovered());
        assert!(s.agent().is_none());
        assert_eq!(s.turn_counter(), 2);
        assert_eq!(s.pending_turns(), 0);
        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(s.started_at(), record.started_at);
    }

    #[test]
    fn recovered_ended_call_stays_closed() {
        let mut record = CallRecord::new("CA1", "a1", "+1555", "+1666", CallStatus::Completed);
        record.ended_by = Some(TerminationReason::User);
        let s = Session::recover(&record);
        assert_eq!(s.state(), SessionState::Terminated);
        assert_eq!(s.termination(), Some(TerminationReason::User));
        assert!(s.is_finalized());

        record.ended_by = None;
        assert_eq!(
            Session::recover(&record).termination(),
            Some(TerminationReason::Unknown)
        );
    }

    #[test]
    fn recent_history_clamps() {
        let mut s = session();
        for i in 0..3 {
            s.push_message(ConversationMessage::assistant(format!("m{i}")));
        }
        assert_eq!(s.recent_history(10).len(), 3);
        assert_eq!(s.recent_history(2)[0].content, "m1");
    }

    #[test]
    fn past_call_summary_from_record() {
        let mut record = CallRecord::new("CA0", "a1", "+1555", "+1666", CallStatus::Completed);
        record.data_collected.insert("email".into(), Value::from("j@x.io"));
        record.conversation_history.push(ConversationMessage::assistant("Hello"));
        let summary = PastCallSummary::from(&record);
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.data_collected["email"], "j@x.io");
    }
}
