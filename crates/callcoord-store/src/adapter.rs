use crate::codec::{self, encode_timestamp};
use crate::record::{Item, ItemKey, PutCondition, Query, RecordStore, Table, UpdateCondition};
use callcoord_core::agent::{validate_language, validate_voice};
use callcoord_core::{
    agent_recipient_prefix, AgentConfig, AgentStatus, AnsweredBy, CallKey, CallRecord,
    CallStatus, CollectedData, ConversationMessage, CoordError, CoordResult, DataCollectionField,
    FewShotExample, RecordingRef, RetryPolicy, TerminationReason,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Partial update of an agent record. `None` leaves the attribute untouched.
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub voice: Option<String>,
    pub language: Option<String>,
    pub greeting: Option<String>,
    pub status: Option<AgentStatus>,
    pub data_to_fill: Option<BTreeMap<String, DataCollectionField>>,
    pub few_shot: Option<Vec<FewShotExample>>,
}

impl AgentUpdate {
    /// An update that only changes the status.
    pub fn status(status: AgentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// True when no attribute would change.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.prompt.is_none()
            && self.voice.is_none()
            && self.language.is_none()
            && self.greeting.is_none()
            && self.status.is_none()
            && self.data_to_fill.is_none()
            && self.few_shot.is_none()
    }

    fn into_item(self, now: DateTime<Utc>) -> CoordResult<Item> {
        if let Some(voice) = &self.voice {
            validate_voice(voice)?;
        }
        if let Some(language) = &self.language {
            validate_language(language)?;
        }
        let mut item = Item::new();
        if let Some(v) = self.name {
            item.insert("name".into(), json!(v));
        }
        if let Some(v) = self.prompt {
            item.insert("prompt".into(), json!(v));
        }
        if let Some(v) = self.voice {
            item.insert("voice".into(), json!(v));
        }
        if let Some(v) = self.language {
            item.insert("language".into(), json!(v));
        }
        if let Some(v) = self.greeting {
            item.insert("greeting".into(), json!(v));
        }
        if let Some(v) = self.status {
            item.insert("status".into(), json!(v.as_str()));
        }
        if let Some(fields) = self.data_to_fill {
            let encoded = fields
                .iter()
                .map(|(name, f)| (name.clone(), codec::encode_field(f)))
                .collect();
            item.insert("data_to_fill".into(), Value::Object(encoded));
        }
        if let Some(examples) = self.few_shot {
            let encoded = examples
                .iter()
                .map(|ex| json!({ "user": ex.user, "assistant": ex.assistant }))
                .collect();
            item.insert("few_shot".into(), Value::Array(encoded));
        }
        item.insert("updated_at".into(), encode_timestamp(&now));
        Ok(item)
    }
}

/// Everything written when a call is finalised.
#[derive(Debug, Clone)]
pub struct CallFinalization {
    /// Terminal status.
    pub status: CallStatus,
    /// When the call ended.
    pub ended_at: DateTime<Utc>,
    /// Provider-reported or computed duration.
    pub duration_seconds: Option<u64>,
    /// Who or what ended the call.
    pub ended_by: TerminationReason,
    /// Full transcript.
    pub conversation_history: Vec<ConversationMessage>,
    /// Fields collected during the call.
    pub data_collected: CollectedData,
    /// Provider-hosted recording.
    pub call_recording: Option<RecordingRef>,
    /// Durable copy in the blob store, when archival succeeded.
    pub archived_recording_url: Option<String>,
    /// Answering-machine detection result.
    pub answered_by: Option<AnsweredBy>,
}

impl CallFinalization {
    fn into_item(self) -> Item {
        let mut item = Item::new();
        item.insert("status".into(), json!(self.status.as_str()));
        item.insert("ended_at".into(), encode_timestamp(&self.ended_at));
        item.insert("ended_by".into(), json!(self.ended_by.as_str()));
        item.insert(
            "conversation_history".into(),
            codec::encode_history(&self.conversation_history),
        );
        item.insert(
            "data_collected".into(),
            codec::encode_collected(&self.data_collected),
        );
        if let Some(duration) = self.duration_seconds {
            item.insert("duration_seconds".into(), json!(duration));
        }
        if let Some(rec) = self.call_recording {
            item.insert("call_recording_url".into(), json!(rec.url));
            if let Some(sid) = rec.sid {
                item.insert("call_recording_sid".into(), json!(sid));
            }
        }
        if let Some(url) = self.archived_recording_url {
            item.insert("archived_recording_url".into(), json!(url));
        }
        if let Some(answered_by) = self.answered_by {
            item.insert("answered_by".into(), json!(answered_by.as_str()));
        }
        item
    }
}

fn call_key(key: &CallKey) -> ItemKey {
    ItemKey::composite(&key.agent_id, &key.call_id)
}

/// Typed access to agent configs and call records.
///
/// Every request is bounded by `request_timeout`; transient failures and
/// timeouts are retried according to the [`RetryPolicy`], everything else is
/// surfaced immediately.
#[derive(Clone)]
pub struct DurableStore {
    records: Arc<dyn RecordStore>,
    policy: RetryPolicy,
    request_timeout: Duration,
}

impl DurableStore {
    /// Wraps a record backend with the given retry policy and per-request timeout.
    pub fn new(records: Arc<dyn RecordStore>, policy: RetryPolicy, request_timeout: Duration) -> Self {
        Self {
            records,
            policy,
            request_timeout,
        }
    }

    /// Raw item access, for callers that need an attribute the typed API does not expose.
    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut f: F) -> CoordResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoordResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.request_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(CoordError::Timeout(format!(
                    "{op} exceeded {}ms",
                    self.request_timeout.as_millis()
                ))),
            };
            match result {
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient store failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    // --- Agents ---

    /// Fetch and decode an agent record. Decode failures surface as `InvalidConfig`.
    pub async fn get_agent(&self, agent_id: &str) -> CoordResult<Option<AgentConfig>> {
        let key = ItemKey::simple(agent_id);
        let item = self
            .with_retry("get_agent", || self.records.get(Table::Agents, &key))
            .await?;
        item.map(|item| {
            codec::decode_agent(&item).map_err(|e| {
                CoordError::InvalidConfig(format!("agent {agent_id}: {e}"))
            })
        })
        .transpose()
    }

    /// Provision a new agent. Fails with `Conflict` if the id is taken.
    pub async fn create_agent(&self, agent: &AgentConfig) -> CoordResult<()> {
        agent.validate()?;
        let key = ItemKey::simple(&agent.agent_id);
        let item = codec::encode_agent(agent);
        self.with_retry("create_agent", || {
            self.records
                .put(Table::Agents, &key, item.clone(), PutCondition::IfAbsent)
        })
        .await?;
        info!(agent_id = %agent.agent_id, name = %agent.name, "Created agent");
        Ok(())
    }

    /// Apply an administrative update. Fails with `Conflict` if the agent does not exist.
    pub async fn update_agent(&self, agent_id: &str, update: AgentUpdate) -> CoordResult<()> {
        let key = ItemKey::simple(agent_id);
        let item = update.into_item(Utc::now())?;
        self.with_retry("update_agent", || {
            self.records
                .update(Table::Agents, &key, item.clone(), UpdateCondition::IfExists)
        })
        .await?;
        info!(agent_id, "Updated agent");
        Ok(())
    }

    /// Agents with the given status, most recently created first.
    pub async fn list_agents(&self, status: AgentStatus, limit: usize) -> CoordResult<Vec<AgentConfig>> {
        let query = Query::new()
            .eq("status", status.as_str())
            .newest_first("created_at")
            .limit(limit);
        let items = self
            .with_retry("list_agents", || self.records.query(Table::Agents, &query))
            .await?;
        items
            .iter()
            .map(|item| {
                codec::decode_agent(item)
                    .map_err(|e| CoordError::InvalidConfig(e.to_string()))
            })
            .collect()
    }

    /// Servable agents, most recently created first.
    pub async fn list_active_agents(&self, limit: usize) -> CoordResult<Vec<AgentConfig>> {
        self.list_agents(AgentStatus::Active, limit).await
    }

    // --- Calls ---

    /// Create the initial record of a call. Fails with `Conflict` if it already exists.
    pub async fn create_call_record(&self, record: &CallRecord) -> CoordResult<()> {
        let key = call_key(&record.key());
        let item = codec::encode_call(record);
        self.with_retry("create_call_record", || {
            self.records
                .put(Table::Calls, &key, item.clone(), PutCondition::IfAbsent)
        })
        .await?;
        info!(call_id = %record.call_id, agent_id = %record.agent_id, "Created call record");
        Ok(())
    }

    /// Periodic flush of the in-call conversation state.
    ///
    /// Only history and collected data are written; the call status is left
    /// to creation and finalisation.
    pub async fn sync_conversation(
        &self,
        key: &CallKey,
        history: &[ConversationMessage],
        data_collected: &CollectedData,
    ) -> CoordResult<()> {
        let mut updates = Item::new();
        updates.insert("conversation_history".into(), codec::encode_history(history));
        if !data_collected.is_empty() {
            updates.insert("data_collected".into(), codec::encode_collected(data_collected));
        }
        let item_key = call_key(key);
        self.with_retry("sync_conversation", || {
            self.records
                .update(Table::Calls, &item_key, updates.clone(), UpdateCondition::IfExists)
        })
        .await?;
        debug!(call_id = %key.call_id, messages = history.len(), "Synced conversation");
        Ok(())
    }

    /// Final write of a call's outcome.
    pub async fn finalize_call(&self, key: &CallKey, fin: CallFinalization) -> CoordResult<()> {
        let status = fin.status;
        let ended_by = fin.ended_by;
        let duration = fin.duration_seconds;
        let updates = fin.into_item();
        let item_key = call_key(key);
        self.with_retry("finalize_call", || {
            self.records
                .update(Table::Calls, &item_key, updates.clone(), UpdateCondition::IfExists)
        })
        .await?;
        info!(
            call_id = %key.call_id,
            status = %status,
            ended_by = %ended_by,
            duration_seconds = ?duration,
            "Finalized call"
        );
        Ok(())
    }

    /// Look a call up by its call id alone.
    pub async fn get_call_record(&self, call_id: &str) -> CoordResult<Option<CallRecord>> {
        let query = Query::new().eq("call_id", call_id).limit(1);
        let items = self
            .with_retry("get_call_record", || self.records.query(Table::Calls, &query))
            .await?;
        items.first().map(decode_call).transpose()
    }

    /// Previous calls between an agent and a recipient, most recent first.
    pub async fn past_conversations(
        &self,
        agent_id: &str,
        recipient_phone: &str,
        limit: usize,
    ) -> CoordResult<Vec<CallRecord>> {
        let query = Query::new()
            .eq("agent_id", agent_id)
            .begins_with(
                "agent_recipient_key",
                agent_recipient_prefix(agent_id, recipient_phone),
            )
            .newest_first("agent_recipient_key")
            .limit(limit);
        self.query_calls("past_conversations", query).await
    }

    /// Calls to one recipient across agents, most recent first.
    pub async fn calls_by_recipient(&self, recipient_phone: &str, limit: usize) -> CoordResult<Vec<CallRecord>> {
        let query = Query::new()
            .eq("recipient_phone", recipient_phone)
            .newest_first("started_at")
            .limit(limit);
        self.query_calls("calls_by_recipient", query).await
    }

    /// Calls in a given status, most recent first.
    pub async fn calls_by_status(&self, status: CallStatus, limit: usize) -> CoordResult<Vec<CallRecord>> {
        let query = Query::new()
            .eq("status", status.as_str())
            .newest_first("started_at")
            .limit(limit);
        self.query_calls("calls_by_status", query).await
    }

    async fn query_calls(&self, op: &'static str, query: Query) -> CoordResult<Vec<CallRecord>> {
        let items = self
            .with_retry(op, || self.records.query(Table::Calls, &query))
            .await?;
        items.iter().map(decode_call).collect()
    }
}

fn decode_call(item: &Item) -> CoordResult<CallRecord> {
    codec::decode_call(item).map_err(|e| CoordError::Store(format!("corrupt call record: {e}")))
}
