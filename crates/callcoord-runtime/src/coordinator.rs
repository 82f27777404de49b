use crate::config::{BlobBackend, CoordinatorConfig, StoreBackend};
use callcoord_archival::{
    decode_key, BlobStore, FileBlobStore, InMemoryBlobStore, Presigner, RecordingArchiver,
};
use callcoord_core::{
    AgentConfig, AnsweredBy, CallRecord, CallStatus, CollectedData, CoordError, CoordResult,
    RecordingRef, TerminationReason,
};
use callcoord_session::{
    default_agent_config, AgentConfigCache, CallEnd, PastCallSummary, ResponseGenerator, Session,
    SessionRegistry, SyncEngine, TurnEngine, TurnInput, TurnOutcome,
};
use callcoord_store::{DurableStore, FileRecordStore, MemoryRecordStore, RecordStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An inbound call to set up.
#[derive(Debug, Clone)]
pub struct StartCall {
    /// Provider call identifier.
    pub call_id: String,
    /// Agent requested for the call.
    pub agent_id: String,
    /// Number that was called.
    pub recipient_phone: String,
    /// Number the call came from.
    pub caller_phone: String,
}

/// What the call was set up with.
#[derive(Debug, Clone)]
pub struct CallStarted {
    /// Config the call is served with; the default agent if the requested one was unusable.
    pub agent: AgentConfig,
    /// Opening line to speak.
    pub greeting: String,
    /// Earlier calls between this agent and recipient loaded as context.
    pub past_calls: usize,
}

/// A telephony status callback.
#[derive(Debug, Clone)]
pub struct StatusCallback {
    /// Provider call identifier.
    pub call_id: String,
    /// Reported status.
    pub status: CallStatus,
    /// Call duration reported by the provider.
    pub duration_seconds: Option<u64>,
    /// Whole-call recording URL.
    pub recording_url: Option<String>,
    /// Whole-call recording identifier.
    pub recording_sid: Option<String>,
    /// Raw answering-machine detection value, e.g. `machine_end_beep`.
    pub answered_by: Option<String>,
}

impl StatusCallback {
    /// A callback carrying only a status.
    pub fn new(call_id: impl Into<String>, status: CallStatus) -> Self {
        Self {
            call_id: call_id.into(),
            status,
            duration_seconds: None,
            recording_url: None,
            recording_sid: None,
            answered_by: None,
        }
    }
}

/// Outcome of an ended call.
#[derive(Debug, Clone)]
pub struct CallSummary {
    /// Provider call identifier.
    pub call_id: String,
    /// Why the session ended.
    pub ended_by: TerminationReason,
    /// Whether the final write reached the durable store.
    pub finalized: bool,
    /// Blob URL of the archived recording.
    pub archived_recording_url: Option<String>,
    /// Messages in the conversation.
    pub message_count: usize,
    /// Data collected during the call.
    pub data_collected: CollectedData,
}

/// Wires config resolution, live sessions, turn processing, sync and
/// archival into the call lifecycle.
pub struct CallCoordinator {
    config: CoordinatorConfig,
    store: DurableStore,
    agents: AgentConfigCache,
    registry: SessionRegistry,
    engine: TurnEngine,
    archiver: Option<RecordingArchiver>,
}

impl CallCoordinator {
    /// Assemble a coordinator from already-built parts.
    pub fn new(
        config: CoordinatorConfig,
        store: DurableStore,
        generator: Arc<dyn ResponseGenerator>,
        archiver: Option<RecordingArchiver>,
    ) -> Self {
        let agents = AgentConfigCache::new(store.clone(), config.cache.agent_ttl());
        let registry = SessionRegistry::new(store.clone());
        let sync = SyncEngine::new(store.clone(), config.session.sync_frequency);
        let engine = TurnEngine::new(generator, sync);
        Self {
            config,
            store,
            agents,
            registry,
            engine,
            archiver,
        }
    }

    /// Validate `config` and build every backend it names.
    pub async fn from_config(
        config: CoordinatorConfig,
        generator: Arc<dyn ResponseGenerator>,
    ) -> CoordResult<Self> {
        config.validate()?;

        let records: Arc<dyn RecordStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryRecordStore::new()),
            StoreBackend::File => {
                Arc::new(FileRecordStore::new(config.store.data_dir.clone()).await?)
            }
        };
        let store = DurableStore::new(
            records,
            config.store.retry.clone(),
            config.store.request_timeout(),
        );

        let archiver = if config.archival.enabled {
            Some(build_archiver(&config).await?)
        } else {
            None
        };

        info!(
            store = ?config.store.backend,
            archival = config.archival.enabled,
            sync_frequency = config.session.sync_frequency,
            "Call coordinator ready"
        );
        Ok(Self::new(config, store, generator, archiver))
    }

    /// Agent configs and their administration.
    pub fn agents(&self) -> &AgentConfigCache {
        &self.agents
    }

    /// Live sessions.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// The durable store adapter.
    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    /// The recording archiver, when archival is enabled.
    pub fn archiver(&self) -> Option<&RecordingArchiver> {
        self.archiver.as_ref()
    }

    /// Settings in effect.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    async fn resolve_agent(&self, agent_id: &str) -> CoordResult<AgentConfig> {
        match self.agents.get(agent_id).await {
            Ok(agent) => Ok(agent),
            Err(e @ (CoordError::NotFound(_) | CoordError::InvalidConfig(_)))
                if self.config.session.fallback_to_default_agent =>
            {
                warn!(agent_id, error = %e, "Agent unusable, serving default agent");
                Ok(default_agent_config())
            }
            Err(e) => Err(e),
        }
    }

    async fn load_past_calls(&self, agent_id: &str, recipient_phone: &str) -> Vec<PastCallSummary> {
        let limit = self.config.session.past_conversation_limit;
        if limit == 0 {
            return Vec::new();
        }
        match self
            .store
            .past_conversations(agent_id, recipient_phone, limit)
            .await
        {
            Ok(records) => records.iter().map(PastCallSummary::from).collect(),
            Err(e) => {
                warn!(agent_id, error = %e, "Failed to load past conversations, continuing without");
                Vec::new()
            }
        }
    }

    /// Set up a new call: resolve its agent, load context, persist the call
    /// record and register a live session.
    pub async fn start_call(&self, request: StartCall) -> CoordResult<CallStarted> {
        let agent = self.resolve_agent(&request.agent_id).await?;
        let past_calls = self
            .load_past_calls(&agent.agent_id, &request.recipient_phone)
            .await;

        let record = CallRecord::new(
            &request.call_id,
            &agent.agent_id,
            &request.recipient_phone,
            &request.caller_phone,
            CallStatus::InProgress,
        );
        self.store.create_call_record(&record).await?;

        let past = past_calls.len();
        let session = Session::new(
            &request.call_id,
            agent.clone(),
            &request.recipient_phone,
            &request.caller_phone,
            past_calls,
        );
        let mut guard = self.registry.create(session).await?;
        guard.activate();

        info!(
            call_id = %request.call_id,
            agent_id = %agent.agent_id,
            past_calls = past,
            "Call started"
        );
        Ok(CallStarted {
            greeting: agent.greeting.clone(),
            agent,
            past_calls: past,
        })
    }

    /// Apply one caller utterance to the call's session.
    ///
    /// Fails with `SessionNotFound` when the call is neither live nor
    /// recoverable; the caller should end the call. A turn arriving after
    /// the call was finalized is answered with `Closed` and its recovered
    /// session retired.
    pub async fn handle_turn(&self, call_id: &str, input: TurnInput) -> CoordResult<TurnOutcome> {
        let mut guard = self.registry.get(call_id).await?;
        let outcome = self.engine.handle_turn(&mut guard, input).await;
        if guard.is_finalized() {
            debug!(call_id, "Late turn for a finalized call, retiring session");
            self.registry.remove_locked(guard);
        } else if outcome.ends_call() {
            debug!(call_id, ?outcome, "Turn ended the call");
        }
        Ok(outcome)
    }

    /// React to a telephony status callback. Terminal statuses end the call.
    pub async fn handle_status(&self, callback: StatusCallback) -> CoordResult<Option<CallSummary>> {
        if !callback.status.is_terminal() {
            debug!(call_id = %callback.call_id, status = %callback.status, "Call status update");
            return Ok(None);
        }
        self.end_call(callback).await.map(Some)
    }

    /// Archive the recording, write the final call record and retire the
    /// session.
    ///
    /// The session is removed even when archival or the final write fails.
    pub async fn end_call(&self, callback: StatusCallback) -> CoordResult<CallSummary> {
        let mut guard = self.registry.get(&callback.call_id).await?;
        let call_id = callback.call_id;

        let archived_recording_url = match (&self.archiver, &callback.recording_url) {
            (Some(archiver), Some(url)) if !guard.is_finalized() => {
                archiver.archive(url, &call_id).await
            }
            _ => None,
        };

        let end = CallEnd {
            status: callback.status,
            ended_at: Utc::now(),
            duration_seconds: callback.duration_seconds,
            call_recording: RecordingRef::from_parts(callback.recording_url, callback.recording_sid),
            archived_recording_url: archived_recording_url.clone(),
            answered_by: callback.answered_by.as_deref().map(AnsweredBy::classify),
        };
        let finalized = self.engine.sync().finalize(&mut guard, end).await;

        let summary = CallSummary {
            ended_by: guard.termination().unwrap_or(TerminationReason::Unknown),
            finalized,
            archived_recording_url,
            message_count: guard.history().len(),
            data_collected: guard.data_collected().clone(),
            call_id,
        };
        self.registry.remove_locked(guard);

        info!(
            call_id = %summary.call_id,
            ended_by = %summary.ended_by,
            finalized = summary.finalized,
            archived = summary.archived_recording_url.is_some(),
            messages = summary.message_count,
            "Call ended"
        );
        Ok(summary)
    }

    /// Expiring read URL for a call's archived recording.
    pub fn recording_url(&self, call_id: &str) -> CoordResult<String> {
        self.archiver
            .as_ref()
            .ok_or_else(|| CoordError::Config("recording archival is disabled".into()))?
            .presigned_url(call_id)
    }

    /// Flush every live session and delete spooled recordings.
    pub async fn shutdown(&self) {
        let call_ids = self.registry.call_ids();
        for call_id in &call_ids {
            match self.registry.get(call_id).await {
                Ok(mut guard) => {
                    self.engine.sync().maybe_sync(&mut guard, true).await;
                }
                Err(e) => debug!(call_id = %call_id, error = %e, "Session gone before shutdown flush"),
            }
        }
        if let Some(archiver) = &self.archiver {
            archiver.shutdown().await;
        }
        info!(live_sessions = call_ids.len(), "Call coordinator shut down");
    }
}

async fn build_archiver(config: &CoordinatorConfig) -> CoordResult<RecordingArchiver> {
    let archival = &config.archival;
    let secret = match &archival.presign_secret {
        Some(secret) => secret.as_bytes().to_vec(),
        None => {
            warn!("No presign secret configured, presigned URLs will not survive a restart");
            rand::random::<[u8; 32]>().to_vec()
        }
    };
    let presigner = Presigner::new(secret, &archival.presign_base_url)?;

    let blobs: Arc<dyn BlobStore> = match archival.blob_backend {
        BlobBackend::Memory => Arc::new(InMemoryBlobStore::new(&archival.bucket, presigner)),
        BlobBackend::File => {
            let encoded = archival.encryption_key.as_deref().ok_or_else(|| {
                CoordError::Config("archival.encryption_key is required for the file blob backend".into())
            })?;
            let key = decode_key(encoded)?;
            Arc::new(
                FileBlobStore::new(archival.blob_dir.clone(), &archival.bucket, &key, presigner)
                    .await?,
            )
        }
    };
    RecordingArchiver::new(archival.archiver_config(), blobs)
}
