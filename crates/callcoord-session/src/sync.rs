use crate::session::Session;
use callcoord_core::{AnsweredBy, CallStatus, CoordError, RecordingRef, TerminationReason};
use callcoord_store::{CallFinalization, DurableStore};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

/// Default number of unsynced messages that triggers a periodic flush.
pub const DEFAULT_SYNC_FREQUENCY: u64 = 5;

/// Outcome details known only when the telephony provider reports the call over.
#[derive(Debug, Clone)]
pub struct CallEnd {
    /// Terminal telephony status.
    pub status: CallStatus,
    /// When the call ended.
    pub ended_at: DateTime<Utc>,
    /// Duration reported by the provider; computed from the session start when absent.
    pub duration_seconds: Option<u64>,
    /// Provider-hosted recording of the whole call.
    pub call_recording: Option<RecordingRef>,
    /// Durable copy of the recording, if archival succeeded.
    pub archived_recording_url: Option<String>,
    /// Answering-machine detection result.
    pub answered_by: Option<AnsweredBy>,
}

impl CallEnd {
    /// A call that ended now with the given status and nothing else known.
    pub fn now(status: CallStatus) -> Self {
        Self {
            status,
            ended_at: Utc::now(),
            duration_seconds: None,
            call_recording: None,
            archived_recording_url: None,
            answered_by: None,
        }
    }
}

/// Flushes session state to the durable store.
///
/// Flushes are best-effort: failures are logged and reported as `false`,
/// in-memory state is left as it was, and the call carries on.
#[derive(Clone)]
pub struct SyncEngine {
    store: DurableStore,
    frequency: u64,
}

impl SyncEngine {
    /// `frequency` is the number of unsynced messages that triggers a flush; zero is treated as one.
    pub fn new(store: DurableStore, frequency: u64) -> Self {
        Self {
            store,
            frequency: frequency.max(1),
        }
    }

    /// Messages that must accumulate before a periodic flush.
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Write history and collected data if `force` or enough messages are pending.
    ///
    /// Returns whether a write happened and succeeded. A finalized session
    /// is never written again.
    pub async fn maybe_sync(&self, session: &mut Session, force: bool) -> bool {
        if session.is_finalized() {
            debug!(call_id = %session.call_id(), "Session finalized, sync skipped");
            return false;
        }
        let pending = session.pending_turns();
        if !force && pending < self.frequency {
            debug!(
                call_id = %session.call_id(),
                pending,
                frequency = self.frequency,
                "Sync threshold not met"
            );
            return false;
        }

        let at = session.turn_counter();
        match self
            .store
            .sync_conversation(&session.key(), session.history(), session.data_collected())
            .await
        {
            Ok(()) => {
                session.mark_synced(at);
                info!(call_id = %session.call_id(), messages = at, force, "Synced session");
                true
            }
            Err(e) => {
                let err = sync_failure(session, "sync", &e);
                warn!(
                    call_id = %session.call_id(),
                    pending,
                    error = %err,
                    "Session sync failed, continuing with in-memory state"
                );
                false
            }
        }
    }

    /// Final write of the call outcome. Attempted at most once per session.
    ///
    /// The termination reason defaults to `unknown` when the session never
    /// recorded one.
    pub async fn finalize(&self, session: &mut Session, end: CallEnd) -> bool {
        if !session.mark_finalized() {
            debug!(call_id = %session.call_id(), "Session already finalized");
            return false;
        }

        let ended_by = session.termination().unwrap_or(TerminationReason::Unknown);
        let duration_seconds = end.duration_seconds.or_else(|| {
            let elapsed = end.ended_at - session.started_at();
            u64::try_from(elapsed.num_seconds()).ok()
        });
        let at = session.turn_counter();
        let finalization = CallFinalization {
            status: end.status,
            ended_at: end.ended_at,
            duration_seconds,
            ended_by,
            conversation_history: session.history().to_vec(),
            data_collected: session.data_collected().clone(),
            call_recording: end.call_recording,
            archived_recording_url: end.archived_recording_url,
            answered_by: end.answered_by,
        };

        match self.store.finalize_call(&session.key(), finalization).await {
            Ok(()) => {
                session.mark_synced(at);
                true
            }
            Err(e) => {
                let err = sync_failure(session, "finalize", &e);
                error!(
                    call_id = %session.call_id(),
                    unsynced = session.pending_turns(),
                    error = %err,
                    "Failed to finalize call record"
                );
                false
            }
        }
    }
}

fn sync_failure(session: &Session, stage: &str, cause: &CoordError) -> CoordError {
    CoordError::Sync(format!(
        "{stage} of {} at message {}: {cause}",
        session.call_id(),
        session.turn_counter()
    ))
}
