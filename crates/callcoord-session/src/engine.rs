use crate::completeness::{missing_required_fields, Completeness};
use crate::generator::{ResponseContext, ResponseGenerator};
use crate::goodbye::is_goodbye;
use crate::session::Session;
use crate::sync::SyncEngine;
use callcoord_core::{ConversationMessage, RecordingRef, TerminationReason};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Recognition confidence below which an utterance counts as unclear.
pub const CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Consecutive empty utterances that end the call.
pub const MAX_NO_INPUT: u32 = 3;

/// Consecutive unclear utterances that trigger a repeat request.
pub const LOW_CONFIDENCE_LIMIT: u32 = 2;

/// Messages of recent history handed to the response generator.
pub const CONTEXT_WINDOW: usize = 10;

/// One caller utterance as delivered by the speech transcript source.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnInput {
    /// Transcribed text; empty when nothing was heard.
    pub utterance: String,
    /// Recognition confidence in `[0, 1]`.
    pub confidence: f32,
    /// Provider recording of the utterance.
    pub recording: Option<RecordingRef>,
}

impl TurnInput {
    /// An utterance without a recording reference.
    pub fn new(utterance: impl Into<String>, confidence: f32) -> Self {
        Self {
            utterance: utterance.into(),
            confidence,
            recording: None,
        }
    }

    /// Nothing was heard.
    pub fn silence() -> Self {
        Self::new("", 0.0)
    }
}

/// Tone of a re-prompt after an empty utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeKind {
    /// First miss: ask the caller to speak up.
    Encouraging,
    /// Later misses: ask the caller to speak more clearly.
    Clarifying,
}

/// Which closing line the call ends with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosingKind {
    /// The caller said goodbye.
    Farewell,
    /// Timed out with nothing left to collect.
    Courtesy,
    /// Timed out with required data still missing.
    Apologetic,
    /// Processing failed.
    Error,
}

/// What a turn did to the session, for the layer that renders speech.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Nothing was heard; prompt again.
    PromptRetry {
        /// How to phrase the re-prompt.
        nudge: NudgeKind,
    },
    /// The caller was repeatedly unclear; ask them to repeat. Nothing was committed.
    AskToRepeat,
    /// The conversation continues with this reply.
    Reply {
        /// Assistant text to speak.
        text: String,
        /// Whether every required field is now collected.
        data_complete: bool,
    },
    /// This turn ended the call.
    Terminated {
        /// Why the call ended.
        reason: TerminationReason,
        /// Which closing line to use.
        closing: ClosingKind,
    },
    /// The call had already ended; the turn was ignored.
    Closed {
        /// Why the call ended earlier.
        reason: TerminationReason,
    },
}

impl TurnOutcome {
    /// Whether the call should be hung up after this turn.
    pub fn ends_call(&self) -> bool {
        matches!(
            self,
            TurnOutcome::Terminated { .. } | TurnOutcome::Closed { .. }
        )
    }
}

/// Applies caller utterances to sessions.
///
/// Callers hold the session's registry guard for the whole of
/// [`handle_turn`](Self::handle_turn); the engine never touches another session.
#[derive(Clone)]
pub struct TurnEngine {
    generator: Arc<dyn ResponseGenerator>,
    sync: SyncEngine,
}

impl TurnEngine {
    /// Build an engine around a response generator and a sync engine.
    pub fn new(generator: Arc<dyn ResponseGenerator>, sync: SyncEngine) -> Self {
        Self { generator, sync }
    }

    /// The sync engine used for periodic and forced flushes.
    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    /// Process one utterance.
    pub async fn handle_turn(&self, session: &mut Session, input: TurnInput) -> TurnOutcome {
        if let Some(reason) = session.termination() {
            debug!(call_id = %session.call_id(), %reason, "Turn on terminated session ignored");
            return TurnOutcome::Closed { reason };
        }
        session.activate();

        let utterance = input.utterance.trim();
        if utterance.is_empty() {
            return self.handle_silence(session);
        }
        session.reset_no_input();

        if input.confidence < CONFIDENCE_THRESHOLD {
            let unclear = session.bump_low_confidence();
            warn!(
                call_id = %session.call_id(),
                confidence = input.confidence,
                unclear,
                "Low recognition confidence"
            );
            if unclear >= LOW_CONFIDENCE_LIMIT {
                session.reset_low_confidence();
                return TurnOutcome::AskToRepeat;
            }
        } else {
            session.reset_low_confidence();
        }

        if is_goodbye(utterance) {
            info!(call_id = %session.call_id(), "Goodbye intent detected");
            session.terminate(TerminationReason::User);
            self.sync.maybe_sync(session, true).await;
            return TurnOutcome::Terminated {
                reason: TerminationReason::User,
                closing: ClosingKind::Farewell,
            };
        }

        self.converse(session, utterance, input.confidence, input.recording)
            .await
    }

    fn handle_silence(&self, session: &mut Session) -> TurnOutcome {
        let misses = session.bump_no_input();
        if misses < MAX_NO_INPUT {
            debug!(call_id = %session.call_id(), misses, "No input");
            let nudge = if misses == 1 {
                NudgeKind::Encouraging
            } else {
                NudgeKind::Clarifying
            };
            return TurnOutcome::PromptRetry { nudge };
        }

        let completeness = match session.agent() {
            Some(agent) => Completeness::evaluate(agent, session.data_collected()),
            None => Completeness::NotApplicable,
        };
        info!(
            call_id = %session.call_id(),
            misses,
            ?completeness,
            "System timeout after repeated silence"
        );
        session.terminate(TerminationReason::SystemTimeout);
        let closing = if completeness.allows_courtesy_close() {
            ClosingKind::Courtesy
        } else {
            ClosingKind::Apologetic
        };
        TurnOutcome::Terminated {
            reason: TerminationReason::SystemTimeout,
            closing,
        }
    }

    async fn converse(
        &self,
        session: &mut Session,
        utterance: &str,
        confidence: f32,
        recording: Option<RecordingRef>,
    ) -> TurnOutcome {
        session.push_message(ConversationMessage::user(utterance, confidence, recording));

        let missing_fields = session
            .agent()
            .map(|agent| missing_required_fields(agent, session.data_collected()))
            .unwrap_or_default();
        let context = ResponseContext {
            call_id: session.call_id(),
            agent: session.agent(),
            utterance,
            recent_history: session.recent_history(CONTEXT_WINDOW),
            past_calls: session.past_calls(),
            missing_fields,
            data_collected: session.data_collected(),
        };

        let reply = match self.generator.generate(&context).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(call_id = %session.call_id(), error = %e, "Response generation failed");
                session.terminate(TerminationReason::Error);
                return TurnOutcome::Terminated {
                    reason: TerminationReason::Error,
                    closing: ClosingKind::Error,
                };
            }
        };

        session.push_message(ConversationMessage::assistant(reply.text.clone()));
        for (field, value) in reply.extracted {
            if session.record_field(field.clone(), value) {
                debug!(call_id = %session.call_id(), field = %field, "Collected field");
            }
        }

        let data_complete = match session.agent() {
            Some(agent) => {
                Completeness::evaluate(agent, session.data_collected()) == Completeness::Complete
            }
            None => false,
        };
        if data_complete && session.mark_data_complete() {
            info!(call_id = %session.call_id(), "Data collection complete");
        }

        self.sync.maybe_sync(session, false).await;

        TurnOutcome::Reply {
            text: reply.text,
            data_complete,
        }
    }
}
