//! Live-call state for the call session coordinator.
//!
//! - [`AgentConfigCache`]: TTL-bounded read-through cache of agent configs,
//!   plus the administrative writes that must invalidate it.
//! - [`Session`]: in-memory state of one live call.
//! - [`SessionRegistry`]: owns every live session behind a per-call lock and
//!   rebuilds sessions from the durable store after a restart.
//! - [`TurnEngine`]: applies one caller utterance to a session.
//! - [`SyncEngine`]: periodic and forced flushes to the durable store.

pub mod cache;
pub mod completeness;
pub mod engine;
pub mod generator;
pub mod goodbye;
pub mod registry;
pub mod session;
pub mod sync;

pub use cache::{default_agent_config, AgentConfigCache};
pub use completeness::{is_complete, missing_required_fields, Completeness};
pub use engine::{ClosingKind, NudgeKind, TurnEngine, TurnInput, TurnOutcome};
pub use generator::{GeneratedReply, ResponseContext, ResponseGenerator};
pub use goodbye::is_goodbye;
pub use registry::{SessionGuard, SessionRegistry};
pub use session::{PastCallSummary, Session, SessionState};
pub use sync::{CallEnd, SyncEngine, DEFAULT_SYNC_FREQUENCY};
