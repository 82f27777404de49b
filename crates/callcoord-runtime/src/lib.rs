//! Composition root of the call session coordinator.
//!
//! [`CallCoordinator`] drives a call from start to finish:
//!
//! 1. [`start_call`](CallCoordinator::start_call) resolves the agent config
//!    (falling back to the default agent when allowed), loads past
//!    conversations, persists the call record and registers a live session.
//! 2. [`handle_turn`](CallCoordinator::handle_turn) applies each utterance
//!    under the call's lock.
//! 3. [`handle_status`](CallCoordinator::handle_status) ends the call on a
//!    terminal telephony status: the recording is archived, the final
//!    record written once, and the session retired.
//!
//! Configuration is read from TOML into [`CoordinatorConfig`]; logging is
//! installed with [`telemetry::init`].

pub mod config;
pub mod coordinator;
pub mod telemetry;

pub use config::{
    ArchivalSettings, BlobBackend, CacheSettings, CoordinatorConfig, LoggingSettings,
    SessionSettings, StoreBackend, StoreSettings,
};
pub use coordinator::{CallCoordinator, CallStarted, CallSummary, StartCall, StatusCallback};
pub use telemetry::LogFormat;
