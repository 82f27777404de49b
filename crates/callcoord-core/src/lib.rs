//! Core types and error definitions for the call session coordinator.
//!
//! This crate provides the foundational types shared across all `callcoord`
//! crates: the error taxonomy, agent configuration records, conversation
//! messages, durable call records and the retry policy used by every
//! component that talks to an external system.
//!
//! # Main types
//!
//! - [`CoordError`]: Unified error enum for all coordinator subsystems.
//! - [`CoordResult`]: Convenience alias for `Result<T, CoordError>`.
//! - [`AgentConfig`]: Configuration of a voice agent, snapshotted per call.
//! - [`ConversationMessage`]: A single utterance within a call.
//! - [`CallRecord`]: The durable projection of a call and its outcome.
//! - [`RetryPolicy`]: Bounded exponential backoff settings.

pub mod agent;
pub mod call;
pub mod error;
pub mod message;
pub mod retry;

pub use agent::{AgentConfig, AgentStatus, DataCollectionField, FewShotExample};
pub use call::{
    agent_recipient_prefix, AnsweredBy, CallKey, CallRecord, CallStatus, CollectedData,
    TerminationReason,
};
pub use error::{CoordError, CoordResult};
pub use message::{ConversationMessage, RecordingRef, Role};
pub use retry::RetryPolicy;
