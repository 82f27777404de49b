//! Durable store adapter for the call session coordinator.
//!
//! Two layers live here:
//!
//! - [`RecordStore`]: a narrow key-value interface over raw JSON items with
//!   conditional writes and simple range queries. [`MemoryRecordStore`] and
//!   [`FileRecordStore`] implement it.
//! - [`DurableStore`]: the typed adapter the rest of the system talks to. It
//!   retries transient failures, bounds every request with a timeout, and runs
//!   every stored item through the [`codec`] translation layer so that only
//!   validated entities leave this crate.

pub mod adapter;
pub mod codec;
pub mod file;
pub mod memory;
pub mod record;

pub use adapter::{AgentUpdate, CallFinalization, DurableStore};
pub use codec::DecodeError;
pub use file::FileRecordStore;
pub use memory::MemoryRecordStore;
pub use record::{Filter, Item, ItemKey, PutCondition, Query, RecordStore, Table, UpdateCondition};
