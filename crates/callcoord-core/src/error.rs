use thiserror::Error;

/// A convenience `Result` alias using [`CoordError`].
pub type CoordResult<T> = Result<T, CoordError>;

/// Top-level error type for the call session coordinator.
///
/// Variants follow the failure taxonomy of the coordinator: some are surfaced
/// to the caller (`NotFound`, `InvalidConfig`, `SessionNotFound`), others are
/// only ever logged by the component that produced them (`Sync`, `Archival`).
#[derive(Error, Debug)]
pub enum CoordError {
    /// An agent or call record is absent, or the agent is not servable.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A stored agent record failed schema validation.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// A durable store failure that may succeed on retry.
    #[error("Transient store failure: {0}")]
    TransientStore(String),

    /// A durable store failure that will not succeed on retry.
    #[error("Store error: {0}")]
    Store(String),

    /// A conditional write was rejected (create-if-absent / update-if-exists).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A conversation flush could not be written.
    #[error("Sync failure: {0}")]
    Sync(String),

    /// A recording could not be archived.
    #[error("Archival failure: {0}")]
    Archival(String),

    /// No live session and no call record to recover it from.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// An external operation exceeded its request timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The response generator failed to produce a reply.
    #[error("Generator error: {0}")]
    Generator(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error in coordinator configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoordError {
    /// Whether the operation that produced this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordError::TransientStore(_) | CoordError::Timeout(_))
    }
}
