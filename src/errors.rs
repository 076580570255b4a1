//! Error types shared across the crate.

/// Error type for socket operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The event name collides with one of the reserved lifecycle events
    /// (`connect`, `disconnect`, `disconnecting`, `error`, `newListener`,
    /// `removeListener`) and cannot be emitted.
    #[error("\"{0}\" is a reserved event name")]
    ReservedEventName(String),
}

/// An error surfaced by the engine transport, or synthesized by the manager
/// when a connect attempt times out.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The connect attempt did not complete within the configured timeout.
    #[error("timeout")]
    Timeout,

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}
