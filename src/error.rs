//! Error types for the voice booking gateway.

/// Top-level error type for the session engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Audio decode/resample error (malformed frame, unsupported rate).
    #[error("audio error: {0}")]
    Audio(String),

    /// Bridge WebSocket protocol error (malformed envelope, unexpected frame).
    #[error("bridge protocol error: {0}")]
    Bridge(String),

    /// Upstream Realtime API error (fatal to the call).
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Dispatch webhook unreachable or returned a non-success status.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Persistence store error. Always non-fatal to the dialog.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Session engine coordination error (channel closed, timer bookkeeping).
    #[error("session error: {0}")]
    Session(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, GatewayError>;
