//! Error types for the keepsake session engine.

/// Top-level error type for the live session engine and memory vault.
///
/// Propagation policy: audio-path errors (`TransportSend`, `Decode`) are
/// contained locally and never escalate to session teardown. Only
/// transport-level close/error and explicit disconnect terminate a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Device or transport acquisition/handshake failure. Fatal to the
    /// connect attempt, fully recoverable by retrying connect.
    #[error("connection error: {0}")]
    Connection(String),

    /// Per-frame outbound send failure. Logged and dropped, non-fatal.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Malformed inbound audio frame or tool payload. The frame is dropped,
    /// non-fatal.
    #[error("decode error: {0}")]
    Decode(String),

    /// Memory vault storage read/write failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SessionError>;
