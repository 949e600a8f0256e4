use thiserror::Error;

/// Failure classes surfaced at the engine's component seams.
///
/// Composition code (orchestrator, HTTP handlers) wraps these with
/// `anyhow::Context`; the variants exist so callers can distinguish
/// a denied microphone from a dropped connection.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Microphone or screen access was denied. Surfaced immediately,
    /// never retried here.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The capture device or stream failed.
    #[error("capture failed: {0}")]
    Capture(String),

    /// The duplex connection could not be established or dropped.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A single inbound frame could not be parsed. Callers log and drop
    /// the frame; one bad frame must not kill a live conversation.
    #[error("malformed frame: {0}")]
    Protocol(String),

    /// The audio output device or sink failed.
    #[error("playback failure: {0}")]
    Playback(String),
}
