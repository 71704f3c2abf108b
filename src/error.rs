//! Crate-wide error taxonomy.
//!
//! Framing/codec failures are handled entirely inside the connection loop
//! and never reach a handler, while handler failures are confined to
//! [`HandlerError`] and never get reinterpreted as a framing problem.

use thiserror::Error;

/// Errors raised while reading or writing a single frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("content_length must be >= 2, got {0}")]
    ContentLengthTooSmall(u64),

    #[error("unsupported protocol_version {0} (expected 22)")]
    UnsupportedVersion(u8),

    #[error("unsupported content_encoding {0} (expected 0 or 1)")]
    UnsupportedEncoding(u8),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while encoding or decoding a payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid compact payload: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("invalid compact payload: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("top-level payload must be a mapping")]
    NotAMapping,
}

/// Errors surfaced by the connection loop; each one maps to a specific
/// client-visible behavior (send an error reply, then close; or close
/// silently).
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("invalid header: {0}")]
    InvalidHeader(#[from] FrameError),

    #[error("connection timed out")]
    Timeout,

    #[error("session limit reached")]
    SessionLimit,

    #[error("transport closed: {0}")]
    Transport(#[from] std::io::Error),

    #[error("propagation stopped by handler")]
    StopPropagation,
}

/// Errors a registered handler may raise. These never propagate as framing
/// or codec errors; the dispatcher logs them and moves on (per-message, the
/// connection itself stays open).
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),
}

impl From<CodecError> for ConnectionError {
    fn from(err: CodecError) -> Self {
        ConnectionError::MalformedRequest(err.to_string())
    }
}

/// Fatal, process-level errors raised by the acceptor. Bind failures get a
/// distinguishable exit code (`PORT_UNAVAILABLE`) rather than a generic
/// nonzero status.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("PORT_UNAVAILABLE: {0}")]
    PortUnavailable(std::io::Error),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}
