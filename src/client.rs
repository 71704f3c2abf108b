//! Client: the handler-facing handle to a connected peer.
//!
//! A `Client` is cheap to clone — it is the value handlers receive by
//! value, and the value the session registry can hand to other handlers
//! wanting to push unsolicited messages to a different session's socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::blocking::{self, BlockingError, BlockingLimiter};
use crate::codec::{self, Encoding, Payload};
use crate::error::ConnectionError;
use crate::protocol::frame::{self, FrameConfig};
use crate::session::{Session, SessionRegistry};

/// The shared, writable half of a connection plus its negotiated encoding.
/// Held behind an `Arc` so every `Client` clone targeting the same
/// connection shares one socket and one write mutex — the framing writer
/// must be atomic per call, never interleaved at the byte level.
pub struct ClientHandle {
    address: String,
    encoding: Encoding,
    frame_cfg: FrameConfig,
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send>>,
    blocking_limiter: BlockingLimiter,
    closed: AtomicBool,
}

impl ClientHandle {
    pub fn new(
        address: String,
        encoding: Encoding,
        frame_cfg: FrameConfig,
        writer: Box<dyn AsyncWrite + Unpin + Send>,
        blocking_limiter: BlockingLimiter,
    ) -> Self {
        ClientHandle {
            address,
            encoding,
            frame_cfg,
            writer: AsyncMutex::new(writer),
            blocking_limiter,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) async fn write_frame(&self, payload: &Payload, encoding: Encoding) -> Result<(), ConnectionError> {
        use tokio::io::AsyncWriteExt;

        let bytes = codec::encode(payload, encoding)?;
        let frame = frame::encode_frame(&bytes, encoding.to_byte(), self.frame_cfg);
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Gracefully shuts down the write half and marks this connection as
    /// closed, so the peer sees EOF and the connection loop ends its read
    /// loop after the current message rather than idling until the
    /// connection deadline.
    pub(crate) async fn shutdown(&self) -> Result<(), ConnectionError> {
        use tokio::io::AsyncWriteExt;

        self.closed.store(true, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// The remote endpoint a handler is invoked with. Carries the address, the
/// negotiated encoding, the active session, and shared access to the
/// underlying socket and the process-wide session/ban registry.
#[derive(Clone)]
pub struct Client {
    session: Session,
    handle: Arc<ClientHandle>,
    registry: Arc<SessionRegistry>,
}

impl Client {
    pub fn new(session: Session, handle: Arc<ClientHandle>, registry: Arc<SessionRegistry>) -> Self {
        Client {
            session,
            handle,
            registry,
        }
    }

    pub fn address(&self) -> &str {
        &self.handle.address
    }

    /// The encoding negotiated for this connection; immutable after
    /// construction.
    pub fn encoding(&self) -> Encoding {
        self.handle.encoding
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    /// True once a handler has sent with `close=true` on this connection.
    /// The connection loop checks this after each message and ends the
    /// read loop rather than waiting on further input.
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Sends `payload` to this client. `encoding_override` replaces the
    /// connection's negotiated encoding for this call only. If `close` is
    /// set, the stream is closed after the send completes.
    pub async fn send(
        &self,
        payload: &Payload,
        encoding_override: Option<Encoding>,
        close: bool,
    ) -> Result<(), ConnectionError> {
        let encoding = encoding_override.unwrap_or(self.handle.encoding);
        self.handle.write_frame(payload, encoding).await?;
        if close {
            self.handle.shutdown().await?;
            self.registry.close(&self.session).await;
        }
        Ok(())
    }

    /// Adds this client's address to the ban list.
    pub async fn ban(&self) {
        self.registry.ban(self.address()).await;
    }

    /// All sessions currently open for this client's address.
    pub async fn sessions(&self) -> Vec<Session> {
        self.registry.sessions_of(self.address()).await
    }

    /// Runs a blocking closure on the server's worker thread pool. When
    /// `cancellable` is true, the call returns early with
    /// [`BlockingError::Cancelled`] if `deadline` passes before `f`
    /// finishes.
    pub async fn run_sync_task<F, R>(
        &self,
        f: F,
        cancellable: bool,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<R, BlockingError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        blocking::run_sync_task(&self.handle.blocking_limiter, f, cancellable, deadline).await
    }
}

/// A decoded request handed to handlers alongside the [`Client`] that sent
/// it.
#[derive(Debug, Clone)]
pub struct Message {
    pub payload: Payload,
    pub encoding: Encoding,
}
