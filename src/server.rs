//! Acceptor and per-connection state machine.
//!
//! The acceptor binds one TCP listener and spawns an independent task per
//! accepted connection. Each connection task runs the state machine in
//! [`handle_connection`]: read → frame → decode → dispatch → respond →
//! loop, bounded end to end by a single connection-lifetime deadline.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::blocking::BlockingLimiter;
use crate::client::{Client, ClientHandle, Message};
use crate::codec::{self, Encoding};
use crate::config::ServerConfig;
use crate::dispatcher::{self, DispatchOutcome};
use crate::error::{ConnectionError, FrameError, ServerError};
use crate::filters::Filter;
use crate::handler::{GroupBuilder, Handler, HandlerRegistry};
use crate::protocol::{self, frame::FrameConfig};
use crate::session::SessionRegistry;

type BoxFuture = Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Overridable setup/teardown lifecycle hooks invoked once around
/// [`Server::serve`].
#[derive(Default)]
pub struct ServerHooks {
    pub on_setup: Option<Box<dyn Fn() -> BoxFuture + Send + Sync>>,
    pub on_shutdown: Option<Box<dyn Fn() -> BoxFuture + Send + Sync>>,
}

/// A TCP application server: configuration, a handler registry built up
/// before serving, and optional setup/shutdown hooks.
pub struct Server {
    config: ServerConfig,
    handlers: HandlerRegistry,
    hooks: ServerHooks,
    blocking_limiter: BlockingLimiter,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Server {
            config,
            handlers: HandlerRegistry::new(),
            hooks: ServerHooks::default(),
            blocking_limiter: BlockingLimiter::default(),
        }
    }

    /// Overrides the capacity of the worker-thread pool backing
    /// `Client::run_sync_task`.
    pub fn with_blocking_capacity(mut self, capacity: usize) -> Self {
        self.blocking_limiter = BlockingLimiter::new(capacity);
        self
    }

    /// Registers a handler directly. Adding handlers after [`Server::serve`]
    /// has started is not supported — the registry is read-only once
    /// serving begins.
    pub fn register<H>(&mut self, group: i64, filters: Vec<Filter>, handler: H)
    where
        H: Handler + 'static,
    {
        self.handlers.register(group, filters, handler);
    }

    /// Fluent registration sugar: `server.group(0).filter(f).register(handler)`.
    pub fn group(&mut self, group: i64) -> GroupBuilder<'_> {
        self.handlers.group(group)
    }

    pub fn set_hooks(&mut self, hooks: ServerHooks) {
        self.hooks = hooks;
    }

    /// Binds the configured address/port and serves forever, until a Ctrl-C
    /// signal is received. Binding failures are distinguished from other
    /// fatal I/O via [`ServerError::PortUnavailable`] so the process can
    /// exit with a distinguishable `PORT_UNAVAILABLE` code.
    pub async fn serve(self) -> Result<(), ServerError> {
        let Server {
            config,
            handlers,
            hooks,
            blocking_limiter,
        } = self;

        if let Some(on_setup) = &hooks.on_setup {
            on_setup().await;
        }

        let bind_addr = config.socket_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(ServerError::PortUnavailable)?;
        info!(addr = %bind_addr, "listening");

        let sessions = Arc::new(SessionRegistry::new(config.session_limit));
        let handlers = Arc::new(handlers);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer_addr) = accepted?;
                    let config = config.clone();
                    let handlers = handlers.clone();
                    let sessions = sessions.clone();
                    let blocking_limiter = blocking_limiter.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(socket, peer_addr, config, handlers, sessions, blocking_limiter).await {
                            debug!(peer = %peer_addr, error = %err, "connection ended");
                        }
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        if let Some(on_shutdown) = &hooks.on_shutdown {
            on_shutdown().await;
        }
        Ok(())
    }
}

/// Runs the per-connection state machine for one accepted socket: decode
/// messages in a loop, dispatch each to the handler registry, reply to
/// framing/codec/session errors with their matching error payload, and
/// close on any terminal condition.
async fn handle_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    handlers: Arc<HandlerRegistry>,
    sessions: Arc<SessionRegistry>,
    blocking_limiter: BlockingLimiter,
) -> Result<(), ConnectionError> {
    let frame_cfg = FrameConfig {
        header_size: config.header_size,
        byte_order: config.byteorder,
    };
    let deadline = Instant::now() + Duration::from_secs(config.timeout);
    let address = peer_addr.ip().to_string();

    let (mut read_half, write_half) = socket.into_split();
    let mut write_half = Some(write_half);
    let mut buf = BytesMut::new();

    let mut client: Option<Client> = None;
    let mut session: Option<crate::session::Session> = None;

    let result: Result<(), ConnectionError> = loop {
        let frame = match crate::protocol::frame::read_one(
            &mut read_half,
            frame_cfg,
            &mut buf,
            config.buf,
            deadline,
        )
        .await
        {
            Ok(frame) => frame,
            Err(FrameError::Io(io_err)) if io_err.kind() == ErrorKind::TimedOut => {
                let encoding = client.as_ref().map(|c| c.encoding()).unwrap_or(config.default_encoding);
                reply_pre_or_post_session(&client, &mut write_half, frame_cfg, encoding, protocol::ERR_TIMED_OUT).await;
                break Err(ConnectionError::Timeout);
            }
            Err(FrameError::Io(io_err)) if io_err.kind() == ErrorKind::UnexpectedEof => {
                break Ok(());
            }
            Err(FrameError::Io(io_err)) => {
                break Err(ConnectionError::Transport(io_err));
            }
            Err(FrameError::ContentLengthTooSmall(_)) => {
                let encoding = config.default_encoding;
                reply_pre_or_post_session(&client, &mut write_half, frame_cfg, encoding, protocol::ERR_REQUEST_MALFORMED).await;
                break Err(ConnectionError::MalformedRequest("content_length < 2".into()));
            }
            Err(err @ (FrameError::UnsupportedVersion(_) | FrameError::UnsupportedEncoding(_))) => {
                let encoding = config.default_encoding;
                reply_pre_or_post_session(&client, &mut write_half, frame_cfg, encoding, protocol::ERR_HEADER_INVALID).await;
                break Err(ConnectionError::InvalidHeader(err));
            }
        };

        let encoding = match Encoding::from_byte(frame.content_encoding) {
            Some(encoding) => encoding,
            None => unreachable!("read_one already validated content_encoding"),
        };

        let payload = match codec::decode(&frame.payload, encoding) {
            Ok(payload) => payload,
            Err(_) => {
                reply_pre_or_post_session(&client, &mut write_half, frame_cfg, encoding, protocol::ERR_REQUEST_MALFORMED).await;
                break Err(ConnectionError::MalformedRequest("payload decode failed".into()));
            }
        };

        if client.is_none() {
            let writer = write_half.take().expect("write half taken at most once");
            let handle = Arc::new(ClientHandle::new(
                address.clone(),
                encoding,
                frame_cfg,
                Box::new(writer),
                blocking_limiter.clone(),
            ));

            let opened = sessions.open(&address).await;
            let Some(new_session) = opened else {
                let _ = handle
                    .write_frame(&protocol::error_payload(protocol::ERR_SESSION_LIMIT_REACHED), encoding)
                    .await;
                break Err(ConnectionError::SessionLimit);
            };

            session = Some(new_session.clone());
            client = Some(Client::new(new_session, handle, sessions.clone()));
            info!(address = %address, "session opened");
        }

        let active_client = client.clone().expect("client constructed above");
        let message = Message { payload, encoding };
        match dispatcher::dispatch(&handlers, &sessions, active_client, message).await {
            DispatchOutcome::Continue => {}
            DispatchOutcome::Stop => {
                break Err(ConnectionError::StopPropagation);
            }
        }

        if client.as_ref().is_some_and(Client::is_closed) {
            break Ok(());
        }
    };

    if let Some(session) = &session {
        sessions.close(session).await;
        debug!(address = %address, "session closed");
    }

    result
}

/// Sends an error reply using whichever writer is currently available: the
/// raw pre-session write half if no `Client` exists yet, or the client's
/// shared handle afterward.
async fn reply_pre_or_post_session(
    client: &Option<Client>,
    write_half: &mut Option<tokio::net::tcp::OwnedWriteHalf>,
    frame_cfg: FrameConfig,
    encoding: Encoding,
    code: &str,
) {
    let payload = protocol::error_payload(code);
    if let Some(client) = client {
        if let Err(err) = client.send(&payload, Some(encoding), false).await {
            warn!(error = %err, "failed to send error reply");
        }
        return;
    }
    if let Some(writer) = write_half {
        if let Err(err) = write_raw_frame(writer, &payload, encoding, frame_cfg).await {
            warn!(error = %err, "failed to send error reply");
        }
    }
}

async fn write_raw_frame(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    payload: &crate::codec::Payload,
    encoding: Encoding,
    frame_cfg: FrameConfig,
) -> std::io::Result<()> {
    let bytes = codec::encode(payload, encoding).unwrap_or_default();
    let frame = crate::protocol::frame::encode_frame(&bytes, encoding.to_byte(), frame_cfg);
    writer.write_all(&frame).await?;
    writer.flush().await
}
