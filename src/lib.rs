//! Requiem — a filtered, framed TCP application server.
//!
//! Clients open a TCP connection and exchange length-prefixed messages
//! carrying a JSON-expressible mapping payload, encoded either as text
//! (JSON) or compact (CBOR). Incoming messages are dispatched to
//! user-registered handlers selected by declarative filters and grouped
//! into ordered priority buckets; at most one handler per group runs per
//! message. Sessions are tracked per client address with an optional
//! concurrency cap, and a process-wide ban list can suppress dispatch for
//! specific addresses.
//!
//! # Quick Start
//! ```rust,no_run
//! use requiem::{Filter, AddressFilter, Propagation, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig::default());
//!     server.register(0, vec![], |client, message| async move {
//!         client.send(&message.payload, None, false).await.ok();
//!         Ok(Propagation::Continue)
//!     });
//!     server.serve().await?;
//!     Ok(())
//! }
//! ```

pub mod blocking;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filters;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod session;

pub use blocking::{BlockingError, BlockingLimiter};
pub use client::{Client, Message};
pub use codec::{Encoding, Payload};
pub use config::ServerConfig;
pub use dispatcher::DispatchOutcome;
pub use error::{CodecError, ConnectionError, FrameError, HandlerError, ServerError};
pub use filters::{AddressFilter, FieldSpec, FieldsFilter, Filter};
pub use handler::{GroupBuilder, Handler, HandlerRegistry, HandlerResult, Propagation};
pub use protocol::frame::{ByteOrder, FrameConfig, PROTOCOL_VERSION};
pub use server::{Server, ServerHooks};
pub use session::{Session, SessionRegistry};

/// Crate version, re-exported for diagnostics and the CLI's `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
