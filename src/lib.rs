#![doc(html_root_url = "https://docs.rs/wirehop/latest")]
//! Public API for the `wirehop` library.
//!
//! `wirehop` layers request/response correlation, code-keyed hooks and a
//! single round-trip authentication handshake over a bidirectional transport
//! carrying text and binary units.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use wirehop::{SocketBuilder, hooks::hook};
//!
//! # async fn demo(stream: tokio::net::TcpStream) -> Result<(), wirehop::SocketError> {
//! let socket = SocketBuilder::new()
//!     .hook(
//!         "PING",
//!         hook(|inbound| async move {
//!             inbound.reply("PONG", &()).await?;
//!             Ok(())
//!         }),
//!     )
//!     .accept_tcp(stream)
//!     .await?;
//! let status = socket
//!     .request("STATUS", &(), Some(Duration::from_secs(5)))
//!     .await?;
//! println!("{}", status.code);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod codec;
pub mod config;
pub mod correlation;
mod dispatch;
pub mod envelope;
pub mod error;
pub mod hooks;
pub mod message;
pub mod metrics;
pub mod socket;

pub use auth::{Authenticator, Credentials};
pub use config::{PeerPolicy, SocketBuilder};
pub use correlation::{CorrelationHandle, ResponseFuture};
pub use envelope::{EnvelopeCodec, JsonCodec};
pub use error::{HandlerError, Result, SocketError};
pub use message::Message;
pub use metrics::{Direction, ERRORS_TOTAL, REQUEST_TIMEOUTS, SOCKETS_LIVE, UNITS_PROCESSED};
pub use socket::{ConnectionInfo, Socket};
