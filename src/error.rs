//! Canonical error and result types for the crate.
//!
//! [`SocketError`] is the single surface returned by socket setup and by the
//! facade operations. Concern-specific enums ([`ProtocolError`],
//! [`CorrelationError`], [`AuthError`]) convert into it with `?`.

use std::{io, net::SocketAddr};

pub use crate::{
    auth::AuthError,
    correlation::{CorrelationError, RequestError},
    envelope::ProtocolError,
};

/// Boxed error returned by application callbacks (hooks, binary handlers,
/// authenticators).
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error type exposed by `wirehop`.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// Reading from or writing to the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// A unit or envelope could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// A request could not be registered or a response could not be matched.
    #[error("correlation error: {0}")]
    Correlation(#[from] CorrelationError),
    /// A request ended without a response.
    #[error("request failed: {0}")]
    Request(#[from] RequestError),
    /// The binary handler failed; this is fatal to the dispatch loop.
    #[error("binary handler failed: {0}")]
    BinaryHandler(#[source] HandlerError),
    /// The authentication handshake failed.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    /// The accepted peer was refused by the configured peer policy.
    #[error("peer {0} rejected by policy")]
    PeerRejected(SocketAddr),
    /// The dispatch task panicked or was aborted.
    #[error("dispatch task failed: {0}")]
    Dispatch(#[source] tokio::task::JoinError),
    /// The socket is no longer live.
    #[error("socket is closed")]
    Closed,
}

impl SocketError {
    /// Returns true if the error means the socket can no longer be used.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::Correlation(CorrelationError::ManagerStopped))
    }
}

/// Canonical result alias used by `wirehop` public APIs.
pub type Result<T> = std::result::Result<T, SocketError>;
