//! Socket configuration and connection establishment.
//!
//! [`SocketBuilder`] collects every knob a [`Socket`] needs and finishes with
//! one of the terminal methods: [`connect`](SocketBuilder::connect) and
//! [`connect_stream`](SocketBuilder::connect_stream) run the initiator side of
//! the handshake, [`accept`](SocketBuilder::accept) and
//! [`accept_tcp`](SocketBuilder::accept_tcp) run the acceptor side.

use std::{fmt, net::SocketAddr, sync::Arc, time::Duration};

use futures::SinkExt;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpSocket, TcpStream},
};
use tracing::{Span, info_span};

use crate::{
    auth::{AuthError, Authenticator, Credentials, accept_credentials, offer_credentials},
    codec::{
        DEFAULT_MAX_UNIT_LENGTH,
        FramingConfig,
        UnitReader,
        UnitWriter,
        clamp_unit_length,
        framed,
    },
    dispatch::Handlers,
    envelope::{EnvelopeCodec, JsonCodec},
    error::{Result, SocketError},
    hooks::{BinaryHandler, ErrorHandler, Hook, HookTable},
    socket::{ConnectionInfo, Socket, SocketParts},
};

const DEFAULT_READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Accept-time filter deciding whether a peer may connect.
pub type PeerPolicy = Arc<dyn Fn(&SocketAddr) -> bool + Send + Sync>;

/// Which side of the handshake a socket plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Initiator,
    Acceptor,
}

impl Role {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Initiator => "initiator",
            Self::Acceptor => "acceptor",
        }
    }
}

/// Builder for [`Socket`].
///
/// # Examples
///
/// ```no_run
/// use std::{net::SocketAddr, time::Duration};
///
/// use wirehop::{SocketBuilder, SocketError};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), SocketError> {
/// let addr: SocketAddr = "127.0.0.1:7878".parse().expect("valid socket address");
/// let socket = SocketBuilder::new()
///     .jwt("t0k3n")
///     .max_message_size(64 * 1024)
///     .connect(addr)
///     .await?;
/// let response = socket
///     .request("PING", &(), Some(Duration::from_secs(5)))
///     .await?;
/// println!("{}", response.code);
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct SocketBuilder {
    max_message_size: usize,
    read_buffer_capacity: usize,
    write_backpressure_boundary: Option<usize>,
    nodelay: Option<bool>,
    authenticator: Option<Arc<dyn Authenticator>>,
    credentials: Credentials,
    handshake_timeout: Option<Duration>,
    peer_policy: Option<PeerPolicy>,
    codec: Arc<dyn EnvelopeCodec>,
    hooks: HookTable,
    handlers: Handlers,
    span: Option<Span>,
}

impl SocketBuilder {
    /// Create a builder with default settings.
    ///
    /// ```
    /// use wirehop::SocketBuilder;
    ///
    /// let builder = SocketBuilder::new();
    /// let _ = builder;
    /// ```
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_UNIT_LENGTH,
            read_buffer_capacity: DEFAULT_READ_BUFFER_CAPACITY,
            write_backpressure_boundary: None,
            nodelay: None,
            authenticator: None,
            credentials: Credentials::default(),
            handshake_timeout: None,
            peer_policy: None,
            codec: Arc::new(JsonCodec),
            hooks: HookTable::default(),
            handlers: Handlers::default(),
            span: None,
        }
    }

    /// Largest inbound unit accepted, in bytes.
    ///
    /// Clamped to [`MIN_UNIT_LENGTH`](crate::codec::MIN_UNIT_LENGTH)..=
    /// [`MAX_UNIT_LENGTH`](crate::codec::MAX_UNIT_LENGTH).
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = clamp_unit_length(bytes);
        self
    }

    /// Initial read buffer reservation.
    pub fn read_buffer_capacity(mut self, bytes: usize) -> Self {
        self.read_buffer_capacity = bytes;
        self
    }

    /// Bytes buffered by the writer before it applies back-pressure.
    pub fn write_backpressure_boundary(mut self, bytes: usize) -> Self {
        self.write_backpressure_boundary = Some(bytes);
        self
    }

    /// Set `TCP_NODELAY` on TCP transports.
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = Some(enabled);
        self
    }

    /// Require accepted peers to authenticate with `authenticator`.
    pub fn authenticator<A>(mut self, authenticator: A) -> Self
    where
        A: Authenticator + 'static,
    {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Present a bearer token when connecting.
    pub fn jwt(mut self, token: impl Into<String>) -> Self {
        self.credentials.jwt = Some(token.into());
        self
    }

    /// Present a username and password when connecting.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials.username = Some(username.into());
        self.credentials.password = Some(password.into());
        self
    }

    /// Limit how long an acceptor waits for the peer's credentials.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Filter peers in [`accept_tcp`](Self::accept_tcp).
    pub fn peer_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(&SocketAddr) -> bool + Send + Sync + 'static,
    {
        self.peer_policy = Some(Arc::new(policy));
        self
    }

    /// Replace the default [`JsonCodec`].
    pub fn codec<C: EnvelopeCodec>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Register a hook before the dispatch loop starts.
    ///
    /// Messages arriving immediately after the handshake can only reach hooks
    /// registered here.
    pub fn hook(self, code: impl Into<String>, hook: Hook) -> Self {
        self.hooks.insert(code, hook);
        self
    }

    /// Handle data-class units. An error from the handler closes the socket.
    pub fn binary_handler(mut self, handler: BinaryHandler) -> Self {
        self.handlers.binary = Some(handler);
        self
    }

    /// Decide whether a read error closes the socket.
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(SocketError) -> Result<()> + Send + Sync + 'static,
    {
        let handler: ErrorHandler = Arc::new(handler);
        self.handlers.error = Some(handler);
        self
    }

    /// Parent span for the socket's tracing span.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Connect over TCP and run the initiator side of the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Transport`] if the connection fails or
    /// [`SocketError::Authentication`] if the credentials cannot be sent.
    pub async fn connect(self, addr: SocketAddr) -> Result<Socket> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        let stream = socket.connect(addr).await?;
        self.apply_tcp_options(&stream)?;
        self.start(Role::Initiator, stream, Some(addr)).await
    }

    /// Run the initiator side over an established stream.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Authentication`] if the credentials cannot be
    /// sent.
    pub async fn connect_stream<T>(self, io: T) -> Result<Socket>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.start(Role::Initiator, io, None).await
    }

    /// Run the acceptor side over an established stream.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Authentication`] if an authenticator is
    /// configured and the peer fails the handshake.
    pub async fn accept<T>(self, io: T) -> Result<Socket>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.start(Role::Acceptor, io, None).await
    }

    /// Apply the peer policy, then run the acceptor side over `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::PeerRejected`] if the policy refuses the peer,
    /// otherwise as for [`accept`](Self::accept).
    pub async fn accept_tcp(self, stream: TcpStream) -> Result<Socket> {
        let peer = stream.peer_addr()?;
        if let Some(policy) = &self.peer_policy
            && !policy(&peer)
        {
            log::info!("peer rejected by policy: peer={peer}");
            return Err(SocketError::PeerRejected(peer));
        }
        self.apply_tcp_options(&stream)?;
        self.start(Role::Acceptor, stream, Some(peer)).await
    }

    /// Run the initiator side over a caller-supplied unit transport.
    ///
    /// # Errors
    ///
    /// As for [`connect_stream`](Self::connect_stream).
    pub async fn connect_transport(self, writer: UnitWriter, reader: UnitReader) -> Result<Socket> {
        self.handshake(Role::Initiator, writer, reader, ConnectionInfo::default())
            .await
    }

    /// Run the acceptor side over a caller-supplied unit transport.
    ///
    /// # Errors
    ///
    /// As for [`accept`](Self::accept).
    pub async fn accept_transport(self, writer: UnitWriter, reader: UnitReader) -> Result<Socket> {
        self.handshake(Role::Acceptor, writer, reader, ConnectionInfo::default())
            .await
    }

    fn apply_tcp_options(&self, stream: &TcpStream) -> Result<()> {
        if let Some(enabled) = self.nodelay {
            stream.set_nodelay(enabled)?;
        }
        Ok(())
    }

    async fn start<T>(self, role: Role, io: T, peer_addr: Option<SocketAddr>) -> Result<Socket>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (writer, reader) = framed(io, self.framing());
        self.handshake(role, writer, reader, ConnectionInfo::new(peer_addr))
            .await
    }

    fn framing(&self) -> FramingConfig {
        FramingConfig {
            max_unit_length: self.max_message_size,
            read_buffer_capacity: self.read_buffer_capacity,
            write_buffer_capacity: self.write_backpressure_boundary,
        }
    }

    async fn handshake(
        self,
        role: Role,
        mut writer: UnitWriter,
        mut reader: UnitReader,
        info: ConnectionInfo,
    ) -> Result<Socket> {
        let peer = info.peer_addr();
        let span = match &self.span {
            Some(parent) => info_span!(parent: parent, "socket", ?peer, role = role.as_str()),
            None => info_span!("socket", ?peer, role = role.as_str()),
        };
        let outcome = match role {
            Role::Initiator => offer_credentials(&mut writer, &self.credentials).await,
            Role::Acceptor => match &self.authenticator {
                Some(authenticator) => {
                    accept_credentials(
                        &mut reader,
                        authenticator.as_ref(),
                        &info,
                        self.handshake_timeout,
                    )
                    .await
                }
                None => Ok(()),
            },
        };
        if let Err(e) = outcome {
            fail_handshake(&mut writer, &span, &e).await;
            return Err(SocketError::Authentication(e));
        }

        Ok(Socket::start(SocketParts {
            writer,
            reader,
            codec: self.codec,
            hooks: self.hooks,
            handlers: self.handlers,
            info,
            span,
        })
        .await)
    }
}

async fn fail_handshake(writer: &mut UnitWriter, span: &Span, error: &AuthError) {
    tracing::warn!(parent: span, error = %error, "handshake failed");
    crate::metrics::inc_errors();
    if let Err(e) = writer.close().await {
        tracing::debug!(parent: span, error = %e, "failed to close transport after handshake failure");
    }
}

impl Default for SocketBuilder {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for SocketBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketBuilder")
            .field("max_message_size", &self.max_message_size)
            .field("read_buffer_capacity", &self.read_buffer_capacity)
            .field("write_backpressure_boundary", &self.write_backpressure_boundary)
            .field("authenticator", &self.authenticator.is_some())
            .field("credentials", &self.credentials)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::SocketBuilder;
    use crate::codec::{MAX_UNIT_LENGTH, MIN_UNIT_LENGTH};

    #[rstest]
    #[case(0, MIN_UNIT_LENGTH)]
    #[case(4096, 4096)]
    #[case(usize::MAX, MAX_UNIT_LENGTH)]
    fn max_message_size_is_clamped(#[case] requested: usize, #[case] effective: usize) {
        let builder = SocketBuilder::new().max_message_size(requested);
        assert_eq!(builder.framing().max_unit_length, effective);
    }

    #[rstest]
    fn debug_output_redacts_credentials() {
        let builder = SocketBuilder::new().credentials("alice", "hunter2");
        let rendered = format!("{builder:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }
}
