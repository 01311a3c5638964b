//! Single round-trip authentication handshake.
//!
//! Before a socket goes live the initiating side may send one control-class
//! unit carrying [`Credentials`]. The accepting side, when configured with an
//! [`Authenticator`], reads that unit and asks the authenticator to verify
//! either the bearer token or the username/password pair. Credential
//! validation itself is left to the application.

use std::{fmt, io, time::Duration};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info_span};

use crate::{
    codec::{Unit, UnitReader, UnitWriter},
    error::HandlerError,
    socket::ConnectionInfo,
};

/// Credentials exchanged during the handshake.
///
/// Absent fields are omitted from the wire form.
///
/// ```
/// use wirehop::auth::Credentials;
///
/// let json = serde_json::to_string(&Credentials::jwt("t0k3n")).expect("encode");
/// assert_eq!(json, r#"{"jwt":"t0k3n"}"#);
/// ```
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Account password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Bearer token. Takes priority over username and password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
}

impl Credentials {
    /// Credentials carrying only a bearer token.
    #[must_use]
    pub fn jwt(token: impl Into<String>) -> Self {
        Self {
            jwt: Some(token.into()),
            ..Self::default()
        }
    }

    /// Credentials carrying a username and password.
    #[must_use]
    pub fn user_pass(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            jwt: None,
        }
    }

    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none() && self.jwt.is_none()
    }

    /// The credential message an initiator sends, if any.
    ///
    /// A configured token is sent alone; otherwise the username and password
    /// are sent if either is configured.
    pub(crate) fn offer(&self) -> Option<Self> {
        if let Some(token) = &self.jwt {
            return Some(Self::jwt(token.clone()));
        }
        if self.username.is_some() || self.password.is_some() {
            return Some(Self {
                jwt: None,
                ..self.clone()
            });
        }
        None
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("jwt", &self.jwt.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Verifies credentials presented by a connecting peer.
///
/// Returning an error rejects the peer; the error is reported as
/// [`AuthError::Rejected`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify a bearer token.
    async fn authenticate_jwt(&self, info: &ConnectionInfo, token: &str)
    -> Result<(), HandlerError>;

    /// Verify a username and password.
    async fn authenticate_user_pass(
        &self,
        info: &ConnectionInfo,
        username: &str,
        password: &str,
    ) -> Result<(), HandlerError>;
}

/// Errors raised by the authentication handshake.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The first unit was not a control-class unit.
    #[error("expected a text credential unit")]
    UnexpectedUnit,
    /// The credential unit was not valid JSON.
    #[error("malformed credentials: {0}")]
    Malformed(#[source] serde_json::Error),
    /// Neither a token nor a complete username/password pair was presented.
    #[error("no usable credentials presented")]
    MissingCredentials,
    /// The authenticator rejected the credentials.
    #[error("credentials rejected: {0}")]
    Rejected(#[source] HandlerError),
    /// The peer did not present credentials in time.
    #[error("timed out waiting for credentials")]
    Timeout,
    /// The peer closed the transport before presenting credentials.
    #[error("peer disconnected during handshake")]
    Disconnected,
    /// Reading or writing the credential unit failed.
    #[error("transport error during handshake: {0}")]
    Transport(#[from] io::Error),
    /// The credentials could not be encoded.
    #[error("failed to encode credentials: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Read one credential unit and verify it with `authenticator`.
pub(crate) async fn accept_credentials(
    reader: &mut UnitReader,
    authenticator: &dyn Authenticator,
    info: &ConnectionInfo,
    handshake_timeout: Option<Duration>,
) -> Result<(), AuthError> {
    let span = info_span!("authenticate", peer = ?info.peer_addr(), role = "acceptor");
    async {
        let credentials = match handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, read_credentials(reader))
                .await
                .map_err(|_| AuthError::Timeout)??,
            None => read_credentials(reader).await?,
        };
        verify(authenticator, info, credentials).await?;
        debug!("peer authenticated");
        Ok::<(), AuthError>(())
    }
    .instrument(span)
    .await
}

async fn read_credentials(reader: &mut UnitReader) -> Result<Credentials, AuthError> {
    match reader.next().await {
        None => Err(AuthError::Disconnected),
        Some(Err(e)) => Err(AuthError::Transport(e)),
        Some(Ok(Unit::Binary(_))) => Err(AuthError::UnexpectedUnit),
        Some(Ok(Unit::Text(text))) => serde_json::from_str(&text).map_err(AuthError::Malformed),
    }
}

async fn verify(
    authenticator: &dyn Authenticator,
    info: &ConnectionInfo,
    credentials: Credentials,
) -> Result<(), AuthError> {
    let Credentials {
        username,
        password,
        jwt,
    } = credentials;
    let outcome = match (jwt, username, password) {
        (Some(token), _, _) if !token.is_empty() => {
            debug!("verifying bearer token");
            authenticator.authenticate_jwt(info, &token).await
        }
        (_, Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
            debug!(%username, "verifying username and password");
            authenticator
                .authenticate_user_pass(info, &username, &password)
                .await
        }
        _ => return Err(AuthError::MissingCredentials),
    };
    outcome.map_err(AuthError::Rejected)
}

/// Send the initiator's credential unit, if any credentials are configured.
pub(crate) async fn offer_credentials(
    writer: &mut UnitWriter,
    credentials: &Credentials,
) -> Result<(), AuthError> {
    let Some(offer) = credentials.offer() else {
        return Ok(());
    };
    let span = info_span!("authenticate", role = "initiator", jwt = offer.jwt.is_some());
    async {
        let text = serde_json::to_string(&offer).map_err(AuthError::Encode)?;
        writer.send(Unit::Text(text)).await?;
        debug!("credentials sent");
        Ok::<(), AuthError>(())
    }
    .instrument(span)
    .await
}
