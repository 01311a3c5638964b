//! Scriptable remote peers.

use std::{io, time::Duration};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::duplex;
use wirehop::{
    EnvelopeCodec,
    JsonCodec,
    Message,
    Socket,
    SocketBuilder,
    SocketError,
    codec::{FramingConfig, Unit, UnitReader, UnitWriter, framed},
};

const DUPLEX_CAPACITY: usize = 64 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// The far end of a [`socket_pair`], speaking raw units.
pub struct RawPeer {
    writer: UnitWriter,
    reader: UnitReader,
}

impl RawPeer {
    /// Write a text unit.
    ///
    /// # Panics
    ///
    /// Panics if the write fails.
    pub async fn send_text(&mut self, text: impl Into<String>) {
        self.writer
            .send(Unit::Text(text.into()))
            .await
            .expect("peer write failed");
    }

    /// Write a binary unit.
    ///
    /// # Panics
    ///
    /// Panics if the write fails.
    pub async fn send_binary(&mut self, bytes: impl Into<Bytes>) {
        self.writer
            .send(Unit::Binary(bytes.into()))
            .await
            .expect("peer write failed");
    }

    /// Encode and write `message` with [`JsonCodec`].
    ///
    /// # Panics
    ///
    /// Panics if encoding or the write fails.
    pub async fn send_message(&mut self, message: &Message) {
        let text = JsonCodec.encode(message).expect("encode message");
        self.send_text(text).await;
    }

    /// Read the next unit, or `None` once the socket closes the transport.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within five seconds.
    pub async fn next_unit(&mut self) -> Option<io::Result<Unit>> {
        tokio::time::timeout(READ_TIMEOUT, self.reader.next())
            .await
            .expect("timed out waiting for a unit")
    }

    /// Read and decode the next message.
    ///
    /// # Panics
    ///
    /// Panics if the next unit is not a decodable text unit.
    pub async fn next_message(&mut self) -> Message {
        match self.next_unit().await {
            Some(Ok(Unit::Text(text))) => JsonCodec.decode(&text).expect("decode message"),
            other => panic!("expected a text unit, got {other:?}"),
        }
    }

    /// Returns true once the socket has closed its side of the transport.
    pub async fn is_closed(&mut self) -> bool { matches!(self.next_unit().await, None | Some(Err(_))) }

    /// Split into the raw writer and reader halves.
    pub fn into_parts(self) -> (UnitWriter, UnitReader) { (self.writer, self.reader) }
}

/// Accept a socket configured by `builder` on one end of an in-memory
/// transport and return it together with the raw peer on the other end.
///
/// # Errors
///
/// Returns the builder's error if the handshake fails.
pub async fn socket_pair(builder: SocketBuilder) -> Result<(Socket, RawPeer), SocketError> {
    let (local, remote) = duplex(DUPLEX_CAPACITY);
    let (writer, reader) = framed(remote, FramingConfig::default());
    let socket = builder.accept(local).await?;
    Ok((socket, RawPeer { writer, reader }))
}

/// Connect an initiator socket to an acceptor socket over an in-memory
/// transport, running both handshakes concurrently.
///
/// # Errors
///
/// Returns the first handshake error.
pub async fn connected_pair(
    initiator: SocketBuilder,
    acceptor: SocketBuilder,
) -> Result<(Socket, Socket), SocketError> {
    let (left, right) = duplex(DUPLEX_CAPACITY);
    let (initiator, acceptor) = tokio::join!(initiator.connect_stream(left), acceptor.accept(right));
    Ok((initiator?, acceptor?))
}
