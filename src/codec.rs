//! Unit framing for the underlying byte stream.
//!
//! The transport carries two classes of unit: text (control messages such as
//! envelopes and credentials) and binary (bulk data handed to the binary
//! handler). Each unit is framed as a one-byte class tag followed by a
//! big-endian `u32` length and the payload.
//!
//! [`framed`] wraps any `AsyncRead + AsyncWrite` stream into the
//! [`UnitWriter`]/[`UnitReader`] pair used by a
//! [`Socket`](crate::socket::Socket). Other transports (for example a
//! WebSocket adapter) can supply their own pair through
//! [`SocketBuilder::connect_transport`](crate::config::SocketBuilder::connect_transport).

use std::{io, pin::Pin};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{Sink, StreamExt, stream::BoxStream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Tag byte marking a text unit.
pub const TEXT_TAG: u8 = 0x01;
/// Tag byte marking a binary unit.
pub const BINARY_TAG: u8 = 0x02;

const HEADER_LEN: usize = 5;

/// Minimum unit length in bytes.
///
/// Configured limits are clamped to at least this value so credential and
/// small control messages always fit.
pub const MIN_UNIT_LENGTH: usize = 64;

/// Maximum unit length in bytes (16 MiB).
pub const MAX_UNIT_LENGTH: usize = 16 * 1024 * 1024;

/// Default inbound unit limit (1 MiB).
pub const DEFAULT_MAX_UNIT_LENGTH: usize = 1024 * 1024;

pub(crate) fn clamp_unit_length(value: usize) -> usize {
    value.clamp(MIN_UNIT_LENGTH, MAX_UNIT_LENGTH)
}

/// A single transport unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    /// Control-class unit carrying human-readable text.
    Text(String),
    /// Data-class unit carrying raw bytes.
    Binary(Bytes),
}

impl Unit {
    /// Payload length in bytes, excluding framing.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn tag(&self) -> u8 {
        match self {
            Self::Text(_) => TEXT_TAG,
            Self::Binary(_) => BINARY_TAG,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

/// Tokio codec encoding and decoding [`Unit`]s.
///
/// Units whose payload exceeds the configured limit are rejected in both
/// directions with [`io::ErrorKind::InvalidData`].
///
/// ```
/// use bytes::BytesMut;
/// use tokio_util::codec::{Decoder, Encoder};
/// use wirehop::codec::{Unit, UnitCodec};
///
/// let mut codec = UnitCodec::new(1024);
/// let mut buf = BytesMut::new();
/// codec
///     .encode(Unit::Text("hello".into()), &mut buf)
///     .expect("encode");
/// assert_eq!(&buf[..5], &[0x01, 0, 0, 0, 5]);
/// let unit = codec.decode(&mut buf).expect("decode").expect("complete unit");
/// assert_eq!(unit, Unit::Text("hello".into()));
/// ```
#[derive(Clone, Copy, Debug)]
pub struct UnitCodec {
    max_unit_length: usize,
}

impl UnitCodec {
    /// Create a codec accepting payloads up to `max_unit_length` bytes.
    ///
    /// The limit is clamped to [`MIN_UNIT_LENGTH`]..=[`MAX_UNIT_LENGTH`].
    #[must_use]
    pub fn new(max_unit_length: usize) -> Self {
        Self {
            max_unit_length: clamp_unit_length(max_unit_length),
        }
    }

    /// Return the effective payload limit.
    #[must_use]
    pub const fn max_unit_length(&self) -> usize { self.max_unit_length }

    fn oversized(&self, len: usize) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "unit of {len} bytes exceeds limit of {} bytes",
                self.max_unit_length
            ),
        )
    }
}

impl Default for UnitCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_UNIT_LENGTH) }
}

impl Decoder for UnitCodec {
    type Item = Unit;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Unit>, io::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let tag = src[0];
        if !matches!(tag, TEXT_TAG | BINARY_TAG) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown unit tag {tag:#04x}"),
            ));
        }
        let len = usize::try_from(u32::from_be_bytes([src[1], src[2], src[3], src[4]]))
            .map_err(|_| self.oversized(usize::MAX))?;
        if len > self.max_unit_length {
            return Err(self.oversized(len));
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        if tag == BINARY_TAG {
            return Ok(Some(Unit::Binary(payload)));
        }
        let text = std::str::from_utf8(&payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(Unit::Text(text.to_owned())))
    }
}

impl Encoder<Unit> for UnitCodec {
    type Error = io::Error;

    fn encode(&mut self, unit: Unit, dst: &mut BytesMut) -> Result<(), io::Error> {
        let len = unit.len();
        if len > self.max_unit_length {
            return Err(self.oversized(len));
        }
        let prefix = u32::try_from(len).map_err(|_| self.oversized(len))?;
        dst.reserve(HEADER_LEN + len);
        dst.put_u8(unit.tag());
        dst.put_u32(prefix);
        dst.put_slice(unit.payload());
        Ok(())
    }
}

/// Inbound half of a transport.
pub type UnitReader = BoxStream<'static, io::Result<Unit>>;

/// Outbound half of a transport.
pub type UnitWriter = Pin<Box<dyn Sink<Unit, Error = io::Error> + Send>>;

/// Buffer settings applied by [`framed`].
#[derive(Clone, Copy, Debug)]
pub struct FramingConfig {
    /// Largest accepted unit payload.
    pub max_unit_length: usize,
    /// Initial read buffer reservation.
    pub read_buffer_capacity: usize,
    /// Bytes buffered before the writer applies back-pressure.
    pub write_buffer_capacity: Option<usize>,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_unit_length: DEFAULT_MAX_UNIT_LENGTH,
            read_buffer_capacity: 8 * 1024,
            write_buffer_capacity: None,
        }
    }
}

/// Frame `io` with [`UnitCodec`] and split it into writer and reader halves.
pub fn framed<T>(io: T, config: FramingConfig) -> (UnitWriter, UnitReader)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let codec = UnitCodec::new(config.max_unit_length);
    let mut framed = Framed::with_capacity(
        io,
        codec,
        config.read_buffer_capacity.min(codec.max_unit_length()),
    );
    if let Some(boundary) = config.write_buffer_capacity {
        framed.set_backpressure_boundary(boundary);
    }
    let (sink, stream) = framed.split();
    (Box::pin(sink), stream.boxed())
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, Bytes, BytesMut};
    use rstest::{fixture, rstest};
    use tokio_util::codec::{Decoder, Encoder};

    use super::{BINARY_TAG, MIN_UNIT_LENGTH, Unit, UnitCodec};

    #[fixture]
    fn codec() -> UnitCodec { UnitCodec::new(128) }

    #[rstest]
    fn partial_units_wait_for_more_bytes(mut codec: UnitCodec) {
        let mut encoded = BytesMut::new();
        codec
            .encode(Unit::Binary(Bytes::from_static(b"abcdef")), &mut encoded)
            .expect("encode");
        let mut buf = BytesMut::from(&encoded[..7]);
        assert!(codec.decode(&mut buf).expect("decode").is_none());
        buf.extend_from_slice(&encoded[7..]);
        assert_eq!(
            codec.decode(&mut buf).expect("decode"),
            Some(Unit::Binary(Bytes::from_static(b"abcdef")))
        );
        assert!(buf.is_empty());
    }

    #[rstest]
    fn oversized_inbound_unit_is_rejected(mut codec: UnitCodec) {
        let mut buf = BytesMut::new();
        buf.put_u8(BINARY_TAG);
        buf.put_u32(129);
        let err = codec.decode(&mut buf).expect_err("limit must be enforced");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[rstest]
    fn oversized_outbound_unit_is_rejected(mut codec: UnitCodec) {
        let mut buf = BytesMut::new();
        let unit = Unit::Text("x".repeat(129));
        assert!(codec.encode(unit, &mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[rstest]
    fn unknown_tag_is_rejected(mut codec: UnitCodec) {
        let mut buf = BytesMut::from(&[0x7f, 0, 0, 0, 0][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[rstest]
    fn invalid_utf8_text_is_rejected(mut codec: UnitCodec) {
        let mut buf = BytesMut::from(&[0x01, 0, 0, 0, 2, 0xff, 0xfe][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[rstest]
    fn limit_is_clamped_to_minimum() {
        assert_eq!(UnitCodec::new(1).max_unit_length(), MIN_UNIT_LENGTH);
    }
}
