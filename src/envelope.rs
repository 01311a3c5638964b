//! Envelope codecs.
//!
//! An [`EnvelopeCodec`] turns a [`Message`] into the text carried by a
//! control-class unit and back. [`JsonCodec`] is the default; applications may
//! plug in another text format through
//! [`SocketBuilder::codec`](crate::config::SocketBuilder::codec).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::{error::HandlerError, message::Message};

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A binary unit arrived where a text unit was required.
    #[error("expected a text unit, received binary")]
    UnexpectedBinary,
    /// The envelope could not be encoded.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] HandlerError),
    /// The text did not contain a well-formed envelope.
    #[error("malformed envelope: {0}")]
    Decode(#[source] HandlerError),
    /// The payload is not valid for the envelope format.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[source] HandlerError),
}

/// Encodes and decodes [`Message`] envelopes.
///
/// Implementations must be lossless: decoding the output of
/// [`EnvelopeCodec::encode`] yields a message equal to the input.
pub trait EnvelopeCodec: Send + Sync + 'static {
    /// Encode `message` into the text of a control-class unit.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the message cannot be represented.
    fn encode(&self, message: &Message) -> Result<String, ProtocolError>;

    /// Decode a control-class unit into a message.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if `text` is not a valid envelope.
    fn decode(&self, text: &str) -> Result<Message, ProtocolError>;
}

/// JSON envelope codec.
///
/// The payload is embedded verbatim as the `data` member, so it must itself be
/// a JSON document with no surrounding whitespace. An empty payload omits
/// `data` entirely; a `null` payload is carried as `"data":null`.
///
/// ```
/// use wirehop::{
///     envelope::{EnvelopeCodec, JsonCodec},
///     message::Message,
/// };
///
/// let mut message = Message::new("PING", r#"{"seq":1}"#);
/// message.id = 3;
/// let text = JsonCodec.encode(&message).expect("encode");
/// assert_eq!(text, r#"{"code":"PING","id":3,"in_response_to":0,"data":{"seq":1}}"#);
/// assert_eq!(JsonCodec.decode(&text).expect("decode"), message);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    code: &'a str,
    id: u64,
    in_response_to: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a RawValue>,
}

#[derive(Deserialize)]
struct InboundEnvelope {
    code: String,
    id: u64,
    #[serde(default)]
    in_response_to: u64,
    #[serde(default, deserialize_with = "raw_data")]
    data: Option<Box<RawValue>>,
}

/// Capture `data` verbatim, keeping a literal `null` rather than mapping it to
/// an absent payload.
fn raw_data<'de, D>(deserializer: D) -> Result<Option<Box<RawValue>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

/// Borrow `data` as a raw JSON value, rejecting anything that would not come
/// back byte for byte.
fn embeddable(data: &[u8]) -> Result<&RawValue, ProtocolError> {
    let text = std::str::from_utf8(data).map_err(|e| ProtocolError::InvalidPayload(e.into()))?;
    let raw: &RawValue =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidPayload(e.into()))?;
    if raw.get().len() != text.len() {
        return Err(ProtocolError::InvalidPayload(
            "payload has surrounding whitespace".into(),
        ));
    }
    Ok(raw)
}

impl EnvelopeCodec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<String, ProtocolError> {
        let data = if message.data.is_empty() {
            None
        } else {
            Some(embeddable(&message.data)?)
        };
        let envelope = OutboundEnvelope {
            code: &message.code,
            id: message.id,
            in_response_to: message.in_response_to,
            data,
        };
        serde_json::to_string(&envelope).map_err(|e| ProtocolError::Encode(e.into()))
    }

    fn decode(&self, text: &str) -> Result<Message, ProtocolError> {
        let envelope: InboundEnvelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.into()))?;
        let data = envelope
            .data
            .map(|raw| Bytes::copy_from_slice(raw.get().as_bytes()))
            .unwrap_or_default();
        Ok(Message {
            code: envelope.code,
            id: envelope.id,
            in_response_to: envelope.in_response_to,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{EnvelopeCodec, JsonCodec, ProtocolError};
    use crate::message::Message;

    #[rstest]
    fn empty_payload_omits_data_member() {
        let mut message = Message::new("PING", "");
        message.id = 1;
        let text = JsonCodec.encode(&message).expect("encode");
        assert_eq!(text, r#"{"code":"PING","id":1,"in_response_to":0}"#);
        assert_eq!(JsonCodec.decode(&text).expect("decode"), message);
    }

    #[rstest]
    fn null_data_is_kept() {
        let message = JsonCodec
            .decode(r#"{"code":"X","id":4,"in_response_to":2,"data":null}"#)
            .expect("decode");
        assert_eq!(message.data, "null");
        assert_eq!(message.in_response_to, 2);
    }

    #[rstest]
    fn unit_payload_round_trips() {
        let mut message = Message::with_payload("PING", &()).expect("payload");
        message.id = 1;
        let text = JsonCodec.encode(&message).expect("encode");
        assert_eq!(text, r#"{"code":"PING","id":1,"in_response_to":0,"data":null}"#);
        assert_eq!(JsonCodec.decode(&text).expect("decode"), message);
    }

    #[rstest]
    #[case(" 1")]
    #[case("[1,2]\n")]
    #[case("\t{}")]
    fn padded_payload_is_rejected(#[case] data: &'static str) {
        let message = Message::new("PAD", data);
        assert!(matches!(
            JsonCodec.encode(&message),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }

    #[rstest]
    #[case("not json")]
    #[case(r#"{"code":"X"}"#)]
    #[case(r#"{"id":1}"#)]
    fn malformed_envelopes_are_rejected(#[case] text: &str) {
        assert!(matches!(JsonCodec.decode(text), Err(ProtocolError::Decode(_))));
    }

    #[rstest]
    fn non_json_payload_cannot_be_embedded() {
        let message = Message::new("RAW", "plain text");
        assert!(matches!(
            JsonCodec.encode(&message),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }
}
