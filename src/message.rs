//! The message envelope exchanged in text units.
//!
//! A [`Message`] carries a routing `code`, the sender-assigned `id`, the id of
//! the request it answers (`0` when it is not a response) and an opaque,
//! pre-serialized payload.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::envelope::ProtocolError;

/// Envelope routed by the dispatch loop.
///
/// # Examples
///
/// ```
/// use wirehop::message::Message;
///
/// let message = Message::with_payload("PING", &42u32).expect("encode payload");
/// assert_eq!(message.code, "PING");
/// assert_eq!(message.payload::<u32>().expect("decode payload"), 42);
/// assert!(!message.is_response());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Routing code used to select a hook.
    pub code: String,
    /// Identifier assigned by the sending socket. Never zero once sent.
    pub id: u64,
    /// Identifier of the request this message answers, or `0`.
    pub in_response_to: u64,
    /// Pre-serialized payload. Empty means no payload.
    pub data: Bytes,
}

impl Message {
    /// Create a message from a code and raw, already serialized payload bytes.
    #[must_use]
    pub fn new(code: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            code: code.into(),
            id: 0,
            in_response_to: 0,
            data: data.into(),
        }
    }

    /// Create a message whose payload is `value` serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] if `value` cannot be
    /// serialized.
    pub fn with_payload<T>(code: impl Into<String>, value: &T) -> Result<Self, ProtocolError>
    where
        T: Serialize + ?Sized,
    {
        let data =
            serde_json::to_vec(value).map_err(|e| ProtocolError::InvalidPayload(e.into()))?;
        Ok(Self::new(code, data))
    }

    /// Deserialize the payload. An empty payload reads as JSON `null`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] if the payload does not decode
    /// into `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let data: &[u8] = if self.data.is_empty() { b"null" } else { &self.data };
        serde_json::from_slice(data).map_err(|e| ProtocolError::InvalidPayload(e.into()))
    }

    /// Mark this message as the response to `request_id`.
    #[must_use]
    pub fn in_reply_to(mut self, request_id: u64) -> Self {
        self.in_response_to = request_id;
        self
    }

    /// Returns true if this message answers an earlier request.
    #[must_use]
    pub const fn is_response(&self) -> bool { self.in_response_to != 0 }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::Message;

    #[rstest]
    fn reply_marks_message_as_response() {
        let message = Message::new("PONG", "1").in_reply_to(7);
        assert!(message.is_response());
        assert_eq!(message.in_response_to, 7);
    }

    #[rstest]
    fn payload_type_mismatch_is_reported() {
        let message = Message::with_payload("PING", "text").expect("encode payload");
        assert!(message.payload::<u64>().is_err());
    }

    #[rstest]
    fn empty_payload_reads_as_null() {
        let message = Message::new("PING", "");
        assert_eq!(message.payload::<Option<u32>>().expect("decode payload"), None);
        message.payload::<()>().expect("unit payload");
    }
}
