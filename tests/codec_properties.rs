//! Property tests for unit framing and the JSON envelope.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};
use wirehop::{
    EnvelopeCodec,
    JsonCodec,
    Message,
    codec::{Unit, UnitCodec},
    envelope::ProtocolError,
};

fn unit() -> impl Strategy<Value = Unit> {
    prop_oneof![
        ".{0,200}".prop_map(Unit::Text),
        proptest::collection::vec(any::<u8>(), 0..200).prop_map(|v| Unit::Binary(Bytes::from(v))),
    ]
}

fn json_payload() -> impl Strategy<Value = Bytes> {
    prop_oneof![
        Just(Bytes::new()),
        Just(Bytes::from_static(b"null")),
        any::<i64>().prop_map(|n| Bytes::from(n.to_string())),
        "[a-z ]{0,16}".prop_map(|s| Bytes::from(serde_json::to_string(&s).expect("string"))),
        Just(Bytes::from_static(br#"{"nested":[1,2,{"k":null}]}"#)),
    ]
}

proptest! {
    #[test]
    fn units_survive_arbitrary_read_boundaries(
        units in proptest::collection::vec(unit(), 1..8),
        chunk in 1usize..32,
    ) {
        let mut codec = UnitCodec::new(1024);
        let mut wire = BytesMut::new();
        for unit in &units {
            codec.encode(unit.clone(), &mut wire).expect("encode");
        }

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(unit) = codec.decode(&mut buf).expect("decode") {
                decoded.push(unit);
            }
        }
        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded, units);
    }

    #[test]
    fn envelopes_are_lossless(
        code in "[A-Z_]{1,12}",
        id in 1u64..,
        in_response_to in any::<u64>(),
        data in json_payload(),
    ) {
        let message = Message { code, id, in_response_to, data };
        let text = JsonCodec.encode(&message).expect("encode");
        prop_assert_eq!(JsonCodec.decode(&text).expect("decode"), message);
    }

    #[test]
    fn padded_payloads_are_refused_rather_than_altered(
        value in json_payload().prop_filter("non-empty", |data| !data.is_empty()),
        padding in "[ \t\r\n]{1,4}",
        leading in any::<bool>(),
    ) {
        let mut data = value.to_vec();
        if leading {
            data.splice(0..0, padding.bytes());
        } else {
            data.extend_from_slice(padding.as_bytes());
        }
        let mut message = Message::new("PAD", data);
        message.id = 1;
        prop_assert!(matches!(
            JsonCodec.encode(&message),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }
}
