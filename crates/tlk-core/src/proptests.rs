#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tlk_crypto::varint::KeyIdEncoding;

    use crate::cipher::{open_v2, seal_v2, OpenContext, Payload, SealContext};
    use crate::message::{E2eeMessage, RawMessage, SpecVersion, CONTENT_TYPE_TEXT};
    use crate::types::RecipientKind;

    fn key_id_encoding() -> impl Strategy<Value = KeyIdEncoding> {
        prop_oneof![Just(KeyIdEncoding::Fixed), Just(KeyIdEncoding::Compact)]
    }

    proptest! {
        #[test]
        fn test_text_round_trip_through_wire_message(
            shared in any::<[u8; 32]>(),
            text in ".*",
            sender_key_id in any::<i32>(),
            receiver_key_id in any::<i32>(),
            encoding in key_id_encoding(),
        ) {
            let payload = Payload::text(text);
            let seal = SealContext {
                recipient_id: "ubob",
                sender_id: "ualice",
                sender_key_id,
                receiver_key_id,
                content_type: CONTENT_TYPE_TEXT,
                key_id_encoding: encoding,
            };
            let envelope = seal_v2(&shared, &seal, &payload).unwrap();

            let raw = RawMessage::outgoing(
                "ualice",
                "ubob",
                RecipientKind::Individual,
                CONTENT_TYPE_TEXT,
                SpecVersion::V2,
                envelope,
            );
            let message = E2eeMessage::try_from(raw).unwrap();
            let (sender, receiver) = message.envelope.key_ids(encoding).unwrap();
            prop_assert_eq!((sender, receiver), (sender_key_id, receiver_key_id));

            let open = OpenContext {
                recipient_id: &message.recipient_id,
                sender_id: &message.sender_id,
                sender_key_id: sender,
                receiver_key_id: receiver,
                content_type: message.content_type,
            };
            prop_assert_eq!(open_v2(&shared, &open, &message.envelope).unwrap(), payload);
        }

        #[test]
        fn test_other_key_id_fails_to_open(
            shared in any::<[u8; 32]>(),
            text in ".{0,64}",
            receiver_key_id in any::<i32>(),
            delta in 1i32..1000,
        ) {
            let payload = Payload::text(text);
            let seal = SealContext {
                recipient_id: "ubob",
                sender_id: "ualice",
                sender_key_id: 1,
                receiver_key_id,
                content_type: CONTENT_TYPE_TEXT,
                key_id_encoding: KeyIdEncoding::Fixed,
            };
            let envelope = seal_v2(&shared, &seal, &payload).unwrap();

            let open = OpenContext {
                recipient_id: "ubob",
                sender_id: "ualice",
                sender_key_id: 1,
                receiver_key_id: receiver_key_id.wrapping_add(delta),
                content_type: CONTENT_TYPE_TEXT,
            };
            prop_assert!(open_v2(&shared, &open, &envelope).is_err());
        }
    }
}
