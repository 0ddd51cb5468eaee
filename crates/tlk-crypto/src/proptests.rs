#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::aad::AadFields;
    use crate::cipher::{cbc_decrypt, cbc_encrypt, gcm_open, gcm_seal};
    use crate::kdf::{derive_key, fold_half, KeyLabel, SymmetricKey};
    use crate::varint::{decode_i32, encode_i32, KeyIdEncoding};

    proptest! {
        #[test]
        fn test_fold_half_length_and_determinism(data in any::<Vec<u8>>()) {
            let a = fold_half(&data);
            let b = fold_half(&data);
            prop_assert_eq!(a.len(), data.len() / 2);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn test_folded_digest_is_16_bytes(data in any::<Vec<u8>>()) {
            let digest = derive_key(&[&data], KeyLabel::Iv);
            prop_assert_eq!(fold_half(&digest).len(), 16);
        }

        #[test]
        fn test_varint_round_trip(n in any::<i32>()) {
            let enc = encode_i32(n);
            prop_assert!(!enc.is_empty() && enc.len() <= 5);
            prop_assert_eq!(decode_i32(&enc).unwrap(), n);
            prop_assert_eq!(KeyIdEncoding::Fixed.decode(&KeyIdEncoding::Fixed.encode(n)).unwrap(), n);
        }

        #[test]
        fn test_gcm_round_trip(
            shared in any::<[u8; 32]>(),
            salt in any::<[u8; 16]>(),
            nonce in any::<[u8; 16]>(),
            text in ".*",
        ) {
            let sk = SymmetricKey::derive(&shared, &salt);
            let aad = AadFields::new(b"c1", b"u2", 7, 9).to_bytes();
            let sealed = gcm_seal(sk.key(), &nonce, &aad, text.as_bytes()).unwrap();
            let opened = gcm_open(sk.key(), &nonce, &aad, &sealed).unwrap();
            prop_assert_eq!(opened, text.as_bytes().to_vec());
        }

        #[test]
        fn test_gcm_detects_any_aad_byte_flip(
            idx in 0usize..20,
            bit in 0u8..8,
        ) {
            let key = [0x11u8; 32];
            let nonce = [0x22u8; 16];
            let aad = AadFields::new(b"c1", b"u2", 7, 9).to_bytes();
            let sealed = gcm_seal(&key, &nonce, &aad, b"{\"text\":\"x\"}").unwrap();
            let mut tampered = aad.clone();
            tampered[idx] ^= 1 << bit;
            prop_assert!(gcm_open(&key, &nonce, &tampered, &sealed).is_err());
        }

        #[test]
        fn test_cbc_round_trip(
            key in any::<[u8; 32]>(),
            iv in any::<[u8; 16]>(),
            data in any::<Vec<u8>>(),
        ) {
            let ct = cbc_encrypt(&key, &iv, &data).unwrap();
            prop_assert_eq!(ct.len() % 16, 0);
            prop_assert_eq!(cbc_decrypt(&key, &iv, &ct).unwrap(), data);
        }
    }
}
