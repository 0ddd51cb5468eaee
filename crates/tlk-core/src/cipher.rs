//! Message payload encryption for spec v1 and spec v2.
//!
//! Both versions derive their AES key from the X25519 shared secret and a
//! random 16-byte salt. Spec v2 seals the JSON payload with AES-256-GCM and
//! binds the routing metadata as AAD. Spec v1 uses AES-CBC and carries no
//! authentication at all.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tlk_crypto::aad::AadFields;
use tlk_crypto::cipher::{cbc_decrypt, cbc_encrypt, gcm_open, gcm_seal, random_array};
use tlk_crypto::kdf::SymmetricKey;
use tlk_crypto::varint::KeyIdEncoding;
use tlk_crypto::CryptoError;

use crate::errors::E2eeError;
use crate::message::{EncryptedEnvelope, SpecVersion, CONTENT_TYPE_LOCATION};

/// Shared location as carried in the encrypted payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// Members this client does not interpret, kept as received
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decrypted message content.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Location(Location),
}

impl Payload {
    pub fn text(s: impl Into<String>) -> Self {
        Payload::Text(s.into())
    }

    /// Content type this payload travels under.
    pub fn content_type(&self) -> i32 {
        match self {
            Payload::Text(_) => crate::message::CONTENT_TYPE_TEXT,
            Payload::Location(_) => CONTENT_TYPE_LOCATION,
        }
    }

    /// `{"text": ..}` or `{"location": ..}`
    pub fn to_json(&self) -> Result<Vec<u8>, E2eeError> {
        let body = match self {
            Payload::Text(text) => serde_json::json!({ "text": text }),
            Payload::Location(location) => serde_json::json!({ "location": location }),
        };
        serde_json::to_vec(&body).map_err(|e| E2eeError::malformed(format!("payload encoding: {}", e)))
    }

    /// Parse a decrypted body according to the message content type.
    pub fn from_json(bytes: &[u8], content_type: i32) -> Result<Self, E2eeError> {
        let mut body: Map<String, Value> = serde_json::from_slice(bytes)
            .map_err(|e| E2eeError::malformed(format!("payload is not a JSON object: {}", e)))?;

        if content_type == CONTENT_TYPE_LOCATION {
            let location = body
                .remove("location")
                .filter(|v| !v.is_null())
                .ok_or_else(|| E2eeError::malformed("location payload without location"))?;
            let location = serde_json::from_value(location)
                .map_err(|e| E2eeError::malformed(format!("location: {}", e)))?;
            return Ok(Payload::Location(location));
        }

        // A text message without text decodes as empty
        let text = match body.remove("text") {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(_) => return Err(E2eeError::malformed("text member is not a string")),
        };
        Ok(Payload::Text(text))
    }
}

/// Routing metadata of a message being sealed.
#[derive(Debug, Clone, Copy)]
pub struct SealContext<'a> {
    pub recipient_id: &'a str,
    pub sender_id: &'a str,
    pub sender_key_id: i32,
    pub receiver_key_id: i32,
    pub content_type: i32,
    pub key_id_encoding: KeyIdEncoding,
}

impl<'a> SealContext<'a> {
    fn aad(&self, spec_version: SpecVersion) -> Vec<u8> {
        aad_bytes(
            self.recipient_id,
            self.sender_id,
            self.sender_key_id,
            self.receiver_key_id,
            spec_version,
            self.content_type,
        )
    }

    fn envelope(&self, salt: [u8; 16], ciphertext: Vec<u8>, nonce: [u8; 16]) -> EncryptedEnvelope {
        EncryptedEnvelope {
            salt,
            ciphertext,
            nonce,
            sender_key_id: self.key_id_encoding.encode(self.sender_key_id),
            receiver_key_id: self.key_id_encoding.encode(self.receiver_key_id),
        }
    }
}

/// Routing metadata of a message being opened.
#[derive(Debug, Clone, Copy)]
pub struct OpenContext<'a> {
    pub recipient_id: &'a str,
    pub sender_id: &'a str,
    pub sender_key_id: i32,
    pub receiver_key_id: i32,
    pub content_type: i32,
}

fn aad_bytes(
    recipient_id: &str,
    sender_id: &str,
    sender_key_id: i32,
    receiver_key_id: i32,
    spec_version: SpecVersion,
    content_type: i32,
) -> Vec<u8> {
    // Key ids and content type are bound as their u32 bit patterns
    AadFields::new(
        recipient_id.as_bytes(),
        sender_id.as_bytes(),
        sender_key_id as u32,
        receiver_key_id as u32,
    )
    .with_spec_version(spec_version.as_u32())
    .with_content_type(content_type as u32)
    .to_bytes()
}

fn check_content_type(payload: &Payload, content_type: i32) -> Result<(), E2eeError> {
    let is_location = content_type == CONTENT_TYPE_LOCATION;
    if is_location != matches!(payload, Payload::Location(_)) {
        return Err(E2eeError::malformed(format!(
            "content type {} does not match payload",
            content_type
        )));
    }
    Ok(())
}

/// Encrypt a payload as a spec v2 message.
pub fn seal_v2(
    shared_secret: &[u8],
    ctx: &SealContext<'_>,
    payload: &Payload,
) -> Result<EncryptedEnvelope, E2eeError> {
    check_content_type(payload, ctx.content_type)?;
    let salt: [u8; 16] = random_array()?;
    let nonce: [u8; 16] = random_array()?;
    let key = SymmetricKey::derive(shared_secret, &salt);

    let ciphertext = gcm_seal(key.key(), &nonce, &ctx.aad(SpecVersion::V2), &payload.to_json()?)?;
    Ok(ctx.envelope(salt, ciphertext, nonce))
}

/// Verify and decrypt a spec v2 message.
pub fn open_v2(
    shared_secret: &[u8],
    ctx: &OpenContext<'_>,
    envelope: &EncryptedEnvelope,
) -> Result<Payload, E2eeError> {
    let key = SymmetricKey::derive(shared_secret, &envelope.salt);
    let aad = aad_bytes(
        ctx.recipient_id,
        ctx.sender_id,
        ctx.sender_key_id,
        ctx.receiver_key_id,
        SpecVersion::V2,
        ctx.content_type,
    );

    let plaintext = gcm_open(key.key(), &envelope.nonce, &aad, &envelope.ciphertext).map_err(|e| match e {
        CryptoError::AuthenticationFailed => E2eeError::IntegrityFailure,
        other => E2eeError::Crypto(other),
    })?;
    Payload::from_json(&plaintext, ctx.content_type)
}

/// Encrypt a payload as a legacy spec v1 message.
pub fn seal_v1(
    shared_secret: &[u8],
    ctx: &SealContext<'_>,
    payload: &Payload,
) -> Result<EncryptedEnvelope, E2eeError> {
    check_content_type(payload, ctx.content_type)?;
    let salt: [u8; 16] = random_array()?;
    let filler: [u8; 16] = random_array()?;
    let key = SymmetricKey::derive(shared_secret, &salt);

    let ciphertext = cbc_encrypt(key.key(), key.iv(), &payload.to_json()?)?;
    Ok(ctx.envelope(salt, ciphertext, filler))
}

/// Decrypt a legacy spec v1 message. Nothing about the result is authenticated.
pub fn open_v1(
    shared_secret: &[u8],
    content_type: i32,
    envelope: &EncryptedEnvelope,
) -> Result<Payload, E2eeError> {
    let key = SymmetricKey::derive(shared_secret, &envelope.salt);
    let plaintext = cbc_decrypt(key.key(), key.iv(), &envelope.ciphertext)?;
    Payload::from_json(&plaintext, content_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CONTENT_TYPE_TEXT;

    const SHARED: [u8; 32] = [0x42; 32];

    fn seal_ctx(content_type: i32) -> SealContext<'static> {
        SealContext {
            recipient_id: "ubob",
            sender_id: "ualice",
            sender_key_id: 3,
            receiver_key_id: 9,
            content_type,
            key_id_encoding: KeyIdEncoding::Fixed,
        }
    }

    fn open_ctx(content_type: i32) -> OpenContext<'static> {
        OpenContext {
            recipient_id: "ubob",
            sender_id: "ualice",
            sender_key_id: 3,
            receiver_key_id: 9,
            content_type,
        }
    }

    #[test]
    fn test_v2_round_trip() {
        let payload = Payload::text("hello bob");
        let env = seal_v2(&SHARED, &seal_ctx(CONTENT_TYPE_TEXT), &payload).unwrap();
        assert_eq!(env.ciphertext.len(), br#"{"text":"hello bob"}"#.len() + 16);
        assert_eq!(env.sender_key_id, vec![0, 0, 0, 3]);

        let opened = open_v2(&SHARED, &open_ctx(CONTENT_TYPE_TEXT), &env).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn test_v2_fresh_salt_and_nonce() {
        let payload = Payload::text("same");
        let a = seal_v2(&SHARED, &seal_ctx(CONTENT_TYPE_TEXT), &payload).unwrap();
        let b = seal_v2(&SHARED, &seal_ctx(CONTENT_TYPE_TEXT), &payload).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_v2_aad_tamper_is_integrity_failure() {
        let env = seal_v2(&SHARED, &seal_ctx(CONTENT_TYPE_TEXT), &Payload::text("x")).unwrap();

        let tampered = [
            OpenContext { recipient_id: "ueve", ..open_ctx(CONTENT_TYPE_TEXT) },
            OpenContext { sender_id: "ueve", ..open_ctx(CONTENT_TYPE_TEXT) },
            OpenContext { sender_key_id: 4, ..open_ctx(CONTENT_TYPE_TEXT) },
            OpenContext { receiver_key_id: 10, ..open_ctx(CONTENT_TYPE_TEXT) },
            OpenContext { content_type: 1, ..open_ctx(CONTENT_TYPE_TEXT) },
        ];
        for ctx in &tampered {
            assert!(matches!(open_v2(&SHARED, ctx, &env), Err(E2eeError::IntegrityFailure)));
        }
    }

    #[test]
    fn test_v2_spec_version_is_bound() {
        // A tag computed over spec version 1 must not verify as spec version 2
        let ctx = seal_ctx(CONTENT_TYPE_TEXT);
        let salt = [5u8; 16];
        let nonce = [6u8; 16];
        let key = SymmetricKey::derive(&SHARED, &salt);
        let ciphertext =
            gcm_seal(key.key(), &nonce, &ctx.aad(SpecVersion::V1), br#"{"text":"x"}"#).unwrap();
        let env = ctx.envelope(salt, ciphertext, nonce);

        assert!(matches!(
            open_v2(&SHARED, &open_ctx(CONTENT_TYPE_TEXT), &env),
            Err(E2eeError::IntegrityFailure)
        ));
    }

    #[test]
    fn test_v2_ciphertext_tamper() {
        let mut env = seal_v2(&SHARED, &seal_ctx(CONTENT_TYPE_TEXT), &Payload::text("x")).unwrap();
        env.ciphertext[0] ^= 0x80;
        assert!(matches!(
            open_v2(&SHARED, &open_ctx(CONTENT_TYPE_TEXT), &env),
            Err(E2eeError::IntegrityFailure)
        ));
    }

    #[test]
    fn test_location_round_trip() {
        let location = Location {
            title: Some("Station".to_string()),
            latitude: 35.681,
            longitude: 139.767,
            ..Default::default()
        };
        let payload = Payload::Location(location);
        let env = seal_v2(&SHARED, &seal_ctx(CONTENT_TYPE_LOCATION), &payload).unwrap();
        let opened = open_v2(&SHARED, &open_ctx(CONTENT_TYPE_LOCATION), &env).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn test_content_type_must_match_payload() {
        let result = seal_v2(&SHARED, &seal_ctx(CONTENT_TYPE_LOCATION), &Payload::text("x"));
        assert!(matches!(result, Err(E2eeError::MalformedMessage(_))));
    }

    #[test]
    fn test_payload_defaults() {
        assert_eq!(
            Payload::from_json(br#"{"other":1}"#, CONTENT_TYPE_TEXT).unwrap(),
            Payload::text("")
        );
        assert!(matches!(
            Payload::from_json(br#"{"text":"x"}"#, CONTENT_TYPE_LOCATION),
            Err(E2eeError::MalformedMessage(_))
        ));
        assert!(Payload::from_json(b"[1,2]", CONTENT_TYPE_TEXT).is_err());
    }

    #[test]
    fn test_location_keeps_unknown_members() {
        let body = br#"{"location":{"latitude":1.5,"longitude":2.5,"provider":"GOOGLE"}}"#;
        let Payload::Location(location) = Payload::from_json(body, CONTENT_TYPE_LOCATION).unwrap() else {
            panic!("expected location");
        };
        assert_eq!(location.extra.get("provider"), Some(&Value::String("GOOGLE".to_string())));
    }

    #[test]
    fn test_v1_known_answer() {
        let shared: Vec<u8> = (0u8..32).collect();
        let mut salt = [0u8; 16];
        for (i, b) in salt.iter_mut().enumerate() {
            *b = 0x10 + i as u8;
        }
        let env = EncryptedEnvelope {
            salt,
            ciphertext: hex::decode("02eef36f3e4f66b2ff1a03e93a79aca3").unwrap(),
            nonce: [0u8; 16],
            sender_key_id: vec![0, 0, 0, 1],
            receiver_key_id: vec![0, 0, 0, 2],
        };
        assert_eq!(open_v1(&shared, CONTENT_TYPE_TEXT, &env).unwrap(), Payload::text("hi"));
    }

    #[test]
    fn test_v1_round_trip() {
        let payload = Payload::text("legacy");
        let env = seal_v1(&SHARED, &seal_ctx(CONTENT_TYPE_TEXT), &payload).unwrap();
        assert_eq!(env.ciphertext.len() % 16, 0);
        assert_eq!(open_v1(&SHARED, CONTENT_TYPE_TEXT, &env).unwrap(), payload);
    }
}
