//! Additional authenticated data for spec v2 messages.

use bytes::{BufMut, BytesMut};

/// Spec version bound into the AAD when the caller does not name one.
pub const DEFAULT_SPEC_VERSION: u32 = 2;

/// Content type bound into the AAD when the caller does not name one (text).
pub const DEFAULT_CONTENT_TYPE: u32 = 0;

/// Fields bound into the GCM tag. Ids are raw bytes, everything else u32 BE.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AadFields<'a> {
    pub recipient_id: &'a [u8],
    pub sender_id: &'a [u8],
    pub sender_key_id: u32,
    pub receiver_key_id: u32,
    pub spec_version: u32,
    pub content_type: u32,
}

impl<'a> AadFields<'a> {
    /// Fields with the default spec version and content type.
    pub fn new(
        recipient_id: &'a [u8],
        sender_id: &'a [u8],
        sender_key_id: u32,
        receiver_key_id: u32,
    ) -> Self {
        Self {
            recipient_id,
            sender_id,
            sender_key_id,
            receiver_key_id,
            spec_version: DEFAULT_SPEC_VERSION,
            content_type: DEFAULT_CONTENT_TYPE,
        }
    }

    pub fn with_spec_version(mut self, spec_version: u32) -> Self {
        self.spec_version = spec_version;
        self
    }

    pub fn with_content_type(mut self, content_type: u32) -> Self {
        self.content_type = content_type;
        self
    }

    /// recipient || sender || senderKeyId || receiverKeyId || specVersion || contentType
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf =
            BytesMut::with_capacity(self.recipient_id.len() + self.sender_id.len() + 16);
        buf.extend_from_slice(self.recipient_id);
        buf.extend_from_slice(self.sender_id);
        buf.put_u32(self.sender_key_id);
        buf.put_u32(self.receiver_key_id);
        buf.put_u32(self.spec_version);
        buf.put_u32(self.content_type);
        buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aad_layout() {
        let aad = AadFields::new(b"cRECIP", b"uSENDER", 1, 2).to_bytes();
        assert_eq!(
            hex::encode(&aad),
            "6352454349507553454e44455200000001000000020000000200000000"
        );
    }

    #[test]
    fn test_aad_overrides() {
        let aad = AadFields::new(b"a", b"b", 0, 0)
            .with_spec_version(1)
            .with_content_type(15)
            .to_bytes();
        assert_eq!(&aad[..2], b"ab");
        assert_eq!(&aad[10..14], &[0, 0, 0, 1]);
        assert_eq!(&aad[14..18], &[0, 0, 0, 15]);
    }
}
