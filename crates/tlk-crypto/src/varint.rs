//! Zigzag varints and the two key-id encodings carried in message chunks.

use prost::encoding::{decode_varint, encode_varint};

use crate::error::CryptoError;

/// Longest varint of a 32-bit value.
const MAX_VARINT32_LEN: usize = 5;

pub fn zigzag_encode_i32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

pub fn zigzag_decode_i32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// Read a varint of at most 32 bits; returns the value and the number of bytes consumed.
pub fn read_varint_u32(input: &[u8]) -> Result<(u32, usize), CryptoError> {
    let mut buf = input;
    let value = decode_varint(&mut buf).map_err(|_| CryptoError::Varint("truncated"))?;
    let used = input.len() - buf.len();
    if used > MAX_VARINT32_LEN {
        return Err(CryptoError::Varint("too long"));
    }
    let value = u32::try_from(value).map_err(|_| CryptoError::Varint("value exceeds 32 bits"))?;
    Ok((value, used))
}

/// Compact-protocol i32: zigzag then varint.
pub fn encode_i32(n: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAX_VARINT32_LEN);
    encode_varint(u64::from(zigzag_encode_i32(n)), &mut out);
    out
}

/// Decode a compact-protocol i32 that must span all of `input`.
pub fn decode_i32(input: &[u8]) -> Result<i32, CryptoError> {
    let (raw, used) = read_varint_u32(input)?;
    if used != input.len() {
        return Err(CryptoError::Varint("trailing bytes"));
    }
    Ok(zigzag_decode_i32(raw))
}

/// How key ids are written into the sender/receiver key-id chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyIdEncoding {
    /// 4-byte big-endian.
    #[default]
    Fixed,
    /// Zigzag varint.
    Compact,
}

impl KeyIdEncoding {
    pub fn from_compact_flag(compact: bool) -> Self {
        if compact {
            KeyIdEncoding::Compact
        } else {
            KeyIdEncoding::Fixed
        }
    }

    pub fn encode(self, key_id: i32) -> Vec<u8> {
        match self {
            KeyIdEncoding::Fixed => key_id.to_be_bytes().to_vec(),
            KeyIdEncoding::Compact => encode_i32(key_id),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<i32, CryptoError> {
        match self {
            KeyIdEncoding::Fixed => {
                let arr: [u8; 4] = bytes
                    .try_into()
                    .map_err(|_| CryptoError::KeyIdLength { got: bytes.len() })?;
                Ok(i32::from_be_bytes(arr))
            }
            KeyIdEncoding::Compact => decode_i32(bytes),
        }
    }
}
