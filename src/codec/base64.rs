//! Enhanced base64 (`A-Za-z0-9-_`) encoding of integers.

use crate::error::{Result, RwiError};
use crate::order::BASE64_ALPHABET;

fn digit(byte: u8) -> Option<u64> {
    match byte {
        b'A'..=b'Z' => Some(u64::from(byte - b'A')),
        b'a'..=b'z' => Some(u64::from(byte - b'a') + 26),
        b'0'..=b'9' => Some(u64::from(byte - b'0') + 52),
        b'-' => Some(62),
        b'_' => Some(63),
        _ => None,
    }
}

/// Encode the low `6 * length` bits of `value`, most significant digit first.
pub fn encode_long(value: u64, length: usize) -> Vec<u8> {
    let mut out = vec![BASE64_ALPHABET[0]; length];
    let mut rest = value;
    for slot in out.iter_mut().rev() {
        *slot = BASE64_ALPHABET[(rest & 0x3f) as usize];
        rest >>= 6;
    }
    out
}

/// Decode digits written by [`encode_long`].
pub fn decode_long(digits: &[u8]) -> Result<u64> {
    let mut value = 0u64;
    for &b in digits {
        let d = digit(b).ok_or_else(|| {
            RwiError::decode(format!("byte {b:#04x} is not an enhanced base64 digit"))
        })?;
        value = (value << 6) | d;
    }
    Ok(value)
}

/// Whether every byte is an enhanced base64 digit.
pub fn is_base64(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| digit(*b).is_some())
}
