//! Binary encodings for postings and keyed records.
//!
//! - [`cardinal`]: big-endian base-256 integers of fixed width
//! - [`base64`]: the enhanced base64 alphabet used for hashes
//! - [`row`]: column layouts of fixed-width rows
//! - [`posting`]: the 40-byte [`PostingEntry`](posting::PostingEntry)
//! - [`handle`]: `(key, cardinal)` rows used by handle maps

use crate::error::{Result, RwiError};

pub mod base64;
pub mod cardinal;
pub mod handle;
pub mod posting;
pub mod row;

pub use handle::HandleRow;
pub use posting::{AppearanceFlags, PostingEntry, POSTING_SIZE};
pub use row::{Column, Encoding, RowDef};

/// Length of word hashes and URL hashes.
pub const HASH_LEN: usize = 12;

/// Hash identifying an indexed term.
pub type WordHash = [u8; HASH_LEN];

/// Hash identifying a document URL.
pub type UrlHash = [u8; HASH_LEN];

/// Build a hash from a 12-character string.
pub fn hash_from_str(value: &str) -> Result<[u8; HASH_LEN]> {
    let bytes = value.as_bytes();
    <[u8; HASH_LEN]>::try_from(bytes).map_err(|_| {
        RwiError::invalid_argument(format!(
            "hash must be {HASH_LEN} bytes, got {} in {value:?}",
            bytes.len()
        ))
    })
}

/// Build a base64 hash whose order matches the numeric order of `value`.
pub fn hash_from_u64(value: u64) -> [u8; HASH_LEN] {
    let mut hash = [0u8; HASH_LEN];
    hash.copy_from_slice(&base64::encode_long(value, HASH_LEN));
    hash
}

/// Render a hash for log messages.
pub fn hash_to_string(hash: &[u8]) -> String {
    String::from_utf8_lossy(hash).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::KeyOrder;

    #[test]
    fn test_hash_from_str() {
        assert_eq!(&hash_from_str("abc000000001").unwrap(), b"abc000000001");
        assert!(hash_from_str("short").is_err());
    }

    #[test]
    fn test_hash_from_u64_is_ordered() {
        let order = KeyOrder::Base64;
        let mut previous = hash_from_u64(0);
        for value in [1u64, 63, 64, 4095, 1 << 30, u64::MAX >> 2] {
            let current = hash_from_u64(value);
            assert!(order.compare(&previous, &current).is_lt());
            previous = current;
        }
    }
}
