//! Byte orders for keys.
//!
//! Every ordered structure in the crate (row sets, handle maps, containers,
//! caches, segments) receives its [`KeyOrder`] explicitly at construction.
//! The order's two-byte signature is written into exported row sets and
//! segment headers so that a reader can reject data sorted under a
//! different order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// The enhanced base64 alphabet used for word and URL hashes.
pub const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

const fn build_rank() -> [u16; 256] {
    // Bytes outside the alphabet rank after every alphabet byte, in byte order.
    let mut rank = [0u16; 256];
    let mut b = 0;
    while b < 256 {
        rank[b] = 64 + b as u16;
        b += 1;
    }
    let mut i = 0;
    while i < 64 {
        rank[BASE64_ALPHABET[i] as usize] = i as u16;
        i += 1;
    }
    rank
}

const BASE64_RANK: [u16; 256] = build_rank();

/// A total order over byte-string keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrder {
    /// Unsigned byte-wise comparison.
    Natural,
    /// Comparison by position in the enhanced base64 alphabet.
    #[default]
    Base64,
}

impl KeyOrder {
    /// Compare two keys. Shorter keys sort first when one is a prefix of the other.
    #[inline]
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyOrder::Natural => a.cmp(b),
            KeyOrder::Base64 => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let rx = BASE64_RANK[*x as usize];
                    let ry = BASE64_RANK[*y as usize];
                    if rx != ry {
                        return rx.cmp(&ry);
                    }
                }
                a.len().cmp(&b.len())
            }
        }
    }

    /// Two-byte signature stored alongside data sorted in this order.
    pub fn signature(&self) -> [u8; 2] {
        match self {
            KeyOrder::Natural => *b"nn",
            KeyOrder::Base64 => *b"be",
        }
    }

    /// Resolve a stored signature.
    pub fn from_signature(signature: [u8; 2]) -> Option<KeyOrder> {
        match &signature {
            b"nn" => Some(KeyOrder::Natural),
            b"be" => Some(KeyOrder::Base64),
            _ => None,
        }
    }

    /// Whether `keys` is strictly ascending in this order.
    pub fn is_strictly_ascending<'a, I>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut previous: Option<&[u8]> = None;
        for key in keys {
            if let Some(prev) = previous {
                if self.compare(prev, key) != Ordering::Less {
                    return false;
                }
            }
            previous = Some(key);
        }
        true
    }
}
