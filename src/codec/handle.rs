//! `(key, value)` rows for handle maps.
//!
//! The key is stored verbatim, the value as a base-256 cardinal.

use crate::codec::cardinal::{decode_b256, encode_b256, max_value};

/// Layout of a handle row: `key_len` key bytes followed by `value_len` value bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRow {
    key_len: usize,
    value_len: usize,
}

impl HandleRow {
    /// Create a handle layout. Values wider than 8 bytes are not supported.
    pub fn new(key_len: usize, value_len: usize) -> Self {
        debug_assert!(value_len <= 8, "handle values are at most 8 bytes");
        HandleRow { key_len, value_len }
    }

    /// Key width.
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// Value width.
    pub fn value_len(&self) -> usize {
        self.value_len
    }

    /// Row width.
    pub fn row_width(&self) -> usize {
        self.key_len + self.value_len
    }

    /// Largest storable value.
    pub fn max_value(&self) -> u64 {
        max_value(self.value_len)
    }

    /// Encode a row. Short keys are zero padded.
    pub fn encode(&self, key: &[u8], value: u64) -> Vec<u8> {
        let mut row = vec![0u8; self.row_width()];
        let n = key.len().min(self.key_len);
        row[..n].copy_from_slice(&key[..n]);
        encode_b256(value, &mut row[self.key_len..]);
        row
    }

    /// The key part of a row.
    pub fn key<'a>(&self, row: &'a [u8]) -> &'a [u8] {
        &row[..self.key_len]
    }

    /// The value part of a row.
    pub fn value(&self, row: &[u8]) -> u64 {
        decode_b256(&row[self.key_len..self.row_width()])
    }

    /// Overwrite the value part of a row.
    pub fn set_value(&self, row: &mut [u8], value: u64) {
        encode_b256(value, &mut row[self.key_len..self.row_width()]);
    }
}
