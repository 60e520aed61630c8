//! Ordered set of fixed-length keys.

use crate::index::row_set::RowSet;
use crate::order::KeyOrder;

/// A sorted set of keys, used as URL filters and exclusion lists.
#[derive(Debug, Clone)]
pub struct HandleSet {
    rows: RowSet,
}

impl HandleSet {
    /// Create an empty set of `key_len`-byte keys.
    pub fn new(key_len: usize, order: KeyOrder) -> Self {
        HandleSet {
            rows: RowSet::new(key_len, key_len, order),
        }
    }

    /// Build a set from keys in any order; duplicates collapse.
    pub fn from_keys<'a, I>(key_len: usize, order: KeyOrder, keys: I) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut rows = RowSet::new(key_len, key_len, order);
        for key in keys {
            rows.add_unique(&key[..key_len.min(key.len())]);
        }
        rows.sort();
        HandleSet { rows }
    }

    /// Width of the keys.
    pub fn key_len(&self) -> usize {
        self.rows.key_len()
    }

    /// Key order of the set.
    pub fn order(&self) -> KeyOrder {
        self.rows.order()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Add a key; returns true if it was not yet present.
    pub fn insert(&mut self, key: &[u8]) -> bool {
        self.rows.put(key).is_none()
    }

    /// Remove a key; returns true if it was present.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        self.rows.remove(key).is_some()
    }

    /// Whether the set holds `key`.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.rows.contains(key)
    }

    /// Keys in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.rows.scan(true, None)
    }
}
