//! Two-partition in-memory row index.
//!
//! During initialization rows are bulk-loaded into `index0` without
//! sorting. [`RamIndex::finish_initialization`] (or the first keyed read)
//! sorts `index0` once and opens `index1`, which receives every key added
//! afterwards. A key lives in at most one partition, so lookups probe both
//! and iteration merges them.

use crate::index::merge_iter::MergeIter;
use crate::index::row_set::RowSet;
use crate::order::KeyOrder;

/// Row index split into a bulk-loaded partition and a post-initialization partition.
#[derive(Debug, Clone)]
pub struct RamIndex {
    index0: RowSet,
    index1: Option<RowSet>,
}

impl RamIndex {
    /// Create an empty index in its initialization phase.
    pub fn new(row_width: usize, key_len: usize, order: KeyOrder) -> Self {
        RamIndex {
            index0: RowSet::new(row_width, key_len, order),
            index1: None,
        }
    }

    /// Key order of the index.
    pub fn order(&self) -> KeyOrder {
        self.index0.order()
    }

    /// Width of the key prefix.
    pub fn key_len(&self) -> usize {
        self.index0.key_len()
    }

    /// Width of one row.
    pub fn row_width(&self) -> usize {
        self.index0.row_width()
    }

    /// Whether [`finish_initialization`](Self::finish_initialization) has run.
    pub fn is_initialized(&self) -> bool {
        self.index1.is_some()
    }

    /// Sort the bulk partition and open the secondary partition.
    pub fn finish_initialization(&mut self) {
        if self.index1.is_none() {
            self.index0.sort();
            self.index1 = Some(RowSet::new(
                self.index0.row_width(),
                self.index0.key_len(),
                self.index0.order(),
            ));
        }
    }

    fn secondary(&mut self) -> &mut RowSet {
        self.finish_initialization();
        let template = &self.index0;
        self.index1.get_or_insert_with(|| {
            RowSet::new(template.row_width(), template.key_len(), template.order())
        })
    }

    /// Append a row whose key is known to be absent.
    pub fn add_unique(&mut self, row: &[u8]) {
        match self.index1.as_mut() {
            Some(index1) => index1.add_unique(row),
            None => self.index0.add_unique(row),
        }
    }

    /// Look up a row, finishing initialization first.
    pub fn get(&mut self, key: &[u8]) -> Option<&[u8]> {
        self.secondary().sort();
        if self.index0.contains(key) {
            return self.index0.peek(key);
        }
        self.index1.as_ref().and_then(|index1| index1.peek(key))
    }

    /// Look up a row without changing phase.
    pub fn peek(&self, key: &[u8]) -> Option<&[u8]> {
        self.index0
            .peek(key)
            .or_else(|| self.index1.as_ref().and_then(|index1| index1.peek(key)))
    }

    /// Whether a key is present, finishing initialization first.
    pub fn has(&mut self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Whether a key is present, without changing phase.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.peek(key).is_some()
    }

    /// Insert or replace a row, returning the replaced row.
    pub fn put(&mut self, row: &[u8]) -> Option<Vec<u8>> {
        self.finish_initialization();
        if self.index0.contains(row) {
            return self.index0.put(row);
        }
        self.secondary().put(row)
    }

    /// Remove the row with `key`.
    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.finish_initialization();
        self.index0
            .remove(key)
            .or_else(|| self.index1.as_mut().and_then(|index1| index1.remove(key)))
    }

    /// Remove an arbitrary row, preferring the secondary partition.
    pub fn remove_one(&mut self) -> Option<Vec<u8>> {
        self.index1
            .as_mut()
            .and_then(RowSet::remove_one)
            .or_else(|| self.index0.remove_one())
    }

    /// Remove every key occurring more than once in either partition.
    pub fn remove_doubles(&mut self) -> Vec<Vec<Vec<u8>>> {
        let mut doubles = self.index0.remove_doubles();
        if let Some(index1) = self.index1.as_mut() {
            doubles.extend(index1.remove_doubles());
        }
        doubles
    }

    /// Number of rows in both partitions.
    pub fn len(&self) -> usize {
        self.index0.len() + self.index1.as_ref().map_or(0, RowSet::len)
    }

    /// Whether both partitions are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by both partitions.
    pub fn byte_size(&self) -> usize {
        self.index0.byte_size() + self.index1.as_ref().map_or(0, RowSet::byte_size)
    }

    /// Remove every row and return to the initialization phase.
    pub fn clear(&mut self) {
        self.index0.clear();
        self.index1 = None;
    }

    /// Ordered rows of both partitions.
    pub fn rows(&mut self, ascending: bool, start: Option<&[u8]>) -> impl Iterator<Item = &[u8]> {
        self.secondary().sort();
        let order = self.index0.order();
        let key_len = self.index0.key_len();
        let sources = std::iter::once(self.index0.scan(ascending, start))
            .chain(self.index1.iter().map(move |index1| index1.scan(ascending, start)));
        MergeIter::new(
            sources,
            move |a: &&[u8], b: &&[u8]| {
                let ord = order.compare(&a[..key_len], &b[..key_len]);
                if ascending { ord } else { ord.reverse() }
            },
            |a, _| a,
        )
    }

    /// Ordered keys of both partitions.
    pub fn keys(&mut self, ascending: bool, start: Option<&[u8]>) -> impl Iterator<Item = &[u8]> {
        let key_len = self.index0.key_len();
        self.rows(ascending, start).map(move |row| &row[..key_len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &[u8; 2], value: u8) -> [u8; 3] {
        [key[0], key[1], value]
    }

    #[test]
    fn test_partitions() {
        let mut index = RamIndex::new(3, 2, KeyOrder::Natural);
        index.add_unique(&row(b"cc", 1));
        index.add_unique(&row(b"aa", 1));
        assert!(!index.is_initialized());

        assert_eq!(index.get(b"cc"), Some(&row(b"cc", 1)[..]));
        assert!(index.is_initialized());

        index.add_unique(&row(b"bb", 2));
        index.put(&row(b"dd", 3));
        assert_eq!(index.len(), 4);

        // replacing a bulk key stays in index0
        assert_eq!(index.put(&row(b"aa", 9)), Some(row(b"aa", 1).to_vec()));
        assert_eq!(index.len(), 4);

        let keys: Vec<&[u8]> = index.keys(true, None).collect();
        assert_eq!(keys, vec![&b"aa"[..], b"bb", b"cc", b"dd"]);

        let keys: Vec<&[u8]> = index.keys(false, Some(b"bz")).collect();
        assert_eq!(keys, vec![&b"bb"[..], b"aa"]);
    }

    #[test]
    fn test_remove() {
        let mut index = RamIndex::new(3, 2, KeyOrder::Natural);
        index.add_unique(&row(b"aa", 1));
        index.finish_initialization();
        index.add_unique(&row(b"bb", 1));

        assert!(index.remove(b"bb").is_some());
        assert!(index.remove(b"aa").is_some());
        assert!(index.remove(b"aa").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_remove_one_prefers_secondary() {
        let mut index = RamIndex::new(3, 2, KeyOrder::Natural);
        index.add_unique(&row(b"aa", 1));
        index.finish_initialization();
        index.add_unique(&row(b"bb", 1));
        assert_eq!(index.remove_one(), Some(row(b"bb", 1).to_vec()));
        assert_eq!(index.remove_one(), Some(row(b"aa", 1).to_vec()));
        assert_eq!(index.remove_one(), None);
    }

    #[test]
    fn test_peek_in_bulk_phase() {
        let mut index = RamIndex::new(3, 2, KeyOrder::Natural);
        index.add_unique(&row(b"bb", 1));
        index.add_unique(&row(b"aa", 2));
        assert!(index.contains(b"aa"));
        assert!(!index.contains(b"zz"));
        assert!(!index.is_initialized());
    }
}
