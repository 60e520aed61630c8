//! Sort-on-demand tables of fixed-width rows.
//!
//! A [`RowSet`] keeps its rows in one contiguous byte buffer. Rows
//! `[0, sort_bound)` are sorted by key and unique; rows after the bound are
//! an unsorted tail. Bulk loading appends with [`RowSet::add_unique`] and
//! never sorts; the first keyed read through a `&mut self` accessor sorts
//! the tail into the prefix, dropping duplicates (the later row wins), and
//! the set stays in that query phase for as long as writes go through
//! [`RowSet::put`] and [`RowSet::remove`].
//!
//! The `&self` accessors ([`RowSet::peek`], [`RowSet::contains`],
//! [`RowSet::scan`]) never reorder. `peek` and `contains` also search the
//! unsorted tail; `scan` expects the query phase.

use std::cmp::Ordering;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, RwiError};
use crate::order::KeyOrder;
use crate::util::time::now_millis;

/// Size of the header written by [`RowSet::export`].
pub const EXPORT_HEADER_LEN: usize = 4 + 2 + 4 + 8;

/// An ordered table of fixed-width rows keyed by a byte prefix.
#[derive(Debug, Clone)]
pub struct RowSet {
    row_width: usize,
    key_len: usize,
    order: KeyOrder,
    data: Vec<u8>,
    count: usize,
    sort_bound: usize,
    last_wrote: u64,
}

impl RowSet {
    /// Create an empty set of `row_width`-byte rows keyed by their first `key_len` bytes.
    pub fn new(row_width: usize, key_len: usize, order: KeyOrder) -> Self {
        Self::with_capacity(row_width, key_len, order, 0)
    }

    /// Create an empty set with room for `rows` rows.
    pub fn with_capacity(row_width: usize, key_len: usize, order: KeyOrder, rows: usize) -> Self {
        debug_assert!(key_len <= row_width, "key wider than row");
        RowSet {
            row_width,
            key_len,
            order,
            data: Vec::with_capacity(rows * row_width),
            count: 0,
            sort_bound: 0,
            last_wrote: now_millis(),
        }
    }

    /// Width of one row.
    pub fn row_width(&self) -> usize {
        self.row_width
    }

    /// Width of the key prefix.
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// Key order of the set.
    pub fn order(&self) -> KeyOrder {
        self.order
    }

    /// Number of rows, duplicates in the unsorted tail included.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the set holds no rows.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Bytes held by the row buffer.
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Time of the last modification, in milliseconds since the epoch.
    pub fn last_wrote(&self) -> u64 {
        self.last_wrote
    }

    /// Override the modification time, for instance after a restore.
    pub fn set_last_wrote(&mut self, millis: u64) {
        self.last_wrote = millis;
    }

    /// Whether the whole set is sorted and unique.
    pub fn is_sorted(&self) -> bool {
        self.sort_bound == self.count
    }

    /// Row at physical position `index`.
    pub fn row_at(&self, index: usize) -> Option<&[u8]> {
        (index < self.count).then(|| self.row(index))
    }

    fn row(&self, index: usize) -> &[u8] {
        &self.data[index * self.row_width..(index + 1) * self.row_width]
    }

    fn key_at(&self, index: usize) -> &[u8] {
        &self.data[index * self.row_width..index * self.row_width + self.key_len]
    }

    fn clip<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        &key[..key.len().min(self.key_len)]
    }

    fn touch(&mut self) {
        self.last_wrote = now_millis();
    }

    fn push_row(&mut self, row: &[u8]) {
        debug_assert_eq!(row.len(), self.row_width, "row width mismatch");
        let n = row.len().min(self.row_width);
        self.data.extend_from_slice(&row[..n]);
        self.data.resize(self.data.len() + self.row_width - n, 0);
        self.count += 1;
    }

    /// Binary search over the sorted prefix.
    fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        let key = self.clip(key);
        let (mut lo, mut hi) = (0, self.sort_bound);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.order.compare(self.key_at(mid), key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        let key = self.clip(key);
        (self.sort_bound..self.count)
            .rev()
            .find(|&i| self.order.compare(self.key_at(i), key) == Ordering::Equal)
            .or_else(|| self.search(key).ok())
    }

    /// First index in the sorted prefix whose key is `>= key`.
    fn lower_bound(&self, key: &[u8]) -> usize {
        match self.search(key) {
            Ok(i) | Err(i) => i,
        }
    }

    /// First index in the sorted prefix whose key is `> key`.
    fn upper_bound(&self, key: &[u8]) -> usize {
        match self.search(key) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    /// Append a row whose key is known to be absent. Does not sort.
    ///
    /// Appending keys in ascending order keeps the set sorted.
    pub fn add_unique(&mut self, row: &[u8]) {
        let extends = self.is_sorted()
            && (self.count == 0
                || self.order.compare(self.key_at(self.count - 1), self.clip(row)) == Ordering::Less);
        self.push_row(row);
        if extends {
            self.sort_bound = self.count;
        }
        self.touch();
    }

    /// Sort the tail into the prefix, dropping duplicate keys; the later row wins.
    pub fn sort(&mut self) {
        if self.is_sorted() {
            return;
        }

        let mut tail: Vec<usize> = (self.sort_bound..self.count).collect();
        tail.sort_by(|a, b| self.order.compare(self.key_at(*a), self.key_at(*b)));

        // stable sort: the last index of a run of equal keys is the latest write
        let mut unique: Vec<usize> = Vec::with_capacity(tail.len());
        for index in tail {
            if let Some(last) = unique.last_mut() {
                if self.order.compare(self.key_at(*last), self.key_at(index)) == Ordering::Equal {
                    *last = index;
                    continue;
                }
            }
            unique.push(index);
        }

        let mut merged = Vec::with_capacity(self.data.len());
        let mut rows = 0;
        let (mut i, mut j) = (0, 0);
        while i < self.sort_bound || j < unique.len() {
            let from_tail = if i >= self.sort_bound {
                true
            } else if j >= unique.len() {
                false
            } else {
                match self.order.compare(self.key_at(i), self.key_at(unique[j])) {
                    Ordering::Less => false,
                    Ordering::Greater => true,
                    Ordering::Equal => {
                        i += 1;
                        true
                    }
                }
            };
            let take = if from_tail {
                j += 1;
                unique[j - 1]
            } else {
                i += 1;
                i - 1
            };
            merged.extend_from_slice(self.row(take));
            rows += 1;
        }

        self.data = merged;
        self.count = rows;
        self.sort_bound = rows;
    }

    /// Sort and drop duplicates, returning how many rows were dropped.
    pub fn uniq(&mut self) -> usize {
        let before = self.count;
        self.sort();
        before - self.count
    }

    /// Remove every key that occurs more than once and return the colliding rows.
    ///
    /// Each group keeps the rows in insertion order. The remaining rows are
    /// sorted and unique.
    pub fn remove_doubles(&mut self) -> Vec<Vec<Vec<u8>>> {
        let mut indices: Vec<usize> = (0..self.count).collect();
        indices.sort_by(|a, b| self.order.compare(self.key_at(*a), self.key_at(*b)));

        let mut doubles = Vec::new();
        let mut kept = Vec::with_capacity(self.data.len());
        let mut rows = 0;
        let mut start = 0;
        while start < indices.len() {
            let mut end = start + 1;
            while end < indices.len()
                && self.order.compare(self.key_at(indices[start]), self.key_at(indices[end]))
                    == Ordering::Equal
            {
                end += 1;
            }
            if end - start == 1 {
                kept.extend_from_slice(self.row(indices[start]));
                rows += 1;
            } else {
                doubles.push(indices[start..end].iter().map(|&i| self.row(i).to_vec()).collect());
            }
            start = end;
        }

        self.data = kept;
        self.count = rows;
        self.sort_bound = rows;
        if !doubles.is_empty() {
            self.touch();
        }
        doubles
    }

    /// Look up a row, moving to the query phase first.
    pub fn get(&mut self, key: &[u8]) -> Option<&[u8]> {
        self.sort();
        self.search(key).ok().map(|i| self.row(i))
    }

    /// Whether a key is present, moving to the query phase first.
    pub fn has(&mut self, key: &[u8]) -> bool {
        self.sort();
        self.search(key).is_ok()
    }

    /// Look up a row without reordering; the latest row wins.
    pub fn peek(&self, key: &[u8]) -> Option<&[u8]> {
        self.find(key).map(|i| self.row(i))
    }

    /// Whether a key is present, without reordering.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.find(key).is_some()
    }

    /// Insert or replace a row, returning the replaced row.
    pub fn put(&mut self, row: &[u8]) -> Option<Vec<u8>> {
        debug_assert_eq!(row.len(), self.row_width, "row width mismatch");
        self.sort();
        let old = match self.search(row) {
            Ok(i) => {
                let range = i * self.row_width..(i + 1) * self.row_width;
                let old = self.data[range.clone()].to_vec();
                self.data[range].copy_from_slice(&row[..self.row_width]);
                Some(old)
            }
            Err(i) => {
                let at = i * self.row_width;
                self.data.splice(at..at, row[..self.row_width].iter().copied());
                self.count += 1;
                self.sort_bound += 1;
                None
            }
        };
        self.touch();
        old
    }

    /// Merge the rows of `other` in one linear pass; returns the rows stored.
    ///
    /// On a key present in both sets `take_incoming(existing, incoming)`
    /// decides which row stays. Once `stop` returns true the remaining
    /// incoming rows are skipped; existing rows are always kept.
    pub fn merge_from<F, S>(&mut self, other: &RowSet, mut take_incoming: F, mut stop: S) -> usize
    where
        F: FnMut(&[u8], &[u8]) -> bool,
        S: FnMut() -> bool,
    {
        debug_assert_eq!(other.row_width, self.row_width, "row width mismatch");
        if other.is_empty() {
            return 0;
        }
        self.sort();
        let sorted_other;
        let incoming = if other.is_sorted() {
            other
        } else {
            let mut copy = other.clone();
            copy.sort();
            sorted_other = copy;
            &sorted_other
        };

        let mut merged = Vec::with_capacity(self.data.len() + incoming.data.len());
        let (mut i, mut j, mut rows, mut stored) = (0, 0, 0, 0);
        let mut stopped = false;
        while i < self.count || (!stopped && j < incoming.count) {
            if !stopped && j < incoming.count && stop() {
                stopped = true;
            }
            if stopped || j >= incoming.count {
                merged.extend_from_slice(self.row(i));
                i += 1;
            } else if i >= self.count {
                merged.extend_from_slice(incoming.row(j));
                j += 1;
                stored += 1;
            } else {
                match self.order.compare(self.key_at(i), incoming.key_at(j)) {
                    Ordering::Less => {
                        merged.extend_from_slice(self.row(i));
                        i += 1;
                    }
                    Ordering::Greater => {
                        merged.extend_from_slice(incoming.row(j));
                        j += 1;
                        stored += 1;
                    }
                    Ordering::Equal => {
                        if take_incoming(self.row(i), incoming.row(j)) {
                            merged.extend_from_slice(incoming.row(j));
                            stored += 1;
                        } else {
                            merged.extend_from_slice(self.row(i));
                        }
                        i += 1;
                        j += 1;
                    }
                }
            }
            rows += 1;
        }

        self.data = merged;
        self.count = rows;
        self.sort_bound = rows;
        if stored > 0 {
            self.touch();
        }
        stored
    }

    /// Remove the row with `key`.
    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.sort();
        let i = self.search(key).ok()?;
        let old: Vec<u8> = self
            .data
            .drain(i * self.row_width..(i + 1) * self.row_width)
            .collect();
        self.count -= 1;
        self.sort_bound -= 1;
        self.touch();
        Some(old)
    }

    /// Remove and return an arbitrary row (the physically last one).
    pub fn remove_one(&mut self) -> Option<Vec<u8>> {
        if self.count == 0 {
            return None;
        }
        let at = (self.count - 1) * self.row_width;
        let row = self.data.split_off(at);
        self.count -= 1;
        self.sort_bound = self.sort_bound.min(self.count);
        self.touch();
        Some(row)
    }

    /// Keep only rows for which `keep` returns true; returns the number removed.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&[u8]) -> bool,
    {
        let mut kept = Vec::with_capacity(self.data.len());
        let mut rows = 0;
        let mut bound = 0;
        for i in 0..self.count {
            if keep(self.row(i)) {
                kept.extend_from_slice(self.row(i));
                rows += 1;
                if i < self.sort_bound {
                    bound += 1;
                }
            }
        }
        let removed = self.count - rows;
        if removed > 0 {
            self.data = kept;
            self.count = rows;
            self.sort_bound = bound;
            self.touch();
        }
        removed
    }

    /// Remove every row.
    pub fn clear(&mut self) {
        self.data.clear();
        self.count = 0;
        self.sort_bound = 0;
        self.touch();
    }

    /// Ordered rows, moving to the query phase first.
    ///
    /// Ascending iteration starts at the first key `>= start`, descending
    /// iteration at the last key `<= start`.
    pub fn rows(&mut self, ascending: bool, start: Option<&[u8]>) -> Rows<'_> {
        self.sort();
        self.scan(ascending, start)
    }

    /// Ordered keys, moving to the query phase first.
    pub fn keys(&mut self, ascending: bool, start: Option<&[u8]>) -> impl Iterator<Item = &[u8]> {
        let key_len = self.key_len;
        self.rows(ascending, start).map(move |row| &row[..key_len])
    }

    /// Ordered rows of a set already in the query phase.
    pub fn scan(&self, ascending: bool, start: Option<&[u8]>) -> Rows<'_> {
        debug_assert!(self.is_sorted(), "scan on a set in bulk phase");
        let (front, back) = match (ascending, start) {
            (true, Some(key)) => (self.lower_bound(key), self.sort_bound),
            (false, Some(key)) => (0, self.upper_bound(key)),
            (_, None) => (0, self.sort_bound),
        };
        Rows {
            set: self,
            front,
            back,
            ascending,
        }
    }

    /// Rows in physical order.
    pub fn iter(&self) -> Rows<'_> {
        Rows {
            set: self,
            front: 0,
            back: self.count,
            ascending: true,
        }
    }

    /// Serialize the set in key order, header first.
    pub fn export(&self) -> Vec<u8> {
        if !self.is_sorted() {
            let mut sorted = self.clone();
            sorted.sort();
            return sorted.export();
        }
        let mut out = Vec::with_capacity(EXPORT_HEADER_LEN + self.data.len());
        // writes into a Vec cannot fail
        let _ = out.write_u32::<BigEndian>(self.count as u32);
        out.extend_from_slice(&self.order.signature());
        let _ = out.write_u32::<BigEndian>(self.sort_bound as u32);
        let _ = out.write_u64::<BigEndian>(self.last_wrote);
        out.extend_from_slice(&self.data);
        out
    }

    /// Rebuild a set from [`export`](Self::export) output.
    pub fn import(bytes: &[u8], row_width: usize, key_len: usize, order: KeyOrder) -> Result<RowSet> {
        if bytes.len() < EXPORT_HEADER_LEN {
            return Err(RwiError::decode(format!(
                "row set export has {} bytes, header needs {EXPORT_HEADER_LEN}",
                bytes.len()
            )));
        }
        let mut cursor = Cursor::new(bytes);
        let count = cursor.read_u32::<BigEndian>()? as usize;
        let mut signature = [0u8; 2];
        cursor.read_exact(&mut signature)?;
        let sort_bound = cursor.read_u32::<BigEndian>()? as usize;
        let last_wrote = cursor.read_u64::<BigEndian>()?;

        if KeyOrder::from_signature(signature) != Some(order) {
            return Err(RwiError::decode(format!(
                "row set sorted as {:?}, expected {:?}",
                String::from_utf8_lossy(&signature),
                order
            )));
        }
        let body = &bytes[EXPORT_HEADER_LEN..];
        if body.len() < count * row_width {
            return Err(RwiError::decode(format!(
                "row set export truncated: {} rows of {row_width} bytes need {}, found {}",
                count,
                count * row_width,
                body.len()
            )));
        }
        if sort_bound > count {
            return Err(RwiError::decode(format!(
                "sort bound {sort_bound} exceeds row count {count}"
            )));
        }

        Ok(RowSet {
            row_width,
            key_len,
            order,
            data: body[..count * row_width].to_vec(),
            count,
            sort_bound,
            last_wrote,
        })
    }
}

/// Iterator over a range of rows.
#[derive(Debug, Clone)]
pub struct Rows<'a> {
    set: &'a RowSet,
    front: usize,
    back: usize,
    ascending: bool,
}

impl<'a> Iterator for Rows<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let index = if self.ascending {
            self.front += 1;
            self.front - 1
        } else {
            self.back -= 1;
            self.back
        };
        Some(self.set.row(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.back.saturating_sub(self.front);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Rows<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &[u8; 2], value: u8) -> [u8; 3] {
        [key[0], key[1], value]
    }

    fn set() -> RowSet {
        RowSet::new(3, 2, KeyOrder::Natural)
    }

    #[test]
    fn test_bulk_phase_sorts_on_first_read() {
        let mut rows = set();
        rows.add_unique(&row(b"cc", 1));
        rows.add_unique(&row(b"aa", 2));
        rows.add_unique(&row(b"bb", 3));
        assert!(!rows.is_sorted());
        assert_eq!(rows.peek(b"aa"), Some(&row(b"aa", 2)[..]));

        assert_eq!(rows.get(b"bb"), Some(&row(b"bb", 3)[..]));
        assert!(rows.is_sorted());
        let keys: Vec<&[u8]> = rows.keys(true, None).collect();
        assert_eq!(keys, vec![&b"aa"[..], b"bb", b"cc"]);
    }

    #[test]
    fn test_merge_from_interleaves_and_resolves_collisions() {
        let mut rows = set();
        for (key, value) in [(b"bb", 1), (b"dd", 1), (b"ff", 1)] {
            rows.add_unique(&row(key, value));
        }
        let mut other = set();
        for (key, value) in [(b"ee", 2), (b"aa", 2), (b"dd", 9), (b"bb", 0)] {
            other.add_unique(&row(key, value));
        }

        // higher value wins a collision
        let stored = rows.merge_from(&other, |old, new| new[2] > old[2], || false);
        assert_eq!(stored, 3);
        assert!(rows.is_sorted());
        let all: Vec<&[u8]> = rows.iter().collect();
        assert_eq!(
            all,
            vec![
                &row(b"aa", 2)[..],
                &row(b"bb", 1)[..],
                &row(b"dd", 9)[..],
                &row(b"ee", 2)[..],
                &row(b"ff", 1)[..],
            ]
        );
    }

    #[test]
    fn test_merge_from_stops_but_keeps_existing_rows() {
        let mut rows = set();
        rows.add_unique(&row(b"cc", 1));
        rows.add_unique(&row(b"zz", 1));
        let mut other = set();
        for key in [b"aa", b"bb", b"dd", b"ee"] {
            other.add_unique(&row(key, 2));
        }

        let mut budget = 2;
        let stored = rows.merge_from(
            &other,
            |_, _| true,
            || {
                if budget == 0 {
                    return true;
                }
                budget -= 1;
                false
            },
        );
        assert_eq!(stored, 2);
        let keys: Vec<&[u8]> = rows.keys(true, None).collect();
        assert_eq!(keys, vec![&b"aa"[..], b"bb", b"cc", b"zz"]);
    }

    #[test]
    fn test_merge_from_large_interleaved_sets() {
        let mut rows = RowSet::new(4, 4, KeyOrder::Natural);
        let mut other = RowSet::new(4, 4, KeyOrder::Natural);
        for n in 0..20_000u32 {
            rows.add_unique(&(n * 2).to_be_bytes());
            other.add_unique(&(n * 2 + 1).to_be_bytes());
        }
        assert_eq!(rows.merge_from(&other, |_, _| true, || false), 20_000);
        assert_eq!(rows.len(), 40_000);
        let keys: Vec<u32> = rows
            .iter()
            .map(|r| u32::from_be_bytes([r[0], r[1], r[2], r[3]]))
            .collect();
        assert!(keys.iter().copied().eq(0..40_000));
    }

    #[test]
    fn test_sorted_appends_stay_sorted() {
        let mut rows = set();
        rows.add_unique(&row(b"aa", 1));
        rows.add_unique(&row(b"ab", 1));
        rows.add_unique(&row(b"b0", 1));
        assert!(rows.is_sorted());
    }

    #[test]
    fn test_later_duplicate_wins() {
        let mut rows = set();
        rows.add_unique(&row(b"aa", 1));
        rows.add_unique(&row(b"bb", 1));
        rows.add_unique(&row(b"aa", 9));
        assert_eq!(rows.peek(b"aa"), Some(&row(b"aa", 9)[..]));
        assert_eq!(rows.uniq(), 1);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.get(b"aa"), Some(&row(b"aa", 9)[..]));
    }

    #[test]
    fn test_put_and_remove() {
        let mut rows = set();
        assert_eq!(rows.put(&row(b"bb", 1)), None);
        assert_eq!(rows.put(&row(b"aa", 2)), None);
        assert_eq!(rows.put(&row(b"bb", 3)), Some(row(b"bb", 1).to_vec()));
        assert_eq!(rows.len(), 2);
        assert!(rows.is_sorted());

        assert_eq!(rows.remove(b"aa"), Some(row(b"aa", 2).to_vec()));
        assert_eq!(rows.remove(b"aa"), None);
        assert!(!rows.has(b"aa"));
        assert!(rows.has(b"bb"));
    }

    #[test]
    fn test_remove_one() {
        let mut rows = set();
        rows.add_unique(&row(b"aa", 1));
        rows.add_unique(&row(b"bb", 2));
        assert_eq!(rows.remove_one(), Some(row(b"bb", 2).to_vec()));
        assert_eq!(rows.len(), 1);
        assert!(rows.is_sorted());
        assert!(rows.remove_one().is_some());
        assert!(rows.remove_one().is_none());
    }

    #[test]
    fn test_remove_doubles() {
        let mut rows = set();
        rows.add_unique(&row(b"bb", 1));
        rows.add_unique(&row(b"aa", 1));
        rows.add_unique(&row(b"bb", 2));
        rows.add_unique(&row(b"cc", 1));
        let doubles = rows.remove_doubles();
        assert_eq!(doubles.len(), 1);
        assert_eq!(doubles[0], vec![row(b"bb", 1).to_vec(), row(b"bb", 2).to_vec()]);
        assert_eq!(rows.len(), 2);
        assert!(rows.is_sorted());
        assert!(!rows.contains(b"bb"));
    }

    #[test]
    fn test_ranged_iteration() {
        let mut rows = set();
        for key in [b"aa", b"cc", b"ee", b"gg"] {
            rows.add_unique(&row(key, 0));
        }
        let from_d: Vec<&[u8]> = rows.keys(true, Some(b"dd")).collect();
        assert_eq!(from_d, vec![&b"ee"[..], b"gg"]);

        let down_from_e: Vec<&[u8]> = rows.keys(false, Some(b"ee")).collect();
        assert_eq!(down_from_e, vec![&b"ee"[..], b"cc", b"aa"]);

        let down_from_d: Vec<&[u8]> = rows.keys(false, Some(b"dd")).collect();
        assert_eq!(down_from_d, vec![&b"cc"[..], b"aa"]);

        // restartable
        assert_eq!(rows.keys(true, None).count(), 4);
        assert_eq!(rows.keys(true, None).count(), 4);
    }

    #[test]
    fn test_retain() {
        let mut rows = set();
        for (i, key) in [b"aa", b"bb", b"cc"].into_iter().enumerate() {
            rows.add_unique(&row(key, i as u8));
        }
        let removed = rows.retain(|r| r[2] != 1);
        assert_eq!(removed, 1);
        assert!(rows.is_sorted());
        assert_eq!(rows.keys(true, None).count(), 2);
    }

    #[test]
    fn test_export_import() {
        let mut rows = RowSet::new(3, 2, KeyOrder::Base64);
        rows.add_unique(&row(b"Ab", 1));
        rows.add_unique(&row(b"AA", 2));
        let bytes = rows.export();
        assert_eq!(bytes.len(), EXPORT_HEADER_LEN + 6);

        let mut restored = RowSet::import(&bytes, 3, 2, KeyOrder::Base64).unwrap();
        assert_eq!(restored.len(), 2);
        assert!(restored.is_sorted());
        assert_eq!(restored.last_wrote(), rows.last_wrote());
        assert_eq!(restored.get(b"AA"), Some(&row(b"AA", 2)[..]));

        assert!(RowSet::import(&bytes, 3, 2, KeyOrder::Natural).is_err());
        assert!(RowSet::import(&bytes[..EXPORT_HEADER_LEN + 2], 3, 2, KeyOrder::Base64).is_err());
    }
}
