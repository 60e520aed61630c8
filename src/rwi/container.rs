//! The posting list of one word.
//!
//! A [`Container`] wraps a [`RowSet`] of encoded [`PostingEntry`] rows keyed
//! by URL hash. It holds at most one entry per URL; when two entries for the
//! same URL meet, the newer one (by [`PostingEntry::is_newer`]) is kept.

use std::borrow::Cow;
use std::fmt;

use log::warn;

use crate::codec::posting::{POSTING_SIZE, PostingEntry};
use crate::codec::{HASH_LEN, WordHash, hash_to_string};
use crate::error::Result;
use crate::index::handle_set::HandleSet;
use crate::index::row_set::{RowSet, Rows};
use crate::order::KeyOrder;
use crate::rwi::join::Deadline;

/// Posting list for one word hash.
#[derive(Debug, Clone)]
pub struct Container {
    word_hash: WordHash,
    rows: RowSet,
}

impl Container {
    /// Create an empty container.
    pub fn new(word_hash: WordHash, order: KeyOrder) -> Self {
        Self::with_capacity(word_hash, order, 0)
    }

    /// Create an empty container with room for `capacity` entries.
    pub fn with_capacity(word_hash: WordHash, order: KeyOrder, capacity: usize) -> Self {
        Container {
            word_hash,
            rows: RowSet::with_capacity(POSTING_SIZE, HASH_LEN, order, capacity),
        }
    }

    /// Build a container from entries in any order; the newest entry per URL wins.
    pub fn from_entries<I>(word_hash: WordHash, order: KeyOrder, entries: I) -> Self
    where
        I: IntoIterator<Item = PostingEntry>,
    {
        let mut container = Container::new(word_hash, order);
        for entry in entries {
            container.add(&entry);
        }
        container.dedup_newest();
        container
    }

    /// The word this list belongs to.
    pub fn word_hash(&self) -> &WordHash {
        &self.word_hash
    }

    /// Re-label the container.
    pub fn set_word_hash(&mut self, word_hash: WordHash) {
        self.word_hash = word_hash;
    }

    /// Order of the URL keys.
    pub fn order(&self) -> KeyOrder {
        self.rows.order()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the container has no entries.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Bytes held by the encoded entries.
    pub fn byte_size(&self) -> usize {
        self.rows.byte_size()
    }

    /// Time of the last modification in milliseconds.
    pub fn last_wrote(&self) -> u64 {
        self.rows.last_wrote()
    }

    /// Override the modification time.
    pub fn set_last_wrote(&mut self, millis: u64) {
        self.rows.set_last_wrote(millis);
    }

    /// Whether every entry is in key order.
    pub fn is_sorted(&self) -> bool {
        self.rows.is_sorted()
    }

    /// Bring entries added with [`add`](Self::add) into key order.
    pub fn sort(&mut self) {
        self.rows.sort();
    }

    /// A sorted view, cloning only when entries are out of order.
    pub fn sorted_view(&self) -> Cow<'_, Container> {
        if self.is_sorted() {
            Cow::Borrowed(self)
        } else {
            let mut sorted = self.clone();
            sorted.sort();
            Cow::Owned(sorted)
        }
    }

    /// Append an entry whose URL is known to be absent.
    pub fn add(&mut self, entry: &PostingEntry) {
        self.rows.add_unique(&entry.encode());
    }

    /// Insert or replace the entry for its URL, returning the replaced entry.
    pub fn put(&mut self, entry: &PostingEntry) -> Option<PostingEntry> {
        self.rows
            .put(&entry.encode())
            .and_then(|old| decode_logged(&old, &self.word_hash))
    }

    /// Insert an entry unless the stored entry for the same URL is newer.
    ///
    /// Returns true if the entry was stored.
    pub fn put_recent(&mut self, entry: &PostingEntry) -> bool {
        self.put_recent_row(&entry.encode())
    }

    fn put_recent_row(&mut self, row: &[u8]) -> bool {
        if let Some(existing) = self.rows.get(&row[..HASH_LEN]) {
            if PostingEntry::row_is_newer(existing, row) {
                return false;
            }
        }
        self.rows.put(row);
        true
    }

    /// Merge every entry of `other`, keeping the newer entry per URL.
    ///
    /// Both lists are walked once in key order. Stops taking entries when
    /// `deadline` expires and returns the number of entries stored.
    pub fn add_all(&mut self, other: &Container, deadline: &Deadline) -> usize {
        self.rows.merge_from(
            &other.rows,
            |existing, incoming| !PostingEntry::row_is_newer(existing, incoming),
            || deadline.expired(),
        )
    }

    /// Union of two containers; on equal dates `other` wins.
    pub fn merge(mut self, other: &Container) -> Container {
        self.add_all(other, &Deadline::never());
        self
    }

    /// The entry for `url_hash`.
    pub fn get(&self, url_hash: &[u8]) -> Option<PostingEntry> {
        self.rows
            .peek(url_hash)
            .and_then(|row| decode_logged(row, &self.word_hash))
    }

    pub(crate) fn get_row(&self, url_hash: &[u8]) -> Option<&[u8]> {
        self.rows.peek(url_hash)
    }

    /// Whether an entry for `url_hash` exists.
    pub fn contains(&self, url_hash: &[u8]) -> bool {
        self.rows.contains(url_hash)
    }

    /// Remove the entry for `url_hash`.
    pub fn remove(&mut self, url_hash: &[u8]) -> Option<PostingEntry> {
        self.rows
            .remove(url_hash)
            .and_then(|old| decode_logged(&old, &self.word_hash))
    }

    /// Remove the entries for every URL in `urls`; returns how many were removed.
    pub fn remove_entries(&mut self, urls: &HandleSet) -> usize {
        self.rows.retain(|row| !urls.contains(&row[..HASH_LEN]))
    }

    pub(crate) fn retain_rows<F>(&mut self, keep: F) -> usize
    where
        F: FnMut(&[u8]) -> bool,
    {
        self.rows.retain(keep)
    }

    /// A copy restricted to the URLs in `urls`.
    pub fn select(&self, urls: &HandleSet) -> Container {
        let mut selected = self.top_level_clone();
        selected.rows.retain(|row| urls.contains(&row[..HASH_LEN]));
        selected
    }

    /// A copy that shares no storage with this container.
    pub fn top_level_clone(&self) -> Container {
        self.clone()
    }

    /// Decoded entries in storage order (key order once sorted).
    pub fn entries(&self) -> impl Iterator<Item = PostingEntry> + '_ {
        self.rows
            .iter()
            .filter_map(move |row| decode_logged(row, &self.word_hash))
    }

    /// URL hashes in storage order.
    pub fn url_hashes(&self) -> impl Iterator<Item = &[u8]> {
        self.rows.iter().map(|row| &row[..HASH_LEN])
    }

    pub(crate) fn rows(&self) -> Rows<'_> {
        self.rows.iter()
    }

    /// Drop the oldest entries until at most `max_references` remain.
    ///
    /// A limit of 0 disables shrinking. Returns the number of entries dropped.
    pub fn shrink_references(&mut self, max_references: usize) -> usize {
        if max_references == 0 || self.len() <= max_references {
            return 0;
        }
        let mut ages: Vec<(u32, &[u8])> = self
            .rows
            .iter()
            .map(|row| (PostingEntry::last_modified_of(row), &row[..HASH_LEN]))
            .collect();
        ages.sort_by_key(|(days, _)| *days);
        let drop_count = ages.len() - max_references;
        let doomed = HandleSet::from_keys(
            HASH_LEN,
            self.order(),
            ages[..drop_count].iter().map(|(_, key)| *key),
        );
        self.rows.retain(|row| !doomed.contains(&row[..HASH_LEN]))
    }

    /// Resolve duplicate URLs by keeping the newest entry; returns the number dropped.
    pub fn dedup_newest(&mut self) -> usize {
        let doubles = self.rows.remove_doubles();
        let mut dropped = 0;
        for group in doubles {
            dropped += group.len() - 1;
            let newest = group.iter().fold(None::<&Vec<u8>>, |best, row| match best {
                Some(b) if PostingEntry::row_is_newer(b, row) => Some(b),
                _ => Some(row),
            });
            if let Some(row) = newest {
                self.rows.put(row);
            }
        }
        dropped
    }

    /// Serialize the container body.
    pub fn export(&self) -> Vec<u8> {
        self.rows.export()
    }

    /// Rebuild a container from [`export`](Self::export) output.
    pub fn import(word_hash: WordHash, bytes: &[u8], order: KeyOrder) -> Result<Container> {
        let rows = RowSet::import(bytes, POSTING_SIZE, HASH_LEN, order)?;
        let mut container = Container { word_hash, rows };
        if !container.is_sorted() {
            let last_wrote = container.last_wrote();
            container.dedup_newest();
            container.set_last_wrote(last_wrote);
        }
        Ok(container)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Container[{}] with {} entries",
            hash_to_string(&self.word_hash),
            self.len()
        )
    }
}

fn decode_logged(row: &[u8], word_hash: &WordHash) -> Option<PostingEntry> {
    match PostingEntry::decode(row) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!("skipping posting of {}: {}", hash_to_string(word_hash), e);
            None
        }
    }
}
