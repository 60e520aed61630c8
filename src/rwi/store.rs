//! The capability shared by every posting store, and the iteration plumbing
//! the stores compose.

use std::sync::Arc;

use crate::codec::WordHash;
use crate::codec::posting::PostingEntry;
use crate::error::Result;
use crate::index::HandleSet;
use crate::index::merge_iter::{MergeIter, RotateIter};
use crate::order::KeyOrder;
use crate::rwi::cache::ContainerCache;
use crate::rwi::container::Container;

/// Boxed iterator over containers in key order.
pub type ContainerIter = Box<dyn Iterator<Item = Container> + Send>;

/// Produces key-ordered iterations, starting at a key, over a snapshot.
///
/// Calling it again restarts the iteration over the same snapshot, which is
/// how wrapping iteration is built.
pub type IterSource = Arc<dyn Fn(Option<&[u8]>) -> ContainerIter + Send + Sync>;

/// Merge key-ordered iterators; sources are listed oldest first and on equal
/// words the newer source's entries win URL collisions.
pub fn merge_sorted(sources: Vec<ContainerIter>, order: KeyOrder) -> ContainerIter {
    let mut sources = sources;
    if sources.len() == 1 {
        if let Some(only) = sources.pop() {
            return only;
        }
    }
    Box::new(MergeIter::new(
        sources,
        move |a: &Container, b: &Container| order.compare(a.word_hash(), b.word_hash()),
        |older: Container, newer: Container| older.merge(&newer),
    ))
}

/// A source over containers already sorted by word hash.
pub fn sorted_source(containers: Vec<Container>, order: KeyOrder) -> IterSource {
    let containers = Arc::new(containers);
    Arc::new(move |start: Option<&[u8]>| {
        let from = match start {
            Some(key) => containers.partition_point(|c| order.compare(c.word_hash(), key).is_lt()),
            None => 0,
        };
        let tail: Vec<Container> = containers[from..].to_vec();
        Box::new(tail.into_iter()) as ContainerIter
    })
}

/// A source merging `sources`, listed oldest first.
pub fn merged_source(sources: Vec<IterSource>, order: KeyOrder) -> IterSource {
    Arc::new(move |start: Option<&[u8]>| {
        merge_sorted(sources.iter().map(|source| source(start)).collect(), order)
    })
}

/// Iterate `source` from `start`; with `wrap` restart at the smallest key
/// after the largest and go on while the snapshot is non-empty.
pub fn iterate_source(source: IterSource, start: Option<&[u8]>, wrap: bool) -> ContainerIter {
    let first = source(start);
    if !wrap {
        return first;
    }
    Box::new(RotateIter::new(first, true, move || source(None)))
}

/// A keyed store of posting lists.
///
/// Implemented by the RAM cache, the index cell and the tiered index, so
/// callers can work against any layer.
pub trait PostingStore: Send + Sync {
    /// Container of `word`, restricted to `url_filter` if given.
    fn get(&self, word: &[u8], url_filter: Option<&HandleSet>) -> Result<Option<Container>>;

    /// Whether `word` has postings.
    fn has(&self, word: &[u8]) -> Result<bool>;

    /// Merge `container` into the store.
    fn add_entries(&self, container: &Container) -> Result<()>;

    /// Add a single posting.
    fn add_entry(&self, word: &WordHash, entry: &PostingEntry) -> Result<()> {
        let mut single = Container::new(*word, self.order());
        single.add(entry);
        self.add_entries(&single)
    }

    /// Remove `word` entirely; returns the removed postings if any were held.
    fn delete_container(&self, word: &[u8]) -> Result<Option<Container>>;

    /// Remove one posting of `word`.
    fn remove_entry(&self, word: &[u8], url: &[u8]) -> Result<bool>;

    /// Remove the postings of `urls` from `word`; returns how many were removed.
    fn remove_entries(&self, word: &[u8], urls: &HandleSet) -> Result<usize>;

    /// Containers in key order from `start`; with `wrap` the iteration restarts.
    fn iterate(&self, start: Option<&[u8]>, wrap: bool) -> Result<ContainerIter>;

    /// Number of words held.
    fn size(&self) -> usize;

    /// Key order of the store.
    fn order(&self) -> KeyOrder;

    /// Persist state and release resources.
    fn close(&self) -> Result<()>;
}

impl PostingStore for ContainerCache {
    fn get(&self, word: &[u8], url_filter: Option<&HandleSet>) -> Result<Option<Container>> {
        Ok(ContainerCache::get(self, word, url_filter))
    }

    fn has(&self, word: &[u8]) -> Result<bool> {
        Ok(ContainerCache::has(self, word))
    }

    fn add_entries(&self, container: &Container) -> Result<()> {
        ContainerCache::add_entries(self, container);
        Ok(())
    }

    fn delete_container(&self, word: &[u8]) -> Result<Option<Container>> {
        Ok(ContainerCache::delete_container(self, word))
    }

    fn remove_entry(&self, word: &[u8], url: &[u8]) -> Result<bool> {
        Ok(ContainerCache::remove_entry(self, word, url))
    }

    fn remove_entries(&self, word: &[u8], urls: &HandleSet) -> Result<usize> {
        Ok(ContainerCache::remove_entries(self, word, urls))
    }

    fn iterate(&self, start: Option<&[u8]>, wrap: bool) -> Result<ContainerIter> {
        Ok(ContainerCache::iterate(self, start, wrap))
    }

    fn size(&self) -> usize {
        ContainerCache::size(self)
    }

    fn order(&self) -> KeyOrder {
        ContainerCache::order(self)
    }

    fn close(&self) -> Result<()> {
        ContainerCache::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::hash_from_u64;

    fn exercise(store: &dyn PostingStore) {
        let word = hash_from_u64(1);
        store
            .add_entry(&word, &PostingEntry::new(hash_from_u64(10)))
            .unwrap();
        store
            .add_entry(&word, &PostingEntry::new(hash_from_u64(11)))
            .unwrap();
        assert!(store.has(&word).unwrap());
        assert_eq!(store.size(), 1);
        assert!(store.remove_entry(&word, &hash_from_u64(10)).unwrap());
        assert_eq!(store.get(&word, None).unwrap().unwrap().len(), 1);
        assert_eq!(store.iterate(None, false).unwrap().count(), 1);
        assert_eq!(store.delete_container(&word).unwrap().unwrap().len(), 1);
        assert!(!store.has(&word).unwrap());
    }

    fn word_container(word: u64, url: u64, days: u32) -> Container {
        Container::from_entries(
            hash_from_u64(word),
            KeyOrder::Base64,
            [PostingEntry::new(hash_from_u64(url)).with_last_modified_days(days)],
        )
    }

    #[test]
    fn test_merged_source_wraps() {
        let older = sorted_source(
            vec![word_container(1, 1, 5), word_container(3, 1, 5)],
            KeyOrder::Base64,
        );
        let newer = sorted_source(
            vec![word_container(2, 1, 5), word_container(3, 2, 5)],
            KeyOrder::Base64,
        );
        let merged = merged_source(vec![older, newer], KeyOrder::Base64);

        let all: Vec<(WordHash, usize)> = iterate_source(merged.clone(), None, false)
            .map(|c| (*c.word_hash(), c.len()))
            .collect();
        assert_eq!(
            all,
            vec![(hash_from_u64(1), 1), (hash_from_u64(2), 1), (hash_from_u64(3), 2)]
        );

        let wrapped: Vec<WordHash> = iterate_source(merged, Some(&hash_from_u64(3)), true)
            .take(3)
            .map(|c| *c.word_hash())
            .collect();
        assert_eq!(wrapped, vec![hash_from_u64(3), hash_from_u64(1), hash_from_u64(2)]);
    }

    #[test]
    fn test_empty_source_does_not_spin() {
        let empty = sorted_source(Vec::new(), KeyOrder::Base64);
        assert_eq!(iterate_source(empty, None, true).count(), 0);
    }

    #[test]
    fn test_cache_as_store() {
        let cache = ContainerCache::new(KeyOrder::Base64);
        exercise(&cache);
    }
}
