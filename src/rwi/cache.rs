//! The RAM tier: a map from word hash to container.
//!
//! Every mutation runs inside one write-lock section that also updates the
//! two score trackers, so the size score of a word always equals the length
//! of its container and the date score always reflects its `last_wrote`.
//! Readers take the read lock and receive copies.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashMap;
use log::{debug, info, warn};
use parking_lot::RwLock;

use crate::codec::posting::PostingEntry;
use crate::codec::{HASH_LEN, WordHash};
use crate::error::{Result, RwiError};
use crate::index::HandleSet;
use crate::order::KeyOrder;
use crate::rwi::container::Container;
use crate::rwi::join::Deadline;
use crate::rwi::score::ScoreMap;
use crate::rwi::segment::{self, SegmentWriter};
use crate::rwi::store::{ContainerIter, IterSource, iterate_source, sorted_source};
use crate::util::time::now_millis;

/// Scores of a cache at one point in time, as seen by eviction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheScores {
    /// Word with the most postings and its posting count.
    pub largest: Option<(WordHash, usize)>,
    /// Word with the oldest last write and that time in milliseconds.
    pub oldest: Option<(WordHash, u64)>,
    /// Smallest word hash in key order.
    pub first_key: Option<WordHash>,
    /// Number of words.
    pub words: usize,
    /// Estimated heap bytes held by the containers.
    pub byte_size: usize,
}

#[derive(Debug, Default)]
struct CacheInner {
    containers: AHashMap<WordHash, Container>,
    size_score: ScoreMap<WordHash>,
    date_score: ScoreMap<WordHash>,
    postings: usize,
}

impl CacheInner {
    fn rescore(&mut self, word: &WordHash, epoch_ms: u64) {
        match self.containers.get(word) {
            Some(container) if !container.is_empty() => {
                self.size_score.set_score(*word, container.len() as i64);
                self.date_score
                    .set_score(*word, date_score(container.last_wrote(), epoch_ms));
            }
            _ => {
                self.containers.remove(word);
                self.size_score.delete_score(word);
                self.date_score.delete_score(word);
            }
        }
    }

    /// Run `edit` on the container of `word` and keep the scores and the
    /// posting count in step with it.
    fn edit<T, F>(&mut self, word: &WordHash, epoch_ms: u64, edit: F) -> Option<T>
    where
        F: FnOnce(&mut Container) -> T,
    {
        let container = self.containers.get_mut(word)?;
        let before = container.len();
        let result = edit(container);
        let after = container.len();
        self.postings = (self.postings + after).saturating_sub(before);
        self.rescore(word, epoch_ms);
        Some(result)
    }

    fn insert(
        &mut self,
        incoming: &Container,
        update_time: u64,
        max_references: usize,
        order: KeyOrder,
        epoch_ms: u64,
    ) -> usize {
        let word = *incoming.word_hash();
        let previous = self.containers.get(&word).map(Container::last_wrote);
        let container = self
            .containers
            .entry(word)
            .or_insert_with(|| Container::with_capacity(word, order, incoming.len()));
        let before = container.len();
        let stored = container.add_all(incoming, &Deadline::never());
        container.set_last_wrote(previous.map_or(update_time, |p| p.max(update_time)));
        container.shrink_references(max_references);
        let after = container.len();
        self.postings = (self.postings + after).saturating_sub(before);
        self.rescore(&word, epoch_ms);
        stored
    }

    fn clear(&mut self) {
        self.containers.clear();
        self.size_score.clear();
        self.date_score.clear();
        self.postings = 0;
    }
}

fn date_score(last_wrote: u64, epoch_ms: u64) -> i64 {
    (last_wrote as i64 - epoch_ms as i64) / 1000
}

/// RAM map of containers with size and date score tracking.
#[derive(Debug)]
pub struct ContainerCache {
    order: KeyOrder,
    epoch_ms: u64,
    max_references: usize,
    dump_path: Option<PathBuf>,
    inner: RwLock<CacheInner>,
    closed: AtomicBool,
}

impl ContainerCache {
    /// Create an empty cache.
    pub fn new(order: KeyOrder) -> Self {
        ContainerCache {
            order,
            epoch_ms: now_millis(),
            max_references: 0,
            dump_path: None,
            inner: RwLock::new(CacheInner::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Limit the postings per container; 0 disables the limit.
    pub fn with_max_references(mut self, max_references: usize) -> Self {
        self.max_references = max_references;
        self
    }

    /// Create a cache backed by a dump file, restoring it if present.
    ///
    /// A dump that cannot be read at all is moved aside to `<path>.broken`
    /// and the cache starts empty. [`close`](Self::close) writes the cache
    /// back to `path`.
    pub fn open_dumped<P: AsRef<Path>>(path: P, order: KeyOrder) -> Result<Self> {
        let mut cache = ContainerCache::new(order);
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            if let Err(e) = cache.restore(&path) {
                let broken = path.with_extension("broken");
                warn!("cannot restore {}: {e}; moved to {}", path.display(), broken.display());
                cache.clear();
                fs::rename(&path, &broken)?;
            }
        }
        cache.dump_path = Some(path);
        Ok(cache)
    }

    /// Key order of the cache.
    pub fn order(&self) -> KeyOrder {
        self.order
    }

    /// Number of words.
    pub fn size(&self) -> usize {
        self.inner.read().containers.len()
    }

    /// Whether no word is cached.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of postings over all words.
    pub fn posting_count(&self) -> usize {
        self.inner.read().postings
    }

    /// Estimated heap bytes of all containers.
    pub fn byte_size(&self) -> usize {
        let inner = self.inner.read();
        inner
            .containers
            .values()
            .map(|c| c.byte_size() + HASH_LEN)
            .sum()
    }

    /// Merge `container` into the cache; returns the number of entries stored.
    ///
    /// An entry replaces the cached entry for the same URL unless the cached
    /// one is newer.
    pub fn add_entries(&self, container: &Container) -> usize {
        self.add_entries_at(container, 0)
    }

    fn add_entries_at(&self, container: &Container, update_time: u64) -> usize {
        if container.is_empty() {
            return 0;
        }
        let update_time = if update_time == 0 {
            now_millis()
        } else {
            update_time
        };
        self.inner.write().insert(
            container,
            update_time,
            self.max_references,
            self.order,
            self.epoch_ms,
        )
    }

    /// Add one posting; `update_time` of 0 means now.
    pub fn add_entry(&self, word: &WordHash, entry: &PostingEntry, update_time: u64) -> bool {
        let mut single = Container::new(*word, self.order);
        single.add(entry);
        self.add_entries_at(&single, update_time) > 0
    }

    /// Copy of the container of `word`, restricted to `url_filter` if given.
    pub fn get(&self, word: &[u8], url_filter: Option<&HandleSet>) -> Option<Container> {
        let inner = self.inner.read();
        let container = inner.containers.get(word)?;
        let copy = match url_filter {
            Some(urls) => container.select(urls),
            None => container.top_level_clone(),
        };
        (!copy.is_empty()).then_some(copy)
    }

    /// Whether `word` is cached.
    pub fn has(&self, word: &[u8]) -> bool {
        self.inner.read().containers.contains_key(word)
    }

    /// Posting count of `word`.
    pub fn count(&self, word: &[u8]) -> usize {
        self.inner
            .read()
            .containers
            .get(word)
            .map_or(0, Container::len)
    }

    /// Remove and return the container of `word`.
    pub fn delete_container(&self, word: &[u8]) -> Option<Container> {
        let key = WordHash::try_from(word).ok()?;
        let mut inner = self.inner.write();
        let container = inner.containers.remove(&key)?;
        inner.postings = inner.postings.saturating_sub(container.len());
        inner.size_score.delete_score(&key);
        inner.date_score.delete_score(&key);
        Some(container)
    }

    /// Remove the posting of `url` from `word`.
    pub fn remove_entry(&self, word: &[u8], url: &[u8]) -> bool {
        let Ok(key) = WordHash::try_from(word) else {
            return false;
        };
        self.inner
            .write()
            .edit(&key, self.epoch_ms, |c| c.remove(url).is_some())
            .unwrap_or(false)
    }

    /// Remove the postings of `urls` from `word`; returns how many were removed.
    pub fn remove_entries(&self, word: &[u8], urls: &HandleSet) -> usize {
        let Ok(key) = WordHash::try_from(word) else {
            return 0;
        };
        self.inner
            .write()
            .edit(&key, self.epoch_ms, |c| c.remove_entries(urls))
            .unwrap_or(0)
    }

    /// Remove `url` from every cached word; returns the number of postings removed.
    pub fn try_remove_urls(&self, url: &[u8]) -> usize {
        let mut inner = self.inner.write();
        let words: Vec<WordHash> = inner
            .containers
            .iter()
            .filter(|(_, c)| c.contains(url))
            .map(|(w, _)| *w)
            .collect();
        let mut removed = 0;
        for word in words {
            if inner
                .edit(&word, self.epoch_ms, |c| c.remove(url).is_some())
                .unwrap_or(false)
            {
                removed += 1;
            }
        }
        removed
    }

    /// Largest posting count of any word.
    pub fn max_url_in_cache(&self) -> usize {
        self.inner.read().size_score.max_score().unwrap_or(0).max(0) as usize
    }

    /// Milliseconds since the most recent write to any word.
    pub fn min_age_of_cache(&self) -> Option<u64> {
        let score = self.inner.read().date_score.max_score()?;
        Some(self.age_of(score))
    }

    /// Milliseconds since the oldest write still in the cache.
    pub fn max_age_of_cache(&self) -> Option<u64> {
        let score = self.inner.read().date_score.min_score()?;
        Some(self.age_of(score))
    }

    fn millis_of(&self, score: i64) -> u64 {
        (self.epoch_ms as i64 + score * 1000).max(0) as u64
    }

    fn age_of(&self, score: i64) -> u64 {
        now_millis().saturating_sub(self.millis_of(score))
    }

    /// Current scores for flush-candidate selection.
    pub fn scores(&self) -> CacheScores {
        let inner = self.inner.read();
        let first_key = inner
            .containers
            .keys()
            .min_by(|a, b| self.order.compare(*a, *b))
            .copied();
        CacheScores {
            largest: inner
                .size_score
                .max()
                .map(|(word, score)| (*word, score.max(0) as usize)),
            oldest: inner
                .date_score
                .min()
                .map(|(word, score)| (*word, self.millis_of(score))),
            first_key,
            words: inner.containers.len(),
            byte_size: inner
                .containers
                .values()
                .map(|c| c.byte_size() + HASH_LEN)
                .sum(),
        }
    }

    /// Word hashes in key order, starting at the first one `>= start`.
    pub fn sorted_keys(&self, start: Option<&[u8]>) -> Vec<WordHash> {
        let inner = self.inner.read();
        let mut keys: Vec<WordHash> = inner
            .containers
            .keys()
            .filter(|k| start.is_none_or(|s| self.order.compare(k.as_slice(), s).is_ge()))
            .copied()
            .collect();
        keys.sort_by(|a, b| self.order.compare(a, b));
        keys
    }

    /// Copies of all containers in key order.
    pub fn sorted_snapshot(&self) -> Vec<Container> {
        let inner = self.inner.read();
        let mut containers: Vec<Container> = inner
            .containers
            .values()
            .map(Container::top_level_clone)
            .collect();
        containers.sort_by(|a, b| self.order.compare(a.word_hash(), b.word_hash()));
        containers
    }

    /// An iteration source over a snapshot taken now.
    pub fn source(&self) -> IterSource {
        sorted_source(self.sorted_snapshot(), self.order)
    }

    /// Copies of the containers in key order from `start`.
    ///
    /// The iteration works on a snapshot taken now. With `wrap` it restarts
    /// at the smallest key and runs without end while the snapshot is non-empty.
    pub fn iterate(&self, start: Option<&[u8]>, wrap: bool) -> ContainerIter {
        iterate_source(self.source(), start, wrap)
    }

    /// Move every container out, leaving the cache empty.
    pub fn take_all(&self) -> Vec<Container> {
        let mut inner = self.inner.write();
        let containers: Vec<Container> = inner.containers.drain().map(|(_, c)| c).collect();
        inner.clear();
        containers
    }

    /// Merge containers back in, keeping the newer entry per URL.
    ///
    /// Each container keeps its own `last_wrote`.
    pub fn restore_all<I>(&self, containers: I) -> usize
    where
        I: IntoIterator<Item = Container>,
    {
        let mut inner = self.inner.write();
        let mut restored = 0;
        for container in containers {
            if container.is_empty() {
                continue;
            }
            restored += 1;
            inner.insert(
                &container,
                container.last_wrote(),
                self.max_references,
                self.order,
                self.epoch_ms,
            );
        }
        restored
    }

    /// Drop every container.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Write all containers to `path` in segment format; returns the word count.
    pub fn dump<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let containers = self.sorted_snapshot();
        let tmp = path.with_extension("dump.tmp");
        let mut writer = SegmentWriter::create(&tmp, self.order)?;
        for container in &containers {
            writer.append(container)?;
        }
        let words = writer.len();
        writer.finish()?;
        fs::rename(&tmp, path)?;
        info!("dumped {words} words to {}", path.display());
        Ok(words)
    }

    /// Merge the containers of a dump file into the cache.
    ///
    /// Damaged records are skipped. Returns the number of words restored.
    pub fn restore<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let started = now_millis();
        let containers = segment::read_all(path, self.order)?;
        let restored = self.restore_all(containers);
        info!(
            "restored {restored} words from {} in {} ms",
            path.display(),
            now_millis().saturating_sub(started)
        );
        Ok(restored)
    }

    /// Whether [`close`](Self::close) has completed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write the cache to its dump file, if it has one, and empty it.
    ///
    /// Once a close has succeeded, further calls do nothing, so the dump
    /// written by the first call is never replaced by an empty one. A cache
    /// that is empty at its first close removes a stale dump instead.
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let Some(path) = &self.dump_path else {
            self.clear();
            self.closed.store(true, Ordering::Release);
            return Ok(());
        };
        if self.is_empty() {
            match fs::remove_file(path) {
                Ok(()) => debug!("removed empty dump {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RwiError::from(e)),
            }
            self.closed.store(true, Ordering::Release);
            return Ok(());
        }
        match self.dump(path) {
            Ok(_) => {
                self.clear();
                self.closed.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                warn!("dump to {} failed: {e}", path.display());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::codec::hash_from_u64;

    fn entry(url: u64, modified_days: u32) -> PostingEntry {
        PostingEntry::new(hash_from_u64(url)).with_last_modified_days(modified_days)
    }

    fn filled() -> ContainerCache {
        let cache = ContainerCache::new(KeyOrder::Base64);
        for url in 0..5 {
            cache.add_entry(&hash_from_u64(1), &entry(url, 10), 1_000);
        }
        cache.add_entry(&hash_from_u64(2), &entry(7, 10), 5_000);
        cache
    }

    #[test]
    fn test_add_and_scores() {
        let cache = filled();
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.posting_count(), 6);
        assert_eq!(cache.count(&hash_from_u64(1)), 5);
        assert_eq!(cache.max_url_in_cache(), 5);

        let scores = cache.scores();
        assert_eq!(scores.largest, Some((hash_from_u64(1), 5)));
        assert_eq!(scores.oldest.map(|(w, _)| w), Some(hash_from_u64(1)));
        assert_eq!(scores.first_key, Some(hash_from_u64(1)));
        assert_eq!(scores.words, 2);
    }

    #[test]
    fn test_newer_entry_wins() {
        let cache = ContainerCache::new(KeyOrder::Base64);
        let word = hash_from_u64(1);
        assert!(cache.add_entry(&word, &entry(1, 20).with_hit_count(2), 0));
        assert!(!cache.add_entry(&word, &entry(1, 10).with_hit_count(9), 0));
        assert_eq!(cache.get(&word, None).unwrap().get(&hash_from_u64(1)).unwrap().hit_count, 2);
        assert_eq!(cache.posting_count(), 1);
    }

    #[test]
    fn test_removals_keep_scores() {
        let cache = filled();
        assert!(cache.remove_entry(&hash_from_u64(1), &hash_from_u64(0)));
        assert!(!cache.remove_entry(&hash_from_u64(1), &hash_from_u64(0)));
        assert_eq!(cache.scores().largest, Some((hash_from_u64(1), 4)));

        let urls = HandleSet::from_keys(
            HASH_LEN,
            KeyOrder::Base64,
            [hash_from_u64(1), hash_from_u64(2)].iter().map(|h| h.as_slice()),
        );
        assert_eq!(cache.remove_entries(&hash_from_u64(1), &urls), 2);
        assert_eq!(cache.posting_count(), 3);

        // removing the last posting drops the word
        assert!(cache.remove_entry(&hash_from_u64(2), &hash_from_u64(7)));
        assert!(!cache.has(&hash_from_u64(2)));
        assert_eq!(cache.scores().words, 1);

        assert_eq!(cache.try_remove_urls(&hash_from_u64(3)), 1);
        assert_eq!(cache.posting_count(), 1);
        assert_eq!(cache.delete_container(&hash_from_u64(1)).unwrap().len(), 1);
        assert_eq!(cache.posting_count(), 0);
        assert!(cache.scores().largest.is_none());
    }

    #[test]
    fn test_get_with_filter_is_a_copy() {
        let cache = filled();
        let urls = HandleSet::from_keys(HASH_LEN, KeyOrder::Base64, [hash_from_u64(3)].iter().map(|h| h.as_slice()));
        let selected = cache.get(&hash_from_u64(1), Some(&urls)).unwrap();
        assert_eq!(selected.len(), 1);

        let mut copy = cache.get(&hash_from_u64(1), None).unwrap();
        copy.remove(&hash_from_u64(0));
        assert_eq!(cache.count(&hash_from_u64(1)), 5);
    }

    #[test]
    fn test_iterate_sorted_and_wrapped() {
        let cache = ContainerCache::new(KeyOrder::Base64);
        for word in [3u64, 1, 2] {
            cache.add_entry(&hash_from_u64(word), &entry(1, 1), 0);
        }
        let words: Vec<WordHash> = cache.iterate(None, false).map(|c| *c.word_hash()).collect();
        assert_eq!(words, vec![hash_from_u64(1), hash_from_u64(2), hash_from_u64(3)]);

        let wrapped: Vec<WordHash> = cache
            .iterate(Some(&hash_from_u64(3)), true)
            .take(3)
            .map(|c| *c.word_hash())
            .collect();
        assert_eq!(wrapped, vec![hash_from_u64(3), hash_from_u64(1), hash_from_u64(2)]);
        assert_eq!(cache.sorted_keys(Some(&hash_from_u64(2))).len(), 2);
    }

    #[test]
    fn test_take_and_restore_all() {
        let cache = filled();
        let taken = cache.take_all();
        assert_eq!(taken.len(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.posting_count(), 0);

        cache.add_entry(&hash_from_u64(1), &entry(99, 10), 0);
        assert_eq!(cache.restore_all(taken), 2);
        assert_eq!(cache.count(&hash_from_u64(1)), 6);
        assert_eq!(cache.posting_count(), 7);
    }

    #[test]
    fn test_dump_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ram.dump");
        {
            let cache = ContainerCache::open_dumped(&path, KeyOrder::Base64).unwrap();
            for url in 0..3 {
                cache.add_entry(&hash_from_u64(4), &entry(url, 5), 0);
            }
            cache.close().unwrap();
            assert!(cache.is_empty());
        }
        let cache = ContainerCache::open_dumped(&path, KeyOrder::Base64).unwrap();
        assert_eq!(cache.count(&hash_from_u64(4)), 3);
        assert_eq!(cache.max_url_in_cache(), 3);
        assert!(cache.max_age_of_cache().is_some());

        cache.take_all();
        cache.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_second_close_keeps_dump() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ram.dump");
        {
            let cache = ContainerCache::open_dumped(&path, KeyOrder::Base64).unwrap();
            cache.add_entry(&hash_from_u64(9), &entry(1, 5), 0);
            cache.close().unwrap();
            assert!(cache.is_closed());
            cache.close().unwrap();
            assert!(path.exists());
        }
        let cache = ContainerCache::open_dumped(&path, KeyOrder::Base64).unwrap();
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.count(&hash_from_u64(9)), 1);
    }

    #[test]
    fn test_unreadable_dump_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ram.dump");
        fs::write(&path, b"garbage").unwrap();
        let cache = ContainerCache::open_dumped(&path, KeyOrder::Base64).unwrap();
        assert!(cache.is_empty());
        assert!(dir.path().join("ram.broken").exists());
    }

    #[test]
    fn test_max_references() {
        let cache = ContainerCache::new(KeyOrder::Base64).with_max_references(2);
        for (url, days) in [(1u64, 30u32), (2, 10), (3, 20)] {
            cache.add_entry(&hash_from_u64(9), &entry(url, days), 0);
        }
        let kept = cache.get(&hash_from_u64(9), None).unwrap();
        assert_eq!(kept.len(), 2);
        assert!(!kept.contains(&hash_from_u64(2)));
        assert_eq!(cache.posting_count(), 2);
    }
}
