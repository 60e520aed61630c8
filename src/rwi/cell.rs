//! An index cell: a RAM cache in front of a segment store.
//!
//! New postings always land in RAM. When RAM holds more than
//! `max_ram_entries` postings the whole cache is written to a new segment.
//! The flush swaps the RAM map out and writes the segment outside of the
//! cache lock; while the write runs, the swapped-out containers stay
//! readable as a frozen snapshot.
//!
//! Readers hold the frozen slot's read lock across all three layers, and the
//! flush moves containers between RAM, frozen and store only while holding
//! its write lock. A reader therefore never sees a container in none of the
//! layers. Lock order is frozen slot, then RAM.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::codec::WordHash;
use crate::codec::posting::PostingEntry;
use crate::config::IndexConfig;
use crate::error::{Result, RwiError};
use crate::index::HandleSet;
use crate::order::KeyOrder;
use crate::rwi::cache::ContainerCache;
use crate::rwi::container::Container;
use crate::rwi::segment_store::SegmentStore;
use crate::rwi::store::{
    ContainerIter, IterSource, PostingStore, iterate_source, merged_source, sorted_source,
};

/// RAM cache plus segment files for one index partition.
#[derive(Debug)]
pub struct IndexCell {
    dir: PathBuf,
    order: KeyOrder,
    max_ram_entries: usize,
    ram: ContainerCache,
    frozen: RwLock<Option<Arc<Vec<Container>>>>,
    store: SegmentStore,
    flush_lock: Mutex<()>,
    closed: AtomicBool,
}

impl IndexCell {
    /// Open the cell in `dir`, mounting the segments found there.
    pub fn open<P: AsRef<Path>>(dir: P, config: &IndexConfig) -> Result<IndexCell> {
        let dir = dir.as_ref().to_path_buf();
        let store = SegmentStore::open(&dir, &config.segment_prefix, config.key_order)?;
        info!(
            "opened index cell {} ({} segments)",
            dir.display(),
            store.segment_count()
        );
        Ok(IndexCell {
            dir,
            order: config.key_order,
            max_ram_entries: config.max_ram_entries,
            ram: ContainerCache::new(config.key_order).with_max_references(config.max_references),
            frozen: RwLock::new(None),
            store,
            flush_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Directory of the cell.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Key order of the cell.
    pub fn order(&self) -> KeyOrder {
        self.order
    }

    /// The segment store behind the RAM cache.
    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    /// Whether [`close`](Self::close) completed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RwiError::closed(format!("index cell {} is closed", self.dir.display())));
        }
        Ok(())
    }

    /// Postings currently held in RAM.
    pub fn ram_postings(&self) -> usize {
        self.ram.posting_count()
    }

    /// Words currently held in RAM.
    pub fn ram_size(&self) -> usize {
        self.ram.size()
    }

    /// Merge `container` into RAM, flushing if RAM grew past its limit.
    pub fn add_entries(&self, container: &Container) -> Result<()> {
        self.check_open()?;
        self.ram.add_entries(container);
        self.flush_if_full()
    }

    /// Add one posting; `update_time` of 0 means now.
    pub fn add_entry(&self, word: &WordHash, entry: &PostingEntry, update_time: u64) -> Result<()> {
        self.check_open()?;
        self.ram.add_entry(word, entry, update_time);
        self.flush_if_full()
    }

    /// Merge `container` into RAM without flushing.
    ///
    /// Callers that need the insert to be atomic with other work run
    /// [`flush_if_full`](Self::flush_if_full) afterwards.
    pub(crate) fn stage_entries(&self, container: &Container) -> Result<()> {
        self.check_open()?;
        self.ram.add_entries(container);
        Ok(())
    }

    pub(crate) fn flush_if_full(&self) -> Result<()> {
        if self.ram.posting_count() > self.max_ram_entries {
            self.flush()?;
        }
        Ok(())
    }

    fn frozen_get(&self, frozen: &Option<Arc<Vec<Container>>>, word: &[u8]) -> Option<Container> {
        let containers = frozen.as_ref()?;
        let at = containers
            .binary_search_by(|c| self.order.compare(c.word_hash(), word))
            .ok()?;
        containers.get(at).map(Container::top_level_clone)
    }

    /// Postings of `word` from RAM and every segment, restricted to
    /// `url_filter` if given. On URL collisions the newer entry wins.
    pub fn get(&self, word: &[u8], url_filter: Option<&HandleSet>) -> Result<Option<Container>> {
        if self.is_closed() {
            return Ok(None);
        }
        let (in_ram, in_frozen, stored) = {
            let frozen = self.frozen.read();
            let in_ram = self.ram.get(word, None);
            let in_frozen = self.frozen_get(&frozen, word);
            (in_ram, in_frozen, self.store.get(word)?)
        };
        let mut merged = stored;
        for layer in [in_frozen, in_ram].into_iter().flatten() {
            merged = Some(match merged {
                Some(older) => older.merge(&layer),
                None => layer,
            });
        }
        let merged = match (merged, url_filter) {
            (Some(container), Some(urls)) => Some(container.select(urls)),
            (merged, _) => merged,
        };
        Ok(merged.filter(|c| !c.is_empty()))
    }

    /// Whether `word` has postings anywhere in the cell.
    pub fn has(&self, word: &[u8]) -> bool {
        if self.is_closed() {
            return false;
        }
        let frozen = self.frozen.read();
        self.ram.has(word) || self.frozen_get(&frozen, word).is_some() || self.store.has(word)
    }

    /// Distinct postings of `word`.
    pub fn count(&self, word: &[u8]) -> Result<usize> {
        Ok(self.get(word, None)?.map_or(0, |c| c.len()))
    }

    /// Remove `word` from RAM and all segments, returning what it held.
    pub fn delete_container(&self, word: &[u8]) -> Result<Option<Container>> {
        self.check_open()?;
        let _flush = self.flush_lock.lock();
        let removed = self.get(word, None)?;
        self.ram.delete_container(word);
        self.store.delete(word)?;
        Ok(removed)
    }

    /// Remove the posting of `url` from `word`.
    pub fn remove_entry(&self, word: &[u8], url: &[u8]) -> Result<bool> {
        self.check_open()?;
        let _flush = self.flush_lock.lock();
        let in_ram = self.ram.remove_entry(word, url);
        let on_disk = self.store.replace(word, |mut c| {
            c.remove(url);
            c
        })?;
        Ok(in_ram || on_disk > 0)
    }

    /// Remove the postings of `urls` from `word`; returns how many were removed.
    pub fn remove_entries(&self, word: &[u8], urls: &HandleSet) -> Result<usize> {
        self.check_open()?;
        let _flush = self.flush_lock.lock();
        let in_ram = self.ram.remove_entries(word, urls);
        let on_disk = self.store.replace(word, |mut c| {
            c.remove_entries(urls);
            c
        })?;
        Ok(in_ram + on_disk)
    }

    /// Remove `url` from every word; returns the number of postings removed.
    ///
    /// This visits every word of every segment.
    pub fn try_remove_urls(&self, url: &[u8]) -> Result<usize> {
        self.check_open()?;
        let _flush = self.flush_lock.lock();
        let mut removed = self.ram.try_remove_urls(url);
        for word in self.store.keys(None) {
            removed += self.store.replace(&word, |mut c| {
                c.remove(url);
                c
            })?;
        }
        Ok(removed)
    }

    /// Distinct word hashes of RAM and segments in key order from `start`.
    pub fn keys(&self, start: Option<&[u8]>) -> Vec<WordHash> {
        if self.is_closed() {
            return Vec::new();
        }
        let frozen = self.frozen.read();
        let mut words = self.ram.sorted_keys(start);
        if let Some(containers) = frozen.as_ref() {
            words.extend(
                containers
                    .iter()
                    .map(|c| *c.word_hash())
                    .filter(|w| start.is_none_or(|s| self.order.compare(w, s).is_ge())),
            );
        }
        words.extend(self.store.keys(start));
        drop(frozen);
        words.sort_by(|a, b| self.order.compare(a, b));
        words.dedup();
        words
    }

    /// An iteration source over RAM and segments as they are now.
    pub fn source(&self) -> IterSource {
        if self.is_closed() {
            return sorted_source(Vec::new(), self.order);
        }
        let frozen = self.frozen.read();
        let ram = self.ram.source();
        let snapshot = frozen.as_ref().map(|c| sorted_source(Vec::clone(c), self.order));
        let mut sources = vec![self.store.source()];
        sources.extend(snapshot);
        sources.push(ram);
        drop(frozen);
        merged_source(sources, self.order)
    }

    /// Containers in key order from `start`, merged over RAM and segments.
    pub fn iterate(&self, start: Option<&[u8]>, wrap: bool) -> ContainerIter {
        iterate_source(self.source(), start, wrap)
    }

    /// Write everything in RAM to a new segment; returns the words written.
    ///
    /// On failure the containers are merged back into RAM, so nothing is
    /// lost and the flush can be retried.
    pub fn flush(&self) -> Result<usize> {
        let _flush = self.flush_lock.lock();
        self.flush_locked()
    }

    fn flush_locked(&self) -> Result<usize> {
        let frozen = {
            let mut slot = self.frozen.write();
            let mut containers = self.ram.take_all();
            if containers.is_empty() {
                return Ok(0);
            }
            containers.sort_by(|a, b| self.order.compare(a.word_hash(), b.word_hash()));
            let frozen = Arc::new(containers);
            *slot = Some(Arc::clone(&frozen));
            frozen
        };

        // new_segment mounts the file before returning, so clearing the
        // slot afterwards leaves the words visible in the store.
        match self.store.new_segment(&frozen) {
            Ok(segment) => {
                *self.frozen.write() = None;
                let words = frozen.len();
                if let Some(segment) = segment {
                    info!("flushed {words} words to {}", segment.path().display());
                }
                Ok(words)
            }
            Err(e) => {
                warn!("flush of {} failed: {e}", self.dir.display());
                let mut slot = self.frozen.write();
                self.ram.restore_all(frozen.iter().cloned());
                *slot = None;
                Err(e)
            }
        }
    }

    /// Merge the two smallest adjacent segments.
    pub fn compact(&self) -> Result<bool> {
        self.check_open()?;
        let _flush = self.flush_lock.lock();
        self.store.compact_smallest()
    }

    /// Number of mounted segments.
    pub fn segment_count(&self) -> usize {
        self.store.segment_count()
    }

    /// Flush RAM to a final segment and close the segment store.
    ///
    /// A second call does nothing. If the final flush fails the cell stays
    /// open and the error is returned.
    pub fn close(&self) -> Result<()> {
        let _flush = self.flush_lock.lock();
        if self.is_closed() {
            return Ok(());
        }
        self.flush_locked()?;
        self.closed.store(true, Ordering::Release);
        self.store.close()?;
        debug!("closed index cell {}", self.dir.display());
        Ok(())
    }
}

impl PostingStore for IndexCell {
    fn get(&self, word: &[u8], url_filter: Option<&HandleSet>) -> Result<Option<Container>> {
        IndexCell::get(self, word, url_filter)
    }

    fn has(&self, word: &[u8]) -> Result<bool> {
        Ok(IndexCell::has(self, word))
    }

    fn add_entries(&self, container: &Container) -> Result<()> {
        IndexCell::add_entries(self, container)
    }

    fn delete_container(&self, word: &[u8]) -> Result<Option<Container>> {
        IndexCell::delete_container(self, word)
    }

    fn remove_entry(&self, word: &[u8], url: &[u8]) -> Result<bool> {
        IndexCell::remove_entry(self, word, url)
    }

    fn remove_entries(&self, word: &[u8], urls: &HandleSet) -> Result<usize> {
        IndexCell::remove_entries(self, word, urls)
    }

    fn iterate(&self, start: Option<&[u8]>, wrap: bool) -> Result<ContainerIter> {
        Ok(IndexCell::iterate(self, start, wrap))
    }

    fn size(&self) -> usize {
        self.keys(None).len()
    }

    fn order(&self) -> KeyOrder {
        self.order
    }

    fn close(&self) -> Result<()> {
        IndexCell::close(self)
    }
}

impl Drop for IndexCell {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("closing index cell {}: {e}", self.dir.display());
        }
    }
}
