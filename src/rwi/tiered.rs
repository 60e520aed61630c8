//! Two RAM tiers in front of a backend cell.
//!
//! Writes go to the internal or the external tier. After every write the
//! flush-control loop moves words from an overfull tier into the backend
//! [`IndexCell`]. Reads merge all three: backend, external, internal, with
//! the newer entry winning a URL collision.
//!
//! Moving a word from a tier to the backend takes the migration lock for
//! writing; reads that span the layers take it for reading, so a word in
//! transit is always found in exactly one of them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::codec::WordHash;
use crate::codec::posting::PostingEntry;
use crate::config::IndexConfig;
use crate::error::{Result, RwiError};
use crate::index::HandleSet;
use crate::order::KeyOrder;
use crate::rwi::cache::ContainerCache;
use crate::rwi::cell::IndexCell;
use crate::rwi::container::Container;
use crate::rwi::eviction::{BudgetProbe, EvictionPolicy, MemoryProbe};
use crate::rwi::join::SetOps;
use crate::rwi::store::{
    ContainerIter, IterSource, PostingStore, iterate_source, merged_source, sorted_source,
};

const INTERNAL_DUMP: &str = "internal.dump";
const EXTERNAL_DUMP: &str = "external.dump";
const BACKEND_DIR: &str = "backend";

/// Upper bound on oversized words drained in one flush-control pass.
const MAX_CHUNK_ROUNDS: usize = 100;

/// Which RAM tier a write goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Internal,
    External,
}

impl Tier {
    fn of(internal: bool) -> Self {
        if internal { Tier::Internal } else { Tier::External }
    }
}

/// Sizes and ages of the tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TieredStats {
    pub internal_words: usize,
    pub internal_postings: usize,
    pub external_words: usize,
    pub external_postings: usize,
    pub backend_ram_postings: usize,
    pub backend_segments: usize,
    pub max_url_in_cache: usize,
    pub min_age_of_cache_ms: Option<u64>,
    pub max_age_of_cache_ms: Option<u64>,
}

/// Include and exclude containers found for a query.
#[derive(Debug, Clone, Default)]
pub struct LocalSearch {
    pub includes: AHashMap<WordHash, Container>,
    pub excludes: AHashMap<WordHash, Container>,
}

/// The reverse word index: internal and external RAM tiers over a backend cell.
#[derive(Debug)]
pub struct TieredIndex {
    dir: PathBuf,
    config: IndexConfig,
    internal: ContainerCache,
    external: ContainerCache,
    backend: IndexCell,
    policy: EvictionPolicy,
    probe: Box<dyn MemoryProbe>,
    ops: SetOps,
    flush_lock: Mutex<()>,
    migration: RwLock<()>,
    closed: AtomicBool,
}

impl TieredIndex {
    /// Open the index in `dir`, measuring free memory against `ram_budget_bytes`.
    pub fn open<P: AsRef<Path>>(dir: P, config: &IndexConfig) -> Result<TieredIndex> {
        let probe = BudgetProbe::new(config.ram_budget_bytes);
        Self::open_with_probe(dir, config, Box::new(probe))
    }

    /// Open the index with a custom memory probe.
    pub fn open_with_probe<P: AsRef<Path>>(
        dir: P,
        config: &IndexConfig,
        probe: Box<dyn MemoryProbe>,
    ) -> Result<TieredIndex> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let internal = open_tier(&dir.join(INTERNAL_DUMP), config)?;
        let external = open_tier(&dir.join(EXTERNAL_DUMP), config)?;
        let backend = IndexCell::open(dir.join(BACKEND_DIR), config)?;
        info!(
            "opened tiered index {}: {} internal, {} external words",
            dir.display(),
            internal.size(),
            external.size()
        );
        Ok(TieredIndex {
            dir,
            config: config.clone(),
            internal,
            external,
            backend,
            policy: EvictionPolicy::from_config(config),
            probe,
            ops: SetOps::new(config.join_cost),
            flush_lock: Mutex::new(()),
            migration: RwLock::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Directory of the index.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The configuration the index was opened with.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The backend cell.
    pub fn backend(&self) -> &IndexCell {
        &self.backend
    }

    /// Join and exclude operations with the configured cost constants.
    pub fn set_ops(&self) -> SetOps {
        self.ops
    }

    fn tier(&self, tier: Tier) -> &ContainerCache {
        match tier {
            Tier::Internal => &self.internal,
            Tier::External => &self.external,
        }
    }

    /// Words held by a RAM tier.
    pub fn tier_size(&self, tier: Tier) -> usize {
        self.tier(tier).size()
    }

    /// Whether [`close`](Self::close) completed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RwiError::closed(format!("index {} is closed", self.dir.display())));
        }
        Ok(())
    }

    /// Merge `container` into the internal or external tier, then run flush control.
    pub fn add_entries(&self, container: &Container, internal: bool) -> Result<()> {
        self.check_open()?;
        self.tier(Tier::of(internal)).add_entries(container);
        self.flush_control()
    }

    /// Add one posting to a tier; `update_time` of 0 means now.
    pub fn add_entry(
        &self,
        word: &WordHash,
        entry: &PostingEntry,
        update_time: u64,
        internal: bool,
    ) -> Result<()> {
        self.check_open()?;
        self.tier(Tier::of(internal)).add_entry(word, entry, update_time);
        self.flush_control()
    }

    /// Drain overfull tiers into the backend.
    ///
    /// Per tier, words above `reference_count_limit` postings go first, in a
    /// bounded loop. Then, while the tier holds more than `max_word_count`
    /// words, eviction candidates are moved until the tier is down to
    /// `max_word_count - flush_hysteresis`.
    pub fn flush_control(&self) -> Result<()> {
        let _flush = self.flush_lock.lock();
        for tier in [Tier::Internal, Tier::External] {
            self.drain_tier(tier)?;
        }
        Ok(())
    }

    fn drain_tier(&self, tier: Tier) -> Result<()> {
        let cache = self.tier(tier);
        let mut rounds = 0;
        while rounds < MAX_CHUNK_ROUNDS && cache.max_url_in_cache() > self.config.reference_count_limit {
            let Some((word, _)) = cache.scores().largest else {
                break;
            };
            if !self.move_to_backend(cache, &word)? {
                break;
            }
            rounds += 1;
        }

        if cache.size() > self.config.max_word_count {
            let target = self
                .config
                .max_word_count
                .saturating_sub(self.config.flush_hysteresis);
            let before = cache.size();
            while cache.size() > target {
                let Some(word) = self.policy.select_flush_candidate(cache, self.probe.as_ref()) else {
                    break;
                };
                if !self.move_to_backend(cache, &word)? {
                    break;
                }
            }
            debug!("{tier:?} tier drained from {before} to {} words", cache.size());
        }
        Ok(())
    }

    fn move_to_backend(&self, cache: &ContainerCache, word: &WordHash) -> Result<bool> {
        {
            let _migration = self.migration.write();
            let Some(container) = cache.delete_container(word) else {
                return Ok(false);
            };
            if let Err(e) = self.backend.stage_entries(&container) {
                warn!("moving {container} to the backend failed: {e}");
                cache.restore_all([container]);
                return Err(e);
            }
        }
        self.backend.flush_if_full()?;
        Ok(true)
    }

    /// Move words from the RAM tiers to the backend until `duration` has
    /// passed or both tiers are empty; returns the words moved.
    pub fn flush_for(&self, duration: Duration) -> Result<usize> {
        self.check_open()?;
        let _flush = self.flush_lock.lock();
        let until = Instant::now() + duration;
        let mut moved = 0;
        for tier in [Tier::External, Tier::Internal] {
            let cache = self.tier(tier);
            while Instant::now() < until {
                let Some(word) = self.policy.select_flush_candidate(cache, self.probe.as_ref()) else {
                    break;
                };
                if !self.move_to_backend(cache, &word)? {
                    break;
                }
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Postings of `word` over all tiers, restricted to `url_filter` if given.
    pub fn get_container(&self, word: &[u8], url_filter: Option<&HandleSet>) -> Result<Option<Container>> {
        if self.is_closed() {
            return Ok(None);
        }
        let layers = {
            let _migration = self.migration.read();
            [
                self.backend.get(word, url_filter)?,
                self.external.get(word, url_filter),
                self.internal.get(word, url_filter),
            ]
        };
        let merged = layers.into_iter().flatten().reduce(|older, newer| older.merge(&newer));
        Ok(merged.filter(|c| !c.is_empty()))
    }

    /// Whether any tier holds `word`.
    pub fn has(&self, word: &[u8]) -> bool {
        if self.is_closed() {
            return false;
        }
        let _migration = self.migration.read();
        self.internal.has(word) || self.external.has(word) || self.backend.has(word)
    }

    /// Distinct postings of `word`.
    pub fn count(&self, word: &[u8]) -> Result<usize> {
        Ok(self.get_container(word, None)?.map_or(0, |c| c.len()))
    }

    fn containers_for(&self, words: &[WordHash], url_filter: Option<&HandleSet>) -> Result<Option<Vec<Container>>> {
        let mut containers = Vec::with_capacity(words.len());
        for word in words {
            match self.get_container(word, url_filter)? {
                Some(container) => containers.push(container),
                None => return Ok(None),
            }
        }
        Ok(Some(containers))
    }

    /// URLs holding every word of `words`, with combined word distances.
    ///
    /// `None` when a word has no postings or nothing survives the join.
    pub fn join_containers(
        &self,
        words: &[WordHash],
        budget: Option<Duration>,
        max_distance: u32,
    ) -> Result<Option<Container>> {
        let Some(containers) = self.containers_for(words, None)? else {
            return Ok(None);
        };
        Ok(self.ops.join_containers(&containers, budget, max_distance))
    }

    /// `pivot` without the URLs of any word of `excludes`.
    pub fn exclude_containers(
        &self,
        pivot: Container,
        excludes: &[WordHash],
        budget: Option<Duration>,
    ) -> Result<Container> {
        let mut found = Vec::with_capacity(excludes.len());
        for word in excludes {
            if let Some(container) = self.get_container(word, None)? {
                found.push(container);
            }
        }
        Ok(self.ops.exclude_containers(pivot, &found, budget))
    }

    /// Containers for the words of a query.
    ///
    /// The includes are all-or-nothing: if one query word has no postings the
    /// result is empty, and exclusions are only looked up when includes exist.
    pub fn local_search(
        &self,
        query: &[WordHash],
        exclude: &[WordHash],
        url_filter: Option<&HandleSet>,
    ) -> Result<LocalSearch> {
        let mut search = LocalSearch::default();
        let Some(includes) = self.containers_for(query, url_filter)? else {
            return Ok(search);
        };
        search.includes = includes.into_iter().map(|c| (*c.word_hash(), c)).collect();
        if search.includes.is_empty() {
            return Ok(search);
        }
        for word in exclude {
            if let Some(container) = self.get_container(word, url_filter)? {
                search.excludes.insert(*word, container);
            }
        }
        Ok(search)
    }

    /// Remove `word` from every tier, returning what it held.
    pub fn delete_container(&self, word: &[u8]) -> Result<Option<Container>> {
        self.check_open()?;
        let layers = [
            self.backend.delete_container(word)?,
            self.external.delete_container(word),
            self.internal.delete_container(word),
        ];
        Ok(layers.into_iter().flatten().reduce(|older, newer| older.merge(&newer)))
    }

    /// Remove the posting of `url` from `word` in every tier.
    pub fn remove_entry(&self, word: &[u8], url: &[u8]) -> Result<bool> {
        self.check_open()?;
        let internal = self.internal.remove_entry(word, url);
        let external = self.external.remove_entry(word, url);
        let backend = self.backend.remove_entry(word, url)?;
        Ok(internal || external || backend)
    }

    /// Remove the postings of `urls` from `word` in every tier.
    pub fn remove_entries(&self, word: &[u8], urls: &HandleSet) -> Result<usize> {
        self.check_open()?;
        Ok(self.internal.remove_entries(word, urls)
            + self.external.remove_entries(word, urls)
            + self.backend.remove_entries(word, urls)?)
    }

    /// An iteration source over all tiers as they are now.
    pub fn source(&self) -> IterSource {
        let order = self.config.key_order;
        if self.is_closed() {
            return sorted_source(Vec::new(), order);
        }
        let sources = {
            let _migration = self.migration.read();
            vec![self.backend.source(), self.external.source(), self.internal.source()]
        };
        merged_source(sources, order)
    }

    /// Merged containers in key order from `start`.
    pub fn iterate(&self, start: Option<&[u8]>, wrap: bool) -> ContainerIter {
        iterate_source(self.source(), start, wrap)
    }

    /// Up to `count` containers from `start`; with `wrap` the walk continues
    /// at the smallest word after the largest.
    pub fn container_set(&self, start: Option<&[u8]>, wrap: bool, count: usize) -> Vec<Container> {
        self.iterate(start, wrap)
            .filter(|c| !c.is_empty())
            .take(count)
            .collect()
    }

    /// Largest posting count of a word in either RAM tier.
    pub fn max_url_in_cache(&self) -> usize {
        self.internal.max_url_in_cache().max(self.external.max_url_in_cache())
    }

    /// Milliseconds since the latest write to either RAM tier.
    pub fn min_age_of_cache(&self) -> Option<u64> {
        [self.internal.min_age_of_cache(), self.external.min_age_of_cache()]
            .into_iter()
            .flatten()
            .min()
    }

    /// Milliseconds since the oldest write still held in a RAM tier.
    pub fn max_age_of_cache(&self) -> Option<u64> {
        [self.internal.max_age_of_cache(), self.external.max_age_of_cache()]
            .into_iter()
            .flatten()
            .max()
    }

    pub fn stats(&self) -> TieredStats {
        TieredStats {
            internal_words: self.internal.size(),
            internal_postings: self.internal.posting_count(),
            external_words: self.external.size(),
            external_postings: self.external.posting_count(),
            backend_ram_postings: self.backend.ram_postings(),
            backend_segments: self.backend.segment_count(),
            max_url_in_cache: self.max_url_in_cache(),
            min_age_of_cache_ms: self.min_age_of_cache(),
            max_age_of_cache_ms: self.max_age_of_cache(),
        }
    }

    /// Dump both RAM tiers and close the backend.
    ///
    /// A second call does nothing.
    pub fn close(&self) -> Result<()> {
        let _flush = self.flush_lock.lock();
        if self.is_closed() {
            return Ok(());
        }
        self.internal.close()?;
        self.external.close()?;
        self.backend.close()?;
        self.closed.store(true, Ordering::Release);
        info!("closed tiered index {}", self.dir.display());
        Ok(())
    }
}

fn open_tier(path: &Path, config: &IndexConfig) -> Result<ContainerCache> {
    Ok(ContainerCache::open_dumped(path, config.key_order)?.with_max_references(config.max_references))
}

impl PostingStore for TieredIndex {
    fn get(&self, word: &[u8], url_filter: Option<&HandleSet>) -> Result<Option<Container>> {
        self.get_container(word, url_filter)
    }

    fn has(&self, word: &[u8]) -> Result<bool> {
        Ok(TieredIndex::has(self, word))
    }

    fn add_entries(&self, container: &Container) -> Result<()> {
        TieredIndex::add_entries(self, container, false)
    }

    fn delete_container(&self, word: &[u8]) -> Result<Option<Container>> {
        TieredIndex::delete_container(self, word)
    }

    fn remove_entry(&self, word: &[u8], url: &[u8]) -> Result<bool> {
        TieredIndex::remove_entry(self, word, url)
    }

    fn remove_entries(&self, word: &[u8], urls: &HandleSet) -> Result<usize> {
        TieredIndex::remove_entries(self, word, urls)
    }

    fn iterate(&self, start: Option<&[u8]>, wrap: bool) -> Result<ContainerIter> {
        Ok(TieredIndex::iterate(self, start, wrap))
    }

    fn size(&self) -> usize {
        let order = self.config.key_order;
        let mut words = {
            let _migration = self.migration.read();
            let mut words = self.backend.keys(None);
            words.extend(self.internal.sorted_keys(None));
            words.extend(self.external.sorted_keys(None));
            words
        };
        words.sort_by(|a, b| order.compare(a, b));
        words.dedup();
        words.len()
    }

    fn order(&self) -> KeyOrder {
        self.config.key_order
    }

    fn close(&self) -> Result<()> {
        TieredIndex::close(self)
    }
}

impl Drop for TieredIndex {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("closing index {}: {e}", self.dir.display());
        }
    }
}
