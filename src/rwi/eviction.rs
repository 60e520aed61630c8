//! Choosing which RAM word to flush next.

use std::fmt::Debug;

use crate::codec::WordHash;
use crate::config::IndexConfig;
use crate::rwi::cache::{CacheScores, ContainerCache};
use crate::util::time::now_millis;

/// Reports how much memory is left for the RAM tiers.
pub trait MemoryProbe: Send + Sync + Debug {
    /// Free bytes, given the current estimate of bytes held by a cache.
    fn free_memory(&self, cache_bytes: usize) -> u64;
}

/// Measures free memory against a fixed budget.
#[derive(Debug, Clone, Copy)]
pub struct BudgetProbe {
    budget: u64,
}

impl BudgetProbe {
    pub fn new(budget: u64) -> Self {
        BudgetProbe { budget }
    }
}

impl MemoryProbe for BudgetProbe {
    fn free_memory(&self, cache_bytes: usize) -> u64 {
        self.budget.saturating_sub(cache_bytes as u64)
    }
}

/// Reports a constant amount of free memory.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub u64);

impl MemoryProbe for FixedProbe {
    fn free_memory(&self, _cache_bytes: usize) -> u64 {
        self.0
    }
}

/// Flush-candidate selection over the size and date scores of a cache.
///
/// Checks run in a fixed order:
///
/// 1. a word with at least `reference_count_limit` postings,
/// 2. the oldest word if it is older than `reference_age_limit_ms`,
/// 3. under memory pressure the largest word, otherwise the oldest,
/// 4. the first word in key order.
///
/// The size check comes first so that one huge word cannot grow without
/// bound while older small words are drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub reference_count_limit: usize,
    pub reference_age_limit_ms: u64,
    pub low_memory_threshold: u64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

impl EvictionPolicy {
    pub fn from_config(config: &IndexConfig) -> Self {
        EvictionPolicy {
            reference_count_limit: config.reference_count_limit,
            reference_age_limit_ms: config.reference_age_limit_ms,
            low_memory_threshold: config.low_memory_threshold,
        }
    }

    /// The word of `cache` to flush next, if the cache is not empty.
    pub fn select_flush_candidate(&self, cache: &ContainerCache, probe: &dyn MemoryProbe) -> Option<WordHash> {
        let scores = cache.scores();
        let free = probe.free_memory(scores.byte_size);
        self.decide(&scores, now_millis(), free)
    }

    /// Apply the selection rules to a score snapshot.
    pub fn decide(&self, scores: &CacheScores, now_ms: u64, free_memory: u64) -> Option<WordHash> {
        if let Some((word, size)) = scores.largest {
            if size >= self.reference_count_limit {
                return Some(word);
            }
        }
        if let Some((word, last_wrote)) = scores.oldest {
            if now_ms.saturating_sub(last_wrote) > self.reference_age_limit_ms {
                return Some(word);
            }
        }
        let pick = if free_memory < self.low_memory_threshold {
            scores.largest.map(|(word, _)| word)
        } else {
            scores.oldest.map(|(word, _)| word)
        };
        pick.or(scores.first_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::hash_from_u64;
    use crate::codec::posting::PostingEntry;
    use crate::order::KeyOrder;

    const NOW: u64 = 10_000_000;

    fn policy() -> EvictionPolicy {
        EvictionPolicy {
            reference_count_limit: 10,
            reference_age_limit_ms: 60_000,
            low_memory_threshold: 1000,
        }
    }

    fn scores(largest: (u64, usize), oldest: (u64, u64)) -> CacheScores {
        CacheScores {
            largest: Some((hash_from_u64(largest.0), largest.1)),
            oldest: Some((hash_from_u64(oldest.0), oldest.1)),
            first_key: Some(hash_from_u64(0)),
            words: 3,
            byte_size: 0,
        }
    }

    #[test]
    fn test_size_limit_beats_age() {
        let s = scores((1, 10), (2, NOW - 10 * 60_000));
        assert_eq!(policy().decide(&s, NOW, u64::MAX), Some(hash_from_u64(1)));
    }

    #[test]
    fn test_stale_word() {
        let s = scores((1, 9), (2, NOW - 60_001));
        assert_eq!(policy().decide(&s, NOW, u64::MAX), Some(hash_from_u64(2)));
    }

    #[test]
    fn test_memory_pressure() {
        let s = scores((1, 9), (2, NOW - 1000));
        assert_eq!(policy().decide(&s, NOW, 999), Some(hash_from_u64(1)));
        assert_eq!(policy().decide(&s, NOW, 1000), Some(hash_from_u64(2)));
    }

    #[test]
    fn test_empty_and_fallback() {
        assert_eq!(policy().decide(&CacheScores::default(), NOW, 0), None);
        let s = CacheScores {
            first_key: Some(hash_from_u64(5)),
            words: 1,
            ..CacheScores::default()
        };
        assert_eq!(policy().decide(&s, NOW, 0), Some(hash_from_u64(5)));
    }

    #[test]
    fn test_select_from_cache() {
        let cache = ContainerCache::new(KeyOrder::Base64);
        // the big word is the most recent one
        cache.add_entry(&hash_from_u64(1), &PostingEntry::new(hash_from_u64(1)), 1);
        for url in 0..10 {
            cache.add_entry(&hash_from_u64(2), &PostingEntry::new(hash_from_u64(url)), 0);
        }
        let picked = policy().select_flush_candidate(&cache, &FixedProbe(u64::MAX));
        assert_eq!(picked, Some(hash_from_u64(2)));

        cache.delete_container(&hash_from_u64(2));
        let picked = policy().select_flush_candidate(&cache, &BudgetProbe::new(u64::MAX));
        assert_eq!(picked, Some(hash_from_u64(1)));
    }

    #[test]
    fn test_budget_probe() {
        assert_eq!(BudgetProbe::new(100).free_memory(30), 70);
        assert_eq!(BudgetProbe::new(100).free_memory(300), 0);
    }
}
