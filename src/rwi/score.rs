//! Score tracking for cache eviction.

use std::collections::BTreeSet;
use std::hash::Hash;

use ahash::AHashMap;

/// Tracks an integer score per key and answers min/max queries.
///
/// Keys with equal scores are ordered by the key itself, so the answers are
/// deterministic.
#[derive(Debug, Clone)]
pub struct ScoreMap<K>
where
    K: Ord + Hash + Clone,
{
    scores: AHashMap<K, i64>,
    ranked: BTreeSet<(i64, K)>,
}

impl<K> Default for ScoreMap<K>
where
    K: Ord + Hash + Clone,
{
    fn default() -> Self {
        ScoreMap {
            scores: AHashMap::new(),
            ranked: BTreeSet::new(),
        }
    }
}

impl<K> ScoreMap<K>
where
    K: Ord + Hash + Clone,
{
    /// Create an empty score map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Set the score of `key`.
    pub fn set_score(&mut self, key: K, score: i64) {
        if let Some(old) = self.scores.insert(key.clone(), score) {
            self.ranked.remove(&(old, key.clone()));
        }
        self.ranked.insert((score, key));
    }

    /// Add `delta` to the score of `key` (absent keys start at 0).
    pub fn add_score(&mut self, key: K, delta: i64) -> i64 {
        let score = self.get_score(&key).unwrap_or(0).saturating_add(delta);
        self.set_score(key, score);
        score
    }

    /// Increment the score of `key`.
    pub fn inc_score(&mut self, key: K) -> i64 {
        self.add_score(key, 1)
    }

    /// Decrement the score of `key`.
    pub fn dec_score(&mut self, key: K) -> i64 {
        self.add_score(key, -1)
    }

    /// Stop tracking `key`, returning its score.
    pub fn delete_score(&mut self, key: &K) -> Option<i64> {
        let score = self.scores.remove(key)?;
        self.ranked.remove(&(score, key.clone()));
        Some(score)
    }

    /// Score of `key`.
    pub fn get_score(&self, key: &K) -> Option<i64> {
        self.scores.get(key).copied()
    }

    /// Highest score and its key.
    pub fn max(&self) -> Option<(&K, i64)> {
        self.ranked.last().map(|(score, key)| (key, *score))
    }

    /// Lowest score and its key.
    pub fn min(&self) -> Option<(&K, i64)> {
        self.ranked.first().map(|(score, key)| (key, *score))
    }

    /// Highest score.
    pub fn max_score(&self) -> Option<i64> {
        self.max().map(|(_, score)| score)
    }

    /// Lowest score.
    pub fn min_score(&self) -> Option<i64> {
        self.min().map(|(_, score)| score)
    }

    /// Key with the highest score.
    pub fn max_object(&self) -> Option<&K> {
        self.max().map(|(key, _)| key)
    }

    /// Key with the lowest score.
    pub fn min_object(&self) -> Option<&K> {
        self.min().map(|(key, _)| key)
    }

    /// Keys ordered by ascending score.
    pub fn keys_by_score(&self) -> impl Iterator<Item = &K> {
        self.ranked.iter().map(|(_, key)| key)
    }

    /// Stop tracking every key.
    pub fn clear(&mut self) {
        self.scores.clear();
        self.ranked.clear();
    }
}
