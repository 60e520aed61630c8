//! Configuration of the reverse word index.
//!
//! [`IndexConfig`] carries every tunable of the cell, the RAM tiers and the
//! eviction policy. It is plain serde data and can be kept as a JSON file
//! next to the index.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::order::KeyOrder;
use crate::rwi::join::JoinCost;

/// Configuration for an index cell and a tiered index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Postings held in a cell's RAM before it is flushed to a new segment.
    pub max_ram_entries: usize,

    /// Words a RAM tier may hold before flush control drains it.
    pub max_word_count: usize,

    /// How far below `max_word_count` a drained tier ends up.
    pub flush_hysteresis: usize,

    /// Postings per word above which the word is flushed first.
    pub reference_count_limit: usize,

    /// Age in milliseconds above which the oldest word is flushed first.
    pub reference_age_limit_ms: u64,

    /// Free memory (bytes) below which the largest word is flushed.
    pub low_memory_threshold: u64,

    /// Memory budget (bytes) the default probe measures free memory against.
    pub ram_budget_bytes: u64,

    /// Cost constants for choosing the join and exclude algorithm.
    pub join_cost: JoinCost,

    /// Maximum postings per container, 0 for no limit.
    pub max_references: usize,

    /// File name prefix of segment files.
    pub segment_prefix: String,

    /// Order of word and URL hashes.
    pub key_order: KeyOrder,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            max_ram_entries: 100_000,
            max_word_count: 10_000,
            flush_hysteresis: 20,
            reference_count_limit: 800,
            reference_age_limit_ms: 30 * 60 * 1000, // 30 minutes
            low_memory_threshold: 1024 * 1024,      // 1MB
            ram_budget_bytes: 64 * 1024 * 1024,     // 64MB
            join_cost: JoinCost::default(),
            max_references: 0,
            segment_prefix: "index".to_string(),
            key_order: KeyOrder::Base64,
        }
    }
}

impl IndexConfig {
    /// Read a configuration from a JSON file; missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the configuration as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Set the cell RAM flush threshold.
    pub fn with_max_ram_entries(mut self, max_ram_entries: usize) -> Self {
        self.max_ram_entries = max_ram_entries;
        self
    }

    /// Set the tier word limit.
    pub fn with_max_word_count(mut self, max_word_count: usize) -> Self {
        self.max_word_count = max_word_count;
        self
    }

    /// Set the flush hysteresis.
    pub fn with_flush_hysteresis(mut self, flush_hysteresis: usize) -> Self {
        self.flush_hysteresis = flush_hysteresis;
        self
    }

    /// Set the per-word posting limit.
    pub fn with_reference_count_limit(mut self, limit: usize) -> Self {
        self.reference_count_limit = limit;
        self
    }

    /// Set the age limit in milliseconds.
    pub fn with_reference_age_limit_ms(mut self, limit: u64) -> Self {
        self.reference_age_limit_ms = limit;
        self
    }

    /// Set the low memory threshold.
    pub fn with_low_memory_threshold(mut self, bytes: u64) -> Self {
        self.low_memory_threshold = bytes;
        self
    }

    /// Set the RAM budget.
    pub fn with_ram_budget_bytes(mut self, bytes: u64) -> Self {
        self.ram_budget_bytes = bytes;
        self
    }

    /// Set the container size limit.
    pub fn with_max_references(mut self, max_references: usize) -> Self {
        self.max_references = max_references;
        self
    }

    /// Set the key order.
    pub fn with_key_order(mut self, key_order: KeyOrder) -> Self {
        self.key_order = key_order;
        self
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.max_ram_entries, 100_000);
        assert_eq!(config.reference_count_limit, 800);
        assert_eq!(config.reference_age_limit_ms, 1_800_000);
        assert_eq!(config.key_order, KeyOrder::Base64);
        assert_eq!(config.join_cost, JoinCost::default());
    }

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        let config = IndexConfig::default()
            .with_max_ram_entries(3)
            .with_key_order(KeyOrder::Natural);
        config.save(&path).unwrap();
        assert_eq!(IndexConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_json() {
        let config: IndexConfig = serde_json::from_str(r#"{"max_word_count": 5}"#).unwrap();
        assert_eq!(config.max_word_count, 5);
        assert_eq!(config.flush_hysteresis, 20);
    }
}
