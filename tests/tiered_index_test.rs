use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rwindex::prelude::*;
use rwindex::rwi::{FixedProbe, Tier};
use rwindex::util::time::now_millis;
use tempfile::TempDir;

fn open(dir: &TempDir, config: &IndexConfig) -> Result<TieredIndex> {
    TieredIndex::open_with_probe(dir.path(), config, Box::new(FixedProbe(u64::MAX)))
}

fn entry(url: u64) -> PostingEntry {
    PostingEntry::new(hash_from_u64(url)).with_last_modified_days(100)
}

#[test]
fn test_oversized_word_is_evicted_before_older_word() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let config = IndexConfig::default()
        .with_max_word_count(2)
        .with_flush_hysteresis(1)
        .with_reference_count_limit(4);
    let index = open(&dir, &config)?;
    let (old, big, fresh) = (hash_from_u64(1), hash_from_u64(2), hash_from_u64(3));

    // 1. An old small word, then a word at the size limit, then a fresh one
    index.add_entry(&old, &entry(1), now_millis() - 10 * 60 * 1000, false)?;
    for url in 0..4 {
        index.add_entry(&big, &entry(url), 0, false)?;
    }
    assert_eq!(index.tier_size(Tier::External), 2);
    index.add_entry(&fresh, &entry(1), 0, false)?;

    // 2. Three words exceed the limit of two: drained to 2 - 1 words.
    //    The big word goes first, then the oldest one.
    assert_eq!(index.tier_size(Tier::External), 1);
    assert!(index.backend().has(&big));
    assert!(index.backend().has(&old));
    assert!(!index.backend().has(&fresh));

    // 3. Reads still see every word
    assert_eq!(index.count(&big)?, 4);
    assert_eq!(index.count(&old)?, 1);
    assert_eq!(index.count(&fresh)?, 1);

    index.close()?;
    Ok(())
}

#[test]
fn test_tiers_survive_restart() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let config = IndexConfig::default();
    let (a, b) = (hash_from_u64(10), hash_from_u64(20));

    // 1. First run: postings spread over both tiers and the backend
    {
        let index = open(&dir, &config)?;
        index.add_entry(&a, &entry(1), 0, true)?;
        index.add_entry(&a, &entry(2), 0, false)?;
        index.add_entry(&b, &entry(3), 0, false)?;
        index.backend().add_entry(&b, &entry(4), 0)?;
        index.close()?;
        index.close()?;
        assert!(index.get_container(&a, None)?.is_none());
        assert!(index.add_entry(&a, &entry(9), 0, true).is_err());
    }
    assert!(dir.path().join("internal.dump").exists());
    assert!(dir.path().join("external.dump").exists());

    // 2. Restart: the dumps are loaded back into their tiers
    {
        let index = open(&dir, &config)?;
        assert_eq!(index.tier_size(Tier::Internal), 1);
        assert_eq!(index.tier_size(Tier::External), 2);
        assert_eq!(index.count(&a)?, 2);
        assert_eq!(index.count(&b)?, 2);

        // 3. Drain everything, so the next close leaves no dumps
        let moved = index.flush_for(std::time::Duration::from_secs(5))?;
        assert_eq!(moved, 3);
        assert_eq!(index.tier_size(Tier::Internal), 0);
        assert_eq!(index.tier_size(Tier::External), 0);
        index.close()?;
    }
    assert!(!dir.path().join("internal.dump").exists());
    assert!(!dir.path().join("external.dump").exists());

    // 4. Everything now lives in the backend
    let index = open(&dir, &config)?;
    assert_eq!(index.count(&a)?, 2);
    assert_eq!(index.count(&b)?, 2);
    assert!(index.backend().has(&a));
    Ok(())
}

#[test]
fn test_repeated_close_keeps_dumps() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let config = IndexConfig::default();
    let words: Vec<WordHash> = (1..=3).map(hash_from_u64).collect();

    // 1. Close twice, once through the store trait, then drop
    {
        let index = open(&dir, &config)?;
        for (i, word) in words.iter().enumerate() {
            index.add_entry(word, &entry(i as u64), 0, i % 2 == 0)?;
        }
        index.close()?;
        PostingStore::close(&index)?;
    }

    // 2. Every word is back after the restart
    let index = open(&dir, &config)?;
    assert_eq!(index.tier_size(Tier::Internal), 2);
    assert_eq!(index.tier_size(Tier::External), 1);
    for word in &words {
        assert_eq!(index.count(word)?, 1);
    }
    Ok(())
}

#[test]
fn test_reads_during_migration_see_every_posting() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let config = IndexConfig::default()
        .with_max_ram_entries(20)
        .with_max_word_count(4)
        .with_flush_hysteresis(2);
    let index = open(&dir, &config)?;
    let watched = hash_from_u64(1);
    for url in 0..3 {
        index.add_entry(&watched, &entry(url), now_millis() - 60_000, false)?;
    }

    std::thread::scope(|scope| -> Result<()> {
        // Writer: enough words to push the watched word into the backend
        let writer = scope.spawn(|| -> Result<()> {
            for n in 0..2_000u64 {
                index.add_entry(&hash_from_u64(100 + n % 50), &entry(n), 0, false)?;
            }
            Ok(())
        });

        let mut reads = 0;
        while !writer.is_finished() || reads == 0 {
            assert_eq!(index.count(&watched)?, 3, "read #{reads}");
            assert!(index.has(&watched));
            reads += 1;
        }
        writer.join().expect("writer thread")?;
        Ok(())
    })?;

    assert!(index.backend().has(&watched));
    assert_eq!(index.count(&watched)?, 3);
    index.close()?;
    Ok(())
}

#[test]
fn test_random_workload_matches_model() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let config = IndexConfig::default()
        .with_max_ram_entries(40)
        .with_max_word_count(8)
        .with_flush_hysteresis(3)
        .with_reference_count_limit(12);
    let mut rng = StdRng::seed_from_u64(42);
    let mut model: BTreeMap<u64, BTreeSet<u64>> = BTreeMap::new();

    {
        let index = open(&dir, &config)?;
        for _ in 0..600 {
            let word = rng.random_range(0..30u64);
            let url = rng.random_range(0..60u64);
            match rng.random_range(0..10u32) {
                0 => {
                    index.remove_entry(&hash_from_u64(word), &hash_from_u64(url))?;
                    if let Some(urls) = model.get_mut(&word) {
                        urls.remove(&url);
                    }
                }
                n => {
                    index.add_entry(&hash_from_u64(word), &entry(url), 0, n % 2 == 0)?;
                    model.entry(word).or_default().insert(url);
                }
            }
        }
        model.retain(|_, urls| !urls.is_empty());

        for (word, urls) in &model {
            let container = index.get_container(&hash_from_u64(*word), None)?.unwrap();
            let found: BTreeSet<Vec<u8>> = container.url_hashes().map(<[u8]>::to_vec).collect();
            let expected: BTreeSet<Vec<u8>> = urls.iter().map(|u| hash_from_u64(*u).to_vec()).collect();
            assert_eq!(found, expected, "word {word}");
        }
        let words: Vec<WordHash> = index.iterate(None, false).map(|c| *c.word_hash()).collect();
        let expected: Vec<WordHash> = model.keys().map(|w| hash_from_u64(*w)).collect();
        assert_eq!(words, expected);

        index.close()?;
    }

    // The same content after a restart
    let index = open(&dir, &config)?;
    for (word, urls) in &model {
        assert_eq!(index.count(&hash_from_u64(*word))?, urls.len(), "word {word}");
    }
    Ok(())
}
