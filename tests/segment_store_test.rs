use std::fs;

use rwindex::codec::hash_from_u64;
use rwindex::codec::posting::PostingEntry;
use rwindex::error::Result;
use rwindex::order::KeyOrder;
use rwindex::rwi::segment::index_path;
use rwindex::rwi::{Container, Segment, SegmentStore};
use tempfile::TempDir;

const PREFIX: &str = "text.index";

fn container(word: u64, urls: std::ops::Range<u64>, days: u32) -> Container {
    Container::from_entries(
        hash_from_u64(word),
        KeyOrder::Base64,
        urls.map(|u| PostingEntry::new(hash_from_u64(u)).with_last_modified_days(days)),
    )
}

#[test]
fn test_reopen_without_index_file() -> Result<()> {
    let dir = TempDir::new().unwrap();

    // 1. Write a segment and drop its index file
    let path = {
        let store = SegmentStore::open(dir.path(), PREFIX, KeyOrder::Base64)?;
        let segment = store
            .new_segment(&[container(1, 0..3, 1), container(2, 0..50, 1)])?
            .expect("segment written");
        store.delete(&hash_from_u64(1))?;
        store.close()?;
        segment.path().to_path_buf()
    };
    let idx = index_path(&path);
    assert!(idx.exists());
    fs::remove_file(&idx)?;

    // 2. Reopen rebuilds the index by scanning and honours the tombstone
    let store = SegmentStore::open(dir.path(), PREFIX, KeyOrder::Base64)?;
    assert_eq!(store.segment_count(), 1);
    assert!(!store.has(&hash_from_u64(1)));
    assert_eq!(store.count(&hash_from_u64(2))?, 50);
    assert!(idx.exists(), "index file is written back after a scan");

    Ok(())
}

#[test]
fn test_stale_index_is_ignored() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("single.blob");

    let segment = Segment::create(&path, KeyOrder::Base64, [container(3, 0..4, 1)])?;
    segment.sync_index()?;

    // Grow the word past its slot so the record moves, without saving the index
    segment.replace(&hash_from_u64(3), |mut c| {
        for u in 10..40 {
            c.add(&PostingEntry::new(hash_from_u64(u)));
        }
        c
    })?;
    drop(segment);

    let reopened = Segment::open(&path, KeyOrder::Base64)?;
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.get(&hash_from_u64(3))?.unwrap().len(), 34);
    Ok(())
}

#[test]
fn test_unfinished_write_is_removed() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let leftover = dir.path().join(format!("{PREFIX}.20240101000000000.000007.blob.tmp"));
    fs::write(&leftover, b"partial")?;
    let foreign = dir.path().join("other.prefix.blob");
    fs::write(&foreign, b"not ours")?;

    let store = SegmentStore::open(dir.path(), PREFIX, KeyOrder::Base64)?;
    assert_eq!(store.segment_count(), 0);
    assert!(!leftover.exists());
    assert!(foreign.exists());
    Ok(())
}

#[test]
fn test_compaction_keeps_newest_postings() -> Result<()> {
    let dir = TempDir::new().unwrap();

    {
        let store = SegmentStore::open(dir.path(), PREFIX, KeyOrder::Base64)?;
        store.new_segment(&[container(1, 0..10, 1), container(2, 0..5, 1)])?;
        store.new_segment(&[container(1, 5..15, 9)])?;
        store.new_segment(&[container(3, 0..2, 1)])?;
        assert_eq!(store.segment_count(), 3);

        // Merge until one segment is left
        assert!(store.compact_smallest()?);
        assert!(store.compact_smallest()?);
        assert!(!store.compact_smallest()?);
        assert_eq!(store.segment_count(), 1);

        let merged = store.get(&hash_from_u64(1))?.unwrap();
        assert_eq!(merged.len(), 15);
        assert_eq!(merged.get(&hash_from_u64(7)).unwrap().last_modified, 9);
        assert_eq!(merged.get(&hash_from_u64(2)).unwrap().last_modified, 1);
    }

    // Only the compacted file survives a restart
    let blobs = fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "blob"))
        .count();
    assert_eq!(blobs, 1);

    let store = SegmentStore::open(dir.path(), PREFIX, KeyOrder::Base64)?;
    let words: Vec<_> = store.iterate(None, false).map(|c| (*c.word_hash(), c.len())).collect();
    assert_eq!(
        words,
        vec![(hash_from_u64(1), 15), (hash_from_u64(2), 5), (hash_from_u64(3), 2)]
    );
    Ok(())
}

#[test]
fn test_wrapping_iteration_from_middle() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let store = SegmentStore::open(dir.path(), PREFIX, KeyOrder::Base64)?;
    store.new_segment(&[container(10, 0..1, 1), container(30, 0..1, 1)])?;
    store.new_segment(&[container(20, 0..1, 1), container(40, 0..1, 1)])?;

    let walk: Vec<_> = store
        .iterate(Some(&hash_from_u64(25)), true)
        .take(5)
        .map(|c| *c.word_hash())
        .collect();
    let expected: Vec<_> = [30, 40, 10, 20, 30].into_iter().map(hash_from_u64).collect();
    assert_eq!(walk, expected);
    Ok(())
}
