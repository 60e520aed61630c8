//! A directory of segment files read as one index.
//!
//! Segments are mounted in name order, which is creation order because the
//! names carry a UTC timestamp and a generation counter. Reads merge the
//! containers of all segments holding a word; on URL collisions the entry
//! from the newer segment wins.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, info, warn};
use parking_lot::RwLock;

use crate::codec::WordHash;
use crate::error::{Result, RwiError};
use crate::order::KeyOrder;
use crate::rwi::container::Container;
use crate::rwi::segment::{SEGMENT_EXTENSION, Segment};
use crate::rwi::store::{ContainerIter, IterSource, iterate_source, merge_sorted};
use crate::util::time::file_stamp;

/// Segment files of one index cell.
#[derive(Debug)]
pub struct SegmentStore {
    dir: PathBuf,
    prefix: String,
    order: KeyOrder,
    segments: RwLock<Vec<Arc<Segment>>>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl SegmentStore {
    /// Open the store in `dir`, mounting every `<prefix>.*.blob` file.
    ///
    /// Leftover temporary files from an interrupted write are removed.
    /// Files that cannot be mounted are logged and skipped.
    pub fn open<P: AsRef<Path>>(dir: P, prefix: &str, order: KeyOrder) -> Result<SegmentStore> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(&format!("{prefix}.")) {
                continue;
            }
            if name.ends_with(&format!(".{SEGMENT_EXTENSION}.tmp")) {
                warn!("removing unfinished segment {}", path.display());
                fs::remove_file(&path)?;
            } else if name.ends_with(&format!(".{SEGMENT_EXTENSION}")) {
                names.push(path);
            }
        }
        names.sort();

        let mut segments = Vec::with_capacity(names.len());
        let mut generation = 0;
        for path in names {
            if let Some(g) = parse_generation(&path) {
                generation = generation.max(g + 1);
            }
            match Segment::open(&path, order) {
                Ok(segment) => segments.push(Arc::new(segment)),
                Err(e) => warn!("cannot mount {}: {e}", path.display()),
            }
        }
        info!(
            "opened segment store {} with {} segments",
            dir.display(),
            segments.len()
        );

        Ok(SegmentStore {
            dir,
            prefix: prefix.to_string(),
            order,
            segments: RwLock::new(segments),
            generation: AtomicU64::new(generation),
            closed: AtomicBool::new(false),
        })
    }

    /// Directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Key order of the store.
    pub fn order(&self) -> KeyOrder {
        self.order
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RwiError::closed("segment store is closed"));
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<Arc<Segment>> {
        if self.is_closed() {
            return Vec::new();
        }
        self.segments.read().clone()
    }

    fn next_path(&self) -> PathBuf {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel);
        self.dir.join(format!(
            "{}.{}.{generation:06}.{SEGMENT_EXTENSION}",
            self.prefix,
            file_stamp()
        ))
    }

    /// Write `containers` to a new segment and mount it.
    ///
    /// Containers are sorted by word hash first; empty ones are skipped.
    /// Returns `None` when nothing was left to write.
    pub fn new_segment(&self, containers: &[Container]) -> Result<Option<Arc<Segment>>> {
        self.check_open()?;
        let mut sorted: Vec<&Container> = containers.iter().filter(|c| !c.is_empty()).collect();
        if sorted.is_empty() {
            return Ok(None);
        }
        sorted.sort_by(|a, b| self.order.compare(a.word_hash(), b.word_hash()));

        let path = self.next_path();
        let segment = Arc::new(Segment::create(&path, self.order, sorted)?);
        self.segments.write().push(Arc::clone(&segment));
        Ok(Some(segment))
    }

    /// Mount an existing segment file as the newest segment.
    pub fn mount<P: AsRef<Path>>(&self, path: P) -> Result<Arc<Segment>> {
        self.check_open()?;
        let segment = Arc::new(Segment::open(path, self.order)?);
        self.segments.write().push(Arc::clone(&segment));
        Ok(segment)
    }

    /// Number of mounted segments.
    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Merged container of `word` over all segments, oldest first.
    pub fn get(&self, word: &[u8]) -> Result<Option<Container>> {
        let mut merged: Option<Container> = None;
        for segment in self.snapshot() {
            let Some(container) = segment.get(word)? else {
                continue;
            };
            merged = Some(match merged {
                None => container,
                Some(older) => older.merge(&container),
            });
        }
        Ok(merged.filter(|c| !c.is_empty()))
    }

    /// Whether any segment holds `word`.
    pub fn has(&self, word: &[u8]) -> bool {
        self.snapshot().iter().any(|s| s.has(word))
    }

    /// Number of distinct postings of `word`.
    pub fn count(&self, word: &[u8]) -> Result<usize> {
        Ok(self.get(word)?.map_or(0, |c| c.len()))
    }

    /// Delete `word` from every segment; returns how many held it.
    pub fn delete(&self, word: &[u8]) -> Result<usize> {
        self.check_open()?;
        let mut deleted = 0;
        for segment in self.snapshot() {
            if segment.delete(word)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Apply `rewrite` to the container of `word` in every segment.
    ///
    /// Returns the total number of entries removed.
    pub fn replace<F>(&self, word: &[u8], mut rewrite: F) -> Result<usize>
    where
        F: FnMut(Container) -> Container,
    {
        self.check_open()?;
        let mut removed = 0;
        for segment in self.snapshot() {
            removed += segment.replace(word, &mut rewrite)?;
        }
        Ok(removed)
    }

    /// Live word hashes of all segments in key order, starting at `start`.
    pub fn keys(&self, start: Option<&[u8]>) -> Vec<WordHash> {
        let mut keys: Vec<WordHash> = self
            .snapshot()
            .iter()
            .flat_map(|s| s.keys(start))
            .collect();
        keys.sort_by(|a, b| self.order.compare(a, b));
        keys.dedup();
        keys
    }

    /// An iteration source over the segments mounted now.
    pub fn source(&self) -> IterSource {
        let segments = self.snapshot();
        let order = self.order;
        Arc::new(move |start: Option<&[u8]>| merge_segments(&segments, order, start))
    }

    /// Merged containers in key order from `start`.
    ///
    /// With `wrap` the iteration restarts at the smallest key after the
    /// largest one and runs without end while the store is non-empty.
    pub fn iterate(&self, start: Option<&[u8]>, wrap: bool) -> ContainerIter {
        iterate_source(self.source(), start, wrap)
    }

    /// Merge the adjacent pair of segments with the smallest combined size.
    ///
    /// Only neighbours are merged so that the age order of the segments, and
    /// with it the collision rule of [`get`](Self::get), is preserved.
    /// Callers must not write to the store concurrently.
    /// Returns false when fewer than two segments are mounted.
    pub fn compact_smallest(&self) -> Result<bool> {
        self.check_open()?;
        let segments = self.snapshot();
        if segments.len() < 2 {
            return Ok(false);
        }

        let older = (0..segments.len() - 1)
            .min_by_key(|&i| segments[i].file_len() + segments[i + 1].file_len())
            .unwrap_or(0);
        let newer = older + 1;

        let pair = [Arc::clone(&segments[older]), Arc::clone(&segments[newer])];
        let merged: Vec<Container> = merge_segments(&pair, self.order, None).collect();
        // the result replaces the newer file under its own name so that the
        // name order stays the age order after a reopen
        let compacted = if merged.is_empty() {
            None
        } else {
            Some(Arc::new(Segment::create(pair[1].path(), self.order, &merged)?))
        };

        {
            let mut mounted = self.segments.write();
            let position = |target: &Arc<Segment>| mounted.iter().position(|s| Arc::ptr_eq(s, target));
            let (Some(i_old), Some(i_new)) = (position(&pair[0]), position(&pair[1])) else {
                return Err(RwiError::storage("segments changed during compaction"));
            };
            match compacted {
                Some(segment) => mounted[i_new] = segment,
                None => {
                    mounted.remove(i_new);
                }
            }
            mounted.remove(i_old);
        }

        let obsolete: &[Arc<Segment>] = if merged.is_empty() { &pair } else { &pair[..1] };
        for segment in obsolete {
            if let Err(e) = segment.remove_files() {
                warn!("cannot remove {}: {e}", segment.path().display());
            }
        }
        info!(
            "compacted {} into {} with {} words",
            pair[0].path().display(),
            pair[1].path().display(),
            merged.len()
        );
        Ok(true)
    }

    /// Persist segment indexes and refuse further writes.
    ///
    /// A second call does nothing.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let segments = std::mem::take(&mut *self.segments.write());
        for segment in segments {
            segment.sync_index()?;
        }
        debug!("closed segment store {}", self.dir.display());
        Ok(())
    }
}

fn merge_segments(segments: &[Arc<Segment>], order: KeyOrder, start: Option<&[u8]>) -> ContainerIter {
    let sources: Vec<ContainerIter> = segments
        .iter()
        .map(|s| Box::new(Segment::iter(s, start)) as ContainerIter)
        .collect();
    merge_sorted(sources, order)
}

/// Generation number from `<prefix>.<stamp>.<generation>.blob`.
fn parse_generation(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    stem.rsplit('.').next()?.parse().ok()
}

impl Drop for SegmentStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("closing segment store {}: {e}", self.dir.display());
        }
    }
}
