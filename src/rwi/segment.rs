//! Append-only BLOB files of serialized containers.
//!
//! Layout of a segment file:
//!
//! ```text
//! header  : "RWIB" | version u32 | key order signature [2]
//! record  : flag u8 | word hash [12] | slot_len u32 | payload_len u32 | slot
//! slot    : payload (exported container) | crc32(payload) u32 | padding
//! ```
//!
//! Records are written in ascending word-hash order. A segment is never
//! rewritten as a whole: [`Segment::delete`] flips the record flag to a
//! tombstone, and [`Segment::replace`] rewrites the payload inside its slot
//! when it fits, or appends a fresh record and tombstones the old slot.
//!
//! The key → offset index lives in memory and is persisted next to the
//! segment as `<name>.idx` (`"RWIX" | segment length u64 | handle map | crc`).
//! An index whose recorded segment length does not match the file is stale
//! and the segment is scanned instead.

use std::borrow::Borrow;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::codec::{HASH_LEN, WordHash, hash_to_string};
use crate::error::{Result, RwiError};
use crate::index::handle_map::HandleMap;
use crate::order::KeyOrder;
use crate::rwi::container::Container;
use crate::util::checksum::{ChecksumReader, ChecksumWriter};

const MAGIC: &[u8; 4] = b"RWIB";
const INDEX_MAGIC: &[u8; 4] = b"RWIX";
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 4 + 4 + 2;
const RECORD_HEADER_LEN: u64 = 1 + HASH_LEN as u64 + 4 + 4;
const CRC_LEN: usize = 4;

const FLAG_LIVE: u8 = 0;
const FLAG_TOMBSTONE: u8 = 1;

/// File extension of segment files.
pub const SEGMENT_EXTENSION: &str = "blob";
/// File extension of segment index files.
pub const INDEX_EXTENSION: &str = "idx";

#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    flag: u8,
    key: WordHash,
    slot_len: u32,
    payload_len: u32,
}

impl RecordHeader {
    fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let flag = reader.read_u8()?;
        let mut key = [0u8; HASH_LEN];
        reader.read_exact(&mut key)?;
        let slot_len = reader.read_u32::<BigEndian>()?;
        let payload_len = reader.read_u32::<BigEndian>()?;
        Ok(RecordHeader {
            flag,
            key,
            slot_len,
            payload_len,
        })
    }

    fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.flag)?;
        writer.write_all(&self.key)?;
        writer.write_u32::<BigEndian>(self.slot_len)?;
        writer.write_u32::<BigEndian>(self.payload_len)?;
        Ok(())
    }

    fn record_len(&self) -> u64 {
        RECORD_HEADER_LEN + u64::from(self.slot_len)
    }
}

fn encode_slot(container: &Container) -> Result<(Vec<u8>, u32)> {
    let mut slot = container.export();
    let payload_len = u32::try_from(slot.len())
        .map_err(|_| RwiError::storage(format!("{container} is too large for a segment record")))?;
    let crc = crc32fast::hash(&slot);
    slot.write_u32::<BigEndian>(crc)?;
    Ok((slot, payload_len))
}

/// Path of the index file belonging to `segment_path`.
pub fn index_path(segment_path: &Path) -> PathBuf {
    segment_path.with_extension(INDEX_EXTENSION)
}

/// Streams containers into a new segment file.
///
/// Containers must arrive in ascending word-hash order.
pub struct SegmentWriter {
    path: PathBuf,
    out: BufWriter<File>,
    order: KeyOrder,
    position: u64,
    index: HandleMap,
    last_key: Option<WordHash>,
}

impl SegmentWriter {
    /// Create the file and write its header.
    pub fn create<P: AsRef<Path>>(path: P, order: KeyOrder) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut out = BufWriter::new(File::create(&path)?);
        out.write_all(MAGIC)?;
        out.write_u32::<BigEndian>(VERSION)?;
        out.write_all(&order.signature())?;
        Ok(SegmentWriter {
            path,
            out,
            order,
            position: HEADER_LEN,
            index: HandleMap::new(HASH_LEN, order),
            last_key: None,
        })
    }

    /// Append one container. Empty containers are skipped.
    pub fn append(&mut self, container: &Container) -> Result<()> {
        if container.is_empty() {
            return Ok(());
        }
        let key = *container.word_hash();
        if let Some(last) = self.last_key {
            if self.order.compare(&last, &key) != std::cmp::Ordering::Less {
                return Err(RwiError::invalid_argument(format!(
                    "segment keys out of order: {} after {}",
                    hash_to_string(&key),
                    hash_to_string(&last)
                )));
            }
        }

        let (slot, payload_len) = encode_slot(container)?;
        let header = RecordHeader {
            flag: FLAG_LIVE,
            key,
            slot_len: slot.len() as u32,
            payload_len,
        };
        header.write(&mut self.out)?;
        self.out.write_all(&slot)?;

        self.index.add_unique(&key, self.position);
        self.position += header.record_len();
        self.last_key = Some(key);
        Ok(())
    }

    /// Number of containers written.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether nothing was written yet.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Flush and sync the file; returns the index and the file length.
    pub fn finish(self) -> Result<(PathBuf, HandleMap, u64)> {
        let file = self.out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        let mut index = self.index;
        index.finish_initialization();
        Ok((self.path, index, self.position))
    }
}

struct SegmentFile {
    file: File,
    index: HandleMap,
    length: u64,
    garbage: u64,
    dirty: bool,
}

impl SegmentFile {
    fn read_header_at(&mut self, offset: u64) -> Result<RecordHeader> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(RecordHeader::read(&mut self.file)?)
    }

    /// Read and verify the container at `offset`; damaged records yield `None`.
    fn read_container(&mut self, offset: u64, order: KeyOrder) -> Result<Option<(RecordHeader, Container)>> {
        let header = self.read_header_at(offset)?;
        if header.flag != FLAG_LIVE {
            return Ok(None);
        }
        if offset.saturating_add(header.record_len()) > self.length {
            warn!(
                "record {} at {offset}: slot runs past the end of the file",
                hash_to_string(&header.key)
            );
            return Ok(None);
        }
        if (header.payload_len as usize) + CRC_LEN > header.slot_len as usize {
            warn!(
                "record {} at {offset}: payload exceeds slot",
                hash_to_string(&header.key)
            );
            return Ok(None);
        }
        let mut payload = vec![0u8; header.payload_len as usize];
        self.file.read_exact(&mut payload)?;
        let stored = self.file.read_u32::<BigEndian>()?;
        if stored != crc32fast::hash(&payload) {
            warn!(
                "record {} at {offset}: checksum mismatch, skipped",
                hash_to_string(&header.key)
            );
            return Ok(None);
        }
        match Container::import(header.key, &payload, order) {
            Ok(container) => Ok(Some((header, container))),
            Err(e) => {
                warn!("record {} at {offset}: {e}", hash_to_string(&header.key));
                Ok(None)
            }
        }
    }

    fn write_flag(&mut self, offset: u64, flag: u8) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_u8(flag)?;
        Ok(())
    }

    fn append_record(&mut self, key: WordHash, slot: &[u8], payload_len: u32) -> Result<u64> {
        let offset = self.length;
        let header = RecordHeader {
            flag: FLAG_LIVE,
            key,
            slot_len: slot.len() as u32,
            payload_len,
        };
        let mut buf = Vec::with_capacity(RECORD_HEADER_LEN as usize + slot.len());
        header.write(&mut buf)?;
        buf.extend_from_slice(slot);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&buf)?;
        self.length += header.record_len();
        Ok(offset)
    }
}

/// One mounted segment file.
pub struct Segment {
    path: PathBuf,
    order: KeyOrder,
    inner: Mutex<SegmentFile>,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("order", &self.order)
            .finish()
    }
}

impl Segment {
    /// Write `containers` (ascending by word hash) to `path` and mount the result.
    ///
    /// The data goes to a temporary file first and is renamed into place once
    /// synced, so a crash never leaves a half-written segment under `path`.
    pub fn create<P, I>(path: P, order: KeyOrder, containers: I) -> Result<Segment>
    where
        P: AsRef<Path>,
        I: IntoIterator,
        I::Item: Borrow<Container>,
    {
        let path = path.as_ref();
        let tmp = path.with_extension(format!("{SEGMENT_EXTENSION}.tmp"));
        let mut writer = SegmentWriter::create(&tmp, order)?;
        for container in containers {
            if let Err(e) = writer.append(<I::Item as Borrow<Container>>::borrow(&container)) {
                drop(writer);
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        }
        let (_, mut index, length) = writer.finish()?;
        fs::rename(&tmp, path)?;
        if let Err(e) = write_index(&index_path(path), &mut index, length) {
            warn!("could not write index for {}: {e}", path.display());
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        info!("wrote segment {} with {} words", path.display(), index.len());
        Ok(Segment {
            path: path.to_path_buf(),
            order,
            inner: Mutex::new(SegmentFile {
                file,
                index,
                length,
                garbage: 0,
                dirty: false,
            }),
        })
    }

    /// Mount an existing segment file.
    pub fn open<P: AsRef<Path>>(path: P, order: KeyOrder) -> Result<Segment> {
        let path = path.as_ref();
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let length = file.metadata()?.len();

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).map_err(|_| {
            RwiError::storage(format!("{} is too short for a segment header", path.display()))
        })?;
        if &magic != MAGIC {
            return Err(RwiError::storage(format!("{} is not a segment file", path.display())));
        }
        let version = file.read_u32::<BigEndian>()?;
        if version != VERSION {
            return Err(RwiError::storage(format!(
                "{} has segment version {version}, expected {VERSION}",
                path.display()
            )));
        }
        let mut signature = [0u8; 2];
        file.read_exact(&mut signature)?;
        if KeyOrder::from_signature(signature) != Some(order) {
            return Err(RwiError::storage(format!(
                "{} is sorted in a different key order",
                path.display()
            )));
        }

        let (index, length, dirty) = match load_index(&index_path(path), length, order) {
            Some(index) => (index, length, false),
            None => {
                let (index, valid_length) = scan(&mut file, length, order, path)?;
                (index, valid_length, true)
            }
        };

        let segment = Segment {
            path: path.to_path_buf(),
            order,
            inner: Mutex::new(SegmentFile {
                file,
                index,
                length,
                garbage: 0,
                dirty,
            }),
        };
        if dirty {
            if let Err(e) = segment.sync_index() {
                warn!("could not write index for {}: {e}", path.display());
            }
        }
        Ok(segment)
    }

    /// Path of the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Key order of the segment.
    pub fn order(&self) -> KeyOrder {
        self.order
    }

    /// Number of live words.
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// Whether the segment has no live words.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of the file in bytes.
    pub fn file_len(&self) -> u64 {
        self.inner.lock().length
    }

    /// Bytes occupied by tombstoned records since mounting.
    pub fn garbage_bytes(&self) -> u64 {
        self.inner.lock().garbage
    }

    /// Whether the segment holds `word`.
    pub fn has(&self, word: &[u8]) -> bool {
        self.inner.lock().index.contains(word)
    }

    /// Read the container of `word`.
    ///
    /// Damaged records are logged and reported as absent; I/O errors propagate.
    pub fn get(&self, word: &[u8]) -> Result<Option<Container>> {
        let mut inner = self.inner.lock();
        let Some(offset) = inner.index.get(word) else {
            return Ok(None);
        };
        Ok(inner
            .read_container(offset, self.order)?
            .map(|(_, container)| container))
    }

    /// Tombstone the record of `word`; returns false if it was absent.
    pub fn delete(&self, word: &[u8]) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(offset) = inner.index.remove(word) else {
            return Ok(false);
        };
        let header = inner.read_header_at(offset)?;
        inner.write_flag(offset, FLAG_TOMBSTONE)?;
        inner.garbage += header.record_len();
        inner.dirty = true;
        Ok(true)
    }

    /// Rewrite the container of `word` with `rewrite`.
    ///
    /// Returns the number of entries the rewrite removed. An empty result
    /// tombstones the record.
    pub fn replace<F>(&self, word: &[u8], rewrite: F) -> Result<usize>
    where
        F: FnOnce(Container) -> Container,
    {
        let mut inner = self.inner.lock();
        let Some(offset) = inner.index.get(word) else {
            return Ok(0);
        };
        let Some((header, container)) = inner.read_container(offset, self.order)? else {
            return Ok(0);
        };
        let before = container.len();
        let mut rewritten = rewrite(container);
        rewritten.set_word_hash(header.key);
        let removed = before.saturating_sub(rewritten.len());

        if rewritten.is_empty() {
            inner.write_flag(offset, FLAG_TOMBSTONE)?;
            inner.index.remove(word);
            inner.garbage += header.record_len();
            inner.dirty = true;
            return Ok(removed);
        }

        let (slot, payload_len) = encode_slot(&rewritten)?;
        if slot.len() <= header.slot_len as usize {
            inner.file.seek(SeekFrom::Start(offset + 1 + HASH_LEN as u64 + 4))?;
            inner.file.write_u32::<BigEndian>(payload_len)?;
            inner.file.write_all(&slot)?;
            debug!("rewrote {} in place", hash_to_string(&header.key));
        } else {
            let new_offset = inner.append_record(header.key, &slot, payload_len)?;
            inner.write_flag(offset, FLAG_TOMBSTONE)?;
            inner.index.put(&header.key, new_offset);
            inner.garbage += header.record_len();
            inner.dirty = true;
            debug!("moved {} to offset {new_offset}", hash_to_string(&header.key));
        }
        Ok(removed)
    }

    /// Live word hashes in key order, starting at the first key `>= start`.
    pub fn keys(&self, start: Option<&[u8]>) -> Vec<WordHash> {
        let mut inner = self.inner.lock();
        inner
            .index
            .keys(true, start)
            .filter_map(|key| WordHash::try_from(key).ok())
            .collect()
    }

    /// Iterate the containers in key order from `start`.
    pub fn iter(segment: &Arc<Segment>, start: Option<&[u8]>) -> SegmentIter {
        SegmentIter {
            segment: Arc::clone(segment),
            keys: segment.keys(start).into_iter(),
        }
    }

    /// Persist the in-memory index if it changed, and sync the file.
    pub fn sync_index(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.sync_all()?;
        if inner.dirty {
            let length = inner.length;
            write_index(&index_path(&self.path), &mut inner.index, length)?;
            inner.dirty = false;
        }
        Ok(())
    }

    /// Delete the segment file and its index file.
    pub fn remove_files(&self) -> Result<()> {
        fs::remove_file(&self.path)?;
        match fs::remove_file(index_path(&self.path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Containers of one segment in key order.
///
/// Records that vanish or fail to decode while iterating are skipped.
pub struct SegmentIter {
    segment: Arc<Segment>,
    keys: std::vec::IntoIter<WordHash>,
}

impl Iterator for SegmentIter {
    type Item = Container;

    fn next(&mut self) -> Option<Container> {
        for key in self.keys.by_ref() {
            match self.segment.get(&key) {
                Ok(Some(container)) => return Some(container),
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        "reading {} from {}: {e}",
                        hash_to_string(&key),
                        self.segment.path.display()
                    );
                }
            }
        }
        None
    }
}

/// Read every live container of a segment file front to back.
///
/// Used to restore RAM dumps, which are written in the segment format but
/// never mounted. Damaged records are logged and skipped; a truncated tail
/// ends the read.
pub fn read_all<P: AsRef<Path>>(path: P, order: KeyOrder) -> Result<Vec<Container>> {
    let path = path.as_ref();
    let length = fs::metadata(path)?.len();
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    let version = reader.read_u32::<BigEndian>()?;
    let mut signature = [0u8; 2];
    reader.read_exact(&mut signature)?;
    if &magic != MAGIC || version != VERSION {
        return Err(RwiError::storage(format!("{} is not a segment file", path.display())));
    }
    if KeyOrder::from_signature(signature) != Some(order) {
        return Err(RwiError::storage(format!(
            "{} is sorted in a different key order",
            path.display()
        )));
    }

    let mut containers = Vec::new();
    let mut offset = HEADER_LEN;
    let mut skipped = 0usize;
    while offset < length {
        let header = match RecordHeader::read(&mut reader) {
            Ok(header) => header,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        if offset + header.record_len() > length {
            warn!("{}: truncated record at {offset}", path.display());
            break;
        }
        let mut slot = vec![0u8; header.slot_len as usize];
        reader.read_exact(&mut slot)?;
        offset += header.record_len();
        if header.flag != FLAG_LIVE {
            continue;
        }

        let payload_len = header.payload_len as usize;
        let intact = payload_len + CRC_LEN <= slot.len() && {
            let stored = u32::from_be_bytes([
                slot[payload_len],
                slot[payload_len + 1],
                slot[payload_len + 2],
                slot[payload_len + 3],
            ]);
            stored == crc32fast::hash(&slot[..payload_len])
        };
        if !intact {
            skipped += 1;
            continue;
        }
        match Container::import(header.key, &slot[..payload_len], order) {
            Ok(container) => containers.push(container),
            Err(e) => {
                debug!("{}: {e}", path.display());
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        warn!("{}: skipped {skipped} damaged records", path.display());
    }
    Ok(containers)
}

/// Rebuild the index by walking the records. A truncated tail is ignored.
///
/// Returns the index and the length of the valid prefix of the file.
fn scan(file: &mut File, length: u64, order: KeyOrder, path: &Path) -> Result<(HandleMap, u64)> {
    let mut index = HandleMap::new(HASH_LEN, order);
    let mut reader = BufReader::new(&*file);
    let mut offset = HEADER_LEN;
    reader.seek(SeekFrom::Start(offset))?;

    let mut skipped = 0usize;
    while offset < length {
        let header = match RecordHeader::read(&mut reader) {
            Ok(header) => header,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!("{}: truncated record header at {offset}", path.display());
                break;
            }
            Err(e) => return Err(e.into()),
        };
        let end = offset + header.record_len();
        if end > length {
            warn!("{}: truncated record at {offset}", path.display());
            break;
        }
        match header.flag {
            // a moved record is appended later, so the last live one wins
            FLAG_LIVE => {
                index.put(&header.key, offset);
            }
            FLAG_TOMBSTONE => {}
            _ => skipped += 1,
        }
        offset = end;
        reader.seek(SeekFrom::Start(offset))?;
    }
    if skipped > 0 {
        warn!("{}: skipped {skipped} records with unknown flags", path.display());
    }
    info!("scanned {}: {} words", path.display(), index.len());
    Ok((index, offset))
}

fn write_index(path: &Path, index: &mut HandleMap, segment_len: u64) -> Result<()> {
    let tmp = path.with_extension(format!("{INDEX_EXTENSION}.tmp"));
    let mut out = ChecksumWriter::new(BufWriter::new(File::create(&tmp)?));
    out.write_raw(INDEX_MAGIC)?;
    out.write_u64(segment_len)?;
    index.write_to(&mut out)?;
    let writer = out.finish()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn load_index(path: &Path, segment_len: u64, order: KeyOrder) -> Option<HandleMap> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("cannot open {}: {e}", path.display());
            return None;
        }
    };
    let read = || -> Result<Option<HandleMap>> {
        let mut input = ChecksumReader::new(BufReader::new(file));
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(RwiError::decode("bad index magic"));
        }
        if input.read_u64()? != segment_len {
            debug!("{} is stale", path.display());
            return Ok(None);
        }
        let index = HandleMap::read_from(&mut input, order)?;
        input.verify_trailer()?;
        Ok(Some(index))
    };
    match read() {
        Ok(index) => index,
        Err(e) => {
            warn!("ignoring index {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::codec::hash_from_u64;
    use crate::codec::posting::PostingEntry;

    fn container(word: u64, urls: std::ops::Range<u64>) -> Container {
        Container::from_entries(
            hash_from_u64(word),
            KeyOrder::Base64,
            urls.map(|u| PostingEntry::new(hash_from_u64(u)).with_hit_count(u as u32)),
        )
    }

    fn write_sample(dir: &TempDir) -> (PathBuf, Segment) {
        let path = dir.path().join("test.0001.blob");
        let containers = vec![container(1, 0..3), container(2, 10..12), container(3, 20..25)];
        let segment = Segment::create(&path, KeyOrder::Base64, &containers).unwrap();
        (path, segment)
    }

    #[test]
    fn test_create_and_get() {
        let dir = TempDir::new().unwrap();
        let (path, segment) = write_sample(&dir);
        assert_eq!(segment.len(), 3);
        assert!(index_path(&path).exists());

        let c = segment.get(&hash_from_u64(2)).unwrap().unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c.word_hash(), &hash_from_u64(2));
        assert!(segment.get(&hash_from_u64(9)).unwrap().is_none());
        assert_eq!(segment.keys(None), vec![hash_from_u64(1), hash_from_u64(2), hash_from_u64(3)]);
        assert_eq!(segment.keys(Some(&hash_from_u64(2))).len(), 2);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.blob");
        let containers = vec![container(2, 0..1), container(1, 0..1)];
        assert!(Segment::create(&path, KeyOrder::Base64, &containers).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_delete_persists() {
        let dir = TempDir::new().unwrap();
        let (path, segment) = write_sample(&dir);
        assert!(segment.delete(&hash_from_u64(1)).unwrap());
        assert!(!segment.delete(&hash_from_u64(1)).unwrap());
        assert!(segment.get(&hash_from_u64(1)).unwrap().is_none());
        assert!(segment.garbage_bytes() > 0);
        segment.sync_index().unwrap();
        drop(segment);

        let reopened = Segment::open(&path, KeyOrder::Base64).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.get(&hash_from_u64(1)).unwrap().is_none());
    }

    #[test]
    fn test_replace_in_slot_and_moved() {
        let dir = TempDir::new().unwrap();
        let (path, segment) = write_sample(&dir);
        let before = segment.file_len();

        // shrinking fits the slot
        let removed = segment
            .replace(&hash_from_u64(3), |mut c| {
                c.remove(&hash_from_u64(20));
                c
            })
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(segment.file_len(), before);
        assert_eq!(segment.get(&hash_from_u64(3)).unwrap().unwrap().len(), 4);

        // growing moves the record to the end
        let removed = segment
            .replace(&hash_from_u64(1), |mut c| {
                for u in 100..120 {
                    c.put_recent(&PostingEntry::new(hash_from_u64(u)));
                }
                c
            })
            .unwrap();
        assert_eq!(removed, 0);
        assert!(segment.file_len() > before);
        assert_eq!(segment.get(&hash_from_u64(1)).unwrap().unwrap().len(), 23);
        drop(segment);

        // without the index file the scan must find the moved record
        fs::remove_file(index_path(&path)).unwrap();
        let reopened = Segment::open(&path, KeyOrder::Base64).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.get(&hash_from_u64(1)).unwrap().unwrap().len(), 23);
        assert_eq!(reopened.get(&hash_from_u64(3)).unwrap().unwrap().len(), 4);
    }

    #[test]
    fn test_replace_to_empty_tombstones() {
        let dir = TempDir::new().unwrap();
        let (_, segment) = write_sample(&dir);
        let removed = segment
            .replace(&hash_from_u64(2), |c| Container::new(*c.word_hash(), c.order()))
            .unwrap();
        assert_eq!(removed, 2);
        assert!(!segment.has(&hash_from_u64(2)));
    }

    #[test]
    fn test_truncated_tail_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (path, segment) = write_sample(&dir);
        let length = segment.file_len();
        drop(segment);

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(length - 7).unwrap();
        drop(file);

        let reopened = Segment::open(&path, KeyOrder::Base64).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.get(&hash_from_u64(3)).unwrap().is_none());
        assert_eq!(reopened.get(&hash_from_u64(1)).unwrap().unwrap().len(), 3);
    }

    #[test]
    fn test_corrupt_payload_skipped() {
        let dir = TempDir::new().unwrap();
        let (path, segment) = write_sample(&dir);
        drop(segment);

        let mut bytes = fs::read(&path).unwrap();
        // first payload byte of the first record
        let at = (HEADER_LEN + RECORD_HEADER_LEN) as usize + 20;
        bytes[at] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let reopened = Segment::open(&path, KeyOrder::Base64).unwrap();
        assert!(reopened.get(&hash_from_u64(1)).unwrap().is_none());
        assert!(reopened.get(&hash_from_u64(2)).unwrap().is_some());
    }

    #[test]
    fn test_oversized_slot_header_skipped() {
        let dir = TempDir::new().unwrap();
        let (path, segment) = write_sample(&dir);
        drop(segment);

        let mut bytes = fs::read(&path).unwrap();
        // slot and payload length of the first record, index file left intact
        let at = HEADER_LEN as usize + 1 + HASH_LEN;
        bytes[at..at + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        bytes[at + 4..at + 8].copy_from_slice(&(u32::MAX - 16).to_be_bytes());
        fs::write(&path, bytes).unwrap();

        let reopened = Segment::open(&path, KeyOrder::Base64).unwrap();
        assert!(reopened.get(&hash_from_u64(1)).unwrap().is_none());
        assert_eq!(reopened.get(&hash_from_u64(3)).unwrap().unwrap().len(), 5);
    }

    #[test]
    fn test_wrong_order_rejected() {
        let dir = TempDir::new().unwrap();
        let (path, segment) = write_sample(&dir);
        drop(segment);
        assert!(Segment::open(&path, KeyOrder::Natural).is_err());
    }

    #[test]
    fn test_read_all_skips_damage() {
        let dir = TempDir::new().unwrap();
        let (path, segment) = write_sample(&dir);
        segment.delete(&hash_from_u64(2)).unwrap();
        drop(segment);

        let mut bytes = fs::read(&path).unwrap();
        let at = (HEADER_LEN + RECORD_HEADER_LEN) as usize + 20;
        bytes[at] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let containers = read_all(&path, KeyOrder::Base64).unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].word_hash(), &hash_from_u64(3));
        assert_eq!(containers[0].len(), 5);
    }

    #[test]
    fn test_iteration() {
        let dir = TempDir::new().unwrap();
        let (_, segment) = write_sample(&dir);
        let segment = Arc::new(segment);
        let words: Vec<WordHash> = Segment::iter(&segment, None).map(|c| *c.word_hash()).collect();
        assert_eq!(words, vec![hash_from_u64(1), hash_from_u64(2), hash_from_u64(3)]);
        assert_eq!(Segment::iter(&segment, Some(&hash_from_u64(3))).count(), 1);
    }
}
