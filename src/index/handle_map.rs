//! Ordered map from fixed-length keys to unsigned integers.
//!
//! Values are stored as base-256 cardinals next to their keys in a
//! [`RamIndex`], so the map can be bulk-loaded unsorted (for instance
//! while scanning a segment file) and sorted once on first use.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::codec::handle::HandleRow;
use crate::error::{Result, RwiError};
use crate::index::ram_index::RamIndex;
use crate::order::KeyOrder;
use crate::util::checksum::{ChecksumReader, ChecksumWriter};

const DUMP_MAGIC: &[u8; 4] = b"RWHM";

/// Default width of stored values.
pub const DEFAULT_VALUE_LEN: usize = 8;

/// Ordered key → u64 map.
#[derive(Debug, Clone)]
pub struct HandleMap {
    layout: HandleRow,
    index: RamIndex,
}

impl HandleMap {
    /// Create an empty map with 8-byte values.
    pub fn new(key_len: usize, order: KeyOrder) -> Self {
        Self::with_value_len(key_len, DEFAULT_VALUE_LEN, order)
    }

    /// Create an empty map with `value_len`-byte values.
    pub fn with_value_len(key_len: usize, value_len: usize, order: KeyOrder) -> Self {
        let layout = HandleRow::new(key_len, value_len);
        HandleMap {
            layout,
            index: RamIndex::new(layout.row_width(), key_len, order),
        }
    }

    /// Width of the keys.
    pub fn key_len(&self) -> usize {
        self.layout.key_len()
    }

    /// Key order of the map.
    pub fn order(&self) -> KeyOrder {
        self.index.order()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Approximate memory held by the map.
    pub fn byte_size(&self) -> usize {
        self.index.byte_size()
    }

    /// End the bulk phase.
    pub fn finish_initialization(&mut self) {
        self.index.finish_initialization();
    }

    /// Append a key known to be absent, without sorting.
    pub fn add_unique(&mut self, key: &[u8], value: u64) {
        self.index.add_unique(&self.layout.encode(key, value));
    }

    /// Value stored under `key`.
    pub fn get(&mut self, key: &[u8]) -> Option<u64> {
        let layout = self.layout;
        self.index.get(key).map(|row| layout.value(row))
    }

    /// Value stored under `key`, without leaving the bulk phase.
    pub fn lookup(&self, key: &[u8]) -> Option<u64> {
        self.index.peek(key).map(|row| self.layout.value(row))
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.contains(key)
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn put(&mut self, key: &[u8], value: u64) -> Option<u64> {
        let layout = self.layout;
        self.index
            .put(&layout.encode(key, value))
            .map(|old| layout.value(&old))
    }

    /// Add `delta` to the value under `key` (absent keys count as 0) and
    /// return the new value, clamped to the storable range.
    pub fn add(&mut self, key: &[u8], delta: i64) -> u64 {
        let current = self.get(key).unwrap_or(0);
        let updated = if delta >= 0 {
            current.saturating_add(delta as u64)
        } else {
            current.saturating_sub(delta.unsigned_abs())
        }
        .min(self.layout.max_value());
        self.put(key, updated);
        updated
    }

    /// Increment the value under `key`.
    pub fn inc(&mut self, key: &[u8]) -> u64 {
        self.add(key, 1)
    }

    /// Decrement the value under `key`, stopping at 0.
    pub fn dec(&mut self, key: &[u8]) -> u64 {
        self.add(key, -1)
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &[u8]) -> Option<u64> {
        let layout = self.layout;
        self.index.remove(key).map(|old| layout.value(&old))
    }

    /// Remove an arbitrary entry.
    pub fn remove_one(&mut self) -> Option<(Vec<u8>, u64)> {
        let layout = self.layout;
        self.index
            .remove_one()
            .map(|row| (layout.key(&row).to_vec(), layout.value(&row)))
    }

    /// Drop every key that was bulk-loaded more than once and return them
    /// with all their values in load order.
    pub fn remove_doubles(&mut self) -> Vec<(Vec<u8>, Vec<u64>)> {
        let layout = self.layout;
        self.index
            .remove_doubles()
            .into_iter()
            .filter_map(|group| {
                let key = layout.key(group.first()?).to_vec();
                let values = group.iter().map(|row| layout.value(row)).collect();
                Some((key, values))
            })
            .collect()
    }

    /// Ordered keys.
    pub fn keys(&mut self, ascending: bool, start: Option<&[u8]>) -> impl Iterator<Item = &[u8]> {
        self.index.keys(ascending, start)
    }

    /// Ordered `(key, value)` pairs.
    pub fn entries(
        &mut self,
        ascending: bool,
        start: Option<&[u8]>,
    ) -> impl Iterator<Item = (&[u8], u64)> {
        let layout = self.layout;
        self.index
            .rows(ascending, start)
            .map(move |row| (layout.key(row), layout.value(row)))
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.index.clear();
    }

    /// Serialize all entries in key order.
    pub fn write_to<W: Write>(&mut self, out: &mut ChecksumWriter<W>) -> Result<()> {
        out.write_u32(self.layout.key_len() as u32)?;
        out.write_u32(self.layout.value_len() as u32)?;
        out.write_u32(self.len() as u32)?;
        for row in self.index.rows(true, None) {
            out.write_raw(row)?;
        }
        Ok(())
    }

    /// Read entries written by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(input: &mut ChecksumReader<R>, order: KeyOrder) -> Result<HandleMap> {
        let key_len = input.read_u32()? as usize;
        let value_len = input.read_u32()? as usize;
        if value_len > 8 {
            return Err(RwiError::decode(format!(
                "handle map values are {value_len} bytes wide, at most 8 supported"
            )));
        }
        let count = input.read_u32()? as usize;

        let mut map = HandleMap::with_value_len(key_len, value_len, order);
        let mut row = vec![0u8; key_len + value_len];
        for _ in 0..count {
            input.read_exact(&mut row)?;
            map.index.add_unique(&row);
        }
        map.finish_initialization();
        Ok(map)
    }

    /// Write the map to a file.
    pub fn dump<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut out = ChecksumWriter::new(BufWriter::new(file));
        out.write_raw(DUMP_MAGIC)?;
        self.write_to(&mut out)?;
        let writer = out.finish()?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        Ok(())
    }

    /// Load a map written by [`dump`](Self::dump).
    pub fn load<P: AsRef<Path>>(path: P, order: KeyOrder) -> Result<HandleMap> {
        let file = File::open(path.as_ref())?;
        let mut input = ChecksumReader::new(BufReader::new(file));
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if &magic != DUMP_MAGIC {
            return Err(RwiError::decode(format!(
                "{} is not a handle map dump",
                path.as_ref().display()
            )));
        }
        let map = Self::read_from(&mut input, order)?;
        input.verify_trailer()?;
        Ok(map)
    }
}
