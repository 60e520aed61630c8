//! Column layouts of fixed-width rows.
//!
//! A [`RowDef`] is an ordered list of [`Column`]s; column 0 is the primary
//! key. Layouts are `const` so that row sizes are known at compile time.

use crate::codec::cardinal::{decode_b256, encode_b256, max_value};

/// How a column's bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Raw bytes, zero padded.
    Bytes,
    /// Big-endian base-256 cardinal.
    Cardinal,
}

/// One column of a row layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Column name, for diagnostics.
    pub name: &'static str,
    /// Width in bytes.
    pub width: usize,
    /// Interpretation of the bytes.
    pub encoding: Encoding,
}

impl Column {
    /// A raw byte column.
    pub const fn bytes(name: &'static str, width: usize) -> Self {
        Column {
            name,
            width,
            encoding: Encoding::Bytes,
        }
    }

    /// A cardinal column.
    pub const fn cardinal(name: &'static str, width: usize) -> Self {
        Column {
            name,
            width,
            encoding: Encoding::Cardinal,
        }
    }
}

/// An ordered column layout.
#[derive(Debug, Clone, Copy)]
pub struct RowDef {
    columns: &'static [Column],
}

impl RowDef {
    /// Create a layout over a static column list.
    pub const fn new(columns: &'static [Column]) -> Self {
        RowDef { columns }
    }

    /// The columns in order.
    pub const fn columns(&self) -> &'static [Column] {
        self.columns
    }

    /// Total row width in bytes.
    pub const fn objectsize(&self) -> usize {
        self.column_offset(self.columns.len())
    }

    /// Byte offset of column `col`.
    pub const fn column_offset(&self, col: usize) -> usize {
        let mut offset = 0;
        let mut i = 0;
        while i < col {
            offset += self.columns[i].width;
            i += 1;
        }
        offset
    }

    /// Width of column `col`.
    pub const fn width(&self, col: usize) -> usize {
        self.columns[col].width
    }

    /// Width of the primary key column.
    pub const fn primary_key_len(&self) -> usize {
        self.columns[0].width
    }

    /// Find a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Largest value a cardinal column can hold.
    pub const fn max_cardinal(&self, col: usize) -> u64 {
        max_value(self.columns[col].width)
    }

    /// Read column `col` as a cardinal.
    pub fn get_cardinal(&self, row: &[u8], col: usize) -> u64 {
        decode_b256(self.get_bytes(row, col))
    }

    /// Write a cardinal into column `col`, saturating at the column maximum.
    pub fn set_cardinal(&self, row: &mut [u8], col: usize, value: u64) {
        let offset = self.column_offset(col);
        encode_b256(value, &mut row[offset..offset + self.width(col)]);
    }

    /// The raw bytes of column `col`.
    pub fn get_bytes<'a>(&self, row: &'a [u8], col: usize) -> &'a [u8] {
        let offset = self.column_offset(col);
        &row[offset..offset + self.width(col)]
    }

    /// Copy `value` into column `col`, truncating or zero padding.
    pub fn set_bytes(&self, row: &mut [u8], col: usize, value: &[u8]) {
        let offset = self.column_offset(col);
        let cell = &mut row[offset..offset + self.width(col)];
        let n = value.len().min(cell.len());
        cell[..n].copy_from_slice(&value[..n]);
        cell[n..].fill(0);
    }
}
