//! The posting record of the reverse word index.
//!
//! A [`PostingEntry`] describes one occurrence of a term in one document and
//! is stored as a fixed 40-byte row keyed by the 12-byte URL hash. Integer
//! columns are base-256 cardinals that saturate at their column maximum, so
//! a field value survives an encode/decode round trip only when it fits the
//! column width.

use std::cmp::Ordering;

use bit_vec::BitVec;

use crate::codec::row::{Column, RowDef};
use crate::codec::{HASH_LEN, UrlHash};
use crate::error::{Result, RwiError};
use crate::util::time::days_from_millis;

const COL_URL_HASH: usize = 0;
const COL_LAST_MODIFIED: usize = 1;
const COL_FRESH_UNTIL: usize = 2;
const COL_WORDS_IN_TITLE: usize = 3;
const COL_WORDS_IN_TEXT: usize = 4;
const COL_PHRASES_IN_TEXT: usize = 5;
const COL_DOCTYPE: usize = 6;
const COL_LANGUAGE: usize = 7;
const COL_OUTLINKS_LOCAL: usize = 8;
const COL_OUTLINKS_OTHER: usize = 9;
const COL_URL_LENGTH: usize = 10;
const COL_URL_COMPONENTS: usize = 11;
const COL_TYPE_OF_WORD: usize = 12;
const COL_FLAGS: usize = 13;
const COL_HIT_COUNT: usize = 14;
const COL_POS_IN_TEXT: usize = 15;
const COL_POS_IN_PHRASE: usize = 16;
const COL_POS_OF_PHRASE: usize = 17;
const COL_WORD_DISTANCE: usize = 18;
const COL_QUALITY: usize = 19;

/// Column layout of a posting row.
pub const POSTING_COLUMNS: [Column; 20] = [
    Column::bytes("url_hash", HASH_LEN),
    Column::cardinal("last_modified", 2),
    Column::cardinal("fresh_until", 2),
    Column::cardinal("words_in_title", 1),
    Column::cardinal("words_in_text", 2),
    Column::cardinal("phrases_in_text", 2),
    Column::bytes("doctype", 1),
    Column::bytes("language", 2),
    Column::cardinal("outlinks_local", 1),
    Column::cardinal("outlinks_other", 1),
    Column::cardinal("url_length", 1),
    Column::cardinal("url_components", 1),
    Column::bytes("type_of_word", 1),
    Column::bytes("flags", 4),
    Column::cardinal("hit_count", 1),
    Column::cardinal("pos_in_text", 2),
    Column::cardinal("pos_in_phrase", 1),
    Column::cardinal("pos_of_phrase", 1),
    Column::cardinal("word_distance", 1),
    Column::cardinal("quality", 1),
];

/// Row definition of a posting.
pub const POSTING_ROW: RowDef = RowDef::new(&POSTING_COLUMNS);

/// Width of an encoded posting.
pub const POSTING_SIZE: usize = POSTING_ROW.objectsize();

const _: () = assert!(POSTING_SIZE == 40);

/// Language code used when a document's language is unknown.
pub const DEFAULT_LANGUAGE: [u8; 2] = *b"uk";

/// Appearance flag: the term occurs in the URL.
pub const FLAG_APP_URL: usize = 24;
/// Appearance flag: the term occurs in the title or description.
pub const FLAG_APP_DESCRIPTION: usize = 25;
/// Appearance flag: the term occurs in the author field.
pub const FLAG_APP_AUTHOR: usize = 26;
/// Appearance flag: the term occurs in the tags.
pub const FLAG_APP_TAGS: usize = 27;
/// Appearance flag: the term occurs in a reference (anchor) text.
pub const FLAG_APP_REFERENCE: usize = 28;
/// Appearance flag: the term is emphasized.
pub const FLAG_APP_EMPHASIZED: usize = 29;

const FLAG_BITS: usize = 32;

/// 32-bit field of category and appearance flags.
///
/// Bits 0..24 carry document category flags, bits 24..30 the `FLAG_APP_*`
/// appearance flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppearanceFlags {
    bits: BitVec,
}

impl AppearanceFlags {
    /// All flags cleared.
    pub fn new() -> Self {
        AppearanceFlags {
            bits: BitVec::from_elem(FLAG_BITS, false),
        }
    }

    /// Rebuild from the 4 stored bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        AppearanceFlags {
            bits: BitVec::from_bytes(&bytes),
        }
    }

    /// The 4 bytes to store.
    pub fn to_bytes(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.bits.to_bytes()[..4]);
        out
    }

    /// Read a flag. Bits past 31 read as unset.
    pub fn get(&self, bit: usize) -> bool {
        self.bits.get(bit).unwrap_or(false)
    }

    /// Set or clear a flag. Bits past 31 are ignored.
    pub fn set(&mut self, bit: usize, value: bool) {
        if bit < FLAG_BITS {
            self.bits.set(bit, value);
        }
    }

    /// Whether any flag is set.
    pub fn any(&self) -> bool {
        self.bits.any()
    }
}

impl Default for AppearanceFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// A single posting: one term occurring in one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingEntry {
    /// Hash of the document URL; the row key.
    pub url_hash: UrlHash,
    /// Last modification of the document, in days since the epoch.
    pub last_modified: u32,
    /// Day until which the entry is considered fresh.
    pub fresh_until: u32,
    /// Number of words in the title.
    pub words_in_title: u32,
    /// Number of words in the text body.
    pub words_in_text: u32,
    /// Number of phrases in the text body.
    pub phrases_in_text: u32,
    /// Document type code.
    pub doctype: u8,
    /// Two-letter language code.
    pub language: [u8; 2],
    /// Outgoing links to the same host.
    pub outlinks_local: u32,
    /// Outgoing links to other hosts.
    pub outlinks_other: u32,
    /// Length of the URL.
    pub url_length: u32,
    /// Number of URL path components.
    pub url_components: u32,
    /// Word type code.
    pub type_of_word: u8,
    /// Category and appearance flags.
    pub flags: AppearanceFlags,
    /// Occurrences of the term in the document.
    pub hit_count: u32,
    /// Position of the first occurrence in the text.
    pub pos_in_text: u32,
    /// Position of the term within its phrase.
    pub pos_in_phrase: u32,
    /// Number of the phrase holding the term.
    pub pos_of_phrase: u32,
    /// Distance between joined terms.
    pub word_distance: u32,
    /// Quality rating, used as tie-breaker when dates are equal.
    pub quality: u32,
}

impl PostingEntry {
    /// Create an entry for `url_hash` with all statistics zeroed.
    pub fn new(url_hash: UrlHash) -> Self {
        PostingEntry {
            url_hash,
            last_modified: 0,
            fresh_until: 0,
            words_in_title: 0,
            words_in_text: 0,
            phrases_in_text: 0,
            doctype: 0,
            language: DEFAULT_LANGUAGE,
            outlinks_local: 0,
            outlinks_other: 0,
            url_length: 0,
            url_components: 0,
            type_of_word: 0,
            flags: AppearanceFlags::new(),
            hit_count: 0,
            pos_in_text: 0,
            pos_in_phrase: 0,
            pos_of_phrase: 0,
            word_distance: 0,
            quality: 0,
        }
    }

    /// Set the modification date and derive the freshness horizon.
    ///
    /// The entry stays fresh for twice the time between modification and
    /// indexing, counted from the modification day.
    pub fn with_dates(mut self, last_modified_millis: u64, update_millis: u64) -> Self {
        let lm = days_from_millis(last_modified_millis) as i64;
        let upd = days_from_millis(update_millis) as i64;
        self.last_modified = lm as u32;
        self.fresh_until = (lm + (upd - lm) * 2).max(0) as u32;
        self
    }

    /// Set the modification day directly.
    pub fn with_last_modified_days(mut self, days: u32) -> Self {
        self.last_modified = days;
        self
    }

    /// Set the text statistics.
    pub fn with_text_stats(
        mut self,
        words_in_title: u32,
        words_in_text: u32,
        phrases_in_text: u32,
    ) -> Self {
        self.words_in_title = words_in_title;
        self.words_in_text = words_in_text;
        self.phrases_in_text = phrases_in_text;
        self
    }

    /// Set the position of the term.
    pub fn with_position(mut self, pos_in_text: u32, pos_in_phrase: u32, pos_of_phrase: u32) -> Self {
        self.pos_in_text = pos_in_text;
        self.pos_in_phrase = pos_in_phrase;
        self.pos_of_phrase = pos_of_phrase;
        self
    }

    /// Set the language from a code such as `"en"`; unusable codes map to `"uk"`.
    pub fn with_language(mut self, code: &str) -> Self {
        self.language = normalize_language(code);
        self
    }

    /// Set the document type code.
    pub fn with_doctype(mut self, doctype: u8) -> Self {
        self.doctype = doctype;
        self
    }

    /// Set the word type code.
    pub fn with_type_of_word(mut self, type_of_word: u8) -> Self {
        self.type_of_word = type_of_word;
        self
    }

    /// Set the outgoing link counts.
    pub fn with_outlinks(mut self, local: u32, other: u32) -> Self {
        self.outlinks_local = local;
        self.outlinks_other = other;
        self
    }

    /// Set the URL shape.
    pub fn with_url_shape(mut self, length: u32, components: u32) -> Self {
        self.url_length = length;
        self.url_components = components;
        self
    }

    /// Set the hit count.
    pub fn with_hit_count(mut self, hit_count: u32) -> Self {
        self.hit_count = hit_count;
        self
    }

    /// Set the word distance.
    pub fn with_word_distance(mut self, word_distance: u32) -> Self {
        self.word_distance = word_distance;
        self
    }

    /// Set the quality rating.
    pub fn with_quality(mut self, quality: u32) -> Self {
        self.quality = quality;
        self
    }

    /// Set an appearance or category flag.
    pub fn with_flag(mut self, bit: usize, value: bool) -> Self {
        self.flags.set(bit, value);
        self
    }

    /// The row key.
    pub fn url_hash(&self) -> &[u8] {
        &self.url_hash
    }

    /// Word distance of a joined entry.
    pub fn distance(&self) -> u32 {
        self.word_distance
    }

    /// Whether this entry should replace `other` for the same URL.
    pub fn is_newer(&self, other: &PostingEntry) -> bool {
        match self.last_modified.cmp(&other.last_modified) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.quality > other.quality,
        }
    }

    /// Whether `other` should replace this entry.
    pub fn is_older(&self, other: &PostingEntry) -> bool {
        other.is_newer(self)
    }

    /// Fold `other`, the same document seen through another term, into this entry.
    pub fn combine_distance(&mut self, other: &PostingEntry) {
        self.word_distance = self
            .word_distance
            .saturating_add(other.word_distance)
            .saturating_add(self.pos_in_text.abs_diff(other.pos_in_text));
        self.pos_in_text = self.pos_in_text.min(other.pos_in_text);
        self.pos_in_phrase = if self.pos_of_phrase == other.pos_of_phrase {
            self.pos_in_phrase.min(other.pos_in_phrase)
        } else {
            0
        };
        self.pos_of_phrase = self.pos_of_phrase.min(other.pos_of_phrase);
        self.words_in_text = ((u64::from(self.words_in_text) + u64::from(other.words_in_text)) / 2) as u32;
    }

    /// Lower every numeric statistic to the minimum of both entries.
    pub fn min_fold(&mut self, other: &PostingEntry) {
        self.fold_with(other, u32::min);
    }

    /// Raise every numeric statistic to the maximum of both entries.
    pub fn max_fold(&mut self, other: &PostingEntry) {
        self.fold_with(other, u32::max);
    }

    fn fold_with(&mut self, other: &PostingEntry, f: fn(u32, u32) -> u32) {
        self.last_modified = f(self.last_modified, other.last_modified);
        self.fresh_until = f(self.fresh_until, other.fresh_until);
        self.words_in_title = f(self.words_in_title, other.words_in_title);
        self.words_in_text = f(self.words_in_text, other.words_in_text);
        self.phrases_in_text = f(self.phrases_in_text, other.phrases_in_text);
        self.outlinks_local = f(self.outlinks_local, other.outlinks_local);
        self.outlinks_other = f(self.outlinks_other, other.outlinks_other);
        self.url_length = f(self.url_length, other.url_length);
        self.url_components = f(self.url_components, other.url_components);
        self.hit_count = f(self.hit_count, other.hit_count);
        self.pos_in_text = f(self.pos_in_text, other.pos_in_text);
        self.pos_in_phrase = f(self.pos_in_phrase, other.pos_in_phrase);
        self.pos_of_phrase = f(self.pos_of_phrase, other.pos_of_phrase);
        self.word_distance = f(self.word_distance, other.word_distance);
        self.quality = f(self.quality, other.quality);
    }

    /// Encode into a new 40-byte row.
    pub fn encode(&self) -> [u8; POSTING_SIZE] {
        let mut row = [0u8; POSTING_SIZE];
        self.encode_into(&mut row);
        row
    }

    /// Encode into the first 40 bytes of `row`.
    pub fn encode_into(&self, row: &mut [u8]) {
        let def = &POSTING_ROW;
        def.set_bytes(row, COL_URL_HASH, &self.url_hash);
        def.set_cardinal(row, COL_LAST_MODIFIED, u64::from(self.last_modified));
        def.set_cardinal(row, COL_FRESH_UNTIL, u64::from(self.fresh_until));
        def.set_cardinal(row, COL_WORDS_IN_TITLE, u64::from(self.words_in_title));
        def.set_cardinal(row, COL_WORDS_IN_TEXT, u64::from(self.words_in_text));
        def.set_cardinal(row, COL_PHRASES_IN_TEXT, u64::from(self.phrases_in_text));
        def.set_bytes(row, COL_DOCTYPE, &[self.doctype]);
        def.set_bytes(row, COL_LANGUAGE, &self.language);
        def.set_cardinal(row, COL_OUTLINKS_LOCAL, u64::from(self.outlinks_local));
        def.set_cardinal(row, COL_OUTLINKS_OTHER, u64::from(self.outlinks_other));
        def.set_cardinal(row, COL_URL_LENGTH, u64::from(self.url_length));
        def.set_cardinal(row, COL_URL_COMPONENTS, u64::from(self.url_components));
        def.set_bytes(row, COL_TYPE_OF_WORD, &[self.type_of_word]);
        def.set_bytes(row, COL_FLAGS, &self.flags.to_bytes());
        def.set_cardinal(row, COL_HIT_COUNT, u64::from(self.hit_count));
        def.set_cardinal(row, COL_POS_IN_TEXT, u64::from(self.pos_in_text));
        def.set_cardinal(row, COL_POS_IN_PHRASE, u64::from(self.pos_in_phrase));
        def.set_cardinal(row, COL_POS_OF_PHRASE, u64::from(self.pos_of_phrase));
        def.set_cardinal(row, COL_WORD_DISTANCE, u64::from(self.word_distance));
        def.set_cardinal(row, COL_QUALITY, u64::from(self.quality));
    }

    /// Decode a row written by [`encode`](Self::encode).
    pub fn decode(row: &[u8]) -> Result<PostingEntry> {
        if row.len() < POSTING_SIZE {
            return Err(RwiError::decode(format!(
                "posting row has {} bytes, expected {POSTING_SIZE}",
                row.len()
            )));
        }
        let def = &POSTING_ROW;
        let card = |col: usize| def.get_cardinal(row, col) as u32;
        let byte = |col: usize| def.get_bytes(row, col)[0];

        let mut url_hash = [0u8; HASH_LEN];
        url_hash.copy_from_slice(def.get_bytes(row, COL_URL_HASH));
        let mut language = [0u8; 2];
        language.copy_from_slice(def.get_bytes(row, COL_LANGUAGE));
        let mut flags = [0u8; 4];
        flags.copy_from_slice(def.get_bytes(row, COL_FLAGS));

        Ok(PostingEntry {
            url_hash,
            last_modified: card(COL_LAST_MODIFIED),
            fresh_until: card(COL_FRESH_UNTIL),
            words_in_title: card(COL_WORDS_IN_TITLE),
            words_in_text: card(COL_WORDS_IN_TEXT),
            phrases_in_text: card(COL_PHRASES_IN_TEXT),
            doctype: byte(COL_DOCTYPE),
            language,
            outlinks_local: card(COL_OUTLINKS_LOCAL),
            outlinks_other: card(COL_OUTLINKS_OTHER),
            url_length: card(COL_URL_LENGTH),
            url_components: card(COL_URL_COMPONENTS),
            type_of_word: byte(COL_TYPE_OF_WORD),
            flags: AppearanceFlags::from_bytes(flags),
            hit_count: card(COL_HIT_COUNT),
            pos_in_text: card(COL_POS_IN_TEXT),
            pos_in_phrase: card(COL_POS_IN_PHRASE),
            pos_of_phrase: card(COL_POS_OF_PHRASE),
            word_distance: card(COL_WORD_DISTANCE),
            quality: card(COL_QUALITY),
        })
    }

    /// Read only the last-modified day from an encoded row.
    pub fn last_modified_of(row: &[u8]) -> u32 {
        POSTING_ROW.get_cardinal(row, COL_LAST_MODIFIED) as u32
    }

    /// Read only the quality from an encoded row.
    pub fn quality_of(row: &[u8]) -> u32 {
        POSTING_ROW.get_cardinal(row, COL_QUALITY) as u32
    }

    /// [`is_newer`](Self::is_newer) on two encoded rows.
    pub fn row_is_newer(row: &[u8], other: &[u8]) -> bool {
        match Self::last_modified_of(row).cmp(&Self::last_modified_of(other)) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => Self::quality_of(row) > Self::quality_of(other),
        }
    }
}

fn normalize_language(code: &str) -> [u8; 2] {
    let bytes = code.as_bytes();
    if bytes.len() < 2 || !bytes[..2].iter().all(u8::is_ascii_alphabetic) {
        return DEFAULT_LANGUAGE;
    }
    [bytes[0].to_ascii_lowercase(), bytes[1].to_ascii_lowercase()]
}
