//! # rwindex
//!
//! The reverse word index of a web search engine: for every term hash it
//! keeps a posting list of the documents the term occurs in, and answers
//! lookups, AND-joins and exclusions over those lists.
//!
//! ## Features
//!
//! - Fixed-width 40-byte posting records
//! - Sort-on-demand row sets, handle maps and k-way merge iterators
//! - Time-boxed join and exclude with a size-driven algorithm choice
//! - RAM caches flushed into append-only segment files
//! - A tiered index with score-driven eviction
//!
//! ## Example
//!
//! ```no_run
//! use rwindex::prelude::*;
//!
//! # fn main() -> rwindex::error::Result<()> {
//! let cell = IndexCell::open("/tmp/rwi", &IndexConfig::default())?;
//! let word = hash_from_str("abc000000001")?;
//! let entry = PostingEntry::new(hash_from_str("url000000001")?).with_hit_count(3);
//! cell.add_entry(&word, &entry, 0)?;
//! assert_eq!(cell.count(&word)?, 1);
//! cell.close()?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod order;
pub mod rwi;
pub mod util;

pub mod prelude {
    pub use crate::codec::{PostingEntry, UrlHash, WordHash, hash_from_str, hash_from_u64};
    pub use crate::config::IndexConfig;
    pub use crate::error::{Result, RwiError};
    pub use crate::index::HandleSet;
    pub use crate::order::KeyOrder;
    pub use crate::rwi::{
        Container, ContainerCache, IndexCell, JoinCost, PostingStore, SetOps, TieredIndex,
    };
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
