//! In-memory keyed record primitives.
//!
//! These are the building blocks of posting-list containers, segment
//! indexes and the RAM caches:
//!
//! - [`RowSet`]: sort-on-demand table of fixed-width rows
//! - [`RamIndex`]: bulk partition plus post-initialization partition
//! - [`HandleMap`]: ordered key → u64 map
//! - [`HandleSet`]: ordered key set
//! - [`MergeIter`] and [`RotateIter`]: k-way merge and wrapping iteration

pub mod handle_map;
pub mod handle_set;
pub mod merge_iter;
pub mod ram_index;
pub mod row_set;

pub use handle_map::HandleMap;
pub use handle_set::HandleSet;
pub use merge_iter::{MergeIter, RotateIter};
pub use ram_index::RamIndex;
pub use row_set::{RowSet, Rows};
