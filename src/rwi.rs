//! The reverse word index built on the row primitives in [`crate::index`].
//!
//! Layers, bottom up:
//!
//! - [`Container`]: the posting list of one word
//! - [`SetOps`]: time-boxed join and exclude over containers
//! - [`ContainerCache`]: the RAM map of containers with eviction scores
//! - [`Segment`] / [`SegmentStore`]: append-only segment files
//! - [`IndexCell`]: a RAM cache in front of a segment store
//! - [`TieredIndex`]: internal and external RAM tiers over a backend cell

pub mod cache;
pub mod cell;
pub mod container;
pub mod eviction;
pub mod join;
pub mod score;
pub mod segment;
pub mod segment_store;
pub mod store;
pub mod tiered;

pub use cache::{CacheScores, ContainerCache};
pub use cell::IndexCell;
pub use container::Container;
pub use eviction::{BudgetProbe, EvictionPolicy, FixedProbe, MemoryProbe};
pub use join::{Deadline, JoinCost, SetOps, Strategy};
pub use score::ScoreMap;
pub use segment::{Segment, SegmentWriter};
pub use segment_store::SegmentStore;
pub use store::{ContainerIter, IterSource, PostingStore};
pub use tiered::{LocalSearch, Tier, TieredIndex, TieredStats};
