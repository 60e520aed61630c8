//! AND-join and exclusion of posting lists.
//!
//! Both operations pick between two algorithms by list sizes:
//!
//! - **enumeration** walks both sorted lists in lock-step, costing
//!   `enumeration_factor * (high + low - 1)`;
//! - **probe** iterates the smaller list and looks every key up in the
//!   larger one, costing `probe_factor * log2(high) * low`.
//!
//! Probe is used when enumeration would cost more. Every loop checks a
//! cooperative [`Deadline`]; when it expires the partial result is returned.

use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::codec::HASH_LEN;
use crate::codec::posting::PostingEntry;
use crate::index::handle_set::HandleSet;
use crate::rwi::container::Container;

/// Cost constants of the algorithm choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCost {
    /// Weight of one lock-step enumeration step.
    pub enumeration_factor: u64,
    /// Weight of one probe step.
    pub probe_factor: u64,
}

impl Default for JoinCost {
    fn default() -> Self {
        JoinCost {
            enumeration_factor: 10,
            probe_factor: 12,
        }
    }
}

/// Algorithm chosen for a pair of lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Lock-step walk over both lists.
    Enumeration,
    /// Lookups of the smaller list's keys in the larger list.
    Probe,
}

/// Bit length of `x`; `log2(1) == 1`, `log2(0) == 0`.
fn log2(x: usize) -> u64 {
    u64::from(usize::BITS - x.leading_zeros())
}

impl JoinCost {
    /// Choose the algorithm for lists of `a` and `b` entries.
    pub fn strategy(&self, a: usize, b: usize) -> Strategy {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        if low == 0 {
            return Strategy::Enumeration;
        }
        let enumerate = self.enumeration_factor * (high + low - 1) as u64;
        let probe = self.probe_factor * log2(high) * low as u64;
        if enumerate > probe {
            Strategy::Probe
        } else {
            Strategy::Enumeration
        }
    }
}

/// A point in time after which long-running loops give up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    pub fn never() -> Self {
        Deadline { at: None }
    }

    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Deadline {
            at: Instant::now().checked_add(budget),
        }
    }

    /// A deadline from an optional budget; `None` never expires.
    pub fn from_budget(budget: Option<Duration>) -> Self {
        budget.map_or_else(Self::never, Self::after)
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }
}

fn combine(a_row: &[u8], b_row: &[u8], max_distance: u32) -> Option<PostingEntry> {
    let mut joined = match PostingEntry::decode(a_row) {
        Ok(entry) => entry,
        Err(e) => {
            warn!("join skips undecodable posting: {e}");
            return None;
        }
    };
    let other = match PostingEntry::decode(b_row) {
        Ok(entry) => entry,
        Err(e) => {
            warn!("join skips undecodable posting: {e}");
            return None;
        }
    };
    joined.combine_distance(&other);
    (joined.distance() <= max_distance).then_some(joined)
}

/// Join by walking both lists in key order.
pub fn join_by_enumeration(
    a: &Container,
    b: &Container,
    deadline: &Deadline,
    max_distance: u32,
) -> Container {
    let a = a.sorted_view();
    let b = b.sorted_view();
    let order = a.order();
    let mut result = Container::with_capacity(*a.word_hash(), order, a.len().min(b.len()));

    let mut left = a.rows();
    let mut right = b.rows();
    let (mut x, mut y) = (left.next(), right.next());
    while let (Some(ra), Some(rb)) = (x, y) {
        if deadline.expired() {
            debug!("enumeration join stopped by deadline");
            break;
        }
        match order.compare(&ra[..HASH_LEN], &rb[..HASH_LEN]) {
            std::cmp::Ordering::Less => x = left.next(),
            std::cmp::Ordering::Greater => y = right.next(),
            std::cmp::Ordering::Equal => {
                if let Some(joined) = combine(ra, rb, max_distance) {
                    result.add(&joined);
                }
                x = left.next();
                y = right.next();
            }
        }
    }
    result
}

/// Join by looking up every key of the smaller list in the larger list.
pub fn join_by_probe(
    a: &Container,
    b: &Container,
    deadline: &Deadline,
    max_distance: u32,
) -> Container {
    let a_is_small = a.len() <= b.len();
    let (small, large) = if a_is_small { (a, b) } else { (b, a) };
    let small = small.sorted_view();
    let mut result = Container::with_capacity(*a.word_hash(), a.order(), small.len());

    for row in small.rows() {
        if deadline.expired() {
            debug!("probe join stopped by deadline");
            break;
        }
        let Some(other) = large.get_row(&row[..HASH_LEN]) else {
            continue;
        };
        let joined = if a_is_small {
            combine(row, other, max_distance)
        } else {
            combine(other, row, max_distance)
        };
        if let Some(joined) = joined {
            result.add(&joined);
        }
    }
    result
}

/// Remove from `pivot` every key of `exclude` by walking both in key order.
fn exclude_by_enumeration(pivot: &mut Container, exclude: &Container, deadline: &Deadline) -> usize {
    pivot.sort();
    let exclude = exclude.sorted_view();
    let order = pivot.order();
    let mut doomed = HandleSet::new(HASH_LEN, order);
    {
        let mut left = pivot.rows();
        let mut right = exclude.rows();
        let (mut x, mut y) = (left.next(), right.next());
        while let (Some(ra), Some(rb)) = (x, y) {
            if deadline.expired() {
                break;
            }
            match order.compare(&ra[..HASH_LEN], &rb[..HASH_LEN]) {
                std::cmp::Ordering::Less => x = left.next(),
                std::cmp::Ordering::Greater => y = right.next(),
                std::cmp::Ordering::Equal => {
                    doomed.insert(&ra[..HASH_LEN]);
                    x = left.next();
                    y = right.next();
                }
            }
        }
    }
    pivot.remove_entries(&doomed)
}

/// Remove from `pivot` every key of `exclude` by lookups from the smaller side.
fn exclude_by_probe(pivot: &mut Container, exclude: &Container, deadline: &Deadline) -> usize {
    if pivot.len() <= exclude.len() {
        pivot.retain_rows(|row| deadline.expired() || !exclude.contains(&row[..HASH_LEN]))
    } else {
        let mut doomed = HandleSet::new(HASH_LEN, pivot.order());
        for url in exclude.url_hashes() {
            if deadline.expired() {
                break;
            }
            if pivot.contains(url) {
                doomed.insert(url);
            }
        }
        pivot.remove_entries(&doomed)
    }
}

/// Join and exclusion with configurable cost constants.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOps {
    cost: JoinCost,
}

impl SetOps {
    /// Create with the given cost constants.
    pub fn new(cost: JoinCost) -> Self {
        SetOps { cost }
    }

    /// The cost constants in use.
    pub fn cost(&self) -> JoinCost {
        self.cost
    }

    /// URLs present in both lists, each with the combined word distance.
    ///
    /// Entries whose combined distance exceeds `max_distance` are dropped.
    /// The result keeps `a`'s word hash and statistics of `a`'s entries.
    pub fn join_constructive(
        &self,
        a: &Container,
        b: &Container,
        budget: Option<Duration>,
        max_distance: u32,
    ) -> Container {
        self.join(a, b, &Deadline::from_budget(budget), max_distance)
    }

    fn join(&self, a: &Container, b: &Container, deadline: &Deadline, max_distance: u32) -> Container {
        if a.is_empty() || b.is_empty() {
            return Container::new(*a.word_hash(), a.order());
        }
        match self.cost.strategy(a.len(), b.len()) {
            Strategy::Probe => join_by_probe(a, b, deadline, max_distance),
            Strategy::Enumeration => join_by_enumeration(a, b, deadline, max_distance),
        }
    }

    /// Join all containers, smallest first.
    ///
    /// Returns `None` when the input is empty, when any container is empty,
    /// or when the join result is empty.
    pub fn join_containers(
        &self,
        containers: &[Container],
        budget: Option<Duration>,
        max_distance: u32,
    ) -> Option<Container> {
        if containers.is_empty() || containers.iter().any(Container::is_empty) {
            return None;
        }
        let deadline = Deadline::from_budget(budget);
        let mut by_size: Vec<&Container> = containers.iter().collect();
        by_size.sort_by_key(|c| c.len());

        let mut result = by_size[0].top_level_clone();
        for next in &by_size[1..] {
            result = self.join(&result, next, &deadline, max_distance);
            if result.is_empty() {
                return None;
            }
        }
        Some(result)
    }

    /// Remove from `pivot` every URL that `exclude` holds; returns how many were removed.
    pub fn exclude_destructive(
        &self,
        pivot: &mut Container,
        exclude: &Container,
        budget: Option<Duration>,
    ) -> usize {
        self.exclude(pivot, exclude, &Deadline::from_budget(budget))
    }

    fn exclude(&self, pivot: &mut Container, exclude: &Container, deadline: &Deadline) -> usize {
        if pivot.is_empty() || exclude.is_empty() {
            return 0;
        }
        match self.cost.strategy(pivot.len(), exclude.len()) {
            Strategy::Probe => exclude_by_probe(pivot, exclude, deadline),
            Strategy::Enumeration => exclude_by_enumeration(pivot, exclude, deadline),
        }
    }

    /// Remove every URL of every exclude list from `pivot`.
    pub fn exclude_containers(
        &self,
        mut pivot: Container,
        excludes: &[Container],
        budget: Option<Duration>,
    ) -> Container {
        let deadline = Deadline::from_budget(budget);
        for exclude in excludes {
            if pivot.is_empty() {
                break;
            }
            self.exclude(&mut pivot, exclude, &deadline);
        }
        pivot
    }

    /// Join `includes`, then remove the URLs of `excludes`.
    pub fn join_exclude_containers(
        &self,
        includes: &[Container],
        excludes: &[Container],
        budget: Option<Duration>,
        max_distance: u32,
    ) -> Option<Container> {
        let deadline = Deadline::from_budget(budget);
        let joined = self.join_containers(includes, budget, max_distance)?;
        if deadline.expired() {
            return Some(joined);
        }
        let remaining = deadline
            .at
            .map(|at| at.saturating_duration_since(Instant::now()));
        let result = self.exclude_containers(joined, excludes, remaining);
        (!result.is_empty()).then_some(result)
    }
}
