//! K-way merging and wrapping iterators.

use std::cmp::Ordering;
use std::iter::Fuse;

/// Merges sorted sources into one sorted sequence.
///
/// Items that compare equal across sources are combined with the merge
/// function; it receives the item from the earlier source first. Each
/// source must itself be sorted by the comparator and free of duplicates.
pub struct MergeIter<I, C, M>
where
    I: Iterator,
{
    sources: Vec<Fuse<I>>,
    heads: Vec<Option<I::Item>>,
    cmp: C,
    merge: M,
}

impl<I, C, M> MergeIter<I, C, M>
where
    I: Iterator,
    C: FnMut(&I::Item, &I::Item) -> Ordering,
    M: FnMut(I::Item, I::Item) -> I::Item,
{
    /// Create a merging iterator over `sources`.
    pub fn new<S>(sources: S, cmp: C, merge: M) -> Self
    where
        S: IntoIterator<Item = I>,
    {
        let sources: Vec<Fuse<I>> = sources.into_iter().map(Iterator::fuse).collect();
        let heads = sources.iter().map(|_| None).collect();
        MergeIter {
            sources,
            heads,
            cmp,
            merge,
        }
    }
}

impl<I, C, M> Iterator for MergeIter<I, C, M>
where
    I: Iterator,
    C: FnMut(&I::Item, &I::Item) -> Ordering,
    M: FnMut(I::Item, I::Item) -> I::Item,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        for (head, source) in self.heads.iter_mut().zip(self.sources.iter_mut()) {
            if head.is_none() {
                *head = source.next();
            }
        }

        let mut best: Option<usize> = None;
        for i in 0..self.heads.len() {
            let Some(candidate) = &self.heads[i] else {
                continue;
            };
            let replace = match best.and_then(|b| self.heads[b].as_ref()) {
                None => true,
                Some(current) => (self.cmp)(candidate, current) == Ordering::Less,
            };
            if replace {
                best = Some(i);
            }
        }

        let best = best?;
        let mut item = self.heads[best].take()?;
        for i in best + 1..self.heads.len() {
            let equal = match &self.heads[i] {
                Some(head) => (self.cmp)(head, &item) == Ordering::Equal,
                None => false,
            };
            if equal {
                if let Some(other) = self.heads[i].take() {
                    item = (self.merge)(item, other);
                }
            }
        }
        Some(item)
    }
}

/// Iterates a source and, when `wrap` is set, restarts it from the beginning once exhausted.
///
/// A restart that yields nothing ends the iteration, so an empty source
/// does not spin.
pub struct RotateIter<I, F>
where
    F: FnMut() -> I,
{
    current: I,
    restart: F,
    wrap: bool,
    yielded: bool,
}

impl<I, F> RotateIter<I, F>
where
    I: Iterator,
    F: FnMut() -> I,
{
    /// Iterate `first`; on exhaustion continue with `restart()` if `wrap` is set.
    pub fn new(first: I, wrap: bool, restart: F) -> Self {
        RotateIter {
            current: first,
            restart,
            wrap,
            yielded: true,
        }
    }
}

impl<I, F> Iterator for RotateIter<I, F>
where
    I: Iterator,
    F: FnMut() -> I,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.next() {
                self.yielded = true;
                return Some(item);
            }
            if !self.wrap || !self.yielded {
                return None;
            }
            self.current = (self.restart)();
            self.yielded = false;
        }
    }
}
