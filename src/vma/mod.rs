//! Address-interval engine
//!
//! A [`VmaTree`] partitions the address line into maximal runs of constant
//! (state, metadata). It does not store the runs themselves but the points
//! where they change: each key carries the state of the run ending there
//! (`incoming`) and of the run starting there (`outgoing`). Everything
//! before the first point and after the last one is implicitly Released.
//!
//! Every mutation goes through [`VmaTree::register_mapping`], which rewrites
//! a half-open range `[a, b)` to a single state:
//!
//! ```text
//!   before:   --R--|a' ---C--- x ---R--- y ---C--|b'  ...
//!   register [a, b) as C:
//!   after:    --R--|a ------------- C --------|b ...
//! ```
//!
//! Points strictly inside the range are removed; points at `a` and `b` are
//! written only when they change something. The old contribution of each
//! covered span is subtracted as the walk passes it, so the returned
//! [`SummaryDiff`] is exact and the cost is proportional to the number of
//! points the range covers.

mod state;

pub use state::{Interval, IntervalChange, IntervalState, RegionData, RegionMetadata, State};

use std::ops::{Bound, RangeBounds};

use thiserror::Error;

use crate::summary::SummaryDiff;
use crate::tags::MemTag;
use crate::treap::{Iter, Treap, TreapError};
use crate::Address;

/// Errors from the interval engine
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VmaError {
    /// Empty range or a range running past the end of the address space.
    #[error("invalid range: {size} bytes at {from:#x}")]
    InvalidRange {
        /// Start of the rejected range
        from: Address,
        /// Length of the rejected range
        size: usize,
    },

    /// A boundary point could not be allocated.
    #[error(transparent)]
    OutOfMemory(#[from] TreapError),
}

/// How registered metadata relates to the metadata already in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagMode {
    /// Use the given metadata as is
    #[default]
    Replace,
    /// Merge the given metadata with what is in effect at the start of the
    /// range via [`RegionMetadata::inherit`]
    Inherit,
}

/// Boundary-point tree over one address space
#[derive(Debug)]
pub struct VmaTree<M> {
    tree: Treap<Address, IntervalChange<M>>,
    scratch: Vec<Address>,
}

impl<M: RegionMetadata> Default for VmaTree<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Longest range a single operation may cover; deltas are signed 64-bit
pub const MAX_RANGE: usize = i64::MAX as usize;

fn check_range(from: Address, size: usize) -> Result<Address, VmaError> {
    if size == 0 || size > MAX_RANGE {
        return Err(VmaError::InvalidRange { from, size });
    }
    from.checked_add(size)
        .ok_or(VmaError::InvalidRange { from, size })
}

// Spans inside one operation never exceed MAX_RANGE; merged runs seen by
// compute_summary may, and clamp.
fn signed(bytes: usize) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

impl<M: RegionMetadata> VmaTree<M> {
    /// Empty tree with the default treap seed
    pub fn new() -> Self {
        Self::with_seed(Treap::<Address, IntervalChange<M>>::DEFAULT_SEED)
    }

    /// Empty tree whose treap priorities derive from `seed`
    pub fn with_seed(seed: u64) -> Self {
        Self {
            tree: Treap::with_seed(seed),
            scratch: Vec::new(),
        }
    }

    /// Mark `[from, from + size)` reserved
    pub fn reserve_mapping(
        &mut self,
        from: Address,
        size: usize,
        data: M,
    ) -> Result<SummaryDiff, VmaError> {
        let to = check_range(from, size)?;
        self.register_mapping(from, to, State::Reserved, data, TagMode::Replace)
    }

    /// Mark `[from, from + size)` committed
    pub fn commit_mapping(
        &mut self,
        from: Address,
        size: usize,
        data: M,
        mode: TagMode,
    ) -> Result<SummaryDiff, VmaError> {
        let to = check_range(from, size)?;
        self.register_mapping(from, to, State::Committed, data, mode)
    }

    /// Downgrade the committed parts of `[from, from + size)` to reserved
    ///
    /// Each committed run keeps its tag; released and reserved parts are
    /// left alone, so repeating the call is a no-op.
    pub fn uncommit_mapping(
        &mut self,
        from: Address,
        size: usize,
        data: M,
    ) -> Result<SummaryDiff, VmaError> {
        let to = check_range(from, size)?;
        let targets = self.runs_matching(from, to, |run| run.state.is_committed());
        self.tree.try_reserve(self.missing_boundaries(&targets))?;

        let mut diff = SummaryDiff::new();
        for (start, end, _) in targets {
            diff += self.register_mapping(
                start,
                end,
                State::Reserved,
                data.clone(),
                TagMode::Inherit,
            )?;
        }
        Ok(diff)
    }

    /// Mark `[from, from + size)` released
    pub fn release_mapping(&mut self, from: Address, size: usize) -> Result<SummaryDiff, VmaError> {
        let to = check_range(from, size)?;
        self.register_mapping(from, to, State::Released, M::empty(), TagMode::Replace)
    }

    /// Re-tag every non-released run overlapping `[from, from + size)`
    ///
    /// Runs keep their state and the rest of their metadata. Released gaps
    /// stay released and untagged.
    pub fn set_tag(
        &mut self,
        from: Address,
        size: usize,
        tag: MemTag,
    ) -> Result<SummaryDiff, VmaError> {
        let to = check_range(from, size)?;
        let targets = self.runs_matching(from, to, |run| {
            run.state != State::Released && run.data.tag() != tag
        });
        self.tree.try_reserve(self.missing_boundaries(&targets))?;

        let mut diff = SummaryDiff::new();
        for (start, end, run) in targets {
            let data = run.data.with_tag(tag);
            diff += self.register_mapping(start, end, run.state, data, TagMode::Replace)?;
        }
        Ok(diff)
    }

    /// Rewrite `[a, b)` to `state` with `data`
    ///
    /// Returns the change in reserved and committed bytes per tag. Released
    /// ranges always carry `M::empty()` regardless of `data`.
    pub fn register_mapping(
        &mut self,
        a: Address,
        b: Address,
        state: State,
        data: M,
        mode: TagMode,
    ) -> Result<SummaryDiff, VmaError> {
        if a >= b || b - a > MAX_RANGE {
            return Err(VmaError::InvalidRange {
                from: a,
                size: b.wrapping_sub(a),
            });
        }
        // Allocate boundary nodes up front so a failure leaves the tree as is.
        let needed = [a, b].iter().filter(|key| !self.tree.contains_key(*key)).count();
        self.tree.try_reserve(needed)?;

        let (before_a, at_a) = match self.tree.floor(&a) {
            Some((key, change)) if *key == a => (change.incoming.clone(), change.outgoing.clone()),
            Some((_, change)) => (change.outgoing.clone(), change.outgoing.clone()),
            None => (IntervalState::released(), IntervalState::released()),
        };

        let data = match state {
            State::Released => M::empty(),
            _ if mode == TagMode::Inherit && at_a.state != State::Released => {
                data.inherit(&at_a.data)
            }
            _ => data,
        };
        let new = IntervalState::new(state, data);

        // Retire the old contribution of every span in [a, b), collecting
        // the points that fall strictly inside.
        let mut diff = SummaryDiff::new();
        let mut cursor = a;
        let mut current = at_a;
        self.scratch.clear();
        for (key, change) in self.tree.range((Bound::Excluded(a), Bound::Excluded(b))) {
            diff.record(current.data.tag(), current.state, -signed(*key - cursor));
            self.scratch.push(*key);
            cursor = *key;
            current = change.outgoing.clone();
        }
        diff.record(current.data.tag(), current.state, -signed(b - cursor));
        diff.record(new.data.tag(), new.state, signed(b - a));

        let after_b = match self.tree.get(&b) {
            Some(change) => change.outgoing.clone(),
            None => current,
        };

        for key in self.scratch.drain(..) {
            self.tree.remove(&key);
        }
        self.place(
            a,
            IntervalChange {
                incoming: before_a,
                outgoing: new.clone(),
            },
        )?;
        self.place(
            b,
            IntervalChange {
                incoming: new,
                outgoing: after_b,
            },
        )?;

        tracing::trace!(from = a, to = b, %state, points = self.tree.len(), "registered mapping");
        Ok(diff)
    }

    /// Store `change` at `key`, or drop the point when it changes nothing
    fn place(&mut self, key: Address, change: IntervalChange<M>) -> Result<(), VmaError> {
        if change.is_noop() {
            self.tree.remove(&key);
        } else {
            self.tree.upsert(key, change)?;
        }
        Ok(())
    }

    /// Runs of `[from, to)` accepted by `select`, clipped to the range
    ///
    /// Collected before mutating so that every node the rewrite needs can be
    /// reserved at once.
    fn runs_matching(
        &self,
        from: Address,
        to: Address,
        select: impl Fn(&IntervalState<M>) -> bool,
    ) -> Vec<(Address, Address, IntervalState<M>)> {
        let mut runs = Vec::new();
        let mut cursor = from;
        while cursor < to {
            let (current, next) = self.segment(cursor, to);
            if select(&current) {
                runs.push((cursor, next, current));
            }
            cursor = next;
        }
        runs
    }

    /// Run ends in `runs` that are not stored yet
    ///
    /// Runs come from [`Self::runs_matching`], so only the clipped outer
    /// ends can be new; rewriting one run never removes a point a later run
    /// starts from.
    fn missing_boundaries(&self, runs: &[(Address, Address, IntervalState<M>)]) -> usize {
        runs.iter()
            .flat_map(|(start, end, _)| [*start, *end])
            .filter(|key| !self.tree.contains_key(key))
            .count()
    }

    /// State at `cursor` and the end of its run, capped at `limit`
    fn segment(&self, cursor: Address, limit: Address) -> (IntervalState<M>, Address) {
        let current = self.state_at(cursor);
        let next = match self.tree.higher(&cursor) {
            Some((key, _)) => (*key).min(limit),
            None => limit,
        };
        (current, next)
    }

    /// Number of stored boundary points
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// True when every address is released
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// All boundary points in address order
    pub fn points(&self) -> impl Iterator<Item = (Address, &IntervalChange<M>)> + '_ {
        self.tree.iter().map(|(key, change)| (*key, change))
    }

    /// Boundary points whose address falls in `range`
    pub fn points_in<R: RangeBounds<Address>>(
        &self,
        range: R,
    ) -> impl Iterator<Item = (Address, &IntervalChange<M>)> + '_ {
        self.tree.range(range).map(|(key, change)| (*key, change))
    }

    /// State and metadata of the byte at `addr`
    pub fn state_at(&self, addr: Address) -> IntervalState<M> {
        match self.tree.floor(&addr) {
            Some((_, change)) => change.outgoing.clone(),
            None => IntervalState::released(),
        }
    }

    /// The maximal run containing `addr`, unless `addr` is released
    pub fn find_enclosing(&self, addr: Address) -> Option<Interval<M>> {
        let (start, change) = self.tree.floor(&addr)?;
        if change.outgoing.state == State::Released {
            return None;
        }
        // A non-released run always has a closing point.
        let (end, _) = self.tree.higher(&addr)?;
        Some(Interval {
            start: *start,
            end: *end,
            state: change.outgoing.state,
            data: change.outgoing.data.clone(),
        })
    }

    /// Every non-released run, in address order
    pub fn intervals(&self) -> Intervals<'_, M> {
        match (self.tree.first(), self.tree.last()) {
            (Some((first, _)), Some((last, _))) => self.intervals_in(*first, *last),
            _ => self.intervals_in(0, 0),
        }
    }

    /// Non-released runs overlapping `[from, to)`, clipped to that range
    pub fn intervals_in(&self, from: Address, to: Address) -> Intervals<'_, M> {
        Intervals {
            points: self
                .tree
                .range((Bound::Excluded(from), Bound::Excluded(to))),
            cursor: from,
            current: self.state_at(from),
            end: to,
            done: from >= to,
        }
    }

    /// Reserved and committed bytes per tag, recomputed from scratch
    pub fn compute_summary(&self) -> SummaryDiff {
        let mut diff = SummaryDiff::new();
        let mut previous: Option<(Address, &IntervalState<M>)> = None;
        for (key, change) in self.tree.iter() {
            if let Some((start, state)) = previous {
                diff.record(state.data.tag(), state.state, signed(*key - start));
            }
            previous = Some((*key, &change.outgoing));
        }
        diff
    }
}

/// Iterator over the non-released runs of a [`VmaTree`]
#[derive(Debug)]
pub struct Intervals<'a, M> {
    points: Iter<'a, Address, IntervalChange<M>>,
    cursor: Address,
    current: IntervalState<M>,
    end: Address,
    done: bool,
}

impl<'a, M: RegionMetadata> Iterator for Intervals<'a, M> {
    type Item = Interval<M>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let (next_key, next_state) = match self.points.next() {
                Some((key, change)) => (*key, change.outgoing.clone()),
                None => {
                    self.done = true;
                    (self.end, IntervalState::released())
                }
            };
            let start = std::mem::replace(&mut self.cursor, next_key);
            let run = std::mem::replace(&mut self.current, next_state);
            if run.state != State::Released && next_key > start {
                return Some(Interval {
                    start,
                    end: next_key,
                    state: run.state,
                    data: run.data,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackIndex;
    use crate::summary::SingleDiff;

    fn data(tag: u16) -> RegionData {
        RegionData::new(StackIndex::default(), MemTag::new(tag))
    }

    fn keys(tree: &VmaTree<RegionData>) -> Vec<Address> {
        tree.points().map(|(key, _)| key).collect()
    }

    fn assert_minimal(tree: &VmaTree<RegionData>) {
        let mut previous: Option<&IntervalChange<RegionData>> = None;
        for (key, change) in tree.points() {
            assert!(!change.is_noop(), "noop point at {key}");
            if let Some(previous) = previous {
                assert_eq!(previous.outgoing, change.incoming, "broken chain at {key}");
            } else {
                assert_eq!(change.incoming.state, State::Released);
            }
            previous = Some(change);
        }
        if let Some(last) = previous {
            assert_eq!(last.outgoing.state, State::Released);
        }
    }

    #[test]
    fn test_adjacent_reserves_merge() {
        let mut tree = VmaTree::new();
        tree.reserve_mapping(0, 100, data(1)).unwrap();
        tree.reserve_mapping(100, 100, data(1)).unwrap();
        assert_eq!(keys(&tree), vec![0, 200]);
        assert_eq!(tree.points_in(0..300).count(), 2);
        assert_minimal(&tree);
    }

    #[test]
    fn test_adjacent_reserves_with_different_tags_keep_boundary() {
        let mut tree = VmaTree::new();
        tree.reserve_mapping(0, 100, data(1)).unwrap();
        tree.reserve_mapping(100, 100, data(2)).unwrap();
        assert_eq!(keys(&tree), vec![0, 100, 200]);
        assert_minimal(&tree);
    }

    #[test]
    fn test_reserve_then_release_empties_tree() {
        let mut tree = VmaTree::new();
        let reserved = tree.reserve_mapping(0, 100, data(1)).unwrap();
        let released = tree.release_mapping(0, 100).unwrap();
        assert_eq!(reserved.get(MemTag::new(1)).reserve, 100);
        assert_eq!(released.get(MemTag::new(1)).reserve, -100);
        assert!(tree.is_empty());
        assert!(tree
            .points_in(0..300)
            .all(|(_, change)| change.incoming.state == State::Released
                && change.outgoing.state == State::Released));
    }

    #[test]
    fn test_partial_commit_splits() {
        let mut tree = VmaTree::new();
        tree.reserve_mapping(0, 100, data(1)).unwrap();
        let diff = tree.commit_mapping(0, 50, data(1), TagMode::Replace).unwrap();
        assert_eq!(keys(&tree), vec![0, 50, 100]);
        assert_eq!(diff.get(MemTag::new(1)), SingleDiff { reserve: 0, commit: 50 });
        assert_minimal(&tree);
    }

    #[test]
    fn test_commit_in_the_middle() {
        let mut tree = VmaTree::new();
        tree.reserve_mapping(0, 300, data(1)).unwrap();
        tree.commit_mapping(100, 100, data(1), TagMode::Replace).unwrap();
        assert_eq!(keys(&tree), vec![0, 100, 200, 300]);
        assert_eq!(tree.state_at(150).state, State::Committed);
        assert_eq!(tree.state_at(250).state, State::Reserved);
        assert_eq!(tree.state_at(300).state, State::Released);
        assert_minimal(&tree);
    }

    #[test]
    fn test_overwrite_spanning_many_points() {
        let mut tree = VmaTree::new();
        for i in 0..10 {
            tree.reserve_mapping(i * 100, 50, data(1 + (i % 3) as u16)).unwrap();
        }
        assert_eq!(tree.len(), 20);

        let diff = tree.reserve_mapping(25, 900, data(7)).unwrap();
        assert_eq!(keys(&tree), vec![0, 25, 925, 950]);
        assert_eq!(diff.total().reserve, 950 - 500);
        assert_eq!(tree.compute_summary().total().reserve, 950);
        assert_minimal(&tree);
    }

    #[test]
    fn test_release_and_uncommit_are_idempotent() {
        let mut tree = VmaTree::new();
        assert!(tree.release_mapping(0, 4096).unwrap().is_zero());
        assert!(tree.uncommit_mapping(0, 4096, data(1)).unwrap().is_zero());
        assert!(tree.is_empty());

        tree.reserve_mapping(0, 4096, data(1)).unwrap();
        tree.commit_mapping(0, 1024, data(1), TagMode::Replace).unwrap();
        let first = tree.uncommit_mapping(0, 4096, data(1)).unwrap();
        assert_eq!(first.get(MemTag::new(1)), SingleDiff { reserve: 0, commit: -1024 });
        let before = keys(&tree);
        assert!(tree.uncommit_mapping(0, 4096, data(1)).unwrap().is_zero());
        assert_eq!(keys(&tree), before);
        assert_eq!(keys(&tree), vec![0, 4096]);

        tree.release_mapping(0, 4096).unwrap();
        assert!(tree.release_mapping(0, 4096).unwrap().is_zero());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_uncommit_keeps_tag_in_place() {
        let mut tree = VmaTree::new();
        tree.reserve_mapping(0, 100, data(4)).unwrap();
        tree.commit_mapping(0, 100, data(4), TagMode::Replace).unwrap();
        let diff = tree.uncommit_mapping(0, 100, data(0)).unwrap();
        assert_eq!(diff.get(MemTag::new(4)).commit, -100);
        assert_eq!(tree.state_at(0).data.tag, MemTag::new(4));
    }

    #[test]
    fn test_commit_inherits_tag() {
        let mut tree = VmaTree::new();
        tree.reserve_mapping(0, 100, data(5)).unwrap();
        let diff = tree.commit_mapping(0, 100, data(0), TagMode::Inherit).unwrap();
        assert_eq!(diff.get(MemTag::new(5)), SingleDiff { reserve: 0, commit: 100 });
        assert_eq!(keys(&tree), vec![0, 100]);
    }

    #[test]
    fn test_invalid_ranges() {
        let mut tree: VmaTree<RegionData> = VmaTree::new();
        assert_eq!(
            tree.reserve_mapping(10, 0, data(1)),
            Err(VmaError::InvalidRange { from: 10, size: 0 })
        );
        assert_eq!(
            tree.release_mapping(usize::MAX - 1, 2),
            Err(VmaError::InvalidRange {
                from: usize::MAX - 1,
                size: 2
            })
        );
        assert!(tree.reserve_mapping(usize::MAX - 1, 1, data(1)).is_ok());

        // Spans must fit a signed delta.
        let huge = MAX_RANGE + 1;
        assert_eq!(
            tree.reserve_mapping(0, huge, data(1)),
            Err(VmaError::InvalidRange { from: 0, size: huge })
        );
        assert_eq!(
            tree.reserve_mapping(0x1000, huge + 4096, data(1)),
            Err(VmaError::InvalidRange {
                from: 0x1000,
                size: huge + 4096
            })
        );
        assert!(tree
            .register_mapping(0, huge, State::Reserved, data(1), TagMode::Replace)
            .is_err());
        assert_eq!(keys(&tree), vec![usize::MAX - 1, usize::MAX]);
    }

    #[test]
    fn test_largest_range_has_exact_delta() {
        let mut tree = VmaTree::new();
        let diff = tree.reserve_mapping(0, MAX_RANGE, data(1)).unwrap();
        assert_eq!(diff.get(MemTag::new(1)).reserve, i64::MAX);
        assert_eq!(diff, tree.compute_summary());

        let diff = tree.release_mapping(0, MAX_RANGE).unwrap();
        assert_eq!(diff.get(MemTag::new(1)).reserve, -i64::MAX);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_allocation_failure_leaves_tree_untouched() {
        let mut tree = VmaTree::new();
        tree.reserve_mapping(0, 100, data(1)).unwrap();
        tree.reserve_mapping(200, 100, data(1)).unwrap();
        let before_keys = keys(&tree);
        let before_summary = tree.compute_summary();

        // No room for the two new boundaries at 50 and 250.
        tree.tree.limit_nodes(4);
        assert_eq!(
            tree.reserve_mapping(50, 200, data(2)),
            Err(VmaError::OutOfMemory(TreapError::OutOfMemory))
        );
        assert_eq!(keys(&tree), before_keys);
        assert_eq!(tree.compute_summary(), before_summary);
        assert_minimal(&tree);

        // Rewrites that only reuse existing boundaries still go through.
        let diff = tree.commit_mapping(0, 100, data(1), TagMode::Replace).unwrap();
        assert_eq!(diff.get(MemTag::new(1)).commit, 100);

        // Multi-run rewrites reserve for every run before touching any.
        tree.commit_mapping(200, 100, data(1), TagMode::Replace).unwrap();
        let before_keys = keys(&tree);
        assert!(tree.set_tag(0, 300, MemTag::new(3)).is_ok());
        tree.set_tag(0, 300, MemTag::new(1)).unwrap();
        assert!(tree.uncommit_mapping(50, 200, data(0)).is_err());
        assert_eq!(keys(&tree), before_keys);

        tree.tree.limit_nodes(usize::MAX);
        let diff = tree.reserve_mapping(50, 200, data(2)).unwrap();
        let mut expected = SummaryDiff::new();
        expected.record(MemTag::new(1), State::Committed, -100);
        expected.record(MemTag::new(2), State::Reserved, 200);
        assert_eq!(diff, expected);
        assert_minimal(&tree);
    }

    #[test]
    fn test_end_to_end_scenario() {
        let a = MemTag::new(1);
        let b = MemTag::new(2);
        let mut tree = VmaTree::new();
        let mut total = SummaryDiff::new();

        total += tree.reserve_mapping(1000, 4096, data(1)).unwrap();
        total += tree.commit_mapping(1000, 2048, data(1), TagMode::Replace).unwrap();
        total += tree.set_tag(1000, 1024, b).unwrap();

        assert_eq!(keys(&tree), vec![1000, 2024, 3048, 5096]);
        assert_eq!(total.get(a), SingleDiff { reserve: 3072, commit: 1024 });
        assert_eq!(total.get(b), SingleDiff { reserve: 1024, commit: 1024 });
        assert_eq!(total, tree.compute_summary());
        assert_minimal(&tree);
    }

    #[test]
    fn test_set_tag_across_several_runs() {
        let mut tree = VmaTree::new();
        tree.reserve_mapping(0, 100, data(1)).unwrap();
        tree.commit_mapping(100, 100, data(2), TagMode::Replace).unwrap();
        tree.reserve_mapping(300, 100, data(3)).unwrap();

        let diff = tree.set_tag(50, 300, MemTag::new(9)).unwrap();

        // [0,50) keeps tag 1, [50,100) reserved/9, [100,200) committed/9,
        // [200,300) stays released, [300,350) reserved/9, [350,400) tag 3.
        assert_eq!(keys(&tree), vec![0, 50, 100, 200, 300, 350, 400]);
        assert_eq!(tree.state_at(75).data.tag, MemTag::new(9));
        assert_eq!(tree.state_at(150).state, State::Committed);
        assert_eq!(tree.state_at(150).data.tag, MemTag::new(9));
        assert_eq!(tree.state_at(250).state, State::Released);
        assert_eq!(tree.state_at(325).data.tag, MemTag::new(9));
        assert_eq!(tree.state_at(375).data.tag, MemTag::new(3));

        assert_eq!(diff.get(MemTag::new(9)), SingleDiff { reserve: 200, commit: 100 });
        assert_eq!(diff.get(MemTag::new(1)).reserve, -50);
        assert_eq!(diff.get(MemTag::new(2)), SingleDiff { reserve: -100, commit: -100 });
        assert_eq!(diff.get(MemTag::new(3)).reserve, -50);
        assert_minimal(&tree);
    }

    #[test]
    fn test_set_tag_over_released_is_noop() {
        let mut tree: VmaTree<RegionData> = VmaTree::new();
        assert!(tree.set_tag(0, 100, MemTag::new(1)).unwrap().is_zero());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_find_enclosing_and_intervals() {
        let mut tree = VmaTree::new();
        tree.reserve_mapping(0x1000, 0x3000, data(1)).unwrap();
        tree.commit_mapping(0x2000, 0x1000, data(1), TagMode::Replace).unwrap();

        let run = tree.find_enclosing(0x2800).unwrap();
        assert_eq!((run.start, run.end, run.state), (0x2000, 0x3000, State::Committed));
        assert!(tree.find_enclosing(0x800).is_none());
        assert!(tree.find_enclosing(0x4000).is_none());

        let all: Vec<_> = tree.intervals().map(|i| (i.start, i.end, i.state)).collect();
        assert_eq!(
            all,
            vec![
                (0x1000, 0x2000, State::Reserved),
                (0x2000, 0x3000, State::Committed),
                (0x3000, 0x4000, State::Reserved),
            ]
        );

        let clipped: Vec<_> = tree
            .intervals_in(0x1800, 0x2800)
            .map(|i| (i.start, i.end))
            .collect();
        assert_eq!(clipped, vec![(0x1800, 0x2000), (0x2000, 0x2800)]);
        assert_eq!(tree.intervals_in(0, 0x1000).count(), 0);
    }
}
