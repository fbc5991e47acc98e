//! Reserved/committed accounting
//!
//! Interval-engine operations return a [`SummaryDiff`] holding the signed
//! byte deltas they caused per tag. Running totals live in a
//! [`MemorySummary`] that only ever moves by applying those deltas.

mod accumulator;

pub use accumulator::{MemorySummary, TagCounters};

use std::ops::AddAssign;

use smallvec::SmallVec;

use crate::tags::MemTag;
use crate::vma::State;

/// Signed byte deltas for one tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SingleDiff {
    /// Change in reserved bytes (committed memory counts as reserved too)
    pub reserve: i64,
    /// Change in committed bytes
    pub commit: i64,
}

impl SingleDiff {
    /// True when neither counter moves
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.reserve == 0 && self.commit == 0
    }
}

impl AddAssign for SingleDiff {
    fn add_assign(&mut self, rhs: Self) {
        self.reserve += rhs.reserve;
        self.commit += rhs.commit;
    }
}

/// Per-tag deltas produced by one or more operations
///
/// Most operations touch one or two tags, so entries are kept inline.
/// Equality ignores entry order and zero entries.
#[derive(Debug, Clone, Default)]
pub struct SummaryDiff {
    entries: SmallVec<[(MemTag, SingleDiff); 4]>,
}

impl SummaryDiff {
    /// Empty diff
    pub fn new() -> Self {
        Self::default()
    }

    /// Deltas recorded for `tag`
    pub fn get(&self, tag: MemTag) -> SingleDiff {
        self.entries
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, diff)| *diff)
            .unwrap_or_default()
    }

    fn entry_mut(&mut self, tag: MemTag) -> &mut SingleDiff {
        let pos = match self.entries.iter().position(|(t, _)| *t == tag) {
            Some(pos) => pos,
            None => {
                self.entries.push((tag, SingleDiff::default()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[pos].1
    }

    /// Account `bytes` (signed) of memory in `state` against `tag`
    ///
    /// Released memory counts toward nothing; committed memory counts
    /// toward both reserve and commit.
    pub fn record(&mut self, tag: MemTag, state: State, bytes: i64) {
        if bytes == 0 || !state.is_reserved() {
            return;
        }
        let entry = self.entry_mut(tag);
        entry.reserve = entry.reserve.saturating_add(bytes);
        if state.is_committed() {
            entry.commit = entry.commit.saturating_add(bytes);
        }
    }

    /// Add raw deltas for `tag`
    pub fn add(&mut self, tag: MemTag, diff: SingleDiff) {
        if !diff.is_zero() {
            *self.entry_mut(tag) += diff;
        }
    }

    /// True when no counter moves
    pub fn is_zero(&self) -> bool {
        self.entries.iter().all(|(_, diff)| diff.is_zero())
    }

    /// Sum over all tags
    pub fn total(&self) -> SingleDiff {
        let mut total = SingleDiff::default();
        for (_, diff) in &self.entries {
            total += *diff;
        }
        total
    }

    /// Non-zero entries in ascending tag order
    pub fn iter(&self) -> impl Iterator<Item = (MemTag, SingleDiff)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .copied()
            .filter(|(_, diff)| !diff.is_zero())
            .collect();
        entries.sort_by_key(|(tag, _)| *tag);
        entries.into_iter()
    }

    /// Same diff with the reserve deltas dropped
    ///
    /// Used for commit partitions, whose commits do not reserve anything of
    /// their own.
    pub fn commit_only(&self) -> SummaryDiff {
        let mut out = SummaryDiff::new();
        for (tag, diff) in &self.entries {
            out.add(
                *tag,
                SingleDiff {
                    reserve: 0,
                    commit: diff.commit,
                },
            );
        }
        out
    }
}

impl PartialEq for SummaryDiff {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for SummaryDiff {}

impl AddAssign<&SummaryDiff> for SummaryDiff {
    fn add_assign(&mut self, rhs: &SummaryDiff) {
        for (tag, diff) in &rhs.entries {
            self.add(*tag, *diff);
        }
    }
}

impl AddAssign for SummaryDiff {
    fn add_assign(&mut self, rhs: SummaryDiff) {
        *self += &rhs;
    }
}
