//! Running per-tag totals

use std::collections::BTreeMap;

use super::{SingleDiff, SummaryDiff};
use crate::tags::MemTag;

/// Current and peak byte counts for one tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TagCounters {
    /// Bytes reserved, committed bytes included
    pub reserved: u64,
    /// Bytes committed
    pub committed: u64,
    /// Highest committed value observed
    pub peak_committed: u64,
}

/// Per-tag totals fed by [`SummaryDiff`]s
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemorySummary {
    tags: BTreeMap<MemTag, TagCounters>,
}

impl MemorySummary {
    /// Empty summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Build totals from a diff taken against empty memory
    pub fn from_diff(diff: &SummaryDiff) -> Self {
        let mut summary = Self::new();
        summary.apply(diff);
        summary
    }

    /// Move the counters by `diff`
    ///
    /// Counters saturate at zero: an inconsistent delta degrades accuracy
    /// instead of wrapping.
    pub fn apply(&mut self, diff: &SummaryDiff) {
        for (tag, delta) in diff.iter() {
            let counters = self.tags.entry(tag).or_default();
            counters.reserved = counters.reserved.saturating_add_signed(delta.reserve);
            counters.committed = counters.committed.saturating_add_signed(delta.commit);
            counters.peak_committed = counters.peak_committed.max(counters.committed);
        }
    }

    /// Counters for `tag`
    pub fn by_tag(&self, tag: MemTag) -> TagCounters {
        self.tags.get(&tag).copied().unwrap_or_default()
    }

    /// Tags with any reserved, committed or peak bytes, in tag order
    pub fn iter(&self) -> impl Iterator<Item = (MemTag, TagCounters)> + '_ {
        self.tags
            .iter()
            .filter(|(_, c)| c.reserved != 0 || c.committed != 0 || c.peak_committed != 0)
            .map(|(tag, counters)| (*tag, *counters))
    }

    /// Reserved bytes over all tags
    pub fn total_reserved(&self) -> u64 {
        self.tags.values().map(|c| c.reserved).sum()
    }

    /// Committed bytes over all tags
    pub fn total_committed(&self) -> u64 {
        self.tags.values().map(|c| c.committed).sum()
    }

    /// Signed change from `baseline` to `self`, per tag
    pub fn compare(&self, baseline: &MemorySummary) -> SummaryDiff {
        let mut diff = SummaryDiff::new();
        for tag in self.tags.keys().chain(baseline.tags.keys()) {
            if diff.get(*tag) != SingleDiff::default() {
                continue;
            }
            let now = self.by_tag(*tag);
            let then = baseline.by_tag(*tag);
            diff.add(
                *tag,
                SingleDiff {
                    reserve: now.reserved as i64 - then.reserved as i64,
                    commit: now.committed as i64 - then.committed as i64,
                },
            );
        }
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vma::State;

    #[test]
    fn test_apply_tracks_peak() {
        let tag = MemTag::new(2);
        let mut summary = MemorySummary::new();

        let mut grow = SummaryDiff::new();
        grow.record(tag, State::Committed, 4096);
        summary.apply(&grow);

        let mut shrink = SummaryDiff::new();
        shrink.add(tag, SingleDiff { reserve: 0, commit: -1024 });
        summary.apply(&shrink);

        let counters = summary.by_tag(tag);
        assert_eq!(counters.reserved, 4096);
        assert_eq!(counters.committed, 3072);
        assert_eq!(counters.peak_committed, 4096);
    }

    #[test]
    fn test_apply_saturates() {
        let tag = MemTag::new(1);
        let mut summary = MemorySummary::new();
        let mut diff = SummaryDiff::new();
        diff.record(tag, State::Reserved, -10);
        summary.apply(&diff);
        assert_eq!(summary.by_tag(tag).reserved, 0);
    }

    #[test]
    fn test_compare_against_baseline() {
        let a = MemTag::new(1);
        let b = MemTag::new(2);

        let mut before = SummaryDiff::new();
        before.record(a, State::Committed, 100);
        let baseline = MemorySummary::from_diff(&before);

        let mut after = before.clone();
        after.record(a, State::Reserved, 50);
        after.record(b, State::Reserved, 30);
        let current = MemorySummary::from_diff(&after);

        let delta = current.compare(&baseline);
        assert_eq!(delta.get(a), SingleDiff { reserve: 50, commit: 0 });
        assert_eq!(delta.get(b), SingleDiff { reserve: 30, commit: 0 });
        assert!(baseline.compare(&baseline).is_zero());
    }
}
