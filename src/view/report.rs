//! Human-readable reports
//!
//! Reserved regions are the maximal non-released runs sharing a tag and a
//! mapping (commits inside a reservation carry their own call stacks, so a
//! reservation usually spans several runs). Committed regions are the
//! committed runs. Both lists come out of the trees sorted by address, so
//! nesting commits under reservations is one merge-like pass.

use std::collections::VecDeque;
use std::fmt::{self, Write};
use std::str::FromStr;

use super::metadata::{Mapping, VirtualMemoryData};
use super::space::{MemorySpace, SpaceId};
use super::tracker::TrackerSnapshot;
use super::{ViewError, VirtualMemoryView};
use crate::stack::{NativeCallStackStorage, StackIndex};
use crate::summary::MemorySummary;
use crate::tags::{MemTag, MemTagNameTable};
use crate::vma::{Interval, RegionData, State};
use crate::{Address, ConfigError};

/// Unit amounts are printed in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Scale {
    /// Bytes
    Bytes,
    /// 1024 bytes
    #[default]
    KiB,
    /// 1024 KiB
    MiB,
    /// 1024 MiB
    GiB,
}

impl Scale {
    /// Bytes per unit
    pub fn divisor(self) -> u64 {
        match self {
            Scale::Bytes => 1,
            Scale::KiB => 1 << 10,
            Scale::MiB => 1 << 20,
            Scale::GiB => 1 << 30,
        }
    }

    /// Unit suffix
    pub fn unit(self) -> &'static str {
        match self {
            Scale::Bytes => "B",
            Scale::KiB => "KB",
            Scale::MiB => "MB",
            Scale::GiB => "GB",
        }
    }

    /// `bytes` in this unit, rounded to nearest
    pub fn amount(self, bytes: u64) -> u64 {
        let div = self.divisor();
        bytes.saturating_add(div / 2) / div
    }

    /// Signed `bytes` in this unit, rounded to nearest
    pub fn signed_amount(self, bytes: i64) -> i64 {
        let magnitude = i64::try_from(self.amount(bytes.unsigned_abs())).unwrap_or(i64::MAX);
        if bytes < 0 {
            -magnitude
        } else {
            magnitude
        }
    }

    fn format(self, bytes: u64) -> String {
        format!("{}{}", self.amount(bytes), self.unit())
    }

    fn format_signed(self, bytes: i64) -> String {
        format!("{:+}{}", self.signed_amount(bytes), self.unit())
    }
}

impl FromStr for Scale {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "b" | "bytes" => Ok(Scale::Bytes),
            "k" | "kb" | "kib" => Ok(Scale::KiB),
            "m" | "mb" | "mib" => Ok(Scale::MiB),
            "g" | "gb" | "gib" => Ok(Scale::GiB),
            _ => Err(ConfigError::UnknownScale(s.to_string())),
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.unit())
    }
}

/// A committed range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedRegion {
    /// First byte
    pub start: Address,
    /// One past the last byte
    pub end: Address,
    /// Accounting tag
    pub tag: MemTag,
    /// Call site of the commit
    pub stack: StackIndex,
}

/// A reservation and the commits inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedRegion {
    /// First byte
    pub start: Address,
    /// One past the last byte
    pub end: Address,
    /// Accounting tag
    pub tag: MemTag,
    /// Call site of the reservation
    pub stack: StackIndex,
    /// Backing space, for mapped regions
    pub mapping: Option<Mapping>,
    /// Committed parts, in address order
    pub committed: Vec<CommittedRegion>,
}

impl ReservedRegion {
    /// Length in bytes
    pub fn size(&self) -> usize {
        self.end - self.start
    }

    /// Committed bytes inside the region
    pub fn committed_size(&self) -> usize {
        self.committed.iter().map(|c| c.end - c.start).sum()
    }
}

/// Regions of one space
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionReport {
    /// Reservations with nested commits
    pub reserved: Vec<ReservedRegion>,
    /// Commits outside every reservation (device spaces only)
    pub orphans: Vec<CommittedRegion>,
}

fn reserved_regions(runs: impl Iterator<Item = Interval<VirtualMemoryData>>) -> Vec<ReservedRegion> {
    let mut regions: Vec<ReservedRegion> = Vec::new();
    // Whether the current region's stack came from a reserved run
    let mut stack_from_reserve = false;
    for run in runs {
        match regions.last_mut() {
            Some(region)
                if region.end == run.start
                    && region.tag == run.data.tag
                    && region.mapping == run.data.mapping =>
            {
                region.end = run.end;
                if !stack_from_reserve && run.state == State::Reserved {
                    region.stack = run.data.stack;
                    stack_from_reserve = true;
                }
            }
            _ => {
                stack_from_reserve = run.state == State::Reserved;
                regions.push(ReservedRegion {
                    start: run.start,
                    end: run.end,
                    tag: run.data.tag,
                    stack: run.data.stack,
                    mapping: run.data.mapping,
                    committed: Vec::new(),
                });
            }
        }
    }
    regions
}

fn committed_regions(
    runs: impl Iterator<Item = (Address, Address, State, MemTag, StackIndex)>,
) -> Vec<CommittedRegion> {
    let mut regions: Vec<CommittedRegion> = Vec::new();
    for (start, end, state, tag, stack) in runs {
        if state != State::Committed {
            continue;
        }
        match regions.last_mut() {
            Some(last) if last.end == start && last.tag == tag && last.stack == stack => {
                last.end = end;
            }
            _ => regions.push(CommittedRegion { start, end, tag, stack }),
        }
    }
    regions
}

/// Nest `committed` under `reserved`; both must be sorted and
/// non-overlapping within themselves
///
/// A commit straddling a reservation border is split: the part inside is
/// nested, parts outside go to the next reservation or to the orphans.
fn nest(mut reserved: Vec<ReservedRegion>, committed: Vec<CommittedRegion>) -> RegionReport {
    let mut pending: VecDeque<CommittedRegion> = committed.into();
    let mut orphans = Vec::new();

    for region in reserved.iter_mut() {
        while let Some(commit) = pending.pop_front() {
            if commit.end <= region.start {
                orphans.push(commit);
                continue;
            }
            if commit.start >= region.end {
                pending.push_front(commit);
                break;
            }
            if commit.start < region.start {
                orphans.push(CommittedRegion {
                    end: region.start,
                    ..commit.clone()
                });
            }
            if commit.end > region.end {
                pending.push_front(CommittedRegion {
                    start: region.end,
                    ..commit.clone()
                });
            }
            region.committed.push(CommittedRegion {
                start: commit.start.max(region.start),
                end: commit.end.min(region.end),
                ..commit
            });
        }
    }
    orphans.extend(pending);
    RegionReport { reserved, orphans }
}

/// Regions of `space`
pub fn regions_of(space: &MemorySpace) -> RegionReport {
    let reserved = reserved_regions(space.reserved().intervals());
    let committed = match space.committed() {
        Some(tree) => committed_regions(tree.intervals().map(|run: Interval<RegionData>| {
            (run.start, run.end, run.state, run.data.tag, run.data.stack)
        })),
        None => committed_regions(
            space
                .reserved()
                .intervals()
                .map(|run| (run.start, run.end, run.state, run.data.tag, run.data.stack)),
        ),
    };
    nest(reserved, committed)
}

/// Prints summaries and region listings of a view
#[derive(Debug)]
pub struct Reporter<'a> {
    view: &'a VirtualMemoryView,
    tags: &'a MemTagNameTable,
    scale: Scale,
    dropped_updates: u64,
}

impl<'a> Reporter<'a> {
    /// Reporter over `view`, naming tags from `tags`
    pub fn new(view: &'a VirtualMemoryView, tags: &'a MemTagNameTable, scale: Scale) -> Self {
        Self {
            view,
            tags,
            scale,
            dropped_updates: 0,
        }
    }

    /// Mention `dropped` lost updates in the output
    pub fn with_dropped_updates(mut self, dropped: u64) -> Self {
        self.dropped_updates = dropped;
        self
    }

    /// Regions of `space`
    pub fn regions(&self, space: SpaceId) -> Result<RegionReport, ViewError> {
        Ok(regions_of(self.view.space(space)?))
    }

    fn header(&self, out: &mut dyn Write) -> fmt::Result {
        writeln!(out, "Virtual memory (scale: {})", self.scale)?;
        if self.dropped_updates > 0 {
            writeln!(
                out,
                "Dropped updates: {} (totals are approximate)",
                self.dropped_updates
            )?;
        }
        Ok(())
    }

    fn space_totals(
        &self,
        out: &mut dyn Write,
        id: SpaceId,
        space: &MemorySpace,
    ) -> fmt::Result {
        let summary = space.summary();
        writeln!(
            out,
            "\n{} {}: reserved={} committed={}",
            id,
            space.name(),
            self.scale.format(summary.total_reserved()),
            self.scale.format(summary.total_committed())
        )?;
        for (tag, counters) in summary.iter() {
            writeln!(
                out,
                "  {:<16} reserved={} committed={} peak={}",
                self.tags.display_name(tag),
                self.scale.format(counters.reserved),
                self.scale.format(counters.committed),
                self.scale.format(counters.peak_committed)
            )?;
        }
        Ok(())
    }

    /// Per-space totals and per-tag counters
    pub fn summary(&self, out: &mut dyn Write) -> fmt::Result {
        self.header(out)?;
        for (id, space) in self.view.spaces() {
            self.space_totals(out, id, space)?;
        }
        Ok(())
    }

    /// Totals plus every region with its call stack and nested commits
    pub fn detail(&self, out: &mut dyn Write) -> fmt::Result {
        self.header(out)?;
        let stacks = self.view.stacks();
        for (id, space) in self.view.spaces() {
            self.space_totals(out, id, space)?;
            let report = regions_of(space);
            for region in &report.reserved {
                self.reserved_region(out, region, stacks)?;
            }
            if !report.orphans.is_empty() {
                writeln!(out, "\n  committed outside any reservation:")?;
                for commit in &report.orphans {
                    self.committed_region(out, commit, stacks)?;
                }
            }
        }
        Ok(())
    }

    fn reserved_region(
        &self,
        out: &mut dyn Write,
        region: &ReservedRegion,
        stacks: &NativeCallStackStorage,
    ) -> fmt::Result {
        write!(
            out,
            "\n  [{:#018x} - {:#018x}] reserved {} for {}",
            region.start,
            region.end,
            self.scale.format(region.size() as u64),
            self.tags.display_name(region.tag)
        )?;
        if let Some(mapping) = region.mapping {
            let name = self
                .view
                .space(mapping.space)
                .map(|s| s.name().to_string())
                .unwrap_or_default();
            write!(
                out,
                ", mapped to {} {} at {:#x}",
                mapping.space,
                name,
                mapping.offset_of(region.start)
            )?;
        }
        writeln!(out)?;
        if stacks.is_detailed() {
            write_stack(out, stacks, region.stack, 6)?;
        }
        for commit in &region.committed {
            self.committed_region(out, commit, stacks)?;
        }
        Ok(())
    }

    fn committed_region(
        &self,
        out: &mut dyn Write,
        commit: &CommittedRegion,
        stacks: &NativeCallStackStorage,
    ) -> fmt::Result {
        writeln!(
            out,
            "    [{:#018x} - {:#018x}] committed {}",
            commit.start,
            commit.end,
            self.scale.format((commit.end - commit.start) as u64)
        )?;
        if stacks.is_detailed() {
            write_stack(out, stacks, commit.stack, 10)?;
        }
        Ok(())
    }
}

fn write_stack(
    out: &mut dyn Write,
    stacks: &NativeCallStackStorage,
    index: StackIndex,
    indent: usize,
) -> fmt::Result {
    let stack = stacks.get(index);
    for line in stack.to_string().lines() {
        writeln!(out, "{:indent$}{}", "", line, indent = indent)?;
    }
    Ok(())
}

/// Print the change from `baseline` to `current`, per space and tag
pub fn render_diff(
    out: &mut dyn Write,
    current: &TrackerSnapshot,
    baseline: &TrackerSnapshot,
    tags: &MemTagNameTable,
    scale: Scale,
) -> fmt::Result {
    writeln!(out, "Virtual memory diff (scale: {})", scale)?;
    if current.approximate || baseline.approximate {
        writeln!(
            out,
            "Dropped updates: {} now, {} in baseline (totals are approximate)",
            current.dropped_updates, baseline.dropped_updates
        )?;
    }

    let empty = MemorySummary::new();
    let mut ids: Vec<SpaceId> = current
        .spaces
        .iter()
        .chain(baseline.spaces.iter())
        .map(|space| space.id)
        .collect();
    ids.sort();
    ids.dedup();

    for id in ids {
        let now = current.summary(id).unwrap_or(&empty);
        let then = baseline.summary(id).unwrap_or(&empty);
        let name = current
            .spaces
            .iter()
            .chain(baseline.spaces.iter())
            .find(|space| space.id == id)
            .map(|space| space.name.as_str())
            .unwrap_or_default();

        let delta = now.compare(then);
        let total = delta.total();
        writeln!(
            out,
            "\n{} {}: reserved={} {} committed={} {}",
            id,
            name,
            scale.format(now.total_reserved()),
            scale.format_signed(total.reserve),
            scale.format(now.total_committed()),
            scale.format_signed(total.commit)
        )?;
        for (tag, change) in delta.iter() {
            let counters = now.by_tag(tag);
            writeln!(
                out,
                "  {:<16} reserved={} {} committed={} {}",
                tags.display_name(tag),
                scale.format(counters.reserved),
                scale.format_signed(change.reserve),
                scale.format(counters.committed),
                scale.format_signed(change.commit)
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::NativeCallStack;
    use crate::TrackerConfig;

    fn commit(start: Address, end: Address) -> CommittedRegion {
        CommittedRegion {
            start,
            end,
            tag: MemTag::NONE,
            stack: StackIndex::default(),
        }
    }

    fn reserve(start: Address, end: Address) -> ReservedRegion {
        ReservedRegion {
            start,
            end,
            tag: MemTag::NONE,
            stack: StackIndex::default(),
            mapping: None,
            committed: Vec::new(),
        }
    }

    #[test]
    fn test_scale_rounding() {
        assert_eq!(Scale::KiB.amount(1536), 2);
        assert_eq!(Scale::KiB.amount(1023), 1);
        assert_eq!(Scale::KiB.amount(511), 0);
        assert_eq!(Scale::MiB.signed_amount(-(3 << 20)), -3);
        assert_eq!(Scale::Bytes.signed_amount(-7), -7);
        assert_eq!(Scale::KiB.signed_amount(-1536), -2);
        assert_eq!(Scale::KiB.signed_amount(i64::MIN), -(1 << 53));
        assert_eq!(Scale::Bytes.signed_amount(i64::MIN), -i64::MAX);
        assert_eq!(Scale::Bytes.signed_amount(i64::MAX), i64::MAX);
        assert_eq!("m".parse::<Scale>().unwrap(), Scale::MiB);
        assert!("tb".parse::<Scale>().is_err());
    }

    #[test]
    fn test_nest_splits_straddling_commits() {
        let reserved = vec![reserve(100, 200), reserve(300, 400)];
        let committed = vec![commit(50, 150), commit(180, 320), commit(500, 600)];
        let report = nest(reserved, committed);

        let inner: Vec<Vec<(Address, Address)>> = report
            .reserved
            .iter()
            .map(|r| r.committed.iter().map(|c| (c.start, c.end)).collect())
            .collect();
        assert_eq!(inner, vec![vec![(100, 150), (180, 200)], vec![(300, 320)]]);

        let orphans: Vec<_> = report.orphans.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(orphans, vec![(50, 100), (200, 300), (500, 600)]);
    }

    #[test]
    fn test_process_regions_nest_commits() {
        let mut view = VirtualMemoryView::new(TrackerConfig::detail());
        let heap = MemTag::new(1);
        let reserve_site = NativeCallStack::new(vec![0xaaaa]);
        let commit_site = NativeCallStack::new(vec![0xbbbb]);

        view.reserve(SpaceId::PROCESS, 0x10_000, 0x10_000, heap, &reserve_site)
            .unwrap();
        view.commit(SpaceId::PROCESS, 0x10_000, 0x1000, heap, &commit_site)
            .unwrap();
        view.commit(SpaceId::PROCESS, 0x18_000, 0x2000, heap, &commit_site)
            .unwrap();
        view.reserve(SpaceId::PROCESS, 0x40_000, 0x1000, MemTag::new(2), &reserve_site)
            .unwrap();

        let report = regions_of(view.space(SpaceId::PROCESS).unwrap());
        assert_eq!(report.reserved.len(), 2);
        assert!(report.orphans.is_empty());

        let first = &report.reserved[0];
        assert_eq!((first.start, first.end), (0x10_000, 0x20_000));
        assert_eq!(view.stacks().get(first.stack), &reserve_site);
        assert_eq!(first.committed.len(), 2);
        assert_eq!(first.committed_size(), 0x3000);
        assert_eq!(view.stacks().get(first.committed[0].stack), &commit_site);
        assert!(report.reserved[1].committed.is_empty());
    }

    #[test]
    fn test_detail_output_mentions_regions_and_drops() {
        let mut view = VirtualMemoryView::new(TrackerConfig::detail());
        let mut tags = MemTagNameTable::new();
        let heap = tags.make_tag("heap").unwrap();
        let gpu = view.register_space("gpu").unwrap();
        let site = NativeCallStack::new(vec![0x4242]);

        view.reserve(SpaceId::PROCESS, 0x10_000, 0x4000, heap, &site).unwrap();
        view.commit(SpaceId::PROCESS, 0x10_000, 0x1000, heap, &site).unwrap();
        view.map(gpu, 0x80_000, 0x2000, 0x1000, heap, &site).unwrap();

        let mut out = String::new();
        Reporter::new(&view, &tags, Scale::KiB)
            .with_dropped_updates(3)
            .detail(&mut out)
            .unwrap();

        assert!(out.contains("Dropped updates: 3"));
        assert!(out.contains("space#0 process: reserved=24KB committed=4KB"));
        assert!(out.contains("heap"));
        assert!(out.contains("reserved 16KB for heap"));
        assert!(out.contains("committed 4KB"));
        assert!(out.contains("mapped to space#1 gpu at 0x1000"));
        assert!(out.contains("[0x0000000000004242]"));
    }

    #[test]
    fn test_summary_without_drops_has_no_notice() {
        let view = VirtualMemoryView::new(TrackerConfig::summary());
        let tags = MemTagNameTable::new();
        let mut out = String::new();
        Reporter::new(&view, &tags, Scale::Bytes).summary(&mut out).unwrap();
        assert!(out.starts_with("Virtual memory (scale: B)"));
        assert!(!out.contains("approximate"));
    }
}
