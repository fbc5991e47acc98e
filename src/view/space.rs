//! Memory spaces and their per-space trees

use std::fmt;

use super::metadata::VirtualMemoryData;
use crate::summary::{MemorySummary, SummaryDiff};
use crate::vma::{RegionData, VmaTree};

/// Identifier of a registered memory space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpaceId(u32);

impl SpaceId {
    /// The process's own virtual address space
    pub const PROCESS: SpaceId = SpaceId(0);

    /// Wrap a raw id
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// True for [`SpaceId::PROCESS`]
    pub const fn is_process(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "space#{}", self.0)
    }
}

/// Tracked state of one space
///
/// The process space records reservations and commits in a single tree.
/// Device spaces keep their commits in a second tree of their own, since
/// device memory is committed independently of any reservation.
#[derive(Debug)]
pub struct MemorySpace {
    name: String,
    reserved: VmaTree<VirtualMemoryData>,
    committed: Option<VmaTree<RegionData>>,
    summary: MemorySummary,
}

impl MemorySpace {
    pub(crate) fn new(id: SpaceId, name: impl Into<String>, seed: u64) -> Self {
        // Salt the seed so spaces do not share a priority sequence.
        let seed = seed ^ u64::from(id.raw()).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            name: name.into(),
            reserved: VmaTree::with_seed(seed),
            committed: (!id.is_process()).then(|| VmaTree::with_seed(seed.rotate_left(17))),
            summary: MemorySummary::new(),
        }
    }

    /// Name given at registration
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reservation tree
    pub fn reserved(&self) -> &VmaTree<VirtualMemoryData> {
        &self.reserved
    }

    /// Commit tree, device spaces only
    pub fn committed(&self) -> Option<&VmaTree<RegionData>> {
        self.committed.as_ref()
    }

    /// Running totals
    pub fn summary(&self) -> &MemorySummary {
        &self.summary
    }

    /// Totals recomputed from the trees
    pub fn recompute_summary(&self) -> SummaryDiff {
        let mut diff = self.reserved.compute_summary();
        if let Some(committed) = &self.committed {
            diff += committed.compute_summary().commit_only();
        }
        diff
    }

    pub(crate) fn reserved_mut(&mut self) -> &mut VmaTree<VirtualMemoryData> {
        &mut self.reserved
    }

    pub(crate) fn committed_mut(&mut self) -> Option<&mut VmaTree<RegionData>> {
        self.committed.as_mut()
    }

    pub(crate) fn account(&mut self, diff: &SummaryDiff) {
        self.summary.apply(diff);
    }
}
