//! Metadata attached to process-space regions

use super::space::SpaceId;
use crate::stack::StackIndex;
use crate::tags::MemTag;
use crate::vma::RegionMetadata;
use crate::Address;

/// Link from a process range to the space backing it
///
/// The offset is stored relative to the address (`offset - address`,
/// wrapping), so two adjacent ranges mapped onto adjacent offsets carry
/// identical mappings and merge into one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mapping {
    /// Backing space
    pub space: SpaceId,
    delta: usize,
}

impl Mapping {
    /// Mapping of the range starting at `base` onto `offset` in `space`
    pub fn new(space: SpaceId, base: Address, offset: Address) -> Self {
        Self {
            space,
            delta: offset.wrapping_sub(base),
        }
    }

    /// Offset in the backing space that `addr` maps to
    pub fn offset_of(&self, addr: Address) -> Address {
        addr.wrapping_add(self.delta)
    }
}

/// Metadata of a reserved process range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct VirtualMemoryData {
    /// Call site of the last operation on the range
    pub stack: StackIndex,
    /// Accounting tag
    pub tag: MemTag,
    /// Backing space, for mapped ranges
    pub mapping: Option<Mapping>,
}

impl VirtualMemoryData {
    /// Metadata of an unmapped range
    pub fn new(stack: StackIndex, tag: MemTag) -> Self {
        Self {
            stack,
            tag,
            mapping: None,
        }
    }

    /// Metadata of a range backed by another space
    pub fn mapped(stack: StackIndex, tag: MemTag, mapping: Mapping) -> Self {
        Self {
            stack,
            tag,
            mapping: Some(mapping),
        }
    }
}

impl RegionMetadata for VirtualMemoryData {
    fn empty() -> Self {
        Self::default()
    }

    fn tag(&self) -> MemTag {
        self.tag
    }

    fn with_tag(&self, tag: MemTag) -> Self {
        Self { tag, ..*self }
    }

    fn equivalent(&self, other: &Self) -> bool {
        self == other
    }

    /// Commits and uncommits keep the tag and the mapping of the
    /// reservation they land in.
    fn inherit(&self, existing: &Self) -> Self {
        Self {
            stack: self.stack,
            tag: existing.tag,
            mapping: existing.mapping,
        }
    }
}
