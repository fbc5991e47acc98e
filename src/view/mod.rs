//! Space-aware view over the interval engine
//!
//! A [`VirtualMemoryView`] owns one set of trees per memory space. Space 0
//! is the process's own address space; further spaces stand for memory
//! that lives elsewhere (a device, a file) and can be mapped into the
//! process. Each operation pushes its call stack into shared storage,
//! builds the region metadata and forwards the range to the right tree.
//! The returned [`SummaryDiff`] is also applied to the space's running
//! [`MemorySummary`].
//!
//! The view itself is not synchronized; [`MemoryTracker`] wraps it in a
//! lock for use from several threads.

mod metadata;
mod operation;
mod report;
mod space;
mod tracker;

pub use metadata::{Mapping, VirtualMemoryData};
pub use operation::Operation;
pub use report::{CommittedRegion, RegionReport, ReservedRegion, Reporter, Scale};
pub use space::{MemorySpace, SpaceId};
pub use tracker::{MemoryTracker, TrackerSnapshot};

use thiserror::Error;

use crate::stack::{NativeCallStack, NativeCallStackStorage, StackIndex, StackStoreError};
use crate::summary::{MemorySummary, SummaryDiff};
use crate::tags::MemTag;
use crate::vma::{Interval, RegionData, State, TagMode, VmaError, VmaTree};
use crate::{Address, TrackerConfig};

/// Errors from the view layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ViewError {
    /// Range rejected or tree allocation failed.
    #[error(transparent)]
    Vma(#[from] VmaError),

    /// Call stack could not be stored.
    #[error(transparent)]
    Stack(#[from] StackStoreError),

    /// No space is registered under this id.
    #[error("unknown memory space {0}")]
    UnknownSpace(SpaceId),

    /// The process space was named as the backing of a mapping.
    #[error("the process space cannot be mapped into itself")]
    SelfMapping,

    /// Every space id is in use.
    #[error("cannot register space '{0}': too many memory spaces")]
    TooManySpaces(String),

    /// Best-effort recording dropped the update because the tracker was busy.
    #[error("update dropped: tracker lock is contended")]
    LockContention,
}

/// Totals of one space at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpaceSnapshot {
    /// Space id
    pub id: SpaceId,
    /// Registered name
    pub name: String,
    /// Running totals
    pub summary: MemorySummary,
}

/// The process region containing an address
#[derive(Debug, Clone)]
pub struct RegionLookup<'a> {
    /// Constant run the address falls in
    pub interval: Interval<VirtualMemoryData>,
    /// Call site recorded for the run
    pub stack: &'a NativeCallStack,
}

/// Memory spaces with their trees and totals
#[derive(Debug)]
pub struct VirtualMemoryView {
    spaces: Vec<MemorySpace>,
    stacks: NativeCallStackStorage,
    seed: u64,
}

impl VirtualMemoryView {
    /// Name of [`SpaceId::PROCESS`]
    pub const PROCESS_NAME: &'static str = "process";

    /// Create a view holding only the process space
    pub fn new(config: TrackerConfig) -> Self {
        let slots = config.stack_chunk_slots;
        let clamped = slots.clamp(1, u16::MAX as usize + 1);
        if clamped != slots {
            tracing::warn!(requested = slots, used = clamped, "stack chunk size out of range");
        }
        Self {
            spaces: vec![MemorySpace::new(
                SpaceId::PROCESS,
                Self::PROCESS_NAME,
                config.treap_seed,
            )],
            stacks: NativeCallStackStorage::new(config.is_detailed(), clamped),
            seed: config.treap_seed,
        }
    }

    /// Register a new memory space
    ///
    /// Ids increase monotonically; names need not be unique.
    pub fn register_space(&mut self, name: &str) -> Result<SpaceId, ViewError> {
        let raw = u32::try_from(self.spaces.len())
            .map_err(|_| ViewError::TooManySpaces(name.to_string()))?;
        let id = SpaceId::new(raw);
        self.spaces.push(MemorySpace::new(id, name, self.seed));
        tracing::debug!(space = %id, name, "registered memory space");
        Ok(id)
    }

    /// Registered space
    pub fn space(&self, id: SpaceId) -> Result<&MemorySpace, ViewError> {
        self.spaces
            .get(id.raw() as usize)
            .ok_or(ViewError::UnknownSpace(id))
    }

    fn space_mut(&mut self, id: SpaceId) -> Result<&mut MemorySpace, ViewError> {
        self.spaces
            .get_mut(id.raw() as usize)
            .ok_or(ViewError::UnknownSpace(id))
    }

    fn push_stack(&mut self, stack: &NativeCallStack) -> Result<StackIndex, ViewError> {
        Ok(self.stacks.push(stack)?)
    }

    /// Record `[addr, addr + size)` reserved in `space`
    pub fn reserve(
        &mut self,
        space: SpaceId,
        addr: Address,
        size: usize,
        tag: MemTag,
        stack: &NativeCallStack,
    ) -> Result<SummaryDiff, ViewError> {
        self.space(space)?;
        let index = self.push_stack(stack)?;
        let target = self.space_mut(space)?;
        let diff = target
            .reserved_mut()
            .reserve_mapping(addr, size, VirtualMemoryData::new(index, tag))?;
        target.account(&diff);
        Ok(diff)
    }

    /// Record `[addr, addr + size)` committed in `space`
    ///
    /// In the process space the commit lands inside the reservation and
    /// keeps its tag and mapping; `tag` applies only to memory that was not
    /// reserved. Device spaces record commits in their commit tree.
    pub fn commit(
        &mut self,
        space: SpaceId,
        addr: Address,
        size: usize,
        tag: MemTag,
        stack: &NativeCallStack,
    ) -> Result<SummaryDiff, ViewError> {
        self.space(space)?;
        let index = self.push_stack(stack)?;
        let target = self.space_mut(space)?;
        let diff = match target.committed_mut() {
            Some(committed) => committed
                .commit_mapping(addr, size, RegionData::new(index, tag), TagMode::Replace)?
                .commit_only(),
            None => target.reserved_mut().commit_mapping(
                addr,
                size,
                VirtualMemoryData::new(index, tag),
                TagMode::Inherit,
            )?,
        };
        target.account(&diff);
        Ok(diff)
    }

    /// Record the committed parts of `[addr, addr + size)` as no longer backed
    pub fn uncommit(
        &mut self,
        space: SpaceId,
        addr: Address,
        size: usize,
        stack: &NativeCallStack,
    ) -> Result<SummaryDiff, ViewError> {
        // Released device commits keep no metadata, so no stack is stored.
        self.space(space)?;
        let index = if space.is_process() {
            self.push_stack(stack)?
        } else {
            StackIndex::default()
        };
        let target = self.space_mut(space)?;
        let diff = match target.committed_mut() {
            Some(committed) => committed.release_mapping(addr, size)?.commit_only(),
            None => target.reserved_mut().uncommit_mapping(
                addr,
                size,
                VirtualMemoryData::new(index, MemTag::NONE),
            )?,
        };
        target.account(&diff);
        Ok(diff)
    }

    /// Record `[addr, addr + size)` released in `space`
    ///
    /// For device spaces this drops both reservations and commits.
    pub fn release(
        &mut self,
        space: SpaceId,
        addr: Address,
        size: usize,
    ) -> Result<SummaryDiff, ViewError> {
        let target = self.space_mut(space)?;
        let mut diff = target.reserved_mut().release_mapping(addr, size)?;
        if let Some(committed) = target.committed_mut() {
            diff += committed.release_mapping(addr, size)?.commit_only();
        }
        target.account(&diff);
        Ok(diff)
    }

    /// Record process range `[base, base + size)` as reserved and backed by
    /// `[offset, offset + size)` of `space`
    pub fn map(
        &mut self,
        space: SpaceId,
        base: Address,
        size: usize,
        offset: Address,
        tag: MemTag,
        stack: &NativeCallStack,
    ) -> Result<SummaryDiff, ViewError> {
        if space.is_process() {
            return Err(ViewError::SelfMapping);
        }
        self.space(space)?;
        if offset.checked_add(size).is_none() {
            return Err(VmaError::InvalidRange { from: offset, size }.into());
        }
        let index = self.push_stack(stack)?;
        let data = VirtualMemoryData::mapped(index, tag, Mapping::new(space, base, offset));
        let process = self.space_mut(SpaceId::PROCESS)?;
        let diff = process.reserved_mut().reserve_mapping(base, size, data)?;
        process.account(&diff);
        Ok(diff)
    }

    /// Release the parts of process range `[base, base + size)` that are
    /// mapped onto `space`
    pub fn unmap(
        &mut self,
        space: SpaceId,
        base: Address,
        size: usize,
    ) -> Result<SummaryDiff, ViewError> {
        if space.is_process() {
            return Err(ViewError::SelfMapping);
        }
        self.space(space)?;
        let end = base
            .checked_add(size)
            .filter(|_| size > 0)
            .ok_or(VmaError::InvalidRange { from: base, size })?;

        let process = self.space_mut(SpaceId::PROCESS)?;
        let mapped: Vec<(Address, usize)> = process
            .reserved()
            .intervals_in(base, end)
            .filter(|run| run.data.mapping.map(|m| m.space) == Some(space))
            .map(|run| (run.start, run.size()))
            .collect();

        let mut diff = SummaryDiff::new();
        for (start, len) in mapped {
            diff += process.reserved_mut().release_mapping(start, len)?;
        }
        process.account(&diff);
        Ok(diff)
    }

    /// Re-tag the tracked parts of `[addr, addr + size)` in `space`
    pub fn set_tag(
        &mut self,
        space: SpaceId,
        addr: Address,
        size: usize,
        tag: MemTag,
    ) -> Result<SummaryDiff, ViewError> {
        let target = self.space_mut(space)?;
        let mut diff = target.reserved_mut().set_tag(addr, size, tag)?;
        if let Some(committed) = target.committed_mut() {
            diff += committed.set_tag(addr, size, tag)?.commit_only();
        }
        target.account(&diff);
        Ok(diff)
    }

    /// Apply a recorded operation
    pub fn apply(&mut self, op: &Operation) -> Result<SummaryDiff, ViewError> {
        tracing::trace!(%op, "apply");
        match op {
            Operation::Reserve { space, addr, size, tag, stack } => {
                self.reserve(*space, *addr, *size, *tag, stack)
            }
            Operation::Commit { space, addr, size, tag, stack } => {
                self.commit(*space, *addr, *size, *tag, stack)
            }
            Operation::Uncommit { space, addr, size, stack } => {
                self.uncommit(*space, *addr, *size, stack)
            }
            Operation::Release { space, addr, size } => self.release(*space, *addr, *size),
            Operation::Map { space, base, size, offset, tag, stack } => {
                self.map(*space, *base, *size, *offset, *tag, stack)
            }
            Operation::Unmap { space, base, size } => self.unmap(*space, *base, *size),
            Operation::SetTag { space, addr, size, tag } => {
                self.set_tag(*space, *addr, *size, *tag)
            }
        }
    }

    /// Running totals of `space`
    pub fn summary(&self, space: SpaceId) -> Result<&MemorySummary, ViewError> {
        Ok(self.space(space)?.summary())
    }

    /// Totals of `space` recomputed from its trees
    pub fn recompute_summary(&self, space: SpaceId) -> Result<SummaryDiff, ViewError> {
        Ok(self.space(space)?.recompute_summary())
    }

    /// Process region containing `addr`, with its call stack
    pub fn find_region(&self, addr: Address) -> Option<RegionLookup<'_>> {
        let process = self.spaces.first()?;
        let interval = process.reserved().find_enclosing(addr)?;
        let stack = self.stacks.get(interval.data.stack);
        Some(RegionLookup { interval, stack })
    }

    /// State of `addr` in the process space
    pub fn state_at(&self, addr: Address) -> State {
        self.spaces
            .first()
            .map(|process| process.reserved().state_at(addr).state)
            .unwrap_or(State::Released)
    }

    /// Reservation tree of `space`
    pub fn reserved_tree(&self, space: SpaceId) -> Result<&VmaTree<VirtualMemoryData>, ViewError> {
        Ok(self.space(space)?.reserved())
    }

    /// Commit tree of `space`; `None` for the process space
    pub fn committed_tree(&self, space: SpaceId) -> Result<Option<&VmaTree<RegionData>>, ViewError> {
        Ok(self.space(space)?.committed())
    }

    /// All spaces in id order
    pub fn spaces(&self) -> impl Iterator<Item = (SpaceId, &MemorySpace)> + '_ {
        self.spaces
            .iter()
            .enumerate()
            .map(|(i, space)| (SpaceId::new(i as u32), space))
    }

    /// Number of registered spaces, the process included
    pub fn space_count(&self) -> usize {
        self.spaces.len()
    }

    /// Call-stack storage
    pub fn stacks(&self) -> &NativeCallStackStorage {
        &self.stacks
    }

    /// Copy of every space's totals
    pub fn snapshot(&self) -> Vec<SpaceSnapshot> {
        self.spaces()
            .map(|(id, space)| SpaceSnapshot {
                id,
                name: space.name().to_string(),
                summary: space.summary().clone(),
            })
            .collect()
    }
}
