//! Region states and the metadata carried by each boundary point

use std::fmt;

use crate::stack::StackIndex;
use crate::tags::MemTag;
use crate::Address;

/// Lifecycle state of a byte range
///
/// Bit 0 marks Reserved, bit 1 marks Committed; committing keeps the
/// reserved bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    /// Not mapped
    Released = 0,
    /// Address space claimed, not backed
    Reserved = 1,
    /// Claimed and backed
    Committed = 3,
}

impl State {
    /// True for Reserved and Committed
    #[inline]
    pub fn is_reserved(self) -> bool {
        (self as u8) & (State::Reserved as u8) != 0
    }

    /// True for Committed only
    #[inline]
    pub fn is_committed(self) -> bool {
        self == State::Committed
    }

    /// Lower-case name
    pub fn as_str(self) -> &'static str {
        match self {
            State::Released => "released",
            State::Reserved => "reserved",
            State::Committed => "committed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached to the outgoing side of a boundary point
///
/// `equivalent` decides whether two neighbouring intervals in the same state
/// may be merged; `inherit` is the merge function applied when an operation
/// keeps attributes of the range it overwrites.
pub trait RegionMetadata: Clone + fmt::Debug {
    /// Metadata of released memory
    fn empty() -> Self;

    /// Accounting tag
    fn tag(&self) -> MemTag;

    /// Copy with the tag replaced
    fn with_tag(&self, tag: MemTag) -> Self;

    /// Merge predicate
    fn equivalent(&self, other: &Self) -> bool;

    /// Combine with the metadata already in effect on the range
    fn inherit(&self, existing: &Self) -> Self {
        self.with_tag(existing.tag())
    }
}

/// Default region metadata: who reserved it and under which tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RegionData {
    /// Call site of the operation
    pub stack: StackIndex,
    /// Accounting tag
    pub tag: MemTag,
}

impl RegionData {
    /// Build region metadata
    pub fn new(stack: StackIndex, tag: MemTag) -> Self {
        Self { stack, tag }
    }
}

impl RegionMetadata for RegionData {
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
        self.tag == other.tag && self.stack == other.stack
    }
}

/// State and metadata of one side of a boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalState<M> {
    /// Lifecycle state
    pub state: State,
    /// Attached metadata
    pub data: M,
}

impl<M: RegionMetadata> IntervalState<M> {
    /// Build an interval state
    pub fn new(state: State, data: M) -> Self {
        Self { state, data }
    }

    /// The implicit state outside all stored points
    pub fn released() -> Self {
        Self {
            state: State::Released,
            data: M::empty(),
        }
    }

    /// Same state and equivalent metadata
    pub fn equivalent(&self, other: &Self) -> bool {
        self.state == other.state && self.data.equivalent(&other.data)
    }
}

/// The change in state at a boundary point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalChange<M> {
    /// State of the interval ending at this point
    pub incoming: IntervalState<M>,
    /// State of the interval starting at this point
    pub outgoing: IntervalState<M>,
}

impl<M: RegionMetadata> IntervalChange<M> {
    /// A point that changes nothing and must not be stored
    pub fn is_noop(&self) -> bool {
        self.incoming.equivalent(&self.outgoing)
    }
}

/// A maximal run of constant state and metadata, `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval<M> {
    /// First byte
    pub start: Address,
    /// One past the last byte
    pub end: Address,
    /// Lifecycle state
    pub state: State,
    /// Attached metadata
    pub data: M,
}

impl<M> Interval<M> {
    /// Length in bytes
    pub fn size(&self) -> usize {
        self.end - self.start
    }

    /// True when `addr` lies inside
    pub fn contains(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.end
    }
}
