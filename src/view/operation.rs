//! Tracked memory operations as values

use std::fmt;

use super::space::SpaceId;
use crate::stack::NativeCallStack;
use crate::tags::MemTag;
use crate::Address;

/// One memory operation reported by the caller after performing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Address range claimed
    Reserve {
        /// Target space
        space: SpaceId,
        /// Start of the range
        addr: Address,
        /// Length in bytes
        size: usize,
        /// Accounting tag
        tag: MemTag,
        /// Call site
        stack: NativeCallStack,
    },
    /// Range backed by memory
    Commit {
        /// Target space
        space: SpaceId,
        /// Start of the range
        addr: Address,
        /// Length in bytes
        size: usize,
        /// Tag for memory not yet reserved
        tag: MemTag,
        /// Call site
        stack: NativeCallStack,
    },
    /// Backing dropped, reservation kept
    Uncommit {
        /// Target space
        space: SpaceId,
        /// Start of the range
        addr: Address,
        /// Length in bytes
        size: usize,
        /// Call site
        stack: NativeCallStack,
    },
    /// Range returned
    Release {
        /// Target space
        space: SpaceId,
        /// Start of the range
        addr: Address,
        /// Length in bytes
        size: usize,
    },
    /// Process range backed by `offset..offset + size` of `space`
    Map {
        /// Backing space
        space: SpaceId,
        /// Start of the process range
        base: Address,
        /// Length in bytes
        size: usize,
        /// Start of the backing range
        offset: Address,
        /// Accounting tag
        tag: MemTag,
        /// Call site
        stack: NativeCallStack,
    },
    /// Mapping removed
    Unmap {
        /// Backing space
        space: SpaceId,
        /// Start of the process range
        base: Address,
        /// Length in bytes
        size: usize,
    },
    /// Range re-tagged in place
    SetTag {
        /// Target space
        space: SpaceId,
        /// Start of the range
        addr: Address,
        /// Length in bytes
        size: usize,
        /// New tag
        tag: MemTag,
    },
}

impl Operation {
    /// Space the operation names
    pub fn space(&self) -> SpaceId {
        match self {
            Operation::Reserve { space, .. }
            | Operation::Commit { space, .. }
            | Operation::Uncommit { space, .. }
            | Operation::Release { space, .. }
            | Operation::Map { space, .. }
            | Operation::Unmap { space, .. }
            | Operation::SetTag { space, .. } => *space,
        }
    }

    /// Short lower-case name
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Reserve { .. } => "reserve",
            Operation::Commit { .. } => "commit",
            Operation::Uncommit { .. } => "uncommit",
            Operation::Release { .. } => "release",
            Operation::Map { .. } => "map",
            Operation::Unmap { .. } => "unmap",
            Operation::SetTag { .. } => "tag",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Reserve { space, addr, size, tag, .. }
            | Operation::Commit { space, addr, size, tag, .. }
            | Operation::SetTag { space, addr, size, tag } => {
                write!(f, "{} {} [{:#x}, +{:#x}) {}", self.kind(), space, addr, size, tag)
            }
            Operation::Uncommit { space, addr, size, .. } | Operation::Release { space, addr, size } => {
                write!(f, "{} {} [{:#x}, +{:#x})", self.kind(), space, addr, size)
            }
            Operation::Map { space, base, size, offset, tag, .. } => write!(
                f,
                "map [{:#x}, +{:#x}) onto {} at {:#x} {}",
                base, size, space, offset, tag
            ),
            Operation::Unmap { space, base, size } => {
                write!(f, "unmap [{:#x}, +{:#x}) from {}", base, size, space)
            }
        }
    }
}
