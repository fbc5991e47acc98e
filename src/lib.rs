//! # Virtual memory range tracking
//!
//! Records, for every byte of an address space, whether it is released,
//! reserved or committed, plus who touched it last (call stack) and what
//! it is for (category tag). Answers point and range queries without
//! scanning history and keeps per-tag reserved/committed totals.
//!
//! ## Layers
//!
//! 1. **Treap**: randomized ordered map keyed by address
//! 2. **VMA tree**: boundary points over the treap; every mutation returns
//!    the exact change in reserved/committed bytes per tag
//! 3. **Stack storage & tags**: compact indices for call stacks and
//!    category names
//! 4. **View**: groups trees by memory space (the process plus devices),
//!    handles mappings between spaces, and reports
//!
//! ## Usage Example
//!
//! ```
//! use vmtrack::{MemTag, NativeCallStack, SpaceId, TrackerConfig, VirtualMemoryView};
//!
//! let mut view = VirtualMemoryView::new(TrackerConfig::detail());
//! let stack = NativeCallStack::new(vec![0x4010, 0x4200]);
//! view.reserve(SpaceId::PROCESS, 0x10_000, 0x4000, MemTag::new(1), &stack)?;
//! view.commit(SpaceId::PROCESS, 0x10_000, 0x1000, MemTag::new(1), &stack)?;
//!
//! let counters = view.summary(SpaceId::PROCESS)?.by_tag(MemTag::new(1));
//! assert_eq!((counters.reserved, counters.committed), (0x4000, 0x1000));
//! # Ok::<(), vmtrack::ViewError>(())
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod treap;   // Randomized ordered map
pub mod vma;     // Address-interval engine
pub mod summary; // Per-tag byte accounting
pub mod stack;   // Call-stack storage
pub mod tags;    // Category tags
pub mod view;    // Space-aware view, reporting, locking front
pub mod replay;  // Operation traces

pub use stack::{NativeCallStack, NativeCallStackStorage, StackIndex};
pub use summary::{MemorySummary, SingleDiff, SummaryDiff, TagCounters};
pub use tags::{MemTag, MemTagNameTable};
pub use view::{
    MemoryTracker, Operation, Reporter, Scale, SpaceId, TrackerSnapshot, ViewError,
    VirtualMemoryView,
};
pub use vma::{RegionData, RegionMetadata, State, TagMode, VmaError, VmaTree};

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A byte address in some memory space
pub type Address = usize;

/// How much the tracker records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackingLevel {
    /// Nothing is recorded
    Off,
    /// Ranges and tags, no call stacks
    Summary,
    /// Ranges, tags and deduplicated call stacks
    #[default]
    Detail,
}

impl FromStr for TrackingLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(TrackingLevel::Off),
            "summary" => Ok(TrackingLevel::Summary),
            "detail" => Ok(TrackingLevel::Detail),
            _ => Err(ConfigError::UnknownLevel(s.to_string())),
        }
    }
}

impl fmt::Display for TrackingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrackingLevel::Off => "off",
            TrackingLevel::Summary => "summary",
            TrackingLevel::Detail => "detail",
        })
    }
}

/// Configuration of a tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// What gets recorded
    pub level: TrackingLevel,

    /// Seed for treap priorities; fixed seeds give reproducible tree shapes
    pub treap_seed: u64,

    /// Drop updates instead of waiting when the tracker lock is held
    pub best_effort: bool,

    /// Slots per call-stack storage chunk
    pub stack_chunk_slots: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::detail()
    }
}

impl TrackerConfig {
    /// Record ranges, tags and call stacks
    pub fn detail() -> Self {
        Self {
            level: TrackingLevel::Detail,
            treap_seed: treap::Treap::<Address, ()>::DEFAULT_SEED,
            best_effort: false,
            stack_chunk_slots: NativeCallStackStorage::DEFAULT_CHUNK_SLOTS,
        }
    }

    /// Record ranges and tags only
    pub fn summary() -> Self {
        Self {
            level: TrackingLevel::Summary,
            ..Self::detail()
        }
    }

    /// Record nothing
    pub fn off() -> Self {
        Self {
            level: TrackingLevel::Off,
            ..Self::detail()
        }
    }

    /// Configuration for `level`
    pub fn for_level(level: TrackingLevel) -> Self {
        Self {
            level,
            ..Self::detail()
        }
    }

    /// Use `seed` for treap priorities
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.treap_seed = seed;
        self
    }

    /// Enable or disable best-effort recording
    pub fn with_best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }

    /// Use `slots` slots per call-stack chunk
    pub fn with_stack_chunk_slots(mut self, slots: usize) -> Result<Self, ConfigError> {
        if slots == 0 || slots > u16::MAX as usize + 1 {
            return Err(ConfigError::InvalidChunkSlots(slots));
        }
        self.stack_chunk_slots = slots;
        Ok(self)
    }

    /// True unless the level is [`TrackingLevel::Off`]
    pub fn is_enabled(&self) -> bool {
        self.level != TrackingLevel::Off
    }

    /// True when call stacks are retained
    pub fn is_detailed(&self) -> bool {
        self.level == TrackingLevel::Detail
    }
}

/// Invalid configuration values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Unrecognised tracking level name
    #[error("unknown tracking level '{0}' (expected off, summary or detail)")]
    UnknownLevel(String),

    /// Unrecognised report scale
    #[error("unknown scale '{0}' (expected b, k, m or g)")]
    UnknownScale(String),

    /// Chunk size outside 1..=65536
    #[error("invalid stack chunk size {0}: must be between 1 and 65536")]
    InvalidChunkSlots(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!("off".parse::<TrackingLevel>().unwrap(), TrackingLevel::Off);
        assert_eq!("Summary".parse::<TrackingLevel>().unwrap(), TrackingLevel::Summary);
        assert_eq!("detail".parse::<TrackingLevel>().unwrap(), TrackingLevel::Detail);
        assert_eq!(
            "verbose".parse::<TrackingLevel>(),
            Err(ConfigError::UnknownLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_config_builders() {
        let config = TrackerConfig::summary().with_seed(7).with_best_effort(true);
        assert_eq!(config.level, TrackingLevel::Summary);
        assert_eq!(config.treap_seed, 7);
        assert!(config.best_effort);
        assert!(config.is_enabled());
        assert!(!config.is_detailed());
        assert!(!TrackerConfig::off().is_enabled());
    }

    #[test]
    fn test_chunk_slots_validation() {
        assert!(TrackerConfig::detail().with_stack_chunk_slots(0).is_err());
        assert!(TrackerConfig::detail().with_stack_chunk_slots(65_537).is_err());
        let config = TrackerConfig::detail().with_stack_chunk_slots(65_536).unwrap();
        assert_eq!(config.stack_chunk_slots, 65_536);
    }
}
