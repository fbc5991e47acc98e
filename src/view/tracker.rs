//! Lock-protected tracker front
//!
//! Callers report memory operations from any thread. With best-effort
//! recording enabled, a caller that finds the lock held drops its update
//! instead of waiting; the drop is counted so reports can say the totals
//! are approximate.

use std::fmt::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::report::{render_diff, Reporter, Scale};
use super::{Operation, SpaceId, SpaceSnapshot, ViewError, VirtualMemoryView};
use crate::summary::{MemorySummary, SummaryDiff};
use crate::tags::MemTagNameTable;
use crate::{TrackerConfig, TrackingLevel};

/// Totals of every space plus the drop count, taken under the lock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackerSnapshot {
    /// Per-space totals in id order
    pub spaces: Vec<SpaceSnapshot>,
    /// Updates lost to lock contention so far
    pub dropped_updates: u64,
    /// True when updates were lost
    pub approximate: bool,
}

impl TrackerSnapshot {
    /// Totals of `space`
    pub fn summary(&self, space: SpaceId) -> Option<&MemorySummary> {
        self.spaces
            .iter()
            .find(|snapshot| snapshot.id == space)
            .map(|snapshot| &snapshot.summary)
    }

    /// Per-space change from `baseline` to `self`
    ///
    /// Spaces present in only one snapshot compare against empty totals.
    pub fn compare(&self, baseline: &TrackerSnapshot) -> Vec<(SpaceId, SummaryDiff)> {
        let empty = MemorySummary::new();
        let mut ids: Vec<SpaceId> = self
            .spaces
            .iter()
            .chain(&baseline.spaces)
            .map(|snapshot| snapshot.id)
            .collect();
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .map(|id| {
                let now = self.summary(id).unwrap_or(&empty);
                let then = baseline.summary(id).unwrap_or(&empty);
                (id, now.compare(then))
            })
            .collect()
    }

    /// Print the change from `baseline` to `self`
    pub fn render_diff(
        &self,
        out: &mut dyn Write,
        baseline: &TrackerSnapshot,
        tags: &MemTagNameTable,
        scale: Scale,
    ) -> fmt::Result {
        render_diff(out, self, baseline, tags, scale)
    }
}

/// Shared, synchronized front over a [`VirtualMemoryView`]
#[derive(Debug)]
pub struct MemoryTracker {
    view: Mutex<VirtualMemoryView>,
    level: TrackingLevel,
    best_effort: bool,
    dropped: AtomicU64,
}

impl MemoryTracker {
    /// Create a tracker for `config`
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            level: config.level,
            best_effort: config.best_effort,
            view: Mutex::new(VirtualMemoryView::new(config)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Tracking level in effect
    pub fn level(&self) -> TrackingLevel {
        self.level
    }

    /// Register a memory space; always waits for the lock
    pub fn register_space(&self, name: &str) -> Result<SpaceId, ViewError> {
        self.view.lock().register_space(name)
    }

    /// Record `op`
    ///
    /// With tracking off nothing happens and an empty diff is returned. In
    /// best-effort mode a held lock drops the update and yields
    /// [`ViewError::LockContention`].
    pub fn record(&self, op: &Operation) -> Result<SummaryDiff, ViewError> {
        if self.level == TrackingLevel::Off {
            return Ok(SummaryDiff::new());
        }
        if self.best_effort {
            match self.view.try_lock() {
                Some(mut view) => view.apply(op),
                None => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::trace!(%op, dropped, "tracker busy, update dropped");
                    Err(ViewError::LockContention)
                }
            }
        } else {
            self.view.lock().apply(op)
        }
    }

    /// Updates dropped so far
    pub fn dropped_updates(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Copy of all totals
    pub fn snapshot(&self) -> TrackerSnapshot {
        let spaces = self.view.lock().snapshot();
        let dropped_updates = self.dropped_updates();
        TrackerSnapshot {
            spaces,
            dropped_updates,
            approximate: dropped_updates > 0,
        }
    }

    /// Run `f` on the view with the lock held
    pub fn with_view<R>(&self, f: impl FnOnce(&VirtualMemoryView) -> R) -> R {
        let view = self.view.lock();
        f(&*view)
    }

    /// Write a summary, or a full region listing when `detail` is set
    pub fn report(
        &self,
        out: &mut dyn Write,
        tags: &MemTagNameTable,
        scale: Scale,
        detail: bool,
    ) -> fmt::Result {
        let dropped = self.dropped_updates();
        let view = self.view.lock();
        let reporter = Reporter::new(&*view, tags, scale).with_dropped_updates(dropped);
        if detail {
            reporter.detail(out)
        } else {
            reporter.summary(out)
        }
    }

    /// Consume the tracker and return the view
    pub fn into_view(self) -> VirtualMemoryView {
        self.view.into_inner()
    }
}
