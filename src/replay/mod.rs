//! Operation traces
//!
//! A trace is a text file with one operation per line. Spaces and tags are
//! referred to by name; numbers are decimal or `0x` hex; trailing numbers
//! on stack-carrying operations are the call-stack frames.
//!
//! ```text
//! # comment
//! space    gpu
//! reserve  process 0x10000 0x4000 heap 0x4010 0x4200
//! commit   process 0x10000 0x1000 heap
//! uncommit process 0x10000 0x1000
//! map      gpu 0x80000 0x2000 0x0 textures
//! unmap    gpu 0x80000 0x2000
//! tag      process 0x10000 0x1000 code
//! release  process 0x10000 0x4000
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

use crate::stack::NativeCallStack;
use crate::tags::MemTagNameTable;
use crate::view::{MemoryTracker, Operation, SpaceId, TrackerSnapshot, ViewError, VirtualMemoryView};
use crate::{Address, TrackerConfig};

/// One parsed trace line, names unresolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    /// Register a memory space
    Space {
        /// Space name
        name: String,
    },
    /// Reserve a range
    Reserve {
        /// Space name
        space: String,
        /// Start of the range
        addr: Address,
        /// Length in bytes
        size: usize,
        /// Tag name
        tag: String,
        /// Call-stack frames
        frames: Vec<Address>,
    },
    /// Commit a range
    Commit {
        /// Space name
        space: String,
        /// Start of the range
        addr: Address,
        /// Length in bytes
        size: usize,
        /// Tag name
        tag: String,
        /// Call-stack frames
        frames: Vec<Address>,
    },
    /// Uncommit a range
    Uncommit {
        /// Space name
        space: String,
        /// Start of the range
        addr: Address,
        /// Length in bytes
        size: usize,
        /// Call-stack frames
        frames: Vec<Address>,
    },
    /// Release a range
    Release {
        /// Space name
        space: String,
        /// Start of the range
        addr: Address,
        /// Length in bytes
        size: usize,
    },
    /// Map a process range onto a space
    Map {
        /// Backing space name
        space: String,
        /// Start of the process range
        base: Address,
        /// Length in bytes
        size: usize,
        /// Start of the backing range
        offset: Address,
        /// Tag name
        tag: String,
        /// Call-stack frames
        frames: Vec<Address>,
    },
    /// Remove a mapping
    Unmap {
        /// Backing space name
        space: String,
        /// Start of the process range
        base: Address,
        /// Length in bytes
        size: usize,
    },
    /// Re-tag a range
    Tag {
        /// Space name
        space: String,
        /// Start of the range
        addr: Address,
        /// Length in bytes
        size: usize,
        /// New tag name
        tag: String,
    },
}

fn parse_number(field: &str) -> Result<usize> {
    let cleaned = field.replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.with_context(|| format!("invalid number '{}'", field))
}

struct Fields<'a> {
    inner: std::str::SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn word(&mut self, what: &str) -> Result<&'a str> {
        self.inner
            .next()
            .ok_or_else(|| anyhow!("missing {}", what))
    }

    fn number(&mut self, what: &str) -> Result<usize> {
        let field = self.word(what)?;
        parse_number(field).with_context(|| format!("bad {}", what))
    }

    fn frames(&mut self) -> Result<Vec<Address>> {
        self.inner.by_ref().map(parse_number).collect()
    }

    fn finish(mut self) -> Result<()> {
        match self.inner.next() {
            Some(extra) => bail!("unexpected trailing field '{}'", extra),
            None => Ok(()),
        }
    }
}

/// Parse one line; `None` for blank lines and comments
pub fn parse_line(line: &str) -> Result<Option<TraceRecord>> {
    let line = match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let mut fields = Fields {
        inner: line.split_whitespace(),
    };
    let keyword = match fields.inner.next() {
        Some(keyword) => keyword,
        None => return Ok(None),
    };

    let record = match keyword {
        "space" => {
            let name = fields.word("space name")?.to_string();
            fields.finish()?;
            TraceRecord::Space { name }
        }
        "reserve" | "commit" => {
            let space = fields.word("space")?.to_string();
            let addr = fields.number("address")?;
            let size = fields.number("size")?;
            let tag = fields.word("tag")?.to_string();
            let frames = fields.frames()?;
            if keyword == "reserve" {
                TraceRecord::Reserve { space, addr, size, tag, frames }
            } else {
                TraceRecord::Commit { space, addr, size, tag, frames }
            }
        }
        "uncommit" => {
            let space = fields.word("space")?.to_string();
            let addr = fields.number("address")?;
            let size = fields.number("size")?;
            let frames = fields.frames()?;
            TraceRecord::Uncommit { space, addr, size, frames }
        }
        "release" | "unmap" => {
            let space = fields.word("space")?.to_string();
            let addr = fields.number("address")?;
            let size = fields.number("size")?;
            fields.finish()?;
            if keyword == "release" {
                TraceRecord::Release { space, addr, size }
            } else {
                TraceRecord::Unmap { space, base: addr, size }
            }
        }
        "map" => {
            let space = fields.word("space")?.to_string();
            let base = fields.number("address")?;
            let size = fields.number("size")?;
            let offset = fields.number("offset")?;
            let tag = fields.word("tag")?.to_string();
            let frames = fields.frames()?;
            TraceRecord::Map { space, base, size, offset, tag, frames }
        }
        "tag" => {
            let space = fields.word("space")?.to_string();
            let addr = fields.number("address")?;
            let size = fields.number("size")?;
            let tag = fields.word("tag")?.to_string();
            fields.finish()?;
            TraceRecord::Tag { space, addr, size, tag }
        }
        other => bail!("unknown operation '{}'", other),
    };
    Ok(Some(record))
}

/// Parse a whole trace
pub fn parse_trace(text: &str) -> Result<Vec<TraceRecord>> {
    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if let Some(record) =
            parse_line(line).with_context(|| format!("trace line {}", line_no + 1))?
        {
            records.push(record);
        }
    }
    Ok(records)
}

/// Read and parse the trace at `path`
pub fn read_trace(path: &Path) -> Result<Vec<TraceRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read trace {}", path.display()))?;
    parse_trace(&text).with_context(|| format!("failed to parse trace {}", path.display()))
}

/// Counters from a replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records consumed
    pub records: usize,
    /// Operations the tracker accepted
    pub operations: usize,
    /// Spaces registered
    pub spaces: usize,
    /// Operations dropped by best-effort recording
    pub dropped: usize,
}

/// Feeds trace records into a [`MemoryTracker`]
#[derive(Debug)]
pub struct Replayer {
    tracker: MemoryTracker,
    tags: MemTagNameTable,
    spaces: HashMap<String, SpaceId>,
    stats: ReplayStats,
}

impl Replayer {
    /// Replayer over a fresh tracker
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_tags(config, MemTagNameTable::new())
    }

    /// Replayer resolving tag names through `tags`
    ///
    /// Sharing one table between replays keeps tag numbers comparable.
    pub fn with_tags(config: TrackerConfig, tags: MemTagNameTable) -> Self {
        let mut spaces = HashMap::new();
        spaces.insert(VirtualMemoryView::PROCESS_NAME.to_string(), SpaceId::PROCESS);
        Self {
            tracker: MemoryTracker::new(config),
            tags,
            spaces,
            stats: ReplayStats::default(),
        }
    }

    fn space(&self, name: &str) -> Result<SpaceId> {
        self.spaces
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("unknown space '{}'", name))
    }

    fn operation(&mut self, record: &TraceRecord) -> Result<Option<Operation>> {
        let op = match record {
            TraceRecord::Space { name } => {
                if self.spaces.contains_key(name) {
                    bail!("space '{}' registered twice", name);
                }
                let id = self.tracker.register_space(name)?;
                self.spaces.insert(name.clone(), id);
                self.stats.spaces += 1;
                return Ok(None);
            }
            TraceRecord::Reserve { space, addr, size, tag, frames } => Operation::Reserve {
                space: self.space(space)?,
                addr: *addr,
                size: *size,
                tag: self.tags.make_tag(tag)?,
                stack: NativeCallStack::new(frames.clone()),
            },
            TraceRecord::Commit { space, addr, size, tag, frames } => Operation::Commit {
                space: self.space(space)?,
                addr: *addr,
                size: *size,
                tag: self.tags.make_tag(tag)?,
                stack: NativeCallStack::new(frames.clone()),
            },
            TraceRecord::Uncommit { space, addr, size, frames } => Operation::Uncommit {
                space: self.space(space)?,
                addr: *addr,
                size: *size,
                stack: NativeCallStack::new(frames.clone()),
            },
            TraceRecord::Release { space, addr, size } => Operation::Release {
                space: self.space(space)?,
                addr: *addr,
                size: *size,
            },
            TraceRecord::Map { space, base, size, offset, tag, frames } => Operation::Map {
                space: self.space(space)?,
                base: *base,
                size: *size,
                offset: *offset,
                tag: self.tags.make_tag(tag)?,
                stack: NativeCallStack::new(frames.clone()),
            },
            TraceRecord::Unmap { space, base, size } => Operation::Unmap {
                space: self.space(space)?,
                base: *base,
                size: *size,
            },
            TraceRecord::Tag { space, addr, size, tag } => Operation::SetTag {
                space: self.space(space)?,
                addr: *addr,
                size: *size,
                tag: self.tags.make_tag(tag)?,
            },
        };
        Ok(Some(op))
    }

    /// Apply one record
    pub fn apply(&mut self, record: &TraceRecord) -> Result<()> {
        self.stats.records += 1;
        let op = match self.operation(record)? {
            Some(op) => op,
            None => return Ok(()),
        };
        match self.tracker.record(&op) {
            Ok(_) => self.stats.operations += 1,
            Err(ViewError::LockContention) => self.stats.dropped += 1,
            Err(err) => return Err(err).with_context(|| format!("cannot apply {}", op)),
        }
        Ok(())
    }

    /// Apply every record in order, stopping at the first failure
    pub fn run(&mut self, records: &[TraceRecord]) -> Result<ReplayStats> {
        for (idx, record) in records.iter().enumerate() {
            self.apply(record)
                .with_context(|| format!("trace record {}", idx + 1))?;
        }
        tracing::debug!(
            records = self.stats.records,
            operations = self.stats.operations,
            dropped = self.stats.dropped,
            "trace replayed"
        );
        Ok(self.stats)
    }

    /// Counters so far
    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    /// The tracker being fed
    pub fn tracker(&self) -> &MemoryTracker {
        &self.tracker
    }

    /// Tag names seen so far
    pub fn tags(&self) -> &MemTagNameTable {
        &self.tags
    }

    /// Space registered under `name`
    pub fn space_id(&self, name: &str) -> Option<SpaceId> {
        self.spaces.get(name).copied()
    }

    /// Totals of every space
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.tracker.snapshot()
    }

    /// Tracker and tag table
    pub fn into_parts(self) -> (MemoryTracker, MemTagNameTable) {
        (self.tracker, self.tags)
    }
}
