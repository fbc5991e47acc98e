//! Deduplicating call-stack storage
//!
//! Call stacks are large compared to the region records that reference
//! them, so each distinct stack is stored once and regions keep a compact
//! [`StackIndex`]. Storage is an array of fixed-size chunks; a stack is
//! identified by (chunk, slot), which packs into four bytes.
//!
//! Insertion hashes the stack to a slot and probes that slot in every
//! chunk in turn, taking the first identical or vacant one. When all
//! chunks are taken at that slot a new chunk is appended. Lookup cost is
//! therefore bounded by the chunk count, which stays small unless the
//! number of distinct stacks far exceeds the chunk size.

use std::fmt;

use bitvec::prelude::*;
use thiserror::Error;

use crate::Address;

/// A captured call stack: return addresses, innermost first
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NativeCallStack {
    frames: Vec<Address>,
}

static EMPTY_STACK: NativeCallStack = NativeCallStack { frames: Vec::new() };

impl NativeCallStack {
    /// Build a stack from its frames
    pub fn new(frames: impl Into<Vec<Address>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    /// The stack with no frames
    pub fn empty() -> Self {
        Self::default()
    }

    /// Frames, innermost first
    pub fn frames(&self) -> &[Address] {
        &self.frames
    }

    /// True when no frame was captured
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Content hash used to pick a storage slot
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for frame in &self.frames {
            hasher.update(&(*frame as u64).to_le_bytes());
        }
        let digest = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(word)
    }
}

impl fmt::Display for NativeCallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frames.is_empty() {
            return writeln!(f, "[no stack]");
        }
        for frame in &self.frames {
            writeln!(f, "[{:#018x}]", frame)?;
        }
        Ok(())
    }
}

/// Compact reference to a stored stack
///
/// Equality is structural on (chunk, slot); stacks are never compared by
/// content once stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackIndex {
    chunk: u16,
    slot: u16,
}

impl StackIndex {
    /// Build an index from its parts
    pub const fn new(chunk: u16, slot: u16) -> Self {
        Self { chunk, slot }
    }

    /// Chunk number
    pub const fn chunk(self) -> u16 {
        self.chunk
    }

    /// Slot within the chunk
    pub const fn slot(self) -> u16 {
        self.slot
    }
}

/// Errors from call-stack storage
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StackStoreError {
    /// All chunk numbers are taken.
    #[error("call-stack storage exhausted after {chunks} chunks")]
    Exhausted {
        /// Chunks currently allocated
        chunks: usize,
    },

    /// A new chunk could not be allocated.
    #[error("failed to allocate a call-stack chunk")]
    OutOfMemory,
}

#[derive(Debug)]
struct StackChunk {
    stacks: Vec<NativeCallStack>,
    occupied: BitVec,
}

impl StackChunk {
    fn new(slots: usize) -> Result<Self, StackStoreError> {
        let mut stacks = Vec::new();
        stacks
            .try_reserve_exact(slots)
            .map_err(|_| StackStoreError::OutOfMemory)?;
        stacks.resize_with(slots, NativeCallStack::default);
        Ok(Self {
            stacks,
            occupied: bitvec![0; slots],
        })
    }
}

/// Chunked, deduplicating store of call stacks
#[derive(Debug)]
pub struct NativeCallStackStorage {
    chunks: Vec<StackChunk>,
    chunk_slots: usize,
    detailed: bool,
    stored: usize,
}

impl NativeCallStackStorage {
    /// Slots per chunk used by [`NativeCallStackStorage::with_default_chunks`]
    pub const DEFAULT_CHUNK_SLOTS: usize = 256;

    /// Upper bound on chunk count imposed by the 16-bit chunk number
    pub const MAX_CHUNKS: usize = u16::MAX as usize + 1;

    /// Create storage with `chunk_slots` slots per chunk
    ///
    /// When `detailed` is false no stack is stored and every push yields
    /// `StackIndex::default()`.
    ///
    /// # Panics
    /// If `chunk_slots` is zero or exceeds 65536.
    pub fn new(detailed: bool, chunk_slots: usize) -> Self {
        assert!(
            chunk_slots > 0 && chunk_slots <= u16::MAX as usize + 1,
            "chunk size {} out of range",
            chunk_slots
        );
        Self {
            chunks: Vec::new(),
            chunk_slots,
            detailed,
            stored: 0,
        }
    }

    /// Create storage with the default chunk size
    pub fn with_default_chunks(detailed: bool) -> Self {
        Self::new(detailed, Self::DEFAULT_CHUNK_SLOTS)
    }

    /// Whether stacks are actually retained
    pub fn is_detailed(&self) -> bool {
        self.detailed
    }

    /// Number of distinct stacks stored
    pub fn len(&self) -> usize {
        self.stored
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.stored == 0
    }

    /// Number of allocated chunks
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Store `stack` if it is new and return its index
    pub fn push(&mut self, stack: &NativeCallStack) -> Result<StackIndex, StackStoreError> {
        if !self.detailed {
            return Ok(StackIndex::default());
        }

        let slot = (stack.fingerprint() % self.chunk_slots as u64) as usize;
        for (chunk_no, chunk) in self.chunks.iter_mut().enumerate() {
            if !chunk.occupied[slot] {
                chunk.stacks[slot] = stack.clone();
                chunk.occupied.set(slot, true);
                self.stored += 1;
                return Ok(StackIndex::new(chunk_no as u16, slot as u16));
            }
            if chunk.stacks[slot] == *stack {
                return Ok(StackIndex::new(chunk_no as u16, slot as u16));
            }
        }

        let chunk_no = self.chunks.len();
        if chunk_no >= Self::MAX_CHUNKS {
            tracing::warn!(chunks = chunk_no, "call-stack storage exhausted");
            return Err(StackStoreError::Exhausted { chunks: chunk_no });
        }
        let mut chunk = StackChunk::new(self.chunk_slots)?;
        chunk.stacks[slot] = stack.clone();
        chunk.occupied.set(slot, true);
        self.chunks
            .try_reserve(1)
            .map_err(|_| StackStoreError::OutOfMemory)?;
        self.chunks.push(chunk);
        self.stored += 1;
        tracing::debug!(chunks = self.chunks.len(), "call-stack storage grew");
        Ok(StackIndex::new(chunk_no as u16, slot as u16))
    }

    /// Stack stored under `index`; the empty stack when nothing is stored there
    pub fn get(&self, index: StackIndex) -> &NativeCallStack {
        self.chunks
            .get(index.chunk as usize)
            .filter(|chunk| {
                let slot = index.slot as usize;
                slot < chunk.stacks.len() && chunk.occupied[slot]
            })
            .map(|chunk| &chunk.stacks[index.slot as usize])
            .unwrap_or(&EMPTY_STACK)
    }
}
