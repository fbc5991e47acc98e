//! Memory category tags
//!
//! The tracking core only stores the small integer; names live in a
//! [`MemTagNameTable`] consulted by reporting and trace replay.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Accounting bucket a memory region is attributed to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemTag(u16);

impl MemTag {
    /// Untagged memory; released memory always carries this tag
    pub const NONE: MemTag = MemTag(0);

    /// Wrap a raw tag value
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw tag value
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for MemTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag#{}", self.0)
    }
}

/// Errors from the name table
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagTableError {
    /// Every raw tag value is in use.
    #[error("cannot register tag '{0}': all 65536 tag values are in use")]
    Exhausted(String),
}

/// Bidirectional mapping between tag names and tags
#[derive(Debug, Clone)]
pub struct MemTagNameTable {
    names: Vec<String>,
    by_name: HashMap<String, MemTag>,
}

impl Default for MemTagNameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemTagNameTable {
    /// Name reported for [`MemTag::NONE`]
    pub const NONE_NAME: &'static str = "none";

    /// Create a table holding only [`MemTag::NONE`]
    pub fn new() -> Self {
        let mut by_name = HashMap::new();
        by_name.insert(Self::NONE_NAME.to_string(), MemTag::NONE);
        Self {
            names: vec![Self::NONE_NAME.to_string()],
            by_name,
        }
    }

    /// Return the tag registered for `name`, registering the next free tag
    /// when the name is new
    pub fn make_tag(&mut self, name: &str) -> Result<MemTag, TagTableError> {
        if let Some(tag) = self.by_name.get(name) {
            return Ok(*tag);
        }
        let raw = u16::try_from(self.names.len())
            .map_err(|_| TagTableError::Exhausted(name.to_string()))?;
        let tag = MemTag(raw);
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), tag);
        Ok(tag)
    }

    /// Tag registered under `name`
    pub fn tag_of(&self, name: &str) -> Option<MemTag> {
        self.by_name.get(name).copied()
    }

    /// Name registered for `tag`
    pub fn name_of(&self, tag: MemTag) -> Option<&str> {
        self.names.get(tag.0 as usize).map(String::as_str)
    }

    /// Name for display, falling back to the raw tag value
    pub fn display_name(&self, tag: MemTag) -> String {
        match self.name_of(tag) {
            Some(name) => name.to_string(),
            None => tag.to_string(),
        }
    }

    /// Number of registered tags, [`MemTag::NONE`] included
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false: the table starts with [`MemTag::NONE`]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
