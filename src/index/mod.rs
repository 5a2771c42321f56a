//! Index Module
//!
//! Sorted graph indices: key → (value, reference lists).
//!
//! ## Pieces
//! - [`IndexBuilder`]: mutable, in-memory, rejects duplicate keys
//! - [`SortedIndex`]: immutable on-disk index, loaded lazily
//! - [`MemoryIndex`]: a shared builder that readers can query while it fills
//! - [`CombinedIndex`]: union of several indices, first source wins
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (24 bytes)                                       │
//! │   Magic: "PKIX" (4) | Version: u16 (2)                  │
//! │   RefLists: u8 (1) | KeyElements: u8 (1)                │
//! │   EntryCount: u64 (8) | BodyLen: u64 (8)                │
//! ├─────────────────────────────────────────────────────────┤
//! │ Body (BodyLen bytes)                                    │
//! │   bincode Vec<IndexEntry>, ascending key order          │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (4 bytes)                                        │
//! │   CRC32 of header + body                                │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod builder;
mod combined;
mod iterator;
mod memory;
mod reader;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use builder::IndexBuilder;
pub use combined::{CombinedIndex, CombinedIter, SourcedEntry};
pub use iterator::EntryIter;
pub use memory::MemoryIndex;
pub use reader::SortedIndex;

// =============================================================================
// Shared Constants (used by builder and reader)
// =============================================================================

/// Magic bytes identifying a packstore index file
pub(crate) const MAGIC: &[u8; 4] = b"PKIX";

/// Current index format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + RefLists (1) + KeyElements (1)
/// + EntryCount (8) + BodyLen (8) = 24 bytes
pub(crate) const HEADER_SIZE: usize = 24;

/// Footer size: CRC32 (4)
pub(crate) const FOOTER_SIZE: usize = 4;

// =============================================================================
// Keys and Entries
// =============================================================================

/// A record key: a short tuple of string elements.
///
/// Revision, inventory and signature keys are `(revision_id,)`; text keys are
/// `(file_id, revision_id)`. Keys order lexicographically element by element.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(Vec<String>);

impl Key {
    /// Build a key from any sequence of elements
    pub fn new<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(elements.into_iter().map(Into::into).collect())
    }

    /// One-element key (revision ids, pack names)
    pub fn single(element: impl Into<String>) -> Self {
        Self(vec![element.into()])
    }

    /// Two-element key (file id, revision id)
    pub fn pair(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self(vec![first.into(), second.into()])
    }

    pub fn elements(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The final element (the revision id for every key shape in use)
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

/// One node of a graph index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: Key,
    /// Opaque value bytes (a container position for pack indices)
    pub value: Vec<u8>,
    /// Graph edges, one list per reference kind of the index
    pub references: Vec<Vec<Key>>,
}

// =============================================================================
// Read Interface
// =============================================================================

/// Read access shared by every index flavour.
///
/// Implementors only provide a sorted snapshot; iteration, filtering and
/// counting are derived from it. A snapshot never changes once handed out, so
/// iterators stay valid while the index keeps growing.
pub trait GraphIndex: Send + Sync {
    /// Identifies the index inside a [`CombinedIndex`] (usually a pack name)
    fn label(&self) -> Arc<str>;

    /// Number of reference lists per entry
    fn reference_lists(&self) -> usize;

    /// Number of elements per key
    fn key_elements(&self) -> usize;

    /// All entries in ascending key order
    fn snapshot(&self) -> Result<Arc<Vec<IndexEntry>>>;

    /// Iterate every entry in key order
    fn iter_all(&self) -> Result<EntryIter> {
        Ok(EntryIter::all(self.snapshot()?))
    }

    /// Iterate the entries whose keys are in `keys`; absent keys are skipped
    fn iter_keys(&self, keys: &BTreeSet<Key>) -> Result<EntryIter> {
        Ok(EntryIter::selected(self.snapshot()?, keys))
    }

    fn key_count(&self) -> Result<usize> {
        Ok(self.snapshot()?.len())
    }
}

/// Shared check used by builders: key shape and reference list count
pub(crate) fn validate_node(
    key: &Key,
    references: &[Vec<Key>],
    key_elements: usize,
    reference_lists: usize,
) -> Result<()> {
    use crate::PackError;

    if key.len() != key_elements || key.elements().iter().any(String::is_empty) {
        return Err(PackError::InvalidKey {
            key: key.to_string(),
            expected: key_elements,
        });
    }
    if references.len() != reference_lists {
        return Err(PackError::BadReferenceLists {
            key: key.to_string(),
            expected: reference_lists,
            actual: references.len(),
        });
    }
    for referenced in references.iter().flatten() {
        if referenced.len() != key_elements {
            return Err(PackError::InvalidKey {
                key: referenced.to_string(),
                expected: key_elements,
            });
        }
    }
    Ok(())
}
