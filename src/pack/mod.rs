//! Pack Module
//!
//! Packs, the manifest that lists them, and the machinery that creates and
//! compacts them.
//!
//! ## Responsibilities
//! - Describe a pack: one container + four structural indices
//! - Keep the manifest (`pack-names`) authoritative
//! - Plan incremental compaction (autopack)
//! - Copy records between packs without re-encoding them

pub mod autopack;
mod builder;
mod collection;
mod layout;

use std::fmt;
use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::index::{GraphIndex, SortedIndex};

pub use autopack::{max_pack_count, pack_distribution, plan, PackOperation, PackSummary};
pub use builder::{KeySelection, PackBuilder, TextKeyResolver};
pub use collection::{PackCollection, VerifyReport};
pub use layout::PackLayout;

// =============================================================================
// Index Kinds
// =============================================================================

/// The four structural roles an index plays inside a pack
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKind {
    /// Revision metadata, keyed by revision id; refs: parents
    Revision,
    /// Tree snapshots, keyed by revision id; refs: parents, compression parents
    Inventory,
    /// File texts, keyed by (file id, revision id); refs as inventories
    Text,
    /// Revision signatures, keyed by revision id; no refs
    Signature,
}

impl IndexKind {
    /// Every kind, in the order records are copied and lengths are stored
    pub const ALL: [IndexKind; 4] = [
        IndexKind::Revision,
        IndexKind::Inventory,
        IndexKind::Text,
        IndexKind::Signature,
    ];

    /// Index file extension
    pub fn suffix(self) -> &'static str {
        match self {
            IndexKind::Revision => "rix",
            IndexKind::Inventory => "iix",
            IndexKind::Text => "tix",
            IndexKind::Signature => "six",
        }
    }

    pub fn reference_lists(self) -> usize {
        match self {
            IndexKind::Revision => 1,
            IndexKind::Inventory | IndexKind::Text => 2,
            IndexKind::Signature => 0,
        }
    }

    pub fn key_elements(self) -> usize {
        match self {
            IndexKind::Text => 2,
            _ => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IndexKind::Revision => "revision",
            IndexKind::Inventory => "inventory",
            IndexKind::Text => "text",
            IndexKind::Signature => "signature",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value per [`IndexKind`]
///
/// Replaces four hand-written copies of per-kind state and logic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerKind<T> {
    slots: [T; 4],
}

impl<T> PerKind<T> {
    pub fn from_fn(mut f: impl FnMut(IndexKind) -> T) -> Self {
        Self {
            slots: std::array::from_fn(|i| f(IndexKind::ALL[i])),
        }
    }

    pub fn try_from_fn<E>(mut f: impl FnMut(IndexKind) -> std::result::Result<T, E>) -> std::result::Result<Self, E> {
        let [revision, inventory, text, signature] = IndexKind::ALL;
        Ok(Self {
            slots: [f(revision)?, f(inventory)?, f(text)?, f(signature)?],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (IndexKind, &T)> {
        IndexKind::ALL.into_iter().zip(self.slots.iter())
    }

    pub fn map<U>(&self, mut f: impl FnMut(IndexKind, &T) -> U) -> PerKind<U> {
        PerKind::from_fn(|kind| f(kind, &self[kind]))
    }

    pub fn into_array(self) -> [T; 4] {
        self.slots
    }
}

impl<T> Index<IndexKind> for PerKind<T> {
    type Output = T;

    fn index(&self, kind: IndexKind) -> &T {
        &self.slots[kind.slot()]
    }
}

impl<T> IndexMut<IndexKind> for PerKind<T> {
    fn index_mut(&mut self, kind: IndexKind) -> &mut T {
        &mut self.slots[kind.slot()]
    }
}

// =============================================================================
// Pack Descriptor
// =============================================================================

/// A published, immutable pack
///
/// Index handles are lazy: nothing is read until the first query.
#[derive(Clone)]
pub struct Pack {
    name: String,
    location: PathBuf,
    indices: PerKind<Arc<SortedIndex>>,
}

impl Pack {
    pub fn new(name: impl Into<String>, location: PathBuf, indices: PerKind<Arc<SortedIndex>>) -> Self {
        Self {
            name: name.into(),
            location,
            indices,
        }
    }

    /// Content hash of the container
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Container path
    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn index(&self, kind: IndexKind) -> &Arc<SortedIndex> {
        &self.indices[kind]
    }

    /// Index handle typed for combining with other indices
    pub fn graph_index(&self, kind: IndexKind) -> Arc<dyn GraphIndex> {
        Arc::clone(&self.indices[kind]) as Arc<dyn GraphIndex>
    }

    pub fn revision_count(&self) -> Result<usize> {
        self.indices[IndexKind::Revision].key_count()
    }
}

impl fmt::Debug for Pack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pack")
            .field("name", &self.name)
            .field("location", &self.location)
            .finish()
    }
}

impl PartialEq for Pack {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.location == other.location
    }
}
