//! Combined Index
//!
//! Read-time union of several graph indices.
//!
//! ## Precedence
//! Sources are ordered most-recent first. When more than one source holds a
//! key, the entry from the earliest source in that order wins and the others
//! are hidden. Callers control the order explicitly through `insert_index`.
//!
//! ## Snapshots
//! The source list is copy-on-write: `insert_index`/`remove_index` publish a
//! new list, and an iterator keeps the list (and each source's entry snapshot)
//! it started with.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;

use super::{EntryIter, GraphIndex, IndexEntry, Key};

/// An entry together with the label of the source that supplied it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedEntry {
    pub source: Arc<str>,
    pub entry: IndexEntry,
}

type SourceList = Arc<Vec<Arc<dyn GraphIndex>>>;

/// Union of graph indices with first-match-wins precedence
pub struct CombinedIndex {
    sources: RwLock<SourceList>,
}

impl CombinedIndex {
    /// Combine `sources`, highest precedence first
    pub fn new(sources: Vec<Arc<dyn GraphIndex>>) -> Self {
        Self {
            sources: RwLock::new(Arc::new(sources)),
        }
    }

    /// Insert a source at `position` (0 = highest precedence)
    ///
    /// Positions past the end append.
    pub fn insert_index(&self, position: usize, index: Arc<dyn GraphIndex>) {
        let mut sources = self.sources.write();
        let mut next: Vec<_> = sources.iter().cloned().collect();
        let position = position.min(next.len());
        next.insert(position, index);
        *sources = Arc::new(next);
    }

    /// Remove the first source with `label`; returns whether one was found
    pub fn remove_index(&self, label: &str) -> bool {
        let mut sources = self.sources.write();
        let Some(position) = sources.iter().position(|s| &*s.label() == label) else {
            return false;
        };
        let mut next: Vec<_> = sources.iter().cloned().collect();
        next.remove(position);
        *sources = Arc::new(next);
        true
    }

    /// Labels of the current sources, in precedence order
    pub fn labels(&self) -> Vec<Arc<str>> {
        self.sources.read().iter().map(|s| s.label()).collect()
    }

    /// Number of constituent indices
    pub fn source_count(&self) -> usize {
        self.sources.read().len()
    }

    /// Iterate the union of all sources in key order
    pub fn iter_all(&self) -> Result<CombinedIter> {
        let sources = self.pin();
        let mut iters = Vec::with_capacity(sources.len());
        for source in sources.iter() {
            iters.push((source.label(), source.iter_all()?));
        }
        Ok(CombinedIter { iters })
    }

    /// Iterate the union restricted to `keys`; absent keys are skipped
    pub fn iter_keys(&self, keys: &BTreeSet<Key>) -> Result<CombinedIter> {
        let sources = self.pin();
        let mut iters = Vec::with_capacity(sources.len());
        for source in sources.iter() {
            iters.push((source.label(), source.iter_keys(keys)?));
        }
        Ok(CombinedIter { iters })
    }

    /// Look up one key
    pub fn get(&self, key: &Key) -> Result<Option<SourcedEntry>> {
        let keys = BTreeSet::from([key.clone()]);
        Ok(self.iter_keys(&keys)?.next())
    }

    /// Number of distinct keys across all sources
    pub fn key_count(&self) -> Result<usize> {
        Ok(self.iter_all()?.count())
    }

    fn pin(&self) -> SourceList {
        Arc::clone(&self.sources.read())
    }
}

/// Merging iterator over a pinned set of sources
///
/// Each step picks the smallest pending key; ties go to the source that comes
/// first in precedence order and the hidden duplicates are skipped.
pub struct CombinedIter {
    iters: Vec<(Arc<str>, EntryIter)>,
}

impl Iterator for CombinedIter {
    type Item = SourcedEntry;

    fn next(&mut self) -> Option<Self::Item> {
        // Strict `<` keeps the earliest source on equal keys
        let mut winner: Option<usize> = None;
        for (i, (_, iter)) in self.iters.iter().enumerate() {
            let Some(candidate) = iter.peek() else {
                continue;
            };
            let better = match winner {
                None => true,
                Some(w) => match self.iters[w].1.peek() {
                    Some(current) => candidate.key < current.key,
                    None => true,
                },
            };
            if better {
                winner = Some(i);
            }
        }

        let winner = winner?;
        let (label, iter) = &mut self.iters[winner];
        let entry = iter.next()?;
        let source = Arc::clone(label);

        for (_, other) in self.iters.iter_mut() {
            while other.peek().map_or(false, |e| e.key == entry.key) {
                other.next();
            }
        }

        Some(SourcedEntry { source, entry })
    }
}
