//! Index Iterator
//!
//! Sequential iteration over a pinned index snapshot.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{IndexEntry, Key};

/// Which snapshot positions an iterator visits
enum Selection {
    /// Every entry, starting at `next`
    All { next: usize },
    /// Only the positions of the requested keys, ascending
    Positions(std::vec::IntoIter<usize>),
}

/// Iterator over index entries in ascending key order
///
/// Holds its own reference to the snapshot, so it is unaffected by later
/// writes to the index it came from.
pub struct EntryIter {
    entries: Arc<Vec<IndexEntry>>,
    selection: Selection,
}

impl EntryIter {
    /// Iterate the whole snapshot
    pub(crate) fn all(entries: Arc<Vec<IndexEntry>>) -> Self {
        Self {
            entries,
            selection: Selection::All { next: 0 },
        }
    }

    /// Iterate only the entries for `keys` (binary search per key)
    pub(crate) fn selected(entries: Arc<Vec<IndexEntry>>, keys: &BTreeSet<Key>) -> Self {
        let positions: Vec<usize> = keys
            .iter()
            .filter_map(|key| entries.binary_search_by(|e| e.key.cmp(key)).ok())
            .collect();
        Self {
            entries,
            selection: Selection::Positions(positions.into_iter()),
        }
    }

    /// Peek at the next entry without consuming it
    pub fn peek(&self) -> Option<&IndexEntry> {
        match &self.selection {
            Selection::All { next } => self.entries.get(*next),
            Selection::Positions(iter) => iter.as_slice().first().map(|&p| &self.entries[p]),
        }
    }
}

impl Iterator for EntryIter {
    type Item = IndexEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let position = match &mut self.selection {
            Selection::All { next } => {
                let p = *next;
                *next += 1;
                p
            }
            Selection::Positions(iter) => iter.next()?,
        };
        self.entries.get(position).cloned()
    }
}
