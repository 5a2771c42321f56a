//! In-memory index shared between a writer and concurrent readers.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;

use super::{GraphIndex, IndexBuilder, IndexEntry, Key};

/// A mutable index that can sit inside a [`super::CombinedIndex`]
///
/// Writes go through an internal `RwLock`; readers get a sorted snapshot that
/// is cached until the next write.
pub struct MemoryIndex {
    label: Arc<str>,
    builder: RwLock<IndexBuilder>,
    /// Last snapshot handed out, dropped on every write
    cached: Mutex<Option<Arc<Vec<IndexEntry>>>>,
}

impl MemoryIndex {
    pub fn new(label: impl Into<Arc<str>>, reference_lists: usize, key_elements: usize) -> Self {
        Self {
            label: label.into(),
            builder: RwLock::new(IndexBuilder::new(reference_lists, key_elements)),
            cached: Mutex::new(None),
        }
    }

    /// See [`IndexBuilder::add_node`]
    pub fn add_node(&self, key: Key, value: Vec<u8>, references: Vec<Vec<Key>>) -> Result<()> {
        self.builder.write().add_node(key, value, references)?;
        *self.cached.lock() = None;
        Ok(())
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.builder.read().contains(key)
    }

    pub fn len(&self) -> usize {
        self.builder.read().key_count()
    }

    pub fn is_empty(&self) -> bool {
        self.builder.read().is_empty()
    }

    /// See [`IndexBuilder::finish`]
    pub fn finish(&self) -> Result<Vec<u8>> {
        self.builder.write().finish()
    }
}

impl GraphIndex for MemoryIndex {
    fn label(&self) -> Arc<str> {
        Arc::clone(&self.label)
    }

    fn reference_lists(&self) -> usize {
        self.builder.read().reference_lists()
    }

    fn key_elements(&self) -> usize {
        self.builder.read().key_elements()
    }

    fn snapshot(&self) -> Result<Arc<Vec<IndexEntry>>> {
        let mut cached = self.cached.lock();
        if let Some(entries) = cached.as_ref() {
            return Ok(Arc::clone(entries));
        }
        let entries = Arc::new(self.builder.read().entries());
        *cached = Some(Arc::clone(&entries));
        Ok(entries)
    }

    fn key_count(&self) -> Result<usize> {
        Ok(self.len())
    }
}
