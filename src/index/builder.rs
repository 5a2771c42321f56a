//! Index Builder
//!
//! Buffers nodes in memory and serializes them to the on-disk index format.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::PackError;

use super::{validate_node, IndexEntry, Key, HEADER_SIZE, MAGIC, VERSION};

/// Builder for graph indices
///
/// Nodes may be added in any order; they are kept sorted by key. Each key may
/// be added once.
#[derive(Debug)]
pub struct IndexBuilder {
    /// Reference lists every node must carry
    reference_lists: usize,
    /// Elements every key must have
    key_elements: usize,
    /// Buffered nodes: key → (value, references)
    nodes: BTreeMap<Key, (Vec<u8>, Vec<Vec<Key>>)>,
    /// Set by `finish()`; no more nodes are accepted afterwards
    finished: bool,
}

impl IndexBuilder {
    /// Create an empty builder for an index of the given shape
    pub fn new(reference_lists: usize, key_elements: usize) -> Self {
        Self {
            reference_lists,
            key_elements,
            nodes: BTreeMap::new(),
            finished: false,
        }
    }

    /// Add a node
    ///
    /// Fails with `DuplicateKey` if `key` is already buffered, and with
    /// `InvalidKey`/`BadReferenceLists` if the node does not fit the index shape.
    pub fn add_node(&mut self, key: Key, value: Vec<u8>, references: Vec<Vec<Key>>) -> Result<()> {
        if self.finished {
            return Err(PackError::BuilderFinished);
        }
        validate_node(&key, &references, self.key_elements, self.reference_lists)?;
        if self.nodes.contains_key(&key) {
            return Err(PackError::DuplicateKey(key.to_string()));
        }
        self.nodes.insert(key, (value, references));
        Ok(())
    }

    /// Check whether a key is already buffered
    pub fn contains(&self, key: &Key) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn key_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn reference_lists(&self) -> usize {
        self.reference_lists
    }

    pub fn key_elements(&self) -> usize {
        self.key_elements
    }

    /// Buffered nodes in ascending key order
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.nodes
            .iter()
            .map(|(key, (value, references))| IndexEntry {
                key: key.clone(),
                value: value.clone(),
                references: references.clone(),
            })
            .collect()
    }

    /// Serialize the buffered nodes and seal the builder
    ///
    /// Buffered nodes stay readable through `entries()`, but `add_node` fails
    /// with `BuilderFinished` from now on.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        if self.finished {
            return Err(PackError::BuilderFinished);
        }
        let bytes = encode(&self.entries(), self.reference_lists, self.key_elements)?;
        self.finished = true;
        Ok(bytes)
    }
}

/// Encode sorted entries: header, bincode body, CRC footer
pub(crate) fn encode(
    entries: &[IndexEntry],
    reference_lists: usize,
    key_elements: usize,
) -> Result<Vec<u8>> {
    let body = bincode::serialize(entries)?;

    let mut out = Vec::with_capacity(HEADER_SIZE + body.len() + 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.push(shape_byte(reference_lists)?);
    out.push(shape_byte(key_elements)?);
    out.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    out.extend_from_slice(&(body.len() as u64).to_le_bytes());
    out.extend_from_slice(&body);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&out);
    let crc = hasher.finalize();
    out.extend_from_slice(&crc.to_le_bytes());

    Ok(out)
}

fn shape_byte(value: usize) -> Result<u8> {
    u8::try_from(value)
        .map_err(|_| PackError::Serialization(format!("index shape value too large: {}", value)))
}
