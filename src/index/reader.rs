//! Sorted Index Reader
//!
//! Opens index files lazily and serves lookups from an in-memory snapshot.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::PackError;

use super::{GraphIndex, IndexEntry, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};

/// Immutable on-disk graph index
///
/// Nothing is read until the first query; the decoded entries are then kept
/// for the life of the handle.
pub struct SortedIndex {
    /// Name used inside combined indices (the owning pack's name)
    label: Arc<str>,
    /// Index file location
    path: PathBuf,
    /// Size recorded in the manifest, checked on load
    expected_size: Option<u64>,
    /// Shape the file must have
    reference_lists: usize,
    key_elements: usize,
    /// Decoded entries, filled on first use
    loaded: RwLock<Option<Arc<Vec<IndexEntry>>>>,
}

impl SortedIndex {
    /// Create a lazy handle for an index file
    pub fn open(
        path: &Path,
        label: impl Into<Arc<str>>,
        expected_size: Option<u64>,
        reference_lists: usize,
        key_elements: usize,
    ) -> Self {
        Self {
            label: label.into(),
            path: path.to_path_buf(),
            expected_size,
            reference_lists,
            key_elements,
            loaded: RwLock::new(None),
        }
    }

    /// Index file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file has been read yet
    pub fn is_loaded(&self) -> bool {
        self.loaded.read().is_some()
    }

    /// Read and decode the file, or return the cached entries
    fn load(&self) -> Result<Arc<Vec<IndexEntry>>> {
        if let Some(entries) = self.loaded.read().as_ref() {
            return Ok(Arc::clone(entries));
        }

        let mut slot = self.loaded.write();
        // Another reader may have loaded it while we waited
        if let Some(entries) = slot.as_ref() {
            return Ok(Arc::clone(entries));
        }

        let data = fs::read(&self.path)?;
        if let Some(expected) = self.expected_size {
            if data.len() as u64 != expected {
                return Err(PackError::Corruption(format!(
                    "index {} is {} bytes, manifest records {}",
                    self.path.display(),
                    data.len(),
                    expected
                )));
            }
        }

        let (reference_lists, key_elements, entries) = decode(&data)?;
        if reference_lists != self.reference_lists || key_elements != self.key_elements {
            return Err(PackError::Corruption(format!(
                "index {} has shape ({}, {}), expected ({}, {})",
                self.path.display(),
                reference_lists,
                key_elements,
                self.reference_lists,
                self.key_elements
            )));
        }

        let entries = Arc::new(entries);
        *slot = Some(Arc::clone(&entries));
        Ok(entries)
    }
}

impl GraphIndex for SortedIndex {
    fn label(&self) -> Arc<str> {
        Arc::clone(&self.label)
    }

    fn reference_lists(&self) -> usize {
        self.reference_lists
    }

    fn key_elements(&self) -> usize {
        self.key_elements
    }

    fn snapshot(&self) -> Result<Arc<Vec<IndexEntry>>> {
        self.load()
    }
}

/// Decode index bytes into (reference_lists, key_elements, entries)
pub(crate) fn decode(data: &[u8]) -> Result<(usize, usize, Vec<IndexEntry>)> {
    if data.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(PackError::Corruption(format!(
            "index too short: {} bytes",
            data.len()
        )));
    }

    if &data[0..4] != MAGIC {
        return Err(PackError::Corruption(format!(
            "Invalid index magic: expected PKIX, got {:?}",
            &data[0..4]
        )));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != VERSION {
        return Err(PackError::Corruption(format!(
            "Unsupported index version: {}",
            version
        )));
    }

    let reference_lists = data[6] as usize;
    let key_elements = data[7] as usize;
    let entry_count = read_u64(&data[8..16]);
    let body_len = read_u64(&data[16..24]);

    let crc_offset = data.len() - FOOTER_SIZE;
    if HEADER_SIZE as u64 + body_len != crc_offset as u64 {
        return Err(PackError::Corruption(format!(
            "index body length {} does not match file size {}",
            body_len,
            data.len()
        )));
    }

    let stored_crc = u32::from_le_bytes([
        data[crc_offset],
        data[crc_offset + 1],
        data[crc_offset + 2],
        data[crc_offset + 3],
    ]);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&data[..crc_offset]);
    if hasher.finalize() != stored_crc {
        return Err(PackError::ChecksumMismatch {
            offset: crc_offset as u64,
        });
    }

    let entries: Vec<IndexEntry> = bincode::deserialize(&data[HEADER_SIZE..crc_offset])?;
    if entries.len() as u64 != entry_count {
        return Err(PackError::Corruption(format!(
            "index header claims {} entries, body has {}",
            entry_count,
            entries.len()
        )));
    }
    if entries.windows(2).any(|w| w[0].key >= w[1].key) {
        return Err(PackError::Corruption(
            "index entries are not strictly ascending".to_string(),
        ));
    }

    Ok((reference_lists, key_elements, entries))
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
