//! Write Group
//!
//! The single in-flight staging area of a repository.
//!
//! ## Lifecycle
//! ```text
//! Closed ──start()──► Open ──commit()──► Closed (pack published)
//!                       └────abort()───► Closed (nothing published)
//! ```
//!
//! Records go to `upload/<uuid>.pack` as they arrive and into one
//! [`MemoryIndex`] per kind. Those indices sit in front of the collection's
//! combined indices, so readers see the records before the commit.

use std::sync::Arc;

use bytes::Bytes;

use crate::config::SyncStrategy;
use crate::error::Result;
use crate::index::{validate_node, Key, MemoryIndex};
use crate::pack::{IndexKind, Pack, PackCollection, PerKind};
use crate::storage::{ContainerReader, ContainerWriter, Position};
use crate::PackError;

/// Suffix of a write group's staging container
const STAGING_SUFFIX: &str = "pack";

/// An open write group
pub struct WriteGroup {
    label: Arc<str>,
    container: ContainerWriter,
    indices: PerKind<Arc<MemoryIndex>>,
}

impl WriteGroup {
    /// Open a staging container and register empty indices
    ///
    /// Requires the write lock; fails with `WriteGroupAlreadyOpen` while
    /// another group is open.
    pub fn start(collection: &mut PackCollection, buffer_size: usize) -> Result<Self> {
        collection.require_write_lock()?;
        if collection.is_write_group_open() {
            return Err(PackError::WriteGroupAlreadyOpen);
        }

        let label: Arc<str> = Arc::from(uuid::Uuid::new_v4().to_string());
        let path = collection.layout().upload_path(&label, STAGING_SUFFIX);
        let container = ContainerWriter::create(&path, buffer_size)?;

        let indices = PerKind::from_fn(|kind| {
            Arc::new(MemoryIndex::new(
                Arc::clone(&label),
                kind.reference_lists(),
                kind.key_elements(),
            ))
        });

        if let Err(e) = collection.register_staging(indices.clone()) {
            container.abandon()?;
            return Err(e);
        }

        tracing::debug!(group = %label, staging = %path.display(), "write group started");
        Ok(Self {
            label,
            container,
            indices,
        })
    }

    /// Staging name; also the label of the group's indices
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Append one record
    ///
    /// The key and references are checked before any bytes are written.
    pub fn add_record(
        &mut self,
        kind: IndexKind,
        key: Key,
        references: Vec<Vec<Key>>,
        payload: &[u8],
    ) -> Result<Position> {
        let index = &self.indices[kind];
        validate_node(&key, &references, kind.key_elements(), kind.reference_lists())?;
        if index.contains(&key) {
            return Err(PackError::DuplicateKey(key.to_string()));
        }

        let position = self.container.add_bytes_record(payload)?;
        index.add_node(key, position.to_bytes(), references)?;
        Ok(position)
    }

    /// Records buffered so far, all kinds
    pub fn key_count(&self) -> usize {
        self.indices.iter().map(|(_, index)| index.len()).sum()
    }

    pub fn index(&self, kind: IndexKind) -> &Arc<MemoryIndex> {
        &self.indices[kind]
    }

    /// Read back a staged record's payload
    pub fn read_record(&mut self, position: Position) -> Result<Bytes> {
        self.container.flush()?;
        ContainerReader::open(self.container.path())?.read_record(position)
    }

    /// Publish the staged records as a pack
    ///
    /// Returns `None` (manifest untouched) when nothing was added. The group
    /// is closed whatever the outcome. A duplicate of a listed pack removes the
    /// staging container; any other failure leaves it in `upload/` for
    /// [`PackCollection::discard_orphaned_uploads`].
    pub fn commit(
        self,
        collection: &mut PackCollection,
        sync: SyncStrategy,
        autopack: bool,
    ) -> Result<Option<Pack>> {
        if self.key_count() == 0 {
            collection.unregister_staging();
            self.container.abandon()?;
            tracing::debug!(group = %self.label, "empty write group committed");
            return Ok(None);
        }

        let label = Arc::clone(&self.label);
        match self.publish(collection, sync) {
            Ok(pack) => {
                // Published indices now hold everything the staging layer did
                collection.unregister_staging();
                let packed = if autopack {
                    match collection.autopack() {
                        Ok(packed) => packed,
                        Err(e) => {
                            // Keep the new pack listed even though compaction failed
                            collection.save_pack_names()?;
                            return Err(e);
                        }
                    }
                } else {
                    false
                };
                if !packed {
                    collection.save_pack_names()?;
                }
                tracing::info!(group = %label, pack = %pack.name(), autopacked = packed, "write group committed");
                Ok(Some(pack))
            }
            Err(e) => {
                tracing::warn!(group = %label, "write group commit failed: {}", e);
                collection.unregister_staging();
                collection.reset();
                Err(e)
            }
        }
    }

    /// Drop everything staged; the manifest is never touched
    pub fn abort(self, collection: &mut PackCollection) -> Result<()> {
        collection.unregister_staging();
        self.container.abandon()?;
        tracing::debug!(group = %self.label, "write group aborted");
        Ok(())
    }

    fn publish(self, collection: &mut PackCollection, sync: SyncStrategy) -> Result<Pack> {
        let blobs = PerKind::try_from_fn(|kind| self.indices[kind].finish())?;
        let finished = self.container.finish(sync)?;
        collection.publish(finished, blobs)
    }
}

impl std::fmt::Debug for WriteGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteGroup")
            .field("label", &self.label)
            .field("records", &self.key_count())
            .finish()
    }
}
