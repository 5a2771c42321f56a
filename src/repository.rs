//! Repository Module
//!
//! The entry point that ties the collection, the write lock and the write
//! group together.
//!
//! ## Responsibilities
//! - Create and open repository directories
//! - Take and release the advisory write lock
//! - Drive the write group lifecycle
//! - Read records through the combined indices
//! - Expose pack, autopack, fetch and maintenance operations

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::Result;
use crate::index::{CombinedIndex, Key};
use crate::lock::{LockMode, WriteLock};
use crate::pack::{IndexKind, KeySelection, Pack, PackCollection, PackLayout, VerifyReport};
use crate::storage::{ContainerReader, Position};
use crate::write_group::WriteGroup;
use crate::PackError;

/// Staging suffix of packs created by `fetch`
const FETCH_SUFFIX: &str = "fetch";

/// Lookups per `get_record` call while packs move under it
const READ_ATTEMPTS: u32 = 3;

/// Everything that changes while the repository is open
struct RepositoryState {
    collection: PackCollection,
    write_group: Option<WriteGroup>,
    lock: Option<WriteLock>,
}

/// A pack repository on disk
///
/// ## Concurrency Model
///
/// - All state sits behind one mutex, so write group start/commit and
///   compaction never interleave
/// - Combined index handles returned by [`PackRepository::index`] are
///   snapshot-safe: iterators opened on them keep working while packs are
///   added or removed
/// - Cross-process exclusion uses the advisory lock from [`WriteLock`]
pub struct PackRepository {
    config: Config,
    layout: PackLayout,
    state: Mutex<RepositoryState>,
}

impl PackRepository {
    /// Create the directory layout and an empty manifest, then open it
    ///
    /// Fails if a manifest already exists.
    pub fn init(config: Config) -> Result<Self> {
        let layout = PackLayout::new(&config.repo_dir);
        if layout.manifest_path().exists() {
            return Err(PackError::Config(format!(
                "repository already exists at {}",
                layout.root().display()
            )));
        }
        layout.create_dirs()?;

        // Writing the empty manifest needs the lock like any other write
        let lock = WriteLock::acquire(&layout.lock_path())?;
        let mut collection = Self::collection_for(&config, &layout);
        collection.set_lock_mode(LockMode::Write);
        collection.save_pack_names()?;
        drop(lock);

        tracing::info!(path = %layout.root().display(), "initialized repository");
        Self::open(config)
    }

    /// Open an existing repository
    ///
    /// A missing manifest is created when `create_if_missing` is set.
    pub fn open(config: Config) -> Result<Self> {
        let layout = PackLayout::new(&config.repo_dir);
        if !layout.manifest_path().exists() {
            if !config.create_if_missing {
                return Err(PackError::Config(format!(
                    "no repository at {}",
                    layout.root().display()
                )));
            }
            return Self::init(config);
        }
        layout.create_dirs()?;

        let mut collection = Self::collection_for(&config, &layout);
        collection.ensure_loaded()?;
        tracing::debug!(
            path = %layout.root().display(),
            packs = collection.pack_count()?,
            "opened repository"
        );

        Ok(Self {
            config,
            layout,
            state: Mutex::new(RepositoryState {
                collection,
                write_group: None,
                lock: None,
            }),
        })
    }

    /// Open with default config rooted at `path`
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().repo_dir(path).build())
    }

    // =========================================================================
    // Locking
    // =========================================================================

    /// Take the write lock; the manifest is re-read under the lock
    pub fn lock_write(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.lock.is_some() {
            return Ok(());
        }
        let lock = WriteLock::acquire(&self.layout.lock_path())?;
        state.collection.reset();
        state.collection.set_lock_mode(LockMode::Write);
        state.lock = Some(lock);
        Ok(())
    }

    /// Release the write lock; fails with `Busy` while a write group is open
    pub fn unlock(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.write_group.is_some() {
            return Err(PackError::Busy("cannot unlock with an open write group".into()));
        }
        state.collection.set_lock_mode(LockMode::Unlocked);
        state.lock = None;
        Ok(())
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.lock().lock.is_some()
    }

    // =========================================================================
    // Write Groups
    // =========================================================================

    pub fn start_write_group(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.write_group.is_some() {
            return Err(PackError::WriteGroupAlreadyOpen);
        }
        let group = WriteGroup::start(&mut state.collection, self.config.write_buffer_size)?;
        state.write_group = Some(group);
        Ok(())
    }

    /// Publish the open write group; `None` if it was empty
    pub fn commit_write_group(&self) -> Result<Option<Pack>> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let group = state.write_group.take().ok_or(PackError::NoWriteGroup)?;
        group.commit(
            &mut state.collection,
            self.config.sync_strategy,
            self.config.autopack,
        )
    }

    pub fn abort_write_group(&self) -> Result<()> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let group = state.write_group.take().ok_or(PackError::NoWriteGroup)?;
        group.abort(&mut state.collection)
    }

    pub fn is_in_write_group(&self) -> bool {
        self.state.lock().write_group.is_some()
    }

    /// Add a record to the open write group
    pub fn add_record(
        &self,
        kind: IndexKind,
        key: Key,
        references: Vec<Vec<Key>>,
        payload: &[u8],
    ) -> Result<Position> {
        let mut state = self.state.lock();
        let group = state.write_group.as_mut().ok_or(PackError::NoWriteGroup)?;
        group.add_record(kind, key, references, payload)
    }

    pub fn add_revision(&self, revision_id: &str, parents: Vec<Key>, payload: &[u8]) -> Result<Position> {
        self.add_record(IndexKind::Revision, Key::single(revision_id), vec![parents], payload)
    }

    pub fn add_inventory(
        &self,
        revision_id: &str,
        parents: Vec<Key>,
        compression_parents: Vec<Key>,
        payload: &[u8],
    ) -> Result<Position> {
        self.add_record(
            IndexKind::Inventory,
            Key::single(revision_id),
            vec![parents, compression_parents],
            payload,
        )
    }

    /// `key` is `(file_id, revision_id)`
    pub fn add_text(
        &self,
        key: Key,
        parents: Vec<Key>,
        compression_parents: Vec<Key>,
        payload: &[u8],
    ) -> Result<Position> {
        self.add_record(IndexKind::Text, key, vec![parents, compression_parents], payload)
    }

    pub fn add_signature(&self, revision_id: &str, payload: &[u8]) -> Result<Position> {
        self.add_record(IndexKind::Signature, Key::single(revision_id), Vec::new(), payload)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Payload of the visible record for `key`, staged or published
    ///
    /// Published containers are read without holding the repository lock. A
    /// container compacted away mid-read sends the lookup round again.
    pub fn get_record(&self, kind: IndexKind, key: &Key) -> Result<Option<Bytes>> {
        let mut attempt = 1;
        loop {
            match self.read_visible(kind, key) {
                Err(PackError::Io(e)) if e.kind() == ErrorKind::NotFound && attempt < READ_ATTEMPTS => {
                    tracing::debug!(attempt, "record source moved during read; retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn read_visible(&self, kind: IndexKind, key: &Key) -> Result<Option<Bytes>> {
        let index = self.index(kind)?;
        let Some(found) = index.get(key)? else {
            return Ok(None);
        };
        let position = Position::from_bytes(&found.entry.value)?;

        {
            let mut state = self.state.lock();
            if let Some(group) = state.write_group.as_mut() {
                if group.label() == &*found.source {
                    return group.read_record(position).map(Some);
                }
            }
        }

        let path = self.layout.pack_path(&found.source);
        Ok(Some(ContainerReader::open(&path)?.read_record(position)?))
    }

    /// Combined index over every pack (and the open write group) for `kind`
    pub fn index(&self, kind: IndexKind) -> Result<Arc<CombinedIndex>> {
        self.state.lock().collection.combined_index(kind)
    }

    /// Descriptors of every listed pack, sorted by name
    pub fn all_packs(&self) -> Result<Vec<Pack>> {
        self.state.lock().collection.all_packs()
    }

    pub fn pack_names(&self) -> Result<Vec<String>> {
        self.state.lock().collection.names()
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Merge every pack into one; `false` with fewer than two packs
    pub fn pack(&self) -> Result<bool> {
        let mut state = self.state.lock();
        Self::require_idle(&state)?;
        state.collection.pack()
    }

    /// Merge packs until the count is within the digit-sum bound
    pub fn autopack(&self) -> Result<bool> {
        let mut state = self.state.lock();
        Self::require_idle(&state)?;
        state.collection.autopack()
    }

    /// Copy records from packs of any repository into a new pack here
    ///
    /// Returns `None` when nothing was selected.
    pub fn fetch(&self, sources: &[Pack], selection: KeySelection<'_>) -> Result<Option<Pack>> {
        let mut state = self.state.lock();
        Self::require_idle(&state)?;
        let pack = state
            .collection
            .create_pack_from_packs(sources, selection, FETCH_SUFFIX)?;
        if pack.is_some() {
            state.collection.save_pack_names()?;
        }
        Ok(pack)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    pub fn verify(&self) -> Result<VerifyReport> {
        self.state.lock().collection.verify()
    }

    /// Delete staging files left by crashed or failed writers
    pub fn discard_orphaned_uploads(&self) -> Result<usize> {
        let mut state = self.state.lock();
        Self::require_idle(&state)?;
        state.collection.discard_orphaned_uploads()
    }

    /// Drop cached manifest state so the next read sees other writers' packs
    pub fn refresh(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::require_idle(&state)?;
        state.collection.reset();
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn layout(&self) -> &PackLayout {
        &self.layout
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn collection_for(config: &Config, layout: &PackLayout) -> PackCollection {
        PackCollection::new(layout.clone(), config.write_buffer_size, config.sync_strategy)
    }

    fn require_idle(state: &RepositoryState) -> Result<()> {
        if state.write_group.is_some() {
            return Err(PackError::Busy("a write group is open".into()));
        }
        Ok(())
    }
}
