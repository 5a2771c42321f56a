//! Pack Collection
//!
//! The in-memory view of the manifest and everything derived from it.
//!
//! ## Responsibilities
//! - Load `pack-names` on first use and write it back atomically
//! - Hand out pack descriptors with lazily-opened indices
//! - Keep one combined index per kind, most recently registered pack first
//! - Publish staged containers and move superseded packs to `obsolete_packs/`
//! - Run autopack and full pack
//!
//! ## Registration Order
//! On load packs are registered in ascending name order; every pack allocated
//! afterwards goes to the front. An open write group's in-memory indices sit
//! in front of all of them.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SyncStrategy;
use crate::error::Result;
use crate::index::{CombinedIndex, GraphIndex, IndexBuilder, Key, MemoryIndex, SortedIndex};
use crate::lock::LockMode;
use crate::storage::FinishedContainer;
use crate::PackError;

use super::autopack::{max_pack_count, pack_distribution, plan, PackOperation, PackSummary};
use super::builder::{KeySelection, PackBuilder};
use super::{IndexKind, Pack, PackLayout, PerKind};

/// Label of the manifest when it is opened as an index
const MANIFEST_LABEL: &str = "pack-names";

/// Bytes of a manifest value: four little-endian u64 index lengths
const MANIFEST_VALUE_LEN: usize = 32;

/// Result of [`PackCollection::verify`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Manifest entries examined
    pub packs_checked: usize,
    /// Container or index files listed in the manifest but absent
    pub missing_files: Vec<PathBuf>,
    /// Index files whose size differs from the manifest: (path, expected, actual)
    pub size_mismatches: Vec<(PathBuf, u64, u64)>,
    /// Staging files not owned by the open write group
    pub orphaned_uploads: Vec<PathBuf>,
    /// Containers in `packs/` the manifest does not list
    pub unlisted_packs: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.missing_files.is_empty()
            && self.size_mismatches.is_empty()
            && self.orphaned_uploads.is_empty()
            && self.unlisted_packs.is_empty()
    }
}

/// Registry of the packs in one repository
///
/// ## Concurrency:
/// - Owned by the repository behind a single mutex; methods take `&mut self`
/// - Combined indices are shared out as `Arc`s; readers holding one keep
///   working across inserts and removals
pub struct PackCollection {
    layout: PackLayout,
    buffer_size: usize,
    sync: SyncStrategy,
    lock_mode: LockMode,

    /// Manifest contents, name → index lengths; `None` until loaded
    names: Option<BTreeMap<String, PerKind<u64>>>,

    /// Descriptors handed out so far
    packs: HashMap<String, Pack>,

    /// Pack names, most recently registered first
    registration: Vec<String>,

    /// One combined index per kind, rebuilt after structural changes
    combined: Option<PerKind<Arc<CombinedIndex>>>,

    /// In-memory layers of the open write group
    staging: Option<PerKind<Arc<MemoryIndex>>>,
}

impl PackCollection {
    pub fn new(layout: PackLayout, buffer_size: usize, sync: SyncStrategy) -> Self {
        Self {
            layout,
            buffer_size,
            sync,
            lock_mode: LockMode::Unlocked,
            names: None,
            packs: HashMap::new(),
            registration: Vec::new(),
            combined: None,
            staging: None,
        }
    }

    pub fn layout(&self) -> &PackLayout {
        &self.layout
    }

    pub fn set_lock_mode(&mut self, mode: LockMode) {
        self.lock_mode = mode;
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    /// Fail unless the repository's write lock is held
    pub fn require_write_lock(&self) -> Result<()> {
        match self.lock_mode {
            LockMode::Write => Ok(()),
            LockMode::Unlocked => Err(PackError::NotWriteLocked),
        }
    }

    // =========================================================================
    // Manifest
    // =========================================================================

    /// Parse the manifest if it has not been read yet
    pub fn ensure_loaded(&mut self) -> Result<()> {
        if self.names.is_some() {
            return Ok(());
        }

        let path = self.layout.manifest_path();
        let mut names = BTreeMap::new();
        if path.exists() {
            let manifest = SortedIndex::open(&path, MANIFEST_LABEL, None, 0, 1);
            for entry in manifest.iter_all()? {
                let name = entry
                    .key
                    .last()
                    .ok_or_else(|| PackError::Corruption("empty key in pack names".into()))?;
                names.insert(name.to_string(), decode_lengths(&entry.value)?);
            }
        }

        self.registration = names.keys().cloned().collect();
        tracing::debug!(packs = names.len(), "loaded pack names");
        self.names = Some(names);
        Ok(())
    }

    /// Pack names in sorted order
    pub fn names(&mut self) -> Result<Vec<String>> {
        Ok(self.loaded()?.keys().cloned().collect())
    }

    pub fn pack_count(&mut self) -> Result<usize> {
        Ok(self.loaded()?.len())
    }

    pub fn contains(&mut self, name: &str) -> Result<bool> {
        Ok(self.loaded()?.contains_key(name))
    }

    /// Index lengths recorded for `name`
    pub fn index_sizes(&mut self, name: &str) -> Result<PerKind<u64>> {
        self.loaded()?
            .get(name)
            .cloned()
            .ok_or_else(|| PackError::UnknownPack(name.to_string()))
    }

    /// Descriptor for a listed pack
    pub fn get_pack_by_name(&mut self, name: &str) -> Result<Pack> {
        if let Some(pack) = self.packs.get(name) {
            return Ok(pack.clone());
        }

        let sizes = self.index_sizes(name)?;
        let layout = &self.layout;
        let indices = PerKind::from_fn(|kind| {
            Arc::new(SortedIndex::open(
                &layout.index_path(name, kind),
                name,
                Some(sizes[kind]),
                kind.reference_lists(),
                kind.key_elements(),
            ))
        });
        let pack = Pack::new(name, layout.pack_path(name), indices);
        self.packs.insert(name.to_string(), pack.clone());
        Ok(pack)
    }

    /// Every listed pack, sorted by name
    pub fn all_packs(&mut self) -> Result<Vec<Pack>> {
        self.names()?
            .iter()
            .map(|name| self.get_pack_by_name(name))
            .collect()
    }

    /// Register a new pack in memory; the manifest is written separately
    pub fn allocate(&mut self, name: &str, sizes: PerKind<u64>) -> Result<Pack> {
        self.require_write_lock()?;
        let names = self.loaded_mut()?;
        if names.contains_key(name) {
            return Err(PackError::DuplicatePack(name.to_string()));
        }
        names.insert(name.to_string(), sizes);
        self.registration.insert(0, name.to_string());

        let pack = self.get_pack_by_name(name)?;
        if let Some(combined) = &self.combined {
            for kind in IndexKind::ALL {
                combined[kind].insert_index(0, pack.graph_index(kind));
            }
        }
        Ok(pack)
    }

    /// Drop a pack from the in-memory manifest
    pub fn remove_pack(&mut self, name: &str) -> Result<()> {
        self.require_write_lock()?;
        if self.loaded_mut()?.remove(name).is_none() {
            return Err(PackError::UnknownPack(name.to_string()));
        }
        self.packs.remove(name);
        self.registration.retain(|n| n != name);
        self.combined = None;
        Ok(())
    }

    /// Write the manifest: temp file, fsync, rename
    pub fn save_pack_names(&mut self) -> Result<()> {
        self.require_write_lock()?;

        let mut builder = IndexBuilder::new(0, 1);
        for (name, sizes) in self.loaded()? {
            builder.add_node(Key::single(name.as_str()), encode_lengths(sizes), Vec::new())?;
        }
        let bytes = builder.finish()?;

        let temp = self.layout.manifest_temp_path();
        write_file(&temp, &bytes, self.sync)?;
        fs::rename(&temp, self.layout.manifest_path())?;

        tracing::info!(packs = builder.key_count(), "saved pack names");
        Ok(())
    }

    /// Move packs and their indices into `obsolete_packs/`
    pub fn obsolete_packs(&mut self, names: &[String]) -> Result<()> {
        self.require_write_lock()?;
        for name in names {
            move_if_present(&self.layout.pack_path(name), &self.layout.obsolete_pack_path(name))?;
            for kind in IndexKind::ALL {
                move_if_present(
                    &self.layout.index_path(name, kind),
                    &self.layout.obsolete_index_path(name, kind),
                )?;
            }
            self.packs.remove(name);
            tracing::info!(pack = %name, "obsoleted pack");
        }
        Ok(())
    }

    /// Forget everything read from disk; the next query reloads the manifest
    ///
    /// Write group layers stay registered.
    pub fn reset(&mut self) {
        self.names = None;
        self.packs.clear();
        self.registration.clear();
        self.combined = None;
    }

    // =========================================================================
    // Combined Indices
    // =========================================================================

    /// Union of every pack's index of `kind`, write group layer first
    pub fn combined_index(&mut self, kind: IndexKind) -> Result<Arc<CombinedIndex>> {
        if let Some(combined) = &self.combined {
            return Ok(Arc::clone(&combined[kind]));
        }

        self.ensure_loaded()?;
        let order = self.registration.clone();
        let packs = order
            .iter()
            .map(|name| self.get_pack_by_name(name))
            .collect::<Result<Vec<_>>>()?;

        let staging = self.staging.clone();
        let combined = PerKind::from_fn(|kind| {
            let mut sources: Vec<Arc<dyn GraphIndex>> = Vec::with_capacity(packs.len() + 1);
            if let Some(layers) = &staging {
                sources.push(Arc::clone(&layers[kind]) as Arc<dyn GraphIndex>);
            }
            sources.extend(packs.iter().map(|p| p.graph_index(kind)));
            Arc::new(CombinedIndex::new(sources))
        });

        let index = Arc::clone(&combined[kind]);
        self.combined = Some(combined);
        Ok(index)
    }

    /// Put a write group's indices in front of every combined index
    pub fn register_staging(&mut self, layers: PerKind<Arc<MemoryIndex>>) -> Result<()> {
        if self.staging.is_some() {
            return Err(PackError::WriteGroupAlreadyOpen);
        }
        if let Some(combined) = &self.combined {
            for kind in IndexKind::ALL {
                combined[kind].insert_index(0, Arc::clone(&layers[kind]) as Arc<dyn GraphIndex>);
            }
        }
        self.staging = Some(layers);
        Ok(())
    }

    /// Take the write group's indices out again
    pub fn unregister_staging(&mut self) {
        let Some(layers) = self.staging.take() else {
            return;
        };
        if let Some(combined) = &self.combined {
            for kind in IndexKind::ALL {
                combined[kind].remove_index(&layers[kind].label());
            }
        }
    }

    pub fn is_write_group_open(&self) -> bool {
        self.staging.is_some()
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Move a finished container into `packs/`, write its indices, allocate it
    ///
    /// An identical container already on disk is reused; a different one
    /// under the same name fails with `NameCollision`.
    pub fn publish(&mut self, finished: FinishedContainer, blobs: PerKind<Vec<u8>>) -> Result<Pack> {
        self.require_write_lock()?;
        let name = finished.name.clone();
        if self.contains(&name)? {
            discard_staging(&finished.path)?;
            return Err(PackError::DuplicatePack(name));
        }

        let destination = self.layout.pack_path(&name);
        if destination.exists() {
            if fs::read(&destination)? != fs::read(&finished.path)? {
                return Err(PackError::NameCollision { name });
            }
            fs::remove_file(&finished.path)?;
        } else {
            fs::rename(&finished.path, &destination)?;
        }

        for (kind, blob) in blobs.iter() {
            write_file(&self.layout.index_path(&name, kind), blob, self.sync)?;
        }
        let sizes = blobs.map(|_, blob| blob.len() as u64);

        let pack = self.allocate(&name, sizes)?;
        tracing::info!(
            pack = %name,
            size = finished.size,
            records = finished.record_count,
            "published pack"
        );
        Ok(pack)
    }

    /// Copy records from `sources` into a new published pack
    ///
    /// `None` when the selection copies nothing. When the copy is byte-for-byte
    /// one of the sources, that source is returned and nothing is published.
    /// The manifest is not saved.
    pub fn create_pack_from_packs(
        &mut self,
        sources: &[Pack],
        selection: KeySelection<'_>,
        suffix: &str,
    ) -> Result<Option<Pack>> {
        self.require_write_lock()?;
        if self.is_write_group_open() {
            return Err(PackError::Busy("cannot copy packs while a write group is open".into()));
        }
        if let KeySelection::Revisions { revision_ids, .. } = selection {
            if revision_ids.is_empty() {
                return Ok(None);
            }
        }

        let staging_name = uuid::Uuid::new_v4().to_string();
        let path = self.layout.upload_path(&staging_name, suffix);
        let mut builder = PackBuilder::create(&path, self.buffer_size, self.sync)?;
        tracing::debug!(sources = sources.len(), staging = %path.display(), "copying packs");

        if let Err(e) = builder.copy_from(sources, selection) {
            if let Err(abandon_err) = builder.abandon() {
                tracing::warn!(staging = %path.display(), "failed to remove staging pack: {}", abandon_err);
            }
            return Err(e);
        }

        let Some((finished, blobs)) = builder.finish()? else {
            return Ok(None);
        };

        // A source already holding every selected record reproduces its own bytes
        if let Some(existing) = sources.iter().find(|pack| pack.name() == finished.name) {
            tracing::debug!(pack = %existing.name(), "copy matches a source pack; keeping it");
            discard_staging(&finished.path)?;
            return Ok(Some(existing.clone()));
        }
        self.publish(finished, blobs).map(Some)
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Merge packs until the count is within the digit-sum bound
    ///
    /// Returns `false` (and writes nothing) when the repository is already
    /// packed well enough.
    pub fn autopack(&mut self) -> Result<bool> {
        self.require_write_lock()?;
        let total = self.combined_index(IndexKind::Revision)?.key_count()? as u64;
        let pack_count = self.pack_count()?;
        if max_pack_count(total) >= pack_count {
            return Ok(false);
        }

        let mut summaries = Vec::with_capacity(pack_count);
        for pack in self.all_packs()? {
            let revisions = pack.revision_count()? as u64;
            if revisions > 0 {
                summaries.push(PackSummary::new(pack.name(), revisions));
            }
        }

        let distribution = pack_distribution(total);
        let operations = plan(&summaries, &distribution);
        tracing::info!(
            total_revisions = total,
            packs = pack_count,
            operations = operations.len(),
            "autopacking"
        );

        self.execute_pack_operations(operations)?;
        Ok(true)
    }

    /// Merge every pack into one
    pub fn pack(&mut self) -> Result<bool> {
        self.require_write_lock()?;
        let packs = self.all_packs()?;
        if packs.len() < 2 {
            return Ok(false);
        }

        let mut operation = PackOperation::default();
        for pack in &packs {
            operation.revision_count += pack.revision_count()? as u64;
            operation.packs.push(pack.name().to_string());
        }
        tracing::info!(packs = packs.len(), revisions = operation.revision_count, "full pack");

        self.execute_pack_operations(vec![operation])?;
        Ok(true)
    }

    /// Build one pack per operation, save the manifest, then obsolete sources
    ///
    /// Operations naming fewer than two packs are skipped.
    pub fn execute_pack_operations(&mut self, operations: Vec<PackOperation>) -> Result<()> {
        self.require_write_lock()?;
        let mut superseded = Vec::new();

        for operation in operations {
            if operation.packs.len() < 2 {
                tracing::debug!(packs = ?operation.packs, "skipping single pack operation");
                continue;
            }

            // Sources in precedence order
            let sources = self
                .registration
                .clone()
                .iter()
                .filter(|name| operation.packs.contains(name))
                .map(|name| self.get_pack_by_name(name))
                .collect::<Result<Vec<_>>>()?;

            let created = self.create_pack_from_packs(&sources, KeySelection::All, "autopack")?;
            let kept = created.as_ref().map(Pack::name);
            let replaced: Vec<String> = operation
                .packs
                .iter()
                .filter(|name| Some(name.as_str()) != kept)
                .cloned()
                .collect();
            for name in &replaced {
                self.remove_pack(name)?;
            }
            tracing::info!(
                merged = operation.packs.len(),
                revisions = operation.revision_count,
                pack = kept.unwrap_or("<empty>"),
                "merged packs"
            );
            superseded.extend(replaced);
        }

        self.save_pack_names()?;
        self.obsolete_packs(&superseded)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Compare the manifest with the files on disk
    pub fn verify(&mut self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let listed = self.loaded()?.clone();

        for (name, sizes) in &listed {
            report.packs_checked += 1;

            let container = self.layout.pack_path(name);
            if !container.exists() {
                report.missing_files.push(container);
            }
            for kind in IndexKind::ALL {
                let path = self.layout.index_path(name, kind);
                match fs::metadata(&path) {
                    Ok(meta) if meta.len() != sizes[kind] => {
                        report.size_mismatches.push((path, sizes[kind], meta.len()));
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        report.missing_files.push(path);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        for entry in fs::read_dir(self.layout.packs_dir())? {
            let path = entry?.path();
            if let Some(name) = PackLayout::parse_pack_name(&path) {
                if !listed.contains_key(&name) {
                    report.unlisted_packs.push(name);
                }
            }
        }

        let active = self.staging_label();
        report.orphaned_uploads = self
            .upload_files()?
            .into_iter()
            .filter(|path| !is_staging_file(path, active.as_deref()))
            .collect();

        report.unlisted_packs.sort();
        report.orphaned_uploads.sort();
        Ok(report)
    }

    /// Delete every staging file; returns how many were removed
    pub fn discard_orphaned_uploads(&mut self) -> Result<usize> {
        self.require_write_lock()?;
        if self.is_write_group_open() {
            return Err(PackError::Busy("write group is open".into()));
        }

        let files = self.upload_files()?;
        for path in &files {
            tracing::warn!(path = %path.display(), "discarding orphaned upload");
            fs::remove_file(path)?;
        }
        Ok(files.len())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn loaded(&mut self) -> Result<&BTreeMap<String, PerKind<u64>>> {
        self.ensure_loaded()?;
        self.names
            .as_ref()
            .ok_or_else(|| PackError::Corruption("pack names not loaded".into()))
    }

    fn loaded_mut(&mut self) -> Result<&mut BTreeMap<String, PerKind<u64>>> {
        self.ensure_loaded()?;
        self.names
            .as_mut()
            .ok_or_else(|| PackError::Corruption("pack names not loaded".into()))
    }

    fn staging_label(&self) -> Option<String> {
        self.staging
            .as_ref()
            .map(|layers| layers[IndexKind::Revision].label().to_string())
    }

    fn upload_files(&self) -> Result<Vec<PathBuf>> {
        let dir = self.layout.upload_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        Ok(files)
    }
}

/// Manifest value: the four index lengths in kind order
fn encode_lengths(sizes: &PerKind<u64>) -> Vec<u8> {
    let mut out = Vec::with_capacity(MANIFEST_VALUE_LEN);
    for (_, size) in sizes.iter() {
        out.extend_from_slice(&size.to_le_bytes());
    }
    out
}

fn decode_lengths(value: &[u8]) -> Result<PerKind<u64>> {
    if value.len() != MANIFEST_VALUE_LEN {
        return Err(PackError::Corruption(format!(
            "manifest value is {} bytes, expected {}",
            value.len(),
            MANIFEST_VALUE_LEN
        )));
    }
    let mut sizes = PerKind::default();
    for (i, kind) in IndexKind::ALL.into_iter().enumerate() {
        let mut word = [0u8; 8];
        word.copy_from_slice(&value[i * 8..i * 8 + 8]);
        sizes[kind] = u64::from_le_bytes(word);
    }
    Ok(sizes)
}

fn write_file(path: &Path, bytes: &[u8], sync: SyncStrategy) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    if sync == SyncStrategy::Always {
        file.sync_all()?;
    }
    Ok(())
}

fn move_if_present(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %from.display(), "file to obsolete is already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete a finished staging container that will not be published
fn discard_staging(path: &Path) -> Result<()> {
    fs::remove_file(path)?;
    tracing::debug!(staging = %path.display(), "discarded staging container");
    Ok(())
}

/// Whether `path` is `upload/<label>.<suffix>`
fn is_staging_file(path: &Path, label: Option<&str>) -> bool {
    match (label, path.file_stem()) {
        (Some(label), Some(stem)) => stem == std::ffi::OsStr::new(label),
        _ => false,
    }
}
