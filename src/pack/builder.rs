//! Pack Builder
//!
//! Streams records from source packs into a new staging container.
//!
//! ## Copy Strategy
//! 1. Select entries through a combined index over the sources (first source
//!    holding a key wins, so every key is copied once)
//! 2. Group the entries by source pack
//! 3. Within a source, sort by offset and read in one forward pass
//! 4. Append the framed bytes verbatim; only the position changes, key and
//!    references are copied as they are

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::config::SyncStrategy;
use crate::error::Result;
use crate::index::{CombinedIndex, IndexBuilder, IndexEntry, Key, SourcedEntry};
use crate::storage::{ContainerReader, ContainerWriter, FinishedContainer, Position};
use crate::PackError;

use super::{IndexKind, Pack, PerKind};

/// Supplies the text keys a set of revisions introduced
///
/// Implemented by whatever understands the inventory record format; the pack
/// layer only moves bytes.
pub trait TextKeyResolver {
    /// `inventories` holds the (key, payload) of every copied inventory record
    fn text_keys(&self, revision_ids: &[String], inventories: &[(Key, Bytes)]) -> Result<Vec<Key>>;
}

/// Which records a copy takes from its sources
#[derive(Clone, Copy)]
pub enum KeySelection<'a> {
    /// Every record of every source
    All,
    /// The records introduced by these revisions
    Revisions {
        revision_ids: &'a [String],
        resolver: &'a dyn TextKeyResolver,
    },
}

/// Staging container plus four index builders
pub struct PackBuilder {
    container: ContainerWriter,
    indices: PerKind<IndexBuilder>,
    sync: SyncStrategy,
}

impl PackBuilder {
    /// Open a staging container at `path`
    pub fn create(path: &Path, buffer_size: usize, sync: SyncStrategy) -> Result<Self> {
        Ok(Self {
            container: ContainerWriter::create(path, buffer_size)?,
            indices: PerKind::from_fn(|kind| IndexBuilder::new(kind.reference_lists(), kind.key_elements())),
            sync,
        })
    }

    /// Records copied so far, all kinds
    pub fn key_count(&self) -> usize {
        self.indices.iter().map(|(_, index)| index.key_count()).sum()
    }

    pub fn index(&self, kind: IndexKind) -> &IndexBuilder {
        &self.indices[kind]
    }

    pub fn staging_path(&self) -> &Path {
        self.container.path()
    }

    /// Copy the selected records of all four kinds from `sources`
    ///
    /// `sources` are in precedence order. A filtered revision, inventory or
    /// text key that no source holds fails with `MissingRecord`; signatures are
    /// optional.
    pub fn copy_from(&mut self, sources: &[Pack], selection: KeySelection<'_>) -> Result<()> {
        let containers: HashMap<Arc<str>, PathBuf> = sources
            .iter()
            .map(|p| (Arc::<str>::from(p.name()), p.location().to_path_buf()))
            .collect();
        let combined = |kind: IndexKind| {
            CombinedIndex::new(sources.iter().map(|p| p.graph_index(kind)).collect())
        };

        match selection {
            KeySelection::All => {
                for kind in IndexKind::ALL {
                    let entries: Vec<SourcedEntry> = combined(kind).iter_all()?.collect();
                    self.copy_nodes(kind, entries, &containers, false)?;
                }
            }
            KeySelection::Revisions {
                revision_ids,
                resolver,
            } => {
                let revision_keys: BTreeSet<Key> =
                    revision_ids.iter().map(|id| Key::single(id.as_str())).collect();

                let entries = select_required(&combined(IndexKind::Revision), IndexKind::Revision, &revision_keys)?;
                self.copy_nodes(IndexKind::Revision, entries, &containers, false)?;

                // Same keyspace as revisions
                let entries = select_required(&combined(IndexKind::Inventory), IndexKind::Inventory, &revision_keys)?;
                let inventories = self.copy_nodes(IndexKind::Inventory, entries, &containers, true)?;

                let text_keys: BTreeSet<Key> =
                    resolver.text_keys(revision_ids, &inventories)?.into_iter().collect();
                let entries = select_required(&combined(IndexKind::Text), IndexKind::Text, &text_keys)?;
                self.copy_nodes(IndexKind::Text, entries, &containers, false)?;

                let entries: Vec<SourcedEntry> =
                    combined(IndexKind::Signature).iter_keys(&revision_keys)?.collect();
                self.copy_nodes(IndexKind::Signature, entries, &containers, false)?;
            }
        }
        Ok(())
    }

    /// Copy entries of one kind, grouped per source and sorted by offset
    ///
    /// When `collect_payloads` is set, returns the payload of every copied
    /// record keyed by its key.
    fn copy_nodes(
        &mut self,
        kind: IndexKind,
        entries: Vec<SourcedEntry>,
        containers: &HashMap<Arc<str>, PathBuf>,
        collect_payloads: bool,
    ) -> Result<Vec<(Key, Bytes)>> {
        let mut groups: BTreeMap<Arc<str>, Vec<(Position, IndexEntry)>> = BTreeMap::new();
        for SourcedEntry { source, entry } in entries {
            let position = Position::from_bytes(&entry.value)?;
            groups.entry(source).or_default().push((position, entry));
        }

        let mut payloads = Vec::new();
        let mut copied = 0usize;
        for (source, mut items) in groups {
            let path = containers.get(&source).ok_or_else(|| {
                PackError::Corruption(format!("no container for source {}", source))
            })?;
            items.sort_by_key(|(position, _)| position.offset);

            let positions: Vec<Position> = items.iter().map(|(p, _)| *p).collect();
            let mut reader = ContainerReader::open(path)?;
            let raws = reader.readv(&positions)?;

            for ((position, entry), raw) in items.into_iter().zip(raws) {
                let payload = crate::storage::parse_record(&raw, position.offset)?;
                let new_position = self.container.add_raw_record(&raw)?;
                if collect_payloads {
                    payloads.push((entry.key.clone(), payload));
                }
                self.indices[kind].add_node(entry.key, new_position.to_bytes(), entry.references)?;
                copied += 1;
            }
        }

        tracing::debug!(kind = %kind, copied, "copied records");
        Ok(payloads)
    }

    /// Seal the container and serialize the indices
    ///
    /// Returns `None` (and deletes the staging file) when nothing was copied.
    pub fn finish(mut self) -> Result<Option<(FinishedContainer, PerKind<Vec<u8>>)>> {
        if self.key_count() == 0 {
            self.container.abandon()?;
            return Ok(None);
        }
        let blobs = PerKind::try_from_fn(|kind| self.indices[kind].finish())?;
        let finished = self.container.finish(self.sync)?;
        Ok(Some((finished, blobs)))
    }

    /// Throw the staging container away
    pub fn abandon(self) -> Result<()> {
        self.container.abandon()
    }
}

/// Entries for `wanted`, failing on the first key no source holds
fn select_required(
    combined: &CombinedIndex,
    kind: IndexKind,
    wanted: &BTreeSet<Key>,
) -> Result<Vec<SourcedEntry>> {
    let entries: Vec<SourcedEntry> = combined.iter_keys(wanted)?.collect();
    if entries.len() != wanted.len() {
        let present: BTreeSet<&Key> = entries.iter().map(|e| &e.entry.key).collect();
        if let Some(missing) = wanted.iter().find(|k| !present.contains(k)) {
            return Err(PackError::MissingRecord {
                kind: kind.name().to_string(),
                key: missing.to_string(),
            });
        }
    }
    Ok(entries)
}
