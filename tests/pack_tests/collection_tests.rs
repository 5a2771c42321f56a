//! Tests for PackCollection
//!
//! These tests verify:
//! - Write lock enforcement on every mutation
//! - Manifest save/load (a sorted index keyed by pack name)
//! - Registration order of the combined indices
//! - Obsoleting packs and verifying the layout

use std::fs;

use packstore::config::SyncStrategy;
use packstore::index::{GraphIndex, Key, SortedIndex};
use packstore::lock::LockMode;
use packstore::pack::{IndexKind, PackCollection, PackLayout, PerKind};
use packstore::PackError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_layout() -> (TempDir, PackLayout) {
    let temp_dir = TempDir::new().unwrap();
    let layout = PackLayout::new(temp_dir.path());
    layout.create_dirs().unwrap();
    (temp_dir, layout)
}

fn locked_collection(layout: &PackLayout) -> PackCollection {
    let mut collection = PackCollection::new(layout.clone(), 1024, SyncStrategy::Never);
    collection.set_lock_mode(LockMode::Write);
    collection
}

fn sizes(base: u64) -> PerKind<u64> {
    PerKind::from_fn(|kind| base + kind as u64)
}

fn revision_labels(collection: &mut PackCollection) -> Vec<String> {
    collection
        .combined_index(IndexKind::Revision)
        .unwrap()
        .labels()
        .iter()
        .map(|l| l.to_string())
        .collect()
}

/// Empty stand-ins for a pack's container and index files
fn touch_pack_files(layout: &PackLayout, name: &str) {
    fs::write(layout.pack_path(name), b"").unwrap();
    for kind in IndexKind::ALL {
        fs::write(layout.index_path(name, kind), b"").unwrap();
    }
}

// =============================================================================
// Lock Tests
// =============================================================================

#[test]
fn test_mutations_require_write_lock() {
    let (_temp, layout) = setup_layout();
    let mut collection = PackCollection::new(layout, 1024, SyncStrategy::Never);

    assert!(matches!(collection.allocate("a", sizes(1)), Err(PackError::NotWriteLocked)));
    assert!(matches!(collection.remove_pack("a"), Err(PackError::NotWriteLocked)));
    assert!(matches!(collection.save_pack_names(), Err(PackError::NotWriteLocked)));
    assert!(matches!(collection.autopack(), Err(PackError::NotWriteLocked)));
    assert!(matches!(collection.pack(), Err(PackError::NotWriteLocked)));

    // Reads are fine
    assert_eq!(collection.pack_count().unwrap(), 0);
}

// =============================================================================
// Manifest Tests
// =============================================================================

#[test]
fn test_missing_manifest_loads_empty() {
    let (_temp, layout) = setup_layout();
    let mut collection = locked_collection(&layout);

    collection.ensure_loaded().unwrap();
    assert!(collection.names().unwrap().is_empty());
}

#[test]
fn test_allocate_rejects_duplicate_name() {
    let (_temp, layout) = setup_layout();
    let mut collection = locked_collection(&layout);

    collection.allocate("abc", sizes(1)).unwrap();
    assert!(matches!(
        collection.allocate("abc", sizes(2)),
        Err(PackError::DuplicatePack(name)) if name == "abc"
    ));
    assert_eq!(collection.index_sizes("abc").unwrap(), sizes(1));
}

#[test]
fn test_save_and_reload_manifest() {
    let (_temp, layout) = setup_layout();
    {
        let mut collection = locked_collection(&layout);
        collection.allocate("bbb", sizes(10)).unwrap();
        collection.allocate("aaa", sizes(20)).unwrap();
        collection.save_pack_names().unwrap();
    }

    assert!(!layout.manifest_temp_path().exists());

    let mut collection = PackCollection::new(layout.clone(), 1024, SyncStrategy::Never);
    assert_eq!(collection.names().unwrap(), vec!["aaa", "bbb"]);
    assert_eq!(collection.index_sizes("aaa").unwrap(), sizes(20));
    assert_eq!(collection.index_sizes("bbb").unwrap(), sizes(10));
}

#[test]
fn test_manifest_is_a_sorted_index() {
    let (_temp, layout) = setup_layout();
    let mut collection = locked_collection(&layout);
    collection.allocate("p2", sizes(1)).unwrap();
    collection.allocate("p1", sizes(5)).unwrap();
    collection.save_pack_names().unwrap();

    let manifest = SortedIndex::open(&layout.manifest_path(), "manifest", None, 0, 1);
    let entries: Vec<_> = manifest.iter_all().unwrap().collect();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].key, Key::single("p1"));
    assert_eq!(entries[0].value.len(), 32);
    assert_eq!(&entries[0].value[0..8], &5u64.to_le_bytes());
    assert_eq!(&entries[0].value[24..32], &8u64.to_le_bytes());
    assert!(entries[0].references.is_empty());
}

#[test]
fn test_remove_unknown_pack() {
    let (_temp, layout) = setup_layout();
    let mut collection = locked_collection(&layout);

    assert!(matches!(collection.remove_pack("nope"), Err(PackError::UnknownPack(_))));
    assert!(matches!(collection.get_pack_by_name("nope"), Err(PackError::UnknownPack(_))));
}

#[test]
fn test_reset_rereads_manifest() {
    let (_temp, layout) = setup_layout();
    let mut collection = locked_collection(&layout);
    collection.allocate("kept", sizes(1)).unwrap();
    collection.save_pack_names().unwrap();
    collection.allocate("unsaved", sizes(1)).unwrap();

    collection.reset();
    assert_eq!(collection.names().unwrap(), vec!["kept"]);
}

// =============================================================================
// Registration Order Tests
// =============================================================================

#[test]
fn test_loaded_packs_register_in_name_order() {
    let (_temp, layout) = setup_layout();
    {
        let mut collection = locked_collection(&layout);
        for name in ["c", "a", "b"] {
            collection.allocate(name, sizes(0)).unwrap();
        }
        collection.save_pack_names().unwrap();
    }

    let mut collection = locked_collection(&layout);
    assert_eq!(revision_labels(&mut collection), vec!["a", "b", "c"]);
}

#[test]
fn test_allocated_pack_goes_to_front() {
    let (_temp, layout) = setup_layout();
    let mut collection = locked_collection(&layout);
    collection.allocate("m", sizes(0)).unwrap();
    collection.allocate("z", sizes(0)).unwrap();

    // Built after both allocations: most recent first
    assert_eq!(revision_labels(&mut collection), vec!["z", "m"]);

    // Updated in place by the next allocation
    let combined = collection.combined_index(IndexKind::Text).unwrap();
    collection.allocate("a", sizes(0)).unwrap();
    assert_eq!(combined.source_count(), 3);
    assert_eq!(revision_labels(&mut collection), vec!["a", "z", "m"]);
}

#[test]
fn test_remove_pack_rebuilds_combined_index() {
    let (_temp, layout) = setup_layout();
    let mut collection = locked_collection(&layout);
    for name in ["x", "y", "z"] {
        collection.allocate(name, sizes(0)).unwrap();
    }
    let before = collection.combined_index(IndexKind::Revision).unwrap();

    collection.remove_pack("y").unwrap();

    assert_eq!(revision_labels(&mut collection), vec!["z", "x"]);
    // Handles taken earlier are untouched
    assert_eq!(before.source_count(), 3);
}

// =============================================================================
// Obsolete / Verify Tests
// =============================================================================

#[test]
fn test_obsolete_moves_pack_files() {
    let (_temp, layout) = setup_layout();
    let mut collection = locked_collection(&layout);
    touch_pack_files(&layout, "old");

    collection.obsolete_packs(&["old".to_string()]).unwrap();

    assert!(!layout.pack_path("old").exists());
    assert!(layout.obsolete_pack_path("old").exists());
    for kind in IndexKind::ALL {
        assert!(!layout.index_path("old", kind).exists());
        assert!(layout.obsolete_index_path("old", kind).exists());
    }
}

#[test]
fn test_obsolete_tolerates_missing_files() {
    let (_temp, layout) = setup_layout();
    let mut collection = locked_collection(&layout);

    collection.obsolete_packs(&["never-existed".to_string()]).unwrap();
}

#[test]
fn test_verify_reports_missing_and_mismatched_files() {
    let (_temp, layout) = setup_layout();
    let mut collection = locked_collection(&layout);
    collection.allocate("ghost", sizes(0)).unwrap();
    collection.allocate("real", PerKind::from_fn(|_| 0)).unwrap();
    touch_pack_files(&layout, "real");
    fs::write(layout.index_path("real", IndexKind::Text), b"grown").unwrap();
    fs::write(layout.pack_path("stray"), b"").unwrap();
    fs::write(layout.upload_path("leftover", "pack"), b"").unwrap();

    let report = collection.verify().unwrap();

    assert_eq!(report.packs_checked, 2);
    // ghost: container + four indices
    assert_eq!(report.missing_files.len(), 5);
    assert_eq!(
        report.size_mismatches,
        vec![(layout.index_path("real", IndexKind::Text), 0, 5)]
    );
    assert_eq!(report.unlisted_packs, vec!["stray"]);
    assert_eq!(report.orphaned_uploads, vec![layout.upload_path("leftover", "pack")]);
    assert!(!report.is_clean());
}

#[test]
fn test_discard_orphaned_uploads() {
    let (_temp, layout) = setup_layout();
    let mut collection = locked_collection(&layout);
    fs::write(layout.upload_path("one", "pack"), b"").unwrap();
    fs::write(layout.upload_path("two", "autopack"), b"").unwrap();

    assert_eq!(collection.discard_orphaned_uploads().unwrap(), 2);
    assert!(collection.verify().unwrap().orphaned_uploads.is_empty());
}

#[test]
fn test_autopack_and_pack_are_noops_on_empty_collection() {
    let (_temp, layout) = setup_layout();
    let mut collection = locked_collection(&layout);

    assert!(!collection.autopack().unwrap());
    assert!(!collection.pack().unwrap());
    assert!(!layout.manifest_path().exists());
}
