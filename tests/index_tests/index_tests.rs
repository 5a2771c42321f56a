//! Tests for the index layer
//!
//! These tests verify:
//! - Builder validation (duplicates, key shape, reference lists)
//! - Serialized indices round-trip through SortedIndex
//! - Corruption detection on load
//! - MemoryIndex visibility while it grows

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use packstore::index::{GraphIndex, IndexBuilder, Key, MemoryIndex, SortedIndex};
use packstore::PackError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_index() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.rix");
    (temp_dir, path)
}

fn rev(id: &str) -> Key {
    Key::single(id)
}

/// Revision-shaped builder (1 reference list, 1 key element) with `count` nodes
fn revision_builder(count: usize) -> IndexBuilder {
    let mut builder = IndexBuilder::new(1, 1);
    // Insert in reverse to prove ordering comes from the builder
    for i in (0..count).rev() {
        let parents = if i == 0 { vec![] } else { vec![rev(&format!("rev-{:04}", i - 1))] };
        builder
            .add_node(rev(&format!("rev-{:04}", i)), format!("value{}", i).into_bytes(), vec![parents])
            .unwrap();
    }
    builder
}

fn write_index(path: &PathBuf, builder: &mut IndexBuilder) -> u64 {
    let bytes = builder.finish().unwrap();
    fs::write(path, &bytes).unwrap();
    bytes.len() as u64
}

// =============================================================================
// Builder Tests
// =============================================================================

#[test]
fn test_builder_rejects_duplicate_key() {
    let mut builder = IndexBuilder::new(1, 1);
    builder.add_node(rev("a"), b"1".to_vec(), vec![vec![]]).unwrap();

    let result = builder.add_node(rev("a"), b"2".to_vec(), vec![vec![]]);
    assert!(matches!(result, Err(PackError::DuplicateKey(_))));
    assert_eq!(builder.key_count(), 1);
}

#[test]
fn test_builder_rejects_wrong_key_width() {
    let mut builder = IndexBuilder::new(2, 2);

    let result = builder.add_node(rev("only-one"), vec![], vec![vec![], vec![]]);
    assert!(matches!(result, Err(PackError::InvalidKey { expected: 2, .. })));

    let result = builder.add_node(Key::pair("file", ""), vec![], vec![vec![], vec![]]);
    assert!(matches!(result, Err(PackError::InvalidKey { .. })));
}

#[test]
fn test_builder_rejects_wrong_reference_list_count() {
    let mut builder = IndexBuilder::new(0, 1);

    let result = builder.add_node(rev("sig"), vec![], vec![vec![]]);
    assert!(matches!(
        result,
        Err(PackError::BadReferenceLists { expected: 0, actual: 1, .. })
    ));
}

#[test]
fn test_builder_rejects_reference_of_wrong_width() {
    let mut builder = IndexBuilder::new(1, 2);

    let result = builder.add_node(Key::pair("f", "r2"), vec![], vec![vec![rev("r1")]]);
    assert!(matches!(result, Err(PackError::InvalidKey { .. })));
}

#[test]
fn test_builder_finish_seals() {
    let mut builder = revision_builder(3);
    builder.finish().unwrap();

    assert!(builder.is_finished());
    assert!(matches!(
        builder.add_node(rev("late"), vec![], vec![vec![]]),
        Err(PackError::BuilderFinished)
    ));
    // Already-buffered entries stay readable
    assert_eq!(builder.entries().len(), 3);
}

// =============================================================================
// SortedIndex Tests
// =============================================================================

#[test]
fn test_round_trip_preserves_order_and_content() {
    let (_temp, path) = setup_temp_index();
    let mut builder = revision_builder(50);
    let expected = builder.entries();
    let size = write_index(&path, &mut builder);

    let index = SortedIndex::open(&path, "pack-a", Some(size), 1, 1);
    assert!(!index.is_loaded());

    let entries: Vec<_> = index.iter_all().unwrap().collect();
    assert!(index.is_loaded());
    assert_eq!(entries, expected);

    let keys: Vec<Key> = entries.iter().map(|e| e.key.clone()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(keys, sorted);
}

#[test]
fn test_iteration_is_restartable() {
    let (_temp, path) = setup_temp_index();
    let size = write_index(&path, &mut revision_builder(10));
    let index = SortedIndex::open(&path, "pack-a", Some(size), 1, 1);

    let first: Vec<_> = index.iter_all().unwrap().collect();
    let second: Vec<_> = index.iter_all().unwrap().collect();
    assert_eq!(first, second);
    assert_eq!(index.key_count().unwrap(), 10);
}

#[test]
fn test_iter_keys_skips_absent_keys() {
    let (_temp, path) = setup_temp_index();
    let size = write_index(&path, &mut revision_builder(20));
    let index = SortedIndex::open(&path, "pack-a", Some(size), 1, 1);

    let wanted: BTreeSet<Key> = [rev("rev-0003"), rev("missing"), rev("rev-0017")]
        .into_iter()
        .collect();
    let found: Vec<Key> = index.iter_keys(&wanted).unwrap().map(|e| e.key).collect();

    assert_eq!(found, vec![rev("rev-0003"), rev("rev-0017")]);
}

#[test]
fn test_references_survive_round_trip() {
    let (_temp, path) = setup_temp_index();
    let mut builder = IndexBuilder::new(2, 2);
    builder
        .add_node(
            Key::pair("file-1", "r2"),
            b"pos".to_vec(),
            vec![vec![Key::pair("file-1", "r1")], vec![Key::pair("file-1", "r1")]],
        )
        .unwrap();
    let size = write_index(&path, &mut builder);

    let index = SortedIndex::open(&path, "p", Some(size), 2, 2);
    let entry = index.iter_all().unwrap().next().unwrap();
    assert_eq!(entry.references[0], vec![Key::pair("file-1", "r1")]);
    assert_eq!(entry.references[1], vec![Key::pair("file-1", "r1")]);
}

#[test]
fn test_empty_index() {
    let (_temp, path) = setup_temp_index();
    let size = write_index(&path, &mut IndexBuilder::new(0, 1));

    let index = SortedIndex::open(&path, "p", Some(size), 0, 1);
    assert_eq!(index.key_count().unwrap(), 0);
    assert!(index.iter_all().unwrap().next().is_none());
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_flipped_body_byte_fails_checksum() {
    let (_temp, path) = setup_temp_index();
    let size = write_index(&path, &mut revision_builder(5));

    let mut bytes = fs::read(&path).unwrap();
    bytes[30] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let index = SortedIndex::open(&path, "p", Some(size), 1, 1);
    assert!(matches!(index.key_count(), Err(PackError::ChecksumMismatch { .. })));
}

#[test]
fn test_size_mismatch_detected() {
    let (_temp, path) = setup_temp_index();
    let size = write_index(&path, &mut revision_builder(5));

    let index = SortedIndex::open(&path, "p", Some(size + 1), 1, 1);
    assert!(matches!(index.key_count(), Err(PackError::Corruption(_))));
}

#[test]
fn test_shape_mismatch_detected() {
    let (_temp, path) = setup_temp_index();
    let size = write_index(&path, &mut revision_builder(5));

    // Opened as a text index
    let index = SortedIndex::open(&path, "p", Some(size), 2, 2);
    assert!(matches!(index.key_count(), Err(PackError::Corruption(_))));
}

#[test]
fn test_bad_magic_detected() {
    let (_temp, path) = setup_temp_index();
    let size = write_index(&path, &mut revision_builder(2));

    let mut bytes = fs::read(&path).unwrap();
    bytes[0..4].copy_from_slice(b"NOPE");
    fs::write(&path, &bytes).unwrap();

    let index = SortedIndex::open(&path, "p", Some(size), 1, 1);
    assert!(matches!(index.key_count(), Err(PackError::Corruption(_))));
}

#[test]
fn test_missing_file_is_io_error() {
    let (_temp, path) = setup_temp_index();

    let index = SortedIndex::open(&path, "p", None, 1, 1);
    assert!(matches!(index.key_count(), Err(PackError::Io(_))));
}

// =============================================================================
// MemoryIndex Tests
// =============================================================================

#[test]
fn test_memory_index_visible_while_growing() {
    let index = MemoryIndex::new("staging", 1, 1);
    index.add_node(rev("b"), vec![], vec![vec![]]).unwrap();

    let before: Vec<Key> = index.iter_all().unwrap().map(|e| e.key).collect();
    assert_eq!(before, vec![rev("b")]);

    index.add_node(rev("a"), vec![], vec![vec![]]).unwrap();
    let after: Vec<Key> = index.iter_all().unwrap().map(|e| e.key).collect();
    assert_eq!(after, vec![rev("a"), rev("b")]);
}

#[test]
fn test_memory_index_iterator_keeps_snapshot() {
    let index = MemoryIndex::new("staging", 0, 1);
    index.add_node(rev("a"), vec![], vec![]).unwrap();

    let iter = index.iter_all().unwrap();
    index.add_node(rev("b"), vec![], vec![]).unwrap();

    assert_eq!(iter.count(), 1);
    assert_eq!(index.key_count().unwrap(), 2);
}

#[test]
fn test_memory_index_rejects_duplicates() {
    let index = MemoryIndex::new("staging", 0, 1);
    index.add_node(rev("a"), vec![], vec![]).unwrap();

    assert!(matches!(
        index.add_node(rev("a"), vec![], vec![]),
        Err(PackError::DuplicateKey(_))
    ));
    assert_eq!(index.len(), 1);
}
