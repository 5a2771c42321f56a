//! Concurrency tests
//!
//! These tests verify:
//! - Readers on other threads see consistent data while a writer commits
//! - Iterators keep their snapshot while packs are added and compacted away
//! - The advisory lock keeps a second writer out

use std::sync::atomic::{AtomicBool, Ordering};

use packstore::config::SyncStrategy;
use packstore::pack::IndexKind;
use packstore::{Config, Key, PackError, PackRepository};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_at(temp: &TempDir, autopack: bool) -> Config {
    Config::builder()
        .repo_dir(temp.path().join("repo"))
        .sync_strategy(SyncStrategy::Never)
        .autopack(autopack)
        .build()
}

fn commit_revision(repo: &PackRepository, id: &str) {
    repo.start_write_group().unwrap();
    repo.add_revision(id, vec![], format!("payload {}", id).as_bytes())
        .unwrap();
    repo.commit_write_group().unwrap();
}

// =============================================================================
// Reader / Writer Tests
// =============================================================================

#[test]
fn test_readers_see_committed_records_during_writes() {
    let temp = TempDir::new().unwrap();
    let repo = PackRepository::init(config_at(&temp, true)).unwrap();
    repo.lock_write().unwrap();
    for i in 0..5 {
        commit_revision(&repo, &format!("seed-{}", i));
    }

    let done = AtomicBool::new(false);
    crossbeam::scope(|s| {
        for _ in 0..4 {
            s.spawn(|_| {
                let mut rounds = 0;
                while !done.load(Ordering::SeqCst) || rounds == 0 {
                    for i in 0..5 {
                        let id = format!("seed-{}", i);
                        let payload = repo
                            .get_record(IndexKind::Revision, &Key::single(id.as_str()))
                            .unwrap();
                        assert_eq!(payload.as_deref(), Some(format!("payload {}", id).as_bytes()));
                    }
                    rounds += 1;
                }
            });
        }

        // Crosses the autopack threshold at 10 revisions
        for i in 0..20 {
            commit_revision(&repo, &format!("new-{:02}", i));
        }
        done.store(true, Ordering::SeqCst);
    })
    .unwrap();

    assert_eq!(repo.index(IndexKind::Revision).unwrap().key_count().unwrap(), 25);
    // 25 revisions allow 2 + 5 = 7 packs
    assert!(repo.pack_names().unwrap().len() <= 7);
}

#[test]
fn test_iterators_outlive_compaction() {
    let temp = TempDir::new().unwrap();
    let repo = PackRepository::init(config_at(&temp, false)).unwrap();
    repo.lock_write().unwrap();
    for i in 0..6 {
        commit_revision(&repo, &format!("r{}", i));
    }

    let index = repo.index(IndexKind::Revision).unwrap();
    let before = index.iter_all().unwrap();
    assert_eq!(index.source_count(), 6);

    crossbeam::scope(|s| {
        let reader = s.spawn(move |_| before.map(|e| e.entry.key).collect::<Vec<_>>());
        repo.pack().unwrap();
        let keys = reader.join().unwrap();
        assert_eq!(keys.len(), 6);
    })
    .unwrap();

    assert_eq!(repo.pack_names().unwrap().len(), 1);
    assert_eq!(repo.index(IndexKind::Revision).unwrap().key_count().unwrap(), 6);
}

#[test]
fn test_reads_during_repeated_full_packs() {
    let temp = TempDir::new().unwrap();
    let repo = PackRepository::init(config_at(&temp, false)).unwrap();
    repo.lock_write().unwrap();
    commit_revision(&repo, "base");

    let done = AtomicBool::new(false);
    crossbeam::scope(|s| {
        for _ in 0..4 {
            s.spawn(|_| {
                let key = Key::single("base");
                let mut rounds = 0;
                while !done.load(Ordering::SeqCst) || rounds == 0 {
                    let payload = repo.get_record(IndexKind::Revision, &key).unwrap();
                    assert_eq!(payload.as_deref(), Some(&b"payload base"[..]));
                    rounds += 1;
                }
            });
        }

        // Every round moves the pack holding "base" to obsolete_packs/
        for i in 0..10 {
            commit_revision(&repo, &format!("r{}", i));
            assert!(repo.pack().unwrap());
        }
        done.store(true, Ordering::SeqCst);
    })
    .unwrap();

    assert_eq!(repo.pack_names().unwrap().len(), 1);
    assert_eq!(repo.index(IndexKind::Revision).unwrap().key_count().unwrap(), 11);
}

#[test]
fn test_many_threads_share_one_combined_index() {
    let temp = TempDir::new().unwrap();
    let repo = PackRepository::init(config_at(&temp, false)).unwrap();
    repo.lock_write().unwrap();
    for i in 0..8 {
        commit_revision(&repo, &format!("r{}", i));
    }
    let index = repo.index(IndexKind::Revision).unwrap();

    crossbeam::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|_| index.key_count().unwrap()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 8);
        }
    })
    .unwrap();
}

// =============================================================================
// Lock Tests
// =============================================================================

#[test]
fn test_second_writer_is_locked_out() {
    let temp = TempDir::new().unwrap();
    let first = PackRepository::init(config_at(&temp, false)).unwrap();
    let second = PackRepository::open(config_at(&temp, false)).unwrap();

    first.lock_write().unwrap();
    let err = second.lock_write().unwrap_err();
    assert!(matches!(err, PackError::LockContention(_)));

    first.unlock().unwrap();
    second.lock_write().unwrap();
    assert!(second.is_write_locked());
}

#[test]
fn test_second_repository_sees_new_packs_after_refresh() {
    let temp = TempDir::new().unwrap();
    let writer = PackRepository::init(config_at(&temp, false)).unwrap();
    let reader = PackRepository::open(config_at(&temp, false)).unwrap();
    assert!(reader.pack_names().unwrap().is_empty());

    writer.lock_write().unwrap();
    commit_revision(&writer, "r1");

    // Cached view until refreshed
    assert!(reader.pack_names().unwrap().is_empty());
    reader.refresh().unwrap();
    assert_eq!(reader.pack_names().unwrap(), writer.pack_names().unwrap());
    assert_eq!(
        reader.get_record(IndexKind::Revision, &Key::single("r1")).unwrap().as_deref(),
        Some(&b"payload r1"[..])
    );
}

#[test]
fn test_init_refuses_existing_repository() {
    let temp = TempDir::new().unwrap();
    PackRepository::init(config_at(&temp, false)).unwrap();

    assert!(matches!(
        PackRepository::init(config_at(&temp, false)),
        Err(PackError::Config(_))
    ));
}

#[test]
fn test_open_without_create_if_missing() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .repo_dir(temp.path().join("absent"))
        .create_if_missing(false)
        .build();

    assert!(matches!(PackRepository::open(config), Err(PackError::Config(_))));
}
