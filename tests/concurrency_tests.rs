//! Concurrent-backend scenarios: foreign-backend rejection (spec.md §8 S6)
//! and lock contention across real OS threads sharing one coordinator,
//! mirroring the teacher crate's own thread-based concurrency tests.

use std::sync::Arc;
use std::thread;

use tempfile::NamedTempFile;

use twophase_core::collab::memory::{
    InMemoryClog, InMemoryProcArray, InMemoryStorage, InMemorySubxactMap, NullDistributedXact,
    ResourceManagerRegistry,
};
use twophase_core::config::TwoPhaseConfig;
use twophase_core::coordinator::{PrepareInput, TwoPhaseCoordinator};
use twophase_core::ids::Gid;
use twophase_core::wal::FileWal;
use twophase_core::{BackendLockedGXact, TwoPhaseError};

fn gid(s: &str) -> Gid {
    Gid::new(s.as_bytes().to_vec()).unwrap()
}

fn empty_input() -> PrepareInput {
    PrepareInput {
        subxacts: vec![],
        commit_rels: vec![],
        abort_rels: vec![],
        rm_records: vec![],
    }
}

fn new_coordinator(path: &std::path::Path, max_prepared: usize) -> TwoPhaseCoordinator {
    TwoPhaseCoordinator::new(
        TwoPhaseConfig {
            max_prepared,
            ..TwoPhaseConfig::default()
        },
        100,
        Box::new(FileWal::create(path).unwrap()),
        Box::new(InMemoryProcArray::new()),
        Box::new(InMemoryClog::new()),
        Box::new(InMemoryStorage::new()),
        Box::new(InMemorySubxactMap::new()),
        Box::new(ResourceManagerRegistry::new()),
        Box::new(NullDistributedXact::new()),
    )
}

#[test]
fn s6_foreign_backend_cannot_finish_another_roles_transaction() {
    let tmp = NamedTempFile::new().unwrap();
    let coordinator = new_coordinator(tmp.path(), 8);
    let lock = BackendLockedGXact::new();

    coordinator
        .prepare_transaction(1, &lock, 5, gid("tx-owned-by-a"), 0, 500, 1, empty_input())
        .unwrap();
    lock.clear();

    let err = coordinator
        .finish_prepared(2, 999, false, 1, &gid("tx-owned-by-a"), true, true)
        .unwrap_err();
    assert!(matches!(err, TwoPhaseError::InsufficientPrivilege(_)));

    // The entry is still PREPARED/unlocked: the owning role can still
    // finish it from a fresh session.
    assert!(coordinator
        .finish_prepared(3, 500, false, 1, &gid("tx-owned-by-a"), true, true)
        .unwrap());
}

#[test]
fn concurrent_backends_prepare_distinct_gids_without_losing_entries() {
    let tmp = NamedTempFile::new().unwrap();
    let coordinator = Arc::new(new_coordinator(tmp.path(), 64));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let coordinator = coordinator.clone();
            thread::spawn(move || {
                let lock = BackendLockedGXact::new();
                coordinator
                    .prepare_transaction(
                        i + 1,
                        &lock,
                        (i + 1) as u32,
                        gid(&format!("tx-concurrent-{}", i)),
                        0,
                        10,
                        1,
                        empty_input(),
                    )
                    .unwrap();
                lock.clear();
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(
        twophase_core::list_prepared_xacts(&coordinator.table).len(),
        16
    );
}

#[test]
fn concurrent_finish_attempts_on_the_same_gid_only_one_wins() {
    let tmp = NamedTempFile::new().unwrap();
    let coordinator = Arc::new(new_coordinator(tmp.path(), 8));
    let lock = BackendLockedGXact::new();
    coordinator
        .prepare_transaction(1, &lock, 1, gid("tx-race"), 0, 10, 1, empty_input())
        .unwrap();
    lock.clear();

    let barrier = Arc::new(std::sync::Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let coordinator = coordinator.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                coordinator.finish_prepared(i + 2, 10, false, 1, &gid("tx-race"), true, false)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| matches!(r, Ok(true))).count();
    let not_found = results.iter().filter(|r| matches!(r, Ok(false))).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(TwoPhaseError::ObjectNotInPrerequisiteState(_))))
        .count();

    // Exactly one caller finishes it; the rest either find it already gone
    // (raise_if_missing=false) or observe it locked by the winner.
    assert_eq!(successes, 1);
    assert_eq!(successes + not_found + busy, 4);
    assert!(twophase_core::list_prepared_xacts(&coordinator.table).is_empty());
}
