//! Stress tests for concurrent container access.
//!
//! These tests race many threads against one registry to verify that
//! objects are allocated once, locks exclude, and teardown wakes every
//! blocked task.

use memory_container::Error;
use memory_container::config::{BackingKind, JoinPolicy, RegistryConfig};
use memory_container::ids::{ContainerId, ObjectId, TaskId};
use memory_container::registry::Registry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("condition not reached");
}

// ============================================================================
// Allocation
// ============================================================================

/// Test that concurrent first-time maps of one object allocate it once.
#[test]
fn test_concurrent_first_map_allocates_once() {
    let registry = Arc::new(Registry::new(RegistryConfig::default()));
    let num_threads = 16;
    let cid = ContainerId(1);
    for t in 0..num_threads {
        registry.join_or_create(cid, TaskId(t)).unwrap();
    }

    let barrier = Arc::new(Barrier::new(num_threads as usize));
    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.resolve_mapping(TaskId(t), ObjectId(3), 4096).unwrap()
            })
        })
        .collect();

    let resolutions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let created = resolutions.iter().filter(|r| r.created).count();
    assert_eq!(created, 1);
    assert!(resolutions.iter().all(|r| r.frame == resolutions[0].frame));
    assert_eq!(registry.object_ids(cid), Some(vec![ObjectId(3)]));
}

/// Test that every concurrent mapping addresses the same pages.
#[test]
fn test_concurrent_maps_share_pages() {
    let registry = Arc::new(Registry::new(RegistryConfig::default()));
    let num_threads: u64 = 8;
    for t in 0..num_threads {
        registry.join_or_create(ContainerId(1), TaskId(t)).unwrap();
    }

    let barrier = Arc::new(Barrier::new(num_threads as usize));
    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mapping = registry.map(TaskId(t), ObjectId(1), 4096).unwrap();
                mapping.write_at(t as usize, &[t as u8 + 1]);
                mapping
            })
        })
        .collect();

    let mappings: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut seen = vec![0u8; num_threads as usize];
    mappings[0].read_at(0, &mut seen);
    let expected: Vec<u8> = (1..=num_threads as u8).collect();
    assert_eq!(seen, expected);
}

/// Test concurrent map and free churn across several objects.
#[test]
fn test_map_free_churn() {
    let registry = Arc::new(Registry::new(
        RegistryConfig::default().with_backing(BackingKind::Heap),
    ));
    let num_threads: u64 = 8;
    let iterations = 500;
    for t in 0..num_threads {
        registry.join_or_create(ContainerId(1), TaskId(t)).unwrap();
    }

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..iterations {
                    let oid = ObjectId(i % 4);
                    match registry.map(TaskId(t), oid, 256) {
                        Ok(mapping) => assert_eq!(mapping.len(), 256),
                        // Another thread freed the object between resolve and install.
                        Err(Error::RemapFailed(_)) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                    if i % 3 == 0 {
                        match registry.free(TaskId(t), oid) {
                            Ok(()) | Err(Error::ObjectNotFound) => {}
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let ids = registry.object_ids(ContainerId(1)).unwrap();
    assert!(ids.len() <= 4);
}

// ============================================================================
// Locks
// ============================================================================

/// Test that no two tasks are ever inside the same critical section.
#[test]
fn test_lock_serializes_critical_section() {
    let registry = Arc::new(Registry::new(
        RegistryConfig::default().with_backing(BackingKind::Heap),
    ));
    let num_threads: u64 = 8;
    let iterations = 200;
    for t in 0..num_threads {
        registry.join_or_create(ContainerId(1), TaskId(t)).unwrap();
    }

    let inside = Arc::new(AtomicBool::new(false));
    let counter = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let inside = Arc::clone(&inside);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..iterations {
                    registry.lock(TaskId(t), ObjectId(7)).unwrap();
                    assert!(!inside.swap(true, Ordering::SeqCst), "two holders at once");
                    // Non-atomic read-modify-write; only exclusion keeps it exact.
                    let value = counter.load(Ordering::Relaxed);
                    thread::yield_now();
                    counter.store(value + 1, Ordering::Relaxed);
                    inside.store(false, Ordering::SeqCst);
                    registry.unlock(TaskId(t), ObjectId(7)).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(counter.load(Ordering::Relaxed), num_threads * iterations);
}

/// Test that a blocked task acquires the lock once the holder unlocks.
#[test]
fn test_blocked_lock_handoff() {
    let registry = Arc::new(Registry::new(
        RegistryConfig::default().with_backing(BackingKind::Heap),
    ));
    registry.join_or_create(ContainerId(1), TaskId(1)).unwrap();
    registry.join_or_create(ContainerId(1), TaskId(2)).unwrap();
    registry.lock(TaskId(1), ObjectId(5)).unwrap();

    let acquired = Arc::new(AtomicBool::new(false));
    let waiter = {
        let registry = Arc::clone(&registry);
        let acquired = Arc::clone(&acquired);
        thread::spawn(move || {
            registry.lock(TaskId(2), ObjectId(5)).unwrap();
            acquired.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!acquired.load(Ordering::SeqCst));

    registry.unlock(TaskId(1), ObjectId(5)).unwrap();
    waiter.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));

    let snapshot = registry.snapshot();
    assert_eq!(snapshot[0].locks, vec![(ObjectId(5), Some(TaskId(2)))]);
}

/// Test that a task blocked on a lock wakes when the registry shuts down.
#[test]
fn test_shutdown_wakes_lock_waiter() {
    let registry = Arc::new(Registry::new(
        RegistryConfig::default().with_backing(BackingKind::Heap),
    ));
    registry.join_or_create(ContainerId(1), TaskId(1)).unwrap();
    registry.join_or_create(ContainerId(1), TaskId(2)).unwrap();
    registry.lock(TaskId(1), ObjectId(5)).unwrap();

    let waiter = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.lock(TaskId(2), ObjectId(5)))
    };

    thread::sleep(Duration::from_millis(100));
    registry.shutdown();

    let result = waiter.join().unwrap();
    assert!(matches!(result, Err(Error::ContainerDestroyed)));
    assert_eq!(registry.container_count(), 0);
}

/// Test that a waiter that leaves its container never ends up holding the lock.
#[test]
fn test_departed_waiter_does_not_keep_lock() {
    let registry = Arc::new(Registry::new(
        RegistryConfig::default().with_backing(BackingKind::Heap),
    ));
    let cid = ContainerId(1);
    registry.join_or_create(cid, TaskId(1)).unwrap();
    registry.join_or_create(cid, TaskId(2)).unwrap();
    registry.lock(TaskId(1), ObjectId(5)).unwrap();

    let waiter = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.lock(TaskId(2), ObjectId(5)))
    };

    thread::sleep(Duration::from_millis(100));
    registry.leave(TaskId(2));
    registry.unlock(TaskId(1), ObjectId(5)).unwrap();

    assert!(matches!(waiter.join().unwrap(), Err(Error::NotInContainer)));
    let snapshot = registry.snapshot();
    assert_eq!(snapshot[0].members, vec![TaskId(1)]);
    assert_eq!(snapshot[0].locks, vec![(ObjectId(5), None)]);

    // The lock is free for the remaining member.
    registry.lock(TaskId(1), ObjectId(5)).unwrap();
    registry.unlock(TaskId(1), ObjectId(5)).unwrap();
}

/// Test that teardown by the last member's leave wakes a blocked waiter.
#[test]
fn test_last_leave_wakes_lock_waiter() {
    let registry = Arc::new(Registry::new(
        RegistryConfig::default().with_backing(BackingKind::Heap),
    ));
    let cid = ContainerId(1);
    registry.join_or_create(cid, TaskId(1)).unwrap();
    registry.join_or_create(cid, TaskId(2)).unwrap();
    registry.lock(TaskId(1), ObjectId(5)).unwrap();

    let waiter = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.lock(TaskId(2), ObjectId(5)))
    };

    thread::sleep(Duration::from_millis(100));
    registry.leave(TaskId(2));
    registry.leave(TaskId(1));

    assert!(matches!(waiter.join().unwrap(), Err(Error::ContainerDestroyed)));
    assert_eq!(registry.container_count(), 0);
}

// ============================================================================
// Parked joins
// ============================================================================

fn parked_registry() -> Arc<Registry> {
    Arc::new(Registry::new(
        RegistryConfig::default()
            .with_backing(BackingKind::Heap)
            .with_join_policy(JoinPolicy::Parked),
    ))
}

/// Test that a parked joiner runs once the active member leaves.
#[test]
fn test_parked_join_waits_for_turn() {
    let registry = parked_registry();
    let cid = ContainerId(4);
    registry.join_or_create(cid, TaskId(1)).unwrap();

    let joined = Arc::new(AtomicBool::new(false));
    let joiner = {
        let registry = Arc::clone(&registry);
        let joined = Arc::clone(&joined);
        thread::spawn(move || {
            let result = registry.join_or_create(cid, TaskId(2));
            joined.store(true, Ordering::SeqCst);
            result
        })
    };

    wait_until(|| registry.members(cid).is_some_and(|m| m.len() == 2));
    assert_eq!(registry.active_task(cid), Some(TaskId(1)));
    assert!(!joined.load(Ordering::SeqCst));

    registry.leave(TaskId(1));
    assert_eq!(joiner.join().unwrap().unwrap(), cid);
    assert_eq!(registry.active_task(cid), Some(TaskId(2)));
}

/// Test that turns pass in join order.
#[test]
fn test_parked_turns_follow_join_order() {
    let registry = parked_registry();
    let cid = ContainerId(4);
    registry.join_or_create(cid, TaskId(1)).unwrap();

    let mut joiners = Vec::new();
    for t in 2..=4 {
        let handle = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.join_or_create(cid, TaskId(t)))
        };
        wait_until(|| registry.members(cid).is_some_and(|m| m.len() == t as usize));
        joiners.push(handle);
    }

    for (i, handle) in joiners.into_iter().enumerate() {
        let leaving = TaskId(i as u64 + 1);
        assert_eq!(registry.active_task(cid), Some(leaving));
        registry.leave(leaving);
        handle.join().unwrap().unwrap();
    }
    assert_eq!(registry.active_task(cid), Some(TaskId(4)));
}

/// Test that a parked joiner removed before its turn gets `NotInContainer`.
#[test]
fn test_parked_joiner_removed_before_turn() {
    let registry = parked_registry();
    let cid = ContainerId(4);
    registry.join_or_create(cid, TaskId(1)).unwrap();

    let joiner = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.join_or_create(cid, TaskId(2)))
    };

    wait_until(|| registry.members(cid).is_some_and(|m| m.len() == 2));
    registry.leave(TaskId(2));

    assert!(matches!(joiner.join().unwrap(), Err(Error::NotInContainer)));
    assert_eq!(registry.members(cid), Some(vec![TaskId(1)]));
}
