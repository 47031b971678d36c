/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
};

use super::*;

/// Make an action which bumps `counter` by one.
fn bump(counter: &Arc<AtomicUsize>) -> Action {
    let counter = Arc::clone(counter);
    Box::new(move || {
        counter.fetch_add(1, Ordering::Relaxed);
    })
}

#[test]
fn insert_then_consume() {
    let count = Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    assert!(registry.is_empty());

    let record = registry.insert(bump(&count));
    assert_eq!(registry.len(), 1);
    // the list holds a count of its own
    assert_eq!(Arc::strong_count(&record), 2);

    let action = registry.consume(&record).unwrap();
    assert!(registry.is_empty());
    assert_eq!(Arc::strong_count(&record), 1);
    assert_eq!(count.load(Ordering::Relaxed), 0);

    action();
    assert_eq!(count.load(Ordering::Relaxed), 1);
}

#[test]
fn consume_twice() {
    let count = Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    let record = registry.insert(bump(&count));

    assert!(registry.consume(&record).is_some());
    assert!(registry.consume(&record).is_none());
    assert!(registry.consume(&record).is_none());
    assert_eq!(registry.len(), 0);
}

#[test]
/// Unlink from the middle, the head, and the tail, checking that the survivors stay linked.
fn unlink_positions() {
    let count = Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    let records: Vec<_> = (0..5).map(|_| registry.insert(bump(&count))).collect();
    assert_eq!(registry.len(), 5);

    // records[4] is the head, records[0] the tail
    registry.consume(&records[2]).unwrap()();
    registry.consume(&records[4]).unwrap()();
    registry.consume(&records[0]).unwrap()();
    assert_eq!(registry.len(), 2);
    assert_eq!(count.load(Ordering::Relaxed), 3);

    let rest = registry.drain();
    assert_eq!(rest.len(), 2);
    assert!(registry.is_empty());
    for action in rest {
        action();
    }
    assert_eq!(count.load(Ordering::Relaxed), 5);

    for record in &records {
        assert!(registry.consume(record).is_none());
        assert_eq!(Arc::strong_count(record), 1);
    }
}

#[test]
fn drop_releases_pending() {
    let count = Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    let record = registry.insert(bump(&count));
    drop(registry);

    assert_eq!(Arc::strong_count(&record), 1);
    // the action was dropped unrun, along with its clone of `count`
    assert_eq!(Arc::strong_count(&count), 1);
    assert_eq!(count.load(Ordering::Relaxed), 0);
}

#[test]
fn racing_consumers() {
    const N_THREADS: usize = 8;
    const N_RECORDS: usize = 200;

    let count = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(Registry::new());
    let records: Arc<Vec<_>> =
        Arc::new((0..N_RECORDS).map(|_| registry.insert(bump(&count))).collect());
    let barrier = Arc::new(Barrier::new(N_THREADS));

    let handles: Vec<_> = (0..N_THREADS)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let records = Arc::clone(&records);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut order: Vec<usize> = (0..N_RECORDS).collect();
                fastrand::shuffle(&mut order);
                for i in order {
                    if let Some(action) = registry.consume(&records[i]) {
                        action();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(count.load(Ordering::Relaxed), N_RECORDS);
    assert!(registry.is_empty());
}

#[test]
fn insert_while_consuming() {
    let count = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(Registry::new());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let count = Arc::clone(&count);
            thread::spawn(move || {
                let mut mine = Vec::new();
                for _ in 0..500 {
                    mine.push(registry.insert(bump(&count)));
                    if fastrand::bool() {
                        let i = fastrand::usize(0..mine.len());
                        let record = mine.swap_remove(i);
                        registry.consume(&record).unwrap()();
                    }
                }
                for record in mine {
                    registry.consume(&record).unwrap()();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(count.load(Ordering::Relaxed), 2000);
    assert!(registry.is_empty());
}
