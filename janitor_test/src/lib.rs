/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

#![cfg(test)]

use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Barrier, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use janitor::{Cleanable, Cleaner, Error, ThreadFactory, WorkerTask};

/// Repeatedly collect until `done` returns true or ten seconds pass.
fn wait_until(cleaner: &Cleaner, done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        cleaner.collect();
        thread::sleep(Duration::from_millis(1));
    }
    done()
}

/// A stand-in for a native resource.
struct Resource {
    id: usize,
}

#[test]
fn back_reference_keeps_owner_alive() {
    const N: usize = 1000;
    let cleaner = Cleaner::create().unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let cleanables: Vec<Cleanable> = (0..N)
        .map(|id| {
            let owner = Arc::new(Resource { id });
            let back = Arc::clone(&owner);
            let count = Arc::clone(&count);
            cleaner.register(&owner, move || {
                assert_eq!(back.id, id);
                count.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();

    for _ in 0..10 {
        cleaner.collect();
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(count.load(Ordering::Relaxed), 0);
    assert_eq!(cleaner.pending(), N);

    for cleanable in &cleanables {
        cleanable.clean();
    }
    assert_eq!(count.load(Ordering::Relaxed), N);
    assert_eq!(cleaner.pending(), 0);
}

#[test]
fn unreachable_owners_all_cleaned() {
    const N: usize = 1000;
    let cleaner = Cleaner::create().unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    for id in 0..N {
        let owner = Arc::new(Resource { id });
        let count = Arc::clone(&count);
        // the handle is dropped here; only the owner matters
        let _ = cleaner.register(&owner, move || {
            count.fetch_add(1, Ordering::Relaxed);
        });
    }

    assert!(wait_until(&cleaner, || count.load(Ordering::Relaxed) == N));
    assert!(wait_until(&cleaner, || cleaner.pending() == 0));
}

#[test]
fn racing_explicit_and_automatic() {
    const N_THREADS: usize = 8;
    const N_OWNERS: usize = 250;

    let cleaner = Cleaner::create().unwrap();
    let runs: Arc<Vec<AtomicUsize>> = Arc::new(
        (0..N_THREADS * N_OWNERS)
            .map(|_| AtomicUsize::new(0))
            .collect(),
    );
    let barrier = Arc::new(Barrier::new(N_THREADS + 1));
    let done = Arc::new(AtomicBool::new(false));

    let collector = {
        let cleaner = cleaner.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                cleaner.collect();
                thread::yield_now();
            }
        })
    };

    let workers: Vec<_> = (0..N_THREADS)
        .map(|t| {
            let cleaner = cleaner.clone();
            let runs = Arc::clone(&runs);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                fastrand::seed(t as u64);
                barrier.wait();
                for i in 0..N_OWNERS {
                    let slot = t * N_OWNERS + i;
                    let owner = Arc::new(Resource { id: slot });
                    let runs = Arc::clone(&runs);
                    let cleanable = cleaner.register(&owner, move || {
                        runs[slot].fetch_add(1, Ordering::Relaxed);
                    });
                    if fastrand::bool() {
                        drop(owner);
                    }
                    if fastrand::bool() {
                        cleanable.clean();
                    }
                    if fastrand::u8(0..4) == 0 {
                        cleanable.clean();
                    }
                }
            })
        })
        .collect();

    barrier.wait();
    for worker in workers {
        worker.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    collector.join().unwrap();

    assert!(runs.iter().all(|n| n.load(Ordering::Relaxed) <= 1));
    assert!(wait_until(&cleaner, || cleaner.pending() == 0));
    assert!(runs.iter().all(|n| n.load(Ordering::Relaxed) == 1));
}

#[test]
fn owner_in_use_is_not_cleaned() {
    fn do_work(resource: &Resource, closed: &AtomicBool, cleaner: &Cleaner) -> usize {
        let mut total = 0;
        for _ in 0..50 {
            cleaner.collect();
            assert!(!closed.load(Ordering::Acquire));
            total += resource.id;
            thread::sleep(Duration::from_micros(200));
        }
        total
    }

    let cleaner = Cleaner::create().unwrap();
    let closed = Arc::new(AtomicBool::new(false));

    let owner = Arc::new(Resource { id: 3 });
    let _cleanable = {
        let closed = Arc::clone(&closed);
        cleaner.register(&owner, move || closed.store(true, Ordering::Release))
    };

    assert_eq!(do_work(&owner, &closed, &cleaner), 150);
    drop(owner);
    assert!(wait_until(&cleaner, || closed.load(Ordering::Acquire)));
}

#[test]
fn stale_thread_from_factory() {
    /// Hands out the handle of a thread that was running long before it was asked for one.
    struct Stale {
        handle: Mutex<Option<JoinHandle<()>>>,
        ran_elsewhere: Arc<AtomicBool>,
    }

    impl ThreadFactory for Stale {
        fn new_thread(&self, _: &str, task: WorkerTask) -> io::Result<JoinHandle<()>> {
            let ran_elsewhere = Arc::clone(&self.ran_elsewhere);
            thread::spawn(move || {
                task.run();
                ran_elsewhere.store(true, Ordering::Release);
            });
            self.handle
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no stale thread left"))
        }
    }

    let release = Arc::new(Barrier::new(2));
    let stale = {
        let release = Arc::clone(&release);
        thread::spawn(move || {
            release.wait();
        })
    };

    let ran_elsewhere = Arc::new(AtomicBool::new(false));
    let result = Cleaner::with_thread_factory(Stale {
        handle: Mutex::new(Some(stale)),
        ran_elsewhere: Arc::clone(&ran_elsewhere),
    });
    assert!(matches!(result, Err(Error::InvalidThreadState)));

    // the task was told to stand down rather than start a worker loop
    let deadline = Instant::now() + Duration::from_secs(10);
    while !ran_elsewhere.load(Ordering::Acquire) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(ran_elsewhere.load(Ordering::Acquire));

    // the stale thread was left alone
    release.wait();
}

#[test]
fn one_cleaner_many_owner_types() {
    let cleaner = Cleaner::create().unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let text = Arc::new(String::from("scratch"));
    let numbers = Arc::new(vec![1u32, 2, 3]);
    let unit = Arc::new(());

    let bump = |count: &Arc<AtomicUsize>| {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::Relaxed);
        }
    };
    let a = cleaner.register(&text, bump(&count));
    let _b = cleaner.register(&numbers, bump(&count));
    let _c = cleaner.register(&unit, bump(&count));

    a.clean();
    assert_eq!(count.load(Ordering::Relaxed), 1);
    drop((text, numbers, unit));
    assert!(wait_until(&cleaner, || count.load(Ordering::Relaxed) == 3));
}
