/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

use std::{
    any::Any,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Weak,
    },
    time::Duration,
};

use super::*;
use crate::{testing::wait_until, Reachability, Token};

struct Counted(Arc<AtomicUsize>);

impl Finalize for Counted {
    fn finalize(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn finalized_after_last_handle() {
    let queue = FinalizerQueue::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let handle = queue.track(Counted(Arc::clone(&count)));
    let other = handle.clone();
    drop(handle);
    queue.collect();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(count.load(Ordering::Relaxed), 0);

    drop(other);
    assert!(wait_until(|| queue.collect(), || count.load(Ordering::Relaxed) == 1));
    assert_eq!(queue.pending(), 0);
}

#[test]
fn value_outlives_handles_until_finalized() {
    static EVENTS: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    struct Noisy;

    impl Finalize for Noisy {
        fn finalize(&self) {
            EVENTS.lock().push("finalize");
        }
    }

    impl Drop for Noisy {
        fn drop(&mut self) {
            EVENTS.lock().push("drop");
        }
    }

    let queue = FinalizerQueue::new().unwrap();
    drop(queue.track(Noisy));
    assert!(EVENTS.lock().is_empty());

    assert!(wait_until(|| queue.collect(), || EVENTS.lock().len() == 2));
    assert_eq!(*EVENTS.lock(), ["finalize", "drop"]);
}

#[test]
fn run_finalization_drains_ready() {
    let queue = FinalizerQueue::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    for _ in 0..20 {
        drop(queue.track(Counted(Arc::clone(&count))));
    }
    queue.collect();
    queue.run_finalization().unwrap();

    // whatever the secondary thread did not get to, the primary one did
    assert!(wait_until(|| queue.collect(), || count.load(Ordering::Relaxed) == 20));
    assert_eq!(queue.pending(), 0);
}

#[test]
fn reentrant_run_finalization() {
    struct Recursive {
        queue: Arc<FinalizerQueue>,
        count: Arc<AtomicUsize>,
    }

    impl Finalize for Recursive {
        fn finalize(&self) {
            self.queue.run_finalization().unwrap();
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    let queue = Arc::new(FinalizerQueue::new().unwrap());
    let count = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        drop(queue.track(Recursive {
            queue: Arc::clone(&queue),
            count: Arc::clone(&count),
        }));
    }

    queue.collect();
    queue.run_finalization().unwrap();
    assert!(wait_until(|| queue.collect(), || count.load(Ordering::Relaxed) == 3));
}

#[test]
fn panicking_finalizer() {
    struct Exploding;

    impl Finalize for Exploding {
        fn finalize(&self) {
            panic!("finalizer exploded");
        }
    }

    let queue = FinalizerQueue::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    drop(queue.track(Exploding));
    drop(queue.track(Counted(Arc::clone(&count))));
    queue.collect();
    queue.run_finalization().unwrap();

    assert!(wait_until(|| queue.collect(), || count.load(Ordering::Relaxed) == 1));
    assert!(wait_until(|| queue.collect(), || queue.pending() == 0));
}

#[test]
fn stats_by_type() {
    struct Other;

    impl Finalize for Other {
        fn finalize(&self) {}
    }

    let queue = FinalizerQueue::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let _untracked = queue.track(Other);
    assert!(queue.stats().is_none());

    queue.enable_stats();
    let _a = queue.track(Counted(Arc::clone(&count)));
    let _b = queue.track(Counted(Arc::clone(&count)));
    let _c = queue.track(Other);

    let stats = queue.stats().unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[type_name::<Counted>()], 2);
    assert_eq!(stats[type_name::<Other>()], 1);

    queue.disable_stats();
    assert!(queue.stats().is_none());

    queue.enable_stats();
    assert!(queue.stats().unwrap().is_empty());
}

#[test]
fn panicking_tracker_in_secondary() {
    /// A tracker which blows up whenever it is asked for a ready token without waiting.
    struct Broken;

    impl Reachability for Broken {
        fn arm(&self, _: Weak<dyn Any + Send + Sync>, _: Token) {}

        fn poll(&self) -> Option<Token> {
            panic!("tracker is broken");
        }

        fn take(&self, timeout: Duration) -> Option<Token> {
            thread::sleep(timeout);
            None
        }

        fn collect(&self) {}
    }

    let queue = FinalizerQueue {
        cleaner: Cleaner::builder()
            .tracker(Broken)
            .park_timeout(Duration::from_millis(5))
            .build()
            .unwrap(),
        stats: Mutex::new(None),
    };

    // the panic stays on the secondary thread
    queue.run_finalization().unwrap();
    queue.run_finalization().unwrap();
}
