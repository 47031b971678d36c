/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

//! Workloads for benchmarking `janitor`.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use janitor::{Cleanable, Cleaner};

/// An owner along with its registration.
struct Tracked {
    cleanable: Cleanable,
    owner: Arc<usize>,
}

/// The outcome of running a churn workload.
#[derive(Clone, Copy, Debug)]
pub struct BenchmarkData {
    pub n_threads: usize,
    pub n_ops: usize,
    pub duration: Duration,
    /// The number of actions which had run by the time the workload finished.
    pub n_cleaned: usize,
}

/// Randomly register, explicitly clean, and drop owners, `n_ops` times in a row.
///
/// Every owner is dropped by the end; the workload waits until every action has run.
pub fn churn(cleaner: &Cleaner, n_ops: usize, seed: u64) -> BenchmarkData {
    fastrand::seed(seed);
    let cleaned = Arc::new(AtomicUsize::new(0));
    let mut live: Vec<Tracked> = Vec::new();
    let mut n_registered = 0;

    let tic = Instant::now();
    for n in 0..n_ops {
        match fastrand::u8(0..5) {
            0..=1 => {
                let owner = Arc::new(n);
                let cleaned = Arc::clone(&cleaned);
                let cleanable = cleaner.register(&owner, move || {
                    cleaned.fetch_add(1, Ordering::Relaxed);
                });
                n_registered += 1;
                live.push(Tracked { cleanable, owner });
            }
            2 => {
                if !live.is_empty() {
                    let tracked = live.swap_remove(fastrand::usize(0..live.len()));
                    tracked.cleanable.clean();
                }
            }
            3..=4 => {
                if !live.is_empty() {
                    let tracked = live.swap_remove(fastrand::usize(0..live.len()));
                    drop(tracked.owner);
                }
            }
            _ => unreachable!(),
        }
    }
    drop(live);
    while cleaned.load(Ordering::Relaxed) < n_registered {
        cleaner.collect();
        std::thread::yield_now();
    }

    BenchmarkData {
        n_threads: 1,
        n_ops,
        duration: tic.elapsed(),
        n_cleaned: cleaned.load(Ordering::Relaxed),
    }
}
