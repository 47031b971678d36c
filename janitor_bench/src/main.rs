/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

//! Benchmarks for the `janitor` cleanup library.

use std::{thread, time::Instant};

use janitor::Cleaner;
use janitor_bench::{churn, BenchmarkData};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    const N_ITERS: usize = 1_000_000;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cleaner = match Cleaner::create() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "could not start cleaner");
            return;
        }
    };

    let data = single_threaded(&cleaner, N_ITERS);
    report("single-threaded", &data);

    for n_threads in [2, 4, 8] {
        let data = multi_threaded(&cleaner, N_ITERS, n_threads);
        report("multi-threaded", &data);
    }
}

/// Run the churn workload once on the current thread.
fn single_threaded(cleaner: &Cleaner, n_iters: usize) -> BenchmarkData {
    churn(cleaner, n_iters, 12345)
}

/// Run the churn workload on `n_threads` threads at once, all sharing one cleaner.
/// The work is split evenly among the threads.
fn multi_threaded(cleaner: &Cleaner, n_iters: usize, n_threads: usize) -> BenchmarkData {
    let per_thread = n_iters / n_threads;
    let tic = Instant::now();
    let n_cleaned: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..n_threads)
            .map(|i| s.spawn(move || churn(cleaner, per_thread, 12345 + i as u64)))
            .collect();
        handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .map(|data| data.n_cleaned)
            .sum()
    });

    BenchmarkData {
        n_threads,
        n_ops: per_thread * n_threads,
        duration: tic.elapsed(),
        n_cleaned,
    }
}

fn report(name: &str, data: &BenchmarkData) {
    info!(
        n_threads = data.n_threads,
        n_cleaned = data.n_cleaned,
        "benchmark done"
    );
    println!(
        "{name}: {} ops on {} thread(s) in {:?}",
        data.n_ops, data.n_threads, data.duration
    );
}
