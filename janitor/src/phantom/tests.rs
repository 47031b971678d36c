/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

use std::thread;

use super::*;

fn never_scan(_: &ScanInfo) -> bool {
    false
}

fn always_scan(_: &ScanInfo) -> bool {
    true
}

/// Make a token for a fresh registration that does nothing.
fn token(registry: &Arc<Registry>) -> Token {
    Token::new(registry.insert(Box::new(|| ())), Arc::clone(registry))
}

#[test]
fn collect_releases_dropped_owner() {
    let registry = Arc::new(Registry::new());
    let tracker = WeakScan::new();
    tracker.set_scan_condition(never_scan);

    let owner = Arc::new(5_u32);
    tracker.arm(Arc::downgrade(&owner) as Weak<dyn Any + Send + Sync>, token(&registry));
    assert_eq!(tracker.n_armed(), 1);

    tracker.collect();
    assert!(tracker.poll().is_none());

    drop(owner);
    // nothing is noticed until a scan happens
    assert!(tracker.poll().is_none());
    tracker.collect();
    assert_eq!(tracker.n_armed(), 0);
    assert_eq!(tracker.n_ready(), 1);

    let token = tracker.poll().unwrap();
    assert!(token.consume().is_some());
    assert!(tracker.poll().is_none());
}

#[test]
fn live_owner_is_never_released() {
    let registry = Arc::new(Registry::new());
    let tracker = WeakScan::new();
    tracker.set_scan_condition(always_scan);

    let owner = Arc::new(String::from("still here"));
    let clone = Arc::clone(&owner);
    tracker.arm(Arc::downgrade(&owner) as Weak<dyn Any + Send + Sync>, token(&registry));
    drop(owner);

    tracker.collect();
    assert!(tracker.poll().is_none());
    assert!(tracker.take(Duration::from_millis(5)).is_none());
    assert_eq!(tracker.n_armed(), 1);

    drop(clone);
    assert!(tracker.poll().is_some());
}

#[test]
fn take_times_out() {
    let tracker = WeakScan::new();
    let tic = Instant::now();
    assert!(tracker.take(Duration::from_millis(20)).is_none());
    assert!(tic.elapsed() >= Duration::from_millis(20));
}

#[test]
fn collect_wakes_taker() {
    let registry = Arc::new(Registry::new());
    let tracker = Arc::new(WeakScan::new());
    tracker.set_scan_condition(never_scan);

    let owner = Arc::new(());
    tracker.arm(Arc::downgrade(&owner) as Weak<dyn Any + Send + Sync>, token(&registry));

    let taker = {
        let tracker = Arc::clone(&tracker);
        thread::spawn(move || tracker.take(Duration::from_secs(30)).is_some())
    };

    drop(owner);
    let tic = Instant::now();
    while !taker.is_finished() && tic.elapsed() < Duration::from_secs(10) {
        tracker.collect();
        thread::sleep(Duration::from_millis(1));
    }
    assert!(taker.join().unwrap());
}

#[test]
fn arming_scans_when_due() {
    let registry = Arc::new(Registry::new());
    let tracker = WeakScan::new();
    tracker.set_scan_condition(never_scan);

    let owner = Arc::new(1_u8);
    tracker.arm(Arc::downgrade(&owner) as Weak<dyn Any + Send + Sync>, token(&registry));
    drop(owner);

    tracker.set_scan_condition(always_scan);
    let other = Arc::new(2_u8);
    tracker.arm(Arc::downgrade(&other) as Weak<dyn Any + Send + Sync>, token(&registry));

    assert_eq!(tracker.n_ready(), 1);
    assert_eq!(tracker.n_armed(), 1);
}

#[test]
fn default_condition() {
    let fresh = ScanInfo {
        n_armed: 10,
        n_armed_since_last_scan: 2,
        since_last_scan: Duration::ZERO,
    };
    assert!(!default_scan_condition(&fresh));

    let grown = ScanInfo {
        n_armed: 10,
        n_armed_since_last_scan: 6,
        since_last_scan: Duration::ZERO,
    };
    assert!(default_scan_condition(&grown));

    let stale = ScanInfo {
        n_armed: 10,
        n_armed_since_last_scan: 0,
        since_last_scan: DEFAULT_SCAN_INTERVAL,
    };
    assert!(default_scan_condition(&stale));
}

#[test]
fn cleaned_watch_is_forgotten() {
    let registry = Arc::new(Registry::new());
    let tracker = WeakScan::new();
    tracker.set_scan_condition(never_scan);

    let owner = Arc::new(1_u8);
    let record = registry.insert(Box::new(|| ()));
    tracker.arm(
        Arc::downgrade(&owner) as Weak<dyn Any + Send + Sync>,
        Token::new(Arc::clone(&record), Arc::clone(&registry)),
    );
    assert!(registry.consume(&record).is_some());

    // the owner is still alive, but there is nothing left to watch it for
    tracker.collect();
    assert_eq!(tracker.n_armed(), 0);
    assert_eq!(tracker.n_ready(), 0);

    drop(owner);
    tracker.collect();
    assert!(tracker.poll().is_none());
}
