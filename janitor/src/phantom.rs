/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

//! Tracking of owners until they become unreachable.
//!
//! A [`Reachability`] tracker is handed a weak reference to each owner along with a [`Token`].
//! Once the owner is unreachable, the tracker posts the token to a queue which the cleaner's
//! worker drains.
//! The default tracker is [`WeakScan`].

use std::{
    any::Any,
    collections::VecDeque,
    fmt,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::{
    record::{Action, Record},
    registry::Registry,
};

#[cfg(test)]
mod tests;

/// A source of notifications that registered owners have become unreachable.
///
/// Implementations are the link between a [`Cleaner`](crate::Cleaner) and whatever decides that
/// an owner is gone.
/// The cleaner arms one watch per registration and then repeatedly calls [`Reachability::take`]
/// from its worker thread.
///
/// # Contract
///
/// - A token passed to [`Reachability::arm`] is handed out by `poll` or `take` at most once.
/// - A token must not be handed out while the owner it was armed with is still strongly
///   reachable.
/// - There is no disarm operation.
///   A token for a registration which was already cleaned explicitly is harmless when delivered.
///
/// Tokens carry their own registration, so one tracker may be shared by several cleaners
/// (for instance through an [`Arc`]); a token is then handled by whichever worker takes it.
pub trait Reachability: Send + Sync {
    /// Begin watching `owner`, posting `token` once it becomes unreachable.
    fn arm(&self, owner: Weak<dyn Any + Send + Sync>, token: Token);

    /// Fetch the next ready token without blocking.
    fn poll(&self) -> Option<Token>;

    /// Fetch the next ready token, waiting at most `timeout` for one to become ready.
    fn take(&self, timeout: Duration) -> Option<Token>;

    /// Check all watches now, waking any thread blocked in [`Reachability::take`] if a token
    /// becomes ready.
    fn collect(&self);
}

impl<R: Reachability + ?Sized> Reachability for Arc<R> {
    fn arm(&self, owner: Weak<dyn Any + Send + Sync>, token: Token) {
        (**self).arm(owner, token);
    }

    fn poll(&self) -> Option<Token> {
        (**self).poll()
    }

    fn take(&self, timeout: Duration) -> Option<Token> {
        (**self).take(timeout)
    }

    fn collect(&self) {
        (**self).collect();
    }
}

/// A handle identifying one registration, posted by a [`Reachability`] tracker once the owner of
/// that registration is unreachable.
///
/// Tokens are opaque; a tracker only stores them and hands them back.
pub struct Token {
    record: Arc<Record>,
    registry: Arc<Registry>,
}

impl Token {
    pub(crate) fn new(record: Arc<Record>, registry: Arc<Registry>) -> Token {
        Token { record, registry }
    }

    /// Consume the registration this token refers to, if nobody beat us to it.
    pub(crate) fn consume(&self) -> Option<Action> {
        self.registry.consume(&self.record)
    }

    /// Determine whether the registration was already claimed, so the token can be discarded.
    pub(crate) fn is_consumed(&self) -> bool {
        self.registry.is_consumed(&self.record)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Token")
            .field(&Arc::as_ptr(&self.record))
            .finish()
    }
}

/// The default time after which [`default_scan_condition`] asks for another scan.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(50);

/// Information passed to a [`ScanCondition`] to decide whether a [`WeakScan`] should check its
/// watches.
#[derive(Clone, Copy, Debug)]
pub struct ScanInfo {
    n_armed: usize,
    n_armed_since_last_scan: usize,
    since_last_scan: Duration,
}

impl ScanInfo {
    #[must_use]
    /// Get the number of watches which have not yet been released.
    pub fn n_armed(&self) -> usize {
        self.n_armed
    }

    #[must_use]
    /// Get the number of watches added since the last scan.
    pub fn n_armed_since_last_scan(&self) -> usize {
        self.n_armed_since_last_scan
    }

    #[must_use]
    /// Get the time elapsed since the last scan.
    pub fn since_last_scan(&self) -> Duration {
        self.since_last_scan
    }
}

/// A function which determines whether a [`WeakScan`] should check its watches.
///
/// # Examples
///
/// ```
/// use janitor::{ScanInfo, WeakScan};
///
/// /// Only ever scan when explicitly asked to.
/// fn never_scan(_: &ScanInfo) -> bool {
///     false
/// }
///
/// let tracker = WeakScan::new();
/// tracker.set_scan_condition(never_scan);
/// ```
pub type ScanCondition = fn(&ScanInfo) -> bool;

#[must_use]
/// The default scan condition used by [`WeakScan`].
///
/// It asks for a scan once the set of watches has grown by half since the last scan, which keeps
/// the cost of arming amortized _O(1)_, or once [`DEFAULT_SCAN_INTERVAL`] has passed.
pub fn default_scan_condition(info: &ScanInfo) -> bool {
    info.n_armed_since_last_scan() > info.n_armed() / 2
        || info.since_last_scan() >= DEFAULT_SCAN_INTERVAL
}

/// A [`Reachability`] tracker which keeps a weak reference to every owner and periodically scans
/// them for ones whose strong count has dropped to zero.
///
/// Scans happen on [`Reachability::collect`], and whenever the tracker's [`ScanCondition`] says so.
/// The condition is consulted every time a watch is armed and every time a waiting
/// [`Reachability::take`] wakes up.
/// This means an owner is noticed some time after it is dropped, not immediately.
/// Watches whose registrations were already cleaned explicitly are discarded by the next scan.
pub struct WeakScan {
    state: Mutex<ScanState>,
    /// Signalled whenever tokens are moved into the ready queue.
    ready_cv: Condvar,
}

struct ScanState {
    /// Watches whose owners were alive as of the last scan.
    armed: Vec<Watch>,
    /// Tokens for owners found unreachable, in the order they were found.
    ready: VecDeque<Token>,
    n_armed_since_last_scan: usize,
    last_scan: Instant,
    condition: ScanCondition,
}

struct Watch {
    owner: Weak<dyn Any + Send + Sync>,
    token: Token,
}

impl WeakScan {
    #[must_use]
    /// Construct a new tracker with no watches, using [`default_scan_condition`].
    pub fn new() -> WeakScan {
        WeakScan {
            state: Mutex::new(ScanState {
                armed: Vec::new(),
                ready: VecDeque::new(),
                n_armed_since_last_scan: 0,
                last_scan: Instant::now(),
                condition: default_scan_condition,
            }),
            ready_cv: Condvar::new(),
        }
    }

    /// Set the function which determines whether this tracker should scan its watches.
    pub fn set_scan_condition(&self, f: ScanCondition) {
        self.state.lock().condition = f;
    }

    #[must_use]
    /// Get the number of watches whose owners have not yet been found unreachable.
    pub fn n_armed(&self) -> usize {
        self.state.lock().armed.len()
    }

    #[must_use]
    /// Get the number of tokens waiting to be handed out.
    pub fn n_ready(&self) -> usize {
        self.state.lock().ready.len()
    }
}

impl Default for WeakScan {
    fn default() -> Self {
        WeakScan::new()
    }
}

impl fmt::Debug for WeakScan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WeakScan")
            .field("n_armed", &state.armed.len())
            .field("n_ready", &state.ready.len())
            .finish_non_exhaustive()
    }
}

impl ScanState {
    fn info(&self) -> ScanInfo {
        ScanInfo {
            n_armed: self.armed.len(),
            n_armed_since_last_scan: self.n_armed_since_last_scan,
            since_last_scan: self.last_scan.elapsed(),
        }
    }

    /// Move every watch with an unreachable owner into the ready queue, and forget every watch
    /// whose registration was already cleaned explicitly.
    /// Returns the number of tokens released.
    fn scan(&mut self) -> usize {
        let n_before = self.ready.len();
        let mut n_forgotten = 0;
        let mut i = 0;
        while i < self.armed.len() {
            if self.armed[i].token.is_consumed() {
                self.armed.swap_remove(i);
                n_forgotten += 1;
            } else if self.armed[i].owner.strong_count() == 0 {
                let watch = self.armed.swap_remove(i);
                self.ready.push_back(watch.token);
            } else {
                i += 1;
            }
        }
        self.n_armed_since_last_scan = 0;
        self.last_scan = Instant::now();

        let n_released = self.ready.len() - n_before;
        trace!(
            n_released,
            n_forgotten,
            n_armed = self.armed.len(),
            "scanned weak watches"
        );
        n_released
    }

    /// Scan only if the condition asks for it.
    fn scan_if_due(&mut self) -> usize {
        if (self.condition)(&self.info()) {
            self.scan()
        } else {
            0
        }
    }
}

impl Reachability for WeakScan {
    fn arm(&self, owner: Weak<dyn Any + Send + Sync>, token: Token) {
        let mut state = self.state.lock();
        state.armed.push(Watch { owner, token });
        state.n_armed_since_last_scan += 1;
        if state.scan_if_due() > 0 {
            self.ready_cv.notify_all();
        }
    }

    fn poll(&self) -> Option<Token> {
        let mut state = self.state.lock();
        if state.ready.is_empty() {
            state.scan_if_due();
        }
        state.ready.pop_front()
    }

    fn take(&self, timeout: Duration) -> Option<Token> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(token) = state.ready.pop_front() {
                return Some(token);
            }
            if state.scan_if_due() > 0 {
                continue;
            }
            if self.ready_cv.wait_until(&mut state, deadline).timed_out() {
                state.scan_if_due();
                return state.ready.pop_front();
            }
        }
    }

    fn collect(&self) {
        let mut state = self.state.lock();
        if state.scan() > 0 {
            self.ready_cv.notify_all();
        }
    }
}
