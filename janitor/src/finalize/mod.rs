/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

//! Finalization: running a method on a value after it has become unreachable.
//!
//! This is the older model that [`Cleaner`] improves on.
//! A finalizer gets to look at the unreachable value itself, so the value has to be kept alive
//! past the point where its last user let go of it.
//! Here, users only reach a finalizable value through [`Finalizable`] handles; once every handle is
//! gone, the [`FinalizerQueue`] calls [`Finalize::finalize`] on the value and only then drops it.
//!
//! Prefer [`Cleaner`] for new code: a cleaning action cannot observe (and accidentally revive) its
//! owner, and cleanup can be triggered explicitly.
//!
//! # Examples
//!
//! ```
//! use janitor::finalize::{Finalize, FinalizerQueue};
//!
//! struct TempFile(String);
//!
//! impl Finalize for TempFile {
//!     fn finalize(&self) {
//!         println!("removing {}", self.0);
//!     }
//! }
//!
//! # fn main() -> Result<(), janitor::Error> {
//! let queue = FinalizerQueue::new()?;
//! let file = queue.track(TempFile(String::from("/tmp/scratch")));
//! println!("using {}", file.0);
//! drop(file);
//!
//! queue.collect();
//! queue.run_finalization()?;
//! # Ok(())
//! # }
//! ```

use std::{
    any::type_name,
    cell::Cell,
    collections::HashMap,
    fmt,
    ops::Deref,
    sync::Arc,
    thread,
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{Cleaner, Error};

#[cfg(test)]
mod tests;

thread_local! {
    /// Whether the current thread is a secondary finalizer.
    static IN_SECONDARY: Cell<bool> = const { Cell::new(false) };
}

/// A value with some last words to say before it is dropped.
pub trait Finalize: Send + Sync + 'static {
    /// Called exactly once, on a finalizer thread, after every [`Finalizable`] handle to this value
    /// has been dropped.
    ///
    /// Panics are caught and discarded.
    fn finalize(&self);
}

/// A queue of values waiting to be finalized, along with the primary finalizer thread that
/// finalizes them.
pub struct FinalizerQueue {
    cleaner: Cleaner,
    /// The number of values tracked per type, while stats are enabled.
    stats: Mutex<Option<HashMap<&'static str, u64>>>,
}

/// A shared handle to a value which will be finalized once every handle is gone.
pub struct Finalizable<T: Finalize> {
    /// The owner watched by the queue.
    /// Only handles hold it strongly.
    liveness: Arc<Liveness>,
    value: Arc<T>,
}

/// The stand-in owner for a finalizable value.
struct Liveness;

impl FinalizerQueue {
    /// Create a new queue and start its primary finalizer thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the finalizer thread could not be created.
    pub fn new() -> Result<FinalizerQueue, Error> {
        Ok(FinalizerQueue {
            cleaner: Cleaner::builder()
                .thread_name("janitor-finalizer")
                .build()?,
            stats: Mutex::new(None),
        })
    }

    /// Start tracking `value`, which will be finalized once the returned handle and all its clones
    /// are dropped.
    pub fn track<T: Finalize>(&self, value: T) -> Finalizable<T> {
        let value = Arc::new(value);
        let liveness = Arc::new(Liveness);

        let finalizee = Arc::clone(&value);
        self.cleaner.register(&liveness, move || finalizee.finalize());

        if let Some(stats) = self.stats.lock().as_mut() {
            *stats.entry(type_name::<T>()).or_insert(0) += 1;
        }

        Finalizable { liveness, value }
    }

    /// Look for values whose handles have all been dropped right away.
    ///
    /// Their finalizers will be run by the primary finalizer thread, or by the next call to
    /// [`FinalizerQueue::run_finalization`].
    pub fn collect(&self) {
        self.cleaner.collect();
    }

    #[must_use]
    /// Get the number of tracked values which have not yet been finalized.
    pub fn pending(&self) -> usize {
        self.cleaner.pending()
    }

    /// Finalize every value already known to be unreachable, on a freshly spawned secondary
    /// finalizer thread, and wait for it to finish.
    ///
    /// This does not look for new unreachable values unless the tracker decides a scan is due;
    /// call [`FinalizerQueue::collect`] first for that.
    /// Calling this from a finalizer already running on a secondary thread does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the secondary finalizer thread could not be created.
    pub fn run_finalization(&self) -> Result<(), Error> {
        if IN_SECONDARY.with(Cell::get) {
            return Ok(());
        }

        thread::scope(|s| {
            let secondary = thread::Builder::new()
                .name(String::from("janitor-secondary-finalizer"))
                .spawn_scoped(s, || {
                    IN_SECONDARY.with(|c| c.set(true));
                    let n_finalized = self.cleaner.run_ready();
                    debug!(n_finalized, "secondary finalizer finished");
                })
                .map_err(Error::Spawn)?;
            // finalizer panics are caught in the cleaner; this only sees tracker panics
            if secondary.join().is_err() {
                warn!("secondary finalizer panicked");
            }
            Ok(())
        })
    }

    /// Start counting tracked values per type, discarding any earlier counts.
    pub fn enable_stats(&self) {
        *self.stats.lock() = Some(HashMap::new());
    }

    /// Stop counting tracked values per type.
    pub fn disable_stats(&self) {
        *self.stats.lock() = None;
    }

    #[must_use]
    /// Get the number of values of each type tracked since stats were enabled, or `None` if stats
    /// are disabled.
    pub fn stats(&self) -> Option<HashMap<&'static str, u64>> {
        self.stats.lock().clone()
    }
}

impl fmt::Debug for FinalizerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizerQueue")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl<T: Finalize> Deref for Finalizable<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Finalize> Clone for Finalizable<T> {
    fn clone(&self) -> Self {
        Finalizable {
            liveness: Arc::clone(&self.liveness),
            value: Arc::clone(&self.value),
        }
    }
}

impl<T: Finalize + fmt::Debug> fmt::Debug for Finalizable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Finalizable").field(&*self.value).finish()
    }
}
