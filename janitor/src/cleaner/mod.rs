/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

//! Cleaners and their registrations.

use std::{
    any::Any,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use tracing::{trace, warn};

use crate::{
    phantom::{Reachability, Token, WeakScan},
    record::{Action, Record},
    registry::Registry,
    ActionError, Error,
};

pub use self::worker::{DefaultThreadFactory, ThreadFactory, WorkerTask};

mod worker;

/// The default longest time a worker waits for a token before checking whether it should exit.
const DEFAULT_PARK_TIMEOUT: Duration = Duration::from_millis(50);

/// Counter used to give every default-named worker thread a distinct name.
static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(0);

type FailureHook = Box<dyn Fn(&ActionError) + Send + Sync>;

#[derive(Clone)]
/// A set of cleaning actions, each tied to an owner, plus a worker thread that runs the action
/// for each owner that becomes unreachable.
///
/// Cloning a `Cleaner` gives another handle to the same set.
/// Once every handle is dropped, the worker keeps running until all outstanding registrations have
/// been cleaned, and then exits.
///
/// # Examples
///
/// ```
/// use janitor::Cleaner;
/// use std::sync::{
///     atomic::{AtomicUsize, Ordering},
///     Arc,
/// };
///
/// # fn main() -> Result<(), janitor::Error> {
/// static FREED: AtomicUsize = AtomicUsize::new(0);
///
/// let cleaner = Cleaner::create()?;
/// let owner = Arc::new(vec![1, 2, 3]);
/// cleaner.register(&owner, || {
///     FREED.fetch_add(1, Ordering::Relaxed);
/// });
///
/// drop(owner);
/// // the action will run on the cleaner's worker thread some time after this
/// cleaner.collect();
/// # Ok(())
/// # }
/// ```
pub struct Cleaner {
    inner: Arc<Inner>,
}

/// The part of a cleaner whose lifetime is that of the user's handles.
struct Inner {
    shared: Arc<Shared>,
}

/// State shared between the handles, the registrations and the worker thread.
pub(crate) struct Shared {
    registry: Arc<Registry>,
    tracker: Box<dyn Reachability>,
    /// Set once every [`Cleaner`] handle has been dropped.
    closed: AtomicBool,
    park_timeout: Duration,
    on_failure: Option<FailureHook>,
}

#[derive(Clone)]
/// A registered cleaning action, as returned by [`Cleaner::register`].
///
/// Dropping a `Cleanable` does not run or cancel its action.
pub struct Cleanable {
    record: Arc<Record>,
    shared: Arc<Shared>,
}

/// Configuration for a [`Cleaner`].
///
/// # Examples
///
/// ```
/// use janitor::{Cleaner, WeakScan};
/// use std::time::Duration;
///
/// # fn main() -> Result<(), janitor::Error> {
/// let cleaner = Cleaner::builder()
///     .thread_name("socket-cleaner")
///     .park_timeout(Duration::from_millis(10))
///     .tracker(WeakScan::new())
///     .on_action_failure(|e| eprintln!("{e}"))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct Builder {
    thread_name: Option<String>,
    park_timeout: Duration,
    factory: Box<dyn ThreadFactory>,
    tracker: Box<dyn Reachability>,
    on_failure: Option<FailureHook>,
}

impl Cleaner {
    /// Create a new cleaner, with its worker on a thread from [`DefaultThreadFactory`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the worker thread could not be created.
    pub fn create() -> Result<Cleaner, Error> {
        Cleaner::builder().build()
    }

    /// Create a new cleaner whose worker runs on a thread from `factory`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if `factory` fails to create a thread, and
    /// [`Error::InvalidThreadState`] if it does not run the worker on the new thread it returns.
    pub fn with_thread_factory(factory: impl ThreadFactory + 'static) -> Result<Cleaner, Error> {
        Cleaner::builder().thread_factory(factory).build()
    }

    #[must_use]
    /// Start configuring a new cleaner.
    pub fn builder() -> Builder {
        Builder {
            thread_name: None,
            park_timeout: DEFAULT_PARK_TIMEOUT,
            factory: Box::new(DefaultThreadFactory),
            tracker: Box::new(WeakScan::new()),
            on_failure: None,
        }
    }

    /// Register `action` to run once `owner` becomes unreachable.
    ///
    /// The action runs at most once: either on this cleaner's worker thread some time after the
    /// last strong reference to `owner` is dropped, or on the caller's thread when
    /// [`Cleanable::clean`] is called, whichever comes first.
    ///
    /// `action` must not hold a strong reference to `owner`, or `owner` can never become
    /// unreachable.
    pub fn register<T, F>(&self, owner: &Arc<T>, action: F) -> Cleanable
    where
        T: Send + Sync + 'static,
        F: FnOnce() + Send + 'static,
    {
        let shared = &self.inner.shared;
        let record = shared.registry.insert(Box::new(action));
        let watch = Arc::downgrade(owner) as Weak<dyn Any + Send + Sync>;
        shared.tracker.arm(
            watch,
            Token::new(Arc::clone(&record), Arc::clone(&shared.registry)),
        );
        trace!(record = ?Arc::as_ptr(&record), "registered cleaning action");

        Cleanable {
            record,
            shared: Arc::clone(shared),
        }
    }

    /// Register `action` to run once the owner behind `owner` becomes unreachable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NullArgument`] without registering anything if `owner` no longer refers
    /// to a live value.
    pub fn try_register<T, F>(&self, owner: &Weak<T>, action: F) -> Result<Cleanable, Error>
    where
        T: Send + Sync + 'static,
        F: FnOnce() + Send + 'static,
    {
        let Some(owner) = owner.upgrade() else {
            return Err(Error::NullArgument("owner"));
        };
        Ok(self.register(&owner, action))
    }

    /// Ask this cleaner's tracker to look for unreachable owners right away.
    ///
    /// Actions for any owners found run on the worker thread, so they may not have finished (or
    /// even started) when this returns.
    pub fn collect(&self) {
        self.inner.shared.tracker.collect();
    }

    #[must_use]
    /// Get the number of registrations whose actions have not yet been claimed.
    pub fn pending(&self) -> usize {
        self.inner.shared.registry.len()
    }

    /// Run the action of every registration whose token is ready right now, on the calling
    /// thread.
    /// Returns the number of tokens handled.
    pub(crate) fn run_ready(&self) -> usize {
        let shared = &self.inner.shared;
        let mut n_handled = 0;
        while let Some(token) = shared.tracker.poll() {
            shared.dispatch(&token);
            n_handled += 1;
        }
        n_handled
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        trace!("last cleaner handle dropped");
    }
}

impl fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleaner")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl Shared {
    /// Claim the registration behind `token` and run its action, if it has not been claimed yet.
    fn dispatch(&self, token: &Token) {
        if let Some(action) = token.consume() {
            trace!(?token, "running cleaning action");
            self.invoke(action);
        }
    }

    /// Run a claimed action, catching and discarding any panic.
    fn invoke(&self, action: Action) {
        let Err(payload) = catch_unwind(AssertUnwindSafe(action)) else {
            return;
        };
        let error = ActionError::from_panic(&*payload);
        warn!(%error, "discarding failed cleaning action");
        if let Some(hook) = &self.on_failure {
            if catch_unwind(AssertUnwindSafe(|| hook(&error))).is_err() {
                warn!("action failure hook panicked");
            }
        }
    }
}

impl Cleanable {
    /// Unregister this action and run it on the current thread, unless it has already run.
    ///
    /// Calling `clean` any number of times, from any number of threads, runs the action at most
    /// once in total (counting an automatic run on the worker thread).
    /// A panic in the action is caught and discarded.
    pub fn clean(&self) {
        if let Some(action) = self.shared.registry.consume(&self.record) {
            self.shared.invoke(action);
        }
    }
}

impl fmt::Debug for Cleanable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cleanable")
            .field(&Arc::as_ptr(&self.record))
            .finish()
    }
}

impl Builder {
    #[must_use]
    /// Set the name of the worker thread.
    ///
    /// By default, workers are named `janitor-cleaner-N` for a process-wide counter `N`.
    pub fn thread_name(mut self, name: impl Into<String>) -> Builder {
        self.thread_name = Some(name.into());
        self
    }

    #[must_use]
    /// Set the longest time the worker waits for a token before checking whether it should exit.
    pub fn park_timeout(mut self, timeout: Duration) -> Builder {
        self.park_timeout = timeout;
        self
    }

    #[must_use]
    /// Set the factory used to create the worker thread.
    pub fn thread_factory(mut self, factory: impl ThreadFactory + 'static) -> Builder {
        self.factory = Box::new(factory);
        self
    }

    #[must_use]
    /// Set the tracker used to notice unreachable owners.
    pub fn tracker(mut self, tracker: impl Reachability + 'static) -> Builder {
        self.tracker = Box::new(tracker);
        self
    }

    #[must_use]
    /// Set a function to be called whenever a cleaning action panics.
    ///
    /// The hook is only an observer: the panic is discarded whether or not a hook is set.
    pub fn on_action_failure(
        mut self,
        hook: impl Fn(&ActionError) + Send + Sync + 'static,
    ) -> Builder {
        self.on_failure = Some(Box::new(hook));
        self
    }

    /// Create the cleaner and start its worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the worker thread could not be created, and
    /// [`Error::InvalidThreadState`] if the thread factory did not run the worker on the new
    /// thread it returned.
    pub fn build(self) -> Result<Cleaner, Error> {
        let name = self.thread_name.unwrap_or_else(|| {
            format!(
                "janitor-cleaner-{}",
                NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed)
            )
        });
        let shared = Arc::new(Shared {
            registry: Arc::new(Registry::new()),
            tracker: self.tracker,
            closed: AtomicBool::new(false),
            park_timeout: self.park_timeout,
            on_failure: self.on_failure,
        });

        worker::start(&*self.factory, &name, Arc::clone(&shared))?;

        Ok(Cleaner {
            inner: Arc::new(Inner { shared }),
        })
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("thread_name", &self.thread_name)
            .field("park_timeout", &self.park_timeout)
            .finish_non_exhaustive()
    }
}
