/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

//! The worker thread which runs actions for unreachable owners.

use std::{
    fmt, io,
    sync::{atomic::Ordering, mpsc, Arc},
    thread::{self, JoinHandle},
};

use tracing::debug;

use crate::Error;

use super::Shared;

/// A supplier of the thread a [`Cleaner`](crate::Cleaner) runs its worker on.
///
/// # Contract
///
/// `new_thread` must start a new thread which calls [`WorkerTask::run`], and return that
/// thread's handle.
/// It must not wait for the task to finish.
/// A factory which drops the task, runs it on some other thread, or hands back the handle of a
/// thread that already existed, makes cleaner creation fail with
/// [`Error::InvalidThreadState`].
///
/// # Examples
///
/// ```
/// use janitor::{Cleaner, ThreadFactory, WorkerTask};
/// use std::{io, thread::{self, JoinHandle}};
///
/// struct SmallStacks;
///
/// impl ThreadFactory for SmallStacks {
///     fn new_thread(&self, name: &str, task: WorkerTask) -> io::Result<JoinHandle<()>> {
///         thread::Builder::new()
///             .name(name.to_owned())
///             .stack_size(64 * 1024)
///             .spawn(move || task.run())
///     }
/// }
///
/// # fn main() -> Result<(), janitor::Error> {
/// let cleaner = Cleaner::with_thread_factory(SmallStacks)?;
/// # Ok(())
/// # }
/// ```
pub trait ThreadFactory {
    /// Start a new thread named `name` which runs `task`.
    ///
    /// # Errors
    ///
    /// Any error returned here is passed on as [`Error::Spawn`].
    fn new_thread(&self, name: &str, task: WorkerTask) -> io::Result<JoinHandle<()>>;
}

#[derive(Clone, Copy, Debug, Default)]
/// The thread factory used unless another one is configured.
///
/// It spawns a plain named thread with [`std::thread::Builder`].
/// Such threads do not keep the process alive once `main` returns.
pub struct DefaultThreadFactory;

impl ThreadFactory for DefaultThreadFactory {
    fn new_thread(&self, name: &str, task: WorkerTask) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || task.run())
    }
}

/// The body of a cleaner's worker thread, handed to a [`ThreadFactory`].
pub struct WorkerTask(Box<dyn FnOnce() + Send>);

impl WorkerTask {
    /// Run the worker on the current thread.
    ///
    /// This returns only once the cleaner has been dropped and all its registrations have been
    /// cleaned, or straight away if the cleaner failed to start.
    pub fn run(self) {
        (self.0)();
    }
}

impl fmt::Debug for WorkerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WorkerTask(..)")
    }
}

/// Start the worker for `shared` on a thread from `factory`.
///
/// The task first reports which thread it runs on, then waits for the go-ahead.
/// It only enters the worker loop if that thread is the one whose handle the factory returned.
pub(super) fn start(
    factory: &dyn ThreadFactory,
    name: &str,
    shared: Arc<Shared>,
) -> Result<(), Error> {
    let creator = thread::current().id();
    let (started_tx, started_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel();

    let task = WorkerTask(Box::new(move || {
        let me = thread::current().id();
        if started_tx.send(me).is_err() || me == creator {
            // run inline by the factory; waiting for the go-ahead here would never end
            return;
        }
        drop(started_tx);
        if matches!(go_rx.recv(), Ok(true)) {
            run(&shared);
        }
    }));

    let handle = factory.new_thread(name, task).map_err(Error::Spawn)?;

    match started_rx.recv() {
        Ok(id) if id == handle.thread().id() => {
            let _ = go_tx.send(true);
            Ok(())
        }
        _ => {
            let _ = go_tx.send(false);
            Err(Error::InvalidThreadState)
        }
    }
}

/// The worker loop: run the action for every token the tracker hands out, until the cleaner is
/// closed and has nothing left to clean.
fn run(shared: &Shared) {
    debug!("cleaner worker started");
    loop {
        if let Some(token) = shared.tracker.take(shared.park_timeout) {
            shared.dispatch(&token);
        } else if shared.closed.load(Ordering::Acquire) && shared.registry.is_empty() {
            break;
        }
    }
    debug!("cleaner worker exiting");
}
