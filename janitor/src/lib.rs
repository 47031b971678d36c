/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

//! Deferred cleanup actions that run at most once.
//!
//! A [`Cleaner`] lets an owner object register a cleaning action.
//! The action runs exactly once, either when the returned [`Cleanable`] is cleaned explicitly or
//! automatically, on the cleaner's own worker thread, after the owner has become unreachable.
//! Whichever of the two gets there first wins; the other is a no-op.
//!
//! Owners are [`Arc`](std::sync::Arc)s.
//! An owner becomes unreachable when its last strong reference is dropped.
//! That is noticed by a [`Reachability`] tracker; the default, [`WeakScan`], periodically scans
//! weak references to every registered owner.
//!
//! # Examples
//!
//! ```
//! use janitor::Cleaner;
//! use std::sync::{
//!     atomic::{AtomicBool, Ordering},
//!     Arc,
//! };
//!
//! # fn main() -> Result<(), janitor::Error> {
//! static CLOSED: AtomicBool = AtomicBool::new(false);
//!
//! let cleaner = Cleaner::create()?;
//! let socket = Arc::new(17_u32);
//!
//! // The action must not capture `socket`, or it would never become unreachable.
//! let cleanable = cleaner.register(&socket, || CLOSED.store(true, Ordering::Relaxed));
//!
//! cleanable.clean();
//! assert!(CLOSED.load(Ordering::Relaxed));
//!
//! // cleaning twice does nothing
//! cleanable.clean();
//! # Ok(())
//! # }
//! ```
//!
//! # Interaction with the owner
//!
//! The action is held strongly by the cleaner until it runs.
//! If the action (or anything it captures) holds a strong reference back to the owner, the owner
//! can never become unreachable, and only an explicit [`Cleanable::clean`] will ever run it.

#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]

mod cell;
mod cleaner;
mod error;
pub mod finalize;
mod phantom;
mod record;
mod registry;
#[cfg(test)]
mod testing;

pub use cleaner::{Builder, Cleanable, Cleaner, DefaultThreadFactory, ThreadFactory, WorkerTask};
pub use error::{ActionError, Error};
pub use phantom::{
    default_scan_condition, Reachability, ScanCondition, ScanInfo, Token, WeakScan,
    DEFAULT_SCAN_INTERVAL,
};
