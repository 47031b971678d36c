/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

//! The per-registration node stored in a [`Registry`](crate::registry::Registry).

use std::{fmt, ptr::NonNull};

use crate::cell::UCell;

/// A cleaning action, boxed up so that records need not be generic.
pub(crate) type Action = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The forward link of a record.
///
/// A record is in its registry's live list exactly when its link is not `Consumed`.
pub(crate) enum Link {
    /// The record is pending and is the last element of the list.
    Tail,
    /// The record is pending and is followed by another record.
    Next(NonNull<Record>),
    /// The record has been unlinked and its action handed out.
    /// This is terminal: a consumed record never returns to the list.
    Consumed,
}

/// One registration of a cleaning action.
///
/// Every field is guarded by the lock of the registry the record was inserted into, and must only
/// be touched while holding it.
pub(crate) struct Record {
    /// The previous record in the live list, or `None` if this is the head (or consumed).
    pub(crate) prev: UCell<Option<NonNull<Record>>>,
    /// The next record in the live list, doubling as the consumption marker.
    pub(crate) next: UCell<Link>,
    /// The cleaning action.
    /// It is `Some` exactly as long as the record is pending.
    pub(crate) action: UCell<Option<Action>>,
}

// SAFETY: all interior state is accessed only under the owning registry's mutex, and the action
// itself is `Send`.
unsafe impl Send for Record {}
unsafe impl Sync for Record {}

impl Record {
    /// Construct a new record that is not yet part of any list.
    pub(crate) fn new(action: Action) -> Record {
        Record {
            prev: UCell::new(None),
            next: UCell::new(Link::Tail),
            action: UCell::new(Some(action)),
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the links cannot be read without the registry lock
        f.debug_struct("Record").finish_non_exhaustive()
    }
}
