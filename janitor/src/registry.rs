/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

//! The live set of records belonging to one cleaner.

use std::{ptr::NonNull, sync::Arc};

use parking_lot::Mutex;

use crate::record::{Action, Link, Record};

#[cfg(test)]
mod tests;

/// A doubly-linked list of pending [`Record`]s, guarded by a single mutex.
///
/// The list owns one strong count of every record linked into it.
/// Critical sections only fix up pointers; actions are always handed back to the caller to run
/// outside the lock.
#[derive(Debug)]
pub(crate) struct Registry {
    list: Mutex<List>,
}

#[derive(Debug)]
struct List {
    /// The most recently inserted pending record.
    head: Option<NonNull<Record>>,
    /// The number of pending records.
    len: usize,
}

// SAFETY: the pointers in a `List` are only dereferenced while its mutex is held.
unsafe impl Send for List {}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry {
            list: Mutex::new(List { head: None, len: 0 }),
        }
    }

    /// Create a record for `action` and push it onto the front of the live list.
    pub(crate) fn insert(&self, action: Action) -> Arc<Record> {
        let record = Arc::new(Record::new(action));
        // the list's own strong count, given back in `consume`
        let ptr = NonNull::from(unsafe { &*Arc::into_raw(Arc::clone(&record)) });

        let mut list = self.list.lock();
        unsafe {
            record.next.set(list.head.map_or(Link::Tail, Link::Next));
            if let Some(head) = list.head {
                head.as_ref().prev.set(Some(ptr));
            }
        }
        list.head = Some(ptr);
        list.len += 1;

        record
    }

    /// Unlink `record` and take its action, marking it consumed.
    ///
    /// Returns `None` if the record had already been consumed, in which case nothing happens.
    /// Only the one caller which receives `Some` may run the action.
    ///
    /// `record` must have been created by [`Registry::insert`] on this same registry.
    pub(crate) fn consume(&self, record: &Record) -> Option<Action> {
        let mut list = self.list.lock();
        unsafe {
            let next = match record.next.get() {
                Link::Consumed => return None,
                Link::Tail => None,
                Link::Next(next) => Some(next),
            };
            let prev = record.prev.get();

            match prev {
                None => list.head = next,
                Some(prev) => prev.as_ref().next.set(record.next.get()),
            }
            if let Some(next) = next {
                next.as_ref().prev.set(prev);
            }

            record.prev.set(None);
            record.next.set(Link::Consumed);
            list.len -= 1;

            let action = record.action.replace(None);
            // the caller still holds a strong count, so this cannot free `record`
            drop(Arc::from_raw(std::ptr::from_ref(record)));
            action
        }
    }

    /// Determine whether `record` has already been consumed.
    pub(crate) fn is_consumed(&self, record: &Record) -> bool {
        let _list = self.list.lock();
        unsafe { record.next.get() == Link::Consumed }
    }

    /// Consume every pending record without running anything, returning their actions.
    ///
    /// This is only used while tearing a registry down.
    pub(crate) fn drain(&self) -> Vec<Action> {
        let mut list = self.list.lock();
        let mut actions = Vec::with_capacity(list.len);
        let mut cursor = list.head.take();
        while let Some(ptr) = cursor {
            unsafe {
                let record = ptr.as_ref();
                cursor = match record.next.get() {
                    Link::Next(next) => Some(next),
                    Link::Tail | Link::Consumed => None,
                };
                record.prev.set(None);
                record.next.set(Link::Consumed);
                actions.extend(record.action.replace(None));
                drop(Arc::from_raw(ptr.as_ptr().cast_const()));
            }
        }
        list.len = 0;
        actions
    }

    /// Get the number of pending records.
    pub(crate) fn len(&self) -> usize {
        self.list.lock().len
    }

    /// Determine whether no records are pending.
    pub(crate) fn is_empty(&self) -> bool {
        self.list.lock().head.is_none()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // release the list's counts so no record leaks; the actions are dropped unrun
        drop(self.drain());
    }
}
