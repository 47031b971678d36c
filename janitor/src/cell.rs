/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

//! An unsynchronized cell whose accesses are serialized by some outside lock.

use std::cell::UnsafeCell;

#[derive(Debug)]
pub struct UCell<T>(UnsafeCell<T>);

impl<T> UCell<T> {
    pub fn new(x: T) -> Self {
        Self(UnsafeCell::new(x))
    }

    /// # Safety
    ///
    /// The caller must hold the lock which guards this cell.
    pub unsafe fn get(&self) -> T
    where
        T: Copy,
    {
        *self.0.get()
    }

    /// # Safety
    ///
    /// The caller must hold the lock which guards this cell.
    pub unsafe fn set(&self, x: T) {
        *self.0.get() = x;
    }

    /// Replace the contents of this cell, returning the old value.
    ///
    /// # Safety
    ///
    /// The caller must hold the lock which guards this cell.
    pub unsafe fn replace(&self, x: T) -> T {
        std::mem::replace(&mut *self.0.get(), x)
    }
}
