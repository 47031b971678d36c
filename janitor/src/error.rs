/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

//! Error types.

use std::{any::Any, io};

use thiserror::Error;

#[derive(Debug, Error)]
/// An error raised while setting up a cleaner or registering with one.
///
/// Errors raised by cleaning actions themselves are never returned; see [`ActionError`].
pub enum Error {
    /// The worker thread could not be created.
    ///
    /// This is what happens when the environment refuses to create a new thread, for instance
    /// because of a resource limit or a sandbox policy.
    #[error("failed to create cleaner worker thread")]
    Spawn(#[source] io::Error),
    /// A [`ThreadFactory`](crate::ThreadFactory) did not run the worker task on a fresh thread.
    ///
    /// Either the task was dropped without being run, or the handle it returned belongs to a
    /// thread other than the one running the task.
    #[error("thread factory did not provide a new thread for the worker")]
    InvalidThreadState,
    /// A required argument was absent.
    #[error("required argument `{0}` is absent")]
    NullArgument(&'static str),
}

#[derive(Debug, Clone, Error)]
#[error("cleaning action panicked: {message}")]
/// A panic raised by a cleaning action.
///
/// These are caught where the action is invoked and then discarded, so that one misbehaving action
/// cannot stop the worker.
/// They can be observed with [`Builder::on_action_failure`](crate::Builder::on_action_failure).
pub struct ActionError {
    message: String,
}

impl ActionError {
    /// Build an error from the payload of a caught panic.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> ActionError {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            String::from("<non-string panic payload>")
        };
        ActionError { message }
    }

    #[must_use]
    /// The message the action panicked with, if it was a string.
    pub fn message(&self) -> &str {
        &self.message
    }
}
