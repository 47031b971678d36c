/*
    janitor, deferred cleanup actions for Rust.
    Copyright (C) 2023 Clayton Ramsey.

    This Source Code Form is subject to the terms of the Mozilla Public
    License, v. 2.0. If a copy of the MPL was not distributed with this
    file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

//! Helpers shared by the unit tests.

use std::{
    thread,
    time::{Duration, Instant},
};

/// Repeatedly call `collect` until `done` returns true or ten seconds pass.
pub(crate) fn wait_until(collect: impl Fn(), done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        collect();
        thread::sleep(Duration::from_millis(1));
    }
    done()
}
