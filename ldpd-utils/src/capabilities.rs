//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use capctl::caps::CapState;
use tracing::error;

/// Runs the provided closure with all permitted capabilities raised to
/// effective, restoring the previous capability state afterwards.
///
/// Used around privileged operations such as binding to the LDP port after
/// the daemon has dropped to an unprivileged user.
pub fn raise<F, R>(cb: F) -> R
where
    F: FnOnce() -> R,
{
    let mut caps = match CapState::get_current() {
        Ok(caps) => caps,
        Err(error) => {
            error!(%error, "failed to get current capabilities");
            return cb();
        }
    };
    let saved = caps.effective;

    caps.effective = caps.permitted;
    if let Err(error) = caps.set_current() {
        error!(%error, "failed to raise capabilities");
    }

    let ret = cb();

    caps.effective = saved;
    if let Err(error) = caps.set_current() {
        error!(%error, "failed to restore capabilities");
    }

    ret
}
