// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host stand-ins, for running the crash paths under `cargo test`.

use crash_record::FaultStatus;

/// Panic payload standing in for a hardware reset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SystemReset;

/// Unwinds with a [`SystemReset`] payload, which a test can catch.
pub fn system_reset() -> ! {
    std::panic::panic_any(SystemReset)
}

pub fn halt_if_debugger() {}

/// There are no fault status registers to read here.
pub fn fault_status() -> FaultStatus {
    FaultStatus::default()
}
