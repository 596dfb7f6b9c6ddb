// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! Each support module defines the same set of names, which are re-exported
//! here:
//!
//! - `system_reset() -> !`
//! - `halt_if_debugger()`
//! - `fault_status() -> FaultStatus`

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        mod arm_m;
        pub use arm_m::*;
    } else if #[cfg(target_os = "none")] {
        compile_error!("support for this architecture not implemented");
    } else {
        mod host;
        pub use host::*;
    }
}
