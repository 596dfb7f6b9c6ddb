// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crash_record::ResetReason;

/// Access to the part's reset cause register.
///
/// Reset cause registers are sticky on most parts: flags accumulate across
/// resets until software clears them, which [`crate::init`] does right after
/// reading.
pub trait ResetCause {
    fn read(&mut self) -> ResetReason;
    fn clear(&mut self);
}
