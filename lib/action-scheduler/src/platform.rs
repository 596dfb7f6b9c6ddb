// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! What the scheduler needs from the system around it.

use core::convert::Infallible;

/// A free-running tick counter.
pub trait Clock {
    fn ticks(&self) -> u64;

    /// Ticks per second. Zero if the counter isn't running yet.
    fn tick_frequency(&self) -> u32;

    /// Milliseconds since the counter started, or 0 if it hasn't.
    fn now_ms(&self) -> u64 {
        match u64::from(self.tick_frequency()) {
            0 => 0,
            freq => self.ticks().saturating_mul(1000) / freq,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerError {
    /// The timer service hasn't been started.
    NotInitialized,
    /// The timer service refused, with a platform status code.
    Rejected(u32),
}

/// A one-shot timer whose expiry calls [`crate::Scheduler::timer_expired`].
///
/// The scheduler calls both methods from inside a critical section, so they
/// must not block waiting on an interrupt.
pub trait OneShotTimer {
    /// (Re)arms the timer to expire `delay_ms` from now.
    fn start(&self, delay_ms: u32) -> Result<(), TimerError>;

    /// Disarms the timer. Harmless if it isn't armed.
    fn stop(&self);
}

/// A wake-up signal for the worker thread, e.g. an RTOS event flag.
///
/// Notifications don't need to be counted: several arriving before the
/// worker gets around to waiting may be merged into one.
pub trait Notify {
    /// Wakes the worker. Must be callable from interrupt context.
    fn notify(&self);

    /// Blocks until notified.
    fn wait(&self);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StorageError {
    Busy,
    Failed(u32),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InstallError {
    /// No verified image is staged.
    NoImage,
    Rejected(u32),
}

/// The bodies of the scheduled actions.
///
/// All of these run on the worker thread.
pub trait ActionHandler {
    fn system_reset(&mut self) -> !;
    fn clear_credential_cache(&mut self);
    fn disconnect(&mut self);

    /// Waits up to `timeout_ms` for the disconnect to complete. Returns
    /// whether it did.
    fn wait_disconnected(&mut self, timeout_ms: u32) -> bool;

    /// Starts connecting and blocks until connected.
    fn connect_and_wait(&mut self);

    fn erase_app_parameters(&mut self) -> Result<(), StorageError>;
    fn erase_all_storage(&mut self) -> Result<(), StorageError>;

    /// Asks the bootloader to install the staged image and reboots into
    /// it. Only returns if that was refused.
    fn reboot_and_install(&mut self) -> Result<Infallible, InstallError>;
}
