// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delayed disruptive actions.
//!
//! The `Scheduler` lets any part of the application ask for something
//! irreversible (a reboot, a reconnect, a firmware install) to happen after
//! a delay, typically so that the response to the request that asked for it
//! has time to leave the device.
//!
//! The expected usage model is:
//!
//! - Put a `Scheduler` in a `static`, wrapping the platform's clock, one-shot
//!   timer and worker notification.
//!
//! - Call `Scheduler::init` at boot, then spawn the worker thread with
//!   [`WORKER`]'s name, stack and priority and have it call
//!   `Scheduler::run`.
//!
//! - From the timer's expiry callback, call `Scheduler::timer_expired`. This
//!   only wakes the worker; it is safe in interrupt context.
//!
//! - Call `Scheduler::schedule` from anywhere.
//!
//! At most one action is pending. Scheduling another replaces it, and
//! scheduling `Action::None` cancels it.

#![cfg_attr(not(test), no_std)]

use core::cell::Cell;

use critical_section::Mutex;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ringbuf::{ringbuf, ringbuf_entry};

mod platform;

pub use platform::{
    ActionHandler, Clock, InstallError, Notify, OneShotTimer, StorageError,
    TimerError,
};

pub mod config {
    include!(concat!(env!("OUT_DIR"), "/config.rs"));
}

/// What to create the worker thread with.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WorkerAttrs {
    pub name: &'static str,
    pub stack_size: usize,
    /// CMSIS-RTOS2 `osPriority_t`.
    pub priority: u8,
}

pub const WORKER: WorkerAttrs = WorkerAttrs {
    name: "scheduler_action",
    stack_size: config::WORKER_STACK_SIZE,
    priority: config::WORKER_PRIORITY,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Action {
    None = 0,
    Reboot = 1,
    ClearCredentialsAndReboot = 2,
    Reconnect = 3,
    ClearAndReconnect = 4,
    /// Reboot into the bootloader to install a staged image. The auxiliary
    /// byte selects a [`ClearNvm`] mode to apply first.
    FirmwareInstall = 5,
}

impl Action {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::from_u8(raw)
    }
}

/// What to erase before a firmware install.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum ClearNvm {
    None = 0,
    App = 1,
    Full = 2,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScheduleError {
    Timer(TimerError),
}

impl From<TimerError> for ScheduleError {
    fn from(e: TimerError) -> Self {
        Self::Timer(e)
    }
}

/// The pending request, if `active`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ActionState {
    pub active: bool,
    pub action: Action,
    pub delay_ms: u32,
    pub start_ms: u64,
    pub deadline_ms: u64,
    /// Opaque here; only `Action::FirmwareInstall` interprets it.
    pub aux: u8,
}

impl ActionState {
    pub const IDLE: Self = Self {
        active: false,
        action: Action::None,
        delay_ms: 0,
        start_ms: 0,
        deadline_ms: 0,
        aux: 0,
    };
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Init,
    Scheduled { action: Action, delay_ms: u32 },
    Cancelled,
    ArmFailed(TimerError),
    Expired,
    Spurious,
    Early { remaining_ms: u64 },
    Executing(Action),
    DisconnectTimeout,
    EraseFailed(StorageError),
    InstallFailed(InstallError),
}

ringbuf!(Trace, 16, Trace::None);

pub struct Scheduler<P> {
    platform: P,
    state: Mutex<Cell<ActionState>>,
}

impl<P: Clock + OneShotTimer + Notify> Scheduler<P> {
    pub const fn new(platform: P) -> Self {
        Self {
            platform,
            state: Mutex::new(Cell::new(ActionState::IDLE)),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Forgets any pending action. Call before starting the worker.
    pub fn init(&self) {
        self.platform.stop();
        critical_section::with(|cs| self.state.borrow(cs).set(ActionState::IDLE));
        ringbuf_entry!(Trace::Init);
    }

    /// Arranges for `action` to run on the worker `delay_ms` from now,
    /// replacing whatever was pending. `aux` is handed to the action body.
    ///
    /// A zero delay wakes the worker straight away, without the timer.
    ///
    /// If the timer can't be armed, nothing is left pending.
    pub fn schedule(
        &self,
        action: Action,
        delay_ms: u32,
        aux: u8,
    ) -> Result<(), ScheduleError> {
        // The timer is driven inside the same critical section as the state
        // change, so a re-arm from the worker can't land between the two.
        let armed = critical_section::with(|cs| {
            let state = self.state.borrow(cs);
            self.platform.stop();
            if action == Action::None {
                state.set(ActionState::IDLE);
                return Ok(());
            }

            let start_ms = self.platform.now_ms();
            state.set(ActionState {
                active: true,
                action,
                delay_ms,
                start_ms,
                deadline_ms: start_ms + u64::from(delay_ms),
                aux,
            });
            if delay_ms == 0 {
                return Ok(());
            }
            let armed = self.platform.start(delay_ms);
            if armed.is_err() {
                // This request would never run; don't leave it looking
                // pending.
                state.set(ActionState::IDLE);
            }
            armed
        });

        match (action, armed) {
            (_, Err(e)) => {
                ringbuf_entry!(Trace::ArmFailed(e));
                Err(e.into())
            }
            (Action::None, Ok(())) => {
                ringbuf_entry!(Trace::Cancelled);
                Ok(())
            }
            (_, Ok(())) => {
                ringbuf_entry!(Trace::Scheduled { action, delay_ms });
                if delay_ms == 0 {
                    self.platform.notify();
                }
                Ok(())
            }
        }
    }

    /// Timer expiry. Only wakes the worker, so it can be called from
    /// interrupt context.
    pub fn timer_expired(&self) {
        ringbuf_entry!(Trace::Expired);
        self.platform.notify();
    }

    /// Time left before the pending action runs, and what it is. `None`
    /// once the worker has picked it up.
    pub fn get_remaining(&self) -> Option<(u32, Action)> {
        let s = critical_section::with(|cs| self.state.borrow(cs).get());
        if !s.active {
            return None;
        }
        let remaining = s.deadline_ms.saturating_sub(self.platform.now_ms());
        Some((u32::try_from(remaining).unwrap_or(u32::MAX), s.action))
    }

    /// Runs the pending action, if it is due. This is what the worker does
    /// each time it's woken.
    ///
    /// Returns the action that ran, for those that return at all.
    pub fn execute_pending<H: ActionHandler + ?Sized>(
        &self,
        handler: &mut H,
    ) -> Option<Action> {
        let taken = critical_section::with(|cs| {
            let state = self.state.borrow(cs);
            let s = state.get();
            if !s.active {
                return Err(None);
            }
            // A notification from a timer that has since been replaced can
            // wake us ahead of the current deadline.
            let now = self.platform.now_ms();
            if s.delay_ms != 0 && s.deadline_ms > now {
                return Err(Some((s, s.deadline_ms - now)));
            }
            state.set(ActionState { active: false, ..s });
            Ok(s)
        });

        let s = match taken {
            Ok(s) => s,
            Err(None) => {
                ringbuf_entry!(Trace::Spurious);
                return None;
            }
            Err(Some((seen, remaining_ms))) => {
                ringbuf_entry!(Trace::Early { remaining_ms });
                self.rearm(seen, remaining_ms);
                return None;
            }
        };

        ringbuf_entry!(Trace::Executing(s.action));
        perform(handler, s.action, s.aux);
        Some(s.action)
    }

    /// Re-arms the timer for the rest of `seen`'s delay, provided `seen`
    /// is still the pending request. A request that has been replaced or
    /// cancelled since is left to whoever replaced it.
    fn rearm(&self, seen: ActionState, remaining_ms: u64) {
        let delay = u32::try_from(remaining_ms).unwrap_or(u32::MAX);
        let armed = critical_section::with(|cs| {
            let state = self.state.borrow(cs);
            if state.get() != seen {
                return Ok(());
            }
            let armed = self.platform.start(delay);
            if armed.is_err() {
                state.set(ActionState::IDLE);
            }
            armed
        });
        if let Err(e) = armed {
            ringbuf_entry!(Trace::ArmFailed(e));
        }
    }

    /// The worker thread's body.
    pub fn run<H: ActionHandler + ?Sized>(&self, handler: &mut H) -> ! {
        loop {
            self.platform.wait();
            self.execute_pending(handler);
        }
    }
}

fn perform<H: ActionHandler + ?Sized>(handler: &mut H, action: Action, aux: u8) {
    match action {
        Action::None => (),
        Action::Reboot => handler.system_reset(),
        Action::ClearCredentialsAndReboot => {
            handler.clear_credential_cache();
            handler.system_reset()
        }
        Action::Reconnect => {
            disconnect(handler);
            handler.connect_and_wait();
        }
        Action::ClearAndReconnect => {
            disconnect(handler);
            handler.clear_credential_cache();
            handler.connect_and_wait();
        }
        Action::FirmwareInstall => {
            let erased = match ClearNvm::from_u8(aux) {
                Some(ClearNvm::App) => handler.erase_app_parameters(),
                Some(ClearNvm::Full) => handler.erase_all_storage(),
                Some(ClearNvm::None) | None => Ok(()),
            };
            if let Err(e) = erased {
                // Install regardless.
                ringbuf_entry!(Trace::EraseFailed(e));
            }
            if let Err(e) = handler.reboot_and_install() {
                ringbuf_entry!(Trace::InstallFailed(e));
            }
        }
    }
}

fn disconnect<H: ActionHandler + ?Sized>(handler: &mut H) {
    handler.disconnect();
    if !handler.wait_disconnected(config::DISCONNECT_TIMEOUT_MS) {
        // Connect anyway; the stack sorts out a half-open link itself.
        ringbuf_entry!(Trace::DisconnectTimeout);
    }
}
