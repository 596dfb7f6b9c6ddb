// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crash capture and post-mortem reporting.
//!
//! This crate owns the firmware's single persistent crash record and the
//! entry points that fill it in. Every class of fatal condition funnels into
//! [`capture`], which writes the record and resets the part. At the next
//! boot the application calls [`init`] with the reset cause, then
//! [`check_previous_crash`] to get (and consume) a printable report.
//!
//! The record is placed in `.uninit.crash_record`, which `cortex-m-rt`'s
//! linker script leaves out of the startup code's zero/copy passes.
//!
//! Interceptors must work with a corrupted stack and interrupts in any
//! state, so they don't allocate, don't format, and don't record trace
//! entries. Formatting happens on the next boot.
//!
//! On the host, a system reset unwinds with an [`arch::SystemReset`]
//! payload instead, so that tests can observe it.

#![cfg_attr(target_os = "none", no_std)]

use core::cell::RefCell;
use core::sync::atomic::{compiler_fence, Ordering};

use critical_section::Mutex;
use crash_record::str_prefix;
use ringbuf::{ringbuf, ringbuf_entry};

pub use crash_record::{
    CrashKind, CrashRecord, CrashReport, CrashSlot, FaultDump, FileName,
    ResetReason, TaskName, NO_CRASH_TEXT,
};

pub mod arch;
mod reset;

#[cfg(all(target_os = "none", any(feature = "c-hooks", feature = "freertos")))]
mod hooks;

pub use reset::ResetCause;

#[cfg(target_os = "none")]
#[link_section = ".uninit.crash_record"]
static CRASH_RECORD: CrashSlot = CrashSlot::uninit();

#[cfg(not(target_os = "none"))]
static CRASH_RECORD: CrashSlot = CrashSlot::zeroed();

/// Copy of the report handed out by the last `check_previous_crash`.
static LAST_REPORT: Mutex<RefCell<Option<CrashReport>>> =
    Mutex::new(RefCell::new(None));

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Init {
        reason: ResetReason,
        kept: Option<CrashKind>,
    },
    Reported(CrashKind),
    NoCrash,
    Cleared,
}

ringbuf!(Trace, 8, Trace::None);

/// Decides whether the crash record survived the last reset.
///
/// Reads and clears the reset cause. Only a software-requested reset, the
/// kind the interceptors perform, keeps the record; otherwise it's cleared.
/// Call this once, early in boot, before anything might crash.
pub fn init<R: ResetCause + ?Sized>(cause: &mut R) -> Option<CrashKind> {
    let reason = cause.read();
    cause.clear();
    let kept = CRASH_RECORD.recover(reason);
    ringbuf_entry!(Trace::Init { reason, kept });
    kept
}

pub fn clear() {
    CRASH_RECORD.clear();
    ringbuf_entry!(Trace::Cleared);
}

/// The persisted record, if there is a valid one.
pub fn read() -> Option<CrashRecord> {
    CRASH_RECORD.read()
}

/// Formats the previous crash, if any, and clears the record so that it is
/// only reported once.
///
/// A copy of the report is kept for [`last_report`].
pub fn check_previous_crash() -> Option<CrashReport> {
    let report = CRASH_RECORD.take_report();
    match &report {
        Some(r) => ringbuf_entry!(Trace::Reported(r.kind())),
        None => ringbuf_entry!(Trace::NoCrash),
    }
    critical_section::with(|cs| {
        LAST_REPORT.borrow_ref_mut(cs).clone_from(&report);
    });
    report
}

/// The report from the last call to [`check_previous_crash`], for answering
/// later queries (e.g. a diagnostics resource). `None` means there was no
/// crash to report; show [`NO_CRASH_TEXT`] in that case.
pub fn last_report() -> Option<CrashReport> {
    critical_section::with(|cs| LAST_REPORT.borrow_ref(cs).clone())
}

/// Lets `write` fill in the crash record, then resets the system.
///
/// This is the common tail of every interceptor. It's public so that hooks
/// for other kernels or SDKs can be written outside this crate. `write`
/// should use the slot's in-place writers rather than building a
/// [`CrashRecord`] on what may be the last few bytes of a stack.
pub fn capture<F: FnOnce(&CrashSlot)>(write: F) -> ! {
    arch::halt_if_debugger();
    write(&CRASH_RECORD);
    // The record must be in RAM before the reset request goes out.
    compiler_fence(Ordering::SeqCst);
    arch::system_reset()
}

/// A failed assertion at `file`:`line`.
pub fn assert_failed(file: &str, line: u32) -> ! {
    capture(|slot| {
        slot.write_assert(str_prefix(file, FileName::CAPACITY), line)
    })
}

/// An assertion inside the radio driver, identified only by its code.
pub fn rail_assert(error_code: u32) -> ! {
    capture(|slot| slot.write_rail_assert(error_code))
}

/// The RTOS detected that `task` overran its stack.
pub fn stack_overflow(task: &str) -> ! {
    capture(|slot| {
        slot.write_stack_overflow(str_prefix(task, TaskName::CAPACITY))
    })
}

/// A stack canary was found clobbered on return to `return_address`.
pub fn stack_protector(return_address: u32) -> ! {
    capture(|slot| slot.write_stack_protector(return_address))
}

/// A C-runtime check failed.
pub fn crun_error(error_code: u32) -> ! {
    capture(|slot| slot.write_crun_error(error_code))
}

/// The program tried to exit, which firmware never should.
pub fn abnormal_exit(status: i32) -> ! {
    capture(|slot| slot.write_exit(status))
}

#[cfg(all(target_os = "none", feature = "panic-handler"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    match info.location() {
        Some(loc) => assert_failed(loc.file(), loc.line()),
        None => assert_failed("<unknown>", 0),
    }
}
