// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Failure hooks called by C code linked into the firmware.
//!
//! These have the names and signatures the C library, vendor SDK and RTOS
//! expect. None of them return. The GCC ones are reached through the linker
//! (`-Wl,--wrap=__assert_func -Wl,--wrap=__stack_chk_fail`).
//!
//! Strings from C are trusted no further than the record can hold: a scan
//! for the terminator gives up at the destination's capacity, so a
//! corrupted pointer into unterminated memory can't run away.

use core::ffi::{c_char, c_int, c_void};

use crash_record::{c_str_prefix, FileName, TaskName};

/// # Safety
///
/// `file` must be null or a C string.
#[cfg(feature = "c-hooks")]
unsafe fn c_assert(file: *const c_char, line: c_int) -> ! {
    // Safety: passed through from our caller.
    let file = unsafe { c_str_prefix(file, FileName::CAPACITY) };
    crate::capture(|slot| slot.write_assert(file, line as u32))
}

/// newlib's `assert` failure path, wrapped.
#[cfg(feature = "c-hooks")]
#[no_mangle]
unsafe extern "C" fn __wrap___assert_func(
    file: *const c_char,
    line: c_int,
    _func: *const c_char,
    _expr: *const c_char,
) -> ! {
    // Safety: the C library passes a string literal.
    unsafe { c_assert(file, line) }
}

/// IAR's `assert` failure path.
#[cfg(feature = "c-hooks")]
#[no_mangle]
unsafe extern "C" fn __aeabi_assert(
    _expr: *const c_char,
    file: *const c_char,
    line: c_int,
) -> ! {
    // Safety: the C library passes a string literal.
    unsafe { c_assert(file, line) }
}

/// emlib's `EFM_ASSERT` failure path.
#[cfg(feature = "c-hooks")]
#[no_mangle]
#[allow(non_snake_case)]
unsafe extern "C" fn assertEFM(file: *const c_char, line: c_int) -> ! {
    // Safety: emlib passes `__FILE__`.
    unsafe { c_assert(file, line) }
}

#[cfg(feature = "c-hooks")]
#[no_mangle]
#[allow(non_snake_case)]
extern "C" fn RAILCb_AssertFailed(_rail: *mut c_void, error_code: u32) -> ! {
    crate::rail_assert(error_code)
}

/// IAR C-RUN reports a failed check with a pointer to its error word.
///
/// # Safety
///
/// `info` must be null or point at a readable `u32`.
#[cfg(feature = "c-hooks")]
#[no_mangle]
#[allow(non_snake_case)]
unsafe extern "C" fn __iar_ReportCheckFailed(info: *const c_void) -> ! {
    let code = if info.is_null() {
        0
    } else {
        // Safety: per our contract. The runtime makes no promise about
        // alignment, hence the unaligned read.
        unsafe { info.cast::<u32>().read_unaligned() }
    };
    crate::crun_error(code)
}

#[cfg(feature = "c-hooks")]
#[no_mangle]
extern "C" fn _exit(status: c_int) -> ! {
    crate::abnormal_exit(status)
}

// `__stack_chk_fail` is called with the failing function's return address
// still in LR. Grab it before a prologue gets a chance to spill over it.
#[cfg(feature = "c-hooks")]
core::arch::global_asm! {"
    .section .text.__wrap___stack_chk_fail
    .globl __wrap___stack_chk_fail
    .type __wrap___stack_chk_fail,function
    .thumb_func
    __wrap___stack_chk_fail:
        mov r0, lr
        ldr r1, =crash_stack_protector
        bx r1
        .ltorg
    ",
}

#[cfg(feature = "c-hooks")]
#[no_mangle]
extern "C" fn crash_stack_protector(return_address: u32) -> ! {
    crate::stack_protector(return_address)
}

/// FreeRTOS calls this (with `configCHECK_FOR_STACK_OVERFLOW` set) from
/// the context switch when a task's stack has overrun its limit.
///
/// # Safety
///
/// `task_name` must be null or a C string.
#[cfg(feature = "freertos")]
#[no_mangle]
#[allow(non_snake_case)]
unsafe extern "C" fn vApplicationStackOverflowHook(
    _task: *mut c_void,
    task_name: *const c_char,
) -> ! {
    // Safety: FreeRTOS passes the name out of the task control block.
    let name = unsafe { c_str_prefix(task_name, TaskName::CAPACITY) };
    crate::capture(|slot| slot.write_stack_overflow(name))
}
