// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ARMv6-M/ARMv7-M/ARMv8-M support.
//!
//! # Hard faults
//!
//! The `HardFault` vector defined here replaces `cortex-m-rt`'s default
//! (which is only `PROVIDE`d by its linker script). On exception entry the
//! hardware pushes eight registers onto whichever stack was in use:
//!
//! ```text
//! sp + 0x00  r0
//! sp + 0x04  r1
//! sp + 0x08  r2
//! sp + 0x0c  r3
//! sp + 0x10  r12
//! sp + 0x14  lr
//! sp + 0x18  return address
//! sp + 0x1c  xPSR
//! ```
//!
//! Bit 2 of the EXC_RETURN value in LR says which stack that was: set for
//! the process stack (thread code under an RTOS), clear for the main stack
//! (handlers, or bare-metal code). The vector picks the right one and
//! tail-calls `crash_hard_fault` with it.
//!
//! The vector sticks to instructions ARMv6-M has (no `tst` with an
//! immediate, no `ite`), so the same text works on every M-profile core.

use core::arch::global_asm;

use crash_record::FaultStatus;

/// Resets the part through `SCB.AIRCR.SYSRESETREQ`.
pub fn system_reset() -> ! {
    cortex_m::peripheral::SCB::sys_reset()
}

/// Debug Halting Control and Status Register.
#[cfg(not(armv6m))]
const DHCSR: *const u32 = 0xe000_edf0 as *const u32;
#[cfg(not(armv6m))]
const DHCSR_C_DEBUGEN: u32 = 1 << 0;

/// Stops at a breakpoint if a debugger is attached, so the failure can be
/// inspected in place before the record is written and the part resets.
#[inline(always)]
pub fn halt_if_debugger() {
    // ARMv6-M parts need not let software see DHCSR.
    #[cfg(all(feature = "halt-if-debugger", not(armv6m)))]
    {
        // Safety: DHCSR is always mapped on ARMv7-M and ARMv8-M.
        let dhcsr = unsafe { core::ptr::read_volatile(DHCSR) };
        if dhcsr & DHCSR_C_DEBUGEN != 0 {
            cortex_m::asm::bkpt();
        }
    }
}

#[cfg(not(armv6m))]
mod scb {
    pub const CFSR: *const u32 = 0xe000_ed28 as *const u32;
    pub const HFSR: *const u32 = 0xe000_ed2c as *const u32;
    pub const MMFAR: *const u32 = 0xe000_ed34 as *const u32;
    pub const BFAR: *const u32 = 0xe000_ed38 as *const u32;
    pub const AFSR: *const u32 = 0xe000_ed3c as *const u32;
}

/// Reads the fault status and address registers.
#[cfg(not(armv6m))]
pub fn fault_status() -> FaultStatus {
    // Safety: these are architecturally defined, always-readable SCB
    // registers.
    unsafe {
        FaultStatus {
            cfsr: core::ptr::read_volatile(scb::CFSR),
            hfsr: core::ptr::read_volatile(scb::HFSR),
            mmfar: core::ptr::read_volatile(scb::MMFAR),
            bfar: core::ptr::read_volatile(scb::BFAR),
            afsr: core::ptr::read_volatile(scb::AFSR),
        }
    }
}

/// ARMv6-M has no configurable fault status; report zeros.
#[cfg(armv6m)]
pub fn fault_status() -> FaultStatus {
    FaultStatus::default()
}

#[cfg(feature = "hard-fault")]
global_asm! {"
    .section .text.HardFault
    .globl HardFault
    .type HardFault,function
    .thumb_func
    HardFault:
        movs r0, #4
        mov r1, lr
        tst r0, r1
        beq 1f
        mrs r0, PSP
        b 2f
    1:
        mrs r0, MSP
    2:
        ldr r1, =crash_hard_fault
        bx r1
        .ltorg
    ",
}

/// Rust half of the `HardFault` vector.
///
/// # Safety
///
/// Only the vector above may call this, with `frame` pointing at the
/// registers the hardware stacked on exception entry.
#[cfg(feature = "hard-fault")]
#[no_mangle]
unsafe extern "C" fn crash_hard_fault(
    frame: *const crash_record::StackedFrame,
) -> ! {
    // Safety: per our contract, `frame` points at the stacked registers,
    // which are word-aligned.
    let frame = unsafe { core::ptr::read_volatile(frame) };
    let dump = crash_record::FaultDump::new(&frame, &fault_status());
    crate::capture(|slot| slot.write_fault(&dump))
}
