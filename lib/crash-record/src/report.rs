// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Human-readable rendering of a crash record.

use core::fmt::{self, Write};

use crate::{CrashKind, CrashRecord};

/// Longest report text, in bytes. Longer output is cut short.
pub const REPORT_MAX_LEN: usize = 300;

/// What to show when asked for the previous crash and there wasn't one.
pub const NO_CRASH_TEXT: &str = "No previous crash info";

pub type ReportText = heapless::String<REPORT_MAX_LEN>;

/// A formatted crash record, ready to be handed to whatever reporting
/// channel the application has (console, CoAP resource, telemetry).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CrashReport {
    kind: CrashKind,
    text: ReportText,
}

impl CrashReport {
    pub fn new(record: &CrashRecord) -> Self {
        let mut text = ReportText::new();
        // Truncating never reports an error, and CrashRecord's Display
        // doesn't produce any of its own.
        let _ = write!(Truncating(&mut text), "{record}");
        Self {
            kind: record.kind(),
            text,
        }
    }

    pub fn kind(&self) -> CrashKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        self.text.as_str()
    }
}

impl fmt::Display for CrashReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for CrashRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashRecord::Assert { file, line } => {
                write!(f, "[ASSERT in {file} on line {line}]\r\n")
            }
            CrashRecord::RailAssert { error_code } => {
                write!(f, "[RAIL ASSERT {error_code}]\r\n")
            }
            CrashRecord::StackOverflow { task } => {
                write!(f, "[STACK OVERFLOW failure in task \"{task}\"]\r\n")
            }
            CrashRecord::StackProtector { return_address } => {
                write!(f, "[STACK PROTECTOR failure in 0x{return_address:08x}]\r\n")
            }
            CrashRecord::Fault(d) => {
                // The return address and LR are what to look up in the map
                // file to find where the fault came from.
                write!(f, "[FAULT CFSR: 0x{:08x}\r\n", d.cfsr)?;
                write!(
                    f,
                    "R0:   0x{:08x}, R1:    0x{:08x}, \
                     R2:   0x{:08x}, R3:   0x{:08x}\r\n",
                    d.r0, d.r1, d.r2, d.r3
                )?;
                write!(
                    f,
                    "R12:  0x{:08x}, LR:    0x{:08x}, \
                     RET:  0x{:08x}, XPSR: 0x{:08x}\r\n",
                    d.r12, d.lr, d.return_address, d.xpsr
                )?;
                write!(
                    f,
                    "HFSR: 0x{:08x}, MMFAR: 0x{:08x}, \
                     BFAR: 0x{:08x}, AFSR: 0x{:08x}]\r\n",
                    d.hfsr, d.mmfar, d.bfar, d.afsr
                )
            }
            CrashRecord::CRunError { error_code } => {
                write!(f, "[C-RUN error 0x{error_code:08x}]\r\n")
            }
            CrashRecord::Exit { status } => {
                write!(f, "[EXIT status {status}]\r\n")
            }
        }
    }
}

/// A `fmt::Write` that silently drops whatever doesn't fit, the way
/// `snprintf` would, but never splits a character.
struct Truncating<'a, const N: usize>(&'a mut heapless::String<N>);

impl<const N: usize> Write for Truncating<'_, N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FaultDump;

    fn render(record: CrashRecord) -> CrashReport {
        CrashReport::new(&record)
    }

    #[test]
    fn assert_text() {
        let r = render(CrashRecord::assert("main.c", 42));
        assert_eq!(r.kind(), CrashKind::Assert);
        assert_eq!(r.as_str(), "[ASSERT in main.c on line 42]\r\n");
    }

    #[test]
    fn rail_assert_text() {
        let r = render(CrashRecord::RailAssert { error_code: 17 });
        assert_eq!(r.as_str(), "[RAIL ASSERT 17]\r\n");
    }

    #[test]
    fn stack_overflow_text() {
        let r = render(CrashRecord::stack_overflow("wisun_task"));
        assert_eq!(
            r.as_str(),
            "[STACK OVERFLOW failure in task \"wisun_task\"]\r\n"
        );
    }

    #[test]
    fn stack_protector_text() {
        let r = render(CrashRecord::StackProtector {
            return_address: 0x0801_2a4d,
        });
        assert_eq!(r.as_str(), "[STACK PROTECTOR failure in 0x08012a4d]\r\n");
    }

    #[test]
    fn crun_and_exit_text() {
        let r = render(CrashRecord::CRunError { error_code: 0xbeef });
        assert_eq!(r.as_str(), "[C-RUN error 0x0000beef]\r\n");

        let r = render(CrashRecord::Exit { status: -3 });
        assert_eq!(r.kind(), CrashKind::Exit);
        assert_eq!(r.as_str(), "[EXIT status -3]\r\n");
    }

    #[test]
    fn fault_dump_lists_every_register() {
        let dump = FaultDump {
            r0: 0x10,
            r1: 0x11,
            r2: 0x12,
            r3: 0x13,
            r12: 0x1c,
            lr: 0x0800_1235,
            return_address: 0x0800_1000,
            xpsr: 0x6100_0000,
            cfsr: 0x0000_8200,
            hfsr: 0x4000_0000,
            mmfar: 0xe000_ed34,
            bfar: 0xdead_beef,
            afsr: 0,
        };
        let r = render(CrashRecord::Fault(dump));
        assert_eq!(
            r.as_str(),
            "[FAULT CFSR: 0x00008200\r\n\
             R0:   0x00000010, R1:    0x00000011, R2:   0x00000012, R3:   0x00000013\r\n\
             R12:  0x0000001c, LR:    0x08001235, RET:  0x08001000, XPSR: 0x61000000\r\n\
             HFSR: 0x40000000, MMFAR: 0xe000ed34, BFAR: 0xdeadbeef, AFSR: 0x00000000]\r\n"
        );
        assert!(r.as_str().len() <= REPORT_MAX_LEN);
    }

    #[test]
    fn longest_assert_fits() {
        let file = "f".repeat(200);
        let r = render(CrashRecord::assert(&file, u32::MAX));
        assert!(r.as_str().ends_with(" on line 4294967295]\r\n"));
    }

    #[test]
    fn overlong_output_is_cut() {
        let mut text = heapless::String::<8>::new();
        write!(Truncating(&mut text), "{}", "0123456789").unwrap();
        assert_eq!(text.as_str(), "01234567");

        // Multi-byte characters are not split.
        let mut text = heapless::String::<4>::new();
        write!(Truncating(&mut text), "abcé").unwrap();
        assert_eq!(text.as_str(), "abc");
    }
}
