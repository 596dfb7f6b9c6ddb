// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent crash records.
//!
//! A crash record is a small tagged union describing the most recent fatal
//! event (assertion, hardware fault, stack overflow, ...). It lives in a
//! [`CrashSlot`], a fixed-layout block of RAM that the startup code does not
//! initialize, so that whatever the crash handler wrote before resetting the
//! part is still there at the next boot.
//!
//! Because the slot is never initialized, anything read from it is suspect:
//! after a power cycle it holds whatever the SRAM came up as. The persisted
//! form is therefore plain bytes ([`RawCrashRecord`]), every bit pattern of
//! which is acceptable, and the kind is range-checked before the payload is
//! trusted.

#![cfg_attr(not(test), no_std)]

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use static_assertions::const_assert;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

mod bounded;
mod report;

pub use bounded::{c_str_prefix, str_prefix, BoundedStr};
pub use report::{CrashReport, ReportText, NO_CRASH_TEXT, REPORT_MAX_LEN};

/// Size of the file name buffer in an assertion record, terminator included.
pub const FILE_NAME_SIZE: usize = 128;
/// Size of the task name buffer in a stack overflow record, terminator
/// included.
pub const TASK_NAME_SIZE: usize = 64;

pub type FileName = BoundedStr<FILE_NAME_SIZE>;
pub type TaskName = BoundedStr<TASK_NAME_SIZE>;

/// Discriminant of a persisted record.
///
/// `None` and anything at or above [`CRASH_KIND_MAX`] mean there is no valid
/// record.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum CrashKind {
    None = 0,
    Assert = 1,
    RailAssert = 2,
    StackOverflow = 3,
    StackProtector = 4,
    Fault = 5,
    CRunError = 6,
    Exit = 7,
}

pub const CRASH_KIND_MAX: u32 = 8;

impl CrashKind {
    /// Decodes a persisted discriminant, accepting only kinds that carry a
    /// record.
    pub fn from_raw(raw: u32) -> Option<Self> {
        if raw == CrashKind::None as u32 || raw >= CRASH_KIND_MAX {
            return None;
        }
        Self::from_u32(raw)
    }
}

/// The registers pushed by the hardware on exception entry, in stack order.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct StackedFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub return_address: u32,
    pub xpsr: u32,
}

/// System Control Block fault status, as read in the fault handler.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FaultStatus {
    pub cfsr: u32,
    pub hfsr: u32,
    pub mmfar: u32,
    pub bfar: u32,
    pub afsr: u32,
}

/// Everything recorded about a hardware fault.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct FaultDump {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub return_address: u32,
    pub xpsr: u32,
    pub cfsr: u32,
    pub hfsr: u32,
    pub mmfar: u32,
    pub bfar: u32,
    pub afsr: u32,
}

impl FaultDump {
    pub fn new(frame: &StackedFrame, status: &FaultStatus) -> Self {
        Self {
            r0: frame.r0,
            r1: frame.r1,
            r2: frame.r2,
            r3: frame.r3,
            r12: frame.r12,
            lr: frame.lr,
            return_address: frame.return_address,
            xpsr: frame.xpsr,
            cfsr: status.cfsr,
            hfsr: status.hfsr,
            mmfar: status.mmfar,
            bfar: status.bfar,
            afsr: status.afsr,
        }
    }
}

#[derive(Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct AssertPayload {
    file: [u8; FILE_NAME_SIZE],
    line: u32,
}

/// Bytes reserved for the payload: enough for the largest variant.
pub const PAYLOAD_SIZE: usize = 132;

const LINE_OFFSET: usize = core::mem::offset_of!(AssertPayload, line);

const_assert!(core::mem::size_of::<AssertPayload>() <= PAYLOAD_SIZE);
const_assert!(core::mem::size_of::<FaultDump>() <= PAYLOAD_SIZE);
const_assert!(TASK_NAME_SIZE <= PAYLOAD_SIZE);

/// The persisted form of a crash record.
#[derive(Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct RawCrashRecord {
    pub kind: u32,
    pub payload: [u8; PAYLOAD_SIZE],
}

const_assert!(core::mem::size_of::<RawCrashRecord>() == 4 + PAYLOAD_SIZE);

const RECORD_WORDS: usize = core::mem::size_of::<RawCrashRecord>() / 4;

impl RawCrashRecord {
    pub const ZERO: Self = Self {
        kind: 0,
        payload: [0; PAYLOAD_SIZE],
    };
}

/// A decoded crash record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CrashRecord {
    Assert { file: FileName, line: u32 },
    RailAssert { error_code: u32 },
    StackOverflow { task: TaskName },
    StackProtector { return_address: u32 },
    Fault(FaultDump),
    CRunError { error_code: u32 },
    Exit { status: i32 },
}

impl CrashRecord {
    pub fn assert(file: &str, line: u32) -> Self {
        Self::Assert {
            file: FileName::truncated(file),
            line,
        }
    }

    pub fn stack_overflow(task: &str) -> Self {
        Self::StackOverflow {
            task: TaskName::truncated(task),
        }
    }

    pub fn kind(&self) -> CrashKind {
        match self {
            Self::Assert { .. } => CrashKind::Assert,
            Self::RailAssert { .. } => CrashKind::RailAssert,
            Self::StackOverflow { .. } => CrashKind::StackOverflow,
            Self::StackProtector { .. } => CrashKind::StackProtector,
            Self::Fault(_) => CrashKind::Fault,
            Self::CRunError { .. } => CrashKind::CRunError,
            Self::Exit { .. } => CrashKind::Exit,
        }
    }

    /// Decodes `raw`, or returns `None` if its kind is out of range.
    ///
    /// Strings are re-terminated on the way out, so an in-range kind over a
    /// garbage payload still decodes to something safe to print.
    pub fn decode(raw: &RawCrashRecord) -> Option<Self> {
        let src = &raw.payload[..];
        let record = match CrashKind::from_raw(raw.kind)? {
            CrashKind::None => return None,
            CrashKind::Assert => {
                let (p, _) = AssertPayload::read_from_prefix(src).ok()?;
                Self::Assert {
                    file: FileName::from_raw(p.file),
                    line: p.line,
                }
            }
            CrashKind::RailAssert => Self::RailAssert {
                error_code: u32::read_from_prefix(src).ok()?.0,
            },
            CrashKind::StackOverflow => {
                let (task, _) =
                    <[u8; TASK_NAME_SIZE]>::read_from_prefix(src).ok()?;
                Self::StackOverflow {
                    task: TaskName::from_raw(task),
                }
            }
            CrashKind::StackProtector => Self::StackProtector {
                return_address: u32::read_from_prefix(src).ok()?.0,
            },
            CrashKind::Fault => {
                Self::Fault(FaultDump::read_from_prefix(src).ok()?.0)
            }
            CrashKind::CRunError => Self::CRunError {
                error_code: u32::read_from_prefix(src).ok()?.0,
            },
            CrashKind::Exit => Self::Exit {
                status: i32::read_from_prefix(src).ok()?.0,
            },
        };
        Some(record)
    }
}

/// Why the part last came out of reset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResetReason {
    PowerOn,
    Pin,
    BrownOut,
    /// Requested by software through `SCB::AIRCR.SYSRESETREQ`, which is how
    /// the crash handler resets.
    System,
    Watchdog,
    Lockup,
    /// A cause the platform couldn't classify; the raw register value.
    Other(u32),
}

impl ResetReason {
    pub fn is_software_request(&self) -> bool {
        matches!(self, ResetReason::System)
    }
}

fn text_prefix(bytes: &[u8], max: usize) -> &[u8] {
    let end = bytes
        .iter()
        .take(max)
        .position(|&b| b == 0)
        .unwrap_or(bytes.len().min(max));
    &bytes[..end]
}

/// Storage for one [`RawCrashRecord`] that may start out uninitialized.
///
/// All access is volatile and happens inside a critical section: the
/// writer is usually a fault handler, and the compiler must not assume it
/// knows what the memory holds.
pub struct CrashSlot(UnsafeCell<MaybeUninit<RawCrashRecord>>);

// Safety: every access to the cell goes through `critical_section::with`.
unsafe impl Sync for CrashSlot {}

impl CrashSlot {
    /// A slot meant to be placed in a section the startup code leaves
    /// alone.
    pub const fn uninit() -> Self {
        Self(UnsafeCell::new(MaybeUninit::uninit()))
    }

    pub const fn zeroed() -> Self {
        Self(UnsafeCell::new(MaybeUninit::new(RawCrashRecord::ZERO)))
    }

    fn ptr(&self) -> *mut RawCrashRecord {
        self.0.get().cast()
    }

    /// Copies the persisted bytes out, whatever they are.
    pub fn snapshot(&self) -> RawCrashRecord {
        critical_section::with(|_| {
            // Safety: the pointer is valid and aligned, we hold the critical
            // section, and RawCrashRecord accepts any bit pattern.
            unsafe { core::ptr::read_volatile(self.ptr()) }
        })
    }

    pub fn raw_kind(&self) -> u32 {
        critical_section::with(|_| {
            // Safety: as in `snapshot`.
            unsafe {
                core::ptr::read_volatile(core::ptr::addr_of!((*self.ptr()).kind))
            }
        })
    }

    fn store(&self, raw: &RawCrashRecord) {
        critical_section::with(|_| {
            // Safety: the pointer is valid and aligned, and we hold the
            // critical section.
            unsafe { core::ptr::write_volatile(self.ptr(), *raw) }
        })
    }

    /// Zeroes the slot, sets `kind`, and copies each `(offset, bytes)` part
    /// into the payload, all in place.
    ///
    /// Nothing record-sized is built on the stack: the writers run on
    /// whatever stack the crash left behind. Parts are clipped to the
    /// payload.
    fn fill(&self, kind: CrashKind, parts: &[(usize, &[u8])]) {
        critical_section::with(|_| {
            let p = self.ptr();
            // Safety: the pointer is valid and aligned for the whole record,
            // every index stays inside it, and we hold the critical section.
            unsafe {
                let words = p.cast::<u32>();
                for i in 0..RECORD_WORDS {
                    words.add(i).write_volatile(0);
                }
                core::ptr::addr_of_mut!((*p).kind).write_volatile(kind as u32);

                let payload = core::ptr::addr_of_mut!((*p).payload).cast::<u8>();
                for &(offset, bytes) in parts {
                    let room = PAYLOAD_SIZE.saturating_sub(offset);
                    for (i, &b) in bytes.iter().take(room).enumerate() {
                        payload.add(offset + i).write_volatile(b);
                    }
                }
            }
        })
    }

    /// Records a failed assertion. `file` is cut to [`FileName::CAPACITY`]
    /// bytes, or at its first NUL.
    pub fn write_assert(&self, file: &[u8], line: u32) {
        let file = text_prefix(file, FileName::CAPACITY);
        self.fill(
            CrashKind::Assert,
            &[(0, file), (LINE_OFFSET, line.as_bytes())],
        );
    }

    /// Records a stack overflow in the named task, cut like
    /// [`CrashSlot::write_assert`] cuts file names.
    pub fn write_stack_overflow(&self, task: &[u8]) {
        let task = text_prefix(task, TaskName::CAPACITY);
        self.fill(CrashKind::StackOverflow, &[(0, task)]);
    }

    pub fn write_fault(&self, dump: &FaultDump) {
        self.fill(CrashKind::Fault, &[(0, dump.as_bytes())]);
    }

    pub fn write_rail_assert(&self, error_code: u32) {
        self.fill(CrashKind::RailAssert, &[(0, error_code.as_bytes())]);
    }

    pub fn write_stack_protector(&self, return_address: u32) {
        self.fill(CrashKind::StackProtector, &[(0, return_address.as_bytes())]);
    }

    pub fn write_crun_error(&self, error_code: u32) {
        self.fill(CrashKind::CRunError, &[(0, error_code.as_bytes())]);
    }

    pub fn write_exit(&self, status: i32) {
        self.fill(CrashKind::Exit, &[(0, status.as_bytes())]);
    }

    /// Replaces whatever is in the slot with `record`.
    pub fn write(&self, record: &CrashRecord) {
        match record {
            CrashRecord::Assert { file, line } => {
                self.write_assert(file.as_bytes(), *line)
            }
            CrashRecord::RailAssert { error_code } => {
                self.write_rail_assert(*error_code)
            }
            CrashRecord::StackOverflow { task } => {
                self.write_stack_overflow(task.as_bytes())
            }
            CrashRecord::StackProtector { return_address } => {
                self.write_stack_protector(*return_address)
            }
            CrashRecord::Fault(dump) => self.write_fault(dump),
            CrashRecord::CRunError { error_code } => {
                self.write_crun_error(*error_code)
            }
            CrashRecord::Exit { status } => self.write_exit(*status),
        }
    }

    /// The persisted record, if the slot holds a valid one.
    pub fn read(&self) -> Option<CrashRecord> {
        CrashRecord::decode(&self.snapshot())
    }

    pub fn clear(&self) {
        self.store(&RawCrashRecord::ZERO);
    }

    /// Decides, once per boot, whether the slot's contents can be trusted.
    ///
    /// A record survives only a software-requested reset, which is the only
    /// way the crash handler leaves. After any other reset the slot is
    /// cleared. Returns the kind of the preserved record, if any.
    pub fn recover(&self, reason: ResetReason) -> Option<CrashKind> {
        critical_section::with(|_| {
            let kept = if reason.is_software_request() {
                self.read().map(|r| r.kind())
            } else {
                None
            };
            if kept.is_none() {
                self.clear();
            }
            kept
        })
    }

    /// Formats the record, if there is one, and clears the slot so that it
    /// is reported only once.
    pub fn take_report(&self) -> Option<CrashReport> {
        let raw = critical_section::with(|_| {
            let raw = self.snapshot();
            if CrashKind::from_raw(raw.kind).is_some() {
                self.clear();
            }
            raw
        });
        CrashRecord::decode(&raw).map(|r| CrashReport::new(&r))
    }

    #[cfg(test)]
    fn load_raw(&self, raw: &RawCrashRecord) {
        self.store(raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn assert_round_trip_and_report() {
        let slot = CrashSlot::zeroed();
        slot.write(&CrashRecord::assert("main.c", 42));

        match slot.read() {
            Some(CrashRecord::Assert { file, line }) => {
                assert_eq!(file, "main.c");
                assert_eq!(line, 42);
            }
            other => panic!("unexpected record {other:?}"),
        }

        let report = slot.take_report().unwrap();
        assert_eq!(report.kind(), CrashKind::Assert);
        assert_eq!(report.as_str(), "[ASSERT in main.c on line 42]\r\n");

        // Consumed exactly once.
        assert!(slot.take_report().is_none());
        assert_eq!(slot.raw_kind(), 0);
    }

    #[test]
    fn empty_slot_reads_nothing() {
        let slot = CrashSlot::zeroed();
        assert!(slot.read().is_none());
        assert!(slot.take_report().is_none());
    }

    #[test]
    fn every_variant_survives_encoding() {
        let records = [
            CrashRecord::assert("drivers/radio.c", 1234),
            CrashRecord::RailAssert { error_code: 52 },
            CrashRecord::stack_overflow("IDLE"),
            CrashRecord::StackProtector {
                return_address: 0x0000_4f2b,
            },
            CrashRecord::Fault(FaultDump {
                r0: 1,
                cfsr: 0x0001_0000,
                afsr: 0xffff_ffff,
                ..Default::default()
            }),
            CrashRecord::CRunError { error_code: 7 },
            CrashRecord::Exit { status: i32::MIN },
        ];
        let slot = CrashSlot::zeroed();
        for r in records {
            slot.write(&r);
            assert_eq!(slot.raw_kind(), r.kind() as u32);
            assert_eq!(slot.read(), Some(r));
        }
    }

    #[test]
    fn later_write_leaves_no_trace_of_earlier() {
        let slot = CrashSlot::zeroed();
        slot.write(&CrashRecord::Fault(FaultDump {
            r0: 0xaaaa_aaaa,
            afsr: 0xbbbb_bbbb,
            ..Default::default()
        }));
        slot.write(&CrashRecord::Exit { status: 3 });

        let raw = slot.snapshot();
        assert_eq!(raw.kind, CrashKind::Exit as u32);
        assert_eq!(&raw.payload[..4], &3i32.to_ne_bytes());
        assert!(raw.payload[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn direct_writers_overwrite_garbage_completely() {
        let garbage = RawCrashRecord {
            kind: 0xdead_beef,
            payload: [0xa5; PAYLOAD_SIZE],
        };
        let slot = CrashSlot::zeroed();

        slot.load_raw(&garbage);
        slot.write_rail_assert(0x1234);
        let raw = slot.snapshot();
        assert_eq!(raw.kind, CrashKind::RailAssert as u32);
        assert_eq!(&raw.payload[..4], &0x1234u32.to_ne_bytes());
        assert!(raw.payload[4..].iter().all(|&b| b == 0));

        slot.load_raw(&garbage);
        slot.write_assert(b"app.c", 77);
        let raw = slot.snapshot();
        assert_eq!(&raw.payload[..6], b"app.c\0");
        assert!(raw.payload[6..LINE_OFFSET].iter().all(|&b| b == 0));
        assert_eq!(slot.read(), Some(CrashRecord::assert("app.c", 77)));

        slot.load_raw(&garbage);
        slot.write_stack_overflow(b"Tmr Svc");
        let raw = slot.snapshot();
        assert!(raw.payload[7..].iter().all(|&b| b == 0));
        assert_eq!(slot.read(), Some(CrashRecord::stack_overflow("Tmr Svc")));

        slot.load_raw(&garbage);
        slot.write_exit(-2);
        assert_eq!(slot.read(), Some(CrashRecord::Exit { status: -2 }));
    }

    #[test]
    fn byte_names_stop_at_nul_or_capacity() {
        let slot = CrashSlot::zeroed();

        slot.write_assert(b"boot.c\0junk after the terminator", 3);
        assert_eq!(slot.read(), Some(CrashRecord::assert("boot.c", 3)));

        slot.write_stack_overflow(&[b'y'; 200]);
        let raw = slot.snapshot();
        assert_eq!(raw.payload[TASK_NAME_SIZE - 1], 0);
        match slot.read() {
            Some(CrashRecord::StackOverflow { task }) => {
                assert_eq!(task.len(), TaskName::CAPACITY)
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn long_names_are_cut_and_terminated() {
        let long = "x".repeat(500);
        let slot = CrashSlot::zeroed();

        slot.write(&CrashRecord::stack_overflow(&long));
        let raw = slot.snapshot();
        assert_eq!(raw.payload[TASK_NAME_SIZE - 1], 0);
        match slot.read() {
            Some(CrashRecord::StackOverflow { task }) => {
                assert_eq!(task.len(), TASK_NAME_SIZE - 1)
            }
            other => panic!("unexpected record {other:?}"),
        }

        slot.write(&CrashRecord::assert(&long, 9));
        match slot.read() {
            Some(CrashRecord::Assert { file, line }) => {
                assert_eq!(file.len(), FILE_NAME_SIZE - 1);
                assert_eq!(line, 9);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn software_reset_keeps_record() {
        let slot = CrashSlot::zeroed();
        slot.write(&CrashRecord::RailAssert { error_code: 1 });
        assert_eq!(slot.recover(ResetReason::System), Some(CrashKind::RailAssert));
        assert!(slot.read().is_some());
    }

    #[test]
    fn other_resets_discard_record() {
        for reason in [
            ResetReason::PowerOn,
            ResetReason::Pin,
            ResetReason::BrownOut,
            ResetReason::Watchdog,
            ResetReason::Lockup,
            ResetReason::Other(0x40),
        ] {
            let slot = CrashSlot::zeroed();
            slot.write(&CrashRecord::RailAssert { error_code: 1 });
            assert_eq!(slot.recover(reason), None);
            assert!(slot.read().is_none());
        }
    }

    #[test]
    fn software_reset_with_garbage_clears() {
        let slot = CrashSlot::zeroed();
        slot.load_raw(&RawCrashRecord {
            kind: 0x5a5a_5a5a,
            payload: [0xa5; PAYLOAD_SIZE],
        });
        assert_eq!(slot.recover(ResetReason::System), None);
        let raw = slot.snapshot();
        assert_eq!(raw.kind, 0);
        assert!(raw.payload.iter().all(|&b| b == 0));
    }

    #[test]
    fn kind_bounds() {
        assert_eq!(CrashKind::from_raw(0), None);
        assert_eq!(CrashKind::from_raw(1), Some(CrashKind::Assert));
        assert_eq!(CrashKind::from_raw(7), Some(CrashKind::Exit));
        assert_eq!(CrashKind::from_raw(CRASH_KIND_MAX), None);
    }

    proptest! {
        #[test]
        fn out_of_range_kind_is_ignored(
            kind in prop_oneof![Just(0u32), CRASH_KIND_MAX..=u32::MAX],
            fill in any::<u8>(),
        ) {
            let slot = CrashSlot::zeroed();
            slot.load_raw(&RawCrashRecord {
                kind,
                payload: [fill; PAYLOAD_SIZE],
            });
            prop_assert!(slot.read().is_none());
            prop_assert!(slot.take_report().is_none());
            // Not consumed either: clearing is the reader's call.
            prop_assert_eq!(slot.raw_kind(), kind);
        }

        #[test]
        fn garbage_payload_still_reports(
            kind in 1u32..CRASH_KIND_MAX,
            payload in proptest::collection::vec(any::<u8>(), PAYLOAD_SIZE),
        ) {
            let mut raw = RawCrashRecord::ZERO;
            raw.kind = kind;
            raw.payload.copy_from_slice(&payload);

            let slot = CrashSlot::zeroed();
            slot.load_raw(&raw);
            let report = slot.take_report().unwrap();
            prop_assert_eq!(report.kind() as u32, kind);
            prop_assert!(report.as_str().len() <= REPORT_MAX_LEN);
            prop_assert!(report.as_str().ends_with("\r\n"));
            prop_assert!(slot.read().is_none());
        }
    }
}
