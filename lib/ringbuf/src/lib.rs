// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt-safe trace ring buffers
//!
//! This is the structured trace facility used by the crash handler and the
//! action scheduler. Instead of formatting text, code records small `Copy`
//! events into a static ring buffer that can be read out with a debugger
//! (or with GDB's `print`) after the fact.
//!
//! Unlike a per-task ring buffer, entries here may be appended from several
//! execution contexts at once: RTOS threads, timer-expiry callbacks running
//! in interrupt context, and so on. Every access therefore goes through a
//! `critical_section::Mutex`, which on a Cortex-M masks interrupts for the
//! handful of instructions needed to update the buffer.
//!
//! ## Creating a ring buffer
//!
//! Ring buffers are instantiated with the [`ringbuf!`] macro, to which one
//! must provide the type of per-entry payload, the number of entries, and a
//! static initializer:
//!
//! ```
//! #[derive(Copy, Clone, Debug, PartialEq)]
//! enum Trace {
//!     None,
//!     Armed(u32),
//! }
//! ringbuf!(Trace, 16, Trace::None);
//! ```
//!
//! Entries are then added with [`ringbuf_entry!`]:
//!
//! ```
//! ringbuf_entry!(Trace::Armed(delay_ms));
//! ```
//!
//! A name can be given to both macros if a module needs more than one
//! buffer; otherwise the buffer is called `__RINGBUF`.
//!
//! ## Inspecting a ring buffer via GDB
//!
//! ```console
//! (gdb) set print pretty on
//! (gdb) print action_scheduler::__RINGBUF
//! ```
//!
//! The interesting part is `data.value.buffer`; `last` is the index of the
//! most recent entry.

#![no_std]

use core::cell::RefCell;

/// Re-exported so that code generated by the macros can always find it.
pub use critical_section;

/// The type of a static declared by [`ringbuf!`].
pub type StaticRingbuf<T, const N: usize> =
    critical_section::Mutex<RefCell<Ringbuf<T, N>>>;

/// Declares a ringbuffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ringbuffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// If you omit the name, it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::StaticRingbuf<$t, $n> =
            $crate::critical_section::Mutex::new(core::cell::RefCell::new(
                $crate::Ringbuf {
                    last: None,
                    buffer: [$crate::RingbufEntry {
                        line: 0,
                        generation: 0,
                        count: 0,
                        payload: $init,
                    }; $n],
                },
            ));
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
}

/// Inserts data into a named ringbuffer (which should have been declared with
/// the `ringbuf!` macro).
///
/// `ringbuf_entry!(NAME, expr)` will insert `expr` into the ringbuffer called
/// `NAME`. Without a name, this defaults to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before entering the critical section, so that
        // whatever it computes runs with interrupts enabled.
        let (p, buf) = ($payload, &$buf);
        $crate::critical_section::with(|cs| {
            $crate::Ringbuf::entry(
                &mut *buf.borrow_ref_mut(cs),
                line!() as u16,
                p,
            );
        });
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

///
/// A single [`Ringbuf`] entry. When an entry is recorded with an identical
/// payload to the most recent entry (in terms of both `line` and `payload`),
/// `count` is incremented rather than generating a new entry.
///
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size. In practice, instantiating
/// this directly is strange -- see the [`ringbuf!`] macro.
///
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    pub fn entry(&mut self, line: u16, payload: T) {
        // None is treated as an out-of-range index: the first entry then
        // lands in slot 0 and is never merged with the initializer.
        let last = self.last.unwrap_or(usize::MAX);

        // get_mut also covers a corrupted `last`; we just start over at 0.
        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        // No hardware divide on the smaller parts, so no remainder here.
        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// Returns the most recently recorded entry, if any.
    pub fn latest(&self) -> Option<&RingbufEntry<T>> {
        self.last.and_then(|i| self.buffer.get(i))
    }

    /// Iterates over recorded entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) => last.wrapping_add(1),
            None => 0,
        };
        (0..N)
            .map(move |i| {
                let ndx = start.wrapping_add(i);
                if ndx >= N {
                    ndx - N
                } else {
                    ndx
                }
            })
            .filter_map(move |ndx| self.buffer.get(ndx))
            .filter(|ent| ent.count != 0)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use std::vec::Vec;

    fn make_uut() -> Ringbuf<u32, 4> {
        Ringbuf {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: 0,
            }; 4],
        }
    }

    #[test]
    fn first_entry_lands_in_slot_zero() {
        let mut uut = make_uut();
        uut.entry(10, 0);

        assert_eq!(uut.last, Some(0));
        let ent = uut.latest().unwrap();
        assert_eq!(ent.line, 10);
        assert_eq!(ent.count, 1);
        assert_eq!(ent.generation, 1);
    }

    #[test]
    fn repeats_are_counted() {
        let mut uut = make_uut();
        uut.entry(10, 7);
        uut.entry(10, 7);
        uut.entry(10, 7);

        assert_eq!(uut.last, Some(0));
        assert_eq!(uut.latest().unwrap().count, 3);

        // Same payload from a different line is a new entry.
        uut.entry(11, 7);
        assert_eq!(uut.last, Some(1));
    }

    #[test]
    fn wraps_and_bumps_generation() {
        let mut uut = make_uut();
        for i in 0..6 {
            uut.entry(1, i);
        }

        assert_eq!(uut.last, Some(1));
        assert_eq!(uut.buffer[0].payload, 4);
        assert_eq!(uut.buffer[0].generation, 2);
        assert_eq!(
            uut.iter().map(|e| e.payload).collect::<Vec<_>>(),
            [2, 3, 4, 5]
        );
    }

    #[test]
    fn iter_skips_unused_slots() {
        let mut uut = make_uut();
        uut.entry(1, 100);
        uut.entry(1, 200);

        assert_eq!(
            uut.iter().map(|e| e.payload).collect::<Vec<_>>(),
            [100, 200]
        );
    }

    #[test]
    fn corrupted_last_starts_over() {
        let mut uut = make_uut();
        uut.last = Some(99);
        uut.entry(1, 5);
        assert_eq!(uut.last, Some(0));
    }

    #[derive(Copy, Clone, Debug, PartialEq)]
    enum Trace {
        None,
        Hit(u8),
    }
    ringbuf!(Trace, 8, Trace::None);

    #[test]
    fn macro_records_through_critical_section() {
        for _ in 0..2 {
            ringbuf_entry!(Trace::Hit(3));
        }

        critical_section::with(|cs| {
            let buf = __RINGBUF.borrow_ref(cs);
            let ent = buf.latest().unwrap();
            assert_eq!(ent.payload, Trace::Hit(3));
            assert_eq!(ent.count, 2);
        });
    }
}
