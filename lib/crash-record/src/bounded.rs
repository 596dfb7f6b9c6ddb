// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A fixed-size, always-terminated string buffer.
//!
//! `BoundedStr<N>` is a `[u8; N]` holding at most `N - 1` bytes of text
//! followed by at least one NUL. Unlike a length-prefixed string, the buffer
//! is meaningful on its own: it can be dropped straight into the persisted
//! crash record, and whatever is read back (including garbage left in RAM by
//! a power cycle) still yields a terminated, valid `&str`.
//!
//! Construction never fails. Input that does not fit is cut short, at a
//! character boundary for `&str` input and at a byte boundary for raw C
//! strings.

use core::ffi::c_char;
use core::fmt;

/// The longest prefix of `s` that is at most `max` bytes and ends on a
/// character boundary.
pub fn str_prefix(s: &str, max: usize) -> &[u8] {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s.as_bytes()[..end]
}

/// The bytes of the C string at `s`, without its terminator, reading no more
/// than `max` bytes. A null pointer reads as empty.
///
/// The scan stops at `max` even if no terminator has been seen, so a
/// corrupted pointer into unterminated memory can't run away.
///
/// # Safety
///
/// `s` must be null, or readable up to its first NUL or for `max` bytes,
/// whichever comes first. The memory must not change for `'a`.
pub unsafe fn c_str_prefix<'a>(s: *const c_char, max: usize) -> &'a [u8] {
    if s.is_null() {
        return &[];
    }
    let s = s.cast::<u8>();
    let mut len = 0;
    // Safety: per our contract, each byte up to the first NUL (or `max`) is
    // readable.
    while len < max && unsafe { s.add(len).read() } != 0 {
        len += 1;
    }
    // Safety: we just read each of these bytes.
    unsafe { core::slice::from_raw_parts(s, len) }
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub struct BoundedStr<const N: usize> {
    buf: [u8; N],
}

impl<const N: usize> BoundedStr<N> {
    /// Number of text bytes that fit; one byte is kept for the terminator.
    pub const CAPACITY: usize = N - 1;

    pub const fn empty() -> Self {
        Self { buf: [0; N] }
    }

    /// Copies as much of `s` as fits, ending on a character boundary.
    pub fn truncated(s: &str) -> Self {
        Self::from_c_bytes(str_prefix(s, Self::CAPACITY))
    }

    /// Copies bytes up to the first NUL (or the end of `bytes`), keeping at
    /// most `CAPACITY` of them. The bytes need not be UTF-8.
    pub fn from_c_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0; N];
        for (dst, &src) in buf[..Self::CAPACITY]
            .iter_mut()
            .zip(bytes.iter().take_while(|&&b| b != 0))
        {
            *dst = src;
        }
        Self { buf }
    }

    /// Reinterprets a persisted buffer. The final byte is forced to NUL so
    /// that a buffer read from uninitialized memory is still terminated.
    pub fn from_raw(mut buf: [u8; N]) -> Self {
        buf[Self::CAPACITY] = 0;
        Self { buf }
    }

    pub const fn into_raw(self) -> [u8; N] {
        self.buf
    }

    /// The stored bytes, without the terminator.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.buf.iter().position(|&b| b == 0).unwrap_or(N);
        &self.buf[..len]
    }

    /// The longest valid UTF-8 prefix of the stored bytes.
    pub fn as_str(&self) -> &str {
        let bytes = self.as_bytes();
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => {
                core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or("")
            }
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf[0] == 0
    }
}

impl<const N: usize> Default for BoundedStr<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> PartialEq<str> for BoundedStr<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<const N: usize> PartialEq<&str> for BoundedStr<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<const N: usize> fmt::Display for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_str(), f)
    }
}

impl<const N: usize> fmt::Debug for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_string_is_kept() {
        let s = BoundedStr::<8>::truncated("main.c");
        assert_eq!(s, "main.c");
        assert_eq!(s.len(), 6);
        assert_eq!(s.into_raw(), *b"main.c\0\0");
    }

    #[test]
    fn exact_capacity_is_kept() {
        let s = BoundedStr::<8>::truncated("1234567");
        assert_eq!(s, "1234567");
        assert_eq!(s.into_raw()[7], 0);
    }

    #[test]
    fn long_string_is_cut() {
        let s = BoundedStr::<8>::truncated("a/very/long/path.c");
        assert_eq!(s, "a/very/");
    }

    #[test]
    fn cut_backs_off_to_char_boundary() {
        // 'é' is two bytes; the cut would otherwise land inside it.
        let s = BoundedStr::<8>::truncated("abcdefé");
        assert_eq!(s, "abcdef");
    }

    #[test]
    fn c_bytes_stop_at_nul() {
        let s = BoundedStr::<16>::from_c_bytes(b"idle\0garbage");
        assert_eq!(s, "idle");
    }

    #[test]
    fn raw_buffer_without_nul_is_terminated() {
        let s = BoundedStr::<4>::from_raw(*b"abcd");
        assert_eq!(s, "abc");
    }

    #[test]
    fn invalid_utf8_yields_valid_prefix() {
        let s = BoundedStr::<8>::from_c_bytes(&[b'o', b'k', 0xff, b'x']);
        assert_eq!(s.as_bytes(), &[b'o', b'k', 0xff, b'x']);
        assert_eq!(s.as_str(), "ok");
    }

    #[test]
    fn empty() {
        let s = BoundedStr::<4>::truncated("");
        assert!(s.is_empty());
        assert_eq!(s, BoundedStr::<4>::default());
    }

    #[test]
    fn c_null_pointer_is_empty() {
        // Safety: null is allowed.
        let bytes = unsafe { c_str_prefix(core::ptr::null(), 16) };
        assert!(bytes.is_empty());
    }

    #[test]
    fn c_scan_stops_at_nul() {
        let buf = *b"Tmr Svc\0ZZZZ";
        // Safety: `buf` is terminated.
        let bytes = unsafe { c_str_prefix(buf.as_ptr().cast(), 63) };
        assert_eq!(bytes, b"Tmr Svc");
    }

    #[test]
    fn c_scan_stops_at_capacity_without_nul() {
        // No terminator anywhere; the scan must stop at `max` without
        // reading past it.
        let buf = [b'x'; 200];
        // Safety: `buf` is readable for 127 bytes.
        let bytes = unsafe { c_str_prefix(buf.as_ptr().cast(), 127) };
        assert_eq!(bytes.len(), 127);

        let s = BoundedStr::<128>::from_c_bytes(bytes);
        assert_eq!(s.len(), 127);
        assert_eq!(s.into_raw()[127], 0);
    }

    #[test]
    fn str_prefix_respects_char_boundaries() {
        assert_eq!(str_prefix("main.c", 64), b"main.c");
        assert_eq!(str_prefix("abcé", 4), b"abc");
        assert_eq!(str_prefix("", 4), b"");
    }

    proptest! {
        #[test]
        fn truncation_never_overflows(input in "[^\\x00]{0,300}") {
            let s = BoundedStr::<64>::truncated(&input);
            prop_assert!(s.len() <= 63);
            prop_assert!(input.starts_with(s.as_str()));
            prop_assert_eq!(s.into_raw()[63], 0);
            if input.len() <= 63 {
                prop_assert_eq!(s.as_str(), input.as_str());
            }
        }

        #[test]
        fn any_raw_buffer_is_terminated(
            bytes in proptest::collection::vec(any::<u8>(), 16),
        ) {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(&bytes);
            let s = BoundedStr::<16>::from_raw(raw);
            prop_assert!(s.len() <= 15);
            prop_assert!(s.as_str().len() <= s.len());
        }
    }
}
