// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trace ring for the clock and its device drivers
//!
//! A ring buffer is a fixed array of trace records kept in a `static`. Each
//! record carries the source line that produced it, a generation number for
//! the slot, and a repeat count: when the same line logs the same payload
//! twice in a row the existing record's count goes up instead of consuming a
//! new slot. This keeps a burst of identical events (say, a run of early
//! timer interrupts) from flushing the interesting history out of the ring.
//!
//! Rings are meant to be read post-mortem, from a debugger or a memory dump,
//! and cost nothing beyond their static footprint when nobody looks at them.
//!
//! ## Constraints
//!
//! The payload type must implement both `Copy` and `PartialEq`.
//!
//! If you use the variants of the `ringbuf!` macro that leave the name of the
//! data structure implicit, you can only have one per module.
//!
//! ## Concurrency
//!
//! Trace points are hit from ordinary code and from interrupt handlers alike,
//! so every append happens inside a [`critical_section`]. The platform (or,
//! on the host, `critical-section`'s `std` feature) provides the
//! implementation.
//!
//! ## Usage
//!
//! ```ignore
//! #[derive(Copy, Clone, Debug, PartialEq)]
//! enum Trace {
//!     None,
//!     Armed(u64),
//! }
//!
//! ringbuf!(Trace, 16, Trace::None);
//!
//! ringbuf_entry!(Trace::Armed(deadline));
//! ```

#![cfg_attr(not(test), no_std)]

pub use critical_section;

use core::cell::RefCell;

/// Declares a ringbuffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ringbuffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// The resulting ringbuffer will be static, so `NAME` should be uppercase, and
/// by convention it should end in `RINGBUF`.
///
/// The actual type of `NAME` will be [`StaticRingbuf<T, N>`].
///
/// If you omit the name, it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::StaticRingbuf<$t, $n> =
            $crate::critical_section::Mutex::new(::core::cell::RefCell::new(
                $crate::Ringbuf::new($init),
            ));
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// With tracing disabled the name still resolves, so code that imports a ring
/// from another module builds either way.
#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
        #[allow(dead_code)]
        static $name: () = ();
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// Appends a record to a ringbuffer declared with [`ringbuf!`].
///
/// `ringbuf_entry!(NAME, expr)` records `expr` in the ringbuffer called
/// `NAME`; `ringbuf_entry!(expr)` uses the unnamed per-module ringbuffer.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before entering the critical section, and keep
        // the two expressions from seeing each other's bindings.
        let (p, buf) = ($payload, &$buf);
        let line = line!() as u16;
        $crate::critical_section::with(|cs| {
            $crate::Ringbuf::entry(&mut *buf.borrow_ref_mut(cs), line, p);
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
        let _ = &$buf;
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

/// The storage type produced by [`ringbuf!`].
pub type StaticRingbuf<T, const N: usize> =
    critical_section::Mutex<RefCell<Ringbuf<T, N>>>;

/// A single trace record.
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// A ring of `N` trace records. Normally declared through [`ringbuf!`].
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    /// Slot holding the most recent record, or `None` before the first one.
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        if let Some(ent) = self.last.and_then(|i| self.buffer.get_mut(i)) {
            if ent.line == line && ent.payload == payload {
                if let Some(count) = ent.count.checked_add(1) {
                    ent.count = count;
                    return;
                }
            }
        }

        // A `last` that points outside the buffer restarts us at slot 0,
        // same as the first insertion.
        let ndx = self
            .last
            .and_then(|i| i.checked_add(1))
            .filter(|&i| i < N)
            .unwrap_or(0);

        let Some(ent) = self.buffer.get_mut(ndx) else {
            // Zero-sized ring: nothing to record into.
            return;
        };
        // Generation 0 marks a slot that was never written; skip it on wrap.
        let generation = match ent.generation.wrapping_add(1) {
            0 => 1,
            g => g,
        };
        *ent = RingbufEntry {
            line,
            generation,
            count: 1,
            payload,
        };
        self.last = Some(ndx);
    }

    /// Iterates over the records from oldest to newest, skipping slots that
    /// have never been written.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = self.last.map_or(0, |i| i.saturating_add(1));
        let (newer, older) = self.buffer.split_at(start.min(N));
        older
            .iter()
            .chain(newer.iter())
            .filter(|ent| ent.generation != 0)
    }
}
