// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deferred callbacks on a single hardware timer.
//!
//! `Clock` wraps one countdown timer with a single one-shot alarm (anything
//! implementing [`TimerDevice`]) and lets callers schedule any number of
//! "call `f(id, data)` after `delay`" entries against it. The pending entries
//! live in a [`Registry`] sorted by trigger time; the device is always armed
//! for the earliest of them, or disarmed when there are none.
//!
//! The expected usage model is:
//!
//! - Hand the device to [`Clock::start`]. This configures a 1 µs timebase;
//!   every delay and timestamp after that is in microseconds.
//!
//! - Schedule work with [`Clock::register_timer`] and withdraw it with
//!   [`Clock::cancel_timer`].
//!
//! - Route the timer interrupt to [`Clock::dispatch`], which fires at most one
//!   due entry per interrupt, re-arms the device for the next one and then
//!   acknowledges the interrupt.
//!
//! - [`Clock::stop`] drops every pending entry without running it and hands
//!   the device back.
//!
//! If the interrupt handler can preempt the code that registers and cancels
//! timers, use [`SharedClock`] instead, which runs every operation inside a
//! critical section.
//!
//! Callbacks are plain function pointers with a caller-chosen context value,
//! so the clock needs no allocator. Capacity is the const parameter `N`.

#![cfg_attr(not(test), no_std)]

mod device;
mod dispatch;
mod registry;
mod shared;

#[cfg(test)]
mod fake;

pub use device::{DeviceError, Timebase, TimerDevice};
pub use dispatch::Dispatch;
pub use registry::{Entry, Registry, Removal};
pub use shared::SharedClock;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use ringbuf::{ringbuf, ringbuf_entry};

/// Handle for a registered callback, valid until it fires or is cancelled.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TimerId(pub u32);

impl TimerId {
    /// The "no timer" handle. Never issued; cancelling it does nothing.
    pub const NONE: Self = Self(0);

    /// First id handed out after `start`.
    pub const FIRST: Self = Self(1);
}

impl From<TimerId> for u32 {
    fn from(id: TimerId) -> Self {
        id.0
    }
}

/// A scheduled callback: receives the id it was registered under and the
/// context value given at registration.
pub type Callback<T> = fn(TimerId, T);

/// Status code for success.
pub const STATUS_OK: u32 = 0;

#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum ClockError {
    /// The clock has no device; call `start` first.
    NotRunning = 1,
    /// Every slot in the registry is taken.
    TooManyTimers = 2,
    /// The device refused the timebase during `start`.
    BadTimebase = 3,
}

impl From<ClockError> for u32 {
    fn from(e: ClockError) -> Self {
        e as u32
    }
}

impl TryFrom<u32> for ClockError {
    type Error = u32;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Self::from_u32(code).ok_or(code)
    }
}

/// `start` failed. Both devices are handed back so the caller keeps the
/// hardware and can retry.
pub struct StartError<D> {
    pub error: ClockError,
    /// The device passed to `start`.
    pub device: D,
    /// The device that was running before, now stopped.
    pub previous: Option<D>,
}

impl<D> core::fmt::Debug for StartError<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StartError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<D> From<StartError<D>> for ClockError {
    fn from(e: StartError<D>) -> Self {
        e.error
    }
}

/// Collapses a result into the status code reported across the task
/// boundary.
pub fn status_code<T>(result: &Result<T, ClockError>) -> u32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(e) => u32::from(*e),
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Start,
    BadTimebase(DeviceError),
    Stop { evicted: usize },
    Register { id: TimerId, trigger: u64 },
    Full,
    Cancel { id: TimerId, removal: Removal },
    Arm { deadline: u64, delay: u64 },
    Disarm,
    Early { remaining: u64 },
    Fire(TimerId),
    Idle,
}

ringbuf!(CLOCK_RINGBUF, Trace, 32, Trace::None);

pub struct Clock<D, T, const N: usize> {
    /// Present between `start` and `stop`.
    device: Option<D>,
    /// Absolute deadline the device is armed for. Always equal to the head's
    /// trigger time, or `None` with the device disarmed.
    armed: Option<u64>,
    next_id: u32,
    pending: Registry<T, N>,
}

impl<D, T, const N: usize> Default for Clock<D, T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, T, const N: usize> Clock<D, T, N> {
    pub const fn new() -> Self {
        Self {
            device: None,
            armed: None,
            next_id: TimerId::FIRST.0,
            pending: Registry::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.device.is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Absolute time the device is armed for, if it is armed.
    pub fn armed_deadline(&self) -> Option<u64> {
        self.armed
    }

    /// Pending entries as `(id, trigger_time)`, in the order they will fire.
    pub fn pending(&self) -> impl Iterator<Item = (TimerId, u64)> + '_ {
        self.pending.iter().map(|e| (e.id(), e.trigger_time()))
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }
}

impl<D: TimerDevice, T, const N: usize> Clock<D, T, N> {
    /// Takes ownership of `device` and sets it to a 1 µs timebase.
    ///
    /// Anything left over from an earlier `start` is stopped first, so
    /// starting a running clock is the same as `stop` followed by `start`.
    /// The device that was running, if any, is returned. If `device` refuses
    /// the timebase, it comes back in the error along with the old one.
    pub fn start(
        &mut self,
        mut device: D,
    ) -> Result<Option<D>, StartError<D>> {
        let previous = self.stop();

        if let Err(e) = device.configure_timebase(Timebase::Micros1) {
            ringbuf_entry!(CLOCK_RINGBUF, Trace::BadTimebase(e));
            return Err(StartError {
                error: ClockError::BadTimebase,
                device,
                previous,
            });
        }
        device.disarm();
        self.device = Some(device);

        ringbuf_entry!(CLOCK_RINGBUF, Trace::Start);
        Ok(previous)
    }

    /// Drops every pending entry without running it, disarms the device and
    /// gives it back. Stopping a stopped clock does nothing.
    pub fn stop(&mut self) -> Option<D> {
        let evicted = self.pending.remove_all();
        let mut device = self.device.take();
        if let Some(device) = device.as_mut() {
            device.disarm();
        }
        self.armed = None;
        self.next_id = TimerId::FIRST.0;

        ringbuf_entry!(CLOCK_RINGBUF, Trace::Stop { evicted });
        device
    }

    pub fn get_time(&self) -> Result<u64, ClockError> {
        self.device
            .as_ref()
            .map(TimerDevice::read_timestamp)
            .ok_or(ClockError::NotRunning)
    }

    /// Schedules `callback(id, data)` to run `delay` microseconds from now.
    pub fn register_timer(
        &mut self,
        delay: u64,
        callback: Callback<T>,
        data: T,
    ) -> Result<TimerId, ClockError> {
        // Take the deadline before doing any bookkeeping so the time spent
        // here doesn't push it back.
        let now = self.get_time()?;
        let trigger = now.saturating_add(delay);

        if self.pending.is_full() {
            ringbuf_entry!(CLOCK_RINGBUF, Trace::Full);
            return Err(ClockError::TooManyTimers);
        }

        let id = self.allocate_id();
        let new_head =
            match self.pending.insert(Entry::new(id, trigger, callback, data)) {
                Ok(new_head) => new_head,
                Err(_) => return Err(ClockError::TooManyTimers),
            };
        ringbuf_entry!(CLOCK_RINGBUF, Trace::Register { id, trigger });

        if new_head {
            self.arm_for_head(now);
        }
        Ok(id)
    }

    /// Withdraws the entry registered as `id`, returning whether there was
    /// one. Unknown, fired and already-cancelled ids are not an error.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        let removal = self.pending.remove(id);
        ringbuf_entry!(CLOCK_RINGBUF, Trace::Cancel { id, removal });

        match removal {
            Removal::Head => {
                if let Ok(now) = self.get_time() {
                    self.arm_for_head(now);
                }
                true
            }
            Removal::Other => true,
            Removal::Missing => false,
        }
    }

    /// Time until the earliest entry is due, negative if it is overdue.
    /// `None` if nothing is pending.
    pub fn time_until_next(&self) -> Option<i64> {
        let head = self.pending.peek_earliest()?;
        let now = self.get_time().ok()?;
        let diff = i128::from(head) - i128::from(now);
        Some(diff.clamp(i64::MIN.into(), i64::MAX.into()) as i64)
    }

    fn allocate_id(&mut self) -> TimerId {
        // Terminates: the registry holds fewer than `u32::MAX` entries.
        loop {
            let id = TimerId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if id != TimerId::NONE && !self.pending.contains(id) {
                return id;
            }
        }
    }

    /// Points the device at the head entry, or disarms it if there is none.
    fn arm_for_head(&mut self, now: u64) {
        let Some(device) = self.device.as_mut() else {
            return;
        };

        match self.pending.peek_earliest() {
            Some(deadline) => {
                let delay = deadline.saturating_sub(now);
                device.arm_one_shot(delay);
                self.armed = Some(deadline);
                ringbuf_entry!(CLOCK_RINGBUF, Trace::Arm { deadline, delay });
            }
            None => {
                device.disarm();
                self.armed = None;
                ringbuf_entry!(CLOCK_RINGBUF, Trace::Disarm);
            }
        }
    }
}
