// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A clock that can be reached from both thread and interrupt context.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::dispatch::Service;
use crate::{
    Callback, Clock, ClockError, Dispatch, StartError, TimerDevice, TimerId,
};

/// A [`Clock`] behind a critical section, suitable for a `static` shared
/// between ordinary code and the timer interrupt handler.
///
/// Each operation holds the critical section only for its own bookkeeping.
/// In particular [`SharedClock::dispatch`] releases it before running the
/// callback, so callbacks may register and cancel timers on the same clock.
pub struct SharedClock<D, T, const N: usize> {
    clock: Mutex<RefCell<Clock<D, T, N>>>,
}

impl<D, T, const N: usize> Default for SharedClock<D, T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, T, const N: usize> SharedClock<D, T, N> {
    pub const fn new() -> Self {
        Self {
            clock: Mutex::new(RefCell::new(Clock::new())),
        }
    }

    /// Runs `body` with exclusive access to the clock.
    ///
    /// Calling back into this `SharedClock` from inside `body` will panic.
    pub fn with<R>(&self, body: impl FnOnce(&mut Clock<D, T, N>) -> R) -> R {
        critical_section::with(|cs| body(&mut self.clock.borrow_ref_mut(cs)))
    }
}

impl<D: TimerDevice, T, const N: usize> SharedClock<D, T, N> {
    pub fn start(&self, device: D) -> Result<Option<D>, StartError<D>> {
        self.with(|clock| clock.start(device))
    }

    pub fn stop(&self) -> Option<D> {
        self.with(Clock::stop)
    }

    pub fn get_time(&self) -> Result<u64, ClockError> {
        self.with(|clock| clock.get_time())
    }

    pub fn register_timer(
        &self,
        delay: u64,
        callback: Callback<T>,
        data: T,
    ) -> Result<TimerId, ClockError> {
        self.with(|clock| clock.register_timer(delay, callback, data))
    }

    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.with(|clock| clock.cancel_timer(id))
    }

    pub fn time_until_next(&self) -> Option<i64> {
        self.with(|clock| clock.time_until_next())
    }

    /// Interrupt entry point; see [`Clock::dispatch`].
    pub fn dispatch(&self, ack: impl FnOnce()) -> Result<Dispatch, ClockError> {
        let outcome = self.with(Clock::service).map(Service::run);
        ack();
        outcome
    }
}
