// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timer interrupt handling.
//!
//! The device runs in one-shot mode, so every interrupt answers exactly one
//! arming and at most one entry fires per interrupt. If several entries are
//! due at once, re-arming for the next one gives it a zero delay and it fires
//! on the following interrupt.

use ringbuf::ringbuf_entry;

use crate::{
    Clock, ClockError, Entry, TimerDevice, TimerId, Trace, CLOCK_RINGBUF,
};

/// Outcome of handling one timer interrupt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// The entry with this id was due and its callback has run.
    Fired(TimerId),
    /// The interrupt came in before the earliest entry was due, which
    /// happens when the device can't represent the full delay or rounds it
    /// down. The device has been armed again for the rest.
    Early { remaining: u64 },
    /// Nothing was pending; the entry the alarm was meant for was cancelled.
    Idle,
}

/// What the interrupt handler pulled out of the clock. Running it is kept
/// separate so a shared clock can be released before the callback runs.
pub(crate) enum Service<T> {
    Done(Dispatch),
    Fire(Entry<T>),
}

impl<T> Service<T> {
    pub(crate) fn run(self) -> Dispatch {
        match self {
            Service::Done(outcome) => outcome,
            Service::Fire(entry) => {
                let id = entry.id();
                ringbuf_entry!(CLOCK_RINGBUF, Trace::Fire(id));
                entry.fire();
                Dispatch::Fired(id)
            }
        }
    }
}

impl<D: TimerDevice, T, const N: usize> Clock<D, T, N> {
    /// Handles a timer interrupt: fires the earliest entry if it is due,
    /// re-arms the device, and finally calls `ack` to acknowledge the
    /// interrupt.
    ///
    /// `ack` runs even if the clock was stopped underneath the interrupt.
    pub fn dispatch(
        &mut self,
        ack: impl FnOnce(),
    ) -> Result<Dispatch, ClockError> {
        let outcome = self.service().map(Service::run);
        ack();
        outcome
    }

    pub(crate) fn service(&mut self) -> Result<Service<T>, ClockError> {
        let now = self.get_time()?;

        let Some(head) = self.pending.peek_earliest() else {
            ringbuf_entry!(CLOCK_RINGBUF, Trace::Idle);
            return Ok(Service::Done(Dispatch::Idle));
        };

        if head > now {
            let remaining = head - now;
            ringbuf_entry!(CLOCK_RINGBUF, Trace::Early { remaining });
            self.arm_for_head(now);
            return Ok(Service::Done(Dispatch::Early { remaining }));
        }

        let Some(entry) = self.pending.pop_due(now) else {
            return Ok(Service::Done(Dispatch::Idle));
        };

        // Arm for the next entry before running this one's callback, so a
        // slow callback can't make us miss the next deadline.
        self.arm_for_head(now);
        Ok(Service::Fire(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeDevice, FakeTime};
    use std::sync::atomic::{AtomicUsize, Ordering};

    type TestClock = Clock<FakeDevice, &'static AtomicUsize, 4>;

    fn bump(_: TimerId, hits: &'static AtomicUsize) {
        hits.fetch_add(1, Ordering::Relaxed);
    }

    fn running(time: &FakeTime) -> TestClock {
        let mut clock = TestClock::new();
        clock.start(FakeDevice::new(time)).unwrap();
        clock
    }

    #[test]
    fn idle_interrupt_is_benign() {
        let time = FakeTime::at(0);
        let mut clock = running(&time);
        let mut acked = false;

        assert_eq!(clock.dispatch(|| acked = true), Ok(Dispatch::Idle));
        assert!(acked);
        assert_eq!(clock.device().unwrap().alarm, None);
    }

    #[test]
    fn early_interrupt_rearms_without_firing() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        let time = FakeTime::at(0);
        let mut clock = running(&time);

        clock.register_timer(100, bump, &HITS).unwrap();

        time.set(60);
        assert_eq!(
            clock.dispatch(|| ()),
            Ok(Dispatch::Early { remaining: 40 })
        );
        assert_eq!(HITS.load(Ordering::Relaxed), 0);
        assert_eq!(clock.pending_count(), 1);
        assert_eq!(clock.device().unwrap().last_delay, Some(40));
        assert_eq!(clock.device().unwrap().alarm, Some(100));
    }

    #[test]
    fn one_entry_per_interrupt() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        let time = FakeTime::at(0);
        let mut clock = running(&time);

        let a = clock.register_timer(10, bump, &HITS).unwrap();
        let b = clock.register_timer(20, bump, &HITS).unwrap();

        // Both are overdue; only the first fires, and the device is armed to
        // come straight back for the second.
        time.set(50);
        assert_eq!(clock.dispatch(|| ()), Ok(Dispatch::Fired(a)));
        assert_eq!(HITS.load(Ordering::Relaxed), 1);
        assert_eq!(clock.armed_deadline(), Some(20));
        assert_eq!(clock.device().unwrap().last_delay, Some(0));

        assert_eq!(clock.dispatch(|| ()), Ok(Dispatch::Fired(b)));
        assert_eq!(HITS.load(Ordering::Relaxed), 2);
        assert_eq!(clock.armed_deadline(), None);
        assert_eq!(clock.device().unwrap().alarm, None);
    }

    #[test]
    fn cancelled_entry_never_fires() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        let time = FakeTime::at(0);
        let mut clock = running(&time);

        let id = clock.register_timer(10, bump, &HITS).unwrap();
        clock.cancel_timer(id);

        time.set(10);
        assert_eq!(clock.dispatch(|| ()), Ok(Dispatch::Idle));
        assert_eq!(HITS.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn stopped_clock_still_acks() {
        let mut clock = TestClock::new();
        let mut acked = false;

        assert_eq!(
            clock.dispatch(|| acked = true),
            Err(ClockError::NotRunning)
        );
        assert!(acked);
    }
}
