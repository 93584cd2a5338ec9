// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device fake for host tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::{DeviceError, Timebase, TimerDevice};

/// The fake device's notion of "now", shared with the test driving it.
#[derive(Clone, Debug, Default)]
pub struct FakeTime(Arc<AtomicU64>);

impl FakeTime {
    pub fn at(now: u64) -> Self {
        Self(Arc::new(AtomicU64::new(now)))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::Relaxed);
    }

    pub fn advance(&self, dt: u64) {
        self.0.fetch_add(dt, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct FakeDevice {
    time: FakeTime,
    pub timebase: Option<Timebase>,
    /// Absolute time the alarm will go off, if armed.
    pub alarm: Option<u64>,
    pub last_delay: Option<u64>,
    pub arms: usize,
    pub reject_timebase: bool,
}

impl FakeDevice {
    pub fn new(time: &FakeTime) -> Self {
        Self {
            time: time.clone(),
            timebase: None,
            alarm: None,
            last_delay: None,
            arms: 0,
            reject_timebase: false,
        }
    }
}

impl TimerDevice for FakeDevice {
    fn read_timestamp(&self) -> u64 {
        self.time.get()
    }

    fn configure_timebase(&mut self, unit: Timebase) -> Result<(), DeviceError> {
        if self.reject_timebase {
            return Err(DeviceError::UnsupportedTimebase);
        }
        self.timebase = Some(unit);
        Ok(())
    }

    fn arm_one_shot(&mut self, delay: u64) {
        self.alarm = Some(self.time.get().saturating_add(delay));
        self.last_delay = Some(delay);
        self.arms += 1;
    }

    fn disarm(&mut self) {
        self.alarm = None;
    }
}
