// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The hardware side of the clock.

/// Resolution of the device's timestamp counter, which is also the unit of
/// every delay the clock hands to [`TimerDevice::arm_one_shot`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timebase {
    Micros1,
    Micros10,
    Micros100,
    Millis1,
}

impl Timebase {
    /// Length of one tick in microseconds.
    pub const fn micros(self) -> u64 {
        match self {
            Timebase::Micros1 => 1,
            Timebase::Micros10 => 10,
            Timebase::Micros100 => 100,
            Timebase::Millis1 => 1000,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceError {
    UnsupportedTimebase,
}

/// A countdown timer with a free-running timestamp counter and a single
/// one-shot alarm.
///
/// The clock assumes it has sole control of the alarm: it keeps its own record
/// of what the device is armed for and never reads it back.
pub trait TimerDevice {
    /// Current value of the monotonic timestamp counter, in timebase units.
    fn read_timestamp(&self) -> u64;

    /// Sets the resolution of the timestamp counter.
    fn configure_timebase(&mut self, unit: Timebase) -> Result<(), DeviceError>;

    /// Arms the alarm to interrupt once, `delay` timebase units from now,
    /// replacing any earlier setting.
    ///
    /// A device that can't represent `delay` may fire early; the dispatcher
    /// re-arms for whatever remains. It must not fire late.
    fn arm_one_shot(&mut self, delay: u64);

    /// Cancels the alarm, if armed.
    fn disarm(&mut self);
}
