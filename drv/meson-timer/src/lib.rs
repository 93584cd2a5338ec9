// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A driver for the Amlogic Meson general-purpose timers, as a
//! [`TimerDevice`] for the `clock` crate.
//!
//! The block has several countdown timers sharing one mux register, plus a
//! free-running 64-bit timestamp counter. We use two of them:
//!
//! - Timer A is the alarm. It is a 16-bit down-counter with its own choice of
//!   tick (1 µs up to 1 ms), run in one-shot mode.
//!
//! - Timer E is the timestamp. Its tick is what the clock configures as its
//!   timebase, and every delay we are handed is in those units.
//!
//! # Long delays
//!
//! At a 1 µs tick timer A tops out at about 65 ms. Longer delays use the
//! finest tick that can hold them, rounding down, and anything past what a
//! 1 ms tick can hold is clamped. Either way the alarm goes off early, never
//! late, and the clock's dispatcher re-arms for the remainder.

#![cfg_attr(not(test), no_std)]

use clock::{DeviceError, Timebase, TimerDevice};
use ringbuf::{ringbuf, ringbuf_entry};
use static_assertions::const_assert_eq;
use vcell::VolatileCell;

/// Offset of the timer registers within the page that contains them.
pub const TIMER_REG_START: usize = 0x940;

/// Timer registers, starting at [`TIMER_REG_START`].
#[repr(C)]
pub struct RegisterBlock {
    /// Tick selection, mode and enable bits for timers A through E.
    pub mux: VolatileCell<u32>,
    pub timer_a: VolatileCell<u32>,
    pub timer_b: VolatileCell<u32>,
    pub timer_c: VolatileCell<u32>,
    pub timer_d: VolatileCell<u32>,
    _reserved: [VolatileCell<u32>; 13],
    /// Low word of the timestamp.
    pub timer_e: VolatileCell<u32>,
    /// High word of the timestamp. It is not latched by reading `timer_e`,
    /// so a carry can land between reads of the two halves.
    pub timer_e_hi: VolatileCell<u32>,
}

const_assert_eq!(core::mem::offset_of!(RegisterBlock, timer_d), 0x10);
const_assert_eq!(core::mem::offset_of!(RegisterBlock, timer_e), 0x48);
const_assert_eq!(core::mem::offset_of!(RegisterBlock, timer_e_hi), 0x4c);

const TIMER_A_INPUT_CLK_SHIFT: u32 = 0;
const TIMER_A_INPUT_CLK_MASK: u32 = 0b11 << TIMER_A_INPUT_CLK_SHIFT;
const TIMER_E_INPUT_CLK_SHIFT: u32 = 8;
const TIMER_E_INPUT_CLK_MASK: u32 = 0b111 << TIMER_E_INPUT_CLK_SHIFT;
const TIMER_A_MODE_PERIODIC: u32 = 1 << 12;
const TIMER_A_EN: u32 = 1 << 16;

/// Largest count timer A can hold.
pub const TIMER_A_MAX_COUNT: u64 = u16::MAX as u64;

/// Timer A tick choices, finest first, with their mux encodings.
const TIMEOUT_TICKS: [(Timebase, u32); 4] = [
    (Timebase::Micros1, 0),
    (Timebase::Micros10, 1),
    (Timebase::Micros100, 2),
    (Timebase::Millis1, 3),
];

/// Mux encoding of a timer E tick. 0 would select the system clock, which we
/// never use.
fn timestamp_code(unit: Timebase) -> u32 {
    match unit {
        Timebase::Micros1 => 1,
        Timebase::Micros10 => 2,
        Timebase::Micros100 => 3,
        Timebase::Millis1 => 4,
    }
}

/// Picks the finest timer A tick that can count `delay_us`, returning its
/// encoding and the count to load.
fn timeout_setting(delay_us: u64) -> (u32, u16) {
    for (tick, code) in TIMEOUT_TICKS {
        let count = delay_us / tick.micros();
        if count <= TIMER_A_MAX_COUNT {
            // A zero count would never fire.
            return (code, count.max(1) as u16);
        }
    }
    (3, u16::MAX)
}

/// Reads a 64-bit counter split over two free-running registers. The high
/// word may carry between our reads; retry until it holds still.
fn read_split(
    mut hi: impl FnMut() -> u32,
    mut lo: impl FnMut() -> u32,
) -> u64 {
    loop {
        let h = hi();
        let l = lo();
        if hi() == h {
            return (u64::from(h) << 32) | u64::from(l);
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Timebase(Timebase),
    Armed { delay: u64, code: u32, count: u16 },
    Disarmed,
}

ringbuf!(Trace, 16, Trace::None);

pub struct MesonTimer {
    reg: &'static RegisterBlock,
    /// Tick of timer E, which is also the unit of incoming delays.
    timebase: Timebase,
}

// Safety: a `MesonTimer` is the only user of its register block, so moving it
// to another context moves all access to the block with it.
unsafe impl Send for MesonTimer {}

impl From<&'static RegisterBlock> for MesonTimer {
    fn from(reg: &'static RegisterBlock) -> Self {
        Self {
            reg,
            timebase: Timebase::Micros1,
        }
    }
}

impl MesonTimer {
    /// Builds a driver from the virtual address of the page holding the
    /// timer registers.
    ///
    /// # Safety
    ///
    /// `page` must map the timer block's page for the rest of the program,
    /// and nothing else may touch timers A or E or the mux register.
    pub unsafe fn from_page(page: *mut u8) -> Self {
        let reg = page.add(TIMER_REG_START) as *const RegisterBlock;
        Self::from(&*reg)
    }

    fn modify_mux(&self, f: impl FnOnce(u32) -> u32) {
        self.reg.mux.set(f(self.reg.mux.get()));
    }
}

impl TimerDevice for MesonTimer {
    fn read_timestamp(&self) -> u64 {
        read_split(|| self.reg.timer_e_hi.get(), || self.reg.timer_e.get())
    }

    fn configure_timebase(&mut self, unit: Timebase) -> Result<(), DeviceError> {
        let code = timestamp_code(unit);
        self.modify_mux(|m| {
            (m & !TIMER_E_INPUT_CLK_MASK) | (code << TIMER_E_INPUT_CLK_SHIFT)
        });
        self.timebase = unit;
        ringbuf_entry!(Trace::Timebase(unit));
        Ok(())
    }

    fn arm_one_shot(&mut self, delay: u64) {
        let delay_us = delay.saturating_mul(self.timebase.micros());
        let (code, count) = timeout_setting(delay_us);

        // Stop the timer while its tick and count change underneath it.
        self.modify_mux(|m| m & !TIMER_A_EN);
        self.reg.timer_a.set(u32::from(count));
        self.modify_mux(|m| {
            (m & !(TIMER_A_INPUT_CLK_MASK | TIMER_A_MODE_PERIODIC))
                | (code << TIMER_A_INPUT_CLK_SHIFT)
                | TIMER_A_EN
        });
        ringbuf_entry!(Trace::Armed { delay, code, count });
    }

    fn disarm(&mut self) {
        self.modify_mux(|m| m & !TIMER_A_EN);
        ringbuf_entry!(Trace::Disarmed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clock::{Clock, TimerId};

    fn block() -> &'static RegisterBlock {
        Box::leak(Box::new(RegisterBlock {
            mux: VolatileCell::new(0),
            timer_a: VolatileCell::new(0),
            timer_b: VolatileCell::new(0),
            timer_c: VolatileCell::new(0),
            timer_d: VolatileCell::new(0),
            _reserved: core::array::from_fn(|_| VolatileCell::new(0)),
            timer_e: VolatileCell::new(0),
            timer_e_hi: VolatileCell::new(0),
        }))
    }

    fn timer_a_code(reg: &RegisterBlock) -> u32 {
        (reg.mux.get() & TIMER_A_INPUT_CLK_MASK) >> TIMER_A_INPUT_CLK_SHIFT
    }

    fn timer_e_code(reg: &RegisterBlock) -> u32 {
        (reg.mux.get() & TIMER_E_INPUT_CLK_MASK) >> TIMER_E_INPUT_CLK_SHIFT
    }

    #[test]
    fn timebase_touches_only_timer_e() {
        let reg = block();
        reg.mux.set(TIMER_A_EN | 0b10);
        let mut timer = MesonTimer::from(reg);

        timer.configure_timebase(Timebase::Micros1).unwrap();
        assert_eq!(timer_e_code(reg), 1);
        timer.configure_timebase(Timebase::Millis1).unwrap();
        assert_eq!(timer_e_code(reg), 4);

        assert_eq!(reg.mux.get() & TIMER_A_EN, TIMER_A_EN);
        assert_eq!(timer_a_code(reg), 0b10);
    }

    #[test]
    fn short_delay_uses_microsecond_ticks() {
        let reg = block();
        reg.mux.set(TIMER_A_MODE_PERIODIC);
        let mut timer = MesonTimer::from(reg);

        timer.arm_one_shot(500);
        assert_eq!(reg.timer_a.get(), 500);
        assert_eq!(timer_a_code(reg), 0);
        assert_eq!(reg.mux.get() & TIMER_A_EN, TIMER_A_EN);
        assert_eq!(reg.mux.get() & TIMER_A_MODE_PERIODIC, 0);
    }

    #[test]
    fn zero_delay_loads_one_tick() {
        let reg = block();
        let mut timer = MesonTimer::from(reg);

        timer.arm_one_shot(0);
        assert_eq!(reg.timer_a.get(), 1);
    }

    #[test]
    fn long_delays_coarsen_the_tick() {
        assert_eq!(timeout_setting(65_535), (0, 65_535));
        assert_eq!(timeout_setting(65_536), (1, 6_553));
        assert_eq!(timeout_setting(1_000_000), (2, 10_000));
        assert_eq!(timeout_setting(60_000_000), (3, 60_000));
        assert_eq!(timeout_setting(u64::MAX), (3, u16::MAX));

        let reg = block();
        let mut timer = MesonTimer::from(reg);
        timer.arm_one_shot(1_000_000);
        assert_eq!(timer_a_code(reg), 2);
        assert_eq!(reg.timer_a.get(), 10_000);
    }

    #[test]
    fn delays_are_in_timestamp_units() {
        let reg = block();
        let mut timer = MesonTimer::from(reg);

        timer.configure_timebase(Timebase::Micros10).unwrap();
        timer.arm_one_shot(100);
        assert_eq!(timer_a_code(reg), 0);
        assert_eq!(reg.timer_a.get(), 1_000);
    }

    #[test]
    fn disarm_clears_enable_only() {
        let reg = block();
        let mut timer = MesonTimer::from(reg);
        timer.configure_timebase(Timebase::Micros1).unwrap();
        timer.arm_one_shot(300);

        timer.disarm();
        assert_eq!(reg.mux.get() & TIMER_A_EN, 0);
        assert_eq!(timer_e_code(reg), 1);
        assert_eq!(reg.timer_a.get(), 300);
    }

    #[test]
    fn timestamp_joins_both_words() {
        let reg = block();
        reg.timer_e_hi.set(0x1);
        reg.timer_e.set(0x8000_0002);
        let timer = MesonTimer::from(reg);

        assert_eq!(timer.read_timestamp(), 0x1_8000_0002);
    }

    #[test]
    fn timestamp_read_survives_a_carry() {
        // The counter carries between the low read and the second high
        // read, so the first pass is thrown away.
        let mut his = [0, 1, 1, 1].into_iter();
        let mut los = [0xffff_ffff, 0x0000_0003].into_iter();
        let t = read_split(|| his.next().unwrap(), || los.next().unwrap());

        assert_eq!(t, 0x1_0000_0003);
        assert_eq!(his.next(), None);
        assert_eq!(los.next(), None);
    }

    #[test]
    fn drives_a_clock() {
        fn nop(_: TimerId, _: ()) {}

        let reg = block();
        reg.timer_e.set(1_000);
        let mut clock = Clock::<MesonTimer, (), 4>::new();

        clock.start(MesonTimer::from(reg)).unwrap();
        assert_eq!(timer_e_code(reg), 1);
        assert_eq!(reg.mux.get() & TIMER_A_EN, 0);
        assert_eq!(clock.get_time(), Ok(1_000));

        clock.register_timer(250, nop, ()).unwrap();
        assert_eq!(reg.timer_a.get(), 250);
        assert_eq!(reg.mux.get() & TIMER_A_EN, TIMER_A_EN);

        clock.stop();
        assert_eq!(reg.mux.get() & TIMER_A_EN, 0);
    }
}
