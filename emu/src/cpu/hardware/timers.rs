//! The four 16-bit hardware timers.
//!
//! A timer either counts CPU cycles through a prescaler (1/64/256/1024) or,
//! in cascade mode, counts overflows of the previous timer (illegal for
//! timer 0, where the cascade bit is ignored). Overflow reloads the counter
//! from the reload register and can raise `IRQ 3+id`; timers 0 and 1
//! additionally clock the APU FIFOs. Those side effects are sequenced by
//! the bus, which consumes the [`TimerStepResult`].

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

#[derive(Default, Clone, Copy, Serialize, Deserialize)]
pub struct Timer {
    pub counter: u16,
    pub reload: u16,
    /// Raw TMxCNT_H value; decoded through the accessors below.
    pub control: u16,
    /// Cycles accumulated toward the next prescaler tick.
    cycles: u32,
}

impl Timer {
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.control.get_bit(7)
    }

    #[must_use]
    pub fn irq_enabled(&self) -> bool {
        self.control.get_bit(6)
    }

    #[must_use]
    pub fn cascade(&self) -> bool {
        self.control.get_bit(2)
    }

    /// CPU cycles per counter tick.
    #[must_use]
    pub fn prescaler_period(&self) -> u32 {
        match self.control.get_bits(0..=1) {
            0 => 1,
            1 => 64,
            2 => 256,
            _ => 1024,
        }
    }

    /// Advances by `ticks` counter increments, returning how many overflows
    /// occurred.
    fn tick(&mut self, ticks: u32) -> u32 {
        let mut overflows = 0;
        let mut remaining = ticks;

        while remaining > 0 {
            let until_overflow = u32::from(0xFFFF - self.counter) + 1;

            if remaining < until_overflow {
                self.counter += remaining as u16;
                break;
            }

            remaining -= until_overflow;
            self.counter = self.reload;
            overflows += 1;

            // With a high reload every further tick overflows again; take
            // the whole batch at once.
            if self.counter == 0xFFFF && remaining > 0 {
                overflows += remaining;
                self.counter = self.reload;
                break;
            }
        }

        overflows
    }
}

/// Overflow counts per timer for one step, consumed by the bus.
#[derive(Default, Clone, Copy)]
pub struct TimerStepResult {
    pub overflows: [u32; 4],
}

#[derive(Default, Serialize, Deserialize)]
pub struct Timers {
    pub timers: [Timer; 4],
}

impl Timers {
    /// Advances all enabled timers by `cycles` CPU cycles, resolving cascade
    /// chains in timer order.
    pub fn step(&mut self, cycles: u32) -> TimerStepResult {
        let mut result = TimerStepResult::default();

        for id in 0..4 {
            let timer = &mut self.timers[id];
            if !timer.enabled() {
                continue;
            }

            if timer.cascade() && id != 0 {
                let upstream = result.overflows[id - 1];
                if upstream != 0 {
                    result.overflows[id] = self.timers[id].tick(upstream);
                }
            } else {
                // Timer 0 ignores an illegal cascade bit and counts cycles.
                let period = timer.prescaler_period();
                timer.cycles += cycles;

                let ticks = timer.cycles / period;
                timer.cycles %= period;

                if ticks != 0 {
                    result.overflows[id] = timer.tick(ticks);
                }
            }
        }

        result
    }

    /// TMxCNT_L reads return the live counter.
    #[must_use]
    pub fn read_counter(&self, id: usize) -> u16 {
        self.timers[id].counter
    }

    /// TMxCNT_L writes set the reload value, not the counter.
    pub fn write_reload(&mut self, id: usize, value: u16) {
        self.timers[id].reload = value;
    }

    /// TMxCNT_H writes; the enable rising edge reloads the counter.
    pub fn write_control(&mut self, id: usize, value: u16) {
        let was_enabled = self.timers[id].enabled();
        self.timers[id].control = value;

        if !was_enabled && self.timers[id].enabled() {
            self.timers[id].counter = self.timers[id].reload;
            self.timers[id].cycles = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ENABLE: u16 = 1 << 7;
    const CASCADE: u16 = 1 << 2;

    #[test]
    fn enable_rising_edge_reloads_counter() {
        let mut timers = Timers::default();
        timers.write_reload(0, 0x1234);
        timers.write_control(0, ENABLE);
        assert_eq!(timers.read_counter(0), 0x1234);

        // Rewriting control while enabled does not reload.
        timers.step(16);
        let counter = timers.read_counter(0);
        timers.write_control(0, ENABLE | (1 << 6));
        assert_eq!(timers.read_counter(0), counter);
    }

    #[test]
    fn prescaler_divides_cycles() {
        let mut timers = Timers::default();
        timers.write_control(1, ENABLE | 0b01); // 64 cycles per tick
        timers.step(63);
        assert_eq!(timers.read_counter(1), 0);
        timers.step(1);
        assert_eq!(timers.read_counter(1), 1);
        timers.step(64 * 10);
        assert_eq!(timers.read_counter(1), 11);
    }

    #[test]
    fn overflow_reloads_and_reports() {
        let mut timers = Timers::default();
        timers.write_reload(0, 0xFFF0);
        timers.write_control(0, ENABLE);

        let result = timers.step(0x10);
        assert_eq!(result.overflows[0], 1);
        assert_eq!(timers.read_counter(0), 0xFFF0);
    }

    #[test]
    fn cascade_counts_upstream_overflows() {
        let mut timers = Timers::default();
        // Timer 0 overflows every cycle (reload 0xFFFF, prescaler 1).
        timers.write_reload(0, 0xFFFF);
        timers.write_control(0, ENABLE);
        timers.write_reload(1, 0);
        timers.write_control(1, ENABLE | CASCADE);

        timers.step(0x10001);
        assert_eq!(timers.read_counter(1), 1);
    }

    #[test]
    fn cascade_chains_through_three_timers() {
        let mut timers = Timers::default();
        timers.write_reload(0, 0xFFFF);
        timers.write_control(0, ENABLE);
        timers.write_reload(1, 0xFFFF);
        timers.write_control(1, ENABLE | CASCADE);
        timers.write_control(2, ENABLE | CASCADE);

        // Timer 0 overflows each cycle, so timer 1 overflows each cycle
        // too, and timer 2 counts those.
        let result = timers.step(5);
        assert_eq!(result.overflows[0], 5);
        assert_eq!(result.overflows[1], 5);
        assert_eq!(timers.read_counter(2), 5);
    }

    #[test]
    fn disabled_timer_does_not_count() {
        let mut timers = Timers::default();
        timers.step(1000);
        assert_eq!(timers.read_counter(0), 0);
    }
}
