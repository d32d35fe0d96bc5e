//! The four-channel DMA controller.
//!
//! Channel priority equals the channel index (0 highest). Each channel keeps
//! its public registers plus an internal shadow of {source, destination,
//! length} captured on the enable rising edge with per-channel bit-width
//! masks. A bitset tracks which channels are pending; the bus drains the
//! highest-priority pending channel, checking the cycle budget and the
//! pre-emption flag between transfer units.
//!
//! Channels 1 and 2 in "special" timing serve the APU FIFOs: four words to a
//! fixed destination per request, with the public length untouched.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

/// Destination addresses of the two sound FIFOs, matched against DMA
/// destinations when a FIFO requests data.
pub const FIFO_A_ADDRESS: u32 = 0x0400_00A0;
pub const FIFO_B_ADDRESS: u32 = 0x0400_00A4;

const SRC_MASK: [u32; 4] = [0x07FF_FFFF, 0x0FFF_FFFF, 0x0FFF_FFFF, 0x0FFF_FFFF];
const DST_MASK: [u32; 4] = [0x07FF_FFFF, 0x07FF_FFFF, 0x07FF_FFFF, 0x0FFF_FFFF];
const LEN_MASK: [u32; 4] = [0x3FFF, 0x3FFF, 0x3FFF, 0xFFFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressControl {
    Increment,
    Decrement,
    Fixed,
    /// Increment during the transfer, reload on repeat (destination only).
    Reload,
}

impl From<u16> for AddressControl {
    fn from(value: u16) -> Self {
        match value & 0b11 {
            0 => Self::Increment,
            1 => Self::Decrement,
            2 => Self::Fixed,
            _ => Self::Reload,
        }
    }
}

impl AddressControl {
    /// Per-unit address adjustment for the given transfer width.
    #[must_use]
    pub const fn modify(self, unit_bytes: u32) -> i32 {
        match self {
            Self::Increment | Self::Reload => unit_bytes as i32,
            Self::Decrement => -(unit_bytes as i32),
            Self::Fixed => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timing {
    Immediate,
    VBlank,
    HBlank,
    /// FIFO feed on channels 1/2, video capture on channel 3.
    Special,
}

impl From<u16> for Timing {
    fn from(value: u16) -> Self {
        match value & 0b11 {
            0 => Self::Immediate,
            1 => Self::VBlank,
            2 => Self::HBlank,
            _ => Self::Special,
        }
    }
}

/// Internal transfer state, loaded from the public registers on the enable
/// rising edge. The public registers are never decremented.
#[derive(Default, Clone, Copy, Serialize, Deserialize)]
pub struct Shadow {
    pub source: u32,
    pub destination: u32,
    pub length: u32,
    /// Outstanding FIFO feed requests (special timing only).
    pub fifo_requests: u32,
}

#[derive(Default, Clone, Copy, Serialize, Deserialize)]
pub struct Channel {
    pub source: u32,
    pub destination: u32,
    pub length: u16,
    /// Raw DMAxCNT_H value; decoded through the accessors below.
    pub control: u16,
    pub internal: Shadow,
}

impl Channel {
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.control.get_bit(15)
    }

    pub fn set_enabled(&mut self, value: bool) {
        self.control.set_bit(15, value);
    }

    #[must_use]
    pub fn irq_enabled(&self) -> bool {
        self.control.get_bit(14)
    }

    #[must_use]
    pub fn timing(&self) -> Timing {
        Timing::from(self.control.get_bits(12..=13))
    }

    /// Transfer unit width in bytes: halfword or word.
    #[must_use]
    pub fn unit_bytes(&self) -> u32 {
        if self.control.get_bit(10) { 4 } else { 2 }
    }

    #[must_use]
    pub fn repeat(&self) -> bool {
        self.control.get_bit(9)
    }

    #[must_use]
    pub fn source_control(&self) -> AddressControl {
        AddressControl::from(self.control.get_bits(7..=8))
    }

    #[must_use]
    pub fn destination_control(&self) -> AddressControl {
        AddressControl::from(self.control.get_bits(5..=6))
    }

    fn masked_length(&self, id: usize) -> u32 {
        let length = u32::from(self.length) & LEN_MASK[id];
        if length == 0 { LEN_MASK[id] + 1 } else { length }
    }

    /// Loads the internal shadow from the public registers.
    fn capture(&mut self, id: usize) {
        self.internal.source = self.source & SRC_MASK[id];
        self.internal.destination = self.destination & DST_MASK[id];
        self.internal.length = self.masked_length(id);
        self.internal.fifo_requests = 0;
    }

    /// Repeat reload: length always, destination only in reload mode.
    pub fn reload(&mut self, id: usize) {
        self.internal.length = self.masked_length(id);
        if self.destination_control() == AddressControl::Reload {
            self.internal.destination = self.destination & DST_MASK[id];
        }
    }

    #[must_use]
    pub fn is_fifo(&self, id: usize) -> bool {
        (id == 1 || id == 2)
            && self.timing() == Timing::Special
            && (self.destination == FIFO_A_ADDRESS || self.destination == FIFO_B_ADDRESS)
    }
}

#[derive(Default, Serialize, Deserialize)]
pub struct Dma {
    pub channels: [Channel; 4],
    /// Bitset of channels pending execution.
    pub running: u8,
    /// Index of the channel currently being drained.
    pub current: usize,
    /// Set when a higher-priority channel pre-empts the running transfer;
    /// checked between transfer units.
    pub loop_exit: bool,
}

impl Dma {
    /// Marks a channel pending, handling pre-emption of a lower-priority
    /// transfer that is already running.
    pub fn activate(&mut self, id: usize) {
        if self.running == 0 {
            self.current = id;
        } else if id < self.current {
            self.current = id;
            self.loop_exit = true;
        }

        self.running |= 1 << id;
    }

    /// Removes a channel from the pending set and picks the next one.
    pub fn retire(&mut self, id: usize) {
        self.running &= !(1 << id);
        self.select_next();
    }

    pub fn select_next(&mut self) {
        for id in 0..4 {
            if self.running.get_bit(id as u8) {
                self.current = id;
                return;
            }
        }
    }

    /// PPU entered HBlank: schedule every enabled HBlank channel.
    pub fn trigger_hblank(&mut self) {
        self.trigger(Timing::HBlank);
    }

    /// PPU entered VBlank: schedule every enabled VBlank channel.
    pub fn trigger_vblank(&mut self) {
        self.trigger(Timing::VBlank);
    }

    fn trigger(&mut self, timing: Timing) {
        for id in 0..4 {
            if self.channels[id].enabled() && self.channels[id].timing() == timing {
                self.activate(id);
            }
        }
    }

    /// A FIFO ran low: bump the request count of the matching special
    /// channel and schedule it.
    pub fn trigger_fifo(&mut self, fifo_address: u32) {
        for id in 1..=2 {
            let channel = &mut self.channels[id];
            if channel.enabled()
                && channel.timing() == Timing::Special
                && channel.destination == fifo_address
            {
                channel.internal.fifo_requests += 1;
                self.activate(id);
                return;
            }
        }
    }

    /// Register write for DMAxCNT_H high byte; detects the enable rising
    /// edge and captures the shadow state.
    pub fn write_control_high(&mut self, id: usize, value: u8) {
        let was_enabled = self.channels[id].enabled();
        self.channels[id].control.set_byte(1, value);

        if !was_enabled && self.channels[id].enabled() {
            self.channels[id].capture(id);

            tracing::debug!(
                "DMA[{id}] enabled: src={:#010X} dst={:#010X} len={:#X}",
                self.channels[id].internal.source,
                self.channels[id].internal.destination,
                self.channels[id].internal.length,
            );

            if self.channels[id].timing() == Timing::Immediate {
                self.activate(id);
            }
        }

        if was_enabled && !self.channels[id].enabled() {
            self.running &= !(1 << id);
            self.select_next();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn enable_value(timing: Timing) -> u8 {
        // High byte of CNT_H: enable | timing.
        let timing_bits = match timing {
            Timing::Immediate => 0,
            Timing::VBlank => 1,
            Timing::HBlank => 2,
            Timing::Special => 3,
        };
        0x80 | (timing_bits << 4)
    }

    #[test]
    fn enable_captures_shadow_without_touching_registers() {
        let mut dma = Dma::default();
        dma.channels[3].source = 0x0300_0000;
        dma.channels[3].destination = 0x0200_0000;
        dma.channels[3].length = 16;

        dma.write_control_high(3, enable_value(Timing::Immediate));

        assert_eq!(dma.channels[3].internal.source, 0x0300_0000);
        assert_eq!(dma.channels[3].internal.destination, 0x0200_0000);
        assert_eq!(dma.channels[3].internal.length, 16);
        assert_eq!(dma.channels[3].source, 0x0300_0000);
        assert_eq!(dma.channels[3].length, 16);
        assert_eq!(dma.running, 0b1000);
    }

    #[test]
    fn zero_length_means_full_block() {
        let mut dma = Dma::default();
        dma.write_control_high(0, enable_value(Timing::Immediate));
        assert_eq!(dma.channels[0].internal.length, 0x4000);

        let mut dma = Dma::default();
        dma.write_control_high(3, enable_value(Timing::Immediate));
        assert_eq!(dma.channels[3].internal.length, 0x10000);
    }

    #[test]
    fn address_masks_differ_per_channel() {
        let mut dma = Dma::default();
        dma.channels[0].source = 0xFFFF_FFFF;
        dma.channels[0].destination = 0xFFFF_FFFF;
        dma.write_control_high(0, enable_value(Timing::Immediate));
        assert_eq!(dma.channels[0].internal.source, 0x07FF_FFFF);
        assert_eq!(dma.channels[0].internal.destination, 0x07FF_FFFF);

        let mut dma = Dma::default();
        dma.channels[3].source = 0xFFFF_FFFF;
        dma.channels[3].destination = 0xFFFF_FFFF;
        dma.write_control_high(3, enable_value(Timing::Immediate));
        assert_eq!(dma.channels[3].internal.source, 0x0FFF_FFFF);
        assert_eq!(dma.channels[3].internal.destination, 0x0FFF_FFFF);
    }

    #[test]
    fn higher_priority_channel_preempts() {
        let mut dma = Dma::default();
        dma.write_control_high(2, enable_value(Timing::Immediate));
        assert_eq!(dma.current, 2);
        assert!(!dma.loop_exit);

        dma.write_control_high(0, enable_value(Timing::Immediate));
        assert_eq!(dma.current, 0);
        assert!(dma.loop_exit);
        assert_eq!(dma.running, 0b0101);
    }

    #[test]
    fn hblank_trigger_only_schedules_hblank_channels() {
        let mut dma = Dma::default();
        dma.write_control_high(0, enable_value(Timing::HBlank));
        dma.write_control_high(1, enable_value(Timing::VBlank));
        assert_eq!(dma.running, 0);

        dma.trigger_hblank();
        assert_eq!(dma.running, 0b0001);

        dma.trigger_vblank();
        assert_eq!(dma.running, 0b0011);
    }

    #[test]
    fn fifo_trigger_matches_destination() {
        let mut dma = Dma::default();
        dma.channels[1].destination = FIFO_A_ADDRESS;
        dma.write_control_high(1, enable_value(Timing::Special));

        dma.trigger_fifo(FIFO_A_ADDRESS);
        dma.trigger_fifo(FIFO_A_ADDRESS);
        assert_eq!(dma.channels[1].internal.fifo_requests, 2);
        assert_eq!(dma.running, 0b0010);

        // No channel serves FIFO B; nothing happens.
        dma.trigger_fifo(FIFO_B_ADDRESS);
        assert_eq!(dma.running, 0b0010);
    }

    #[test]
    fn disabling_removes_from_pending_set() {
        let mut dma = Dma::default();
        dma.write_control_high(1, enable_value(Timing::Immediate));
        assert_eq!(dma.running, 0b0010);

        dma.write_control_high(1, 0);
        assert_eq!(dma.running, 0);
    }
}
