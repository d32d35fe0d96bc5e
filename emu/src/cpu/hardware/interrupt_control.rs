//! Interrupt controller registers.
//!
//! Three registers govern interrupts:
//!
//! | Register | Address       | Description                                  |
//! |----------|---------------|----------------------------------------------|
//! | IE       | `0x0400_0200` | Interrupt Enable - which IRQs can fire       |
//! | IF       | `0x0400_0202` | Interrupt Request Flags - pending interrupts |
//! | IME      | `0x0400_0208` | Interrupt Master Enable - global on/off      |
//!
//! Hardware sets bits in IF; software acknowledges by writing `1` to the
//! exact bits it wants cleared. `IME && (IE & IF) != 0` is the CPU's
//! "IRQ pending" test. HALT is left as soon as `IE & IF != 0`, independent
//! of IME.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

/// Interrupt sources, by bit position in IE/IF.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum IrqType {
    VBlank,
    HBlank,
    VCount,
    Timer0,
    Timer1,
    Timer2,
    Timer3,
    Serial,
    Dma0,
    Dma1,
    Dma2,
    Dma3,
    Keypad,
    Gamepak,
}

impl IrqType {
    /// The index of this source inside the Interrupt Request Flag register.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::VBlank => 0,
            Self::HBlank => 1,
            Self::VCount => 2,
            Self::Timer0 => 3,
            Self::Timer1 => 4,
            Self::Timer2 => 5,
            Self::Timer3 => 6,
            Self::Serial => 7,
            Self::Dma0 => 8,
            Self::Dma1 => 9,
            Self::Dma2 => 10,
            Self::Dma3 => 11,
            Self::Keypad => 12,
            Self::Gamepak => 13,
        }
    }

    #[must_use]
    pub const fn timer(id: usize) -> Self {
        match id {
            0 => Self::Timer0,
            1 => Self::Timer1,
            2 => Self::Timer2,
            _ => Self::Timer3,
        }
    }

    #[must_use]
    pub const fn dma(id: usize) -> Self {
        match id {
            0 => Self::Dma0,
            1 => Self::Dma1,
            2 => Self::Dma2,
            _ => Self::Dma3,
        }
    }
}

/// CPU power state driven by HALTCNT.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltState {
    #[default]
    Run,
    /// Woken by any `IE & IF != 0` event.
    Halt,
    /// Woken only by the keypad; approximated as halt-until-keypress.
    Stop,
}

#[derive(Default, Serialize, Deserialize)]
pub struct InterruptControl {
    pub interrupt_enable: u16,
    /// Interrupt Request Flags (IF); set by hardware events, cleared by
    /// writing 1 to the corresponding bit.
    pub interrupt_request: u16,
    pub interrupt_master_enable: u16,
    pub post_boot_flag: u8,
    pub halt_state: HaltState,
}

impl InterruptControl {
    pub fn request(&mut self, irq: IrqType) {
        self.interrupt_request.set_bit(irq.index(), true);
    }

    /// Writing to IF clears exactly the bits written as 1.
    pub fn acknowledge_low(&mut self, value: u8) {
        self.interrupt_request &= !u16::from(value);
    }

    pub fn acknowledge_high(&mut self, value: u8) {
        self.interrupt_request &= !(u16::from(value) << 8);
    }

    /// Any enabled interrupt requested, ignoring IME. This is the HALT
    /// wake-up condition.
    #[must_use]
    pub const fn requested_and_enabled(&self) -> bool {
        self.interrupt_enable & self.interrupt_request != 0
    }

    /// The CPU's IRQ-pending test: IME and an enabled, requested source.
    #[must_use]
    pub const fn irq_pending(&self) -> bool {
        self.interrupt_master_enable & 1 != 0 && self.requested_and_enabled()
    }

    /// HALTCNT write: bit 7 selects STOP, otherwise HALT.
    pub fn write_haltcnt(&mut self, value: u8) {
        self.halt_state = if value.get_bit(7) {
            HaltState::Stop
        } else {
            HaltState::Halt
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn acknowledge_clears_only_written_bits() {
        let mut ic = InterruptControl::default();
        ic.request(IrqType::VBlank);
        ic.request(IrqType::Timer0);
        ic.request(IrqType::Dma3);
        assert_eq!(ic.interrupt_request, 0b1000_0000_1001);

        ic.acknowledge_low(0b1000);
        assert_eq!(ic.interrupt_request, 0b1000_0000_0001);

        ic.acknowledge_high(0b1000);
        assert_eq!(ic.interrupt_request, 0b0000_0000_0001);
    }

    #[test]
    fn pending_needs_ime_and_ie() {
        let mut ic = InterruptControl::default();
        ic.request(IrqType::HBlank);
        assert!(!ic.irq_pending());

        ic.interrupt_enable = 1 << 1;
        assert!(!ic.irq_pending());
        assert!(ic.requested_and_enabled());

        ic.interrupt_master_enable = 1;
        assert!(ic.irq_pending());
    }

    #[test]
    fn haltcnt_selects_state() {
        let mut ic = InterruptControl::default();
        ic.write_haltcnt(0x00);
        assert_eq!(ic.halt_state, HaltState::Halt);
        ic.write_haltcnt(0x80);
        assert_eq!(ic.halt_state, HaltState::Stop);
    }
}
