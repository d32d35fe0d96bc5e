//! Program Status Registers (CPSR and SPSR).
//!
//! ```text
//! 31 30 29 28 27      8 7 6 5 4   0
//! ┌──┬──┬──┬──┬────────┬─┬─┬─┬─────┐
//! │N │Z │C │V │Reserved│I│F│T│Mode │
//! └──┴──┴──┴──┴────────┴─┴─┴─┴─────┘
//! ```
//!
//! - Condition flags (bits 28-31), tested by [`Psr::can_execute`]
//! - I/F bits (7/6): IRQ/FIQ disable
//! - T bit (5): ARM (0) or Thumb (1) state
//! - Mode (bits 0-4): see [`Mode`](super::cpu_modes::Mode)
//!
//! Each exception mode has an SPSR that receives the CPSR on entry.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::condition::Condition;
use crate::cpu::cpu_modes::Mode;

/// Whether the CPU decodes 32-bit ARM or 16-bit Thumb opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    Arm,
    Thumb,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Psr(u32);

impl Psr {
    pub(crate) fn can_execute(self, cond: Condition) -> bool {
        use Condition::{AL, CC, CS, EQ, GE, GT, HI, LE, LS, LT, MI, NE, NV, PL, VC, VS};
        match cond {
            EQ => self.zero_flag(),
            NE => !self.zero_flag(),
            CS => self.carry_flag(),
            CC => !self.carry_flag(),
            MI => self.sign_flag(),
            PL => !self.sign_flag(),
            VS => self.overflow_flag(),
            VC => !self.overflow_flag(),
            HI => self.carry_flag() && !self.zero_flag(),
            LS => !self.carry_flag() || self.zero_flag(),
            GE => self.sign_flag() == self.overflow_flag(),
            LT => self.sign_flag() != self.overflow_flag(),
            GT => !self.zero_flag() && (self.sign_flag() == self.overflow_flag()),
            LE => self.zero_flag() || (self.sign_flag() != self.overflow_flag()),
            AL => true,
            NV => false,
        }
    }

    /// N => Bit 31
    #[must_use]
    pub fn sign_flag(self) -> bool {
        self.0.get_bit(31)
    }

    /// Z => Bit 30
    #[must_use]
    pub fn zero_flag(self) -> bool {
        self.0.get_bit(30)
    }

    /// C => Bit 29, (0=Borrow/No Carry, 1=Carry/No Borrow)
    #[must_use]
    pub fn carry_flag(self) -> bool {
        self.0.get_bit(29)
    }

    /// V => Bit 28
    #[must_use]
    pub fn overflow_flag(self) -> bool {
        self.0.get_bit(28)
    }

    /// I => Bit 7, (0=Enable, 1=Disable)
    #[must_use]
    pub fn irq_disable(self) -> bool {
        self.0.get_bit(7)
    }

    /// F => Bit 6, (0=Enable, 1=Disable)
    #[must_use]
    pub fn fiq_disable(self) -> bool {
        self.0.get_bit(6)
    }

    /// T => Bit 5, (0=ARM, 1=Thumb)
    #[must_use]
    pub fn cpu_state(self) -> CpuState {
        if self.0.get_bit(5) {
            CpuState::Thumb
        } else {
            CpuState::Arm
        }
    }

    /// M4-M0 => Bits 4-0.
    ///
    /// The BIOS occasionally writes invalid mode values to an SPSR; fall
    /// back to Supervisor rather than aborting emulation.
    #[must_use]
    pub fn mode(self) -> Mode {
        Mode::try_from(self.0.get_bits(0..=4)).unwrap_or_else(|_| {
            tracing::warn!("invalid mode bits in PSR: {:#07b}", self.0 & 0x1F);
            Mode::Supervisor
        })
    }

    pub fn set_sign_flag(&mut self, value: bool) {
        self.0.set_bit(31, value);
    }

    pub fn set_zero_flag(&mut self, value: bool) {
        self.0.set_bit(30, value);
    }

    pub fn set_carry_flag(&mut self, value: bool) {
        self.0.set_bit(29, value);
    }

    pub fn set_overflow_flag(&mut self, value: bool) {
        self.0.set_bit(28, value);
    }

    pub fn set_irq_disable(&mut self, value: bool) {
        self.0.set_bit(7, value);
    }

    pub fn set_fiq_disable(&mut self, value: bool) {
        self.0.set_bit(6, value);
    }

    pub fn set_cpu_state(&mut self, state: CpuState) {
        self.0.set_bit(5, matches!(state, CpuState::Thumb));
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.0 = (self.0 & !0x1F) | u32::from(mode);
    }

    /// Sets N and Z from a result value.
    pub fn set_flags(&mut self, result: u32) {
        self.set_sign_flag(result.get_bit(31));
        self.set_zero_flag(result == 0);
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for Psr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Mode> for Psr {
    fn from(mode: Mode) -> Self {
        Self(u32::from(mode))
    }
}

impl Default for Psr {
    fn default() -> Self {
        Self::from(Mode::Supervisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_roundtrip() {
        let mut psr = Psr::default();
        psr.set_zero_flag(true);
        psr.set_carry_flag(true);
        assert!(psr.zero_flag());
        assert!(psr.carry_flag());
        assert!(!psr.sign_flag());
        assert!(!psr.overflow_flag());
    }

    #[test]
    fn condition_evaluation() {
        let mut psr = Psr::default();
        assert!(psr.can_execute(Condition::AL));
        assert!(!psr.can_execute(Condition::EQ));

        psr.set_zero_flag(true);
        assert!(psr.can_execute(Condition::EQ));
        assert!(psr.can_execute(Condition::LS));
        assert!(!psr.can_execute(Condition::GT));

        psr.set_zero_flag(false);
        psr.set_sign_flag(true);
        psr.set_overflow_flag(true);
        assert!(psr.can_execute(Condition::GE));
        assert!(psr.can_execute(Condition::GT));
        assert!(!psr.can_execute(Condition::LT));
    }

    #[test]
    fn mode_field() {
        let mut psr = Psr::from(Mode::User);
        assert_eq!(psr.mode(), Mode::User);

        psr.set_mode(Mode::Irq);
        assert_eq!(psr.mode(), Mode::Irq);

        // Flags survive mode changes.
        psr.set_sign_flag(true);
        psr.set_mode(Mode::System);
        assert!(psr.sign_flag());
    }

    #[test]
    fn state_bit() {
        let mut psr = Psr::default();
        assert_eq!(psr.cpu_state(), CpuState::Arm);
        psr.set_cpu_state(CpuState::Thumb);
        assert_eq!(psr.cpu_state(), CpuState::Thumb);
    }
}
