//! The 16 general-purpose registers visible at any time.
//!
//! - R0-R12: general purpose
//! - R13 (SP): stack pointer by convention
//! - R14 (LR): link register
//! - R15 (PC): program counter (+8 ARM, +4 Thumb due to the pipeline)

use serde::{Deserialize, Serialize};

/// Stack Pointer register index.
pub const REG_SP: usize = 0xD;

/// Link Register index (return address for subroutines).
pub const REG_LR: usize = 0xE;

/// Program Counter register index.
pub const REG_PC: usize = 0xF;

#[derive(Default, Serialize, Deserialize)]
pub struct Registers([u32; 16]);

impl Registers {
    #[must_use]
    pub const fn program_counter(&self) -> u32 {
        self.0[REG_PC]
    }

    pub const fn set_program_counter(&mut self, new_value: u32) {
        self.0[REG_PC] = new_value;
    }

    pub const fn advance_program_counter(&mut self, bytes: u32) {
        self.0[REG_PC] = self.0[REG_PC].wrapping_add(bytes);
    }

    pub fn set_register_at(&mut self, reg: usize, new_value: u32) {
        assert!(reg <= REG_PC, "invalid register index: {reg}");
        self.0[reg] = new_value;
    }

    #[must_use]
    pub const fn register_at(&self, reg: usize) -> u32 {
        self.0[reg]
    }
}
