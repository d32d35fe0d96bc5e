//! ARM7TDMI processor core.
//!
//! The CPU fetches through a two-slot prefetch pipeline: `fetched` holds the
//! opcode read this step, `decoded` the one read the step before, and the
//! slot behind that executes. While an instruction executes, R15 therefore
//! reads as its own address +8 (ARM) or +4 (Thumb). Any write to R15, BX,
//! exception entry/return or ARM/Thumb switch flushes both slots; the next
//! two steps refill them from the new R15.
//!
//! ## Exceptions
//!
//! | Exception  | Vector | Mode       |
//! |------------|--------|------------|
//! | Undefined  | 0x04   | Undefined  |
//! | SWI        | 0x08   | Supervisor |
//! | IRQ        | 0x18   | IRQ        |
//!
//! Entry saves CPSR into the target mode's SPSR, banks R13/R14 (R8-R12 too
//! across FIQ), forces ARM state, masks IRQs and refills from the vector.
//!
//! ## High-level BIOS emulation
//!
//! When the system runs without a BIOS image, a table of SWI handlers
//! substitutes for the common calls (RegisterRamReset, Halt, IntrWait,
//! VBlankIntrWait, Div, DivArm, Sqrt, CpuSet, CpuFastSet, ObjAffineSet,
//! LZ77UnComp). Everything else goes through the regular exception vector.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::bus::{Access, Bus};
use crate::cpu::arm::instructions::ArmInstruction;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::{CpuState, Psr};
use crate::cpu::register_bank::RegisterBank;
use crate::cpu::registers::{REG_LR, REG_SP, Registers};
use crate::cpu::thumb::instructions::ThumbInstruction;
use crate::cpu::{arm, thumb};
use crate::cpu::hardware::interrupt_control::HaltState;

#[derive(Serialize, Deserialize)]
pub struct Arm7tdmi {
    pub bus: Bus,

    pub cpsr: Psr,
    pub spsr: Psr,
    pub registers: Registers,
    pub register_bank: RegisterBank,

    /// Substitute the SWI table for BIOS calls (no BIOS image installed).
    pub swi_hle: bool,

    fetched_arm: Option<u32>,
    decoded_arm: Option<ArmInstruction>,
    fetched_thumb: Option<u16>,
    decoded_thumb: Option<ThumbInstruction>,
}

#[derive(Copy, Clone, Debug)]
pub(crate) enum ExceptionType {
    UndefinedInstruction,
    SoftwareInterrupt,
    Irq,
}

impl ExceptionType {
    pub const fn vector(self) -> u32 {
        match self {
            Self::UndefinedInstruction => 0x4,
            Self::SoftwareInterrupt => 0x8,
            Self::Irq => 0x18,
        }
    }

    pub const fn mode(self) -> Mode {
        match self {
            Self::UndefinedInstruction => Mode::Undefined,
            Self::SoftwareInterrupt => Mode::Supervisor,
            Self::Irq => Mode::Irq,
        }
    }

    /// The value left in the banked LR, measured from the address of the
    /// instruction that was about to execute.
    const fn link_offset(self, state: CpuState) -> u32 {
        match (self, state) {
            // Return with MOVS PC, LR re-executes nothing.
            (Self::SoftwareInterrupt | Self::UndefinedInstruction, CpuState::Arm) => 4,
            (Self::SoftwareInterrupt | Self::UndefinedInstruction, CpuState::Thumb) => 2,
            // Return with SUBS PC, LR, #4 re-executes the interrupted
            // instruction.
            (Self::Irq, _) => 4,
        }
    }
}

impl Default for Arm7tdmi {
    fn default() -> Self {
        let mut cpsr = Psr::from(Mode::Supervisor);
        cpsr.set_cpu_state(CpuState::Arm);
        cpsr.set_irq_disable(true);
        cpsr.set_fiq_disable(true);

        Self {
            bus: Bus::default(),
            cpsr,
            spsr: Psr::from(Mode::Supervisor),
            registers: Registers::default(),
            register_bank: RegisterBank::default(),
            swi_hle: false,
            fetched_arm: None,
            decoded_arm: None,
            fetched_thumb: None,
            decoded_thumb: None,
        }
    }
}

impl Arm7tdmi {
    #[must_use]
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            ..Default::default()
        }
    }

    /// Boot state when skipping the BIOS: start at the cartridge
    /// entrypoint with the stacks and CPSR the BIOS would have left.
    pub fn skip_bios_boot(&mut self) {
        self.register_bank.r13_svc = 0x0300_7FE0;
        self.register_bank.r13_irq = 0x0300_7FA0;

        self.swap_mode(Mode::System);
        self.cpsr.set_irq_disable(false);
        self.registers.set_register_at(REG_SP, 0x0300_7F00);
        self.registers.set_program_counter(0x0800_0000);
        self.flush_pipeline();
    }

    pub const fn flush_pipeline(&mut self) {
        self.fetched_arm = None;
        self.decoded_arm = None;
        self.fetched_thumb = None;
        self.decoded_thumb = None;
    }

    fn fetch_arm(&mut self) -> u32 {
        let pc = self.registers.program_counter() & !0b11;
        self.bus.set_current_pc(pc);

        let access = if self.fetched_arm.is_some() {
            Access::Sequential
        } else {
            Access::NonSequential
        };

        self.bus.read_word(pc, access)
    }

    fn fetch_thumb(&mut self) -> u16 {
        let pc = self.registers.program_counter() & !0b1;
        self.bus.set_current_pc(pc);

        let access = if self.fetched_thumb.is_some() {
            Access::Sequential
        } else {
            Access::NonSequential
        };

        self.bus.read_half_word(pc, access)
    }

    /// One pipeline step: refill the two prefetch slots, then execute the
    /// instruction that fell out the back (taking a pending IRQ first).
    pub fn step(&mut self) {
        let initial_state = self.cpsr.cpu_state();

        match initial_state {
            CpuState::Arm => {
                let to_execute = self.decoded_arm;
                self.decoded_arm = self.fetched_arm.map(ArmInstruction::from);
                self.fetched_arm = Some(self.fetch_arm());

                if let Some(instruction) = to_execute {
                    if !self.cpsr.irq_disable() && self.bus.interrupt_control.irq_pending() {
                        self.handle_exception(ExceptionType::Irq);
                        return;
                    }

                    self.execute_arm(instruction);

                    if self.cpsr.cpu_state() != initial_state || self.fetched_arm.is_none() {
                        self.flush_pipeline();
                        return;
                    }
                }

                self.registers
                    .advance_program_counter(arm::SIZE_OF_INSTRUCTION);
            }
            CpuState::Thumb => {
                let to_execute = self.decoded_thumb;
                self.decoded_thumb = self.fetched_thumb.map(ThumbInstruction::from);
                self.fetched_thumb = Some(self.fetch_thumb());

                if let Some(instruction) = to_execute {
                    if !self.cpsr.irq_disable() && self.bus.interrupt_control.irq_pending() {
                        self.handle_exception(ExceptionType::Irq);
                        return;
                    }

                    self.execute_thumb(instruction);

                    if self.cpsr.cpu_state() != initial_state || self.fetched_thumb.is_none() {
                        self.flush_pipeline();
                        return;
                    }
                }

                self.registers
                    .advance_program_counter(thumb::SIZE_OF_INSTRUCTION);
            }
        }
    }

    /// Banked register switch. Copies the outgoing mode's R13/R14 (and
    /// R8-R12 across FIQ) into the bank, loads the incoming mode's values
    /// and re-aliases SPSR.
    pub fn swap_mode(&mut self, new_mode: Mode) {
        let old_mode = self.cpsr.mode();
        if old_mode == new_mode {
            return;
        }

        match old_mode {
            Mode::Fiq => {
                self.register_bank.r8_fiq = self.registers.register_at(8);
                self.register_bank.r9_fiq = self.registers.register_at(9);
                self.register_bank.r10_fiq = self.registers.register_at(10);
                self.register_bank.r11_fiq = self.registers.register_at(11);
                self.register_bank.r12_fiq = self.registers.register_at(12);
                self.register_bank.r13_fiq = self.registers.register_at(13);
                self.register_bank.r14_fiq = self.registers.register_at(14);
                self.register_bank.spsr_fiq = self.spsr;

                self.registers.set_register_at(8, self.register_bank.r8_old);
                self.registers.set_register_at(9, self.register_bank.r9_old);
                self.registers
                    .set_register_at(10, self.register_bank.r10_old);
                self.registers
                    .set_register_at(11, self.register_bank.r11_old);
                self.registers
                    .set_register_at(12, self.register_bank.r12_old);
            }
            Mode::User | Mode::System => {
                self.register_bank.r13_old = self.registers.register_at(13);
                self.register_bank.r14_old = self.registers.register_at(14);
            }
            Mode::Supervisor => {
                self.register_bank.r13_svc = self.registers.register_at(13);
                self.register_bank.r14_svc = self.registers.register_at(14);
                self.register_bank.spsr_svc = self.spsr;
            }
            Mode::Abort => {
                self.register_bank.r13_abt = self.registers.register_at(13);
                self.register_bank.r14_abt = self.registers.register_at(14);
                self.register_bank.spsr_abt = self.spsr;
            }
            Mode::Irq => {
                self.register_bank.r13_irq = self.registers.register_at(13);
                self.register_bank.r14_irq = self.registers.register_at(14);
                self.register_bank.spsr_irq = self.spsr;
            }
            Mode::Undefined => {
                self.register_bank.r13_und = self.registers.register_at(13);
                self.register_bank.r14_und = self.registers.register_at(14);
                self.register_bank.spsr_und = self.spsr;
            }
        }

        match new_mode {
            Mode::Fiq => {
                self.register_bank.r8_old = self.registers.register_at(8);
                self.register_bank.r9_old = self.registers.register_at(9);
                self.register_bank.r10_old = self.registers.register_at(10);
                self.register_bank.r11_old = self.registers.register_at(11);
                self.register_bank.r12_old = self.registers.register_at(12);

                self.registers.set_register_at(8, self.register_bank.r8_fiq);
                self.registers.set_register_at(9, self.register_bank.r9_fiq);
                self.registers
                    .set_register_at(10, self.register_bank.r10_fiq);
                self.registers
                    .set_register_at(11, self.register_bank.r11_fiq);
                self.registers
                    .set_register_at(12, self.register_bank.r12_fiq);
                self.registers
                    .set_register_at(13, self.register_bank.r13_fiq);
                self.registers
                    .set_register_at(14, self.register_bank.r14_fiq);
                self.spsr = self.register_bank.spsr_fiq;
            }
            Mode::User | Mode::System => {
                self.registers
                    .set_register_at(13, self.register_bank.r13_old);
                self.registers
                    .set_register_at(14, self.register_bank.r14_old);
            }
            Mode::Supervisor => {
                self.registers
                    .set_register_at(13, self.register_bank.r13_svc);
                self.registers
                    .set_register_at(14, self.register_bank.r14_svc);
                self.spsr = self.register_bank.spsr_svc;
            }
            Mode::Abort => {
                self.registers
                    .set_register_at(13, self.register_bank.r13_abt);
                self.registers
                    .set_register_at(14, self.register_bank.r14_abt);
                self.spsr = self.register_bank.spsr_abt;
            }
            Mode::Irq => {
                self.registers
                    .set_register_at(13, self.register_bank.r13_irq);
                self.registers
                    .set_register_at(14, self.register_bank.r14_irq);
                self.spsr = self.register_bank.spsr_irq;
            }
            Mode::Undefined => {
                self.registers
                    .set_register_at(13, self.register_bank.r13_und);
                self.registers
                    .set_register_at(14, self.register_bank.r14_und);
                self.spsr = self.register_bank.spsr_und;
            }
        }

        self.cpsr.set_mode(new_mode);
    }

    /// Reads a register as seen from User mode, for the S-bit variants of
    /// LDM/STM.
    pub(crate) fn user_register_at(&self, index: usize) -> u32 {
        let mode = self.cpsr.mode();
        match (index, mode) {
            (8..=12, Mode::Fiq) => match index {
                8 => self.register_bank.r8_old,
                9 => self.register_bank.r9_old,
                10 => self.register_bank.r10_old,
                11 => self.register_bank.r11_old,
                _ => self.register_bank.r12_old,
            },
            (13, Mode::User | Mode::System) | (14, Mode::User | Mode::System) => {
                self.registers.register_at(index)
            }
            (13, _) => self.register_bank.r13_old,
            (14, _) => self.register_bank.r14_old,
            _ => self.registers.register_at(index),
        }
    }

    pub(crate) fn set_user_register_at(&mut self, index: usize, value: u32) {
        let mode = self.cpsr.mode();
        match (index, mode) {
            (8..=12, Mode::Fiq) => match index {
                8 => self.register_bank.r8_old = value,
                9 => self.register_bank.r9_old = value,
                10 => self.register_bank.r10_old = value,
                11 => self.register_bank.r11_old = value,
                _ => self.register_bank.r12_old = value,
            },
            (13, Mode::User | Mode::System) | (14, Mode::User | Mode::System) => {
                self.registers.set_register_at(index, value);
            }
            (13, _) => self.register_bank.r13_old = value,
            (14, _) => self.register_bank.r14_old = value,
            _ => self.registers.set_register_at(index, value),
        }
    }

    pub(crate) fn handle_exception(&mut self, exception: ExceptionType) {
        let state = self.cpsr.cpu_state();
        let instruction_width = match state {
            CpuState::Arm => arm::SIZE_OF_INSTRUCTION,
            CpuState::Thumb => thumb::SIZE_OF_INSTRUCTION,
        };
        // The executing instruction sits two fetches behind R15.
        let executing = self
            .registers
            .program_counter()
            .wrapping_sub(2 * instruction_width);
        let return_address = executing.wrapping_add(exception.link_offset(state));

        let old_cpsr = self.cpsr;

        self.cpsr.set_cpu_state(CpuState::Arm);
        self.swap_mode(exception.mode());

        self.registers.set_register_at(REG_LR, return_address);
        self.spsr = old_cpsr;
        self.cpsr.set_irq_disable(true);

        self.registers.set_program_counter(exception.vector());
        self.flush_pipeline();
    }

    /// Return from an exception: CPSR from SPSR, including the mode switch.
    pub(crate) fn restore_cpsr_from_spsr(&mut self) {
        let spsr = self.spsr;
        self.swap_mode(spsr.mode());
        self.cpsr = spsr;
    }

    pub(crate) fn software_interrupt(&mut self, number: u32) {
        if self.swi_hle && self.handle_swi_hle(number) {
            return;
        }
        self.handle_exception(ExceptionType::SoftwareInterrupt);
    }

    pub(crate) fn undefined_instruction(&mut self, raw: u32) {
        tracing::warn!(
            "undefined instruction {raw:#010X} at {:#010X}",
            self.registers.program_counter()
        );
        self.handle_exception(ExceptionType::UndefinedInstruction);
    }

    // ------------------------------------------------------------------
    // High-level BIOS call emulation
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn handle_swi_hle(&mut self, number: u32) -> bool {
        match number {
            // RegisterRamReset
            0x01 => {
                let flags = self.registers.register_at(0);
                if flags.get_bit(0) {
                    self.bus.internal_memory.working_ram.fill(0);
                }
                if flags.get_bit(1) {
                    // All of IWRAM except the topmost 0x200 bytes, which
                    // hold the BIOS interrupt vectors and stacks.
                    let iram = &mut self.bus.internal_memory.working_iram;
                    let len = iram.len() - 0x200;
                    iram[..len].fill(0);
                }
                if flags.get_bit(2) {
                    self.bus.lcd.memory.palette_ram.fill(0);
                }
                if flags.get_bit(3) {
                    self.bus.lcd.memory.video_ram.fill(0);
                }
                if flags.get_bit(4) {
                    self.bus.lcd.memory.obj_attributes.fill(0);
                }
                true
            }
            // Halt
            0x02 => {
                self.bus.interrupt_control.halt_state = HaltState::Halt;
                true
            }
            // IntrWait / VBlankIntrWait
            0x04 | 0x05 => {
                if number == 0x05 {
                    // VBlankIntrWait waits on the VBlank source.
                    self.bus.interrupt_control.interrupt_enable |= 1;
                }
                self.bus.interrupt_control.interrupt_master_enable = 1;
                self.bus.interrupt_control.halt_state = HaltState::Halt;
                true
            }
            // Div / DivArm
            0x06 | 0x07 => {
                let (numerator, denominator) = if number == 0x06 {
                    (self.registers.register_at(0), self.registers.register_at(1))
                } else {
                    (self.registers.register_at(1), self.registers.register_at(0))
                };
                let numerator = numerator as i32;
                let denominator = denominator as i32;

                if denominator == 0 {
                    tracing::warn!("BIOS Div by zero");
                    return true;
                }

                let quotient = numerator.wrapping_div(denominator);
                let remainder = numerator.wrapping_rem(denominator);
                self.registers.set_register_at(0, quotient as u32);
                self.registers.set_register_at(1, remainder as u32);
                self.registers
                    .set_register_at(3, quotient.unsigned_abs());
                true
            }
            // Sqrt
            0x08 => {
                let value = self.registers.register_at(0);
                self.registers.set_register_at(0, integer_sqrt(value));
                true
            }
            // CpuSet
            0x0B => {
                let mut source = self.registers.register_at(0);
                let mut destination = self.registers.register_at(1);
                let control = self.registers.register_at(2);
                let count = control.get_bits(0..=20);
                let fill = control.get_bit(24);
                let word_transfer = control.get_bit(26);

                if word_transfer {
                    let fill_value = self.bus.read_word(source, Access::Internal);
                    for _ in 0..count {
                        let value = if fill {
                            fill_value
                        } else {
                            let value = self.bus.read_word(source, Access::Internal);
                            source = source.wrapping_add(4);
                            value
                        };
                        self.bus.write_word(destination, value, Access::Internal);
                        destination = destination.wrapping_add(4);
                    }
                } else {
                    let fill_value = self.bus.read_half_word(source, Access::Internal);
                    for _ in 0..count {
                        let value = if fill {
                            fill_value
                        } else {
                            let value = self.bus.read_half_word(source, Access::Internal);
                            source = source.wrapping_add(2);
                            value
                        };
                        self.bus
                            .write_half_word(destination, value, Access::Internal);
                        destination = destination.wrapping_add(2);
                    }
                }
                true
            }
            // CpuFastSet: word transfers in blocks of eight.
            0x0C => {
                let mut source = self.registers.register_at(0);
                let mut destination = self.registers.register_at(1);
                let control = self.registers.register_at(2);
                let count = control.get_bits(0..=20).div_ceil(8) * 8;
                let fill = control.get_bit(24);

                let fill_value = self.bus.read_word(source, Access::Internal);
                for _ in 0..count {
                    let value = if fill {
                        fill_value
                    } else {
                        let value = self.bus.read_word(source, Access::Internal);
                        source = source.wrapping_add(4);
                        value
                    };
                    self.bus.write_word(destination, value, Access::Internal);
                    destination = destination.wrapping_add(4);
                }
                true
            }
            // ObjAffineSet
            0x0F => {
                let mut source = self.registers.register_at(0);
                let mut destination = self.registers.register_at(1);
                let count = self.registers.register_at(2);
                let stride = self.registers.register_at(3);

                for _ in 0..count {
                    let sx = f64::from(self.bus.read_half_word(source, Access::Internal) as i16)
                        / 256.0;
                    let sy =
                        f64::from(self.bus.read_half_word(source + 2, Access::Internal) as i16)
                            / 256.0;
                    let theta = f64::from(self.bus.read_half_word(source + 4, Access::Internal))
                        / 65536.0
                        * std::f64::consts::TAU;
                    source += 8;

                    let (sin, cos) = theta.sin_cos();
                    let parameters = [sx * cos, -sx * sin, sy * sin, sy * cos];
                    for parameter in parameters {
                        let fixed = (parameter * 256.0) as i32 as u32;
                        self.bus
                            .write_half_word(destination, fixed as u16, Access::Internal);
                        destination = destination.wrapping_add(stride);
                    }
                }
                true
            }
            // LZ77UnCompWram / LZ77UnCompVram
            0x11 | 0x12 => {
                self.lz77_decompress();
                true
            }
            _ => {
                tracing::debug!("SWI {number:#04X} not in HLE table, using exception vector");
                false
            }
        }
    }

    fn lz77_decompress(&mut self) {
        let mut source = self.registers.register_at(0);
        let mut destination = self.registers.register_at(1);

        let header = self.bus.read_word(source, Access::Internal);
        source += 4;

        if header & 0xF0 != 0x10 {
            tracing::warn!("LZ77 header without type 1 marker: {header:#010X}");
            return;
        }

        let mut remaining = header >> 8;
        while remaining > 0 {
            let flags = self.bus.read_byte(source, Access::Internal);
            source += 1;

            for block in (0..8).rev() {
                if remaining == 0 {
                    break;
                }

                if flags.get_bit(block) {
                    // Back-reference: length 3-18, displacement 1-4096.
                    let first = self.bus.read_byte(source, Access::Internal);
                    let second = self.bus.read_byte(source + 1, Access::Internal);
                    source += 2;

                    let length = u32::from(first >> 4) + 3;
                    let displacement =
                        (u32::from(first & 0xF) << 8 | u32::from(second)) + 1;

                    for _ in 0..length {
                        if remaining == 0 {
                            break;
                        }
                        let value = self
                            .bus
                            .read_byte(destination.wrapping_sub(displacement), Access::Internal);
                        self.bus.write_byte(destination, value, Access::Internal);
                        destination += 1;
                        remaining -= 1;
                    }
                } else {
                    let value = self.bus.read_byte(source, Access::Internal);
                    source += 1;
                    self.bus.write_byte(destination, value, Access::Internal);
                    destination += 1;
                    remaining -= 1;
                }
            }
        }
    }
}

/// Largest n with n*n <= value.
fn integer_sqrt(value: u32) -> u32 {
    if value < 2 {
        return value;
    }

    let mut low = 1;
    let mut high = value.min(0xFFFF);
    while low < high {
        let mid = (low + high + 1) / 2;
        if mid * mid <= value {
            low = mid;
        } else {
            high = mid - 1;
        }
    }
    low
}
