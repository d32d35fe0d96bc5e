//! ARM7TDMI processor emulation.
//!
//! The CPU starts at the reset vector (or directly at the cartridge
//! entrypoint when no BIOS is installed), fetches through a two-slot
//! prefetch pipeline, and dispatches decoded ARM or Thumb instructions.
//! Hardware peripherals live under [`hardware`] and are reached through the
//! [`Bus`](crate::bus::Bus).

pub mod alu;
pub mod arm;
pub mod arm7tdmi;
pub mod condition;
pub mod cpu_modes;
pub mod hardware;
pub mod psr;
pub mod register_bank;
pub mod registers;
pub mod thumb;
