//! Banked registers for exception modes.
//!
//! Each exception mode has its own R13 (SP), R14 (LR) and SPSR. FIQ
//! additionally banks R8-R12 for faster interrupt handling. Values live here
//! while their mode is not active; the mode switch swaps them in and out of
//! the visible register file.

use serde::{Deserialize, Serialize};

use crate::cpu::psr::Psr;

#[derive(Default, Serialize, Deserialize)]
pub struct RegisterBank {
    /// R8-R14 of user/system (and the other non-FIQ modes' R8-R12), saved
    /// while FIQ is active.
    pub r8_old: u32,
    pub r9_old: u32,
    pub r10_old: u32,
    pub r11_old: u32,
    pub r12_old: u32,
    pub r13_old: u32,
    pub r14_old: u32,

    pub r8_fiq: u32,
    pub r9_fiq: u32,
    pub r10_fiq: u32,
    pub r11_fiq: u32,
    pub r12_fiq: u32,
    pub r13_fiq: u32,
    pub r14_fiq: u32,

    pub r13_svc: u32,
    pub r14_svc: u32,

    pub r13_abt: u32,
    pub r14_abt: u32,

    pub r13_irq: u32,
    pub r14_irq: u32,

    pub r13_und: u32,
    pub r14_und: u32,

    pub spsr_fiq: Psr,
    pub spsr_svc: Psr,
    pub spsr_abt: Psr,
    pub spsr_irq: Psr,
    pub spsr_und: Psr,
}
