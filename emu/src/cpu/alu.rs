//! Barrel shifter and arithmetic flag helpers.
//!
//! The shifter is shared between ARM data processing, the register-offset
//! addressing of single data transfers, and Thumb formats 1 and 4. The
//! zero-amount immediate encodings have documented special meanings:
//! `LSR #0`/`ASR #0` mean a shift by 32 and `ROR #0` means `RRX`.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl From<u32> for ShiftKind {
    fn from(value: u32) -> Self {
        match value & 0b11 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            3 => Self::Ror,
            _ => unreachable!(),
        }
    }
}

impl std::fmt::Display for ShiftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lsl => f.write_str("LSL"),
            Self::Lsr => f.write_str("LSR"),
            Self::Asr => f.write_str("ASR"),
            Self::Ror => f.write_str("ROR"),
        }
    }
}

/// A value plus the flags it produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArithmeticOpResult {
    pub result: u32,
    pub carry: bool,
    pub overflow: bool,
    pub sign: bool,
    pub zero: bool,
}

impl ArithmeticOpResult {
    fn from_result(result: u32, carry: bool, overflow: bool) -> Self {
        Self {
            result,
            carry,
            overflow,
            sign: result.get_bit(31),
            zero: result == 0,
        }
    }
}

/// Shift by an immediate amount, applying the zero-amount special cases.
pub fn shift_immediate(kind: ShiftKind, amount: u32, value: u32, carry_in: bool) -> (u32, bool) {
    match (kind, amount) {
        // LSL #0 is a transparent no-op, carry unchanged.
        (ShiftKind::Lsl, 0) => (value, carry_in),
        // LSR #0 and ASR #0 encode a shift by 32.
        (ShiftKind::Lsr, 0) => shift_register(ShiftKind::Lsr, 32, value, carry_in),
        (ShiftKind::Asr, 0) => shift_register(ShiftKind::Asr, 32, value, carry_in),
        // ROR #0 encodes RRX: rotate right by one through carry.
        (ShiftKind::Ror, 0) => {
            let carry = value.get_bit(0);
            let mut result = value >> 1;
            result.set_bit(31, carry_in);
            (result, carry)
        }
        _ => shift_register(kind, amount, value, carry_in),
    }
}

/// Shift by a register-supplied amount (no special cases; amounts of zero
/// leave value and carry untouched, amounts ≥ 32 behave as documented).
pub fn shift_register(kind: ShiftKind, amount: u32, value: u32, carry_in: bool) -> (u32, bool) {
    if amount == 0 {
        return (value, carry_in);
    }

    match kind {
        ShiftKind::Lsl => match amount {
            1..=31 => (value << amount, value.get_bit((32 - amount) as u8)),
            32 => (0, value.get_bit(0)),
            _ => (0, false),
        },
        ShiftKind::Lsr => match amount {
            1..=31 => (value >> amount, value.get_bit((amount - 1) as u8)),
            32 => (0, value.get_bit(31)),
            _ => (0, false),
        },
        ShiftKind::Asr => match amount {
            1..=31 => (
                ((value as i32) >> amount) as u32,
                value.get_bit((amount - 1) as u8),
            ),
            _ => {
                let sign = value.get_bit(31);
                (if sign { u32::MAX } else { 0 }, sign)
            }
        },
        ShiftKind::Ror => {
            let amount = amount % 32;
            if amount == 0 {
                (value, value.get_bit(31))
            } else {
                (
                    value.rotate_right(amount),
                    value.get_bit((amount - 1) as u8),
                )
            }
        }
    }
}

pub fn add(first: u32, second: u32) -> ArithmeticOpResult {
    let (result, carry) = first.overflowing_add(second);
    let overflow = (first ^ result) & (second ^ result) & 0x8000_0000 != 0;

    ArithmeticOpResult::from_result(result, carry, overflow)
}

pub fn adc(first: u32, second: u32, carry_in: bool) -> ArithmeticOpResult {
    let wide = u64::from(first) + u64::from(second) + u64::from(carry_in);
    let result = wide as u32;
    let overflow = (first ^ result) & (second ^ result) & 0x8000_0000 != 0;

    ArithmeticOpResult::from_result(result, wide > u64::from(u32::MAX), overflow)
}

pub fn sub(first: u32, second: u32) -> ArithmeticOpResult {
    let result = first.wrapping_sub(second);
    // C means "no borrow" for subtraction.
    let carry = first >= second;
    let overflow = (first ^ second) & (first ^ result) & 0x8000_0000 != 0;

    ArithmeticOpResult::from_result(result, carry, overflow)
}

pub fn sbc(first: u32, second: u32, carry_in: bool) -> ArithmeticOpResult {
    let borrow = u64::from(!carry_in);
    let wide = u64::from(first)
        .wrapping_sub(u64::from(second))
        .wrapping_sub(borrow);
    let result = wide as u32;
    let carry = u64::from(first) >= u64::from(second) + borrow;
    let overflow = (first ^ second) & (first ^ result) & 0x8000_0000 != 0;

    ArithmeticOpResult::from_result(result, carry, overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lsr_zero_means_32() {
        let (result, carry) = shift_immediate(ShiftKind::Lsr, 0, 0x8000_0001, false);
        assert_eq!(result, 0);
        assert!(carry);
    }

    #[test]
    fn asr_zero_means_32() {
        let (result, carry) = shift_immediate(ShiftKind::Asr, 0, 0x8000_0000, false);
        assert_eq!(result, u32::MAX);
        assert!(carry);

        let (result, carry) = shift_immediate(ShiftKind::Asr, 0, 0x7000_0000, true);
        assert_eq!(result, 0);
        assert!(!carry);
    }

    #[test]
    fn ror_zero_is_rrx() {
        let (result, carry) = shift_immediate(ShiftKind::Ror, 0, 0b11, true);
        assert_eq!(result, 0x8000_0001);
        assert!(carry);

        let (result, carry) = shift_immediate(ShiftKind::Ror, 0, 0b10, false);
        assert_eq!(result, 0b1);
        assert!(!carry);
    }

    #[test]
    fn lsl_carries_out_the_last_shifted_bit() {
        let (result, carry) = shift_register(ShiftKind::Lsl, 1, 0x8000_0000, false);
        assert_eq!(result, 0);
        assert!(carry);

        let (result, carry) = shift_register(ShiftKind::Lsl, 33, 0xFFFF_FFFF, true);
        assert_eq!(result, 0);
        assert!(!carry);
    }

    #[test]
    fn ror_by_register_multiple_of_32() {
        let (result, carry) = shift_register(ShiftKind::Ror, 32, 0x8000_0001, false);
        assert_eq!(result, 0x8000_0001);
        assert!(carry);
    }

    #[test]
    fn add_sets_carry_and_overflow() {
        let r = add(u32::MAX, 1);
        assert_eq!(r.result, 0);
        assert!(r.carry);
        assert!(!r.overflow);
        assert!(r.zero);

        let r = add(0x7FFF_FFFF, 1);
        assert_eq!(r.result, 0x8000_0000);
        assert!(!r.carry);
        assert!(r.overflow);
        assert!(r.sign);
    }

    #[test]
    fn sub_carry_means_no_borrow() {
        let r = sub(5, 3);
        assert_eq!(r.result, 2);
        assert!(r.carry);

        let r = sub(3, 5);
        assert_eq!(r.result, (-2_i32) as u32);
        assert!(!r.carry);
        assert!(r.sign);
    }

    #[test]
    fn adc_sbc_chain() {
        let r = adc(0xFFFF_FFFF, 0, true);
        assert_eq!(r.result, 0);
        assert!(r.carry);

        let r = sbc(10, 5, false);
        assert_eq!(r.result, 4);
        assert!(r.carry);

        let r = sbc(0, 0, false);
        assert_eq!(r.result, u32::MAX);
        assert!(!r.carry);
    }
}
