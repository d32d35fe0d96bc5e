//! Thumb (16-bit) instruction decoding.
//!
//! The 19 Thumb formats are classified from the top bits downward. Most
//! formats are compressed forms of ARM operations and share their execution
//! paths through the barrel shifter and the ALU helpers.

use serde::{Deserialize, Serialize};

use crate::bitwise::{Bits, sign_extend};
use crate::cpu::alu::ShiftKind;
use crate::cpu::condition::Condition;

/// Format 3 operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImmediateOp {
    Mov,
    Cmp,
    Add,
    Sub,
}

/// Format 4 ALU operations, by opcode value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThumbAluOp {
    And = 0x0,
    Eor = 0x1,
    Lsl = 0x2,
    Lsr = 0x3,
    Asr = 0x4,
    Adc = 0x5,
    Sbc = 0x6,
    Ror = 0x7,
    Tst = 0x8,
    Neg = 0x9,
    Cmp = 0xA,
    Cmn = 0xB,
    Orr = 0xC,
    Mul = 0xD,
    Bic = 0xE,
    Mvn = 0xF,
}

impl From<u16> for ThumbAluOp {
    fn from(value: u16) -> Self {
        match value & 0xF {
            0x0 => Self::And,
            0x1 => Self::Eor,
            0x2 => Self::Lsl,
            0x3 => Self::Lsr,
            0x4 => Self::Asr,
            0x5 => Self::Adc,
            0x6 => Self::Sbc,
            0x7 => Self::Ror,
            0x8 => Self::Tst,
            0x9 => Self::Neg,
            0xA => Self::Cmp,
            0xB => Self::Cmn,
            0xC => Self::Orr,
            0xD => Self::Mul,
            0xE => Self::Bic,
            _ => Self::Mvn,
        }
    }
}

/// Format 5 high-register operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HiRegisterOp {
    Add,
    Cmp,
    Mov,
    Bx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThumbInstruction {
    /// Format 1: shift by immediate.
    MoveShiftedRegister {
        shift: ShiftKind,
        offset: u32,
        rs: u32,
        rd: u32,
    },
    /// Format 2: three-operand add/subtract.
    AddSubtract {
        immediate: bool,
        subtract: bool,
        value: u32,
        rs: u32,
        rd: u32,
    },
    /// Format 3: 8-bit immediate move/compare/add/subtract.
    MoveCompareAddSubtractImmediate {
        op: ImmediateOp,
        rd: u32,
        offset: u32,
    },
    /// Format 4: register ALU operations.
    AluOperation { op: ThumbAluOp, rs: u32, rd: u32 },
    /// Format 5: high-register add/cmp/mov and BX.
    HiRegisterOp { op: HiRegisterOp, rs: u32, rd: u32 },
    /// Format 6: PC-relative load.
    PcRelativeLoad { rd: u32, word8: u32 },
    /// Format 7: load/store with register offset.
    LoadStoreRegisterOffset {
        load: bool,
        byte: bool,
        ro: u32,
        rb: u32,
        rd: u32,
    },
    /// Format 8: load/store sign-extended byte/halfword.
    LoadStoreSignExtended {
        h: bool,
        sign_extended: bool,
        ro: u32,
        rb: u32,
        rd: u32,
    },
    /// Format 9: load/store with immediate offset.
    LoadStoreImmediateOffset {
        load: bool,
        byte: bool,
        offset: u32,
        rb: u32,
        rd: u32,
    },
    /// Format 10: load/store halfword.
    LoadStoreHalfword {
        load: bool,
        offset: u32,
        rb: u32,
        rd: u32,
    },
    /// Format 11: SP-relative load/store.
    SpRelativeLoadStore { load: bool, rd: u32, word8: u32 },
    /// Format 12: load address (PC- or SP-relative).
    LoadAddress { sp: bool, rd: u32, word8: u32 },
    /// Format 13: add signed offset to SP.
    AddOffsetToStackPointer { negative: bool, word7: u32 },
    /// Format 14: push/pop registers.
    PushPopRegisters {
        load: bool,
        pc_lr: bool,
        register_list: u8,
    },
    /// Format 15: multiple load/store.
    MultipleLoadStore {
        load: bool,
        rb: u32,
        register_list: u8,
    },
    /// Format 16: conditional branch.
    ConditionalBranch { condition: Condition, offset: i32 },
    /// Format 17: software interrupt.
    SoftwareInterrupt { value: u32 },
    /// Format 18: unconditional branch.
    UnconditionalBranch { offset: i32 },
    /// Format 19: long branch with link, two halves.
    LongBranchWithLink { high: bool, offset: u32 },
}

impl From<u16> for ThumbInstruction {
    #[allow(clippy::too_many_lines)]
    fn from(op_code: u16) -> Self {
        let bits15_13 = op_code.get_bits(13..=15);

        match bits15_13 {
            0b000 => {
                if op_code.get_bits(11..=12) == 0b11 {
                    Self::AddSubtract {
                        immediate: op_code.get_bit(10),
                        subtract: op_code.get_bit(9),
                        value: u32::from(op_code.get_bits(6..=8)),
                        rs: u32::from(op_code.get_bits(3..=5)),
                        rd: u32::from(op_code.get_bits(0..=2)),
                    }
                } else {
                    Self::MoveShiftedRegister {
                        shift: ShiftKind::from(u32::from(op_code.get_bits(11..=12))),
                        offset: u32::from(op_code.get_bits(6..=10)),
                        rs: u32::from(op_code.get_bits(3..=5)),
                        rd: u32::from(op_code.get_bits(0..=2)),
                    }
                }
            }
            0b001 => {
                let op = match op_code.get_bits(11..=12) {
                    0b00 => ImmediateOp::Mov,
                    0b01 => ImmediateOp::Cmp,
                    0b10 => ImmediateOp::Add,
                    _ => ImmediateOp::Sub,
                };
                Self::MoveCompareAddSubtractImmediate {
                    op,
                    rd: u32::from(op_code.get_bits(8..=10)),
                    offset: u32::from(op_code.get_bits(0..=7)),
                }
            }
            0b010 => {
                if op_code.get_bits(10..=15) == 0b010000 {
                    Self::AluOperation {
                        op: ThumbAluOp::from(op_code.get_bits(6..=9)),
                        rs: u32::from(op_code.get_bits(3..=5)),
                        rd: u32::from(op_code.get_bits(0..=2)),
                    }
                } else if op_code.get_bits(10..=15) == 0b010001 {
                    let op = match op_code.get_bits(8..=9) {
                        0b00 => HiRegisterOp::Add,
                        0b01 => HiRegisterOp::Cmp,
                        0b10 => HiRegisterOp::Mov,
                        _ => HiRegisterOp::Bx,
                    };
                    // H1/H2 extend the register numbers into the high set.
                    Self::HiRegisterOp {
                        op,
                        rs: u32::from(op_code.get_bits(3..=6)),
                        rd: u32::from(op_code.get_bits(0..=2))
                            | (u32::from(op_code.get_bit(7)) << 3),
                    }
                } else if op_code.get_bits(11..=15) == 0b01001 {
                    Self::PcRelativeLoad {
                        rd: u32::from(op_code.get_bits(8..=10)),
                        word8: u32::from(op_code.get_bits(0..=7)) * 4,
                    }
                } else if op_code.get_bit(9) {
                    Self::LoadStoreSignExtended {
                        h: op_code.get_bit(11),
                        sign_extended: op_code.get_bit(10),
                        ro: u32::from(op_code.get_bits(6..=8)),
                        rb: u32::from(op_code.get_bits(3..=5)),
                        rd: u32::from(op_code.get_bits(0..=2)),
                    }
                } else {
                    Self::LoadStoreRegisterOffset {
                        load: op_code.get_bit(11),
                        byte: op_code.get_bit(10),
                        ro: u32::from(op_code.get_bits(6..=8)),
                        rb: u32::from(op_code.get_bits(3..=5)),
                        rd: u32::from(op_code.get_bits(0..=2)),
                    }
                }
            }
            0b011 => {
                let byte = op_code.get_bit(12);
                let offset = u32::from(op_code.get_bits(6..=10));
                Self::LoadStoreImmediateOffset {
                    load: op_code.get_bit(11),
                    byte,
                    offset: if byte { offset } else { offset * 4 },
                    rb: u32::from(op_code.get_bits(3..=5)),
                    rd: u32::from(op_code.get_bits(0..=2)),
                }
            }
            0b100 => {
                if op_code.get_bit(12) {
                    Self::SpRelativeLoadStore {
                        load: op_code.get_bit(11),
                        rd: u32::from(op_code.get_bits(8..=10)),
                        word8: u32::from(op_code.get_bits(0..=7)) * 4,
                    }
                } else {
                    Self::LoadStoreHalfword {
                        load: op_code.get_bit(11),
                        offset: u32::from(op_code.get_bits(6..=10)) * 2,
                        rb: u32::from(op_code.get_bits(3..=5)),
                        rd: u32::from(op_code.get_bits(0..=2)),
                    }
                }
            }
            0b101 => {
                if !op_code.get_bit(12) {
                    Self::LoadAddress {
                        sp: op_code.get_bit(11),
                        rd: u32::from(op_code.get_bits(8..=10)),
                        word8: u32::from(op_code.get_bits(0..=7)) * 4,
                    }
                } else if op_code.get_bits(8..=11) == 0b0000 {
                    Self::AddOffsetToStackPointer {
                        negative: op_code.get_bit(7),
                        word7: u32::from(op_code.get_bits(0..=6)) * 4,
                    }
                } else {
                    Self::PushPopRegisters {
                        load: op_code.get_bit(11),
                        pc_lr: op_code.get_bit(8),
                        register_list: op_code.get_byte(0),
                    }
                }
            }
            0b110 => {
                if !op_code.get_bit(12) {
                    Self::MultipleLoadStore {
                        load: op_code.get_bit(11),
                        rb: u32::from(op_code.get_bits(8..=10)),
                        register_list: op_code.get_byte(0),
                    }
                } else if op_code.get_bits(8..=11) == 0b1111 {
                    Self::SoftwareInterrupt {
                        value: u32::from(op_code.get_byte(0)),
                    }
                } else {
                    Self::ConditionalBranch {
                        condition: Condition::from(op_code.get_bits(8..=11) as u8),
                        offset: sign_extend(u32::from(op_code.get_byte(0)), 8) << 1,
                    }
                }
            }
            _ => {
                if !op_code.get_bit(12) {
                    Self::UnconditionalBranch {
                        offset: sign_extend(u32::from(op_code.get_bits(0..=10)), 11) << 1,
                    }
                } else {
                    Self::LongBranchWithLink {
                        high: !op_code.get_bit(11),
                        offset: u32::from(op_code.get_bits(0..=10)),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_move_shifted_and_add_subtract() {
        // LSL R0, R1, #4
        assert_eq!(
            ThumbInstruction::from(0x0108),
            ThumbInstruction::MoveShiftedRegister {
                shift: ShiftKind::Lsl,
                offset: 4,
                rs: 1,
                rd: 0,
            }
        );

        // ADD R0, R1, R2
        assert_eq!(
            ThumbInstruction::from(0x1888),
            ThumbInstruction::AddSubtract {
                immediate: false,
                subtract: false,
                value: 2,
                rs: 1,
                rd: 0,
            }
        );

        // SUB R0, R1, #3
        assert_eq!(
            ThumbInstruction::from(0x1EC8),
            ThumbInstruction::AddSubtract {
                immediate: true,
                subtract: true,
                value: 3,
                rs: 1,
                rd: 0,
            }
        );
    }

    #[test]
    fn decode_immediate_op() {
        // MOV R3, #0x7F
        assert_eq!(
            ThumbInstruction::from(0x237F),
            ThumbInstruction::MoveCompareAddSubtractImmediate {
                op: ImmediateOp::Mov,
                rd: 3,
                offset: 0x7F,
            }
        );
    }

    #[test]
    fn decode_alu_and_hi_register() {
        // MUL R0, R7
        assert_eq!(
            ThumbInstruction::from(0x4378),
            ThumbInstruction::AluOperation {
                op: ThumbAluOp::Mul,
                rs: 7,
                rd: 0,
            }
        );

        // BX R14
        assert_eq!(
            ThumbInstruction::from(0x4770),
            ThumbInstruction::HiRegisterOp {
                op: HiRegisterOp::Bx,
                rs: 14,
                rd: 0,
            }
        );

        // MOV R8, R0
        assert_eq!(
            ThumbInstruction::from(0x4680),
            ThumbInstruction::HiRegisterOp {
                op: HiRegisterOp::Mov,
                rs: 0,
                rd: 8,
            }
        );
    }

    #[test]
    fn decode_loads_and_stores() {
        // LDR R1, [PC, #16]
        assert_eq!(
            ThumbInstruction::from(0x4904),
            ThumbInstruction::PcRelativeLoad { rd: 1, word8: 16 }
        );

        // STR R0, [R1, R2]
        assert_eq!(
            ThumbInstruction::from(0x5088),
            ThumbInstruction::LoadStoreRegisterOffset {
                load: false,
                byte: false,
                ro: 2,
                rb: 1,
                rd: 0,
            }
        );

        // LDSH R0, [R1, R2]
        assert_eq!(
            ThumbInstruction::from(0x5E88),
            ThumbInstruction::LoadStoreSignExtended {
                h: true,
                sign_extended: true,
                ro: 2,
                rb: 1,
                rd: 0,
            }
        );

        // LDR R0, [R1, #4]
        assert_eq!(
            ThumbInstruction::from(0x6848),
            ThumbInstruction::LoadStoreImmediateOffset {
                load: true,
                byte: false,
                offset: 4,
                rb: 1,
                rd: 0,
            }
        );

        // STRH R0, [R1, #2]
        assert_eq!(
            ThumbInstruction::from(0x8048),
            ThumbInstruction::LoadStoreHalfword {
                load: false,
                offset: 2,
                rb: 1,
                rd: 0,
            }
        );

        // LDR R0, [SP, #8]
        assert_eq!(
            ThumbInstruction::from(0x9802),
            ThumbInstruction::SpRelativeLoadStore {
                load: true,
                rd: 0,
                word8: 8,
            }
        );
    }

    #[test]
    fn decode_stack_and_block_ops() {
        // ADD SP, #-24
        assert_eq!(
            ThumbInstruction::from(0xB086),
            ThumbInstruction::AddOffsetToStackPointer {
                negative: true,
                word7: 24,
            }
        );

        // PUSH {R0-R3, LR}
        assert_eq!(
            ThumbInstruction::from(0xB50F),
            ThumbInstruction::PushPopRegisters {
                load: false,
                pc_lr: true,
                register_list: 0x0F,
            }
        );

        // LDMIA R0!, {R1, R2}
        assert_eq!(
            ThumbInstruction::from(0xC806),
            ThumbInstruction::MultipleLoadStore {
                load: true,
                rb: 0,
                register_list: 0x06,
            }
        );
    }

    #[test]
    fn decode_branches() {
        // BEQ +4
        assert_eq!(
            ThumbInstruction::from(0xD002),
            ThumbInstruction::ConditionalBranch {
                condition: Condition::EQ,
                offset: 4,
            }
        );

        // B -2
        assert_eq!(
            ThumbInstruction::from(0xE7FF),
            ThumbInstruction::UnconditionalBranch { offset: -2 }
        );

        // SWI 5
        assert_eq!(
            ThumbInstruction::from(0xDF05),
            ThumbInstruction::SoftwareInterrupt { value: 5 }
        );

        // BL first half (high part).
        assert_eq!(
            ThumbInstruction::from(0xF000),
            ThumbInstruction::LongBranchWithLink {
                high: true,
                offset: 0,
            }
        );
        // BL second half.
        assert_eq!(
            ThumbInstruction::from(0xF801),
            ThumbInstruction::LongBranchWithLink {
                high: false,
                offset: 1,
            }
        );
    }
}
