use serde::{Deserialize, Serialize};

/// The 16 ARM condition codes, encoded in the top nibble of every ARM
/// instruction (and in Thumb conditional branches).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// Equal (Z=1)
    EQ = 0x0,
    /// Not equal (Z=0)
    NE = 0x1,
    /// Unsigned higher or same (C=1)
    CS = 0x2,
    /// Unsigned lower (C=0)
    CC = 0x3,
    /// Negative (N=1)
    MI = 0x4,
    /// Positive or zero (N=0)
    PL = 0x5,
    /// Overflow (V=1)
    VS = 0x6,
    /// No overflow (V=0)
    VC = 0x7,
    /// Unsigned higher (C=1 and Z=0)
    HI = 0x8,
    /// Unsigned lower or same (C=0 or Z=1)
    LS = 0x9,
    /// Signed greater or equal (N=V)
    GE = 0xA,
    /// Signed less than (N!=V)
    LT = 0xB,
    /// Signed greater than (Z=0 and N=V)
    GT = 0xC,
    /// Signed less or equal (Z=1 or N!=V)
    LE = 0xD,
    /// Always
    AL = 0xE,
    /// Never (reserved on ARMv3 and up)
    NV = 0xF,
}

impl From<u8> for Condition {
    fn from(value: u8) -> Self {
        match value {
            0x0 => Self::EQ,
            0x1 => Self::NE,
            0x2 => Self::CS,
            0x3 => Self::CC,
            0x4 => Self::MI,
            0x5 => Self::PL,
            0x6 => Self::VS,
            0x7 => Self::VC,
            0x8 => Self::HI,
            0x9 => Self::LS,
            0xA => Self::GE,
            0xB => Self::LT,
            0xC => Self::GT,
            0xD => Self::LE,
            0xE => Self::AL,
            0xF => Self::NV,
            _ => unreachable!("condition code is 4 bits"),
        }
    }
}
