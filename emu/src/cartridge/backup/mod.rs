//! Cartridge save backup family.
//!
//! Every Game Pak carries at most one of SRAM, FLASH or EEPROM on the save
//! bus. The bus only ever needs three operations from whichever chip is
//! present, so the family is a tagged variant rather than trait objects.

pub mod eeprom;
pub mod flash;
pub mod sram;

use serde::{Deserialize, Serialize};

pub use eeprom::{Eeprom, EepromSize};
pub use flash::Flash;
pub use sram::Sram;

#[derive(Serialize, Deserialize)]
pub enum Backup {
    Sram(Sram),
    Flash(Flash),
    Eeprom(Eeprom),
}

impl Backup {
    /// Clears the transient chip state (command phases, serial buffers).
    /// The stored save image survives a reset.
    pub fn reset(&mut self) {
        match self {
            Self::Sram(_) => {}
            Self::Flash(flash) => flash.reset(),
            Self::Eeprom(eeprom) => eeprom.reset(),
        }
    }

    pub fn read8(&mut self, address: u32) -> u8 {
        match self {
            Self::Sram(sram) => sram.read8(address),
            Self::Flash(flash) => flash.read8(address),
            Self::Eeprom(eeprom) => eeprom.read8(address),
        }
    }

    pub fn write8(&mut self, address: u32, value: u8) {
        match self {
            Self::Sram(sram) => sram.write8(address, value),
            Self::Flash(flash) => flash.write8(address, value),
            Self::Eeprom(eeprom) => eeprom.write8(address, value),
        }
    }

    /// The raw save image, in the on-disk format the host persists.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        match self {
            Self::Sram(sram) => sram.data().to_vec(),
            Self::Flash(flash) => flash.data(),
            Self::Eeprom(eeprom) => eeprom.data().to_vec(),
        }
    }

    /// Installs a previously persisted save image.
    pub fn load(&mut self, data: &[u8]) {
        match self {
            Self::Sram(sram) => sram.load(data),
            Self::Flash(flash) => flash.load(data),
            Self::Eeprom(eeprom) => eeprom.load(data),
        }
    }
}
