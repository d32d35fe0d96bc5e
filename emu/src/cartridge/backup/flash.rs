//! FLASH backup (64 KiB single bank or 128 KiB dual bank).
//!
//! Commands are submitted through a three-phase unlock sequence:
//!
//! | Phase | Condition                     | Next  |
//! |-------|-------------------------------|-------|
//! | 0     | write `0x0E005555` = `0xAA`   | 1     |
//! | 1     | write `0x0E002AAA` = `0x55`   | 2     |
//! | 2     | write `0x0E005555` = command  | act, 0|
//!
//! Supported commands: enter/leave chip-id mode, arm erase, chip erase,
//! sector erase, single byte write, bank select (128 KiB parts only).

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

const BANK_SIZE: usize = 0x10000;
const SECTOR_SIZE: usize = 0x1000;

const CMD_PORT: u32 = 0x0E00_5555;
const UNLOCK_PORT: u32 = 0x0E00_2AAA;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum FlashCommand {
    EnterChipId,
    LeaveChipId,
    ArmErase,
    EraseChip,
    EraseSector,
    WriteByte,
    SelectBank,
}

impl FlashCommand {
    const fn decode(value: u8) -> Option<Self> {
        match value {
            0x90 => Some(Self::EnterChipId),
            0xF0 => Some(Self::LeaveChipId),
            0x80 => Some(Self::ArmErase),
            0x10 => Some(Self::EraseChip),
            0x30 => Some(Self::EraseSector),
            0xA0 => Some(Self::WriteByte),
            0xB0 => Some(Self::SelectBank),
            _ => None,
        }
    }
}

#[serde_as]
#[derive(Serialize, Deserialize)]
pub struct Flash {
    #[serde_as(as = "[Box<[_; 65536]>; 2]")]
    memory: [Box<[u8; BANK_SIZE]>; 2],
    two_banks: bool,
    bank: usize,
    command_phase: u8,
    chip_id_mode: bool,
    erase_armed: bool,
    write_armed: bool,
    bank_select_armed: bool,
}

impl Flash {
    #[must_use]
    pub fn new(two_banks: bool) -> Self {
        Self {
            memory: [Box::new([0xFF; BANK_SIZE]), Box::new([0xFF; BANK_SIZE])],
            two_banks,
            bank: 0,
            command_phase: 0,
            chip_id_mode: false,
            erase_armed: false,
            write_armed: false,
            bank_select_armed: false,
        }
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        if self.two_banks { 2 * BANK_SIZE } else { BANK_SIZE }
    }

    pub fn reset(&mut self) {
        self.bank = 0;
        self.command_phase = 0;
        self.chip_id_mode = false;
        self.erase_armed = false;
        self.write_armed = false;
        self.bank_select_armed = false;
    }

    #[must_use]
    pub fn read8(&self, address: u32) -> u8 {
        let address = address as usize & 0xFFFF;

        if self.chip_id_mode && address < 2 {
            // FLASH64 identifies as SST (0xBF/0xD4),
            // FLASH128 as Macronix (0xC2/0x09).
            return if self.two_banks {
                if address == 0 { 0xC2 } else { 0x09 }
            } else if address == 0 {
                0xBF
            } else {
                0xD4
            };
        }

        self.memory[self.bank][address]
    }

    pub fn write8(&mut self, address: u32, value: u8) {
        if self.write_armed {
            self.memory[self.bank][address as usize & 0xFFFF] &= value;
            self.write_armed = false;
            return;
        }

        if self.bank_select_armed && address & 0xFFFF == 0 {
            self.bank = (value & 1) as usize;
            self.bank_select_armed = false;
            return;
        }

        if address == CMD_PORT && value == 0xAA {
            self.command_phase = 1;
        } else if address == UNLOCK_PORT && value == 0x55 && self.command_phase == 1 {
            self.command_phase = 2;
        } else if self.command_phase == 2 {
            self.dispatch_command(address, value);
            self.command_phase = 0;
        } else if self.command_phase != 0 {
            tracing::debug!(
                "flash: out-of-sequence write {value:#04X} to {address:#010X}, resetting phase"
            );
            self.command_phase = 0;
        }
    }

    fn dispatch_command(&mut self, address: u32, value: u8) {
        // Sector erase carries the sector number in the address instead of
        // being written to the command port.
        if address & !0xF000 == 0x0E00_0000 {
            if self.erase_armed && FlashCommand::decode(value) == Some(FlashCommand::EraseSector) {
                let base = address as usize & 0xF000;
                self.memory[self.bank][base..base + SECTOR_SIZE].fill(0xFF);
                self.erase_armed = false;
            }
            return;
        }

        if address != CMD_PORT {
            tracing::debug!("flash: command {value:#04X} at unexpected port {address:#010X}");
            return;
        }

        match FlashCommand::decode(value) {
            Some(FlashCommand::EnterChipId) => self.chip_id_mode = true,
            Some(FlashCommand::LeaveChipId) => self.chip_id_mode = false,
            Some(FlashCommand::ArmErase) => self.erase_armed = true,
            Some(FlashCommand::EraseChip) => {
                if self.erase_armed {
                    self.memory[0].fill(0xFF);
                    self.memory[1].fill(0xFF);
                    self.erase_armed = false;
                }
            }
            Some(FlashCommand::EraseSector) => {
                // Only valid with the sector number in the address.
            }
            Some(FlashCommand::WriteByte) => self.write_armed = true,
            Some(FlashCommand::SelectBank) => {
                if self.two_banks {
                    self.bank_select_armed = true;
                }
            }
            None => {
                tracing::debug!("flash: unknown command {value:#04X}");
            }
        }
    }

    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        let mut image = self.memory[0].to_vec();
        if self.two_banks {
            image.extend_from_slice(self.memory[1].as_slice());
        }
        image
    }

    /// Installs a save image. Oversized images are truncated, undersized
    /// images fill the leading bytes; both cases are logged.
    pub fn load(&mut self, data: &[u8]) {
        if data.len() != self.size() {
            tracing::warn!(
                "flash save size {} does not match chip size {}, truncating",
                data.len(),
                self.size()
            );
        }

        self.memory[0].fill(0xFF);
        self.memory[1].fill(0xFF);
        for (i, &byte) in data.iter().take(self.size()).enumerate() {
            self.memory[i / BANK_SIZE][i % BANK_SIZE] = byte;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unlock(flash: &mut Flash, command: u8) {
        flash.write8(CMD_PORT, 0xAA);
        flash.write8(UNLOCK_PORT, 0x55);
        flash.write8(CMD_PORT, command);
    }

    #[test]
    fn chip_id_64k() {
        let mut flash = Flash::new(false);
        unlock(&mut flash, 0x90);
        assert_eq!(flash.read8(0x0E00_0000), 0xBF);
        assert_eq!(flash.read8(0x0E00_0001), 0xD4);

        unlock(&mut flash, 0xF0);
        assert_eq!(flash.read8(0x0E00_0000), 0xFF);
    }

    #[test]
    fn chip_id_128k() {
        let mut flash = Flash::new(true);
        unlock(&mut flash, 0x90);
        assert_eq!(flash.read8(0x0E00_0000), 0xC2);
        assert_eq!(flash.read8(0x0E00_0001), 0x09);
    }

    #[test]
    fn byte_write_only_clears_bits() {
        let mut flash = Flash::new(false);
        unlock(&mut flash, 0xA0);
        flash.write8(0x0E00_0010, 0x0F);
        assert_eq!(flash.read8(0x0E00_0010), 0x0F);

        // A second write without re-arming is a command write, not data.
        flash.write8(0x0E00_0010, 0xF0);
        assert_eq!(flash.read8(0x0E00_0010), 0x0F);

        unlock(&mut flash, 0xA0);
        flash.write8(0x0E00_0010, 0xFC);
        assert_eq!(flash.read8(0x0E00_0010), 0x0C);
    }

    #[test]
    fn sector_erase() {
        let mut flash = Flash::new(false);
        unlock(&mut flash, 0xA0);
        flash.write8(0x0E00_3004, 0x00);

        unlock(&mut flash, 0x80);
        flash.write8(CMD_PORT, 0xAA);
        flash.write8(UNLOCK_PORT, 0x55);
        flash.write8(0x0E00_3000, 0x30);

        assert_eq!(flash.read8(0x0E00_3004), 0xFF);
    }

    #[test]
    fn chip_erase() {
        let mut flash = Flash::new(true);
        unlock(&mut flash, 0xA0);
        flash.write8(0x0E00_0000, 0x12);

        unlock(&mut flash, 0x80);
        unlock(&mut flash, 0x10);

        assert_eq!(flash.read8(0x0E00_0000), 0xFF);
    }

    #[test]
    fn bank_select_switches_on_128k_only() {
        let mut flash = Flash::new(true);
        unlock(&mut flash, 0xA0);
        flash.write8(0x0E00_0000, 0x11);

        unlock(&mut flash, 0xB0);
        flash.write8(0x0E00_0000, 0x01);
        assert_eq!(flash.read8(0x0E00_0000), 0xFF);

        unlock(&mut flash, 0xB0);
        flash.write8(0x0E00_0000, 0x00);
        assert_eq!(flash.read8(0x0E00_0000), 0x11);

        let mut small = Flash::new(false);
        unlock(&mut small, 0xA0);
        small.write8(0x0E00_0000, 0x22);
        unlock(&mut small, 0xB0);
        small.write8(0x0E00_0000, 0x01);
        assert_eq!(small.read8(0x0E00_0000), 0x22);
    }
}
