//! Internal memory storage: BIOS, work RAMs, cartridge ROM and save backup.
//!
//! | Region | Address range           | Size   | Notes                        |
//! |--------|-------------------------|--------|------------------------------|
//! | BIOS   | `0x0000_0000-0000_3FFF` | 16 KiB | read-only, open-bus guarded  |
//! | EWRAM  | `0x0200_0000-0203_FFFF` | 256 KiB| mirrored every 256 KiB       |
//! | IWRAM  | `0x0300_0000-0300_7FFF` | 32 KiB | mirrored every 32 KiB        |
//! | ROM    | `0x0800_0000-0DFF_FFFF` | ≤32 MiB| three waitstate mirrors      |
//! | Save   | `0x0E00_0000+`          | chip   | delegated to [`Backup`]      |
//!
//! Reads past the end of the loaded ROM return `(address >> 1) & 0xFFFF`:
//! the Game Pak bus multiplexes data and the low address half, and an absent
//! chip leaves the latched address on the bus.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::bitwise::Bits;
use crate::cartridge::backup::Backup;

#[serde_as]
#[derive(Serialize, Deserialize)]
pub struct InternalMemory {
    /// From 0x00000000 to 0x00003FFF (16 KiB).
    #[serde_as(as = "Box<[_; 16384]>")]
    bios: Box<[u8; 0x4000]>,

    /// From 0x02000000 to 0x0203FFFF (256 KiB).
    #[serde_as(as = "Box<[_; 262144]>")]
    pub working_ram: Box<[u8; 0x40000]>,

    /// From 0x03000000 to 0x03007FFF (32 KiB).
    #[serde_as(as = "Box<[_; 32768]>")]
    pub working_iram: Box<[u8; 0x8000]>,

    /// Loaded cartridge ROM, mirrored over pages 8-D.
    pub rom: Vec<u8>,

    /// Save chip on the 8-bit backup bus, if the cartridge carries one.
    pub backup: Option<Backup>,
}

impl Default for InternalMemory {
    fn default() -> Self {
        Self {
            bios: Box::new([0; 0x4000]),
            working_ram: Box::new([0; 0x40000]),
            working_iram: Box::new([0; 0x8000]),
            rom: Vec::new(),
            backup: None,
        }
    }
}

impl InternalMemory {
    /// Installs a BIOS image.
    ///
    /// # Errors
    ///
    /// Fails when the image is larger than the 16 KiB BIOS ROM.
    pub fn load_bios(&mut self, image: &[u8]) -> Result<(), String> {
        if image.len() > self.bios.len() {
            return Err(format!("bad BIOS image: {} bytes", image.len()));
        }

        self.bios.fill(0);
        self.bios[..image.len()].copy_from_slice(image);
        Ok(())
    }

    /// Clears the RAM regions, keeping BIOS, ROM and the save image.
    pub fn reset(&mut self) {
        self.working_ram.fill(0);
        self.working_iram.fill(0);
        if let Some(backup) = &mut self.backup {
            backup.reset();
        }
    }

    /// Reads a BIOS byte without the open-bus guard (the bus applies it).
    #[must_use]
    pub fn read_bios(&self, address: u32) -> u8 {
        self.bios[address as usize & 0x3FFF]
    }

    #[must_use]
    pub fn read_ewram(&self, address: u32) -> u8 {
        self.working_ram[address as usize & 0x3FFFF]
    }

    pub fn write_ewram(&mut self, address: u32, value: u8) {
        self.working_ram[address as usize & 0x3FFFF] = value;
    }

    #[must_use]
    pub fn read_iwram(&self, address: u32) -> u8 {
        self.working_iram[address as usize & 0x7FFF]
    }

    pub fn write_iwram(&mut self, address: u32, value: u8) {
        self.working_iram[address as usize & 0x7FFF] = value;
    }

    #[must_use]
    pub fn read_rom(&self, address: u32) -> u8 {
        let offset = address as usize & 0x01FF_FFFF;

        if offset < self.rom.len() {
            self.rom[offset]
        } else {
            // Open bus: the halfword lane still carries the word-address
            // half the cartridge latch saw.
            (((offset >> 1) & 0xFFFF) as u16).get_byte((offset & 1) as u8)
        }
    }

    #[must_use]
    pub fn read_save(&mut self, address: u32) -> u8 {
        self.backup
            .as_mut()
            .map_or(0, |backup| backup.read8(address))
    }

    pub fn write_save(&mut self, address: u32, value: u8) {
        if let Some(backup) = &mut self.backup {
            backup.write8(address, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::backup::Sram;
    use pretty_assertions::assert_eq;

    #[test]
    fn ewram_mirrors_every_256k() {
        let mut memory = InternalMemory::default();
        memory.write_ewram(0x0201_0003, 5);

        assert_eq!(memory.read_ewram(0x0201_0003), 5);
        assert_eq!(memory.read_ewram(0x0205_0003), 5);
        assert_eq!(memory.read_ewram(0x02F5_0003), 5);
    }

    #[test]
    fn iwram_mirrors_every_32k() {
        let mut memory = InternalMemory::default();
        memory.write_iwram(0x0300_21FF, 5);

        assert_eq!(memory.read_iwram(0x0300_21FF), 5);
        assert_eq!(memory.read_iwram(0x0300_A1FF), 5);
        assert_eq!(memory.read_iwram(0x03FF_A1FF), 5);
    }

    #[test]
    fn rom_open_bus_pattern() {
        let mut memory = InternalMemory::default();
        memory.rom = vec![1, 2, 3, 4];

        assert_eq!(memory.read_rom(0x0800_0000), 1);

        // Past the end: low halfword of the halfword address.
        assert_eq!(memory.read_rom(0x09FF_FFFE), 0xFF);
        assert_eq!(memory.read_rom(0x09FF_FFFF), 0xFF);
        assert_eq!(memory.read_rom(0x09FF_FFEE), 0xF7);
    }

    #[test]
    fn bios_image_size_is_validated() {
        let mut memory = InternalMemory::default();
        assert!(memory.load_bios(&[0; 0x4000]).is_ok());
        assert!(memory.load_bios(&[0; 0x4001]).is_err());
    }

    #[test]
    fn save_region_delegates_to_backup() {
        let mut memory = InternalMemory::default();
        assert_eq!(memory.read_save(0x0E00_0000), 0);

        memory.backup = Some(Backup::Sram(Sram::new()));
        memory.write_save(0x0E00_0042, 0xAB);
        assert_eq!(memory.read_save(0x0E00_0042), 0xAB);
    }

    #[test]
    fn reset_clears_ram_but_keeps_rom_and_save() {
        let mut memory = InternalMemory::default();
        memory.rom = vec![9; 16];
        memory.backup = Some(Backup::Sram(Sram::new()));
        memory.write_ewram(0x0200_0000, 1);
        memory.write_save(0, 7);

        memory.reset();

        assert_eq!(memory.read_ewram(0x0200_0000), 0);
        assert_eq!(memory.read_rom(0x0800_0000), 9);
        assert_eq!(memory.read_save(0), 7);
    }
}
