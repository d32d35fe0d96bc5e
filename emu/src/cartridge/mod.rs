//! Game Pak handling: ROM bytes, the parsed header and the save backup.
//!
//! The save chip type is not discoverable from the header. Like every other
//! emulator we scan the ROM for the ASCII library tags the SDK links in:
//! `EEPROM_V`, `SRAM_V`, `FLASH_V`, `FLASH512_V`, `FLASH1M_V`.

pub mod backup;
pub mod header;

use backup::{Backup, Eeprom, EepromSize, Flash, Sram};
use header::CartridgeHeader;

/// Save-chip selection passed to [`Cartridge::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTypeHint {
    /// Scan the ROM for SDK library tags.
    Auto,
    Sram,
    Flash64,
    Flash128,
    Eeprom4k,
    Eeprom64k,
}

pub struct Cartridge {
    pub header: CartridgeHeader,
    pub rom: Vec<u8>,
    pub backup: Backup,
}

impl Cartridge {
    /// Wraps loaded ROM bytes, parsing the header and instantiating the
    /// save backup.
    ///
    /// # Errors
    ///
    /// Fails when the ROM is too small to carry a header.
    pub fn new(rom: Vec<u8>, hint: SaveTypeHint) -> Result<Self, String> {
        let header = CartridgeHeader::new(&rom)?;

        let kind = match hint {
            SaveTypeHint::Auto => detect_save_type(&rom),
            other => other,
        };

        let backup = match kind {
            SaveTypeHint::Flash64 => Backup::Flash(Flash::new(false)),
            SaveTypeHint::Flash128 => Backup::Flash(Flash::new(true)),
            SaveTypeHint::Eeprom4k => Backup::Eeprom(Eeprom::new(EepromSize::Eeprom4k)),
            SaveTypeHint::Eeprom64k => Backup::Eeprom(Eeprom::new(EepromSize::Eeprom64k)),
            // SRAM also covers carts with no detectable save hardware:
            // a dead save region is indistinguishable from unused SRAM.
            SaveTypeHint::Sram | SaveTypeHint::Auto => Backup::Sram(Sram::new()),
        };

        Ok(Self {
            header,
            rom,
            backup,
        })
    }
}

fn detect_save_type(rom: &[u8]) -> SaveTypeHint {
    const TAGS: [(&[u8], SaveTypeHint); 5] = [
        (b"EEPROM_V", SaveTypeHint::Eeprom4k),
        (b"SRAM_V", SaveTypeHint::Sram),
        (b"FLASH_V", SaveTypeHint::Flash64),
        (b"FLASH512_V", SaveTypeHint::Flash64),
        (b"FLASH1M_V", SaveTypeHint::Flash128),
    ];

    // The tags are word aligned by the linker.
    for window_start in (0..rom.len()).step_by(4) {
        let window = &rom[window_start..];
        for (tag, kind) in TAGS {
            if window.len() >= tag.len() && &window[..tag.len()] == tag {
                tracing::debug!(
                    "save type {:?} detected at ROM offset {window_start:#X}",
                    kind
                );
                return kind;
            }
        }
    }

    tracing::debug!("no save tag found, defaulting to SRAM");
    SaveTypeHint::Auto
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rom_with_tag(tag: &[u8]) -> Vec<u8> {
        let mut rom = vec![0_u8; 0x200];
        rom[0x100..0x100 + tag.len()].copy_from_slice(tag);
        rom
    }

    #[test]
    fn detects_tags() {
        assert_eq!(
            detect_save_type(&rom_with_tag(b"EEPROM_V124")),
            SaveTypeHint::Eeprom4k
        );
        assert_eq!(
            detect_save_type(&rom_with_tag(b"SRAM_V113")),
            SaveTypeHint::Sram
        );
        assert_eq!(
            detect_save_type(&rom_with_tag(b"FLASH1M_V103")),
            SaveTypeHint::Flash128
        );
        assert_eq!(
            detect_save_type(&rom_with_tag(b"FLASH512_V131")),
            SaveTypeHint::Flash64
        );
        assert_eq!(detect_save_type(&[0; 0x100]), SaveTypeHint::Auto);
    }

    #[test]
    fn hint_overrides_detection() {
        let rom = rom_with_tag(b"SRAM_V113");
        let cartridge = Cartridge::new(rom, SaveTypeHint::Flash128).unwrap();
        assert!(matches!(cartridge.backup, Backup::Flash(_)));
    }

    #[test]
    fn auto_detection_picks_backup() {
        let rom = rom_with_tag(b"EEPROM_V124");
        let cartridge = Cartridge::new(rom, SaveTypeHint::Auto).unwrap();
        assert!(matches!(cartridge.backup, Backup::Eeprom(_)));
    }
}
