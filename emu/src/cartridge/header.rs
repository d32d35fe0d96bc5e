//! Cartridge header parsing.
//!
//! Every Game Pak starts with a 192-byte header: a branch instruction to the
//! real entrypoint, the compressed Nintendo logo bitmap, title/code/maker
//! strings and a handful of fixed bytes, followed by the multiboot
//! sub-header used for link-cable booting.

/// The 192-byte cartridge header at ROM offset 0.
#[derive(Debug, Clone)]
pub struct CartridgeHeader {
    /// 32bit ARM branch opcode, eg. "B rom_start"
    pub rom_entry_point: [u8; 4],
    /// Compressed bitmap, required (not verified by the core)
    pub nintendo_logo: [u8; 156],
    /// Uppercase ascii, max 12 characters
    pub game_title: String,
    /// Uppercase ascii, 4 characters
    pub game_code: String,
    /// Uppercase ascii, 2 characters
    pub maker_code: String,
    /// Must be 0x96, required
    pub fixed_value: u8,
    /// 00h for current GBA models
    pub main_unit_code: u8,
    /// Usually 0x00 (bit7=DACS/debug related)
    pub device_type: u8,
    pub software_version: u8,
    /// Header checksum, required
    pub complement_check: u8,
    /// Multiboot sub-header
    pub ram_entry_point: [u8; 4],
    pub boot_mode: u8,
    pub slave_id_number: u8,
    pub joybus_mode_entry_point: [u8; 4],
}

impl CartridgeHeader {
    /// Parses the header from the first 192 bytes of the ROM.
    ///
    /// # Errors
    ///
    /// Fails when the ROM is shorter than one header.
    pub fn new(data: &[u8]) -> Result<Self, String> {
        if data.len() < 0xC0 {
            return Err(format!(
                "ROM too small to contain a cartridge header: {} bytes",
                data.len()
            ));
        }

        // The multiboot sub-header extends to 0x0E4; cartridges booted from
        // ROM are free to leave it out.
        let multiboot = |offset: usize| -> u8 { data.get(offset).copied().unwrap_or(0) };
        let multiboot4 = |offset: usize| -> [u8; 4] {
            [
                multiboot(offset),
                multiboot(offset + 1),
                multiboot(offset + 2),
                multiboot(offset + 3),
            ]
        };

        Ok(Self {
            rom_entry_point: data[0x000..=0x003].try_into().unwrap(),
            nintendo_logo: data[0x004..=0x09F].try_into().unwrap(),
            game_title: ascii_field(&data[0x0A0..=0x0AB]),
            game_code: ascii_field(&data[0x0AC..=0x0AF]),
            maker_code: ascii_field(&data[0x0B0..=0x0B1]),
            fixed_value: data[0x0B2],
            main_unit_code: data[0x0B3],
            device_type: data[0x0B4],
            software_version: data[0x0BC],
            complement_check: data[0x0BD],
            ram_entry_point: multiboot4(0x0C0),
            boot_mode: multiboot(0x0C4),
            slave_id_number: multiboot(0x0C5),
            joybus_mode_entry_point: multiboot4(0x0E0),
        })
    }
}

fn ascii_field(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rom_with_title(title: &[u8]) -> Vec<u8> {
        let mut rom = vec![0_u8; 0xC0];
        rom[0x0A0..0x0A0 + title.len()].copy_from_slice(title);
        rom[0x0B2] = 0x96;
        rom
    }

    #[test]
    fn parses_title_and_fixed_byte() {
        let rom = rom_with_title(b"METROID4USA");
        let header = CartridgeHeader::new(&rom).unwrap();

        assert_eq!(header.game_title, "METROID4USA");
        assert_eq!(header.fixed_value, 0x96);
    }

    #[test]
    fn rejects_truncated_rom() {
        assert!(CartridgeHeader::new(&[0_u8; 0x40]).is_err());
    }
}
