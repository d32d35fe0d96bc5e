//! EEPROM backup, accessed as a 1-bit serial stream.
//!
//! The chip comes in two capacities: 4 Kbit (6 address bits, 64 rows) and
//! 64 Kbit (14 address bits, 1024 rows); a row is 8 bytes. A transaction is
//! a 2-bit command, the address MSB-first, then either 64 data bits (write,
//! terminated by one dummy bit) or — after one dummy bit — 4 ignored bits
//! followed by the 64 data bits streamed back out MSB-first.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EepromSize {
    Eeprom4k,
    Eeprom64k,
}

impl EepromSize {
    const fn addr_bits(self) -> u32 {
        match self {
            Self::Eeprom4k => 6,
            Self::Eeprom64k => 14,
        }
    }

    const fn byte_size(self) -> usize {
        (1 << self.addr_bits()) * 8
    }
}

// State bitmask; several phases overlap (e.g. a write request is
// WRITE_MODE | GET_ADDRESS | WRITING | EAT_DUMMY with the stages peeled off
// as the transaction advances).
const ACCEPT_COMMAND: u8 = 1 << 0;
const READ_MODE: u8 = 1 << 1;
const WRITE_MODE: u8 = 1 << 2;
const GET_ADDRESS: u8 = 1 << 3;
const READING: u8 = 1 << 4;
const DUMMY_NIBBLE: u8 = 1 << 5;
const WRITING: u8 = 1 << 6;
const EAT_DUMMY: u8 = 1 << 7;

#[derive(Serialize, Deserialize)]
pub struct Eeprom {
    memory: Vec<u8>,
    size: EepromSize,
    state: u8,
    address: usize,
    serial_buffer: u64,
    transmitted_bits: u32,
}

impl Eeprom {
    #[must_use]
    pub fn new(size: EepromSize) -> Self {
        Self {
            memory: vec![0; size.byte_size()],
            size,
            state: ACCEPT_COMMAND,
            address: 0,
            serial_buffer: 0,
            transmitted_bits: 0,
        }
    }

    pub fn reset(&mut self) {
        self.address = 0;
        self.state = ACCEPT_COMMAND;
        self.reset_serial_buffer();
    }

    fn reset_serial_buffer(&mut self) {
        self.serial_buffer = 0;
        self.transmitted_bits = 0;
    }

    pub fn read8(&mut self, _address: u32) -> u8 {
        if self.state & READING == 0 {
            return 0;
        }

        if self.state & DUMMY_NIBBLE != 0 {
            // Four bits that are sent but carry no data.
            self.transmitted_bits += 1;
            if self.transmitted_bits == 4 {
                self.state &= !DUMMY_NIBBLE;
                self.reset_serial_buffer();
            }
            return 0;
        }

        let bit = self.transmitted_bits % 8;
        let index = (self.transmitted_bits / 8) as usize;
        let value = (self.memory[self.address + index] >> (7 - bit)) & 1;

        self.transmitted_bits += 1;
        if self.transmitted_bits == 64 {
            tracing::debug!("eeprom: completed read, accepting new commands");
            self.state = ACCEPT_COMMAND;
            self.reset_serial_buffer();
        }

        value
    }

    pub fn write8(&mut self, _address: u32, value: u8) {
        if self.state & READING != 0 {
            return;
        }

        let value = u64::from(value & 1);
        self.serial_buffer = (self.serial_buffer << 1) | value;
        self.transmitted_bits += 1;

        if self.state == ACCEPT_COMMAND && self.transmitted_bits == 2 {
            match self.serial_buffer {
                0b10 => {
                    self.state = WRITE_MODE | GET_ADDRESS | WRITING | EAT_DUMMY;
                }
                0b11 => {
                    self.state = READ_MODE | GET_ADDRESS | EAT_DUMMY;
                }
                _ => {
                    tracing::debug!("eeprom: unknown command {:#04b}", self.serial_buffer);
                }
            }
            self.reset_serial_buffer();
        } else if self.state & GET_ADDRESS != 0 {
            if self.transmitted_bits == self.size.addr_bits() {
                self.address = (self.serial_buffer as usize * 8) % self.memory.len();

                if self.state & WRITE_MODE != 0 {
                    self.memory[self.address..self.address + 8].fill(0);
                }

                self.state &= !GET_ADDRESS;
                self.reset_serial_buffer();
            }
        } else if self.state & WRITING != 0 {
            let bit = (self.transmitted_bits - 1) % 8;
            let index = ((self.transmitted_bits - 1) / 8) as usize;

            let cell = &mut self.memory[self.address + index];
            cell.set_bit(7 - bit as u8, value != 0);

            if self.transmitted_bits == 64 {
                self.state &= !WRITING;
                self.reset_serial_buffer();
            }
        } else if self.state & EAT_DUMMY != 0 {
            self.state &= !EAT_DUMMY;

            if self.state & READ_MODE != 0 {
                self.state |= READING | DUMMY_NIBBLE;
            } else if self.state & WRITE_MODE != 0 {
                self.state = ACCEPT_COMMAND;
            }

            self.reset_serial_buffer();
        }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.memory
    }

    pub fn load(&mut self, data: &[u8]) {
        if data.len() == self.memory.len() {
            self.memory.copy_from_slice(data);
        } else {
            tracing::warn!(
                "invalid EEPROM save size {} (expected {}), starting cleared",
                data.len(),
                self.memory.len()
            );
            self.memory.fill(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn clock_in(eeprom: &mut Eeprom, bits: &[u8]) {
        for &bit in bits {
            eeprom.write8(0, bit);
        }
    }

    fn address_bits(address: u64, count: u32) -> Vec<u8> {
        (0..count)
            .rev()
            .map(|i| ((address >> i) & 1) as u8)
            .collect()
    }

    fn write_row(eeprom: &mut Eeprom, address: u64, data: u64) {
        clock_in(eeprom, &[1, 0]);
        let bits = address_bits(address, 6);
        clock_in(eeprom, &bits);
        let data_bits = address_bits(data, 64);
        clock_in(eeprom, &data_bits);
        clock_in(eeprom, &[0]); // terminating dummy
    }

    fn read_row(eeprom: &mut Eeprom, address: u64) -> u64 {
        clock_in(eeprom, &[1, 1]);
        let bits = address_bits(address, 6);
        clock_in(eeprom, &bits);
        clock_in(eeprom, &[0]); // dummy before data comes back

        // 4 ignored bits, then 64 data bits MSB first.
        for _ in 0..4 {
            let _ = eeprom.read8(0);
        }
        let mut value = 0_u64;
        for _ in 0..64 {
            value = (value << 1) | u64::from(eeprom.read8(0));
        }
        value
    }

    #[test]
    fn write_then_read_roundtrip() {
        let mut eeprom = Eeprom::new(EepromSize::Eeprom4k);
        write_row(&mut eeprom, 0, 0xDEAD_BEEF_CAFE_BABE);
        assert_eq!(read_row(&mut eeprom, 0), 0xDEAD_BEEF_CAFE_BABE);
    }

    #[test]
    fn write_clears_previous_row_contents() {
        let mut eeprom = Eeprom::new(EepromSize::Eeprom4k);
        write_row(&mut eeprom, 3, u64::MAX);
        write_row(&mut eeprom, 3, 0x0123_4567_89AB_CDEF);
        assert_eq!(read_row(&mut eeprom, 3), 0x0123_4567_89AB_CDEF);
    }

    #[test]
    fn rows_are_independent() {
        let mut eeprom = Eeprom::new(EepromSize::Eeprom4k);
        write_row(&mut eeprom, 1, 0x1111_1111_1111_1111);
        write_row(&mut eeprom, 2, 0x2222_2222_2222_2222);
        assert_eq!(read_row(&mut eeprom, 1), 0x1111_1111_1111_1111);
        assert_eq!(read_row(&mut eeprom, 2), 0x2222_2222_2222_2222);
    }

    #[test]
    fn capacity_matches_address_width() {
        assert_eq!(Eeprom::new(EepromSize::Eeprom4k).data().len(), 512);
        assert_eq!(Eeprom::new(EepromSize::Eeprom64k).data().len(), 8192);
    }
}
