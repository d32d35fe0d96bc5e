//! Memory bus connecting the CPU and DMA to every hardware component.
//!
//! Region dispatch is by the top nibble of the address:
//!
//! | Page | Component                       | Notes                          |
//! |------|---------------------------------|--------------------------------|
//! | 0    | BIOS                            | open-bus guarded               |
//! | 2    | EWRAM (256 KiB)                 | mirrored                       |
//! | 3    | IWRAM (32 KiB)                  | mirrored                       |
//! | 4    | MMIO (1 KiB window)             | per-byte register decode       |
//! | 5    | Palette RAM (1 KiB)             | byte writes widen to halfwords |
//! | 6    | VRAM (96 KiB)                   | top 32 KiB mirrored            |
//! | 7    | OAM (1 KiB)                     | byte writes ignored            |
//! | 8-D  | Game Pak ROM                    | three waitstate profiles       |
//! | E    | Save backup                     | 8-bit bus                      |
//!
//! Every access carries an [`Access`] hint that selects the waitstate cost
//! charged against the cycle budget; the WAITCNT register rebuilds the cost
//! tables for the ROM and save regions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::hardware::apu::Apu;
use crate::cpu::hardware::dma::{Dma, FIFO_A_ADDRESS, FIFO_B_ADDRESS, Timing};
use crate::cpu::hardware::internal_memory::InternalMemory;
use crate::cpu::hardware::interrupt_control::{InterruptControl, IrqType};
use crate::cpu::hardware::keypad::Keypad;
use crate::cpu::hardware::lcd::{Lcd, Memory as LcdMemory};
use crate::cpu::hardware::timers::Timers;

/// Access-type hint, used solely for waitstate accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    NonSequential,
    Sequential,
    Dma,
    Internal,
}

impl Access {
    const fn table_index(self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::NonSequential | Self::Dma | Self::Internal => 0,
        }
    }
}

/// Non-sequential ROM/SRAM latencies selected by the 2-bit WAITCNT fields.
const WS_NONSEQ: [i32; 4] = [4, 3, 2, 8];
/// Sequential latencies per ROM region pair.
const WS_SEQ0: [i32; 2] = [2, 1];
const WS_SEQ1: [i32; 2] = [4, 1];
const WS_SEQ2: [i32; 2] = [8, 1];

#[derive(Serialize, Deserialize)]
pub struct Bus {
    pub internal_memory: InternalMemory,
    pub lcd: Lcd,
    pub apu: Apu,
    pub dma: Dma,
    pub timers: Timers,
    pub keypad: Keypad,
    pub interrupt_control: InterruptControl,

    /// Remaining cycle budget of the current run slice; every access
    /// subtracts its waitstate cost.
    pub cycles_left: i32,

    pub waitcnt: u16,
    /// Cost tables indexed by [sequential][page] for 8/16-bit and 32-bit
    /// accesses.
    cycles16: [[i32; 16]; 2],
    cycles32: [[i32; 16]; 2],

    /// Last opcode fetched from BIOS, fed back on protected reads.
    last_bios_opcode: u32,
    /// Current program counter, for the BIOS read guard.
    current_pc: u32,

    /// Fallthrough storage for unmapped I/O addresses.
    unused_region: HashMap<u32, u8>,
}

impl Default for Bus {
    fn default() -> Self {
        let mut bus = Self {
            internal_memory: InternalMemory::default(),
            lcd: Lcd::default(),
            apu: Apu::default(),
            dma: Dma::default(),
            timers: Timers::default(),
            keypad: Keypad::default(),
            interrupt_control: InterruptControl::default(),
            cycles_left: 0,
            waitcnt: 0,
            cycles16: [[1; 16]; 2],
            cycles32: [[1; 16]; 2],
            last_bios_opcode: 0,
            current_pc: 0,
            unused_region: HashMap::new(),
        };
        bus.recalculate_cycle_tables();
        bus
    }
}

impl Bus {
    pub fn request_interrupt(&mut self, irq: IrqType) {
        self.interrupt_control.request(irq);
    }

    /// Reinitializes registers and RAM. ROM, BIOS and the save image
    /// survive; buffers are reused, not reallocated.
    pub fn reset(&mut self) {
        self.internal_memory.reset();
        self.lcd.reset();
        self.apu.reset();
        self.dma = Dma::default();
        self.timers = Timers::default();
        self.keypad = Keypad::default();
        self.interrupt_control = InterruptControl::default();
        self.cycles_left = 0;
        self.waitcnt = 0;
        self.last_bios_opcode = 0;
        self.current_pc = 0;
        self.unused_region.clear();
        self.recalculate_cycle_tables();
    }

    pub const fn set_current_pc(&mut self, pc: u32) {
        self.current_pc = pc;
    }

    pub const fn set_last_bios_opcode(&mut self, opcode: u32) {
        self.last_bios_opcode = opcode;
    }

    // ------------------------------------------------------------------
    // Waitstate model
    // ------------------------------------------------------------------

    fn recalculate_cycle_tables(&mut self) {
        let sram = usize::from(self.waitcnt.get_bits(0..=1));
        let ws0_n = usize::from(self.waitcnt.get_bits(2..=3));
        let ws0_s = usize::from(self.waitcnt.get_bit(4));
        let ws1_n = usize::from(self.waitcnt.get_bits(5..=6));
        let ws1_s = usize::from(self.waitcnt.get_bit(7));
        let ws2_n = usize::from(self.waitcnt.get_bits(8..=9));
        let ws2_s = usize::from(self.waitcnt.get_bit(10));

        for seq in 0..2 {
            self.cycles16[seq] = [1; 16];
            self.cycles32[seq] = [1; 16];

            // EWRAM is on a 16-bit bus with fixed waits.
            self.cycles16[seq][0x2] = 3;
            self.cycles32[seq][0x2] = 6;

            // Palette RAM and VRAM are 16-bit.
            self.cycles32[seq][0x5] = 2;
            self.cycles32[seq][0x6] = 2;

            // The save bus charges its non-sequential latency for every
            // access width.
            self.cycles16[seq][0xE] = WS_NONSEQ[sram];
            self.cycles32[seq][0xE] = WS_NONSEQ[sram];
        }

        let rom_regions = [
            (0x8_usize, WS_NONSEQ[ws0_n], WS_SEQ0[ws0_s]),
            (0xA, WS_NONSEQ[ws1_n], WS_SEQ1[ws1_s]),
            (0xC, WS_NONSEQ[ws2_n], WS_SEQ2[ws2_s]),
        ];

        for (page, nonseq, seq) in rom_regions {
            for mirror in [page, page + 1] {
                self.cycles16[0][mirror] = 1 + nonseq;
                self.cycles16[1][mirror] = 1 + seq;
                // A 32-bit ROM access is one 16-bit access plus one
                // sequential follow-up.
                self.cycles32[0][mirror] = (1 + nonseq) + (1 + seq);
                self.cycles32[1][mirror] = 2 * (1 + seq);
            }
        }
    }

    fn charge16(&mut self, address: u32, access: Access) {
        let page = (address >> 24) as usize & 0xF;
        self.cycles_left -= self.cycles16[access.table_index()][page];
    }

    fn charge32(&mut self, address: u32, access: Access) {
        let page = (address >> 24) as usize & 0xF;
        self.cycles_left -= self.cycles32[access.table_index()][page];
    }

    // ------------------------------------------------------------------
    // CPU/DMA-facing access primitives
    // ------------------------------------------------------------------

    pub fn read_byte(&mut self, address: u32, access: Access) -> u8 {
        self.charge16(address, access);
        self.read_byte_raw(address)
    }

    pub fn read_half_word(&mut self, address: u32, access: Access) -> u16 {
        self.charge16(address, access);
        let address = address & !1;

        match address >> 24 {
            0x0 => {
                let opcode = self.read_bios_word(address & !3);
                (opcode >> ((address & 2) * 8)) as u16
            }
            0xE => u16::from(self.internal_memory.read_save(address)) * 0x0101,
            0x8..=0xD if (address & 0x01FF_FFFF) as usize >= self.internal_memory.rom.len() => {
                ((address >> 1) & 0xFFFF) as u16
            }
            _ => {
                u16::from_le_bytes([self.read_byte_raw(address), self.read_byte_raw(address + 1)])
            }
        }
    }

    pub fn read_word(&mut self, address: u32, access: Access) -> u32 {
        self.charge32(address, access);
        let address = address & !3;

        match address >> 24 {
            0x0 => self.read_bios_word(address),
            0xE => u32::from(self.internal_memory.read_save(address)) * 0x0101_0101,
            0x8..=0xD if (address & 0x01FF_FFFF) as usize >= self.internal_memory.rom.len() => {
                ((address >> 1) & 0xFFFF) | (((address + 2) >> 1) << 16)
            }
            _ => u32::from_le_bytes([
                self.read_byte_raw(address),
                self.read_byte_raw(address + 1),
                self.read_byte_raw(address + 2),
                self.read_byte_raw(address + 3),
            ]),
        }
    }

    pub fn write_byte(&mut self, address: u32, value: u8, access: Access) {
        self.charge16(address, access);

        match address >> 24 {
            // Palette and VRAM widen a byte write into both halves of the
            // addressed halfword.
            0x5 | 0x6 => {
                let aligned = address & !1;
                self.write_byte_raw(aligned, value);
                self.write_byte_raw(aligned + 1, value);
            }
            // OAM ignores byte writes entirely.
            0x7 => {
                tracing::debug!("OAM byte write ignored: {address:#010X}");
            }
            _ => self.write_byte_raw(address, value),
        }
    }

    pub fn write_half_word(&mut self, address: u32, value: u16, access: Access) {
        self.charge16(address, access);
        let address = address & !1;

        // The backup bus is 8 bits wide; a wider store clocks the chip
        // once with the low byte (a replicated clock would corrupt the
        // EEPROM serial stream).
        if address >> 24 == 0xE {
            self.internal_memory.write_save(address, value as u8);
            return;
        }

        self.write_byte_raw(address, value.get_byte(0));
        self.write_byte_raw(address + 1, value.get_byte(1));
    }

    pub fn write_word(&mut self, address: u32, value: u32, access: Access) {
        self.charge32(address, access);
        let address = address & !3;

        if address >> 24 == 0xE {
            self.internal_memory.write_save(address, value as u8);
            return;
        }

        self.write_byte_raw(address, value.get_byte(0));
        self.write_byte_raw(address + 1, value.get_byte(1));
        self.write_byte_raw(address + 2, value.get_byte(2));
        self.write_byte_raw(address + 3, value.get_byte(3));
    }

    // ------------------------------------------------------------------
    // Raw byte dispatch
    // ------------------------------------------------------------------

    fn read_bios_word(&mut self, address: u32) -> u32 {
        if address >= 0x4000 {
            return 0;
        }
        if self.current_pc >= 0x4000 {
            // Executing outside the BIOS: the bus serves the last fetched
            // BIOS opcode.
            return self.last_bios_opcode;
        }

        let address = address & !3;
        let opcode = u32::from_le_bytes([
            self.internal_memory.read_bios(address),
            self.internal_memory.read_bios(address + 1),
            self.internal_memory.read_bios(address + 2),
            self.internal_memory.read_bios(address + 3),
        ]);
        self.last_bios_opcode = opcode;
        opcode
    }

    pub fn read_byte_raw(&mut self, address: u32) -> u8 {
        match address >> 24 {
            0x0 => {
                if address < 0x4000 {
                    self.read_bios_word(address & !3).get_byte((address & 3) as u8)
                } else {
                    0
                }
            }
            0x2 => self.internal_memory.read_ewram(address),
            0x3 => self.internal_memory.read_iwram(address),
            0x4 => self.read_mmio(address),
            0x5 => self.lcd.memory.palette_ram[address as usize & 0x3FF],
            0x6 => self.lcd.memory.video_ram[LcdMemory::vram_offset(address)],
            0x7 => self.lcd.memory.obj_attributes[address as usize & 0x3FF],
            0x8..=0xD => self.internal_memory.read_rom(address),
            0xE => self.internal_memory.read_save(address),
            _ => {
                tracing::debug!("read on unused memory {address:#010X}");
                self.unused_region.get(&address).copied().unwrap_or(0)
            }
        }
    }

    pub fn write_byte_raw(&mut self, address: u32, value: u8) {
        match address >> 24 {
            // BIOS and ROM are read-only.
            0x0 | 0x8..=0xD => {
                tracing::debug!("ignored write to read-only region {address:#010X}");
            }
            0x2 => self.internal_memory.write_ewram(address, value),
            0x3 => self.internal_memory.write_iwram(address, value),
            0x4 => self.write_mmio(address, value),
            0x5 => self.lcd.memory.palette_ram[address as usize & 0x3FF] = value,
            0x6 => self.lcd.memory.video_ram[LcdMemory::vram_offset(address)] = value,
            0x7 => self.lcd.memory.obj_attributes[address as usize & 0x3FF] = value,
            0xE => self.internal_memory.write_save(address, value),
            _ => {
                tracing::debug!("write on unused memory {address:#010X}");
                self.unused_region.insert(address, value);
            }
        }
    }

    // ------------------------------------------------------------------
    // MMIO decode
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn read_mmio(&mut self, address: u32) -> u8 {
        let lcd = &self.lcd.registers;
        let apu = &self.apu;

        match address {
            // LCD
            0x0400_0000 => lcd.dispcnt.get_byte(0),
            0x0400_0001 => lcd.dispcnt.get_byte(1),
            0x0400_0002 => lcd.green_swap.get_byte(0),
            0x0400_0003 => lcd.green_swap.get_byte(1),
            0x0400_0004 => lcd.dispstat.get_byte(0),
            0x0400_0005 => lcd.dispstat.get_byte(1),
            0x0400_0006 => lcd.vcount.get_byte(0),
            0x0400_0007 => lcd.vcount.get_byte(1),
            0x0400_0008..=0x0400_000F => {
                let id = (address as usize - 0x0400_0008) / 2;
                lcd.bgcnt[id].get_byte((address & 1) as u8)
            }
            0x0400_0048 => lcd.winin.get_byte(0),
            0x0400_0049 => lcd.winin.get_byte(1),
            0x0400_004A => lcd.winout.get_byte(0),
            0x0400_004B => lcd.winout.get_byte(1),
            0x0400_0050 => lcd.bldcnt.get_byte(0),
            0x0400_0051 => lcd.bldcnt.get_byte(1),
            0x0400_0052 => lcd.bldalpha.get_byte(0),
            0x0400_0053 => lcd.bldalpha.get_byte(1),

            // Sound
            0x0400_0060 => apu.tone[0].sweep.get_byte(0),
            0x0400_0061 => apu.tone[0].sweep.get_byte(1),
            0x0400_0062 => apu.tone[0].duty_length_envelope.get_byte(0),
            0x0400_0063 => apu.tone[0].duty_length_envelope.get_byte(1),
            0x0400_0064 => apu.tone[0].frequency_control.get_byte(0),
            0x0400_0065 => apu.tone[0].frequency_control.get_byte(1),
            0x0400_0068 => apu.tone[1].duty_length_envelope.get_byte(0),
            0x0400_0069 => apu.tone[1].duty_length_envelope.get_byte(1),
            0x0400_006C => apu.tone[1].frequency_control.get_byte(0),
            0x0400_006D => apu.tone[1].frequency_control.get_byte(1),
            0x0400_0070 => apu.wave.control.get_byte(0),
            0x0400_0071 => apu.wave.control.get_byte(1),
            0x0400_0072 => apu.wave.length_volume.get_byte(0),
            0x0400_0073 => apu.wave.length_volume.get_byte(1),
            0x0400_0074 => apu.wave.frequency_control.get_byte(0),
            0x0400_0075 => apu.wave.frequency_control.get_byte(1),
            0x0400_0078 => apu.noise.length_envelope.get_byte(0),
            0x0400_0079 => apu.noise.length_envelope.get_byte(1),
            0x0400_007C => apu.noise.frequency_control.get_byte(0),
            0x0400_007D => apu.noise.frequency_control.get_byte(1),
            0x0400_0080 => apu.control_psg.get_byte(0),
            0x0400_0081 => apu.control_psg.get_byte(1),
            0x0400_0082 => apu.control_mix.get_byte(0),
            0x0400_0083 => apu.control_mix.get_byte(1),
            0x0400_0084 => apu.control_master.get_byte(0),
            0x0400_0085 => apu.control_master.get_byte(1),
            0x0400_0088 => apu.soundbias.get_byte(0),
            0x0400_0089 => apu.soundbias.get_byte(1),
            0x0400_0090..=0x0400_009F => apu.read_wave_ram(address as usize - 0x0400_0090),
            0x0400_00A0..=0x0400_00A7 => {
                tracing::debug!("FIFO read {address:#010X}");
                0
            }

            // DMA: only the control halfwords read back.
            0x0400_00B0..=0x0400_00DF => {
                let offset = (address as usize - 0x0400_00B0) % 12;
                let id = (address as usize - 0x0400_00B0) / 12;
                match offset {
                    10 => self.dma.channels[id].control.get_byte(0),
                    11 => self.dma.channels[id].control.get_byte(1),
                    _ => 0,
                }
            }

            // Timers
            0x0400_0100..=0x0400_010F => {
                let id = (address as usize - 0x0400_0100) / 4;
                match address & 0b11 {
                    0 => self.timers.read_counter(id).get_byte(0),
                    1 => self.timers.read_counter(id).get_byte(1),
                    2 => self.timers.timers[id].control.get_byte(0),
                    _ => self.timers.timers[id].control.get_byte(1),
                }
            }

            // Keypad
            0x0400_0130 => self.keypad.key_input.get_byte(0),
            0x0400_0131 => self.keypad.key_input.get_byte(1),
            0x0400_0132 => self.keypad.key_interrupt_control.get_byte(0),
            0x0400_0133 => self.keypad.key_interrupt_control.get_byte(1),

            // Interrupt / system control
            0x0400_0200 => self.interrupt_control.interrupt_enable.get_byte(0),
            0x0400_0201 => self.interrupt_control.interrupt_enable.get_byte(1),
            0x0400_0202 => self.interrupt_control.interrupt_request.get_byte(0),
            0x0400_0203 => self.interrupt_control.interrupt_request.get_byte(1),
            0x0400_0204 => self.waitcnt.get_byte(0),
            0x0400_0205 => self.waitcnt.get_byte(1),
            0x0400_0208 => self.interrupt_control.interrupt_master_enable.get_byte(0),
            0x0400_0209 => self.interrupt_control.interrupt_master_enable.get_byte(1),
            0x0400_0300 => self.interrupt_control.post_boot_flag,

            _ => {
                tracing::debug!("read on unhandled I/O address {address:#010X}");
                self.unused_region.get(&address).copied().unwrap_or(0)
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn write_mmio(&mut self, address: u32, value: u8) {
        let lcd = &mut self.lcd.registers;

        match address {
            // LCD
            0x0400_0000 => lcd.dispcnt.set_byte(0, value),
            0x0400_0001 => lcd.dispcnt.set_byte(1, value),
            0x0400_0002 => lcd.green_swap.set_byte(0, value),
            0x0400_0003 => lcd.green_swap.set_byte(1, value),
            0x0400_0004 => {
                // Bits 0-2 are hardware status.
                let status = lcd.dispstat & 0b111;
                lcd.dispstat.set_byte(0, value);
                lcd.dispstat = (lcd.dispstat & !0b111) | status;
            }
            0x0400_0005 => lcd.dispstat.set_byte(1, value),
            // VCOUNT is read-only.
            0x0400_0006 | 0x0400_0007 => {
                tracing::debug!("ignored VCOUNT write");
            }
            0x0400_0008..=0x0400_000F => {
                let id = (address as usize - 0x0400_0008) / 2;
                lcd.bgcnt[id].set_byte((address & 1) as u8, value);
            }
            0x0400_0010..=0x0400_001F => {
                let id = (address as usize - 0x0400_0010) / 4;
                let register = if address & 0b10 == 0 {
                    &mut lcd.bghofs[id]
                } else {
                    &mut lcd.bgvofs[id]
                };
                register.set_byte((address & 1) as u8, value);
            }
            0x0400_0020..=0x0400_0027 | 0x0400_0030..=0x0400_0037 => {
                let affine = usize::from(address >= 0x0400_0030);
                let base = 0x0400_0020 + affine as u32 * 0x10;
                let register = match (address - base) / 2 {
                    0 => &mut lcd.bgpa[affine],
                    1 => &mut lcd.bgpb[affine],
                    2 => &mut lcd.bgpc[affine],
                    _ => &mut lcd.bgpd[affine],
                };
                register.set_byte((address & 1) as u8, value);
            }
            0x0400_0028..=0x0400_002F | 0x0400_0038..=0x0400_003F => {
                let affine = usize::from(address >= 0x0400_0038);
                let base = 0x0400_0028 + affine as u32 * 0x10;
                let point = if (address - base) < 4 {
                    &mut lcd.bgx[affine]
                } else {
                    &mut lcd.bgy[affine]
                };
                point.write_byte((address & 0b11) as u8, value);
            }
            0x0400_0040 => lcd.winh[0].set_byte(0, value),
            0x0400_0041 => lcd.winh[0].set_byte(1, value),
            0x0400_0042 => lcd.winh[1].set_byte(0, value),
            0x0400_0043 => lcd.winh[1].set_byte(1, value),
            0x0400_0044 => lcd.winv[0].set_byte(0, value),
            0x0400_0045 => lcd.winv[0].set_byte(1, value),
            0x0400_0046 => lcd.winv[1].set_byte(0, value),
            0x0400_0047 => lcd.winv[1].set_byte(1, value),
            0x0400_0048 => lcd.winin.set_byte(0, value),
            0x0400_0049 => lcd.winin.set_byte(1, value),
            0x0400_004A => lcd.winout.set_byte(0, value),
            0x0400_004B => lcd.winout.set_byte(1, value),
            0x0400_004C => lcd.mosaic.set_byte(0, value),
            0x0400_004D => lcd.mosaic.set_byte(1, value),
            0x0400_0050 => lcd.bldcnt.set_byte(0, value),
            0x0400_0051 => lcd.bldcnt.set_byte(1, value),
            0x0400_0052 => lcd.bldalpha.set_byte(0, value),
            0x0400_0053 => lcd.bldalpha.set_byte(1, value),
            0x0400_0054 => lcd.bldy.set_byte(0, value),
            0x0400_0055 => lcd.bldy.set_byte(1, value),

            // Sound
            0x0400_0060 => self.apu.tone[0].sweep.set_byte(0, value),
            0x0400_0061 => self.apu.tone[0].sweep.set_byte(1, value),
            0x0400_0062 => self.apu.tone[0].duty_length_envelope.set_byte(0, value),
            0x0400_0063 => self.apu.tone[0].duty_length_envelope.set_byte(1, value),
            0x0400_0064 => self.apu.tone[0].frequency_control.set_byte(0, value),
            0x0400_0065 => self.apu.write_tone_control_high(0, value),
            0x0400_0068 => self.apu.tone[1].duty_length_envelope.set_byte(0, value),
            0x0400_0069 => self.apu.tone[1].duty_length_envelope.set_byte(1, value),
            0x0400_006C => self.apu.tone[1].frequency_control.set_byte(0, value),
            0x0400_006D => self.apu.write_tone_control_high(1, value),
            0x0400_0070 => self.apu.wave.control.set_byte(0, value),
            0x0400_0071 => self.apu.wave.control.set_byte(1, value),
            0x0400_0072 => self.apu.wave.length_volume.set_byte(0, value),
            0x0400_0073 => self.apu.wave.length_volume.set_byte(1, value),
            0x0400_0074 => self.apu.wave.frequency_control.set_byte(0, value),
            0x0400_0075 => self.apu.write_wave_control_high(value),
            0x0400_0078 => self.apu.noise.length_envelope.set_byte(0, value),
            0x0400_0079 => self.apu.noise.length_envelope.set_byte(1, value),
            0x0400_007C => self.apu.noise.frequency_control.set_byte(0, value),
            0x0400_007D => self.apu.write_noise_control_high(value),
            0x0400_0080 => self.apu.control_psg.set_byte(0, value),
            0x0400_0081 => self.apu.control_psg.set_byte(1, value),
            0x0400_0082 => self.apu.control_mix.set_byte(0, value),
            0x0400_0083 => self.apu.write_control_mix_high(value),
            0x0400_0084 => self.apu.control_master.set_byte(0, value),
            0x0400_0085 => self.apu.control_master.set_byte(1, value),
            0x0400_0088 => self.apu.soundbias.set_byte(0, value),
            0x0400_0089 => self.apu.soundbias.set_byte(1, value),
            0x0400_0090..=0x0400_009F => {
                self.apu
                    .write_wave_ram(address as usize - 0x0400_0090, value);
            }
            0x0400_00A0..=0x0400_00A3 => self.apu.enqueue_fifo(0, value),
            0x0400_00A4..=0x0400_00A7 => self.apu.enqueue_fifo(1, value),

            // DMA
            0x0400_00B0..=0x0400_00DF => {
                let offset = (address as usize - 0x0400_00B0) % 12;
                let id = (address as usize - 0x0400_00B0) / 12;
                let channel = &mut self.dma.channels[id];
                match offset {
                    0..=3 => channel.source.set_byte(offset as u8, value),
                    4..=7 => channel.destination.set_byte(offset as u8 - 4, value),
                    8 => channel.length.set_byte(0, value),
                    9 => channel.length.set_byte(1, value),
                    10 => channel.control.set_byte(0, value),
                    _ => self.dma.write_control_high(id, value),
                }
            }

            // Timers
            0x0400_0100..=0x0400_010F => {
                let id = (address as usize - 0x0400_0100) / 4;
                match address & 0b11 {
                    0 => {
                        let mut reload = self.timers.timers[id].reload;
                        reload.set_byte(0, value);
                        self.timers.write_reload(id, reload);
                    }
                    1 => {
                        let mut reload = self.timers.timers[id].reload;
                        reload.set_byte(1, value);
                        self.timers.write_reload(id, reload);
                    }
                    2 => {
                        let mut control = self.timers.timers[id].control;
                        control.set_byte(0, value);
                        self.timers.write_control(id, control);
                    }
                    _ => {
                        let mut control = self.timers.timers[id].control;
                        control.set_byte(1, value);
                        self.timers.write_control(id, control);
                    }
                }
            }

            // Keypad. KEYINPUT should be read-only but the BIOS writes it.
            0x0400_0130 => self.keypad.key_input.set_byte(0, value),
            0x0400_0131 => self.keypad.key_input.set_byte(1, value),
            0x0400_0132 => self.keypad.key_interrupt_control.set_byte(0, value),
            0x0400_0133 => self.keypad.key_interrupt_control.set_byte(1, value),

            // Interrupt / system control
            0x0400_0200 => self.interrupt_control.interrupt_enable.set_byte(0, value),
            0x0400_0201 => self.interrupt_control.interrupt_enable.set_byte(1, value),
            0x0400_0202 => self.interrupt_control.acknowledge_low(value),
            0x0400_0203 => self.interrupt_control.acknowledge_high(value),
            0x0400_0204 => {
                self.waitcnt.set_byte(0, value);
                self.recalculate_cycle_tables();
            }
            0x0400_0205 => {
                self.waitcnt.set_byte(1, value);
                self.recalculate_cycle_tables();
            }
            0x0400_0208 => {
                self.interrupt_control
                    .interrupt_master_enable
                    .set_byte(0, value);
            }
            0x0400_0209 => {
                self.interrupt_control
                    .interrupt_master_enable
                    .set_byte(1, value);
            }
            0x0400_0300 => self.interrupt_control.post_boot_flag = value,
            0x0400_0301 => self.interrupt_control.write_haltcnt(value),

            _ => {
                tracing::debug!("write on unhandled I/O address {address:#010X}");
                self.unused_region.insert(address, value);
            }
        }
    }

    // ------------------------------------------------------------------
    // DMA execution
    // ------------------------------------------------------------------

    /// Drains the highest-priority pending DMA channel until it completes,
    /// the cycle budget runs out, or a higher-priority channel pre-empts it.
    pub fn run_dma(&mut self) {
        let id = self.dma.current;
        let channel = self.dma.channels[id];

        if channel.is_fifo(id) {
            self.run_fifo_dma(id);
            return;
        }

        let unit = channel.unit_bytes();
        let source_modify = channel.source_control().modify(unit);
        let destination_modify = channel.destination_control().modify(unit);

        while self.dma.channels[id].internal.length != 0 {
            // The DMA shares the CPU clock; yield when the budget runs out.
            if self.cycles_left <= 0 {
                return;
            }
            // A higher-priority channel was scheduled mid-transfer; the
            // current unit finished, hand over.
            if self.dma.loop_exit {
                self.dma.loop_exit = false;
                return;
            }

            let source = self.dma.channels[id].internal.source;
            let destination = self.dma.channels[id].internal.destination;

            if unit == 4 {
                let value = self.read_word(source, Access::Dma);
                self.write_word(destination, value, Access::Dma);
            } else {
                let value = self.read_half_word(source, Access::Dma);
                self.write_half_word(destination, value, Access::Dma);
            }

            let shadow = &mut self.dma.channels[id].internal;
            shadow.source = shadow.source.wrapping_add_signed(source_modify);
            shadow.destination = shadow.destination.wrapping_add_signed(destination_modify);
            shadow.length -= 1;
        }

        if channel.irq_enabled() {
            self.request_interrupt(IrqType::dma(id));
        }

        if channel.repeat() {
            self.dma.channels[id].reload(id);
            if channel.timing() == Timing::Immediate {
                // An immediate repeating channel re-runs until disabled.
                self.dma.select_next();
            } else {
                // Stays enabled, waits for the next trigger.
                self.dma.retire(id);
            }
        } else {
            self.dma.channels[id].set_enabled(false);
            self.dma.retire(id);
        }
    }

    /// FIFO feed: four words per outstanding request to the fixed FIFO
    /// address; the destination never advances and the public length is
    /// untouched.
    fn run_fifo_dma(&mut self, id: usize) {
        while self.dma.channels[id].internal.fifo_requests != 0 {
            if self.cycles_left <= 0 {
                return;
            }
            if self.dma.loop_exit {
                self.dma.loop_exit = false;
                return;
            }

            let destination = self.dma.channels[id].internal.destination;
            for _ in 0..4 {
                let source = self.dma.channels[id].internal.source;
                let value = self.read_word(source, Access::Dma);
                self.write_word(destination, value, Access::Dma);
                self.dma.channels[id].internal.source = source.wrapping_add(4);
            }

            self.dma.channels[id].internal.fifo_requests -= 1;

            if self.dma.channels[id].irq_enabled() {
                self.request_interrupt(IrqType::dma(id));
            }
        }

        self.dma.retire(id);
    }

    // ------------------------------------------------------------------
    // Timer stepping with APU/DMA side effects
    // ------------------------------------------------------------------

    /// Advances the timers, raising overflow IRQs and clocking the APU
    /// FIFOs (which in turn may schedule a FIFO DMA refill).
    pub fn step_timers(&mut self, cycles: u32) {
        let result = self.timers.step(cycles);

        for id in 0..4 {
            let overflows = result.overflows[id];
            if overflows == 0 {
                continue;
            }

            if self.timers.timers[id].irq_enabled() {
                self.request_interrupt(IrqType::timer(id));
            }

            if id < 2 && self.apu.master_enabled() {
                for fifo in 0..2 {
                    if self.apu.fifo_timer(fifo) != id {
                        continue;
                    }

                    let fifo_address = if fifo == 0 {
                        FIFO_A_ADDRESS
                    } else {
                        FIFO_B_ADDRESS
                    };

                    for _ in 0..overflows {
                        self.apu.advance_fifo(fifo);
                        if self.apu.fifo_needs_data(fifo) {
                            self.dma.trigger_fifo(fifo_address);
                        }
                    }
                }
            }
        }
    }
}
