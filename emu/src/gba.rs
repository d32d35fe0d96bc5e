//! The Game Boy Advance system value.
//!
//! [`Gba`] ties the ARM7TDMI (which owns the bus and every peripheral) to
//! the frame scheduler. A frame is 228 scanlines of 1232 cycles:
//!
//! ```text
//! per visible line (160x):           per VBlank line (68x):
//!   render scanline                    run 1232 CPU cycles
//!   run 960 CPU cycles                 advance VCOUNT
//!   HBlank events + HBlank DMA         step APU
//!   run 272 CPU cycles
//!   advance VCOUNT, step APU
//! ```
//!
//! `run_internal` hands the cycle budget to, in priority order: a pending
//! DMA channel, the halted-CPU fast path, or the CPU (which takes the IRQ
//! vector itself when one is pending and unmasked). Timers consume exactly
//! the cycles the winner spent.
//!
//! The system is a plain value: several instances can coexist, which the
//! tests use liberally.

use crate::bus::Bus;
use crate::cartridge::header::CartridgeHeader;
use crate::cartridge::{Cartridge, SaveTypeHint};
use crate::cpu::arm7tdmi::Arm7tdmi;
use crate::cpu::hardware::apu::{Apu, AudioRing};
use crate::cpu::hardware::interrupt_control::{HaltState, IrqType};
use crate::cpu::hardware::keypad::Key;
use crate::cpu::hardware::lcd::{LCD_HEIGHT, LCD_WIDTH, LcdEvent};

use std::sync::{Arc, Mutex};

/// CPU clock in Hz.
pub const CPU_CLOCK: u32 = 16_780_000;

/// CPU cycles per frame: 228 lines of 1232 cycles.
pub const CYCLES_PER_FRAME: u32 = TOTAL_LINES * CYCLES_PER_LINE;

const VISIBLE_LINES: u32 = LCD_HEIGHT as u32;
const VBLANK_LINES: u32 = 68;
const TOTAL_LINES: u32 = VISIBLE_LINES + VBLANK_LINES;

const CYCLES_ACTIVE: u32 = 960;
const CYCLES_HBLANK: u32 = 272;
const CYCLES_PER_LINE: u32 = CYCLES_ACTIVE + CYCLES_HBLANK;

/// Construction-time configuration.
pub struct GbaConfig {
    /// Execute the BIOS image instead of the high-level SWI table.
    pub use_bios: bool,
    /// BIOS image, host-loaded; at most 16 KiB.
    pub bios: Option<Vec<u8>>,
    /// Frames emulated per `run_frame` call.
    pub fast_forward_multiplier: u32,
    /// Host audio sample rate in Hz.
    pub sample_rate: u32,
    /// Host audio buffer size in frames (consumed by the host callback).
    pub audio_buffer_size: usize,
}

impl Default for GbaConfig {
    fn default() -> Self {
        Self {
            use_bios: false,
            bios: None,
            fast_forward_multiplier: 1,
            sample_rate: 44_100,
            audio_buffer_size: 1024,
        }
    }
}

pub struct Gba {
    pub cpu: Arm7tdmi,

    /// Parsed header of the loaded cartridge.
    pub cartridge_header: Option<CartridgeHeader>,

    config: GbaConfig,
    audio_ring: Arc<Mutex<AudioRing>>,
}

impl Gba {
    /// Builds a system from the configuration.
    ///
    /// # Errors
    ///
    /// Fails when `use_bios` is set without a BIOS image, or the image
    /// exceeds 16 KiB.
    pub fn new(config: GbaConfig) -> Result<Self, String> {
        let mut bus = Bus::default();
        bus.apu.set_sample_rate(config.sample_rate);

        if config.use_bios {
            let bios = config
                .bios
                .as_ref()
                .ok_or_else(|| "use_bios set but no BIOS image provided".to_string())?;
            bus.internal_memory.load_bios(bios)?;
        }

        let audio_ring = bus.apu.ring_handle();
        let mut cpu = Arm7tdmi::new(bus);
        cpu.swi_hle = !config.use_bios;

        let mut gba = Self {
            cpu,
            cartridge_header: None,
            config,
            audio_ring,
        };
        gba.boot();

        Ok(gba)
    }

    /// Replaces the cartridge (ROM and save backup) and resets the system.
    ///
    /// # Errors
    ///
    /// Fails when the ROM has no parseable header.
    pub fn load_cartridge(&mut self, rom: Vec<u8>, hint: SaveTypeHint) -> Result<(), String> {
        let cartridge = Cartridge::new(rom, hint)?;

        self.cartridge_header = Some(cartridge.header);
        self.cpu.bus.internal_memory.rom = cartridge.rom;
        self.cpu.bus.internal_memory.backup = Some(cartridge.backup);

        self.reset();
        Ok(())
    }

    /// Reinitializes CPU and hardware state. The loaded ROM, BIOS and save
    /// image survive.
    pub fn reset(&mut self) {
        self.cpu.bus.reset();
        self.cpu.bus.apu.set_sample_rate(self.config.sample_rate);

        let bus = std::mem::take(&mut self.cpu.bus);
        self.cpu = Arm7tdmi::new(bus);
        self.cpu.swi_hle = !self.config.use_bios;

        self.boot();
    }

    fn boot(&mut self) {
        if self.config.use_bios {
            // Cold boot through the BIOS reset vector; the pipeline fills
            // from address 0 on the first steps.
            self.cpu.registers.set_program_counter(0);
            self.cpu.flush_pipeline();
        } else {
            self.cpu.skip_bios_boot();
        }
    }

    /// Emulates one video frame (times the fast-forward multiplier).
    pub fn run_frame(&mut self) {
        let frames = self.config.fast_forward_multiplier.max(1);

        for _ in 0..frames {
            for _ in 0..VISIBLE_LINES {
                self.cpu.bus.lcd.scanline();
                self.run_internal(CYCLES_ACTIVE);

                let event = self.cpu.bus.lcd.hblank();
                self.apply_lcd_event(&event);
                self.cpu.bus.dma.trigger_hblank();
                self.run_internal(CYCLES_HBLANK);

                let event = self.cpu.bus.lcd.next_line();
                self.apply_lcd_event(&event);
                self.cpu.bus.apu.step(CYCLES_PER_LINE);
            }

            let event = self.cpu.bus.lcd.vblank();
            self.apply_lcd_event(&event);
            self.cpu.bus.dma.trigger_vblank();

            for _ in 0..VBLANK_LINES {
                self.run_internal(CYCLES_PER_LINE);

                let event = self.cpu.bus.lcd.next_line();
                self.apply_lcd_event(&event);
                self.cpu.bus.apu.step(CYCLES_PER_LINE);
            }
        }
    }

    fn apply_lcd_event(&mut self, event: &LcdEvent) {
        if event.request_vblank_irq {
            self.cpu.bus.request_interrupt(IrqType::VBlank);
        }
        if event.request_hblank_irq {
            self.cpu.bus.request_interrupt(IrqType::HBlank);
        }
        if event.request_vcount_irq {
            self.cpu.bus.request_interrupt(IrqType::VCount);
        }
    }

    /// Runs the CPU/DMA for a cycle budget, stepping the timers by exactly
    /// the cycles consumed.
    fn run_internal(&mut self, cycles: u32) {
        self.cpu.bus.cycles_left += cycles as i32;

        while self.cpu.bus.cycles_left > 0 {
            let halt_state = self.cpu.bus.interrupt_control.halt_state;

            // HALT resumes on any enabled, requested interrupt, masked or
            // not. STOP only resumes through the keypad (see set_key).
            if halt_state == HaltState::Halt
                && self.cpu.bus.interrupt_control.requested_and_enabled()
            {
                self.cpu.bus.interrupt_control.halt_state = HaltState::Run;
            }

            let previous = self.cpu.bus.cycles_left;

            if self.cpu.bus.dma.running != 0 {
                self.cpu.bus.run_dma();
            } else if self.cpu.bus.interrupt_control.halt_state == HaltState::Run {
                self.cpu.step();
            } else {
                // Halted: burn the remaining budget through the timers
                // (which keep running and may raise the wake-up IRQ).
                let remaining = self.cpu.bus.cycles_left;
                if halt_state == HaltState::Halt {
                    self.cpu.bus.step_timers(remaining as u32);
                }
                self.cpu.bus.cycles_left = 0;
                return;
            }

            let consumed = previous - self.cpu.bus.cycles_left;
            if consumed > 0 {
                self.cpu.bus.step_timers(consumed as u32);
            }
        }
    }

    /// Updates one key. Wakes a stopped system and evaluates the KEYCNT
    /// interrupt condition.
    pub fn set_key(&mut self, key: Key, pressed: bool) {
        self.cpu.bus.keypad.set_key(key, pressed);

        if pressed && self.cpu.bus.interrupt_control.halt_state == HaltState::Stop {
            self.cpu.bus.interrupt_control.halt_state = HaltState::Run;
        }

        if self.cpu.bus.keypad.interrupt_requested() {
            self.cpu.bus.request_interrupt(IrqType::Keypad);
        }
    }

    /// Host audio callback: fills `out` with interleaved stereo samples.
    /// Safe to call from another thread.
    pub fn fill_audio_buffer(&self, out: &mut [i16]) {
        Apu::fill_audio_buffer(&self.audio_ring, out);
    }

    /// The 240x160 ARGB32 framebuffer produced by the last frame.
    #[must_use]
    pub fn framebuffer(&self) -> &[u32; LCD_WIDTH * LCD_HEIGHT] {
        &self.cpu.bus.lcd.framebuffer
    }

    /// Raw save image for the host to persist, if a cartridge with backup
    /// hardware is loaded.
    #[must_use]
    pub fn backup_data(&self) -> Option<Vec<u8>> {
        self.cpu
            .bus
            .internal_memory
            .backup
            .as_ref()
            .map(crate::cartridge::backup::Backup::data)
    }

    /// Installs a previously persisted save image.
    pub fn load_backup_data(&mut self, data: &[u8]) {
        if let Some(backup) = &mut self.cpu.bus.internal_memory.backup {
            backup.load(data);
        } else {
            tracing::warn!("no backup hardware present, save image ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Access;
    use pretty_assertions::assert_eq;

    fn rom_with_idle_loop() -> Vec<u8> {
        // b $+8 at the entrypoint, then an infinite self-branch.
        let mut rom = vec![0_u8; 0x100];
        rom[..4].copy_from_slice(&0xEA00_0000_u32.to_le_bytes());
        rom[8..12].copy_from_slice(&0xEAFF_FFFE_u32.to_le_bytes());
        rom
    }

    fn gba_with_rom(rom: Vec<u8>) -> Gba {
        // RUST_LOG=emu=debug surfaces the bus/backup traces while
        // debugging a failing test.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let mut gba = Gba::new(GbaConfig::default()).unwrap();
        gba.load_cartridge(rom, SaveTypeHint::Sram).unwrap();
        gba
    }

    #[test]
    fn boot_without_bios_runs_from_cartridge() {
        let mut gba = gba_with_rom(rom_with_idle_loop());
        gba.run_frame();

        // The idle loop keeps the PC inside its refill window.
        let pc = gba.cpu.registers.program_counter();
        assert!(
            (0x0800_0008..=0x0800_0010).contains(&pc),
            "PC outside idle loop: {pc:#010X}"
        );
    }

    #[test]
    fn construction_rejects_oversized_bios() {
        let config = GbaConfig {
            use_bios: true,
            bios: Some(vec![0; 0x4001]),
            ..Default::default()
        };
        assert!(Gba::new(config).is_err());

        let config = GbaConfig {
            use_bios: true,
            bios: None,
            ..Default::default()
        };
        assert!(Gba::new(config).is_err());
    }

    #[test]
    fn frame_advances_ppu_through_all_lines() {
        let mut gba = gba_with_rom(rom_with_idle_loop());
        gba.run_frame();

        // VCOUNT wrapped back to the top of the frame.
        assert_eq!(gba.cpu.bus.lcd.registers.vcount, 0);
        // VBlank IRQ was not enabled, so no request was latched.
        assert!(gba.cpu.bus.interrupt_control.interrupt_request & 1 == 0);
    }

    #[test]
    fn vblank_irq_requested_when_enabled() {
        let mut gba = gba_with_rom(rom_with_idle_loop());
        gba.cpu.bus.lcd.registers.dispstat |= 1 << 3;
        gba.run_frame();

        assert!(gba.cpu.bus.interrupt_control.interrupt_request & 1 != 0);
    }

    #[test]
    fn timer_cascade_counts_across_frame_budget() {
        let mut gba = gba_with_rom(rom_with_idle_loop());

        // Timer 0: prescaler 1, reload 0xFFFF (overflows every cycle).
        // Timer 1: cascade.
        gba.cpu
            .bus
            .write_half_word(0x0400_0100, 0xFFFF, Access::Internal);
        gba.cpu
            .bus
            .write_half_word(0x0400_0102, 1 << 7, Access::Internal);
        gba.cpu
            .bus
            .write_half_word(0x0400_0106, (1 << 7) | (1 << 2), Access::Internal);

        // Park the CPU so the timers see the exact frame budget (a running
        // CPU can overshoot its last instruction into the next slice).
        gba.cpu.bus.interrupt_control.halt_state = HaltState::Halt;

        // One frame is 280_896 cycles; timer 1 counts one tick per cycle.
        gba.run_frame();
        let counter = gba.cpu.bus.timers.read_counter(1);
        assert_eq!(u32::from(counter), CYCLES_PER_FRAME % 0x10000);
    }

    #[test]
    fn halt_resumes_on_enabled_interrupt() {
        let mut gba = gba_with_rom(rom_with_idle_loop());

        // Enable the timer 0 IRQ source but leave IME off: HALT must still
        // resume.
        gba.cpu.bus.interrupt_control.interrupt_enable = 1 << 3;
        gba.cpu
            .bus
            .write_half_word(0x0400_0100, 0xFFF0, Access::Internal);
        gba.cpu
            .bus
            .write_half_word(0x0400_0102, (1 << 7) | (1 << 6), Access::Internal);
        gba.cpu.bus.interrupt_control.halt_state = HaltState::Halt;

        gba.run_frame();

        assert_eq!(gba.cpu.bus.interrupt_control.halt_state, HaltState::Run);
        // The CPU kept running afterwards.
        let pc = gba.cpu.registers.program_counter();
        assert!((0x0800_0008..=0x0800_0010).contains(&pc));
    }

    #[test]
    fn stop_only_wakes_on_keypress() {
        let mut gba = gba_with_rom(rom_with_idle_loop());
        gba.cpu.bus.interrupt_control.halt_state = HaltState::Stop;

        gba.run_frame();
        assert_eq!(gba.cpu.bus.interrupt_control.halt_state, HaltState::Stop);

        gba.set_key(Key::Start, true);
        assert_eq!(gba.cpu.bus.interrupt_control.halt_state, HaltState::Run);
    }

    #[test]
    fn keypad_interrupt_on_configured_combination() {
        let mut gba = gba_with_rom(rom_with_idle_loop());
        gba.cpu.bus.keypad.key_interrupt_control = (1 << 14) | 0b0001; // IRQ on A

        gba.set_key(Key::B, true);
        assert!(gba.cpu.bus.interrupt_control.interrupt_request & (1 << 12) == 0);

        gba.set_key(Key::A, true);
        assert!(gba.cpu.bus.interrupt_control.interrupt_request & (1 << 12) != 0);
    }

    #[test]
    fn reset_preserves_rom_and_save() {
        let mut gba = gba_with_rom(rom_with_idle_loop());
        gba.cpu
            .bus
            .write_byte(0x0E00_0000, 0x5A, Access::Internal);
        gba.cpu
            .bus
            .write_word(0x0200_0000, 0x1234_5678, Access::Internal);

        gba.reset();

        // RAM cleared, save kept, execution restarts at the cartridge.
        assert_eq!(
            gba.cpu.bus.read_word(0x0200_0000, Access::Internal),
            0
        );
        assert_eq!(gba.cpu.bus.read_byte(0x0E00_0000, Access::Internal), 0x5A);
        assert_eq!(gba.cpu.registers.program_counter(), 0x0800_0000);
    }

    #[test]
    fn backup_roundtrip_through_host_interface() {
        let mut gba = gba_with_rom(rom_with_idle_loop());
        gba.cpu
            .bus
            .write_byte(0x0E00_0123, 0xAB, Access::Internal);

        let image = gba.backup_data().unwrap();
        assert_eq!(image.len(), 0x8000);
        assert_eq!(image[0x123], 0xAB);

        let mut restored = gba_with_rom(rom_with_idle_loop());
        restored.load_backup_data(&image);
        assert_eq!(
            restored.cpu.bus.read_byte(0x0E00_0123, Access::Internal),
            0xAB
        );
    }

    #[test]
    fn audio_samples_accumulate_over_a_frame() {
        let mut gba = gba_with_rom(rom_with_idle_loop());
        gba.run_frame();

        // A frame at 44.1 kHz produces ~735 sample pairs; draining a few
        // must not block or panic.
        let mut out = [1_i16; 64];
        gba.fill_audio_buffer(&mut out);
        // Sound disabled: silence at the recentered bias.
        assert!(out.iter().all(|&sample| sample == 0));
    }

    #[test]
    fn immediate_dma_runs_within_the_frame_loop() {
        let mut gba = gba_with_rom(rom_with_idle_loop());

        for i in 0..16_u32 {
            gba.cpu
                .bus
                .write_byte(0x0300_0000 + i, i as u8 + 1, Access::Internal);
        }

        gba.cpu
            .bus
            .write_word(0x0400_00D4, 0x0300_0000, Access::Internal);
        gba.cpu
            .bus
            .write_word(0x0400_00D8, 0x0200_0000, Access::Internal);
        gba.cpu
            .bus
            .write_half_word(0x0400_00DC, 4, Access::Internal);
        gba.cpu
            .bus
            .write_half_word(0x0400_00DE, (1 << 15) | (1 << 10), Access::Internal);

        gba.run_frame();

        for i in 0..16_u32 {
            assert_eq!(
                gba.cpu.bus.read_byte(0x0200_0000 + i, Access::Internal),
                i as u8 + 1
            );
        }
        assert!(!gba.cpu.bus.dma.channels[3].enabled());
    }
}
