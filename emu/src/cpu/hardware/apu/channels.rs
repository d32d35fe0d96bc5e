//! The four PSG generators inherited from the Game Boy.
//!
//! All channels run on integer cycle accumulators against the CPU clock:
//! envelopes step every `time/64 s`, the channel-1 sweep every `time/128 s`,
//! length counters mute after `(64 - n)/256 s` (`(256 - n)/256 s` for the
//! wave channel). Registers are stored raw and decoded through accessors,
//! with the handful of live values (current volume, swept frequency, LFSR)
//! kept alongside.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::gba::CPU_CLOCK;

const ENVELOPE_PERIOD: u32 = CPU_CLOCK / 64;
const SWEEP_PERIOD: u32 = CPU_CLOCK / 128;
const LENGTH_TICK: u32 = CPU_CLOCK / 256;

/// Volume envelope shared by the tone and noise channels.
#[derive(Default, Clone, Copy, Serialize, Deserialize)]
pub struct Envelope {
    pub volume: u8,
    cycles: u32,
}

impl Envelope {
    fn step(&mut self, cycles: u32, time: u32, increase: bool) {
        if time == 0 {
            return;
        }

        let period = time * ENVELOPE_PERIOD;
        self.cycles += cycles;

        while self.cycles >= period {
            if increase {
                if self.volume < 15 {
                    self.volume += 1;
                }
            } else if self.volume > 0 {
                self.volume -= 1;
            }
            self.cycles -= period;
        }
    }

    fn restart(&mut self, volume: u8) {
        self.volume = volume;
        self.cycles = 0;
    }
}

/// Square-wave channel (SOUND1/SOUND2); channel 1 carries the sweep unit.
#[derive(Default, Serialize, Deserialize)]
pub struct ToneChannel {
    /// SOUND1CNT_L (sweep); unused on channel 2.
    pub sweep: u16,
    /// SOUNDxCNT_H (duty/length/envelope).
    pub duty_length_envelope: u16,
    /// SOUNDxCNT_X (frequency/control).
    pub frequency_control: u16,

    pub envelope: Envelope,
    /// Current frequency, moved by the sweep unit.
    frequency: i32,
    phase_cycles: u32,
    sweep_cycles: u32,
    length_cycles: u32,
}

impl ToneChannel {
    fn sweep_time(&self) -> u32 {
        u32::from(self.sweep.get_bits(4..=6))
    }

    fn sweep_shift(&self) -> u32 {
        u32::from(self.sweep.get_bits(0..=2))
    }

    fn sweep_decrease(&self) -> bool {
        self.sweep.get_bit(3)
    }

    fn duty(&self) -> u16 {
        self.duty_length_envelope.get_bits(6..=7)
    }

    fn sound_length(&self) -> u32 {
        u32::from(self.duty_length_envelope.get_bits(0..=5))
    }

    fn envelope_time(&self) -> u32 {
        u32::from(self.duty_length_envelope.get_bits(8..=10))
    }

    fn envelope_increase(&self) -> bool {
        self.duty_length_envelope.get_bit(11)
    }

    fn initial_volume(&self) -> u8 {
        self.duty_length_envelope.get_bits(12..=15) as u8
    }

    fn length_enabled(&self) -> bool {
        self.frequency_control.get_bit(14)
    }

    /// Restarts the channel; called when the initial bit is written.
    pub fn restart(&mut self) {
        self.envelope.restart(self.initial_volume());
        self.frequency = i32::from(self.frequency_control.get_bits(0..=10));
        self.phase_cycles = 0;
        self.sweep_cycles = 0;
        self.length_cycles = 0;
    }

    pub fn step(&mut self, cycles: u32) {
        if self.sweep_time() != 0 {
            let period = self.sweep_time() * SWEEP_PERIOD;
            self.sweep_cycles += cycles;

            while self.sweep_cycles >= period {
                let shift = self.frequency >> self.sweep_shift();
                self.frequency += if self.sweep_decrease() { -shift } else { shift };
                self.frequency = self.frequency.clamp(0, 2047);
                self.sweep_cycles -= period;
            }
        }

        self.envelope
            .step(cycles, self.envelope_time(), self.envelope_increase());

        if self.length_enabled() {
            self.length_cycles = self.length_cycles.saturating_add(cycles);
        }

        self.phase_cycles = self.phase_cycles.wrapping_add(cycles);
    }

    /// Current output in the mixer's PSG range (about -128..=127).
    #[must_use]
    pub fn sample(&self) -> i32 {
        if self.length_enabled() && self.length_cycles >= (64 - self.sound_length()) * LENGTH_TICK {
            return 0;
        }

        let frequency_hz = 131_072 / (2048 - self.frequency.clamp(0, 2047) as u32);
        let period = (CPU_CLOCK / frequency_hz).max(1);

        // Duty cycles in eighths of a period: 12.5%, 25%, 50%, 75%.
        let duty_eighths = [1, 2, 4, 6][usize::from(self.duty())];
        let position = (self.phase_cycles % period) * 8 / period;

        let value = if u32::from(position) < duty_eighths {
            127
        } else {
            -128
        };

        value * i32::from(self.envelope.volume) / 16
    }
}

/// Wave channel (SOUND3): two banks of 32 4-bit samples.
#[derive(Default, Serialize, Deserialize)]
pub struct WaveChannel {
    /// SOUND3CNT_L (stop/wave RAM select).
    pub control: u16,
    /// SOUND3CNT_H (length/volume).
    pub length_volume: u16,
    /// SOUND3CNT_X (frequency/control).
    pub frequency_control: u16,
    /// Two 16-byte banks; CPU writes land in the bank not being played.
    pub wave_ram: [[u8; 16]; 2],

    sample_ptr: u32,
    sample_cycles: u32,
    length_cycles: u32,
}

impl WaveChannel {
    fn two_banks(&self) -> bool {
        self.control.get_bit(5)
    }

    #[must_use]
    pub fn bank(&self) -> usize {
        usize::from(self.control.get_bit(6))
    }

    fn playback(&self) -> bool {
        self.control.get_bit(7)
    }

    fn sound_length(&self) -> u32 {
        u32::from(self.length_volume.get_bits(0..=7))
    }

    /// Volume as a numerator over 4: mute, 100%, 50%, 25%.
    fn volume_quarters(&self) -> i32 {
        if self.length_volume.get_bit(15) {
            3 // forced 75%
        } else {
            [0, 4, 2, 1][usize::from(self.length_volume.get_bits(13..=14))]
        }
    }

    fn frequency(&self) -> u32 {
        u32::from(self.frequency_control.get_bits(0..=10))
    }

    fn length_enabled(&self) -> bool {
        self.frequency_control.get_bit(14)
    }

    pub fn restart(&mut self) {
        self.sample_ptr = 0;
        self.sample_cycles = 0;
        self.length_cycles = 0;
    }

    pub fn toggle_bank(&mut self) {
        let bank = self.bank() ^ 1;
        self.control.set_bit(6, bank != 0);
    }

    pub fn step(&mut self, cycles: u32) {
        // Samples advance at 2097152 / (2048 - frequency) Hz.
        let rate = 2_097_152 / (2048 - self.frequency());
        let period = (CPU_CLOCK / rate).max(1);

        self.sample_cycles += cycles;
        let advanced = self.sample_cycles / period;
        self.sample_cycles %= period;

        self.sample_ptr += advanced;
        if self.sample_ptr >= 32 {
            self.sample_ptr &= 0x1F;
            if self.two_banks() {
                self.toggle_bank();
            }
        }

        if self.length_enabled() {
            self.length_cycles = self.length_cycles.saturating_add(cycles);
        }
    }

    #[must_use]
    pub fn sample(&self) -> i32 {
        if !self.playback() {
            return 0;
        }
        if self.length_enabled() && self.length_cycles >= (256 - self.sound_length()) * LENGTH_TICK
        {
            return 0;
        }

        let byte = self.wave_ram[self.bank()][(self.sample_ptr >> 1) as usize];
        let nibble = if self.sample_ptr & 1 == 0 {
            byte >> 4
        } else {
            byte & 0xF
        };

        (i32::from(nibble) - 8) * 8 * self.volume_quarters() / 4
    }
}

/// Noise channel (SOUND4): 15- or 7-bit LFSR with taps at bits 0 and 1.
#[derive(Serialize, Deserialize)]
pub struct NoiseChannel {
    /// SOUND4CNT_L (length/envelope).
    pub length_envelope: u16,
    /// SOUND4CNT_H (frequency/control).
    pub frequency_control: u16,

    pub envelope: Envelope,
    shift_register: u16,
    output: bool,
    shift_cycles: u32,
    length_cycles: u32,
}

impl Default for NoiseChannel {
    fn default() -> Self {
        Self {
            length_envelope: 0,
            frequency_control: 0,
            envelope: Envelope::default(),
            shift_register: 0x7FFF,
            output: false,
            shift_cycles: 0,
            length_cycles: 0,
        }
    }
}

impl NoiseChannel {
    fn sound_length(&self) -> u32 {
        u32::from(self.length_envelope.get_bits(0..=5))
    }

    fn envelope_time(&self) -> u32 {
        u32::from(self.length_envelope.get_bits(8..=10))
    }

    fn envelope_increase(&self) -> bool {
        self.length_envelope.get_bit(11)
    }

    fn initial_volume(&self) -> u8 {
        self.length_envelope.get_bits(12..=15) as u8
    }

    fn divide_ratio(&self) -> u32 {
        u32::from(self.frequency_control.get_bits(0..=2))
    }

    fn narrow(&self) -> bool {
        self.frequency_control.get_bit(3)
    }

    fn shift_frequency(&self) -> u32 {
        u32::from(self.frequency_control.get_bits(4..=7))
    }

    fn length_enabled(&self) -> bool {
        self.frequency_control.get_bit(14)
    }

    pub fn restart(&mut self) {
        self.envelope.restart(self.initial_volume());
        self.shift_register = if self.narrow() { 0x7F } else { 0x7FFF };
        self.shift_cycles = 0;
        self.length_cycles = 0;
    }

    pub fn step(&mut self, cycles: u32) {
        // Base rate 524288 Hz / ratio (ratio 0 counts as 0.5), halved per
        // frequency step.
        let mut rate = 524_288;
        if self.divide_ratio() == 0 {
            rate <<= 1;
        } else {
            rate /= self.divide_ratio();
        }
        rate >>= self.shift_frequency() + 1;

        let period = (CPU_CLOCK / rate.max(1)).max(1);
        self.shift_cycles += cycles;

        while self.shift_cycles >= period {
            let carry = self.shift_register & 1 != 0;
            self.shift_register >>= 1;
            if carry {
                self.shift_register ^= if self.narrow() { 0x60 } else { 0x6000 };
            }
            self.output = carry;
            self.shift_cycles -= period;
        }

        self.envelope
            .step(cycles, self.envelope_time(), self.envelope_increase());

        if self.length_enabled() {
            self.length_cycles = self.length_cycles.saturating_add(cycles);
        }
    }

    #[must_use]
    pub fn sample(&self) -> i32 {
        if self.length_enabled() && self.length_cycles >= (64 - self.sound_length()) * LENGTH_TICK {
            return 0;
        }

        let value = if self.output { 127 } else { -128 };
        value * i32::from(self.envelope.volume) / 16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tone_duty_cycle_shapes_output() {
        let mut tone = ToneChannel {
            duty_length_envelope: 0xF000 | (2 << 6), // max volume, 50% duty
            frequency_control: 1024,                 // 128 Hz
            ..Default::default()
        };
        tone.restart();

        let period = CPU_CLOCK / 128;
        let mut high = 0;
        let samples = 64;
        for _ in 0..samples {
            tone.step(period / samples);
            if tone.sample() > 0 {
                high += 1;
            }
        }
        // Half the period is high at 50% duty.
        assert!((samples / 2 - 4..=samples / 2 + 4).contains(&high));
    }

    #[test]
    fn envelope_decreases_volume() {
        let mut tone = ToneChannel {
            // Initial volume 15, decrease, step time 1.
            duty_length_envelope: 0xF000 | (1 << 8),
            ..Default::default()
        };
        tone.restart();
        assert_eq!(tone.envelope.volume, 15);

        tone.step(ENVELOPE_PERIOD);
        assert_eq!(tone.envelope.volume, 14);

        tone.step(ENVELOPE_PERIOD * 20);
        assert_eq!(tone.envelope.volume, 0);
    }

    #[test]
    fn sweep_moves_frequency_up_and_clamps() {
        let mut tone = ToneChannel {
            sweep: (1 << 4) | 1, // time 1, shift 1, increase
            duty_length_envelope: 0xF000,
            frequency_control: 1024,
            ..Default::default()
        };
        tone.restart();

        tone.step(SWEEP_PERIOD);
        // 1024 + (1024 >> 1) = 1536
        assert_eq!(tone.frequency, 1536);

        tone.step(SWEEP_PERIOD * 8);
        assert_eq!(tone.frequency, 2047);
    }

    #[test]
    fn length_mutes_channel() {
        let mut tone = ToneChannel {
            duty_length_envelope: 0xF000 | 63, // one length tick
            frequency_control: 1 << 14,        // length enabled
            ..Default::default()
        };
        tone.restart();

        tone.step(LENGTH_TICK + 1);
        assert_eq!(tone.sample(), 0);
    }

    #[test]
    fn wave_plays_nibbles_msb_first() {
        let mut wave = WaveChannel {
            control: 1 << 7,           // playback
            length_volume: 0b01 << 13, // 100%
            frequency_control: 2047,   // fastest sample clock
            ..Default::default()
        };
        wave.wave_ram[0][0] = 0xF0;
        wave.restart();

        // First nibble is the high one: 15 - 8 = 7 → 56.
        assert_eq!(wave.sample(), 56);

        wave.step(CPU_CLOCK / 2_097_152 + 1);
        // Second nibble: 0 - 8 = -8 → -64.
        assert_eq!(wave.sample(), -64);
    }

    #[test]
    fn wave_dimension_flips_banks() {
        let mut wave = WaveChannel {
            control: (1 << 7) | (1 << 5), // playback, two banks
            frequency_control: 2047,
            ..Default::default()
        };
        wave.restart();
        assert_eq!(wave.bank(), 0);

        let period = CPU_CLOCK / 2_097_152 + 1;
        for _ in 0..32 {
            wave.step(period);
        }
        assert_eq!(wave.bank(), 1);
    }

    #[test]
    fn noise_lfsr_produces_both_levels() {
        let mut noise = NoiseChannel {
            length_envelope: 0xF000,
            frequency_control: 1, // fast shift
            ..Default::default()
        };
        noise.restart();

        let mut seen_high = false;
        let mut seen_low = false;
        for _ in 0..10_000 {
            noise.step(64);
            match noise.sample() {
                s if s > 0 => seen_high = true,
                s if s < 0 => seen_low = true,
                _ => {}
            }
        }
        assert!(seen_high && seen_low);
    }
}
