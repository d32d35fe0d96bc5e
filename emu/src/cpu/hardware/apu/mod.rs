//! Sound hardware: four PSG channels, two direct-sound FIFOs and the mixer.
//!
//! The mixer produces one stereo sample every `CPU_CLOCK / sample_rate`
//! cycles: PSG outputs are summed per side under the SOUNDCNT_L enables and
//! volumes, the FIFO latches are added under their SOUNDCNT_H scales, the
//! SOUNDBIAS offset is applied, the result is clamped to the 10-bit DAC
//! range and truncated to the configured resolution, then written to the
//! stereo ring buffer shared with the host audio thread. The core never
//! blocks on the host: the ring simply wraps.

pub mod channels;
pub mod fifo;

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::gba::CPU_CLOCK;

use channels::{NoiseChannel, ToneChannel, WaveChannel};
use fifo::Fifo;

/// Entries per side of the audio ring.
const RING_SIZE: usize = 0x4000;

/// Stereo sample ring shared with the host audio callback.
pub struct AudioRing {
    left: Box<[i16; RING_SIZE]>,
    right: Box<[i16; RING_SIZE]>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for AudioRing {
    fn default() -> Self {
        Self {
            left: Box::new([0; RING_SIZE]),
            right: Box::new([0; RING_SIZE]),
            read_pos: 0,
            write_pos: 0,
        }
    }
}

impl AudioRing {
    fn push(&mut self, left: i16, right: i16) {
        self.left[self.write_pos] = left;
        self.right[self.write_pos] = right;
        self.write_pos = (self.write_pos + 1) % RING_SIZE;
    }

    fn pop(&mut self) -> (i16, i16) {
        let sample = (self.left[self.read_pos], self.right[self.read_pos]);
        self.read_pos = (self.read_pos + 1) % RING_SIZE;
        sample
    }
}

#[derive(Serialize, Deserialize)]
pub struct Apu {
    pub tone: [ToneChannel; 2],
    pub wave: WaveChannel,
    pub noise: NoiseChannel,
    pub fifo: [Fifo; 2],

    /// SOUNDCNT_L: PSG per-side volumes and enables.
    pub control_psg: u16,
    /// SOUNDCNT_H: mixing ratios, FIFO routing.
    pub control_mix: u16,
    /// SOUNDCNT_X: PSG status + master enable.
    pub control_master: u16,
    /// SOUNDBIAS: output bias level and amplitude resolution.
    pub soundbias: u16,

    cycles_per_sample: u32,
    sample_cycles: u32,

    #[serde(skip)]
    ring: Arc<Mutex<AudioRing>>,
}

impl Default for Apu {
    fn default() -> Self {
        Self {
            tone: [ToneChannel::default(), ToneChannel::default()],
            wave: WaveChannel::default(),
            noise: NoiseChannel::default(),
            fifo: [Fifo::default(), Fifo::default()],
            control_psg: 0,
            control_mix: 0,
            control_master: 0,
            soundbias: 0x200,
            cycles_per_sample: CPU_CLOCK / 44_100,
            sample_cycles: 0,
            ring: Arc::new(Mutex::new(AudioRing::default())),
        }
    }
}

impl Apu {
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.cycles_per_sample = (CPU_CLOCK / sample_rate.max(1)).max(1);
    }

    pub fn reset(&mut self) {
        let ring = Arc::clone(&self.ring);
        let cycles_per_sample = self.cycles_per_sample;
        *self = Self {
            ring,
            cycles_per_sample,
            ..Self::default()
        };

        let mut ring = self.ring.lock().expect("audio ring poisoned");
        *ring = AudioRing::default();
    }

    /// A clone of the ring handle for the host audio callback.
    #[must_use]
    pub fn ring_handle(&self) -> Arc<Mutex<AudioRing>> {
        Arc::clone(&self.ring)
    }

    #[must_use]
    pub fn master_enabled(&self) -> bool {
        self.control_master.get_bit(7)
    }

    /// Which timer clocks the given FIFO (SOUNDCNT_H bits 10/14).
    #[must_use]
    pub fn fifo_timer(&self, fifo: usize) -> usize {
        usize::from(self.control_mix.get_bit(if fifo == 0 { 10 } else { 14 }))
    }

    /// Timer overflow on this FIFO's timer: pop one sample into the latch.
    pub fn advance_fifo(&mut self, fifo: usize) {
        self.fifo[fifo].dequeue();
    }

    #[must_use]
    pub const fn fifo_needs_data(&self, fifo: usize) -> bool {
        self.fifo[fifo].needs_data()
    }

    pub fn enqueue_fifo(&mut self, fifo: usize, value: u8) {
        self.fifo[fifo].enqueue(value);
    }

    /// SOUNDCNT_H high-byte write; bits 11/15 reset the FIFOs.
    pub fn write_control_mix_high(&mut self, value: u8) {
        self.control_mix.set_byte(1, value);
        if value.get_bit(3) {
            self.fifo[0].reset();
        }
        if value.get_bit(7) {
            self.fifo[1].reset();
        }
    }

    /// Tone CNT_X high-byte write; bit 15 restarts the channel.
    pub fn write_tone_control_high(&mut self, id: usize, value: u8) {
        self.tone[id].frequency_control.set_byte(1, value);
        if value.get_bit(7) {
            self.tone[id].restart();
        }
    }

    pub fn write_wave_control_high(&mut self, value: u8) {
        self.wave.frequency_control.set_byte(1, value);
        if value.get_bit(7) {
            self.wave.restart();
        }
    }

    pub fn write_noise_control_high(&mut self, value: u8) {
        self.noise.frequency_control.set_byte(1, value);
        if value.get_bit(7) {
            self.noise.restart();
        }
    }

    /// Wave RAM is byte-addressable; accesses hit the bank not selected for
    /// playback.
    #[must_use]
    pub fn read_wave_ram(&self, index: usize) -> u8 {
        self.wave.wave_ram[self.wave.bank() ^ 1][index]
    }

    pub fn write_wave_ram(&mut self, index: usize, value: u8) {
        self.wave.wave_ram[self.wave.bank() ^ 1][index] = value;
    }

    /// Advances the generators and mixes any due samples into the ring.
    pub fn step(&mut self, cycles: u32) {
        self.tone[0].step(cycles);
        self.tone[1].step(cycles);
        self.wave.step(cycles);
        self.noise.step(cycles);

        self.sample_cycles += cycles;
        let samples = self.sample_cycles / self.cycles_per_sample;
        self.sample_cycles %= self.cycles_per_sample;

        if samples != 0 {
            self.mix(samples);
        }
    }

    fn mix(&mut self, samples: u32) {
        let bias = i32::from(self.soundbias.get_bits(0..=9));
        let resolution = self.soundbias.get_bits(14..=15) as u8;

        // PSG master volume: 25%, 50%, 100% (3 is prohibited, treated as
        // 100%).
        let psg_quarters = [1, 2, 4, 4][usize::from(self.control_mix.get_bits(0..=1))];
        // FIFO scale: 50% or 100% of a 9-bit contribution.
        let fifo_scale = [2, 4];
        let fifo_a_scale = fifo_scale[usize::from(self.control_mix.get_bit(2))];
        let fifo_b_scale = fifo_scale[usize::from(self.control_mix.get_bit(3))];

        let volume_right = i32::from(self.control_psg.get_bits(0..=2));
        let volume_left = i32::from(self.control_psg.get_bits(4..=6));

        let psg = [
            self.tone[0].sample(),
            self.tone[1].sample(),
            self.wave.sample(),
            self.noise.sample(),
        ];

        let side = |enable_shift: u8, volume: i32| -> i32 {
            let mut sum = 0;
            for (channel, sample) in psg.iter().enumerate() {
                if self.control_psg.get_bit(enable_shift + channel as u8) {
                    sum += sample;
                }
            }
            sum * psg_quarters / 4 * volume / 7
        };

        let mut output = [side(8, volume_right), side(12, volume_left)];

        // FIFO routing: A enables on bits 8/9, B on bits 12/13
        // (right, left).
        for (fifo, scale, enable_base) in [
            (&self.fifo[0], fifo_a_scale, 8_u8),
            (&self.fifo[1], fifo_b_scale, 12_u8),
        ] {
            let sample = i32::from(fifo.sample()) * scale;
            if self.control_mix.get_bit(enable_base) {
                output[0] += sample;
            }
            if self.control_mix.get_bit(enable_base + 1) {
                output[1] += sample;
            }
        }

        if !self.master_enabled() {
            output = [0, 0];
        }

        // Bias, 10-bit clamp, DAC resolution truncation.
        let finish = |raw: i32| -> i16 {
            let clamped = (raw + bias).clamp(0, 0x3FF);
            let truncated = (clamped >> resolution) << resolution;
            ((truncated - 0x200) * 64) as i16
        };

        let left = finish(output[1]);
        let right = finish(output[0]);

        let mut ring = self.ring.lock().expect("audio ring poisoned");
        for _ in 0..samples {
            ring.push(left, right);
        }
    }

    /// Host audio callback: copies interleaved stereo samples out of the
    /// ring. Thread-safe against the emulation thread's mixer.
    pub fn fill_audio_buffer(ring: &Arc<Mutex<AudioRing>>, out: &mut [i16]) {
        let mut ring = ring.lock().expect("audio ring poisoned");
        for frame in out.chunks_exact_mut(2) {
            let (left, right) = ring.pop();
            frame[0] = left;
            frame[1] = right;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stepped_apu() -> Apu {
        let mut apu = Apu::default();
        apu.control_master = 1 << 7;
        apu
    }

    #[test]
    fn silent_apu_outputs_centered_bias() {
        let mut apu = stepped_apu();
        apu.step(apu.cycles_per_sample);

        let ring = apu.ring_handle();
        let mut out = [0_i16; 2];
        Apu::fill_audio_buffer(&ring, &mut out);
        // Bias 0x200 recentered to zero.
        assert_eq!(out, [0, 0]);
    }

    #[test]
    fn master_disable_mutes_psg() {
        let mut apu = Apu::default();
        apu.control_psg = 0xFF77; // everything enabled, full volume
        apu.control_mix = 0b10; // PSG 100%
        apu.tone[0].duty_length_envelope = 0xF000;
        apu.tone[0].restart();

        apu.step(apu.cycles_per_sample);

        let ring = apu.ring_handle();
        let mut out = [0_i16; 2];
        Apu::fill_audio_buffer(&ring, &mut out);
        assert_eq!(out, [0, 0]);
    }

    #[test]
    fn fifo_sample_reaches_output() {
        let mut apu = stepped_apu();
        apu.control_mix = (1 << 2) | (1 << 8) | (1 << 9); // A 100%, both sides
        apu.enqueue_fifo(0, 0x40); // +64
        apu.advance_fifo(0);

        apu.step(apu.cycles_per_sample);

        let ring = apu.ring_handle();
        let mut out = [0_i16; 2];
        Apu::fill_audio_buffer(&ring, &mut out);
        // 64 * 4 = 256 over bias, scaled by 64.
        assert_eq!(out, [256 * 64, 256 * 64]);
    }

    #[test]
    fn fifo_reset_through_control_write() {
        let mut apu = stepped_apu();
        for _ in 0..20 {
            apu.enqueue_fifo(0, 1);
        }
        assert!(!apu.fifo_needs_data(0));

        apu.write_control_mix_high(1 << 3);
        assert!(apu.fifo_needs_data(0));
    }

    #[test]
    fn ring_wraps_without_blocking() {
        let mut apu = stepped_apu();
        // Push far more samples than the ring holds.
        for _ in 0..RING_SIZE + 100 {
            apu.step(apu.cycles_per_sample);
        }

        let ring = apu.ring_handle();
        let mut out = [0_i16; 4];
        Apu::fill_audio_buffer(&ring, &mut out);
        assert_eq!(out, [0, 0, 0, 0]);
    }

    #[test]
    fn fifo_timer_selection() {
        let mut apu = Apu::default();
        assert_eq!(apu.fifo_timer(0), 0);
        apu.control_mix = 1 << 10;
        assert_eq!(apu.fifo_timer(0), 1);
        assert_eq!(apu.fifo_timer(1), 0);
        apu.control_mix |= 1 << 14;
        assert_eq!(apu.fifo_timer(1), 1);
    }
}
