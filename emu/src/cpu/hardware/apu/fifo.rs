//! Direct-sound FIFO: a 32-byte queue of signed samples.
//!
//! MMIO writes to FIFO_A/FIFO_B enqueue bytes; a timer overflow pops one
//! byte into the latched output sample. The DMA refill request fires while
//! 16 or fewer bytes remain queued.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Fifo {
    buffer: [i8; 32],
    len: usize,
    /// Last dequeued sample, held for the mixer between timer ticks.
    latched: i8,
}

impl Default for Fifo {
    fn default() -> Self {
        Self {
            buffer: [0; 32],
            len: 0,
            latched: 0,
        }
    }
}

impl Fifo {
    pub fn reset(&mut self) {
        self.len = 0;
        self.latched = 0;
    }

    pub fn enqueue(&mut self, data: u8) {
        if self.len < 32 {
            self.buffer[self.len] = data as i8;
            self.len += 1;
        }
    }

    /// Pops the oldest sample into the latch; an empty queue latches
    /// silence.
    pub fn dequeue(&mut self) {
        if self.len == 0 {
            self.latched = 0;
            return;
        }

        self.latched = self.buffer[0];
        self.buffer.copy_within(1..self.len, 0);
        self.len -= 1;
    }

    #[must_use]
    pub const fn needs_data(&self) -> bool {
        self.len <= 16
    }

    #[must_use]
    pub const fn sample(&self) -> i16 {
        self.latched as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fifo_order_and_latch() {
        let mut fifo = Fifo::default();
        fifo.enqueue(1);
        fifo.enqueue(2);
        fifo.enqueue(0x80); // -128 as a sample

        fifo.dequeue();
        assert_eq!(fifo.sample(), 1);
        fifo.dequeue();
        assert_eq!(fifo.sample(), 2);
        fifo.dequeue();
        assert_eq!(fifo.sample(), -128);

        // Running dry latches silence.
        fifo.dequeue();
        assert_eq!(fifo.sample(), 0);
    }

    #[test]
    fn needs_data_threshold() {
        let mut fifo = Fifo::default();
        for i in 0..17 {
            assert!(fifo.needs_data(), "still hungry at {i} bytes");
            fifo.enqueue(0);
        }
        assert!(!fifo.needs_data());
    }

    #[test]
    fn overflow_drops_samples() {
        let mut fifo = Fifo::default();
        for i in 0..40 {
            fifo.enqueue(i);
        }
        fifo.dequeue();
        assert_eq!(fifo.sample(), 0);

        for _ in 0..31 {
            fifo.dequeue();
        }
        // Bytes 32..40 never made it in.
        assert_eq!(fifo.sample(), 31);
        fifo.dequeue();
        assert_eq!(fifo.sample(), 0);
    }
}
