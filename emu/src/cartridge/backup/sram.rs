use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// 32 KiB of battery-backed SRAM, linearly addressed over the 8-bit save bus.
#[serde_as]
#[derive(Serialize, Deserialize)]
pub struct Sram {
    #[serde_as(as = "Box<[_; 32768]>")]
    memory: Box<[u8; Self::SIZE]>,
}

impl Sram {
    pub const SIZE: usize = 0x8000;

    #[must_use]
    pub fn new() -> Self {
        Self {
            memory: Box::new([0; Self::SIZE]),
        }
    }

    pub fn reset(&mut self) {
        self.memory.fill(0);
    }

    #[must_use]
    pub fn read8(&self, address: u32) -> u8 {
        self.memory[address as usize & 0x7FFF]
    }

    pub fn write8(&mut self, address: u32, value: u8) {
        self.memory[address as usize & 0x7FFF] = value;
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.memory.as_slice()
    }

    /// Installs a save image. Images of the wrong size are refused: the
    /// backup keeps its cleared contents and a warning is logged.
    pub fn load(&mut self, data: &[u8]) {
        if data.len() == Self::SIZE {
            self.memory.copy_from_slice(data);
        } else {
            tracing::warn!(
                "invalid SRAM save size {} (expected {}), starting cleared",
                data.len(),
                Self::SIZE
            );
            self.memory.fill(0);
        }
    }
}

impl Default for Sram {
    fn default() -> Self {
        Self::new()
    }
}
