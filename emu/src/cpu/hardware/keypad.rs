//! Button input registers.
//!
//! `KEYINPUT` works with pull-up logic: a bit is 0 while the button is held.
//! `KEYCNT` can raise the keypad IRQ when the selected buttons are pressed,
//! either any of them (OR) or all of them (AND, bit 15).

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

/// The ten GBA buttons, by bit position in KEYINPUT/KEYCNT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    A = 0,
    B = 1,
    Select = 2,
    Start = 3,
    Right = 4,
    Left = 5,
    Up = 6,
    Down = 7,
    R = 8,
    L = 9,
}

#[derive(Serialize, Deserialize)]
pub struct Keypad {
    pub key_input: u16,
    pub key_interrupt_control: u16,
}

impl Default for Keypad {
    fn default() -> Self {
        Self {
            // All buttons released.
            key_input: 0x3FF,
            key_interrupt_control: 0,
        }
    }
}

impl Keypad {
    pub fn set_key(&mut self, key: Key, pressed: bool) {
        // Pull-up logic: pressed = low.
        self.key_input.set_bit(key as u8, !pressed);
    }

    /// Evaluates the KEYCNT interrupt condition against the current input
    /// state. Called after every key transition.
    #[must_use]
    pub fn interrupt_requested(&self) -> bool {
        if self.key_interrupt_control.is_bit_off(14) {
            return false;
        }

        let selected = self.key_interrupt_control.get_bits(0..=9);
        let pressed = !self.key_input & 0x3FF;

        if self.key_interrupt_control.get_bit(15) {
            // AND mode: all selected buttons must be down.
            selected != 0 && pressed & selected == selected
        } else {
            // OR mode: any selected button.
            pressed & selected != 0
        }
    }
}
