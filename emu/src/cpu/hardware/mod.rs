//! Hardware components reached through the [`Bus`](crate::bus::Bus).
//!
//! | Module                | Responsibility                      | I/O range          |
//! |-----------------------|-------------------------------------|--------------------|
//! | [`internal_memory`]   | BIOS, work RAMs, ROM, save backup   | pages 0/2/3/8-E    |
//! | [`lcd`]               | PPU                                 | `0x0400_0000-005F` |
//! | [`apu`]               | PSG + FIFO sound, mixer             | `0x0400_0060-00AF` |
//! | [`dma`]               | 4-channel DMA controller            | `0x0400_00B0-00DF` |
//! | [`timers`]            | 4 hardware timers                   | `0x0400_0100-010F` |
//! | [`keypad`]            | Button input                        | `0x0400_0130-0133` |
//! | [`interrupt_control`] | IE/IF/IME, POSTFLG, HALTCNT         | `0x0400_0200-0301` |

pub mod apu;
pub mod dma;
pub mod internal_memory;
pub mod interrupt_control;
pub mod keypad;
pub mod lcd;
pub mod timers;
