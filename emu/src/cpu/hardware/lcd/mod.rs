#![allow(clippy::cast_possible_truncation)]

//! LCD controller (PPU).
//!
//! The display is 240x160 pixels of 15-bit color. A frame is 228 scanlines
//! of 1232 CPU cycles: 160 visible lines alternating 960 active cycles with
//! 272 HBlank cycles, then 68 VBlank lines.
//!
//! The frame loop drives the PPU as an event machine: [`Lcd::scanline`]
//! renders one full line into the framebuffer, [`Lcd::hblank`] and
//! [`Lcd::vblank`] flip the DISPSTAT flags and report IRQ requests, and
//! [`Lcd::next_line`] advances VCOUNT and checks the VCount match.
//!
//! Rendering runs per line: every enabled background and the object engine
//! fill 240-pixel RGB555 buffers (bit 15 = transparent), then the compositor
//! keeps the top two non-transparent pixels per column, applies window
//! masking and color special effects, and converts to ARGB32.

mod backgrounds;
mod memory;
mod objects;
mod registers;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

pub use memory::Memory;
pub use registers::Registers;
use registers::WindowEnables;

/// GBA display width
pub const LCD_WIDTH: usize = 240;

/// GBA display height
pub const LCD_HEIGHT: usize = 160;

/// Scanlines per frame, visible plus VBlank.
pub const TOTAL_LINES: u16 = 228;

/// RGB555 value with the transparency marker set.
const TRANSPARENT: u16 = 0x8000;

/// Layer identifiers used by the compositor: BG0-3, objects, backdrop.
const LAYER_OBJ: usize = 4;
const LAYER_BACKDROP: usize = 5;

/// IRQ/DMA requests produced by one PPU event.
#[derive(Default)]
pub struct LcdEvent {
    pub request_vblank_irq: bool,
    pub request_hblank_irq: bool,
    pub request_vcount_irq: bool,
}

#[serde_as]
#[derive(Serialize, Deserialize)]
pub struct Lcd {
    pub registers: Registers,
    pub memory: Memory,

    /// ARGB32 output, row-major 240x160.
    #[serde_as(as = "Box<[_; 38400]>")]
    pub framebuffer: Box<[u32; LCD_WIDTH * LCD_HEIGHT]>,

    #[serde(skip, default = "empty_line_set")]
    bg_lines: [[u16; LCD_WIDTH]; 4],
    #[serde(skip, default = "empty_line_set")]
    obj_lines: [[u16; LCD_WIDTH]; 4],
    #[serde(skip, default = "empty_mask_line")]
    obj_semi_line: [bool; LCD_WIDTH],
    #[serde(skip, default = "empty_mask_line")]
    obj_window_line: [bool; LCD_WIDTH],
}

fn empty_line_set() -> [[u16; LCD_WIDTH]; 4] {
    [[TRANSPARENT; LCD_WIDTH]; 4]
}

const fn empty_mask_line() -> [bool; LCD_WIDTH] {
    [false; LCD_WIDTH]
}

impl Default for Lcd {
    fn default() -> Self {
        Self {
            registers: Registers::default(),
            memory: Memory::default(),
            framebuffer: Box::new([0; LCD_WIDTH * LCD_HEIGHT]),
            bg_lines: [[TRANSPARENT; LCD_WIDTH]; 4],
            obj_lines: [[TRANSPARENT; LCD_WIDTH]; 4],
            obj_semi_line: [false; LCD_WIDTH],
            obj_window_line: [false; LCD_WIDTH],
        }
    }
}

impl Lcd {
    pub fn reset(&mut self) {
        self.registers = Registers::default();
        self.memory.reset();
        self.framebuffer.fill(0);
    }

    /// Renders the current visible line into the framebuffer.
    pub fn scanline(&mut self) {
        self.registers.set_vblank_flag(false);
        self.registers.set_hblank_flag(false);

        let line = self.registers.vcount;
        if line >= LCD_HEIGHT as u16 {
            return;
        }

        if self.registers.forced_blank() {
            let row = line as usize * LCD_WIDTH;
            self.framebuffer[row..row + LCD_WIDTH].fill(0xFFFF_FFFF);
            return;
        }

        for buffer in &mut self.bg_lines {
            buffer.fill(TRANSPARENT);
        }
        for buffer in &mut self.obj_lines {
            buffer.fill(TRANSPARENT);
        }
        self.obj_semi_line.fill(false);
        self.obj_window_line.fill(false);

        match self.registers.bg_mode() {
            0 => {
                for id in 0..4 {
                    if self.registers.bg_enabled(id) {
                        self.render_text(id);
                    }
                }
            }
            1 => {
                for id in 0..2 {
                    if self.registers.bg_enabled(id) {
                        self.render_text(id);
                    }
                }
                if self.registers.bg_enabled(2) {
                    self.render_affine(2);
                }
            }
            2 => {
                for id in 2..4 {
                    if self.registers.bg_enabled(id) {
                        self.render_affine(id);
                    }
                }
            }
            3 => {
                if self.registers.bg_enabled(2) {
                    self.render_bitmap_mode3();
                }
            }
            4 => {
                if self.registers.bg_enabled(2) {
                    self.render_bitmap_mode4();
                }
            }
            5 => {
                if self.registers.bg_enabled(2) {
                    self.render_bitmap_mode5();
                }
            }
            mode => {
                tracing::warn!("unknown background mode {mode}");
            }
        }

        if self.registers.obj_enabled() {
            self.render_objects();
        }

        self.compose_scanline();
    }

    /// Enters HBlank: sets the flag and reports the IRQ request.
    pub fn hblank(&mut self) -> LcdEvent {
        let mut event = LcdEvent::default();

        self.registers.set_hblank_flag(true);
        if self.registers.hblank_irq_enabled() {
            event.request_hblank_irq = true;
        }

        event
    }

    /// Enters VBlank at line 160: flags, IRQ, affine reference reload.
    pub fn vblank(&mut self) -> LcdEvent {
        let mut event = LcdEvent::default();

        self.registers.set_vblank_flag(true);
        self.registers.set_hblank_flag(false);
        if self.registers.vblank_irq_enabled() {
            event.request_vblank_irq = true;
        }

        for point in &mut self.registers.bgx {
            point.reload();
        }
        for point in &mut self.registers.bgy {
            point.reload();
        }

        event
    }

    /// Ends the line: clears HBlank, advances VCOUNT (wrapping at 228),
    /// checks the VCount match and walks the affine reference points.
    pub fn next_line(&mut self) -> LcdEvent {
        let mut event = LcdEvent::default();

        self.registers.set_hblank_flag(false);

        // The affine reference points walk by PB/PD once per rendered line.
        if self.registers.vcount < LCD_HEIGHT as u16 {
            for affine in 0..2 {
                self.registers.bgx[affine].internal +=
                    Registers::affine_parameter(self.registers.bgpb[affine]);
                self.registers.bgy[affine].internal +=
                    Registers::affine_parameter(self.registers.bgpd[affine]);
            }
        }

        self.registers.vcount = (self.registers.vcount + 1) % TOTAL_LINES;

        let matches = u8::try_from(self.registers.vcount & 0xFF).unwrap()
            == self.registers.vcount_setting();
        self.registers.set_vcount_flag(matches);
        if matches && self.registers.vcount_irq_enabled() {
            event.request_vcount_irq = true;
        }

        event
    }

    fn compose_scanline(&mut self) {
        let line = self.registers.vcount as usize;
        let backdrop = self.memory.palette_color(0) & 0x7FFF;
        let windows_active = self.registers.any_window_enabled();
        let blend_mode = self.registers.blend_mode();

        for x in 0..LCD_WIDTH {
            let enables = if windows_active {
                self.window_enables_at(x as u32, line as u32)
            } else {
                WindowEnables::ALL
            };

            // Keep the top two non-transparent pixels. Priorities are
            // walked worst-first so the best candidates settle on top;
            // within a priority, higher-numbered backgrounds lose to lower
            // ones, and objects beat every background.
            let mut top = (backdrop, LAYER_BACKDROP);
            let mut below = (backdrop, LAYER_BACKDROP);

            for priority in (0..4_u8).rev() {
                for bg in (0..4).rev() {
                    if !self.registers.bg_enabled(bg)
                        || !enables.bg[bg]
                        || self.registers.bg_priority(bg) != priority
                    {
                        continue;
                    }
                    let pixel = self.bg_lines[bg][x];
                    if pixel != TRANSPARENT {
                        below = top;
                        top = (pixel, bg);
                    }
                }

                if self.registers.obj_enabled() && enables.obj {
                    let pixel = self.obj_lines[usize::from(priority)][x];
                    if pixel != TRANSPARENT {
                        below = top;
                        top = (pixel, LAYER_OBJ);
                    }
                }
            }

            let color = if enables.effects {
                self.apply_color_effect(top, below, blend_mode, x)
            } else {
                top.0
            };

            self.framebuffer[line * LCD_WIDTH + x] = argb32(color);
        }
    }

    /// Window lookup for one pixel; WIN0 beats WIN1 beats the object
    /// window, everything else gets the out-of-window enables.
    fn window_enables_at(&self, x: u32, y: u32) -> WindowEnables {
        if self.registers.win0_enabled() && self.registers.window_contains(0, x, y) {
            return self.registers.win_in_enables(0);
        }

        if self.registers.win1_enabled() && self.registers.window_contains(1, x, y) {
            return self.registers.win_in_enables(1);
        }

        if self.registers.obj_window_enabled() && self.obj_window_line[x as usize] {
            return self.registers.obj_window_enables();
        }

        self.registers.win_out_enables()
    }

    fn apply_color_effect(
        &self,
        top: (u16, usize),
        below: (u16, usize),
        blend_mode: u8,
        x: usize,
    ) -> u16 {
        let (top_color, top_layer) = top;
        let (below_color, below_layer) = below;

        // A semi-transparent object pixel forces alpha blending whenever a
        // valid second target lies below, regardless of the mode selector.
        if top_layer == LAYER_OBJ
            && self.obj_semi_line[x]
            && self.registers.blend_target2(below_layer)
        {
            let (eva, evb) = self.registers.blend_alpha();
            return alpha_blend(top_color, below_color, eva, evb);
        }

        if blend_mode == 0 || !self.registers.blend_target1(top_layer) {
            return top_color;
        }

        match blend_mode {
            1 => {
                if self.registers.blend_target2(below_layer) {
                    let (eva, evb) = self.registers.blend_alpha();
                    alpha_blend(top_color, below_color, eva, evb)
                } else {
                    top_color
                }
            }
            2 => brightness_adjust(top_color, self.registers.blend_brightness(), true),
            _ => brightness_adjust(top_color, self.registers.blend_brightness(), false),
        }
    }
}

/// result = top·EVA/16 + below·EVB/16, each channel clamped to 31.
fn alpha_blend(top: u16, below: u16, eva: u16, evb: u16) -> u16 {
    let blend = |a: u16, b: u16| ((a * eva + b * evb) / 16).min(31);

    let r = blend(top & 0x1F, below & 0x1F);
    let g = blend((top >> 5) & 0x1F, (below >> 5) & 0x1F);
    let b = blend((top >> 10) & 0x1F, (below >> 10) & 0x1F);

    (b << 10) | (g << 5) | r
}

/// Fade toward white (`increase`) or black by EVY/16.
fn brightness_adjust(color: u16, evy: u16, increase: bool) -> u16 {
    let adjust = |c: u16| {
        if increase {
            c + (31 - c) * evy / 16
        } else {
            c - c * evy / 16
        }
    };

    let r = adjust(color & 0x1F);
    let g = adjust((color >> 5) & 0x1F);
    let b = adjust((color >> 10) & 0x1F);

    (b << 10) | (g << 5) | r
}

/// RGB555 to ARGB32 with 5-to-8 bit expansion and opaque alpha.
const fn argb32(color: u16) -> u32 {
    let r = (color & 0x1F) as u32;
    let g = ((color >> 5) & 0x1F) as u32;
    let b = ((color >> 10) & 0x1F) as u32;

    0xFF00_0000 | (r << 19) | (g << 11) | (b << 3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitwise::Bits;
    use pretty_assertions::assert_eq;

    fn lcd_with_backdrop(color: u16) -> Lcd {
        let mut lcd = Lcd::default();
        lcd.memory.palette_ram[0] = color.get_byte(0);
        lcd.memory.palette_ram[1] = color.get_byte(1);
        lcd
    }

    #[test]
    fn backdrop_fills_empty_scanline() {
        let mut lcd = lcd_with_backdrop(0x001F); // pure red
        lcd.scanline();
        assert_eq!(lcd.framebuffer[0], 0xFFF8_0000);
    }

    #[test]
    fn forced_blank_renders_white() {
        let mut lcd = Lcd::default();
        lcd.registers.dispcnt = 1 << 7;
        lcd.scanline();
        assert_eq!(lcd.framebuffer[0], 0xFFFF_FFFF);
    }

    #[test]
    fn mode3_bitmap_pixel() {
        let mut lcd = Lcd::default();
        lcd.registers.dispcnt = 3 | (1 << 10); // mode 3, BG2 on
        // Pixel (0,0) = 0x7FFF (white).
        lcd.memory.video_ram[0] = 0xFF;
        lcd.memory.video_ram[1] = 0x7F;
        lcd.scanline();
        assert_eq!(lcd.framebuffer[0], 0xFFFF_FFFF);
    }

    #[test]
    fn text_background_renders_tiles() {
        let mut lcd = Lcd::default();
        // Mode 0, BG0 enabled, map base block 1.
        lcd.registers.dispcnt = 1 << 8;
        lcd.registers.bgcnt[0] = 1 << 8;

        // Screen entry (0,0): tile 1, palette 0.
        lcd.memory.video_ram[0x800] = 0x01;
        // Tile 1: every pixel uses palette index 1.
        for byte in &mut lcd.memory.video_ram[0x20..0x40] {
            *byte = 0x11;
        }
        // Palette color 1: pure green.
        lcd.memory.palette_ram[2] = 0xE0;
        lcd.memory.palette_ram[3] = 0x03;

        lcd.scanline();

        for x in 0..8 {
            assert_eq!(lcd.framebuffer[x], 0xFF00_F800, "pixel {x}");
        }
    }

    #[test]
    fn sprite_wrapping_past_y_boundary_renders_at_top() {
        let mut lcd = Lcd::default();
        // Mode 0 with objects enabled.
        lcd.registers.dispcnt = 1 << 12;

        // Object 0: 8x8 square at x=5, y=250 (wraps to -6, so rows 0-1 of
        // the screen show the sprite's bottom rows).
        let attributes: [u16; 3] = [250, 5, 2];
        for (i, value) in attributes.iter().enumerate() {
            lcd.memory.obj_attributes[i * 2] = (value & 0xFF) as u8;
            lcd.memory.obj_attributes[i * 2 + 1] = (value >> 8) as u8;
        }

        // Object tile 2: every pixel uses palette index 1.
        let tile_base = 0x10000 + 2 * 32;
        for byte in &mut lcd.memory.video_ram[tile_base..tile_base + 32] {
            *byte = 0x11;
        }
        // Object palette color 1: pure red.
        lcd.memory.palette_ram[0x202] = 0x1F;

        lcd.scanline();
        assert_eq!(lcd.framebuffer[5], 0xFFF8_0000);
        assert_eq!(lcd.framebuffer[12], 0xFFF8_0000);
        assert_ne!(lcd.framebuffer[13], 0xFFF8_0000);

        // Two lines further down the sprite has wrapped away.
        lcd.registers.vcount = 2;
        lcd.scanline();
        assert_ne!(lcd.framebuffer[2 * LCD_WIDTH + 5], 0xFFF8_0000);
    }

    #[test]
    fn vcount_wraps_and_matches() {
        let mut lcd = Lcd::default();
        lcd.registers.dispstat = (100 << 8) | (1 << 5); // VCount target 100, IRQ on

        let mut fired = 0;
        for _ in 0..TOTAL_LINES {
            if lcd.next_line().request_vcount_irq {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(lcd.registers.vcount, 0);
    }

    #[test]
    fn vcount_match_on_last_line_fires_once_per_frame() {
        let mut lcd = Lcd::default();
        lcd.registers.dispstat = (227 << 8) | (1 << 5);

        let mut fired = 0;
        for _ in 0..u32::from(TOTAL_LINES) * 2 {
            if lcd.next_line().request_vcount_irq {
                fired += 1;
            }
        }
        assert_eq!(fired, 2);
    }

    #[test]
    fn hblank_event_respects_irq_enable() {
        let mut lcd = Lcd::default();
        assert!(!lcd.hblank().request_hblank_irq);
        assert!(lcd.registers.dispstat.get_bit(1));

        lcd.registers.dispstat.set_bit(4, true);
        assert!(lcd.hblank().request_hblank_irq);
    }

    #[test]
    fn vblank_reloads_affine_reference_points() {
        let mut lcd = Lcd::default();
        lcd.registers.bgx[0].write_byte(0, 0x40);
        lcd.registers.bgx[0].internal = 12345;

        let event = lcd.vblank();
        assert!(!event.request_vblank_irq);
        assert_eq!(lcd.registers.bgx[0].internal, 0x40);
    }

    #[test]
    fn affine_reference_walks_by_pb_pd_on_visible_lines() {
        let mut lcd = Lcd::default();
        lcd.registers.bgpb[0] = 0x0100; // +1.0 per line
        lcd.registers.bgpd[0] = 0x0200; // +2.0 per line

        lcd.next_line();
        assert_eq!(lcd.registers.bgx[0].internal, 0x100);
        assert_eq!(lcd.registers.bgy[0].internal, 0x200);

        // No walking during VBlank lines.
        lcd.registers.vcount = 200;
        lcd.next_line();
        assert_eq!(lcd.registers.bgx[0].internal, 0x100);
    }

    #[test]
    fn brightness_math_clamps() {
        assert_eq!(brightness_adjust(0x7FFF, 16, true), 0x7FFF);
        assert_eq!(brightness_adjust(0x7FFF, 16, false), 0);
        // EVY 8 halves the distance to white.
        assert_eq!(brightness_adjust(0, 8, true) & 0x1F, 15);
    }

    #[test]
    fn alpha_blend_clamps_channels() {
        // Both pixels full red at full weight: clamps to 31.
        assert_eq!(alpha_blend(0x001F, 0x001F, 16, 16) & 0x1F, 31);
        // Half/half mix of red and black.
        assert_eq!(alpha_blend(0x001F, 0, 8, 8) & 0x1F, 15);
    }
}
