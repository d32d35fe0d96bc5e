//! Background scanline renderers.
//!
//! Each enabled background renders one 240-pixel RGB555 line buffer; bit 15
//! marks a transparent pixel. Text backgrounds walk the tilemap with
//! per-tile flips and 4/8bpp palettes; affine backgrounds sample an 8bpp
//! tile field along `(refX + px·PA, refY + px·PC)`; modes 3-5 read bitmap
//! framebuffers directly.

use super::memory::Memory;
use super::registers::Registers;
use super::{LCD_WIDTH, TRANSPARENT};

impl super::Lcd {
    pub(super) fn render_text(&mut self, id: usize) {
        let registers = &self.registers;
        let memory = &self.memory;
        let full_palette = registers.bg_full_palette(id);
        let tile_base = registers.bg_tile_base(id);
        let map_base = registers.bg_map_base(id);
        let size = registers.bg_screen_size(id);

        let (h_tiles, v_tiles): (u32, u32) = match size {
            0 => (32, 32),
            1 => (64, 32),
            2 => (32, 64),
            _ => (64, 64),
        };

        let y = (u32::from(registers.vcount) + u32::from(registers.bgvofs[id])) % (v_tiles * 8);
        let tile_y = y % 8;
        let row = y / 8;

        let buffer = &mut self.bg_lines[id];

        for px in 0..LCD_WIDTH as u32 {
            let x = (px + u32::from(registers.bghofs[id])) % (h_tiles * 8);
            let tile_x = x % 8;
            let col = x / 8;

            // Screen blocks tile a 2x2 grid for the expanded sizes; each
            // block is a 32x32 map of 2-byte entries.
            let mut block = map_base;
            if col >= 32 {
                block += 0x800;
            }
            if row >= 32 {
                block += if h_tiles == 64 { 0x1000 } else { 0x800 };
            }

            let entry_offset = block + ((row % 32) * 32 + (col % 32)) as usize * 2;
            let entry = u16::from_le_bytes([
                memory.video_ram[entry_offset],
                memory.video_ram[entry_offset + 1],
            ]);

            let number = usize::from(entry & 0x3FF);
            let h_flip = entry & (1 << 10) != 0;
            let v_flip = entry & (1 << 11) != 0;

            let tx = if h_flip { 7 - tile_x } else { tile_x };
            let ty = if v_flip { 7 - tile_y } else { tile_y };

            buffer[px as usize] = if full_palette {
                tile_pixel_8bpp(memory, tile_base, number, tx, ty, 0)
            } else {
                let palette = usize::from(entry >> 12);
                tile_pixel_4bpp(memory, tile_base, palette, number, tx, ty)
            };
        }
    }

    pub(super) fn render_affine(&mut self, id: usize) {
        // Affine backgrounds exist only as BG2 (affine index 0) and BG3 (1).
        let affine = id - 2;
        let registers = &self.registers;
        let memory = &self.memory;

        let pa = Registers::affine_parameter(registers.bgpa[affine]);
        let pc = Registers::affine_parameter(registers.bgpc[affine]);
        let ref_x = registers.bgx[affine].internal;
        let ref_y = registers.bgy[affine].internal;

        let tile_base = registers.bg_tile_base(id);
        let map_base = registers.bg_map_base(id);
        let wraparound = registers.bg_wraparound(id);

        // Screen size 0-3 select square fields of 128..1024 pixels.
        let size = 128_i32 << registers.bg_screen_size(id);
        let block_width = (size / 8) as usize;

        let buffer = &mut self.bg_lines[id];

        for px in 0..LCD_WIDTH as i32 {
            let mut x = (ref_x + px * pa) >> 8;
            let mut y = (ref_y + px * pc) >> 8;

            if wraparound {
                x = x.rem_euclid(size);
                y = y.rem_euclid(size);
            } else if x < 0 || x >= size || y < 0 || y >= size {
                buffer[px as usize] = TRANSPARENT;
                continue;
            }

            let number =
                usize::from(memory.video_ram[map_base + (y as usize / 8) * block_width + x as usize / 8]);

            buffer[px as usize] = tile_pixel_8bpp(
                memory,
                tile_base,
                number,
                (x % 8) as u32,
                (y % 8) as u32,
                0,
            );
        }
    }

    /// Mode 3: single 240x160 RGB555 bitmap.
    pub(super) fn render_bitmap_mode3(&mut self) {
        let line = usize::from(self.registers.vcount);
        let buffer = &mut self.bg_lines[2];

        let mut offset = line * LCD_WIDTH * 2;
        for pixel in buffer.iter_mut() {
            *pixel = u16::from_le_bytes([
                self.memory.video_ram[offset],
                self.memory.video_ram[offset + 1],
            ]) & 0x7FFF;
            offset += 2;
        }
    }

    /// Mode 4: 240x160 8bpp indexed bitmap with page flipping.
    pub(super) fn render_bitmap_mode4(&mut self) {
        let line = usize::from(self.registers.vcount);
        let page = if self.registers.frame_select() { 0xA000 } else { 0 };
        let buffer = &mut self.bg_lines[2];

        let offset = page + line * LCD_WIDTH;
        for (px, pixel) in buffer.iter_mut().enumerate() {
            let index = usize::from(self.memory.video_ram[offset + px]);
            *pixel = if index == 0 {
                TRANSPARENT
            } else {
                self.memory.palette_color(index) & 0x7FFF
            };
        }
    }

    /// Mode 5: 160x128 RGB555 bitmap with page flipping.
    pub(super) fn render_bitmap_mode5(&mut self) {
        let line = usize::from(self.registers.vcount);
        let page = if self.registers.frame_select() { 0xA000 } else { 0 };
        let buffer = &mut self.bg_lines[2];

        if line >= 128 {
            buffer.fill(TRANSPARENT);
            return;
        }

        let mut offset = page + line * 160 * 2;
        for (px, pixel) in buffer.iter_mut().enumerate() {
            if px < 160 {
                *pixel = u16::from_le_bytes([
                    self.memory.video_ram[offset],
                    self.memory.video_ram[offset + 1],
                ]) & 0x7FFF;
                offset += 2;
            } else {
                *pixel = TRANSPARENT;
            }
        }
    }
}

/// Samples one 4bpp tile pixel; `palette` selects the 16-color bank.
pub(super) fn tile_pixel_4bpp(
    memory: &Memory,
    tile_base: usize,
    palette: usize,
    number: usize,
    x: u32,
    y: u32,
) -> u16 {
    let offset = tile_base + number * 32 + y as usize * 4 + x as usize / 2;
    let pair = memory.video_ram.get(offset).copied().unwrap_or(0);
    let index = if x % 2 == 0 { pair & 0xF } else { pair >> 4 };

    if index == 0 {
        TRANSPARENT
    } else {
        memory.palette_color(palette * 16 + usize::from(index)) & 0x7FFF
    }
}

/// Samples one 8bpp tile pixel; `palette_base` is 0 for backgrounds and 256
/// for objects.
pub(super) fn tile_pixel_8bpp(
    memory: &Memory,
    tile_base: usize,
    number: usize,
    x: u32,
    y: u32,
    palette_base: usize,
) -> u16 {
    let offset = tile_base + number * 64 + y as usize * 8 + x as usize;
    // A tile number can point past the character data; the fetch comes back
    // empty on hardware.
    let index = usize::from(memory.video_ram.get(offset).copied().unwrap_or(0));

    if index == 0 {
        TRANSPARENT
    } else {
        memory.palette_color(palette_base + index) & 0x7FFF
    }
}
