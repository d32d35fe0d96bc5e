//! Object (sprite) scanline renderer.
//!
//! OAM holds 128 entries of three attribute halfwords each; the fourth
//! halfword of every entry belongs to the interleaved affine parameter
//! groups (one 2x2 matrix per 32 bytes). Entries are walked in descending
//! index order so that lower indices end up on top among objects of equal
//! priority. Object pixels land in one line buffer per priority level;
//! semi-transparent and object-window pixels additionally set their column
//! masks.

use super::backgrounds::{tile_pixel_4bpp, tile_pixel_8bpp};
use super::memory::Memory;
use super::{LCD_WIDTH, TRANSPARENT};
use crate::bitwise::{Bits, sign_extend};

/// (width, height) for shape (square/horizontal/vertical) x size.
const OBJ_SIZE: [[(i32, i32); 4]; 3] = [
    [(8, 8), (16, 16), (32, 32), (64, 64)],
    [(16, 8), (32, 8), (32, 16), (64, 32)],
    [(8, 16), (8, 32), (16, 32), (32, 64)],
];

const MODE_SEMI_TRANSPARENT: u16 = 1;
const MODE_OBJ_WINDOW: u16 = 2;
const MODE_PROHIBITED: u16 = 3;

/// Object tiles live in the upper 32 KiB of VRAM.
const OBJ_TILE_BASE: usize = 0x10000;

impl super::Lcd {
    pub(super) fn render_objects(&mut self) {
        let line = i32::from(self.registers.vcount);
        let one_dimensional = self.registers.obj_one_dimensional();
        // In bitmap modes the lower half of object VRAM belongs to the
        // framebuffer; tiles 0-511 are not usable.
        let min_tile = if self.registers.bg_mode() >= 3 { 512 } else { 0 };

        for index in (0..128).rev() {
            let offset = index * 8;
            let attr0 = oam_halfword(&self.memory, offset);
            let attr1 = oam_halfword(&self.memory, offset + 2);
            let attr2 = oam_halfword(&self.memory, offset + 4);

            let mode = attr0.get_bits(10..=11);
            if mode == MODE_PROHIBITED {
                continue;
            }

            let affine = attr0.get_bit(8);
            let double_size_or_disable = attr0.get_bit(9);
            if !affine && double_size_or_disable {
                continue;
            }

            let shape = usize::from(attr0.get_bits(14..=15));
            if shape == 3 {
                continue;
            }
            let size = usize::from(attr1.get_bits(14..=15));
            let (width, height) = OBJ_SIZE[shape][size];

            // Coordinates wrap: X is 9 bits, Y is 8 bits.
            let mut x = i32::from(attr1.get_bits(0..=8));
            let mut y = i32::from(attr0.get_bits(0..=7));
            if x >= 240 {
                x -= 512;
            }
            if y >= 160 {
                y -= 256;
            }

            // Sample around the object's center; double-size affine objects
            // render into a rectangle twice as large.
            let (rect_width, rect_height) = if affine && double_size_or_disable {
                (width * 2, height * 2)
            } else {
                (width, height)
            };
            let center_x = x + rect_width / 2;
            let center_y = y + rect_height / 2;

            if line < center_y - rect_height / 2 || line >= center_y + rect_height / 2 {
                continue;
            }

            let (pa, pb, pc, pd) = if affine {
                let group = usize::from(attr1.get_bits(9..=13)) * 32;
                (
                    affine_parameter(&self.memory, group + 0x06),
                    affine_parameter(&self.memory, group + 0x0E),
                    affine_parameter(&self.memory, group + 0x16),
                    affine_parameter(&self.memory, group + 0x1E),
                )
            } else {
                // Identity matrix in 1.7.8 fixed point.
                (0x100, 0, 0, 0x100)
            };

            let priority = usize::from(attr2.get_bits(10..=11));
            let number = usize::from(attr2.get_bits(0..=9));
            let palette = usize::from(attr2.get_bits(12..=15));
            let full_palette = attr0.get_bit(13);
            let h_flip = !affine && attr1.get_bit(12);
            let v_flip = !affine && attr1.get_bit(13);

            // 8bpp tiles occupy two tile slots.
            let number = if full_palette { number >> 1 } else { number };

            let rect_y = line - center_y;

            for rect_x in -rect_width / 2..rect_width / 2 {
                let screen_x = center_x + rect_x;
                if !(0..LCD_WIDTH as i32).contains(&screen_x) {
                    continue;
                }

                // Texture coordinates through the (possibly identity)
                // affine matrix, in 8 fractional bits.
                let mut tex_x = (pa * rect_x + pb * rect_y) >> 8;
                let mut tex_y = (pc * rect_x + pd * rect_y) >> 8;
                tex_x += width / 2;
                tex_y += height / 2;

                if !(0..width).contains(&tex_x) || !(0..height).contains(&tex_y) {
                    continue;
                }

                if h_flip {
                    tex_x = width - 1 - tex_x;
                }
                if v_flip {
                    tex_y = height - 1 - tex_y;
                }

                let block_x = (tex_x / 8) as usize;
                let block_y = (tex_y / 8) as usize;

                // Tile slots count 32-byte units for 4bpp and 64-byte units
                // for 8bpp (the char name was already halved above).
                let mut tile = number;
                if one_dimensional {
                    tile += block_y * (width / 8) as usize;
                } else {
                    // 2D mapping: a fixed 32-slot-wide (16 in 8bpp) matrix.
                    tile += block_y * if full_palette { 16 } else { 32 };
                }
                tile += block_x;

                if tile * if full_palette { 64 } else { 32 } < min_tile * 32 {
                    continue;
                }

                let pixel = if full_palette {
                    tile_pixel_8bpp(
                        &self.memory,
                        OBJ_TILE_BASE,
                        tile,
                        (tex_x % 8) as u32,
                        (tex_y % 8) as u32,
                        256,
                    )
                } else {
                    obj_tile_pixel_4bpp(
                        &self.memory,
                        palette,
                        tile,
                        (tex_x % 8) as u32,
                        (tex_y % 8) as u32,
                    )
                };

                if pixel == TRANSPARENT {
                    continue;
                }

                let screen_x = screen_x as usize;
                if mode == MODE_OBJ_WINDOW {
                    self.obj_window_line[screen_x] = true;
                } else {
                    if mode == MODE_SEMI_TRANSPARENT {
                        self.obj_semi_line[screen_x] = true;
                    } else {
                        self.obj_semi_line[screen_x] = false;
                    }
                    self.obj_lines[priority][screen_x] = pixel;
                }
            }
        }
    }
}

fn oam_halfword(memory: &Memory, offset: usize) -> u16 {
    u16::from_le_bytes([memory.obj_attributes[offset], memory.obj_attributes[offset + 1]])
}

/// One 1.7.8 fixed-point affine parameter from an OAM group.
fn affine_parameter(memory: &Memory, offset: usize) -> i32 {
    sign_extend(u32::from(oam_halfword(memory, offset)), 16)
}

/// 4bpp object pixel; object palettes live in the upper palette half.
fn obj_tile_pixel_4bpp(memory: &Memory, palette: usize, tile: usize, x: u32, y: u32) -> u16 {
    tile_pixel_4bpp(memory, OBJ_TILE_BASE, 16 + palette, tile, x, y)
}
