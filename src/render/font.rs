//! Fixed 8x8 glyph stamping for overlay text.
//!
//! Uses the `font8x8` bitmap tables. Glyphs outside basic ASCII fall back
//! to `?`. Drawing clips at image bounds.

use font8x8::legacy::BASIC_LEGACY;
use image::{Rgb, RgbImage};

/// Glyph cell size in pixels.
pub const GLYPH_SIZE: u32 = 8;

/// Pixel width of a rendered string.
pub fn text_width(text: &str) -> u32 {
    text.chars().count() as u32 * GLYPH_SIZE
}

/// Stamp `text` with its top-left corner at `(origin_x, origin_y)`.
pub fn draw_text(img: &mut RgbImage, text: &str, origin_x: u32, origin_y: u32, color: Rgb<u8>) {
    let (img_w, img_h) = img.dimensions();
    let mut pen_x = origin_x;

    for ch in text.chars() {
        if pen_x >= img_w {
            break;
        }
        let glyph = glyph_for(ch);
        for (row_idx, row) in glyph.iter().enumerate() {
            let py = origin_y + row_idx as u32;
            if py >= img_h {
                break;
            }
            for bit in 0..GLYPH_SIZE {
                if row & (1 << bit) != 0 {
                    let px = pen_x + bit;
                    if px < img_w {
                        img.put_pixel(px, py, color);
                    }
                }
            }
        }
        pen_x += GLYPH_SIZE;
    }
}

fn glyph_for(ch: char) -> [u8; 8] {
    let idx = ch as usize;
    if idx < BASIC_LEGACY.len() {
        BASIC_LEGACY[idx]
    } else {
        BASIC_LEGACY[b'?' as usize]
    }
}
