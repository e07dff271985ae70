// tests/common/mod.rs — Synthetic artworks and photo distortions shared by
// the integration tests.

#![allow(dead_code)]

use std::io::Cursor;

use image::{GrayImage, ImageFormat, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::rect::Rect;

pub const SIZE: u32 = 320;

/// Small deterministic generator so scenes are reproducible.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407))
    }

    pub fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    /// Uniform in `lo..hi`.
    pub fn range(&mut self, lo: u32, hi: u32) -> u32 {
        lo + self.next() % (hi - lo)
    }
}

/// A "painting": a seeded wavy background under overlapping rectangles and
/// discs. Different seeds give unrelated compositions.
pub fn painting(seed: u64) -> GrayImage {
    let mut rng = Lcg::new(seed);
    let fx = 5.0 + rng.range(0, 40) as f32 / 10.0;
    let fy = 4.0 + rng.range(0, 40) as f32 / 10.0;
    let phase = rng.range(0, 628) as f32 / 100.0;

    let mut img = GrayImage::from_fn(SIZE, SIZE, |x, y| {
        let (xf, yf) = (x as f32, y as f32);
        let v = 128.0
            + 45.0 * (xf / fx + phase).sin() * (yf / fy).cos()
            + 25.0 * ((xf + yf) / 13.0 + phase).sin();
        Luma([v.clamp(0.0, 255.0) as u8])
    });

    for _ in 0..70 {
        let x = rng.range(0, SIZE - 12) as i32;
        let y = rng.range(0, SIZE - 12) as i32;
        let w = rng.range(8, 60);
        let h = rng.range(8, 60);
        let v = rng.range(0, 256) as u8;
        draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(w, h), Luma([v]));
    }
    for _ in 0..40 {
        let cx = rng.range(0, SIZE) as i32;
        let cy = rng.range(0, SIZE) as i32;
        let r = rng.range(4, 25) as i32;
        let v = rng.range(0, 256) as u8;
        draw_filled_circle_mut(&mut img, (cx, cy), r, Luma([v]));
    }
    img
}

/// Per-pixel uniform noise: plenty of corners, nothing to recognize.
pub fn noise(seed: u64) -> GrayImage {
    let mut rng = Lcg::new(seed);
    GrayImage::from_fn(SIZE, SIZE, |_, _| Luma([rng.range(0, 256) as u8]))
}

/// A handheld re-photograph: rotated about the center, then brightened.
pub fn rephotograph(img: &GrayImage, degrees: f32, brighten: i32) -> GrayImage {
    let rotated = rotate_about_center(img, degrees.to_radians(), Interpolation::Bilinear, Luma([0u8]));
    image::imageops::brighten(&rotated, brighten)
}

pub fn png_bytes(img: &GrayImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).expect("png encode");
    buf.into_inner()
}
