// pyramid.rs — Scale pyramid with a non-integer scale factor.
//
// Scale tolerance comes from detecting on every level: an artwork filmed
// from twice as far away shows up at roughly level log(2)/log(1.2) ≈ 4 of
// the reference pyramid. A factor of 2 (the classic octave pyramid) would
// leave big gaps between levels; 1.2 keeps neighbouring levels close enough
// for FAST to fire on the same structures.
//
// Algorithm at each level:
//   1. Target size = round(size_0 / factor^level)
//   2. Bilinear resample of the previous level (pixel-center aligned)
//   3. Stop once a level is smaller than `min_size` in either dimension
//
// Levels are stored as 8-bit luma because FAST, the centroid orientation
// and the BRIEF tests all compare raw intensities.

use crate::image::{interpolate_bilinear, Image};

/// A scale pyramid.
///
/// `levels[0]` is the original resolution; `levels[n]` is about
/// `size / scale_factor^n`. `scales[n]` maps level-n coordinates back to
/// level 0 (`x0 = xn * scales[n]`).
pub struct Pyramid {
    /// Pyramid levels, from finest (index 0) to coarsest.
    pub levels: Vec<Image<u8>>,
    /// Per-level scale relative to level 0.
    pub scales: Vec<f32>,
}

impl Pyramid {
    /// Build a pyramid of at most `num_levels` levels.
    ///
    /// Levels whose width or height would fall below `min_size` are not
    /// built, so the result may hold fewer levels than requested (but
    /// always at least level 0).
    pub fn build(src: &Image<u8>, num_levels: usize, scale_factor: f32, min_size: usize) -> Self {
        assert!(num_levels >= 1, "pyramid must have at least 1 level");
        assert!(scale_factor > 1.0, "scale_factor must be > 1.0 (got {scale_factor})");

        let mut levels = Vec::with_capacity(num_levels);
        let mut scales = Vec::with_capacity(num_levels);
        let mut prev = src.clone();
        scales.push(1.0f32);

        for level in 1..num_levels {
            let scale = scale_factor.powi(level as i32);
            let new_w = (src.width() as f32 / scale).round() as usize;
            let new_h = (src.height() as f32 / scale).round() as usize;
            if new_w < min_size || new_h < min_size {
                break;
            }
            let next = resize_bilinear(&prev, new_w, new_h);
            levels.push(std::mem::replace(&mut prev, next));
            scales.push(scale);
        }
        levels.push(prev);

        Pyramid { levels, scales }
    }

    /// Number of pyramid levels actually built.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Get a reference to a specific level.
    pub fn level(&self, level: usize) -> &Image<u8> {
        &self.levels[level]
    }
}

/// Resample `src` to `new_w × new_h` with bilinear interpolation.
///
/// Pixel centers are aligned: destination pixel x samples source
/// coordinate `(x + 0.5) * ratio - 0.5`.
fn resize_bilinear(src: &Image<u8>, new_w: usize, new_h: usize) -> Image<u8> {
    let srcf: Image<f32> = src.convert();
    let rx = src.width() as f32 / new_w as f32;
    let ry = src.height() as f32 / new_h as f32;

    let mut dst = Image::<f32>::new(new_w, new_h);
    for y in 0..new_h {
        let sy = (y as f32 + 0.5) * ry - 0.5;
        for x in 0..new_w {
            let sx = (x as f32 + 0.5) * rx - 0.5;
            // SAFETY: x < new_w, y < new_h.
            unsafe { dst.set_unchecked(x, y, interpolate_bilinear(&srcf, sx, sy)); }
        }
    }
    dst.convert()
}
