// gradient.rs — Sobel image gradients for the Harris re-scoring step.
//
// Sobel kernels are separable:
//   Sobel_x: row [-1, 0, 1] (derivative along x), col [1, 2, 1] (smoothing)
//   Sobel_y: row [ 1, 2, 1] (smoothing),          col [-1, 0, 1] (derivative)
//
// Border handling (clamp) comes from convolution.rs.

use crate::convolution::convolve_separable;
use crate::image::{Image, Pixel};

const SOBEL_DERIV: [f32; 3] = [-1.0, 0.0, 1.0];
const SOBEL_SMOOTH: [f32; 3] = [1.0, 2.0, 1.0];

/// Horizontal and vertical Sobel responses of one pyramid level.
pub struct Gradients {
    /// ∂I/∂x, positive when intensity increases to the right.
    pub ix: Image<f32>,
    /// ∂I/∂y, positive when intensity increases downward.
    pub iy: Image<f32>,
}

impl Gradients {
    /// Compute both Sobel gradients of `src`.
    ///
    /// Output is unnormalized (roughly [-1020, 1020] for u8 input).
    pub fn sobel<T: Pixel>(src: &Image<T>) -> Self {
        Gradients {
            ix: convolve_separable(src, &SOBEL_DERIV, &SOBEL_SMOOTH),
            iy: convolve_separable(src, &SOBEL_SMOOTH, &SOBEL_DERIV),
        }
    }

    /// Sums of Ix², Iy² and Ix·Iy over the square window of half-size
    /// `half` centered at (x, y): the entries of the structure tensor.
    ///
    /// The window is clipped to the image.
    pub fn structure_tensor(&self, x: usize, y: usize, half: usize) -> (f32, f32, f32) {
        let w = self.ix.width();
        let h = self.ix.height();
        let (mut sxx, mut syy, mut sxy) = (0.0f32, 0.0f32, 0.0f32);
        for wy in y.saturating_sub(half)..(y + half + 1).min(h) {
            for wx in x.saturating_sub(half)..(x + half + 1).min(w) {
                let gx = self.ix.get(wx, wy);
                let gy = self.iy.get(wx, wy);
                sxx += gx * gx;
                syy += gy * gy;
                sxy += gx * gy;
            }
        }
        (sxx, syy, sxy)
    }
}
