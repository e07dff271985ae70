// convolution.rs — Separable 1D convolution and Gaussian smoothing.
//
// Two consumers:
//   gradient.rs → Sobel derivatives for the Harris re-scoring
//   orb.rs      → 7×7, σ=2 Gaussian smoothing of each pyramid level before
//                 the BRIEF intensity tests (single-pixel tests on a raw
//                 image are far too noise sensitive)
//
// A 2D convolution with a separable kernel K = k_col * k_row^T decomposes
// into two 1D passes, reducing cost from O(k²) to O(2k) per pixel.
//
// BORDER HANDLING: Clamp (replicate edge pixels).

use crate::image::{Image, Pixel};

/// Which direction a 1D pass runs along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Horizontal,
    Vertical,
}

/// Run one clamped 1D pass along `axis`.
///
/// The interior (where the kernel never leaves the image) uses unchecked
/// access; only the `half`-wide border bands pay for clamping.
fn convolve_axis<T: Pixel>(src: &Image<T>, kernel: &[f32], axis: Axis) -> Image<f32> {
    assert!(!kernel.is_empty(), "kernel must not be empty");
    assert!(kernel.len() % 2 == 1, "kernel length must be odd (got {})", kernel.len());

    let w = src.width();
    let h = src.height();
    let half = kernel.len() / 2;
    let mut dst = Image::<f32>::new(w, h);
    if w == 0 || h == 0 {
        return dst;
    }

    let extent = match axis {
        Axis::Horizontal => w,
        Axis::Vertical => h,
    };

    for y in 0..h {
        for x in 0..w {
            let pos = match axis {
                Axis::Horizontal => x,
                Axis::Vertical => y,
            };
            let mut acc = 0.0f32;
            if pos >= half && pos + half < extent {
                // SAFETY: pos - half >= 0 and pos + half < extent.
                unsafe {
                    for (ki, &kv) in kernel.iter().enumerate() {
                        let s = pos + ki - half;
                        let v = match axis {
                            Axis::Horizontal => src.get_unchecked(s, y),
                            Axis::Vertical => src.get_unchecked(x, s),
                        };
                        acc += v.to_f32() * kv;
                    }
                }
            } else {
                for (ki, &kv) in kernel.iter().enumerate() {
                    let s = (pos as isize + ki as isize - half as isize)
                        .clamp(0, (extent - 1) as isize) as usize;
                    let v = match axis {
                        Axis::Horizontal => src.get(s, y),
                        Axis::Vertical => src.get(x, s),
                    };
                    acc += v.to_f32() * kv;
                }
            }
            // SAFETY: loop bounds.
            unsafe { dst.set_unchecked(x, y, acc); }
        }
    }
    dst
}

/// Convolve each row of `src` with a 1D kernel (horizontal pass).
pub fn convolve_rows<T: Pixel>(src: &Image<T>, kernel: &[f32]) -> Image<f32> {
    convolve_axis(src, kernel, Axis::Horizontal)
}

/// Convolve each column of `src` with a 1D kernel (vertical pass).
pub fn convolve_cols(src: &Image<f32>, kernel: &[f32]) -> Image<f32> {
    convolve_axis(src, kernel, Axis::Vertical)
}

/// Full separable 2D convolution: horizontal pass then vertical pass.
///
/// # Panics
/// Panics if either kernel is empty or has even length.
pub fn convolve_separable<T: Pixel>(
    src: &Image<T>,
    kernel_row: &[f32],
    kernel_col: &[f32],
) -> Image<f32> {
    let intermediate = convolve_rows(src, kernel_row);
    convolve_cols(&intermediate, kernel_col)
}

/// Generate a 1D Gaussian kernel of length `2 * half_size + 1`, normalized
/// so the coefficients sum to 1.0.
///
/// ```
/// let k = lensa::convolution::gaussian_kernel_1d(3, 2.0);
/// assert_eq!(k.len(), 7);
/// assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-6);
/// ```
pub fn gaussian_kernel_1d(half_size: usize, sigma: f32) -> Vec<f32> {
    assert!(sigma > 0.0, "sigma must be positive");
    let len = 2 * half_size + 1;
    let two_sigma_sq = 2.0 * sigma * sigma;

    let mut kernel: Vec<f32> = (0..len)
        .map(|i| {
            let x = i as f32 - half_size as f32;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();

    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Gaussian-smooth an 8-bit image and round back to 8 bits.
pub fn gaussian_blur_u8(src: &Image<u8>, half_size: usize, sigma: f32) -> Image<u8> {
    let kernel = gaussian_kernel_1d(half_size, sigma);
    convolve_separable(src, &kernel, &kernel).convert()
}
