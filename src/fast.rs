// fast.rs — FAST-N corner detector (Features from Accelerated Segment Test).
//
// Reference: Rosten & Drummond, "Machine learning for high-speed corner
// detection" (ECCV 2006).
//
// Algorithm:
//   For each pixel, sample 16 points on a Bresenham circle of radius 3.
//   Classify each as BRIGHTER, DARKER, or SIMILAR relative to the center ±
//   threshold. A corner exists if ≥ N contiguous circle pixels are all
//   BRIGHTER or all DARKER (the run may wrap from index 15 to index 0).
//
// The extractor runs this on every pyramid level with a border wide enough
// that the orientation patch and the rotated BRIEF tests of every surviving
// corner stay inside the level.

use crate::image::Image;

/// Bresenham circle of radius 3: 16 (dx, dy) offsets, clockwise from 12 o'clock.
const CIRCLE_OFFSETS: [(isize, isize); 16] = [
    ( 0, -3), ( 1, -3), ( 2, -2), ( 3, -1),
    ( 3,  0), ( 3,  1), ( 2,  2), ( 1,  3),
    ( 0,  3), (-1,  3), (-2,  2), (-3,  1),
    (-3,  0), (-3, -1), (-2, -2), (-1, -3),
];

/// Minimum border any caller can ask for: the circle radius.
pub const MIN_BORDER: usize = 3;

/// A FAST corner in the coordinates of the level it was detected on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub x: usize,
    pub y: usize,
    /// Sum of (|circle[i] - center| - threshold) over the best arc.
    /// Higher = stronger corner.
    pub score: f32,
}

/// FAST-N corner detector.
#[derive(Debug, Clone)]
pub struct FastDetector {
    /// Intensity difference threshold. Typical: 20 for u8 images.
    pub threshold: u8,
    /// Minimum number of contiguous circle pixels required, in [9, 12].
    pub arc_length: usize,
}

impl FastDetector {
    /// Create a new FAST detector.
    ///
    /// # Panics
    /// Panics if `arc_length` is not in the range [9, 12].
    pub fn new(threshold: u8, arc_length: usize) -> Self {
        assert!(
            (9..=12).contains(&arc_length),
            "arc_length must be 9..=12 (got {arc_length})"
        );
        FastDetector {
            threshold,
            arc_length,
        }
    }

    /// Detect corners at least `border` pixels away from every image edge.
    ///
    /// Corners are returned in raster order (row by row), which keeps the
    /// output deterministic. `border` is raised to `MIN_BORDER` if smaller.
    pub fn detect(&self, image: &Image<u8>, border: usize) -> Vec<Corner> {
        let border = border.max(MIN_BORDER);
        let w = image.width();
        let h = image.height();
        let mut corners = Vec::new();

        if w <= 2 * border || h <= 2 * border {
            return corners;
        }

        let thresh = self.threshold as i16;
        let min_cardinals: u8 = if self.arc_length >= 12 { 3 } else { 2 };
        let at = |x: usize, y: usize, (dx, dy): (isize, isize)| -> i16 {
            // SAFETY: x, y lie in [border, dim - border) with border >= 3
            // and every circle offset is at most ±3.
            unsafe {
                image.get_unchecked((x as isize + dx) as usize, (y as isize + dy) as usize) as i16
            }
        };

        for y in border..(h - border) {
            for x in border..(w - border) {
                let center = at(x, y, (0, 0));

                // High-speed test on the 4 cardinal points.
                let cardinals = [
                    at(x, y, CIRCLE_OFFSETS[0]),
                    at(x, y, CIRCLE_OFFSETS[4]),
                    at(x, y, CIRCLE_OFFSETS[8]),
                    at(x, y, CIRCLE_OFFSETS[12]),
                ];
                let bright = cardinals.iter().filter(|&&p| p > center + thresh).count() as u8;
                let dark = cardinals.iter().filter(|&&p| p < center - thresh).count() as u8;
                if bright < min_cardinals && dark < min_cardinals {
                    continue;
                }

                let mut circle = [0i16; 16];
                for (i, &off) in CIRCLE_OFFSETS.iter().enumerate() {
                    circle[i] = at(x, y, off);
                }

                if let Some(score) = self.corner_score(center, &circle, thresh) {
                    corners.push(Corner { x, y, score });
                }
            }
        }

        corners
    }

    /// Score a candidate, or `None` if no arc of `arc_length` contiguous
    /// brighter/darker pixels exists.
    ///
    /// Bitmask approach: bit i of `bright`/`dark` is set when circle[i]
    /// passes the threshold. Doubling the mask into a u32 handles the
    /// wrap-around, and AND-shifting it N-1 times leaves a nonzero value
    /// only if a run of N set bits exists.
    fn corner_score(&self, center: i16, circle: &[i16; 16], thresh: i16) -> Option<f32> {
        let mut bright: u16 = 0;
        let mut dark: u16 = 0;
        for (i, &v) in circle.iter().enumerate() {
            let diff = v - center;
            if diff > thresh {
                bright |= 1 << i;
            } else if diff < -thresh {
                dark |= 1 << i;
            }
        }

        let mut best: Option<f32> = None;
        for mask in [bright, dark] {
            if (mask.count_ones() as usize) < self.arc_length || !has_run(mask, self.arc_length) {
                continue;
            }
            let score = best_arc_score(center, circle, thresh, mask);
            best = Some(best.map_or(score, |b: f32| b.max(score)));
        }
        best
    }
}

/// True if the circular 16-bit mask contains `n` contiguous set bits.
#[inline]
fn has_run(mask: u16, n: usize) -> bool {
    let mut acc = (mask as u32) | ((mask as u32) << 16);
    for _ in 1..n {
        acc &= acc >> 1;
    }
    acc != 0
}

/// Score of the longest contiguous arc in a circular mask. Only called
/// for confirmed corners (rare path).
fn best_arc_score(center: i16, circle: &[i16; 16], thresh: i16, mask: u16) -> f32 {
    let m32 = (mask as u32) | ((mask as u32) << 16);
    let mut best_start = 0usize;
    let mut best_len = 0usize;
    let mut i = 0u32;
    while i < 16 {
        if m32 & (1 << i) == 0 {
            i += 1;
            continue;
        }
        let start = i;
        while i < 32 && (m32 & (1 << i)) != 0 {
            i += 1;
        }
        let run_len = ((i - start) as usize).min(16);
        if run_len > best_len {
            best_len = run_len;
            best_start = start as usize;
        }
    }

    (best_start..best_start + best_len)
        .map(|j| ((circle[j % 16] - center).abs() - thresh).max(0) as f32)
        .sum()
}
