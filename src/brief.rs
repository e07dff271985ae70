// brief.rs — Intensity-centroid orientation and steered BRIEF descriptors.
//
// Reference: Rublee et al., "ORB: an efficient alternative to SIFT or SURF"
// (ICCV 2011); Calonder et al., "BRIEF: Binary Robust Independent
// Elementary Features" (ECCV 2010).
//
// Orientation:
//   m10 = Σ x·I(x, y),  m01 = Σ y·I(x, y)  over a disc of radius r
//   θ = atan2(m01, m10)
//
// Descriptor:
//   256 point pairs (p, q) drawn once from an isotropic distribution around
//   the keypoint. Each pair is rotated by θ, and bit i is 1 iff
//   I(R·p_i) < I(R·q_i) on the Gaussian-smoothed level.
//
// The sampling pattern comes from a seeded xorshift generator using only
// integer arithmetic, so every build on every platform produces the same
// pattern and therefore comparable descriptors.
//
// NEW RUST CONCEPTS:
// - `[[i8; 2]; 2]` fixed-size nested arrays: the whole pattern is a flat
//   512-byte value with no heap indirection per pair.

use crate::descriptor::{Descriptor, DESCRIPTOR_BITS, DESCRIPTOR_BYTES};
use crate::image::Image;

/// Seed of the sampling pattern. Changing it invalidates every corpus.
pub const PATTERN_SEED: u64 = 0x0B1E_F256;

/// Largest coordinate magnitude of an unrotated test point.
const PATTERN_RADIUS: i32 = 13;

/// Largest pixel offset any rotated test point can reach from the keypoint
/// (13·√2 ≈ 18.4 rounds to at most 18 per axis, plus one pixel of slack).
pub const PATTERN_REACH: usize = 19;

const NUM_PAIRS: usize = DESCRIPTOR_BITS as usize;

// ---------------------------------------------------------------------------
// Deterministic random number generator (xorshift64)
// ---------------------------------------------------------------------------

/// Minimal xorshift64 generator. Integer-only, so its output is identical
/// on every platform.
pub(crate) struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub(crate) fn new(seed: u64) -> Self {
        SimpleRng { state: seed.max(1) }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Random index in [0, n).
    pub(crate) fn next_usize(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }

    /// Uniform integer in [-r, r].
    fn next_symmetric(&mut self, r: i32) -> i32 {
        (self.next_u64() % (2 * r as u64 + 1)) as i32 - r
    }
}

// ---------------------------------------------------------------------------
// Sampling pattern
// ---------------------------------------------------------------------------

/// The 256 BRIEF test pairs, as `[[px, py], [qx, qy]]` offsets.
#[derive(Clone)]
pub struct BriefPattern {
    pairs: Box<[[[i8; 2]; 2]; NUM_PAIRS]>,
}

impl BriefPattern {
    /// Generate the pattern from `seed`.
    ///
    /// Each coordinate is the sum of two uniform draws in [-7, 7] (a
    /// triangular distribution peaked at the keypoint, a cheap stand-in for
    /// the Gaussian of the BRIEF paper), clamped to the pattern radius.
    /// Degenerate pairs with p == q are redrawn.
    pub fn generate(seed: u64) -> Self {
        let mut rng = SimpleRng::new(seed);
        let coord = |rng: &mut SimpleRng| -> i8 {
            (rng.next_symmetric(7) + rng.next_symmetric(7)).clamp(-PATTERN_RADIUS, PATTERN_RADIUS) as i8
        };

        let mut pairs = Box::new([[[0i8; 2]; 2]; NUM_PAIRS]);
        for pair in pairs.iter_mut() {
            loop {
                let p = [coord(&mut rng), coord(&mut rng)];
                let q = [coord(&mut rng), coord(&mut rng)];
                if p != q {
                    *pair = [p, q];
                    break;
                }
            }
        }
        BriefPattern { pairs }
    }

    /// Pattern as raw bytes (px, py, qx, qy per pair), for fingerprinting.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.pairs.iter().flatten().flatten().map(|&v| v as u8).collect()
    }

    /// Compute the steered descriptor at (x, y) on a smoothed level.
    ///
    /// # Panics
    /// Panics if (x, y) is closer than `PATTERN_REACH` to an image edge.
    pub fn describe(&self, smoothed: &Image<u8>, x: usize, y: usize, angle: f32) -> Descriptor {
        assert!(
            x >= PATTERN_REACH
                && y >= PATTERN_REACH
                && x + PATTERN_REACH < smoothed.width()
                && y + PATTERN_REACH < smoothed.height(),
            "keypoint ({x},{y}) too close to the border of a {}×{} level",
            smoothed.width(),
            smoothed.height(),
        );

        let (sin, cos) = angle.sin_cos();
        let sample = |[dx, dy]: [i8; 2]| -> u8 {
            let (dx, dy) = (dx as f32, dy as f32);
            let rx = (dx * cos - dy * sin).round() as isize;
            let ry = (dx * sin + dy * cos).round() as isize;
            // SAFETY: |rx|, |ry| < PATTERN_REACH, and the assert above keeps
            // (x, y) at least PATTERN_REACH from every edge.
            unsafe { smoothed.get_unchecked((x as isize + rx) as usize, (y as isize + ry) as usize) }
        };

        let mut desc = [0u8; DESCRIPTOR_BYTES];
        for (i, &[p, q]) in self.pairs.iter().enumerate() {
            if sample(p) < sample(q) {
                desc[i / 8] |= 1 << (i % 8);
            }
        }
        desc
    }
}

impl Default for BriefPattern {
    fn default() -> Self {
        Self::generate(PATTERN_SEED)
    }
}

// ---------------------------------------------------------------------------
// Orientation
// ---------------------------------------------------------------------------

/// Orientation of the patch around (x, y) by intensity centroid, in
/// radians in (-π, π]. Pixels of the disc that fall outside the image are
/// skipped.
pub fn centroid_angle(image: &Image<u8>, x: usize, y: usize, radius: usize) -> f32 {
    let r = radius as isize;
    let r2 = r * r;
    let (mut m10, mut m01) = (0.0f64, 0.0f64);

    for dy in -r..=r {
        let py = y as isize + dy;
        if py < 0 || py >= image.height() as isize {
            continue;
        }
        let row = image.row(py as usize);
        for dx in -r..=r {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let px = x as isize + dx;
            if px < 0 || px >= image.width() as isize {
                continue;
            }
            let v = row[px as usize] as f64;
            m10 += dx as f64 * v;
            m01 += dy as f64 * v;
        }
    }

    m01.atan2(m10) as f32
}
