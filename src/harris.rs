// harris.rs — Harris corner measure, evaluated only at FAST candidates.
//
// FAST's arc score says a pixel is different from its ring; it does not say
// whether the structure is a true 2D corner or a thick edge. The extractor
// over-collects FAST corners (twice the level budget) and ranks them by the
// Harris response instead, which is what keeps strong edges from eating the
// budget.
//
// For a window W around (x, y):
//   M = Σ_W [[Ix², Ix·Iy], [Ix·Iy, Iy²]]
//   R = det(M) - k·trace(M)²
// Positive R → corner, negative R → edge, near-zero R → flat.
//
// NEW RUST CONCEPTS:
// - `impl Iterator` as an argument: the caller can pass a Vec iterator,
//   a filtered adapter, or a mapped slice without allocating.

use crate::gradient::Gradients;

/// Harris parameters.
#[derive(Debug, Clone, Copy)]
pub struct HarrisScorer {
    /// Sensitivity to edges. Typical range: 0.04–0.06.
    pub k: f32,
    /// Half-size of the box window (3 → 7×7).
    pub block_half: usize,
}

impl Default for HarrisScorer {
    fn default() -> Self {
        HarrisScorer { k: 0.04, block_half: 3 }
    }
}

impl HarrisScorer {
    pub fn new(k: f32, block_half: usize) -> Self {
        HarrisScorer { k, block_half }
    }

    /// Harris response at a single pixel.
    pub fn response_at(&self, grads: &Gradients, x: usize, y: usize) -> f32 {
        let (a, b, c) = grads.structure_tensor(x, y, self.block_half);
        let det = a * b - c * c;
        let trace = a + b;
        det - self.k * trace * trace
    }

    /// Harris responses at each (x, y) yielded by `points`, in order.
    pub fn score_points(
        &self,
        grads: &Gradients,
        points: impl Iterator<Item = (usize, usize)>,
    ) -> Vec<f32> {
        points.map(|(x, y)| self.response_at(grads, x, y)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    /// Bright square on a dark background: corners at (lo, lo), (hi, lo), ...
    fn make_square(size: usize, lo: usize, hi: usize) -> Image<u8> {
        let mut img = Image::<u8>::new(size, size);
        for y in lo..hi {
            for x in lo..hi {
                img.set(x, y, 200);
            }
        }
        img
    }

    #[test]
    fn test_corner_beats_edge_and_flat() {
        let img = make_square(40, 10, 30);
        let grads = Gradients::sobel(&img);
        let h = HarrisScorer::default();

        let corner = h.response_at(&grads, 10, 10);
        let edge = h.response_at(&grads, 20, 10);
        let flat = h.response_at(&grads, 20, 20);

        assert!(corner > 0.0, "corner response should be positive: {corner}");
        assert!(edge < 0.0, "edge response should be negative: {edge}");
        assert!(flat.abs() < 1e-3, "flat response should be ~0: {flat}");
        assert!(corner > edge);
    }

    #[test]
    fn test_score_points_keeps_order() {
        let img = make_square(40, 10, 30);
        let grads = Gradients::sobel(&img);
        let h = HarrisScorer::default();
        let scores = h.score_points(&grads, [(10, 10), (20, 20)].into_iter());
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_larger_k_penalises_edges_more() {
        let img = make_square(40, 10, 30);
        let grads = Gradients::sobel(&img);
        let lo = HarrisScorer::new(0.04, 3).response_at(&grads, 20, 10);
        let hi = HarrisScorer::new(0.06, 3).response_at(&grads, 20, 10);
        assert!(hi < lo);
    }
}
