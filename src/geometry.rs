// geometry.rs -- Geometric consistency check for a recognition candidate.
//
// A photo of a flat painting is, to a good approximation, a rotated,
// scaled and shifted copy of the reference image. Good descriptor matches
// on the right artwork therefore agree on one 4-DOF similarity transform:
//
//   [x']   [a  -b] [x]   [tx]
//   [y'] = [b   a] [y] + [ty]       (a = s·cos θ, b = s·sin θ)
//
// while accidental matches on the wrong artwork scatter. Two
// correspondences determine the transform exactly, so RANSAC samples
// pairs, counts matches that land within `threshold` pixels, and
// refits on the best consensus set by least squares.
//
// The verifier is a post-filter: the engine ranks candidates by match
// count first and asks the verifier about them in order.

use crate::brief::SimpleRng;
use crate::descriptor::DescriptorSet;
use crate::matcher::DescriptorMatch;

/// Accepts or rejects a candidate given its good matches.
pub trait GeometricVerifier: Send + Sync {
    /// `matches` index into `query` (query_idx) and `reference` (train_idx).
    fn verify(&self, query: &DescriptorSet, reference: &DescriptorSet, matches: &[DescriptorMatch]) -> bool;
}

/// No geometric check: every candidate is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl GeometricVerifier for AcceptAll {
    fn verify(&self, _: &DescriptorSet, _: &DescriptorSet, _: &[DescriptorMatch]) -> bool {
        true
    }
}

/// A point correspondence: (x1, y1) in the reference, (x2, y2) in the query.
#[derive(Debug, Clone, Copy)]
pub struct Correspondence {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// A 2D similarity transform mapping reference points to query points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f64,
    pub b: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Similarity {
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    /// Uniform scale factor s.
    pub fn scale(&self) -> f64 {
        self.a.hypot(self.b)
    }

    /// Rotation angle θ in radians.
    pub fn rotation(&self) -> f64 {
        self.b.atan2(self.a)
    }

    /// Squared reprojection error of a correspondence.
    fn residual_sq(&self, c: &Correspondence) -> f64 {
        let (px, py) = self.apply(c.x1, c.y1);
        (px - c.x2).powi(2) + (py - c.y2).powi(2)
    }

    /// Exact transform through two correspondences, or `None` if the two
    /// reference points coincide.
    pub fn from_two(c1: &Correspondence, c2: &Correspondence) -> Option<Self> {
        // Complex division: (q2 - q1) / (p2 - p1).
        let (dpx, dpy) = (c2.x1 - c1.x1, c2.y1 - c1.y1);
        let (dqx, dqy) = (c2.x2 - c1.x2, c2.y2 - c1.y2);
        let norm = dpx * dpx + dpy * dpy;
        if norm < 1e-9 {
            return None;
        }
        let a = (dqx * dpx + dqy * dpy) / norm;
        let b = (dqy * dpx - dqx * dpy) / norm;
        Some(Similarity {
            a,
            b,
            tx: c1.x2 - (a * c1.x1 - b * c1.y1),
            ty: c1.y2 - (b * c1.x1 + a * c1.y1),
        })
    }

    /// Least-squares transform over all correspondences.
    pub fn fit(corrs: &[Correspondence]) -> Option<Self> {
        if corrs.len() < 2 {
            return None;
        }
        let n = corrs.len() as f64;
        let (mut mx1, mut my1, mut mx2, mut my2) = (0.0, 0.0, 0.0, 0.0);
        for c in corrs {
            mx1 += c.x1;
            my1 += c.y1;
            mx2 += c.x2;
            my2 += c.y2;
        }
        mx1 /= n;
        my1 /= n;
        mx2 /= n;
        my2 /= n;

        let (mut dot, mut cross, mut norm) = (0.0, 0.0, 0.0);
        for c in corrs {
            let (px, py) = (c.x1 - mx1, c.y1 - my1);
            let (qx, qy) = (c.x2 - mx2, c.y2 - my2);
            dot += px * qx + py * qy;
            cross += px * qy - py * qx;
            norm += px * px + py * py;
        }
        if norm < 1e-9 {
            return None;
        }
        let a = dot / norm;
        let b = cross / norm;
        Some(Similarity {
            a,
            b,
            tx: mx2 - (a * mx1 - b * my1),
            ty: my2 - (b * mx1 + a * my1),
        })
    }
}

/// RANSAC result.
#[derive(Debug, Clone)]
pub struct SimilarityResult {
    pub transform: Similarity,
    /// Inlier mask, index-aligned with the input correspondences.
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
    pub iterations: usize,
}

/// RANSAC configuration.
#[derive(Debug, Clone)]
pub struct RansacConfig {
    /// Maximum number of RANSAC iterations.
    pub max_iterations: usize,
    /// Inlier threshold: maximum reprojection error in level-0 pixels.
    pub threshold: f64,
    /// Confidence level (0.0-1.0) for adaptive early termination.
    pub confidence: f64,
    /// Seed of the sampling generator. Fixed, so verification is repeatable.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        RansacConfig {
            max_iterations: 500,
            threshold: 8.0,
            confidence: 0.99,
            seed: 42,
        }
    }
}

/// Estimate a similarity transform with RANSAC outlier rejection.
///
/// Returns `None` with fewer than two correspondences or when every
/// sampled pair is degenerate.
pub fn estimate_similarity_ransac(corrs: &[Correspondence], config: &RansacConfig) -> Option<SimilarityResult> {
    let n = corrs.len();
    if n < 2 {
        return None;
    }

    let thresh_sq = config.threshold * config.threshold;
    let mut rng = SimpleRng::new(config.seed);
    let mut best: Option<(Similarity, usize)> = None;
    let mut adaptive_max = config.max_iterations;
    let mut iterations = 0;

    for iter in 0..config.max_iterations {
        if iter >= adaptive_max {
            break;
        }
        iterations = iter + 1;

        let i = rng.next_usize(n);
        let mut j = rng.next_usize(n);
        if i == j {
            j = (j + 1) % n;
        }
        let model = match Similarity::from_two(&corrs[i], &corrs[j]) {
            Some(m) => m,
            None => continue,
        };

        let count = corrs.iter().filter(|c| model.residual_sq(c) < thresh_sq).count();
        if best.map_or(true, |(_, b)| count > b) {
            best = Some((model, count));

            // Adaptive termination: iterations needed so that a pair of
            // inliers is drawn with probability `confidence`.
            let w = count as f64 / n as f64;
            let p_fail = 1.0 - w * w;
            if p_fail <= 0.0 {
                break;
            }
            let needed = ((1.0 - config.confidence).ln() / p_fail.ln()).ceil();
            if needed.is_finite() && needed >= 0.0 {
                adaptive_max = adaptive_max.min(needed as usize + 1);
            }
        }
    }

    let (model, _) = best?;
    let inliers_of = |m: &Similarity| -> Vec<bool> {
        corrs.iter().map(|c| m.residual_sq(c) < thresh_sq).collect()
    };

    // Refit on the consensus set.
    let mut inliers = inliers_of(&model);
    let mut transform = model;
    let consensus: Vec<Correspondence> = corrs
        .iter()
        .zip(&inliers)
        .filter(|(_, &ok)| ok)
        .map(|(c, _)| *c)
        .collect();
    if let Some(refined) = Similarity::fit(&consensus) {
        let refined_inliers = inliers_of(&refined);
        if count_true(&refined_inliers) >= count_true(&inliers) {
            transform = refined;
            inliers = refined_inliers;
        }
    }

    Some(SimilarityResult {
        transform,
        num_inliers: count_true(&inliers),
        inliers,
        iterations,
    })
}

fn count_true(mask: &[bool]) -> usize {
    mask.iter().filter(|&&b| b).count()
}

/// Accepts a candidate when at least `min_inliers` of its good matches
/// agree on one similarity transform.
#[derive(Debug, Clone)]
pub struct RansacSimilarity {
    pub config: RansacConfig,
    pub min_inliers: usize,
}

impl Default for RansacSimilarity {
    fn default() -> Self {
        RansacSimilarity {
            config: RansacConfig::default(),
            min_inliers: 8,
        }
    }
}

impl GeometricVerifier for RansacSimilarity {
    fn verify(&self, query: &DescriptorSet, reference: &DescriptorSet, matches: &[DescriptorMatch]) -> bool {
        if matches.len() < self.min_inliers {
            return false;
        }
        let q = query.keypoints();
        let r = reference.keypoints();
        let corrs: Vec<Correspondence> = matches
            .iter()
            .filter_map(|m| {
                let (kq, kr) = (q.get(m.query_idx)?, r.get(m.train_idx)?);
                Some(Correspondence {
                    x1: kr.x as f64,
                    y1: kr.y as f64,
                    x2: kq.x as f64,
                    y2: kq.y as f64,
                })
            })
            .collect();

        estimate_similarity_ransac(&corrs, &self.config)
            .map_or(false, |res| res.num_inliers >= self.min_inliers)
    }
}
