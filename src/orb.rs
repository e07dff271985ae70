// orb.rs — ORB extractor: oriented FAST keypoints + rotated BRIEF descriptors.
//
// Pipeline (per image):
//   1. Scale pyramid, `pyramid_levels` levels × `scale_factor`
//   2. Per level: FAST-9 outside an `edge_threshold` border, 3×3 NMS
//   3. Per-level budget: geometric share of `max_features`
//   4. Keep the best 2×budget FAST corners, re-rank by Harris, keep budget
//   5. Orientation by intensity centroid on the raw level
//   6. Steered BRIEF on the Gaussian-smoothed level
//   7. Map to level-0 coordinates, merge, sort by response, cap
//
// The extractor is immutable after construction and holds no per-call
// state, so one instance can serve any number of threads.

use std::cmp::Ordering;

use image::DynamicImage;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::brief::{centroid_angle, BriefPattern, PATTERN_SEED};
use crate::config::ExtractorConfig;
use crate::convolution::gaussian_blur_u8;
use crate::descriptor::{Descriptor, DescriptorSet, Keypoint};
use crate::error::{ConfigError, ExtractionError};
use crate::fast::{Corner, FastDetector};
use crate::gradient::Gradients;
use crate::harris::HarrisScorer;
use crate::image::Image;
use crate::loader;
use crate::nms::suppress_3x3;
use crate::pyramid::Pyramid;

/// Bumped whenever descriptor semantics change without a config change.
const FINGERPRINT_VERSION: u32 = 1;

const FAST_ARC_LENGTH: usize = 9;
const HARRIS_BLOCK_HALF: usize = 3;
const SMOOTH_HALF: usize = 3;
const SMOOTH_SIGMA: f32 = 2.0;

/// ORB descriptor extractor.
pub struct OrbExtractor {
    config: ExtractorConfig,
    fast: FastDetector,
    harris: HarrisScorer,
    pattern: BriefPattern,
    fingerprint: String,
}

impl OrbExtractor {
    /// Validate `config` and build the extractor.
    pub fn new(config: ExtractorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pattern = BriefPattern::generate(PATTERN_SEED);
        let fingerprint = fingerprint(&config, &pattern);
        Ok(OrbExtractor {
            fast: FastDetector::new(config.fast_threshold, FAST_ARC_LENGTH),
            harris: HarrisScorer::new(config.harris_k, HARRIS_BLOCK_HALF),
            pattern,
            fingerprint,
            config,
        })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Hex SHA-256 identifying the configuration and sampling pattern.
    /// Two extractors produce comparable descriptors iff their
    /// fingerprints are equal.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Extract from a decoded image of any color type.
    pub fn extract_dynamic(&self, img: &DynamicImage) -> Result<DescriptorSet, ExtractionError> {
        let luma = loader::to_luma(img, self.config.min_image_size)?;
        Ok(self.detect_and_describe(&luma))
    }

    /// Decode encoded image bytes and extract.
    pub fn extract_bytes(&self, bytes: &[u8]) -> Result<DescriptorSet, ExtractionError> {
        let luma = loader::decode_bytes(bytes, self.config.min_image_size)?;
        Ok(self.detect_and_describe(&luma))
    }

    /// Read an image file and extract.
    pub fn extract_path(&self, path: &std::path::Path) -> Result<DescriptorSet, ExtractionError> {
        let luma = loader::load_path(path, self.config.min_image_size)?;
        Ok(self.detect_and_describe(&luma))
    }

    /// Extract from an 8-bit luma image.
    ///
    /// Returns `TooSmall` if either side is below `min_image_size`. An
    /// image without any corner yields an empty set, not an error.
    pub fn extract(&self, image: &Image<u8>) -> Result<DescriptorSet, ExtractionError> {
        let min = self.config.min_image_size as usize;
        if image.width() < min || image.height() < min {
            return Err(ExtractionError::TooSmall {
                width: image.width() as u32,
                height: image.height() as u32,
                min: self.config.min_image_size,
            });
        }
        Ok(self.detect_and_describe(image))
    }

    fn detect_and_describe(&self, image: &Image<u8>) -> DescriptorSet {
        let cfg = &self.config;
        let pyramid = Pyramid::build(
            image,
            cfg.pyramid_levels,
            cfg.scale_factor,
            2 * cfg.edge_threshold + 1,
        );
        let budgets = level_budgets(cfg.max_features, cfg.scale_factor, pyramid.num_levels());

        let mut features: Vec<(Keypoint, Descriptor)> = Vec::with_capacity(cfg.max_features);
        for (octave, (level, &budget)) in pyramid.levels.iter().zip(&budgets).enumerate() {
            if budget == 0 {
                continue;
            }
            let scale = pyramid.scales[octave];
            let before = features.len();
            self.describe_level(level, octave as u32, scale, budget, &mut features);
            trace!(octave, budget, kept = features.len() - before, "orb level done");
        }

        features.sort_by(|(a, _), (b, _)| compare_keypoints(a, b));
        features.truncate(cfg.max_features);

        let (keypoints, descriptors) = features.into_iter().unzip();
        DescriptorSet::new(keypoints, descriptors)
    }

    fn describe_level(
        &self,
        level: &Image<u8>,
        octave: u32,
        scale: f32,
        budget: usize,
        out: &mut Vec<(Keypoint, Descriptor)>,
    ) {
        let corners = self.fast.detect(level, self.config.edge_threshold);
        let mut corners = suppress_3x3(&corners, level.width(), level.height());
        if corners.is_empty() {
            return;
        }

        // Over-collect by FAST score; Harris picks the final budget.
        // Stable sort: equal scores stay in raster order.
        corners.sort_by(|a, b| b.score.total_cmp(&a.score));
        corners.truncate(2 * budget);

        let grads = Gradients::sobel(level);
        let responses = self.harris.score_points(&grads, corners.iter().map(|c| (c.x, c.y)));
        let mut ranked: Vec<(Corner, f32)> = corners.into_iter().zip(responses).collect();
        ranked.sort_by(|(ca, ra), (cb, rb)| {
            rb.total_cmp(ra).then(ca.y.cmp(&cb.y)).then(ca.x.cmp(&cb.x))
        });
        ranked.truncate(budget);

        let smoothed = gaussian_blur_u8(level, SMOOTH_HALF, SMOOTH_SIGMA);
        let radius = self.config.patch_size / 2;
        let size = self.config.patch_size as f32 * scale;

        for (c, response) in ranked {
            let angle = centroid_angle(level, c.x, c.y, radius);
            let desc = self.pattern.describe(&smoothed, c.x, c.y, angle);
            let kp = Keypoint {
                x: c.x as f32 * scale,
                y: c.y as f32 * scale,
                size,
                angle,
                response,
                octave,
            };
            out.push((kp, desc));
        }
    }
}

/// Strongest response first; ties by octave, then y, then x.
fn compare_keypoints(a: &Keypoint, b: &Keypoint) -> Ordering {
    b.response
        .total_cmp(&a.response)
        .then(a.octave.cmp(&b.octave))
        .then(a.y.total_cmp(&b.y))
        .then(a.x.total_cmp(&b.x))
}

/// Split `max_features` over `levels` levels so that each level gets
/// `1/scale_factor` of the previous one. The last level takes whatever is
/// left, so the budgets always sum to `max_features`.
pub fn level_budgets(max_features: usize, scale_factor: f32, levels: usize) -> Vec<usize> {
    if levels == 0 {
        return Vec::new();
    }
    let inv = 1.0 / scale_factor as f64;
    let mut per_level = max_features as f64 * (1.0 - inv) / (1.0 - inv.powi(levels as i32));

    let mut budgets = Vec::with_capacity(levels);
    let mut assigned = 0usize;
    for _ in 0..levels - 1 {
        let n = (per_level.round() as usize).min(max_features - assigned);
        budgets.push(n);
        assigned += n;
        per_level *= inv;
    }
    budgets.push(max_features - assigned);
    budgets
}

/// SHA-256 over a canonical text encoding of everything that changes the
/// descriptors. Floats are encoded by their bit patterns.
fn fingerprint(config: &ExtractorConfig, pattern: &BriefPattern) -> String {
    let canonical = format!(
        "orb-v{FINGERPRINT_VERSION};max_features={};scale_factor={:08x};pyramid_levels={};\
         edge_threshold={};fast_threshold={};fast_arc={FAST_ARC_LENGTH};harris_k={:08x};\
         harris_block={HARRIS_BLOCK_HALF};patch_size={};smooth={SMOOTH_HALF}/{:08x}",
        config.max_features,
        config.scale_factor.to_bits(),
        config.pyramid_levels,
        config.edge_threshold,
        config.fast_threshold,
        config.harris_k.to_bits(),
        config.patch_size,
        SMOOTH_SIGMA.to_bits(),
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.update(pattern.to_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brief::SimpleRng;

    /// Random 8×8 blocks: plenty of strong corners at every scale.
    fn blocky_image(w: usize, h: usize, seed: u64) -> Image<u8> {
        let mut rng = SimpleRng::new(seed);
        let bw = w / 8 + 1;
        let blocks: Vec<u8> = (0..bw * (h / 8 + 1)).map(|_| (rng.next_u64() % 256) as u8).collect();
        let mut img = Image::new(w, h);
        for y in 0..h {
            for x in 0..w {
                img.set(x, y, blocks[(y / 8) * bw + x / 8]);
            }
        }
        img
    }

    fn extractor() -> OrbExtractor {
        OrbExtractor::new(ExtractorConfig::default()).unwrap()
    }

    #[test]
    fn test_budgets_sum_to_max() {
        for &(n, levels) in &[(2000, 8), (500, 3), (7, 8), (1, 1)] {
            let b = level_budgets(n, 1.2, levels);
            assert_eq!(b.len(), levels);
            assert_eq!(b.iter().sum::<usize>(), n);
        }
    }

    #[test]
    fn test_budgets_decrease_geometrically() {
        let b = level_budgets(2000, 1.2, 8);
        // n0 = 2000 · (1 − 1/1.2) / (1 − 1.2^-8) ≈ 435
        assert!((430..=440).contains(&b[0]), "{b:?}");
        for i in 1..7 {
            assert!(b[i] < b[i - 1], "{b:?}");
        }
    }

    #[test]
    fn test_flat_image_has_no_features() {
        let img = Image::from_vec(200, 200, vec![77u8; 200 * 200]);
        let set = extractor().extract(&img).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_too_small_is_error() {
        let img: Image<u8> = Image::new(40, 300);
        let err = extractor().extract(&img).unwrap_err();
        assert!(matches!(err, ExtractionError::TooSmall { width: 40, height: 300, min: 64 }));
    }

    #[test]
    fn test_textured_image_features_are_bounded_and_sorted() {
        let img = blocky_image(320, 240, 5);
        let cfg = ExtractorConfig { max_features: 300, ..Default::default() };
        let set = OrbExtractor::new(cfg).unwrap().extract(&img).unwrap();

        assert!(set.len() > 50, "expected many features, got {}", set.len());
        assert!(set.len() <= 300);
        for pair in set.keypoints().windows(2) {
            assert!(pair[0].response >= pair[1].response);
        }
        for kp in set.keypoints() {
            assert!(kp.x >= 0.0 && kp.x < 320.0 && kp.y >= 0.0 && kp.y < 240.0);
            assert!(kp.angle.is_finite());
        }
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let img = blocky_image(256, 256, 11);
        let ex = extractor();
        assert_eq!(ex.extract(&img).unwrap(), ex.extract(&img).unwrap());
    }

    #[test]
    fn test_fingerprint_tracks_config() {
        let a = extractor();
        let b = extractor();
        let c = OrbExtractor::new(ExtractorConfig { fast_threshold: 30, ..Default::default() }).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = ExtractorConfig { scale_factor: 1.0, ..Default::default() };
        assert!(OrbExtractor::new(cfg).is_err());
    }
}
