// config.rs — Configuration for descriptor extraction, recognition and corpus builds.
//
// Every field has a default, so a config file only needs the values it
// changes:
//
//   [extractor]
//   max_features = 1500
//
//   [recognition]
//   confidence_threshold = 0.2

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::brief::PATTERN_REACH;
use crate::error::ConfigError;

/// ORB extractor parameters. Fixed once the extractor is constructed.
///
/// Any change here changes the extractor fingerprint, so a corpus built
/// with one configuration is rejected by an engine using another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Upper bound on keypoints per image.
    pub max_features: usize,
    /// Downscale factor between consecutive pyramid levels.
    pub scale_factor: f32,
    /// Number of pyramid levels, including the full-resolution one.
    pub pyramid_levels: usize,
    /// Border, in pixels, where no keypoint is detected.
    pub edge_threshold: usize,
    /// FAST intensity threshold.
    pub fast_threshold: u8,
    /// Harris sensitivity used when re-scoring FAST corners.
    pub harris_k: f32,
    /// Diameter of the orientation patch.
    pub patch_size: usize,
    /// Smallest accepted image side, in pixels.
    pub min_image_size: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_features: 2000,
            scale_factor: 1.2,
            pyramid_levels: 8,
            edge_threshold: 31,
            fast_threshold: 20,
            harris_k: 0.04,
            patch_size: 31,
            min_image_size: 64,
        }
    }
}

/// Query-time matching and decision parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Lowe ratio: a match is good if best < ratio × second best.
    pub ratio_threshold: f32,
    /// Candidates with fewer good matches are discarded.
    pub min_good_matches: usize,
    /// Minimum confidence (inclusive) for a match to be accepted.
    pub confidence_threshold: f32,
    /// Queries slower than this are logged; the result is still returned.
    pub query_timeout_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            ratio_threshold: 0.75,
            min_good_matches: 12,
            confidence_threshold: 0.18,
            query_timeout_ms: 2000,
        }
    }
}

impl RecognitionConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Corpus build parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Worker threads for extraction. `None` uses every available core.
    pub threads: Option<usize>,
}

/// Complete lensa configuration, as loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LensaConfig {
    pub extractor: ExtractorConfig,
    pub recognition: RecognitionConfig,
    pub build: BuildConfig,
}

impl LensaConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: LensaConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.extractor.validate()?;
        self.recognition.validate()?;
        if self.build.threads == Some(0) {
            return Err(invalid("build.threads must be at least 1"));
        }
        Ok(())
    }
}

impl ExtractorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_features == 0 {
            return Err(invalid("extractor.max_features must be at least 1"));
        }
        if !(self.scale_factor > 1.0 && self.scale_factor.is_finite()) {
            return Err(invalid("extractor.scale_factor must be a finite value above 1.0"));
        }
        if self.pyramid_levels == 0 {
            return Err(invalid("extractor.pyramid_levels must be at least 1"));
        }
        if self.patch_size < 3 || self.patch_size % 2 == 0 {
            return Err(invalid("extractor.patch_size must be odd and at least 3"));
        }
        let needed = (self.patch_size / 2 + 1).max(PATTERN_REACH);
        if self.edge_threshold < needed {
            return Err(invalid(format!(
                "extractor.edge_threshold must be at least {needed} for patch_size {}",
                self.patch_size
            )));
        }
        if self.min_image_size == 0 {
            return Err(invalid("extractor.min_image_size must be at least 1"));
        }
        Ok(())
    }
}

impl RecognitionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ratio_threshold > 0.0 && self.ratio_threshold <= 1.0) {
            return Err(invalid("recognition.ratio_threshold must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(invalid("recognition.confidence_threshold must be in [0, 1]"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}
