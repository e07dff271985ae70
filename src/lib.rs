// Lensa: offline artwork recognition for museum photographs
//
// A captured photo is reduced to ORB descriptors (oriented FAST keypoints
// + rotated BRIEF), matched against a small reference corpus with a
// Hamming ratio test, and resolved to a single artwork or "no match" by a
// confidence threshold.
//
// Reference: Rublee, Rabaud, Konolige, Bradski — "ORB: an efficient
// alternative to SIFT or SURF" (ICCV 2011)

// Image primitives
pub mod image;
pub mod loader;
pub mod convolution;
pub mod gradient;
pub mod pyramid;
pub mod fast;
pub mod nms;
pub mod harris;

// Descriptor extraction
pub mod descriptor;
pub mod brief;
pub mod orb;

// Recognition
pub mod corpus;
pub mod matcher;
pub mod geometry;
pub mod decision;
pub mod engine;
pub mod builder;

pub mod config;
pub mod error;

pub use builder::{BuildSummary, CorpusBuilder, DirectorySource, ImageSource, ListSource, ReferenceImage};
pub use config::{BuildConfig, ExtractorConfig, LensaConfig, RecognitionConfig};
pub use corpus::{CorpusEntry, CorpusStore, FileCorpus, MemoryCorpus};
pub use decision::{FailureReason, MatchCandidate, RecognitionResult};
pub use descriptor::{ArtworkId, Descriptor, DescriptorSet, Keypoint};
pub use engine::{RecognitionEngine, RecognitionReport};
pub use error::{BuildFailure, ConfigError, CorpusError, ExtractionError};
pub use geometry::{AcceptAll, GeometricVerifier, RansacSimilarity};
pub use matcher::{match_sets, MatchStats};
pub use orb::OrbExtractor;
