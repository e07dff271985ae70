// descriptor.rs — Keypoints, binary descriptors and the sets that hold them.
//
// A descriptor is 256 bits (32 bytes). Distances between descriptors are
// Hamming distances: XOR the bytes and count the set bits. Comparing as
// four u64 words lets `count_ones` compile to a popcount instruction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Descriptor length in bytes.
pub const DESCRIPTOR_BYTES: usize = 32;

/// Descriptor length in bits; also the largest possible Hamming distance.
pub const DESCRIPTOR_BITS: u32 = (DESCRIPTOR_BYTES * 8) as u32;

/// One 256-bit binary descriptor.
pub type Descriptor = [u8; DESCRIPTOR_BYTES];

/// Stable catalog identifier of an artwork. Opaque to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtworkId(pub u64);

impl fmt::Display for ArtworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArtworkId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(ArtworkId)
    }
}

impl From<u64> for ArtworkId {
    fn from(id: u64) -> Self {
        ArtworkId(id)
    }
}

/// A detected, oriented keypoint in level-0 pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Patch diameter at level 0.
    pub size: f32,
    /// Orientation in radians, from the intensity centroid.
    pub angle: f32,
    /// Harris response on the detection level.
    pub response: f32,
    /// Pyramid level the keypoint was detected on.
    pub octave: u32,
}

/// Keypoints and their descriptors, index-aligned.
///
/// Sets produced by the extractor are ordered by response, strongest
/// first. Matching does not depend on that order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptorSet {
    keypoints: Vec<Keypoint>,
    descriptors: Vec<Descriptor>,
}

impl DescriptorSet {
    /// # Panics
    /// Panics if the two vectors have different lengths.
    pub fn new(keypoints: Vec<Keypoint>, descriptors: Vec<Descriptor>) -> Self {
        assert_eq!(
            keypoints.len(),
            descriptors.len(),
            "keypoint count ({}) must equal descriptor count ({})",
            keypoints.len(),
            descriptors.len(),
        );
        DescriptorSet { keypoints, descriptors }
    }

    /// A set with no features (a featureless image).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// Split back into the two parallel vectors.
    pub fn into_parts(self) -> (Vec<Keypoint>, Vec<Descriptor>) {
        (self.keypoints, self.descriptors)
    }
}

/// Hamming distance between two descriptors, in 0..=256.
#[inline]
pub fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    let mut dist = 0;
    for (ca, cb) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
        let mut wa = [0u8; 8];
        let mut wb = [0u8; 8];
        wa.copy_from_slice(ca);
        wb.copy_from_slice(cb);
        dist += (u64::from_le_bytes(wa) ^ u64::from_le_bytes(wb)).count_ones();
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_identical_is_zero() {
        let d = [0xA5u8; 32];
        assert_eq!(hamming(&d, &d), 0);
    }

    #[test]
    fn test_hamming_complement_is_max() {
        assert_eq!(hamming(&[0u8; 32], &[0xFFu8; 32]), DESCRIPTOR_BITS);
    }

    #[test]
    fn test_hamming_counts_bits_across_words() {
        let a = [0u8; 32];
        let mut b = [0u8; 32];
        b[0] = 0b0000_0111;
        b[9] = 0b1000_0000;
        b[31] = 0xFF;
        assert_eq!(hamming(&a, &b), 3 + 1 + 8);
        assert_eq!(hamming(&b, &a), 12);
    }

    #[test]
    fn test_artwork_id_parse_and_display() {
        let id: ArtworkId = "436535".parse().unwrap();
        assert_eq!(id, ArtworkId(436535));
        assert_eq!(id.to_string(), "436535");
        assert!("abc".parse::<ArtworkId>().is_err());
    }

    #[test]
    fn test_artwork_id_serializes_as_number() {
        assert_eq!(serde_json::to_string(&ArtworkId(7)).unwrap(), "7");
    }

    #[test]
    fn test_empty_set() {
        let set = DescriptorSet::empty();
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }

    #[test]
    #[should_panic(expected = "must equal")]
    fn test_mismatched_lengths_panics() {
        DescriptorSet::new(Vec::new(), vec![[0u8; 32]]);
    }
}
