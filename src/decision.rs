// decision.rs — Confidence scoring, candidate ranking and the accept/reject policy.
//
// Confidence blends two signals:
//
//   confidence = 0.7 · good / max(min(|query|, |reference|), 1)
//              + 0.3 · max(0, 1 − mean_distance / 256)
//
// clamped to [0, 1]. The weights are a calibration choice; what matters is
// that the score rises with the number of good matches and falls with
// their mean distance.

use std::cmp::Ordering;

use serde::Serialize;

use crate::descriptor::{ArtworkId, DESCRIPTOR_BITS};
use crate::error::{CorpusError, ExtractionError};

/// Weight of the good-match ratio term.
pub const W_RATIO: f32 = 0.7;
/// Weight of the distance term.
pub const W_DISTANCE: f32 = 0.3;

/// One artwork's matching outcome, scored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub artwork_id: ArtworkId,
    pub good_match_count: usize,
    /// `f32::INFINITY` when there are no good matches.
    pub mean_distance: f32,
    pub confidence: f32,
}

impl MatchCandidate {
    pub fn new(
        artwork_id: ArtworkId,
        good_match_count: usize,
        mean_distance: f32,
        query_len: usize,
        reference_len: usize,
    ) -> Self {
        MatchCandidate {
            artwork_id,
            good_match_count,
            mean_distance,
            confidence: confidence(good_match_count, mean_distance, query_len, reference_len),
        }
    }
}

/// Terminal outcome of one recognition query.
#[derive(Debug)]
pub enum RecognitionResult {
    Matched {
        artwork_id: ArtworkId,
        confidence: f32,
        good_matches: usize,
    },
    NoMatch {
        /// Highest confidence among all candidates, accepted or not.
        best_confidence_seen: f32,
    },
    Failed(FailureReason),
}

impl RecognitionResult {
    pub fn artwork_id(&self) -> Option<ArtworkId> {
        match self {
            RecognitionResult::Matched { artwork_id, .. } => Some(*artwork_id),
            _ => None,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, RecognitionResult::Matched { .. })
    }
}

/// Why a query could not be answered at all.
#[derive(Debug)]
pub enum FailureReason {
    /// The photo could not be decoded or analyzed.
    Extraction(ExtractionError),
    /// No artwork in the corpus has descriptors.
    EmptyCorpus,
    /// The corpus was built by a differently configured extractor.
    ExtractorMismatch { corpus: String, engine: String },
    /// The corpus could not be read.
    Corpus(CorpusError),
}

/// Confidence in [0, 1] for one candidate. Zero good matches → 0.
pub fn confidence(good: usize, mean_distance: f32, query_len: usize, reference_len: usize) -> f32 {
    if good == 0 {
        return 0.0;
    }
    let denom = query_len.min(reference_len).max(1) as f32;
    let ratio = good as f32 / denom;
    let closeness = (1.0 - mean_distance / DESCRIPTOR_BITS as f32).max(0.0);
    (W_RATIO * ratio + W_DISTANCE * closeness).clamp(0.0, 1.0)
}

/// Ranking order: more good matches first, then smaller mean distance,
/// then smaller artwork id.
pub fn compare_candidates(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.good_match_count
        .cmp(&a.good_match_count)
        .then(a.mean_distance.total_cmp(&b.mean_distance))
        .then(a.artwork_id.cmp(&b.artwork_id))
}

/// Accept/reject thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    /// Candidates below this many good matches are discarded (inclusive).
    pub min_good_matches: usize,
    /// The top candidate is accepted at or above this confidence.
    pub confidence_threshold: f32,
}

impl DecisionPolicy {
    /// Pick the winner among `candidates`.
    ///
    /// `verify` is asked about candidates in ranking order; the first one it
    /// accepts becomes the top candidate. Pass `|_| true` to skip geometric
    /// verification.
    pub fn decide(
        &self,
        candidates: &[MatchCandidate],
        mut verify: impl FnMut(&MatchCandidate) -> bool,
    ) -> RecognitionResult {
        let best_confidence_seen = candidates.iter().map(|c| c.confidence).fold(0.0f32, f32::max);

        let mut ranked: Vec<&MatchCandidate> = candidates
            .iter()
            .filter(|c| c.good_match_count >= self.min_good_matches)
            .collect();
        ranked.sort_by(|a, b| compare_candidates(a, b));

        match ranked.into_iter().find(|c| verify(c)) {
            Some(top) if top.confidence >= self.confidence_threshold => RecognitionResult::Matched {
                artwork_id: top.artwork_id,
                confidence: top.confidence,
                good_matches: top.good_match_count,
            },
            _ => RecognitionResult::NoMatch { best_confidence_seen },
        }
    }
}
