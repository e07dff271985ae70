// engine.rs — Recognition engine: one photo in, one decision out.
//
// A query moves through four stages:
//
//   Extracting → Matching → Deciding → Done
//
// Extracting   ORB on the photo. Failure ends the query as Failed.
// Matching     Snapshot the corpus and match the query against every
//              artwork in parallel (one independent task per artwork).
// Deciding     Score, filter, rank, verify, threshold.
//
// The engine never returns an error: every problem resolves to
// `RecognitionResult::Failed` with a reason. It holds no mutable state, so
// one engine serves concurrent queries.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::RecognitionConfig;
use crate::corpus::{CorpusEntry, CorpusStore};
use crate::decision::{compare_candidates, DecisionPolicy, FailureReason, MatchCandidate, RecognitionResult};
use crate::descriptor::{ArtworkId, DescriptorSet};
use crate::error::ExtractionError;
use crate::geometry::{AcceptAll, GeometricVerifier};
use crate::image::Image;
use crate::matcher::{match_sets, MatchStats};
use crate::orb::OrbExtractor;

/// Query stage, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Extracting,
    Matching,
    Deciding,
    Done,
}

/// Everything the engine learned while answering one query.
#[derive(Debug)]
pub struct RecognitionReport {
    pub result: RecognitionResult,
    /// Every scored candidate in ranking order, including those filtered
    /// out by `min_good_matches`.
    pub candidates: Vec<MatchCandidate>,
    pub query_features: usize,
    pub elapsed: Duration,
}

/// One artwork's matching output, kept until the verifier has run.
struct Scored {
    candidate: MatchCandidate,
    stats: MatchStats,
    reference: Arc<DescriptorSet>,
}

/// Matches photos against a reference corpus.
pub struct RecognitionEngine<S: CorpusStore + ?Sized> {
    extractor: Arc<OrbExtractor>,
    store: Arc<S>,
    config: RecognitionConfig,
    verifier: Box<dyn GeometricVerifier>,
}

impl<S: CorpusStore + ?Sized> RecognitionEngine<S> {
    /// Engine without geometric verification.
    pub fn new(extractor: Arc<OrbExtractor>, store: Arc<S>, config: RecognitionConfig) -> Self {
        RecognitionEngine {
            extractor,
            store,
            config,
            verifier: Box::new(AcceptAll),
        }
    }

    /// Replace the geometric verifier.
    pub fn with_verifier(mut self, verifier: impl GeometricVerifier + 'static) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    pub fn extractor(&self) -> &OrbExtractor {
        &self.extractor
    }

    /// Recognize an 8-bit luma photo.
    pub fn recognize(&self, image: &Image<u8>) -> RecognitionResult {
        self.recognize_detailed(image).result
    }

    /// Recognize a decoded photo of any color type.
    pub fn recognize_dynamic(&self, image: &DynamicImage) -> RecognitionResult {
        let started = Instant::now();
        self.finish(self.extractor.extract_dynamic(image), started, None)
            .map_or_else(cancelled_result, |r| r.result)
    }

    /// Decode encoded bytes and recognize.
    pub fn recognize_bytes(&self, bytes: &[u8]) -> RecognitionResult {
        self.recognize_bytes_detailed(bytes).result
    }

    /// Read an image file and recognize.
    pub fn recognize_path(&self, path: &Path) -> RecognitionResult {
        self.recognize_path_detailed(path).result
    }

    pub fn recognize_detailed(&self, image: &Image<u8>) -> RecognitionReport {
        let started = Instant::now();
        self.finish(self.extractor.extract(image), started, None)
            .unwrap_or_else(|| cancelled_report(started))
    }

    pub fn recognize_bytes_detailed(&self, bytes: &[u8]) -> RecognitionReport {
        let started = Instant::now();
        self.finish(self.extractor.extract_bytes(bytes), started, None)
            .unwrap_or_else(|| cancelled_report(started))
    }

    pub fn recognize_path_detailed(&self, path: &Path) -> RecognitionReport {
        let started = Instant::now();
        self.finish(self.extractor.extract_path(path), started, None)
            .unwrap_or_else(|| cancelled_report(started))
    }

    /// Like [`recognize`](Self::recognize), but returns `None` as soon as
    /// `cancel` is observed set. Remaining per-artwork matches are skipped.
    pub fn recognize_cancellable(&self, image: &Image<u8>, cancel: &AtomicBool) -> Option<RecognitionResult> {
        let started = Instant::now();
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        let extracted = self.extractor.extract(image);
        self.finish(extracted, started, Some(cancel)).map(|r| r.result)
    }

    /// Run Matching and Deciding on an extraction outcome. `None` means
    /// the query was cancelled.
    fn finish(
        &self,
        extracted: Result<DescriptorSet, ExtractionError>,
        started: Instant,
        cancel: Option<&AtomicBool>,
    ) -> Option<RecognitionReport> {
        debug!(stage = ?QueryStage::Extracting, elapsed = ?started.elapsed(), "query stage done");

        let query = match extracted {
            Ok(set) => set,
            Err(e) => {
                debug!(error = %e, "extraction failed");
                return Some(self.report(RecognitionResult::Failed(FailureReason::Extraction(e)), Vec::new(), 0, started));
            }
        };
        let query_features = query.len();

        // Corpus faults outrank a blank photo.
        let entries = match self.matchable_entries() {
            Ok(entries) => entries,
            Err(reason) => {
                return Some(self.report(RecognitionResult::Failed(reason), Vec::new(), query_features, started));
            }
        };

        if query.is_empty() {
            debug!(stage = ?QueryStage::Deciding, "query has no features");
            return Some(self.report(
                RecognitionResult::NoMatch { best_confidence_seen: 0.0 },
                Vec::new(),
                0,
                started,
            ));
        }

        let scored = self.match_corpus(&query, &entries, cancel)?;
        debug!(stage = ?QueryStage::Matching, candidates = scored.len(), elapsed = ?started.elapsed(), "query stage done");

        let policy = DecisionPolicy {
            min_good_matches: self.config.min_good_matches,
            confidence_threshold: self.config.confidence_threshold,
        };
        let by_id: HashMap<ArtworkId, &Scored> = scored.iter().map(|s| (s.candidate.artwork_id, s)).collect();
        let mut candidates: Vec<MatchCandidate> = scored.iter().map(|s| s.candidate.clone()).collect();

        let result = policy.decide(&candidates, |c| {
            let accepted = by_id
                .get(&c.artwork_id)
                .is_some_and(|s| self.verifier.verify(&query, &s.reference, &s.stats.matches));
            if !accepted {
                debug!(artwork_id = %c.artwork_id, "candidate rejected by geometric verification");
            }
            accepted
        });
        debug!(stage = ?QueryStage::Deciding, ?result, "query stage done");

        candidates.sort_by(compare_candidates);
        Some(self.report(result, candidates, query_features, started))
    }

    /// Snapshot the corpus, keeping entries that have descriptors.
    ///
    /// Fails when the store cannot be read, when nothing is matchable, or
    /// when the corpus was built by a different extractor.
    fn matchable_entries(&self) -> Result<Vec<CorpusEntry>, FailureReason> {
        let entries = self.store.all().map_err(FailureReason::Corpus)?;

        let (matchable, empty): (Vec<CorpusEntry>, Vec<CorpusEntry>) =
            entries.into_iter().partition(|e| !e.descriptors.is_empty());
        for e in &empty {
            warn!(artwork_id = %e.artwork_id, "corpus entry has no descriptors, skipping");
        }
        if matchable.is_empty() {
            return Err(FailureReason::EmptyCorpus);
        }

        if let Some(corpus_fp) = self.store.extractor_fingerprint() {
            let engine_fp = self.extractor.fingerprint();
            if corpus_fp != engine_fp {
                return Err(FailureReason::ExtractorMismatch { corpus: corpus_fp, engine: engine_fp.to_string() });
            }
        }
        Ok(matchable)
    }

    /// Match `query` against `entries` in parallel. `None` means cancelled.
    fn match_corpus(
        &self,
        query: &DescriptorSet,
        entries: &[CorpusEntry],
        cancel: Option<&AtomicBool>,
    ) -> Option<Vec<Scored>> {
        let is_cancelled = || cancel.is_some_and(|c| c.load(Ordering::Relaxed));
        let ratio = self.config.ratio_threshold;

        let scored: Vec<Option<Scored>> = entries
            .par_iter()
            .map(|entry| {
                if is_cancelled() {
                    return None;
                }
                let stats = match_sets(query, &entry.descriptors, ratio);
                let candidate = MatchCandidate::new(
                    entry.artwork_id,
                    stats.good_match_count,
                    stats.mean_distance,
                    query.len(),
                    entry.descriptors.len(),
                );
                Some(Scored { candidate, stats, reference: Arc::clone(&entry.descriptors) })
            })
            .collect();

        if is_cancelled() {
            debug!("query cancelled");
            return None;
        }
        Some(scored.into_iter().flatten().collect())
    }

    fn report(
        &self,
        result: RecognitionResult,
        candidates: Vec<MatchCandidate>,
        query_features: usize,
        started: Instant,
    ) -> RecognitionReport {
        let elapsed = started.elapsed();
        if elapsed > self.config.query_timeout() {
            warn!(?elapsed, timeout = ?self.config.query_timeout(), "recognition query exceeded its time budget");
        }
        debug!(stage = ?QueryStage::Done, ?elapsed, "query finished");
        RecognitionReport { result, candidates, query_features, elapsed }
    }
}

// Only reachable through a cancel flag, which the non-cancellable entry
// points never pass.
fn cancelled_result() -> RecognitionResult {
    RecognitionResult::NoMatch { best_confidence_seen: 0.0 }
}

fn cancelled_report(started: Instant) -> RecognitionReport {
    RecognitionReport {
        result: cancelled_result(),
        candidates: Vec::new(),
        query_features: 0,
        elapsed: started.elapsed(),
    }
}
