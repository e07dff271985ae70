// matcher.rs — Brute-force 2-NN Hamming matching with Lowe's ratio test.
//
// For each query descriptor the two closest reference descriptors are
// found by exhaustive search. The match is "good" when the best distance is
// clearly smaller than the second best:
//
//   d1 < ratio · d2
//
// An ambiguous match (a repeated texture, a corner that looks like many
// others) has d1 ≈ d2 and is rejected. The one exception is an exact
// duplicate, d1 = d2 = 0, which still counts as good.
//
// Reference sets with fewer than two descriptors cannot pass a ratio test
// and yield no good matches.

use crate::descriptor::{hamming, DescriptorSet};

/// A good match: query index, reference index, Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: u32,
}

/// Outcome of matching one query set against one reference set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchStats {
    pub good_match_count: usize,
    /// Mean distance of the good matches; `f32::INFINITY` if there are none.
    pub mean_distance: f32,
    /// Good matches in query order.
    pub matches: Vec<DescriptorMatch>,
}

impl MatchStats {
    fn empty() -> Self {
        MatchStats {
            good_match_count: 0,
            mean_distance: f32::INFINITY,
            matches: Vec::new(),
        }
    }
}

/// Match every query descriptor against `reference` and keep those that
/// pass the ratio test.
pub fn match_sets(query: &DescriptorSet, reference: &DescriptorSet, ratio_threshold: f32) -> MatchStats {
    let refs = reference.descriptors();
    if query.is_empty() || refs.len() < 2 {
        return MatchStats::empty();
    }

    let mut matches = Vec::new();
    let mut total: u64 = 0;

    for (qi, q) in query.descriptors().iter().enumerate() {
        // Two smallest distances; ties keep the lowest reference index.
        let (mut best, mut best_idx, mut second) = (u32::MAX, 0usize, u32::MAX);
        for (ri, r) in refs.iter().enumerate() {
            let d = hamming(q, r);
            if d < best {
                second = best;
                best = d;
                best_idx = ri;
            } else if d < second {
                second = d;
            }
        }

        let good = (best as f32) < ratio_threshold * second as f32 || (best == 0 && second == 0);
        if good {
            total += best as u64;
            matches.push(DescriptorMatch { query_idx: qi, train_idx: best_idx, distance: best });
        }
    }

    if matches.is_empty() {
        return MatchStats::empty();
    }
    MatchStats {
        good_match_count: matches.len(),
        mean_distance: total as f32 / matches.len() as f32,
        matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Descriptor, Keypoint};

    fn set(descs: Vec<Descriptor>) -> DescriptorSet {
        let kps = descs
            .iter()
            .enumerate()
            .map(|(i, _)| Keypoint { x: i as f32, y: 0.0, size: 31.0, angle: 0.0, response: 1.0, octave: 0 })
            .collect();
        DescriptorSet::new(kps, descs)
    }

    /// Descriptor with the first `n` bits set.
    fn bits(n: usize) -> Descriptor {
        let mut d = [0u8; 32];
        for i in 0..n {
            d[i / 8] |= 1 << (i % 8);
        }
        d
    }

    #[test]
    fn test_clear_match_is_good() {
        // query 0 bits; ref: 2 bits away and 100 bits away → 2 < 0.75·100
        let stats = match_sets(&set(vec![bits(0)]), &set(vec![bits(100), bits(2)]), 0.75);
        assert_eq!(stats.good_match_count, 1);
        assert_eq!(stats.matches[0], DescriptorMatch { query_idx: 0, train_idx: 1, distance: 2 });
        assert_eq!(stats.mean_distance, 2.0);
    }

    #[test]
    fn test_ambiguous_match_rejected() {
        // 40 vs 50: 40 < 37.5 is false
        let stats = match_sets(&set(vec![bits(0)]), &set(vec![bits(40), bits(50)]), 0.75);
        assert_eq!(stats.good_match_count, 0);
        assert!(stats.mean_distance.is_infinite());
        assert!(stats.matches.is_empty());
    }

    #[test]
    fn test_ratio_boundary_is_strict() {
        // 30 < 0.75·40 = 30 is false
        let stats = match_sets(&set(vec![bits(0)]), &set(vec![bits(30), bits(40)]), 0.75);
        assert_eq!(stats.good_match_count, 0);
    }

    #[test]
    fn test_exact_duplicates_count_as_good() {
        let stats = match_sets(&set(vec![bits(5)]), &set(vec![bits(5), bits(5)]), 0.75);
        assert_eq!(stats.good_match_count, 1);
        assert_eq!(stats.mean_distance, 0.0);
        assert_eq!(stats.matches[0].train_idx, 0);
    }

    #[test]
    fn test_single_reference_yields_nothing() {
        let stats = match_sets(&set(vec![bits(0)]), &set(vec![bits(0)]), 0.75);
        assert_eq!(stats, MatchStats::empty());
    }

    #[test]
    fn test_empty_query() {
        let stats = match_sets(&DescriptorSet::empty(), &set(vec![bits(1), bits(9)]), 0.75);
        assert_eq!(stats.good_match_count, 0);
    }

    #[test]
    fn test_self_match_is_complete() {
        let descs: Vec<Descriptor> = (0..20).map(|i| bits(i * 12)).collect();
        let s = set(descs);
        let stats = match_sets(&s, &s, 0.75);
        assert_eq!(stats.good_match_count, 20);
        assert_eq!(stats.mean_distance, 0.0);
        for (i, m) in stats.matches.iter().enumerate() {
            assert_eq!((m.query_idx, m.train_idx), (i, i));
        }
    }

    #[test]
    fn test_mean_distance_over_good_matches_only() {
        let query = set(vec![bits(0), bits(200), bits(52)]);
        let reference = set(vec![bits(4), bits(100), bits(204)]);
        // q0: 4 vs 100 → good (4). q1: 4 vs 100 → good (4). q2: 48 vs 48 → rejected.
        let stats = match_sets(&query, &reference, 0.75);
        assert_eq!(stats.good_match_count, 2);
        assert_eq!(stats.mean_distance, 4.0);
    }
}
