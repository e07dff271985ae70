// tests/test_corpus.rs — Persistent corpus: reopen, concurrency, fingerprints.

mod common;

use std::fs;
use std::sync::Arc;
use std::thread;

use lensa::{
    ArtworkId, CorpusError, CorpusStore, DescriptorSet, ExtractorConfig, FileCorpus, Keypoint, OrbExtractor,
    RecognitionConfig, RecognitionEngine,
};
use lensa::image::Image;

fn extractor() -> OrbExtractor {
    OrbExtractor::new(ExtractorConfig::default()).unwrap()
}

#[test]
fn test_reopened_corpus_preserves_sets_and_order() {
    let dir = tempfile::tempdir().unwrap();
    let ex = extractor();
    let sets: Vec<(u64, DescriptorSet)> = [(9, 201), (4, 202), (17, 203)]
        .iter()
        .map(|&(id, seed)| (id, ex.extract(&Image::from_gray(&common::painting(seed))).unwrap()))
        .collect();

    {
        let store = FileCorpus::create(dir.path(), ex.fingerprint()).unwrap();
        for (id, set) in &sets {
            store.put(ArtworkId(*id), set.clone()).unwrap();
        }
    }

    let store = FileCorpus::open(dir.path()).unwrap();
    assert_eq!(store.extractor_fingerprint().as_deref(), Some(ex.fingerprint()));
    let all = store.all().unwrap();
    let ids: Vec<u64> = all.iter().map(|e| e.artwork_id.0).collect();
    assert_eq!(ids, vec![9, 4, 17]);
    for ((_, set), entry) in sets.iter().zip(&all) {
        assert_eq!(*entry.descriptors, *set);
    }
}

#[test]
fn test_concurrent_puts_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCorpus::create(dir.path(), "fp").unwrap();
    let set = extractor().extract(&Image::from_gray(&common::painting(210))).unwrap();

    thread::scope(|s| {
        for t in 0..4u64 {
            let store = &store;
            let set = &set;
            s.spawn(move || {
                for i in 0..10u64 {
                    store.put(ArtworkId(t * 100 + i), set.clone()).unwrap();
                    // Readers always see whole entries.
                    for entry in store.all().unwrap() {
                        assert_eq!(entry.descriptors.len(), set.len());
                    }
                }
            });
        }
    });
    assert_eq!(store.len(), 40);

    let reopened = FileCorpus::open(dir.path()).unwrap();
    assert_eq!(reopened.len(), 40);
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().map_or(true, |ext| ext != "orb" && ext != "json"))
        .collect();
    assert!(leftovers.is_empty(), "temporary files left behind: {leftovers:?}");
}

/// `n` distinct descriptors tagged with `tag`.
fn tagged_set(n: usize, tag: u8) -> DescriptorSet {
    let kps = (0..n)
        .map(|i| Keypoint { x: i as f32, y: tag as f32, size: 31.0, angle: 0.0, response: 1.0, octave: 0 })
        .collect();
    let descs = (0..n).map(|i| [tag.wrapping_mul(16).wrapping_add(i as u8); 32]).collect();
    DescriptorSet::new(kps, descs)
}

#[test]
fn test_concurrent_puts_same_id_agree_with_disk() {
    for round in 0..50 {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCorpus::create(dir.path(), "fp").unwrap();
        store.put(ArtworkId(99), tagged_set(2, 9)).unwrap();

        thread::scope(|s| {
            for t in 0..4u8 {
                let store = &store;
                s.spawn(move || store.put(ArtworkId(1), tagged_set(2 + t as usize, t)).unwrap());
            }
        });

        let in_memory = store.get(ArtworkId(1)).unwrap().unwrap();
        let reopened = FileCorpus::open(dir.path()).unwrap();
        let on_disk = reopened.get(ArtworkId(1)).unwrap().unwrap();
        assert_eq!(*in_memory, *on_disk, "round {round}: memory and disk disagree");

        // One slot, one sequence number: artwork 1 stays after 99.
        let ids: Vec<u64> = reopened.all().unwrap().iter().map(|e| e.artwork_id.0).collect();
        assert_eq!(ids, vec![99, 1]);
        assert_eq!(store.len(), 2);
    }
}

#[test]
fn test_replace_keeps_position_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let ex = extractor();
    let a = ex.extract(&Image::from_gray(&common::painting(220))).unwrap();
    let b = ex.extract(&Image::from_gray(&common::painting(221))).unwrap();
    {
        let store = FileCorpus::create(dir.path(), ex.fingerprint()).unwrap();
        store.put(ArtworkId(1), a.clone()).unwrap();
        store.put(ArtworkId(2), a.clone()).unwrap();
        store.put(ArtworkId(1), b.clone()).unwrap();
    }
    let store = FileCorpus::open(dir.path()).unwrap();
    let all = store.all().unwrap();
    assert_eq!(all[0].artwork_id, ArtworkId(1));
    assert_eq!(*all[0].descriptors, b);
    assert_eq!(*all[1].descriptors, a);
}

#[test]
fn test_open_missing_corpus_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(FileCorpus::open(&dir.path().join("nope")).is_err());
}

#[test]
fn test_reopen_with_other_extractor_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    FileCorpus::create(dir.path(), extractor().fingerprint()).unwrap();

    let other = OrbExtractor::new(ExtractorConfig { patch_size: 25, ..ExtractorConfig::default() }).unwrap();
    let err = FileCorpus::open_or_create(dir.path(), other.fingerprint()).err();
    assert!(matches!(err, Some(CorpusError::FingerprintMismatch { .. })));
}

#[test]
fn test_engine_over_reopened_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let ex = Arc::new(extractor());
    {
        let store = FileCorpus::create(dir.path(), ex.fingerprint()).unwrap();
        for (id, seed) in [(300, 230), (301, 231)] {
            store.put(ArtworkId(id), ex.extract(&Image::from_gray(&common::painting(seed))).unwrap()).unwrap();
        }
    }

    let store = Arc::new(FileCorpus::open(dir.path()).unwrap());
    let engine = RecognitionEngine::new(ex, store, RecognitionConfig::default());
    let photo = common::rephotograph(&common::painting(231), -6.0, 15);
    assert_eq!(engine.recognize(&Image::from_gray(&photo)).artwork_id(), Some(ArtworkId(301)));
}
