// corpus.rs — Reference corpus storage: one descriptor set per artwork.
//
// Two stores implement `CorpusStore`:
//
//   MemoryCorpus   in-process only. Used in tests and as a cache.
//   FileCorpus     a directory on disk:
//
//     corpus/
//       corpus.json     format version, extractor fingerprint, creation time
//       436535.orb      bincode record for artwork 436535
//       437329.orb
//
// Readers never see a half-updated entry. In memory, a `put` swaps one
// `Arc<DescriptorSet>` under a short write lock; on disk, the record is
// written to a temp file in the same directory and renamed over the old
// one. Writes to one artwork id are serialized.
//
// Entries are kept in insertion order. Replacing an entry keeps its
// position; removing and re-adding moves it to the end.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::descriptor::{ArtworkId, Descriptor, DescriptorSet, Keypoint};
use crate::error::CorpusError;

/// On-disk record layout version.
pub const FORMAT_VERSION: u32 = 1;

const META_FILE: &str = "corpus.json";
const RECORD_EXT: &str = "orb";

/// One artwork and its reference descriptors.
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub artwork_id: ArtworkId,
    pub descriptors: Arc<DescriptorSet>,
}

/// Keyed storage of reference descriptor sets.
pub trait CorpusStore: Send + Sync {
    /// Insert or replace the set for `artwork_id`.
    fn put(&self, artwork_id: ArtworkId, set: DescriptorSet) -> Result<(), CorpusError>;

    fn get(&self, artwork_id: ArtworkId) -> Result<Option<Arc<DescriptorSet>>, CorpusError>;

    /// Snapshot of every entry, in insertion order.
    fn all(&self) -> Result<Vec<CorpusEntry>, CorpusError>;

    /// Returns whether an entry was removed.
    fn remove(&self, artwork_id: ArtworkId) -> Result<bool, CorpusError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fingerprint of the extractor the stored sets were produced with.
    fn extractor_fingerprint(&self) -> Option<String>;

    /// Record `fingerprint` if the store has none yet; fail if it holds a
    /// different one.
    fn ensure_fingerprint(&self, fingerprint: &str) -> Result<(), CorpusError>;
}

// ---------------------------------------------------------------------------
// Shared in-memory index
// ---------------------------------------------------------------------------

struct Slot {
    seq: u64,
    set: Arc<DescriptorSet>,
}

#[derive(Default)]
struct Index {
    slots: HashMap<ArtworkId, Slot>,
}

impl Index {
    fn snapshot(&self) -> Vec<CorpusEntry> {
        let mut entries: Vec<(u64, CorpusEntry)> = self
            .slots
            .iter()
            .map(|(&artwork_id, slot)| {
                (slot.seq, CorpusEntry { artwork_id, descriptors: Arc::clone(&slot.set) })
            })
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, e)| e).collect()
    }

    fn seq_of(&self, artwork_id: ArtworkId) -> Option<u64> {
        self.slots.get(&artwork_id).map(|s| s.seq)
    }
}

fn mismatch(stored: &str, wanted: &str) -> CorpusError {
    CorpusError::FingerprintMismatch { corpus: stored.to_string(), engine: wanted.to_string() }
}

// ---------------------------------------------------------------------------
// MemoryCorpus
// ---------------------------------------------------------------------------

/// In-memory corpus.
#[derive(Default)]
pub struct MemoryCorpus {
    index: RwLock<Index>,
    next_seq: AtomicU64,
    fingerprint: RwLock<Option<String>>,
}

impl MemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty corpus already bound to an extractor fingerprint.
    pub fn with_fingerprint(fingerprint: impl Into<String>) -> Self {
        MemoryCorpus { fingerprint: RwLock::new(Some(fingerprint.into())), ..Self::default() }
    }
}

impl CorpusStore for MemoryCorpus {
    fn put(&self, artwork_id: ArtworkId, set: DescriptorSet) -> Result<(), CorpusError> {
        let set = Arc::new(set);
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let seq = index
            .seq_of(artwork_id)
            .unwrap_or_else(|| self.next_seq.fetch_add(1, Ordering::Relaxed));
        index.slots.insert(artwork_id, Slot { seq, set });
        Ok(())
    }

    fn get(&self, artwork_id: ArtworkId) -> Result<Option<Arc<DescriptorSet>>, CorpusError> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        Ok(index.slots.get(&artwork_id).map(|s| Arc::clone(&s.set)))
    }

    fn all(&self) -> Result<Vec<CorpusEntry>, CorpusError> {
        Ok(self.index.read().unwrap_or_else(PoisonError::into_inner).snapshot())
    }

    fn remove(&self, artwork_id: ArtworkId) -> Result<bool, CorpusError> {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        Ok(index.slots.remove(&artwork_id).is_some())
    }

    fn len(&self) -> usize {
        self.index.read().unwrap_or_else(PoisonError::into_inner).slots.len()
    }

    fn extractor_fingerprint(&self) -> Option<String> {
        self.fingerprint.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn ensure_fingerprint(&self, fingerprint: &str) -> Result<(), CorpusError> {
        let mut fp = self.fingerprint.write().unwrap_or_else(PoisonError::into_inner);
        match fp.as_deref() {
            Some(stored) if stored != fingerprint => Err(mismatch(stored, fingerprint)),
            Some(_) => Ok(()),
            None => {
                *fp = Some(fingerprint.to_string());
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FileCorpus
// ---------------------------------------------------------------------------

/// Contents of `corpus.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusMetadata {
    pub format_version: u32,
    pub extractor_fingerprint: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Version of lensa that created the corpus.
    pub version: String,
}

impl CorpusMetadata {
    fn new(fingerprint: &str) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            extractor_fingerprint: fingerprint.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Record as written: borrows the set being stored.
#[derive(Serialize)]
struct RecordOut<'a> {
    format_version: u32,
    artwork_id: ArtworkId,
    seq: u64,
    keypoints: &'a [Keypoint],
    descriptors: &'a [Descriptor],
}

/// Record as read back.
#[derive(Deserialize)]
struct RecordIn {
    format_version: u32,
    artwork_id: ArtworkId,
    seq: u64,
    keypoints: Vec<Keypoint>,
    descriptors: Vec<Descriptor>,
}

/// Directory-backed corpus.
pub struct FileCorpus {
    dir: PathBuf,
    metadata: CorpusMetadata,
    index: RwLock<Index>,
    next_seq: AtomicU64,
    /// Per-artwork write locks: seq allocation, file write and index update
    /// for one id happen as a unit.
    writers: Mutex<HashMap<ArtworkId, Arc<Mutex<()>>>>,
}

impl FileCorpus {
    /// Create an empty corpus in `dir`, deleting any records already there.
    pub fn create(dir: &Path, fingerprint: &str) -> Result<Self, CorpusError> {
        let unwritable = |source| CorpusError::Unwritable { path: dir.to_path_buf(), source };
        fs::create_dir_all(dir).map_err(unwritable)?;

        for path in record_paths(dir)? {
            fs::remove_file(&path)?;
        }

        let metadata = CorpusMetadata::new(fingerprint);
        let json = serde_json::to_vec_pretty(&metadata)?;
        write_atomic(dir, &dir.join(META_FILE), &json).map_err(unwritable)?;
        info!(dir = %dir.display(), "created corpus");

        Ok(FileCorpus {
            dir: dir.to_path_buf(),
            metadata,
            index: RwLock::new(Index::default()),
            next_seq: AtomicU64::new(0),
            writers: Mutex::default(),
        })
    }

    /// Open an existing corpus and load every record.
    pub fn open(dir: &Path) -> Result<Self, CorpusError> {
        let meta_bytes = fs::read(dir.join(META_FILE))?;
        let metadata: CorpusMetadata = serde_json::from_slice(&meta_bytes)?;
        if metadata.format_version != FORMAT_VERSION {
            return Err(CorpusError::Corrupt {
                path: dir.join(META_FILE),
                reason: format!("unsupported format version {}", metadata.format_version),
            });
        }

        let mut index = Index::default();
        let mut next_seq = 0;
        for path in record_paths(dir)? {
            let (artwork_id, seq, set) = read_record(&path)?;
            next_seq = next_seq.max(seq + 1);
            index.slots.insert(artwork_id, Slot { seq, set: Arc::new(set) });
        }
        debug!(dir = %dir.display(), entries = index.slots.len(), "opened corpus");

        Ok(FileCorpus {
            dir: dir.to_path_buf(),
            metadata,
            index: RwLock::new(index),
            next_seq: AtomicU64::new(next_seq),
            writers: Mutex::default(),
        })
    }

    /// Open `dir` if it holds a corpus, otherwise create one. An existing
    /// corpus must carry `fingerprint`.
    pub fn open_or_create(dir: &Path, fingerprint: &str) -> Result<Self, CorpusError> {
        if !dir.join(META_FILE).exists() {
            return Self::create(dir, fingerprint);
        }
        let corpus = Self::open(dir)?;
        corpus.ensure_fingerprint(fingerprint)?;
        Ok(corpus)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata(&self) -> &CorpusMetadata {
        &self.metadata
    }

    fn record_path(&self, artwork_id: ArtworkId) -> PathBuf {
        self.dir.join(format!("{artwork_id}.{RECORD_EXT}"))
    }

    fn writer(&self, artwork_id: ArtworkId) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(writers.entry(artwork_id).or_default())
    }
}

impl CorpusStore for FileCorpus {
    fn put(&self, artwork_id: ArtworkId, set: DescriptorSet) -> Result<(), CorpusError> {
        let writer = self.writer(artwork_id);
        let _guard = writer.lock().unwrap_or_else(PoisonError::into_inner);

        let seq = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .seq_of(artwork_id)
            .unwrap_or_else(|| self.next_seq.fetch_add(1, Ordering::Relaxed));

        let record = RecordOut {
            format_version: FORMAT_VERSION,
            artwork_id,
            seq,
            keypoints: set.keypoints(),
            descriptors: set.descriptors(),
        };
        let bytes = bincode::serialize(&record).map_err(CorpusError::Encode)?;
        write_atomic(&self.dir, &self.record_path(artwork_id), &bytes)?;

        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index.slots.insert(artwork_id, Slot { seq, set: Arc::new(set) });
        Ok(())
    }

    fn get(&self, artwork_id: ArtworkId) -> Result<Option<Arc<DescriptorSet>>, CorpusError> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        Ok(index.slots.get(&artwork_id).map(|s| Arc::clone(&s.set)))
    }

    fn all(&self) -> Result<Vec<CorpusEntry>, CorpusError> {
        Ok(self.index.read().unwrap_or_else(PoisonError::into_inner).snapshot())
    }

    fn remove(&self, artwork_id: ArtworkId) -> Result<bool, CorpusError> {
        let writer = self.writer(artwork_id);
        let _guard = writer.lock().unwrap_or_else(PoisonError::into_inner);

        match fs::remove_file(self.record_path(artwork_id)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        Ok(index.slots.remove(&artwork_id).is_some())
    }

    fn len(&self) -> usize {
        self.index.read().unwrap_or_else(PoisonError::into_inner).slots.len()
    }

    fn extractor_fingerprint(&self) -> Option<String> {
        Some(self.metadata.extractor_fingerprint.clone())
    }

    fn ensure_fingerprint(&self, fingerprint: &str) -> Result<(), CorpusError> {
        let stored = &self.metadata.extractor_fingerprint;
        if stored != fingerprint {
            return Err(mismatch(stored, fingerprint));
        }
        Ok(())
    }
}

/// Every `*.orb` file in `dir`, sorted by name.
fn record_paths(dir: &Path) -> Result<Vec<PathBuf>, CorpusError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == RECORD_EXT) && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn read_record(path: &Path) -> Result<(ArtworkId, u64, DescriptorSet), CorpusError> {
    let corrupt = |reason: String| CorpusError::Corrupt { path: path.to_path_buf(), reason };

    let bytes = fs::read(path)?;
    let record: RecordIn = bincode::deserialize(&bytes).map_err(|e| corrupt(e.to_string()))?;
    if record.format_version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {}", record.format_version)));
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if stem != record.artwork_id.to_string() {
        return Err(corrupt(format!("record holds artwork {}", record.artwork_id)));
    }
    if record.keypoints.len() != record.descriptors.len() {
        return Err(corrupt(format!(
            "{} keypoints but {} descriptors",
            record.keypoints.len(),
            record.descriptors.len()
        )));
    }
    Ok((record.artwork_id, record.seq, DescriptorSet::new(record.keypoints, record.descriptors)))
}

/// Write `bytes` to `target` through a temp file in `dir` and a rename.
fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set(n: usize, seed: u8) -> DescriptorSet {
        let kps = (0..n)
            .map(|i| Keypoint {
                x: i as f32 * 3.0,
                y: seed as f32,
                size: 31.0,
                angle: 0.5,
                response: (n - i) as f32,
                octave: (i % 3) as u32,
            })
            .collect();
        let descs = (0..n).map(|i| [seed.wrapping_add(i as u8); 32]).collect();
        DescriptorSet::new(kps, descs)
    }

    fn ids(entries: &[CorpusEntry]) -> Vec<u64> {
        entries.iter().map(|e| e.artwork_id.0).collect()
    }

    #[test]
    fn test_memory_put_get_remove() {
        let store = MemoryCorpus::new();
        assert!(store.is_empty());
        store.put(ArtworkId(1), sample_set(4, 1)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(*store.get(ArtworkId(1)).unwrap().unwrap(), sample_set(4, 1));
        assert!(store.get(ArtworkId(2)).unwrap().is_none());
        assert!(store.remove(ArtworkId(1)).unwrap());
        assert!(!store.remove(ArtworkId(1)).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_insertion_order_and_replace() {
        let store = MemoryCorpus::new();
        for id in [30, 10, 20] {
            store.put(ArtworkId(id), sample_set(2, id as u8)).unwrap();
        }
        store.put(ArtworkId(10), sample_set(5, 99)).unwrap();
        let all = store.all().unwrap();
        assert_eq!(ids(&all), vec![30, 10, 20]);
        assert_eq!(all[1].descriptors.len(), 5);
    }

    #[test]
    fn test_snapshot_unaffected_by_later_put() {
        let store = MemoryCorpus::new();
        store.put(ArtworkId(1), sample_set(2, 1)).unwrap();
        let snap = store.all().unwrap();
        store.put(ArtworkId(1), sample_set(7, 1)).unwrap();
        assert_eq!(snap[0].descriptors.len(), 2);
    }

    #[test]
    fn test_memory_fingerprint() {
        let store = MemoryCorpus::new();
        assert_eq!(store.extractor_fingerprint(), None);
        store.ensure_fingerprint("abc").unwrap();
        store.ensure_fingerprint("abc").unwrap();
        assert_eq!(store.extractor_fingerprint().as_deref(), Some("abc"));
        assert!(matches!(
            store.ensure_fingerprint("xyz"),
            Err(CorpusError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn test_file_roundtrip_and_order() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileCorpus::create(dir.path(), "fp").unwrap();
            store.put(ArtworkId(500), sample_set(3, 5)).unwrap();
            store.put(ArtworkId(7), sample_set(0, 7)).unwrap();
            store.put(ArtworkId(42), sample_set(6, 42)).unwrap();
            store.put(ArtworkId(500), sample_set(4, 6)).unwrap();
        }
        let store = FileCorpus::open(dir.path()).unwrap();
        let all = store.all().unwrap();
        assert_eq!(ids(&all), vec![500, 7, 42]);
        assert_eq!(*all[0].descriptors, sample_set(4, 6));
        assert!(all[1].descriptors.is_empty());
        assert_eq!(store.extractor_fingerprint().as_deref(), Some("fp"));
    }

    #[test]
    fn test_file_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCorpus::create(dir.path(), "fp").unwrap();
        store.put(ArtworkId(1), sample_set(2, 1)).unwrap();
        assert!(store.remove(ArtworkId(1)).unwrap());
        assert!(!dir.path().join("1.orb").exists());
        assert!(FileCorpus::open(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_file_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        FileCorpus::create(dir.path(), "fp").unwrap();
        fs::write(dir.path().join("9.orb"), b"\x01\x02garbage").unwrap();
        let err = FileCorpus::open(dir.path()).err().unwrap();
        assert!(matches!(err, CorpusError::Corrupt { .. }), "{err}");
    }

    #[test]
    fn test_create_clears_old_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCorpus::create(dir.path(), "fp").unwrap();
        store.put(ArtworkId(1), sample_set(2, 1)).unwrap();
        drop(store);
        let store = FileCorpus::create(dir.path(), "fp2").unwrap();
        assert!(store.is_empty());
        assert!(FileCorpus::open(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_open_or_create_checks_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        FileCorpus::open_or_create(dir.path(), "one").unwrap();
        FileCorpus::open_or_create(dir.path(), "one").unwrap();
        let err = FileCorpus::open_or_create(dir.path(), "two").err().unwrap();
        assert!(matches!(err, CorpusError::FingerprintMismatch { .. }));
    }
}
