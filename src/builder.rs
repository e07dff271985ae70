// builder.rs — Offline corpus build: reference images → descriptor sets.
//
// Extraction runs in parallel on a bounded rayon pool; results are then
// stored one by one in source order, so a rebuild of the same source writes
// byte-identical records. One bad image never stops the run: its failure is
// recorded in the summary and the next image is processed.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::corpus::CorpusStore;
use crate::descriptor::{ArtworkId, DescriptorSet};
use crate::error::{BuildFailure, CorpusError, ExtractionError};
use crate::orb::OrbExtractor;

/// File extensions recognised as reference images.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "bmp"];

/// Where a reference image's bytes come from.
#[derive(Debug, Clone)]
pub enum ImageOrigin {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

/// One artwork to enroll.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub artwork_id: ArtworkId,
    pub origin: ImageOrigin,
}

impl ReferenceImage {
    pub fn from_path(artwork_id: ArtworkId, path: impl Into<PathBuf>) -> Self {
        ReferenceImage { artwork_id, origin: ImageOrigin::Path(path.into()) }
    }

    pub fn from_bytes(artwork_id: ArtworkId, bytes: impl Into<Arc<[u8]>>) -> Self {
        ReferenceImage { artwork_id, origin: ImageOrigin::Bytes(bytes.into()) }
    }
}

/// Produces the reference images for a build.
pub trait ImageSource {
    /// Images to enroll, in build order, plus paths that were skipped
    /// (no artwork id in the name, or an id already taken by an earlier
    /// file).
    fn images(&self) -> Result<(Vec<ReferenceImage>, Vec<PathBuf>), CorpusError>;
}

/// A directory of `<artwork_id>.<ext>` files. When several files share an
/// id, the first by file name is used.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectorySource { dir: dir.into() }
    }
}

impl ImageSource for DirectorySource {
    fn images(&self) -> Result<(Vec<ReferenceImage>, Vec<PathBuf>), CorpusError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut images = Vec::new();
        let mut skipped = Vec::new();
        let mut seen = HashSet::new();
        for path in paths {
            match artwork_id_from_path(&path) {
                Some(id) if seen.insert(id) => images.push(ReferenceImage::from_path(id, path)),
                Some(id) => {
                    warn!(artwork_id = %id, path = %path.display(), "another file already provides this artwork, skipping");
                    skipped.push(path);
                }
                None => {
                    debug!(path = %path.display(), "no artwork id in file name, skipping");
                    skipped.push(path);
                }
            }
        }
        Ok((images, skipped))
    }
}

/// An explicit list of reference images.
#[derive(Debug, Clone, Default)]
pub struct ListSource {
    pub images: Vec<ReferenceImage>,
}

impl ListSource {
    pub fn new(images: Vec<ReferenceImage>) -> Self {
        ListSource { images }
    }
}

impl ImageSource for ListSource {
    fn images(&self) -> Result<(Vec<ReferenceImage>, Vec<PathBuf>), CorpusError> {
        Ok((self.images.clone(), Vec::new()))
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Artwork id from a purely numeric file stem (`436535.jpg` → 436535).
pub fn artwork_id_from_path(path: &Path) -> Option<ArtworkId> {
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Outcome of a build run.
#[derive(Debug, Default)]
pub struct BuildSummary {
    /// Enrolled artworks, in source order.
    pub succeeded: Vec<ArtworkId>,
    /// Artworks that could not be enrolled, in source order.
    pub failed: Vec<(ArtworkId, BuildFailure)>,
    /// Files that were not attempted.
    pub skipped: Vec<PathBuf>,
}

/// Enrolls reference images into a corpus.
pub struct CorpusBuilder<S: CorpusStore + ?Sized> {
    extractor: Arc<OrbExtractor>,
    store: Arc<S>,
    threads: Option<usize>,
}

impl<S: CorpusStore + ?Sized> CorpusBuilder<S> {
    pub fn new(extractor: Arc<OrbExtractor>, store: Arc<S>) -> Self {
        CorpusBuilder { extractor, store, threads: None }
    }

    /// Bound the extraction pool. `None` uses every available core.
    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    /// Enroll every image of `source`.
    ///
    /// Returns `Err` only when the run cannot start at all: the source
    /// cannot be listed, or the store belongs to a different extractor.
    /// Per-image problems land in the summary.
    pub fn build(&self, source: &dyn ImageSource) -> Result<BuildSummary, CorpusError> {
        self.store.ensure_fingerprint(self.extractor.fingerprint())?;
        let (images, skipped) = source.images()?;
        info!(images = images.len(), skipped = skipped.len(), "starting corpus build");

        let extracted = self.extract_all(&images)?;

        let mut summary = BuildSummary { skipped, ..Default::default() };
        for (image, result) in images.iter().zip(extracted) {
            let id = image.artwork_id;
            match result.map_err(BuildFailure::from).and_then(|set| self.store_set(id, set)) {
                Ok(()) => summary.succeeded.push(id),
                Err(e) => {
                    warn!(artwork_id = %id, error = %e, "could not enroll artwork");
                    summary.failed.push((id, e));
                }
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "corpus build finished"
        );
        Ok(summary)
    }

    /// Whether the store holds at least one artwork with descriptors, i.e.
    /// whether a query against it can do anything but fail with
    /// `EmptyCorpus`.
    pub fn corpus_is_matchable(&self) -> Result<bool, CorpusError> {
        Ok(self.store.all()?.iter().any(|e| !e.descriptors.is_empty()))
    }

    /// Add or replace a single artwork.
    pub fn enroll(&self, image: &ReferenceImage) -> Result<(), BuildFailure> {
        self.store.ensure_fingerprint(self.extractor.fingerprint())?;
        let set = self.extract_one(image)?;
        self.store_set(image.artwork_id, set)
    }

    fn extract_all(&self, images: &[ReferenceImage]) -> Result<Vec<Result<DescriptorSet, ExtractionError>>, CorpusError> {
        let run = || images.par_iter().map(|img| self.extract_one(img)).collect();
        match self.threads {
            None => Ok(run()),
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| CorpusError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
                Ok(pool.install(run))
            }
        }
    }

    fn extract_one(&self, image: &ReferenceImage) -> Result<DescriptorSet, ExtractionError> {
        let set = match &image.origin {
            ImageOrigin::Path(path) => self.extractor.extract_path(path)?,
            ImageOrigin::Bytes(bytes) => self.extractor.extract_bytes(bytes)?,
        };
        debug!(artwork_id = %image.artwork_id, features = set.len(), "extracted reference image");
        Ok(set)
    }

    fn store_set(&self, artwork_id: ArtworkId, set: DescriptorSet) -> Result<(), BuildFailure> {
        if set.is_empty() {
            warn!(%artwork_id, "reference image has no features; it will never match");
        }
        self.store.put(artwork_id, set).map_err(|source| {
            BuildFailure::Store(CorpusError::Write { artwork_id, source: Box::new(source) })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artwork_id_from_numeric_stem() {
        assert_eq!(artwork_id_from_path(Path::new("/refs/436535.jpg")), Some(ArtworkId(436535)));
        assert_eq!(artwork_id_from_path(Path::new("12.PNG")), Some(ArtworkId(12)));
    }

    #[test]
    fn test_artwork_id_rejects_other_names() {
        assert_eq!(artwork_id_from_path(Path::new("mona_lisa.jpg")), None);
        assert_eq!(artwork_id_from_path(Path::new("123a.jpg")), None);
        assert_eq!(artwork_id_from_path(Path::new("+12.jpg")), None);
        assert_eq!(artwork_id_from_path(Path::new(".jpg")), None);
    }

    #[test]
    fn test_image_extensions() {
        assert!(has_image_extension(Path::new("1.jpeg")));
        assert!(has_image_extension(Path::new("1.WebP")));
        assert!(!has_image_extension(Path::new("1.txt")));
        assert!(!has_image_extension(Path::new("1")));
    }

    #[test]
    fn test_directory_source_lists_sorted_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["20.png", "3.jpg", "notes.txt", "cover.jpg"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let (images, skipped) = DirectorySource::new(dir.path()).images().unwrap();
        let ids: Vec<u64> = images.iter().map(|i| i.artwork_id.0).collect();
        assert_eq!(ids, vec![20, 3]);
        assert_eq!(skipped, vec![dir.path().join("cover.jpg")]);
    }

    #[test]
    fn test_directory_source_skips_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["12.png", "12.jpg", "5.webp"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let (images, skipped) = DirectorySource::new(dir.path()).images().unwrap();
        let ids: Vec<u64> = images.iter().map(|i| i.artwork_id.0).collect();
        assert_eq!(ids, vec![12, 5]);
        assert!(matches!(&images[0].origin, ImageOrigin::Path(p) if p.ends_with("12.jpg")));
        assert_eq!(skipped, vec![dir.path().join("12.png")]);
    }
}
