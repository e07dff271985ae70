use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lensa::{
    ArtworkId, CorpusBuilder, CorpusStore, DirectorySource, FailureReason, FileCorpus, LensaConfig,
    OrbExtractor, RansacSimilarity, RecognitionEngine, RecognitionResult, ReferenceImage,
};

#[derive(Parser, Debug)]
#[command(name = "lensa", version, about = "Offline artwork recognition")]
struct Cli {
    /// Path to config file (TOML)
    #[arg(long, global = true, env = "LENSA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build (or update) a corpus from a directory of `<artwork_id>.<ext>` images.
    Build {
        /// Directory of reference images
        #[arg(long)]
        images: PathBuf,
        /// Corpus directory
        #[arg(long)]
        corpus: PathBuf,
        /// Extraction worker threads (default: all cores)
        #[arg(long)]
        threads: Option<usize>,
        /// Delete existing records before building
        #[arg(long)]
        clean: bool,
    },

    /// Add or replace a single artwork.
    Add {
        #[arg(long)]
        id: u64,
        /// Reference image file
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        corpus: PathBuf,
    },

    /// Remove an artwork from the corpus.
    Remove {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        corpus: PathBuf,
    },

    /// List the artworks in a corpus.
    List {
        #[arg(long)]
        corpus: PathBuf,
    },

    /// Recognize a photo.
    Query {
        /// Photo to recognize
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long)]
        ratio_threshold: Option<f32>,
        #[arg(long)]
        min_good_matches: Option<usize>,
        #[arg(long)]
        confidence_threshold: Option<f32>,
        /// Require geometric consistency of the matches
        #[arg(long)]
        verify: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => LensaConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => LensaConfig::default(),
    };

    match cli.command {
        Commands::Build { images, corpus, threads, clean } => {
            if threads.is_some() {
                config.build.threads = threads;
            }
            config.validate()?;
            cmd_build(&config, &images, &corpus, clean)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Add { id, image, corpus } => {
            cmd_add(&config, ArtworkId(id), &image, &corpus)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Remove { id, corpus } => {
            let store = FileCorpus::open(&corpus).context("opening corpus")?;
            if store.remove(ArtworkId(id))? {
                println!("removed {id}");
            } else {
                println!("{id} is not in the corpus");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::List { corpus } => {
            cmd_list(&corpus)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Query { image, corpus, ratio_threshold, min_good_matches, confidence_threshold, verify } => {
            let rc = &mut config.recognition;
            if let Some(v) = ratio_threshold {
                rc.ratio_threshold = v;
            }
            if let Some(v) = min_good_matches {
                rc.min_good_matches = v;
            }
            if let Some(v) = confidence_threshold {
                rc.confidence_threshold = v;
            }
            config.validate()?;
            cmd_query(&config, &image, &corpus, verify)
        }
    }
}

fn cmd_build(config: &LensaConfig, images: &Path, corpus: &Path, clean: bool) -> Result<()> {
    let extractor = Arc::new(OrbExtractor::new(config.extractor.clone())?);
    let store = if clean {
        FileCorpus::create(corpus, extractor.fingerprint())?
    } else {
        FileCorpus::open_or_create(corpus, extractor.fingerprint())?
    };
    let builder = CorpusBuilder::new(extractor, Arc::new(store)).with_threads(config.build.threads);

    let summary = builder
        .build(&DirectorySource::new(images))
        .with_context(|| format!("building corpus from {}", images.display()))?;

    println!(
        "{} enrolled, {} failed, {} skipped",
        summary.succeeded.len(),
        summary.failed.len(),
        summary.skipped.len()
    );
    for (id, reason) in &summary.failed {
        println!("  failed {id}: {reason}");
    }
    for path in &summary.skipped {
        println!("  skipped {}", path.display());
    }

    if !builder.corpus_is_matchable()? {
        bail!("corpus {} has no artwork with descriptors", corpus.display());
    }
    Ok(())
}

fn cmd_add(config: &LensaConfig, id: ArtworkId, image: &Path, corpus: &Path) -> Result<()> {
    let extractor = Arc::new(OrbExtractor::new(config.extractor.clone())?);
    let store = FileCorpus::open_or_create(corpus, extractor.fingerprint())?;
    let builder = CorpusBuilder::new(extractor, Arc::new(store));
    builder
        .enroll(&ReferenceImage::from_path(id, image))
        .with_context(|| format!("enrolling {} as {id}", image.display()))?;
    println!("enrolled {id}");
    Ok(())
}

fn cmd_list(corpus: &Path) -> Result<()> {
    let store = FileCorpus::open(corpus).context("opening corpus")?;
    let meta = store.metadata();
    println!(
        "corpus {} (created {}, lensa {}, extractor {})",
        corpus.display(),
        meta.created_at,
        meta.version,
        &meta.extractor_fingerprint[..meta.extractor_fingerprint.len().min(12)]
    );
    for entry in store.all()? {
        println!("{:>10}  {:>5} descriptors", entry.artwork_id, entry.descriptors.len());
    }
    Ok(())
}

fn cmd_query(config: &LensaConfig, image: &Path, corpus: &Path, verify: bool) -> Result<ExitCode> {
    let extractor = Arc::new(OrbExtractor::new(config.extractor.clone())?);
    let store = Arc::new(FileCorpus::open(corpus).context("opening corpus")?);
    let mut engine = RecognitionEngine::new(extractor, store, config.recognition.clone());
    if verify {
        engine = engine.with_verifier(RansacSimilarity::default());
    }

    let report = engine.recognize_path_detailed(image);
    for c in report.candidates.iter().take(5) {
        println!(
            "  candidate {:>10}  good={:<4} mean_dist={:<6.1} confidence={:.3}",
            c.artwork_id, c.good_match_count, c.mean_distance, c.confidence
        );
    }

    match report.result {
        RecognitionResult::Matched { artwork_id, confidence, good_matches } => {
            println!("matched {artwork_id} (confidence {confidence:.3}, {good_matches} good matches)");
            Ok(ExitCode::SUCCESS)
        }
        RecognitionResult::NoMatch { best_confidence_seen } => {
            println!("not recognized, try browsing instead (best confidence {best_confidence_seen:.3})");
            Ok(ExitCode::SUCCESS)
        }
        RecognitionResult::Failed(reason) => {
            match &reason {
                FailureReason::Extraction(e) => {
                    println!("could not analyze image, try again");
                    tracing::debug!(error = %e, "extraction failed");
                }
                FailureReason::EmptyCorpus => println!("corpus has no usable artworks"),
                FailureReason::ExtractorMismatch { corpus, engine } => println!(
                    "corpus was built with extractor {corpus}, this configuration is {engine}; rebuild the corpus"
                ),
                FailureReason::Corpus(e) => println!("could not read corpus: {e}"),
            }
            Ok(ExitCode::from(2))
        }
    }
}
