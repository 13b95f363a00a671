//! # Pileup Store
//!
//! A persistent, per-position, per-strand counter database built
//! incrementally from aligned sequencing reads.
//!
//! ## Components
//!
//! 1. **Counter arrays**: one unsigned array per chromosome, strand and
//!    tracked element (bases, quality sums, CIGAR events, reference calls)
//! 2. **Chromosome segments**: the unit of allocation, persistence and
//!    per-worker ownership
//! 3. **Provenance log**: append-only record of every contribution, used to
//!    reject double counting and to reverse additions exactly
//! 4. **Accumulation pipeline**: bootstrap, add, remove, merge and view
//! 5. **Window scanner**: folds candidate positions into fixed-width windows
//!
//! ## Usage Example
//!
//! ```ignore
//! use std::path::Path;
//!
//! use pileup_store::genomics::{AlignmentSource, BamSource, FaiReference};
//! use pileup_store::{pipeline, PipelineConfig, StoreParameters};
//!
//! let store = Path::new("cohort.qplp");
//! let reference = FaiReference::open(Path::new("GRCh38.fa"))?;
//! pipeline::bootstrap(store, &reference, StoreParameters::default(), false)?;
//!
//! let sources: Vec<Box<dyn AlignmentSource>> =
//!     vec![Box::new(BamSource::open(Path::new("sample1.bam"), None)?)];
//! let summary = pipeline::add(store, &sources, &PipelineConfig::default())?;
//! println!("{} reads counted", summary.sources[0].records);
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod config; // Store, pipeline and scan parameters
pub mod genomics; // Aligned reads, record sources, reference lengths
pub mod ledger; // Provenance log
pub mod pipeline; // Bootstrap, add, remove, merge, view
pub mod scan; // Window scanner
pub mod store; // Counter arrays, segments, on-disk container

// Re-exports for convenience
pub use config::{PipelineConfig, ScanConfig, StoreParameters};
pub use ledger::{EntryStatus, Operation, ProvenanceEntry, ProvenanceLog, SourceIdentity};
pub use store::{ChromosomeSegment, CounterArray, Element, PileupStore, Strand};

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, PileupError>;

/// Errors raised by store, pipeline and scanner operations.
#[derive(Error, Debug)]
pub enum PileupError {
    /// A store file already exists and overwrite was not requested.
    #[error("store {} already exists (use overwrite to replace it)", .0.display())]
    AlreadyExists(PathBuf),

    /// The container violates a structural invariant.
    #[error("corrupt store {}: {reason}", path.display())]
    CorruptStore {
        /// Store path.
        path: PathBuf,
        /// What failed validation.
        reason: String,
    },

    /// Chromosome is not part of the store.
    #[error("unknown chromosome '{0}'")]
    UnknownChromosome(String),

    /// The source already has an unreversed `add` entry.
    #[error("source {source_path} (signature {signature}) was already added to the store")]
    DuplicateContribution {
        /// Path of the offending source.
        source_path: String,
        /// Content signature of the source.
        signature: String,
    },

    /// No unreversed `add` entry matches the source being removed.
    #[error("no unreversed add entry for {source_path}: {reason}")]
    NoMatchingContribution {
        /// Path of the source being removed.
        source_path: String,
        /// Why the lookup failed.
        reason: String,
    },

    /// Two stores being merged both carry the same unreversed source.
    #[error("source {source_path} (signature {signature}) is present in both {left} and {right}")]
    OverlappingContribution {
        /// Path recorded for the shared source.
        source_path: String,
        /// Content signature of the shared source.
        signature: String,
        /// First store carrying the source.
        left: String,
        /// Second store carrying the source.
        right: String,
    },

    /// Stores do not share the same schema or parameters.
    #[error("incompatible store {}: {reason}", path.display())]
    IncompatibleStore {
        /// Store that failed the comparison.
        path: PathBuf,
        /// Which property differs.
        reason: String,
    },

    /// Another invocation holds the write lock.
    #[error("store {} is locked by another writer ({})", path.display(), lock.display())]
    StoreBusy {
        /// Store path.
        path: PathBuf,
        /// Lock file that is held.
        lock: PathBuf,
    },

    /// A counter would leave its representable range.
    #[error("counter {element} on {chromosome}:{position} ({strand}) would {fault}")]
    CounterRange {
        /// Chromosome name.
        chromosome: String,
        /// 1-based position.
        position: u64,
        /// Strand label.
        strand: &'static str,
        /// Element name.
        element: &'static str,
        /// `overflow` or `underflow`.
        fault: &'static str,
    },

    /// A region string or bounds are invalid for the chromosome.
    #[error("invalid region '{region}': {reason}")]
    InvalidRegion {
        /// Region as given.
        region: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A parameter value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Reference lengths could not be established.
    #[error("reference {}: {reason}", path.display())]
    Reference {
        /// Reference path.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// Alignment source failed at the source level (not a single bad read).
    #[error("alignment source {source_path}: {reason}")]
    Alignment {
        /// Source path.
        source_path: String,
        /// Failure description.
        reason: String,
    },

    /// Error reported by htslib.
    #[error("htslib error: {0}")]
    Hts(#[from] rust_htslib::errors::Error),

    /// The operation was cancelled before commit.
    #[error("operation cancelled")]
    Cancelled,

    /// The worker pool could not be created.
    #[error("worker pool: {0}")]
    WorkerPool(String),

    /// Underlying filesystem failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Original error.
        #[source]
        source: std::io::Error,
    },
}

impl PileupError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PileupError::Io {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for a [`PileupError::CorruptStore`].
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PileupError::CorruptStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`PileupError::IncompatibleStore`].
    pub fn incompatible(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PileupError::IncompatibleStore {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
