//! Genomics inputs: aligned reads, their sources, and reference lengths.
//!
//! Alignment files are consumed through the [`AlignmentSource`] capability
//! so the pipeline never depends on a particular reader.

mod bam;
mod md;
mod pileup;
mod reference;
mod source;
mod types;

pub use bam::BamSource;
pub use md::{MdOp, MdTag};
pub use pileup::{PileupAccumulator, ReadOutcome};
pub use reference::{FaiReference, ReferenceSource, StaticReference};
pub use source::{AlignmentSource, MemorySource, ReadCursor, ReadIter};
pub use types::{flags, parse_cigar, AlignedRead, CigarOp, CigarOpKind};
