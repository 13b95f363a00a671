//! Record sources: anything that can replay aligned reads by region.

use std::sync::Arc;

use crate::genomics::AlignedRead;
use crate::ledger::SourceIdentity;
use crate::Result;

/// Lazy stream of reads returned by [`ReadCursor::fetch`].
pub type ReadIter<'a> = Box<dyn Iterator<Item = Result<AlignedRead>> + 'a>;

/// Open reader positioned by region queries.
pub trait ReadCursor {
    /// Reads overlapping `[start, end]` (1-based, inclusive) of `chrom`.
    ///
    /// Chromosomes the source does not know yield no reads.
    fn fetch(&mut self, chrom: &str, start: u64, end: u64) -> Result<ReadIter<'_>>;
}

/// A contribution to the store: identity plus a restartable read stream.
///
/// Each worker calls [`AlignmentSource::open`] for its own cursor, so
/// implementations must be shareable across threads.
pub trait AlignmentSource: Send + Sync + std::fmt::Debug {
    /// Path and content signature recorded in provenance.
    fn identity(&self) -> &SourceIdentity;

    /// Fresh cursor over the source.
    fn open(&self) -> Result<Box<dyn ReadCursor>>;
}

/// Reads held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    identity: SourceIdentity,
    reads: Arc<Vec<AlignedRead>>,
}

impl MemorySource {
    /// Source over `reads` identified by `identity`.
    pub fn new(identity: SourceIdentity, reads: Vec<AlignedRead>) -> Self {
        Self {
            identity,
            reads: Arc::new(reads),
        }
    }

    /// Reads in insertion order.
    pub fn reads(&self) -> &[AlignedRead] {
        &self.reads
    }
}

impl AlignmentSource for MemorySource {
    fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    fn open(&self) -> Result<Box<dyn ReadCursor>> {
        Ok(Box::new(MemoryCursor {
            reads: Arc::clone(&self.reads),
        }))
    }
}

#[derive(Debug)]
struct MemoryCursor {
    reads: Arc<Vec<AlignedRead>>,
}

impl ReadCursor for MemoryCursor {
    fn fetch(&mut self, chrom: &str, start: u64, end: u64) -> Result<ReadIter<'_>> {
        let chrom = chrom.to_string();
        Ok(Box::new(
            self.reads
                .iter()
                .filter(move |read| &*read.chrom == chrom && read.pos <= end && read.end() >= start)
                .cloned()
                .map(Ok),
        ))
    }
}
