use std::path::{Path, PathBuf};
use std::sync::Arc;

use rust_htslib::bam::record::{Aux, Cigar, Record};
use rust_htslib::bam::{IndexedReader, Read};

use crate::genomics::source::{AlignmentSource, ReadCursor, ReadIter};
use crate::genomics::{AlignedRead, CigarOp, CigarOpKind};
use crate::ledger::SourceIdentity;
use crate::{PileupError, Result};

/// Coordinate-sorted, indexed BAM file.
#[derive(Debug, Clone)]
pub struct BamSource {
    path: PathBuf,
    identity: SourceIdentity,
}

impl BamSource {
    /// Identify `path` (content digest, or the declared `uuid`) and check it can be opened.
    pub fn open(path: &Path, uuid: Option<&str>) -> Result<Self> {
        let identity = match uuid {
            Some(uuid) => SourceIdentity::with_uuid(path, uuid)?,
            None => SourceIdentity::from_file(path)?,
        };
        IndexedReader::from_path(identity.path()).map_err(|e| PileupError::Alignment {
            source_path: identity.path().display().to_string(),
            reason: format!("cannot open indexed BAM: {}", e),
        })?;
        Ok(Self {
            path: identity.path().to_path_buf(),
            identity,
        })
    }

    /// BAM path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AlignmentSource for BamSource {
    fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    fn open(&self) -> Result<Box<dyn ReadCursor>> {
        let reader = IndexedReader::from_path(&self.path)?;
        Ok(Box::new(BamCursor {
            path: self.path.display().to_string(),
            reader,
        }))
    }
}

struct BamCursor {
    path: String,
    reader: IndexedReader,
}

impl ReadCursor for BamCursor {
    fn fetch(&mut self, chrom: &str, start: u64, end: u64) -> Result<ReadIter<'_>> {
        let Some(tid) = self.reader.header().tid(chrom.as_bytes()) else {
            return Ok(Box::new(std::iter::empty()));
        };
        let begin = start.saturating_sub(1) as i64;
        self.reader.fetch((tid, begin, end as i64))?;
        let chrom: Arc<str> = Arc::from(chrom);
        let path = self.path.clone();
        Ok(Box::new(self.reader.records().map(move |record| {
            let record = record.map_err(|e| PileupError::Alignment {
                source_path: path.clone(),
                reason: format!("failed to read record: {}", e),
            })?;
            Ok(convert(&record, &chrom))
        })))
    }
}

fn convert(record: &Record, chrom: &Arc<str>) -> AlignedRead {
    let cigar = record
        .cigar()
        .iter()
        .map(|op| match op {
            Cigar::Match(n) => CigarOp::new(CigarOpKind::Match, *n),
            Cigar::Ins(n) => CigarOp::new(CigarOpKind::Insertion, *n),
            Cigar::Del(n) => CigarOp::new(CigarOpKind::Deletion, *n),
            Cigar::RefSkip(n) => CigarOp::new(CigarOpKind::Skip, *n),
            Cigar::SoftClip(n) => CigarOp::new(CigarOpKind::SoftClip, *n),
            Cigar::HardClip(n) => CigarOp::new(CigarOpKind::HardClip, *n),
            Cigar::Pad(n) => CigarOp::new(CigarOpKind::Padding, *n),
            Cigar::Equal(n) => CigarOp::new(CigarOpKind::Equal, *n),
            Cigar::Diff(n) => CigarOp::new(CigarOpKind::Diff, *n),
        })
        .collect();
    let read = AlignedRead::new(
        Arc::clone(chrom),
        (record.pos().max(0) as u64) + 1,
        record.mapq(),
        cigar,
        record.seq().as_bytes(),
        record.qual().to_vec(),
        false,
    )
    .with_flags(record.flags());
    match record.aux(b"MD") {
        Ok(Aux::String(md)) => read.with_md(md),
        _ => read,
    }
}
