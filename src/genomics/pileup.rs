//! Per-read pileup walk: turns one aligned read into counter increments.

use crate::config::{StoreParameters, BLOCK_BUFFER};
use crate::genomics::md::MdTag;
use crate::genomics::{AlignedRead, CigarOpKind};
use crate::store::{ChromosomeSegment, Element, Strand};
use crate::Result;

/// What happened to one read offered to a [`PileupAccumulator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Counters were updated.
    Counted,
    /// Excluded by flags or missing CIGAR.
    Skipped(&'static str),
    /// Plain `M` alignment without an MD tag.
    MissingMd,
    /// Inconsistent record; skipped with a warning.
    Malformed(String),
}

/// Contribution of one source to one block of a chromosome.
///
/// Reads are walked into a zeroed block; positions outside the block are
/// dropped, so a read spanning two blocks is split between the workers
/// that own them.
#[derive(Debug, Clone)]
pub struct PileupAccumulator {
    block: ChromosomeSegment,
    min_base_quality: u8,
}

impl PileupAccumulator {
    /// Accumulator for `[start, end]` of a chromosome of `length` positions.
    pub fn new(name: &str, length: u64, start: u64, end: u64, min_base_quality: u8) -> Self {
        Self {
            block: ChromosomeSegment::zeroed_span(name, length, start, end),
            min_base_quality,
        }
    }

    /// Counters accumulated so far.
    pub fn block(&self) -> &ChromosomeSegment {
        &self.block
    }

    /// Take the accumulated counters.
    pub fn into_block(self) -> ChromosomeSegment {
        self.block
    }

    /// Walk one read into the block.
    pub fn observe(&mut self, read: &AlignedRead) -> Result<ReadOutcome> {
        if let Some(reason) = read.exclusion() {
            return Ok(ReadOutcome::Skipped(reason));
        }
        let mismatches = if read.needs_md() {
            match read.md.as_deref().map(MdTag::parse) {
                None => return Ok(ReadOutcome::MissingMd),
                Some(Err(e)) => return Ok(ReadOutcome::Malformed(e)),
                Some(Ok(md)) => Some(md.mismatch_mask()),
            }
        } else {
            None
        };
        if let Err(reason) = check_shape(read, mismatches.as_deref()) {
            return Ok(ReadOutcome::Malformed(reason));
        }

        let strand = Strand::of(read.is_reverse());
        let mate_unmapped = read.is_mate_unmapped();
        let end = read.end();
        let ops = &read.cigar;
        let is_clip = |kind| matches!(kind, CigarOpKind::SoftClip | CigarOpKind::HardClip);
        let first = ops.iter().position(|op| !is_clip(op.kind)).unwrap_or(ops.len());
        let last = ops.iter().rposition(|op| !is_clip(op.kind)).map_or(first, |i| i + 1);

        // Leading clips occupy the positions just before the read start. Clip
        // positions further than BLOCK_BUFFER from the alignment are not
        // counted, so every block sees the same reads for a position.
        let (leading, _) = read.clip_extent();
        let reach = BLOCK_BUFFER as i64;
        let mut clip_pos = read.pos as i64 - leading as i64;
        for op in &ops[..first] {
            let (element, start_element) = clip_elements(op.kind);
            for _ in 0..op.len {
                if clip_pos >= 1 && read.pos as i64 - clip_pos <= reach {
                    self.block.increment(strand, element, clip_pos as u64)?;
                }
                clip_pos += 1;
            }
            self.block.increment(strand, start_element, read.pos)?;
        }

        let mut ref_pos = read.pos;
        let mut read_offset = 0usize;
        let mut aligned = 0usize;
        for op in &ops[..first] {
            if op.kind == CigarOpKind::SoftClip {
                read_offset += op.len as usize;
            }
        }
        for op in &ops[first..last] {
            let len = u64::from(op.len);
            match op.kind {
                CigarOpKind::Match | CigarOpKind::Equal | CigarOpKind::Diff => {
                    for _ in 0..len {
                        let is_reference = match op.kind {
                            CigarOpKind::Equal => true,
                            CigarOpKind::Diff => false,
                            _ => !mismatches
                                .as_ref()
                                .and_then(|mask| mask.get(aligned).copied())
                                .unwrap_or(false),
                        };
                        self.observe_base(read, strand, ref_pos, read_offset, is_reference, mate_unmapped)?;
                        ref_pos += 1;
                        read_offset += 1;
                        aligned += 1;
                    }
                }
                CigarOpKind::Insertion => {
                    if ref_pos > 1 {
                        self.block.increment(strand, Element::CigarI, ref_pos - 1)?;
                    }
                    read_offset += op.len as usize;
                }
                CigarOpKind::Deletion | CigarOpKind::Skip => {
                    let (element, start_element) = if op.kind == CigarOpKind::Deletion {
                        (Element::CigarD, Element::CigarDStart)
                    } else {
                        (Element::CigarN, Element::CigarNStart)
                    };
                    self.block.increment(strand, start_element, ref_pos)?;
                    for p in ref_pos..ref_pos + len {
                        self.block.increment(strand, element, p)?;
                    }
                    ref_pos += len;
                }
                CigarOpKind::Padding | CigarOpKind::SoftClip | CigarOpKind::HardClip => {}
            }
        }

        self.block.increment(strand, Element::StartAll, read.pos)?;
        self.block.increment(strand, Element::StopAll, end)?;

        // Trailing clips occupy the positions just after the read end.
        let mut clip_pos = end + 1;
        for op in &ops[last..] {
            let (element, start_element) = clip_elements(op.kind);
            for _ in 0..op.len {
                if clip_pos - end <= BLOCK_BUFFER {
                    self.block.increment(strand, element, clip_pos)?;
                }
                clip_pos += 1;
            }
            self.block.increment(strand, start_element, end)?;
        }
        Ok(ReadOutcome::Counted)
    }

    fn observe_base(
        &mut self,
        read: &AlignedRead,
        strand: Strand,
        position: u64,
        offset: usize,
        is_reference: bool,
        mate_unmapped: bool,
    ) -> Result<()> {
        if !self.block.contains(position) {
            return Ok(());
        }
        let base = read.base_at(offset).unwrap_or(b'N');
        // 0xff marks absent qualities in BAM.
        let quality = match read.quality_at(offset) {
            Some(0xff) | None => 0,
            Some(q) => q,
        };
        let base_element = if quality < self.min_base_quality {
            Element::BaseN
        } else {
            Element::base(base)
        };
        self.block.increment(strand, base_element, position)?;
        self.block
            .add(strand, Element::quality_of(base_element), position, u64::from(quality))?;
        self.block
            .add(strand, Element::MapQual, position, u64::from(read.mapq()))?;
        let call = if is_reference {
            Element::ReferenceNo
        } else {
            Element::NonreferenceNo
        };
        self.block.increment(strand, call, position)?;
        if mate_unmapped {
            self.block.increment(strand, Element::MateUnmapped, position)?;
        }
        Ok(())
    }

    /// Derive `lowRead` and `highNonreference` from this source's coverage.
    ///
    /// Runs once per source per block, after every read has been observed.
    pub fn finalize(&mut self, parameters: StoreParameters) -> Result<()> {
        for strand in Strand::ALL {
            for position in self.block.start()..=self.block.end() {
                let reference = self.block.get(strand, Element::ReferenceNo, position).unwrap_or(0);
                let nonreference = self.block.get(strand, Element::NonreferenceNo, position).unwrap_or(0);
                let coverage = reference + nonreference;
                if coverage == 0 {
                    continue;
                }
                if coverage < u64::from(parameters.low_read_count) {
                    self.block.increment(strand, Element::LowRead, position)?;
                } else if nonreference * 100 >= u64::from(parameters.nonref_percent) * coverage {
                    self.block.increment(strand, Element::HighNonreference, position)?;
                }
            }
        }
        Ok(())
    }
}

fn clip_elements(kind: CigarOpKind) -> (Element, Element) {
    if kind == CigarOpKind::HardClip {
        (Element::CigarH, Element::CigarHStart)
    } else {
        (Element::CigarS, Element::CigarSStart)
    }
}

/// Sequence, quality and MD lengths must agree with the CIGAR.
fn check_shape(read: &AlignedRead, mismatches: Option<&[bool]>) -> std::result::Result<(), String> {
    let read_bases: usize = read
        .cigar
        .iter()
        .filter(|op| op.kind.consumes_read())
        .map(|op| op.len as usize)
        .sum();
    let aligned_bases: usize = read
        .cigar
        .iter()
        .filter(|op| op.kind.is_aligned())
        .map(|op| op.len as usize)
        .sum();
    if aligned_bases == 0 {
        return Err("cigar places no bases on the reference".to_string());
    }
    if read.len() != read_bases {
        return Err(format!(
            "sequence has {} bases, cigar consumes {}",
            read.len(),
            read_bases
        ));
    }
    if !read.qualities.is_empty() && read.qualities.len() != read.len() {
        return Err(format!(
            "{} qualities for {} bases",
            read.qualities.len(),
            read.len()
        ));
    }
    if let Some(mask) = mismatches {
        if mask.len() != aligned_bases {
            return Err(format!(
                "MD covers {} bases, cigar aligns {}",
                mask.len(),
                aligned_bases
            ));
        }
    }
    let clip_inside = read
        .cigar
        .iter()
        .skip_while(|op| matches!(op.kind, CigarOpKind::SoftClip | CigarOpKind::HardClip))
        .skip_while(|op| !matches!(op.kind, CigarOpKind::SoftClip | CigarOpKind::HardClip))
        .any(|op| !matches!(op.kind, CigarOpKind::SoftClip | CigarOpKind::HardClip));
    if clip_inside {
        return Err("clipping inside the alignment".to_string());
    }
    Ok(())
}
