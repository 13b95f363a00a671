use std::sync::Arc;

/// CIGAR operation kinds describing how a read aligns to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOpKind {
    /// Alignment match (`M`), base may or may not equal the reference.
    Match,
    /// Insertion relative to the reference (`I`).
    Insertion,
    /// Deletion relative to the reference (`D`).
    Deletion,
    /// Skipped reference region, e.g. an intron (`N`).
    Skip,
    /// Soft clipping, sequence present in read only (`S`).
    SoftClip,
    /// Hard clipping, trimmed sequence not present in read (`H`).
    HardClip,
    /// Silent padding (`P`).
    Padding,
    /// Sequence match (`=`).
    Equal,
    /// Sequence mismatch (`X`).
    Diff,
}

impl CigarOpKind {
    /// Whether the operation advances along the reference.
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Deletion
                | CigarOpKind::Skip
                | CigarOpKind::Equal
                | CigarOpKind::Diff
        )
    }

    /// Whether the operation advances along the read sequence.
    pub fn consumes_read(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Insertion
                | CigarOpKind::SoftClip
                | CigarOpKind::Equal
                | CigarOpKind::Diff
        )
    }

    /// Whether read bases are placed on reference positions.
    pub fn is_aligned(self) -> bool {
        matches!(self, CigarOpKind::Match | CigarOpKind::Equal | CigarOpKind::Diff)
    }

    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'M' => CigarOpKind::Match,
            'I' => CigarOpKind::Insertion,
            'D' => CigarOpKind::Deletion,
            'N' => CigarOpKind::Skip,
            'S' => CigarOpKind::SoftClip,
            'H' => CigarOpKind::HardClip,
            'P' => CigarOpKind::Padding,
            '=' => CigarOpKind::Equal,
            'X' => CigarOpKind::Diff,
            _ => return None,
        })
    }
}

/// CIGAR operation with length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    /// Operation kind.
    pub kind: CigarOpKind,
    /// Number of bases affected by the operation.
    pub len: u32,
}

impl CigarOp {
    /// Construct a new CIGAR operation.
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }
}

/// Parse a textual CIGAR such as `5S10M2D3M`.
pub fn parse_cigar(text: &str) -> Option<Vec<CigarOp>> {
    let mut ops = Vec::new();
    let mut len: u32 = 0;
    let mut has_digits = false;
    for c in text.chars() {
        if let Some(d) = c.to_digit(10) {
            len = len.checked_mul(10)?.checked_add(d)?;
            has_digits = true;
        } else {
            if !has_digits || len == 0 {
                return None;
            }
            ops.push(CigarOp::new(CigarOpKind::from_char(c)?, len));
            len = 0;
            has_digits = false;
        }
    }
    if has_digits || ops.is_empty() {
        return None;
    }
    Some(ops)
}

/// SAM flag bits consulted by the accumulation.
pub mod flags {
    /// Template has multiple segments.
    pub const PAIRED: u16 = 0x1;
    /// Segment unmapped.
    pub const UNMAPPED: u16 = 0x4;
    /// Next segment unmapped.
    pub const MATE_UNMAPPED: u16 = 0x8;
    /// Sequence is reverse complemented.
    pub const REVERSE: u16 = 0x10;
    /// Secondary alignment.
    pub const SECONDARY: u16 = 0x100;
    /// Failed platform/vendor quality checks.
    pub const QC_FAIL: u16 = 0x200;
    /// PCR or optical duplicate.
    pub const DUPLICATE: u16 = 0x400;
    /// Supplementary alignment.
    pub const SUPPLEMENTARY: u16 = 0x800;
}

/// Aligned read with sequence, quality and flag information.
#[derive(Debug, Clone)]
pub struct AlignedRead {
    /// Reference contig/chromosome name.
    pub chrom: Arc<str>,
    /// 1-based leftmost aligned reference coordinate.
    pub pos: u64,
    /// Mapping quality (Phred-scaled).
    pub mapq: u8,
    /// CIGAR describing the alignment.
    pub cigar: Vec<CigarOp>,
    /// Read sequence stored as uppercase ASCII.
    pub sequence: Arc<[u8]>,
    /// Per-base quality scores in Phred space.
    pub qualities: Arc<[u8]>,
    /// Raw SAM flags.
    pub flags: u16,
    /// MD tag, when the aligner emitted one.
    pub md: Option<Arc<str>>,
}

impl AlignedRead {
    /// Construct a forward or reverse read with no other flags set.
    pub fn new(
        chrom: impl Into<Arc<str>>,
        pos: u64,
        mapq: u8,
        cigar: Vec<CigarOp>,
        sequence: impl Into<Arc<[u8]>>,
        qualities: impl Into<Arc<[u8]>>,
        is_reverse: bool,
    ) -> Self {
        Self {
            chrom: chrom.into(),
            pos,
            mapq,
            cigar,
            sequence: sequence.into(),
            qualities: qualities.into(),
            flags: if is_reverse { flags::REVERSE } else { 0 },
            md: None,
        }
    }

    /// Replace the SAM flags.
    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Attach an MD tag.
    pub fn with_md(mut self, md: impl Into<Arc<str>>) -> Self {
        self.md = Some(md.into());
        self
    }

    /// Read length inferred from the sequence.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the read carries no sequence.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Last reference position covered (inclusive), counting deletions and skips.
    pub fn end(&self) -> u64 {
        let span: u64 = self
            .cigar
            .iter()
            .filter(|op| op.kind.consumes_reference())
            .map(|op| u64::from(op.len))
            .sum();
        (self.pos + span).saturating_sub(1).max(self.pos)
    }

    /// Clipped bases before and after the aligned part, soft and hard combined.
    pub fn clip_extent(&self) -> (u64, u64) {
        let is_clip = |op: &&CigarOp| matches!(op.kind, CigarOpKind::SoftClip | CigarOpKind::HardClip);
        let leading = self.cigar.iter().take_while(is_clip).map(|op| u64::from(op.len)).sum();
        let trailing = self.cigar.iter().rev().take_while(is_clip).map(|op| u64::from(op.len)).sum();
        (leading, trailing)
    }

    /// Base at the provided read offset.
    pub fn base_at(&self, offset: usize) -> Option<u8> {
        self.sequence.get(offset).copied()
    }

    /// Quality score at the provided read offset.
    pub fn quality_at(&self, offset: usize) -> Option<u8> {
        self.qualities.get(offset).copied()
    }

    /// Mapping quality associated with the alignment.
    pub fn mapq(&self) -> u8 {
        self.mapq
    }

    /// Whether the read maps to the reverse strand.
    pub fn is_reverse(&self) -> bool {
        self.flags & flags::REVERSE != 0
    }

    /// Whether the read is paired and its mate did not map.
    pub fn is_mate_unmapped(&self) -> bool {
        self.flags & flags::PAIRED != 0 && self.flags & flags::MATE_UNMAPPED != 0
    }

    /// Why the read must not be counted, if anything.
    pub fn exclusion(&self) -> Option<&'static str> {
        const EXCLUDED: [(u16, &str); 5] = [
            (flags::UNMAPPED, "unmapped"),
            (flags::DUPLICATE, "duplicate"),
            (flags::SECONDARY, "secondary"),
            (flags::SUPPLEMENTARY, "supplementary"),
            (flags::QC_FAIL, "qc-fail"),
        ];
        if let Some((_, reason)) = EXCLUDED.iter().find(|(bit, _)| self.flags & bit != 0) {
            return Some(*reason);
        }
        if self.cigar.is_empty() {
            return Some("no cigar");
        }
        None
    }

    /// Whether placing bases needs an MD tag (plain `M` does not say match or mismatch).
    pub fn needs_md(&self) -> bool {
        self.cigar.iter().any(|op| op.kind == CigarOpKind::Match)
    }
}
