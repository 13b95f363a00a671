use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::store::{ChromosomeSegment, Element, PileupStore, Strand};
use crate::{PileupError, Result};

/// Positions loaded per read while rendering.
const VIEW_CHUNK: u64 = 10_000;

/// `chr` or `chr:start-end` (1-based, inclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Chromosome name.
    pub chromosome: String,
    /// First position; defaults to 1.
    pub start: Option<u64>,
    /// Last position; defaults to the chromosome length.
    pub end: Option<u64>,
}

impl Region {
    /// Whole chromosome.
    pub fn chromosome(name: &str) -> Self {
        Self {
            chromosome: name.to_string(),
            start: None,
            end: None,
        }
    }

    /// `[start, end]` of one chromosome.
    pub fn span(name: &str, start: u64, end: u64) -> Self {
        Self {
            chromosome: name.to_string(),
            start: Some(start),
            end: Some(end),
        }
    }

    /// Concrete bounds against a chromosome of `length` positions.
    pub fn resolve(&self, length: u64) -> Result<(u64, u64)> {
        let start = self.start.unwrap_or(1);
        let end = self.end.unwrap_or(length);
        let reason = if start < 1 {
            Some("start must be at least 1")
        } else if end > length {
            Some("end is past the chromosome length")
        } else if start > end {
            Some("start is after end")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(PileupError::InvalidRegion {
                region: self.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok((start, end)),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start, self.end) {
            (Some(start), Some(end)) => write!(f, "{}:{}-{}", self.chromosome, start, end),
            _ => f.write_str(&self.chromosome),
        }
    }
}

impl FromStr for Region {
    type Err = PileupError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| PileupError::InvalidRegion {
            region: s.to_string(),
            reason: reason.to_string(),
        };
        let s = s.trim();
        let Some((chromosome, range)) = s.rsplit_once(':') else {
            if s.is_empty() {
                return Err(invalid("empty region"));
            }
            return Ok(Region::chromosome(s));
        };
        if chromosome.is_empty() {
            return Err(invalid("missing chromosome"));
        }
        // Names such as `HLA-A*01:01` carry colons of their own.
        let Some((start, end)) = range.split_once('-') else {
            return Ok(Region::chromosome(s));
        };
        let parse = |v: &str| {
            v.trim()
                .replace(',', "")
                .parse::<u64>()
                .map_err(|_| invalid("positions must be non-negative integers"))
        };
        Ok(Region::span(chromosome, parse(start)?, parse(end)?))
    }
}

/// Named element preset for rendered views.
///
/// `forward` and `reverse` print every element of one strand only; the
/// others print their elements on both strands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementGroup {
    /// Every element, forward strand.
    Forward,
    /// Every element, reverse strand.
    Reverse,
    /// Base counts.
    Bases,
    /// Base-quality sums.
    Quals,
    /// CIGAR operation counts.
    Cigars,
    /// Mapping quality, read starts and stops, unmapped mates.
    ReadStats,
    /// Reference/non-reference counts and the per-source flags.
    Metrics,
}

impl ElementGroup {
    /// Every group.
    pub const ALL: [ElementGroup; 7] = [
        ElementGroup::Forward,
        ElementGroup::Reverse,
        ElementGroup::Bases,
        ElementGroup::Quals,
        ElementGroup::Cigars,
        ElementGroup::ReadStats,
        ElementGroup::Metrics,
    ];

    /// Name accepted on the command line.
    pub fn name(self) -> &'static str {
        match self {
            ElementGroup::Forward => "forward",
            ElementGroup::Reverse => "reverse",
            ElementGroup::Bases => "bases",
            ElementGroup::Quals => "quals",
            ElementGroup::Cigars => "cigars",
            ElementGroup::ReadStats => "readStats",
            ElementGroup::Metrics => "metrics",
        }
    }

    /// Elements in persisted order.
    pub fn elements(self) -> &'static [Element] {
        use Element::*;
        match self {
            ElementGroup::Forward | ElementGroup::Reverse => Element::ALL,
            ElementGroup::Bases => &[BaseA, BaseC, BaseG, BaseT, BaseN],
            ElementGroup::Quals => &[QualA, QualC, QualG, QualT, QualN],
            ElementGroup::Cigars => &[
                CigarI,
                CigarD,
                CigarDStart,
                CigarS,
                CigarSStart,
                CigarH,
                CigarHStart,
                CigarN,
                CigarNStart,
            ],
            ElementGroup::ReadStats => &[MapQual, StartAll, StopAll, MateUnmapped],
            ElementGroup::Metrics => &[ReferenceNo, NonreferenceNo, HighNonreference, LowRead],
        }
    }

    /// Strands printed for the group.
    pub fn strands(self) -> &'static [Strand] {
        match self {
            ElementGroup::Forward => &[Strand::Forward],
            ElementGroup::Reverse => &[Strand::Reverse],
            _ => &Strand::ALL,
        }
    }
}

impl fmt::Display for ElementGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElementGroup {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ElementGroup::ALL
            .iter()
            .copied()
            .find(|group| group.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = ElementGroup::ALL.iter().map(|g| g.name()).collect();
                format!("unknown group '{}', expected one of {}", s, names.join(", "))
            })
    }
}

/// Columns of a rendered view: strands outermost, then elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSelection {
    elements: Vec<Element>,
    strands: Vec<Strand>,
}

impl Default for ViewSelection {
    fn default() -> Self {
        Self::elements(&[])
    }
}

impl ViewSelection {
    /// `elements` in the given order on both strands; empty selects every element.
    pub fn elements(elements: &[Element]) -> Self {
        Self {
            elements: selected(elements).to_vec(),
            strands: Strand::ALL.to_vec(),
        }
    }

    /// Preset columns of `group`.
    pub fn group(group: ElementGroup) -> Self {
        Self {
            elements: group.elements().to_vec(),
            strands: group.strands().to_vec(),
        }
    }

    /// Print only `strand`.
    pub fn only(mut self, strand: Strand) -> Self {
        self.strands = vec![strand];
        self
    }

    /// CSV header line.
    pub fn header(&self) -> String {
        let mut columns = vec!["Reference".to_string(), "Position".to_string()];
        for strand in &self.strands {
            columns.extend(
                self.elements
                    .iter()
                    .map(|e| format!("{}_{}", e.name(), strand.suffix())),
            );
        }
        columns.join(",")
    }
}

impl From<ElementGroup> for ViewSelection {
    fn from(group: ElementGroup) -> Self {
        Self::group(group)
    }
}

/// Counters of one position, forward then reverse, in the requested element order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PositionRecord {
    /// Chromosome name.
    pub chromosome: String,
    /// 1-based position.
    pub position: u64,
    /// Forward-strand values.
    pub forward: Vec<u64>,
    /// Reverse-strand values.
    pub reverse: Vec<u64>,
}

impl PositionRecord {
    fn from_segment(segment: &ChromosomeSegment, position: u64, elements: &[Element]) -> Self {
        let values = |strand: Strand| -> Vec<u64> {
            elements
                .iter()
                .map(|&e| segment.get(strand, e, position).unwrap_or(0))
                .collect()
        };
        Self {
            chromosome: segment.name().to_string(),
            position,
            forward: values(Strand::Forward),
            reverse: values(Strand::Reverse),
        }
    }
}

/// One record per position of `region`, ascending.
///
/// An empty `elements` slice selects every element.
pub fn view(store: &mut PileupStore, region: &Region, elements: &[Element]) -> Result<Vec<PositionRecord>> {
    let elements = selected(elements);
    let length = store.chromosome_length(&region.chromosome)?;
    let (start, end) = region.resolve(length)?;
    let segment = store.read_span(&region.chromosome, start, end)?;
    Ok((start..=end)
        .map(|pos| PositionRecord::from_segment(&segment, pos, elements))
        .collect())
}

/// Write the store header, provenance and CSV rows for `region`.
pub fn render_view<W: Write>(
    out: &mut W,
    store: &mut PileupStore,
    region: &Region,
    selection: &ViewSelection,
) -> Result<()> {
    let length = store.chromosome_length(&region.chromosome)?;
    let (start, end) = region.resolve(length)?;
    let path = store.path().to_path_buf();
    let io = |e: std::io::Error| PileupError::io(&path, e);

    writeln!(out, "## STORE={}", store.path().display()).map_err(io)?;
    writeln!(out, "## INFO=STORE_ID:{}", store.store_id()?).map_err(io)?;
    writeln!(out, "## INFO=REFERENCE:{}", store.reference()?).map_err(io)?;
    for line in store.provenance().header_lines() {
        writeln!(out, "{}", line).map_err(io)?;
    }
    for record in store.provenance().records() {
        writeln!(out, "## {}", record).map_err(io)?;
    }
    writeln!(out, "{}", selection.header()).map_err(io)?;

    let mut chunk_start = start;
    while chunk_start <= end {
        let chunk_end = (chunk_start + VIEW_CHUNK - 1).min(end);
        let segment = store.read_span(&region.chromosome, chunk_start, chunk_end)?;
        for pos in chunk_start..=chunk_end {
            let mut row = format!("{},{}", region.chromosome, pos);
            for &strand in &selection.strands {
                for &element in &selection.elements {
                    row.push(',');
                    row.push_str(&segment.get(strand, element, pos).unwrap_or(0).to_string());
                }
            }
            writeln!(out, "{}", row).map_err(io)?;
        }
        chunk_start = chunk_end + 1;
    }
    out.flush().map_err(io)
}

fn selected(elements: &[Element]) -> &[Element] {
    if elements.is_empty() {
        Element::ALL
    } else {
        elements
    }
}
