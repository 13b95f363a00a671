//! Window scanner
//!
//! Slides a fixed-width window over a range of one chromosome and summarizes
//! the counters of candidate positions falling inside each window, summed
//! over strands and over every store given. A window's regularity measures
//! how evenly depth is spread across its members: `1 - sd / mean`.

mod candidates;

pub use candidates::read_candidates;

use std::fmt;
use std::io::Write;

use bitvec::prelude::*;
use tracing::{debug, info};

use crate::config::ScanConfig;
use crate::pipeline::Region;
use crate::store::{ChromosomeSegment, Element, PileupStore, Strand};
use crate::{PileupError, Result};

/// Regularity class of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum WindowClass {
    /// Score at or above the regular cut-off.
    Regular,
    /// Score at or above the mixed cut-off.
    Mixed,
    /// Everything else.
    Irregular,
}

impl WindowClass {
    fn of(score: f64, config: &ScanConfig) -> Self {
        if score >= config.regular_score {
            WindowClass::Regular
        } else if score >= config.mixed_score {
            WindowClass::Mixed
        } else {
            WindowClass::Irregular
        }
    }
}

impl fmt::Display for WindowClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WindowClass::Regular => "regular",
            WindowClass::Mixed => "mixed",
            WindowClass::Irregular => "irregular",
        })
    }
}

/// Summary of one emitted window.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WindowRecord {
    /// Chromosome name.
    pub chromosome: String,
    /// First position of the window.
    pub start: u64,
    /// Last position of the window.
    pub end: u64,
    /// Candidate positions inside the window.
    pub members: usize,
    /// Per-element sums over members, in [`Element::ALL`] order.
    pub totals: Vec<u64>,
    /// Sum of member depths.
    pub total_count: u64,
    /// `1 - cv` of member depths, in `[0, 1]`.
    pub regularity: f64,
    /// Non-reference share of reference plus non-reference calls.
    pub nonref_fraction: f64,
    /// Whether the non-reference share reaches the store threshold.
    pub high_confidence: bool,
    /// Regularity class.
    pub class: WindowClass,
}

impl WindowRecord {
    /// Sum for one element.
    pub fn total(&self, element: Element) -> u64 {
        self.totals[element.index()]
    }

    /// Tab-separated column names matching [`WindowRecord::to_tsv`].
    pub fn tsv_header() -> String {
        let mut columns = vec![
            "#chromosome".to_string(),
            "start".to_string(),
            "end".to_string(),
            "members".to_string(),
            "total_count".to_string(),
            "regularity".to_string(),
            "nonref_fraction".to_string(),
            "high_confidence".to_string(),
            "class".to_string(),
        ];
        columns.extend(Element::ALL.iter().map(|e| e.name().to_string()));
        columns.join("\t")
    }

    /// One tab-separated line.
    pub fn to_tsv(&self) -> String {
        let mut line = format!(
            "{}\t{}\t{}\t{}\t{}\t{:.4}\t{:.4}\t{}\t{}",
            self.chromosome,
            self.start,
            self.end,
            self.members,
            self.total_count,
            self.regularity,
            self.nonref_fraction,
            self.high_confidence,
            self.class
        );
        for total in &self.totals {
            line.push('\t');
            line.push_str(&total.to_string());
        }
        line
    }
}

/// Consecutive `[start, end]` spans of `width` positions; the last is clipped at `end`.
pub fn windows(start: u64, end: u64, width: u64) -> Vec<(u64, u64)> {
    let mut spans = Vec::new();
    if width == 0 {
        return spans;
    }
    let mut lo = start;
    while lo <= end {
        let hi = lo.saturating_add(width - 1).min(end);
        spans.push((lo, hi));
        if hi == u64::MAX {
            break;
        }
        lo = hi + 1;
    }
    spans
}

/// Scan `region` across `stores` and return every window passing the filters.
///
/// Candidates outside the region are ignored. All stores must carry the
/// chromosome with the same length; the non-reference threshold is taken
/// from the first store.
pub fn scan(
    stores: &mut [PileupStore],
    region: &Region,
    candidates: &[u64],
    config: &ScanConfig,
) -> Result<Vec<WindowRecord>> {
    let Some(first) = stores.first() else {
        return Err(PileupError::InvalidConfiguration("no stores to scan".to_string()));
    };
    let length = first.chromosome_length(&region.chromosome)?;
    let nonref_percent = first.parameters()?.nonref_percent;
    for store in stores.iter().skip(1) {
        let other = store.chromosome_length(&region.chromosome)?;
        if other != length {
            return Err(PileupError::incompatible(
                store.path(),
                format!("{} has length {} here but {} in the first store", region.chromosome, other, length),
            ));
        }
    }
    let (start, end) = region.resolve(length)?;

    let span = (end - start + 1) as usize;
    let mut mask = bitvec![0; span];
    for &pos in candidates {
        if pos >= start && pos <= end {
            mask.set((pos - start) as usize, true);
        }
    }
    info!(
        chromosome = %region.chromosome,
        start,
        end,
        window = config.window,
        candidates = mask.count_ones(),
        stores = stores.len(),
        "scanning"
    );

    let mut records = Vec::new();
    for (lo, hi) in windows(start, end, config.window) {
        let bits = &mask[(lo - start) as usize..=(hi - start) as usize];
        let members: Vec<u64> = bits.iter_ones().map(|i| lo + i as u64).collect();
        if members.len() < config.min_positions {
            continue;
        }
        let mut blocks = Vec::with_capacity(stores.len());
        for store in stores.iter_mut() {
            blocks.push(store.read_span(&region.chromosome, lo, hi)?);
        }
        let record = summarize(&region.chromosome, lo, hi, &members, &blocks, nonref_percent, config);
        if record.total_count < config.min_count {
            debug!(start = lo, end = hi, total = record.total_count, "window below minimum count");
            continue;
        }
        records.push(record);
    }
    Ok(records)
}

fn summarize(
    chromosome: &str,
    start: u64,
    end: u64,
    members: &[u64],
    blocks: &[ChromosomeSegment],
    nonref_percent: u32,
    config: &ScanConfig,
) -> WindowRecord {
    let mut totals = vec![0u64; Element::COUNT];
    let mut depths = Vec::with_capacity(members.len());
    for &pos in members {
        let mut depth = 0u64;
        for block in blocks {
            for strand in Strand::ALL {
                for element in Element::ALL {
                    let value = block.get(strand, *element, pos).unwrap_or(0);
                    totals[element.index()] = totals[element.index()].saturating_add(value);
                    if matches!(element, Element::ReferenceNo | Element::NonreferenceNo | Element::CigarD) {
                        depth = depth.saturating_add(value);
                    }
                }
            }
        }
        depths.push(depth);
    }

    let total_count = depths.iter().fold(0u64, |acc, d| acc.saturating_add(*d));
    let regularity = regularity(&depths);
    let reference = totals[Element::ReferenceNo.index()];
    let nonreference = totals[Element::NonreferenceNo.index()];
    let nonref_fraction = if reference + nonreference == 0 {
        0.0
    } else {
        nonreference as f64 / (reference + nonreference) as f64
    };
    WindowRecord {
        chromosome: chromosome.to_string(),
        start,
        end,
        members: members.len(),
        totals,
        total_count,
        regularity,
        nonref_fraction,
        high_confidence: nonref_fraction * 100.0 >= f64::from(nonref_percent),
        class: WindowClass::of(regularity, config),
    }
}

/// `1 - sd / mean`, clamped to `[0, 1]`; 0 when the mean is 0.
fn regularity(depths: &[u64]) -> f64 {
    if depths.is_empty() {
        return 0.0;
    }
    let n = depths.len() as f64;
    let mean = depths.iter().map(|&d| d as f64).sum::<f64>() / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = depths.iter().map(|&d| (d as f64 - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0)
}

/// Write windows as TSV with a header line.
pub fn write_windows<W: Write>(out: &mut W, records: &[WindowRecord]) -> std::io::Result<()> {
    writeln!(out, "{}", WindowRecord::tsv_header())?;
    for record in records {
        writeln!(out, "{}", record.to_tsv())?;
    }
    out.flush()
}
