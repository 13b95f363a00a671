//! Add and remove: stream alignment sources into (or out of) the counters.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{commit, run_units, staging::StagingArea, work_units, PipelineContext, WorkUnit};
use crate::config::{PipelineConfig, StoreParameters, BLOCK_BUFFER, MAX_MISSING_MD};
use crate::genomics::{AlignmentSource, PileupAccumulator, ReadOutcome};
use crate::ledger::ProvenanceEntry;
use crate::store::{ChromosomeSegment, Container, PileupStore};
use crate::{PileupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Add,
    Remove,
}

/// Per-source totals of one add or remove.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SourceSummary {
    /// Source path.
    pub path: String,
    /// Content signature.
    pub signature: String,
    /// Reads counted.
    pub records: u64,
    /// Reads excluded by flags.
    pub skipped: u64,
    /// Plain-`M` reads without an MD tag.
    pub missing_md: u64,
    /// Reads whose fields disagree with their CIGAR.
    pub malformed: u64,
}

/// Outcome of [`add`] or [`remove`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AccumulationSummary {
    /// One entry per source, in input order.
    pub sources: Vec<SourceSummary>,
    /// Blocks whose counters changed.
    pub blocks_written: usize,
    /// Wall time of the run.
    pub runtime: Duration,
}

#[derive(Debug, Default)]
struct SourceCounters {
    records: AtomicU64,
    skipped: AtomicU64,
    missing_md: AtomicU64,
    malformed: AtomicU64,
}

/// Accumulate every source into the store.
///
/// Fails with `DuplicateContribution` before any counter changes if a
/// source is already recorded and `config.allow_override` is false.
pub fn add(
    store_path: &Path,
    sources: &[Box<dyn AlignmentSource>],
    config: &PipelineConfig,
) -> Result<AccumulationSummary> {
    add_with_context(store_path, sources, &PipelineContext::new(config.clone()))
}

/// [`add`] with a caller-owned context (for cancellation).
pub fn add_with_context(
    store_path: &Path,
    sources: &[Box<dyn AlignmentSource>],
    ctx: &PipelineContext,
) -> Result<AccumulationSummary> {
    accumulate(store_path, sources, ctx, Direction::Add)
}

/// Take every source back out of the store.
///
/// Each source must match an unreversed add; its counters are recomputed
/// with the thresholds recorded in that entry and subtracted.
pub fn remove(
    store_path: &Path,
    sources: &[Box<dyn AlignmentSource>],
    config: &PipelineConfig,
) -> Result<AccumulationSummary> {
    remove_with_context(store_path, sources, &PipelineContext::new(config.clone()))
}

/// [`remove`] with a caller-owned context (for cancellation).
pub fn remove_with_context(
    store_path: &Path,
    sources: &[Box<dyn AlignmentSource>],
    ctx: &PipelineContext,
) -> Result<AccumulationSummary> {
    accumulate(store_path, sources, ctx, Direction::Remove)
}

fn accumulate(
    store_path: &Path,
    sources: &[Box<dyn AlignmentSource>],
    ctx: &PipelineContext,
    direction: Direction,
) -> Result<AccumulationSummary> {
    if sources.is_empty() {
        return Err(PileupError::InvalidConfiguration(
            "no alignment sources given".to_string(),
        ));
    }
    let mut store = PileupStore::open(store_path, true)?;
    let add_parameters = match ctx.config().thresholds {
        Some(thresholds) => thresholds,
        None => store.parameters()?,
    };

    // Consistency checks happen before any block is read.
    let mut reversals = Vec::new();
    let mut thresholds: Vec<StoreParameters> = Vec::new();
    match direction {
        Direction::Add => {
            let mut batch = HashSet::new();
            for source in sources {
                let identity = source.identity();
                store
                    .provenance()
                    .check_add(identity, ctx.config().allow_override)?;
                if !batch.insert(identity.signature().to_string()) && !ctx.config().allow_override {
                    return Err(PileupError::DuplicateContribution {
                        source_path: identity.path().display().to_string(),
                        signature: identity.signature().to_string(),
                    });
                }
                thresholds.push(add_parameters);
            }
        }
        Direction::Remove => {
            for source in sources {
                let index = store.provenance().check_remove(source.identity())?;
                if reversals.contains(&index) {
                    return Err(PileupError::NoMatchingContribution {
                        source_path: source.identity().path().display().to_string(),
                        reason: "listed twice in one removal".to_string(),
                    });
                }
                thresholds.push(store.provenance().entries()[index].parameters);
                reversals.push(index);
            }
        }
    }

    let staging = StagingArea::prepare(store_path)?;
    let units = work_units(&store.chromosomes()?, ctx.config().block_size);
    let counters: Vec<SourceCounters> = sources.iter().map(|_| SourceCounters::default()).collect();
    info!(
        store = %store_path.display(),
        operation = ?direction,
        sources = sources.len(),
        units = units.len(),
        threads = ctx.config().threads,
        "accumulating"
    );

    let staged = {
        let store = &store;
        let staging = &staging;
        let counters = &counters;
        let thresholds = &thresholds;
        run_units(ctx, &units, move |unit| {
            let delta = block_contribution(unit, sources, thresholds, counters, ctx)?;
            if delta.is_zero() {
                return Ok(None);
            }
            let mut reader = store.span_reader()?;
            stage_block(&mut reader, staging, unit, &delta, direction).map(Some)
        })?
    };

    let summaries: Vec<SourceSummary> = sources
        .iter()
        .zip(&counters)
        .map(|(source, c)| SourceSummary {
            path: source.identity().path().display().to_string(),
            signature: source.identity().signature().to_string(),
            records: c.records.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            missing_md: c.missing_md.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
        })
        .collect();

    let runtime = ctx.elapsed();
    commit(&mut store, &staging, &staged, |log| {
        for (i, (source, summary)) in sources.iter().zip(&summaries).enumerate() {
            let identity = source.identity();
            match direction {
                Direction::Add => {
                    log.append(ProvenanceEntry::add(identity, summary.records, runtime, thresholds[i]));
                }
                Direction::Remove => {
                    log.mark_reversed(reversals[i])?;
                    log.append(ProvenanceEntry::remove(identity, summary.records, runtime, thresholds[i]));
                }
            }
        }
        Ok(())
    })?;
    drop(staging);
    store.close()?;

    for summary in &summaries {
        info!(
            source = %summary.path,
            records = summary.records,
            skipped = summary.skipped,
            missing_md = summary.missing_md,
            malformed = summary.malformed,
            operation = ?direction,
            "source finished"
        );
    }
    Ok(AccumulationSummary {
        sources: summaries,
        blocks_written: staged.len(),
        runtime,
    })
}

/// Counters every source contributes to one block.
fn block_contribution(
    unit: &WorkUnit,
    sources: &[Box<dyn AlignmentSource>],
    thresholds: &[StoreParameters],
    counters: &[SourceCounters],
    ctx: &PipelineContext,
) -> Result<ChromosomeSegment> {
    let mut delta = ChromosomeSegment::zeroed_span(&unit.chromosome, unit.length, unit.start, unit.end);
    let fetch_start = unit.start.saturating_sub(BLOCK_BUFFER).max(1);
    let fetch_end = unit.end.saturating_add(BLOCK_BUFFER).min(unit.length);

    for (i, source) in sources.iter().enumerate() {
        ctx.check_cancelled()?;
        let path = source.identity().path().display().to_string();
        let mut accumulator = PileupAccumulator::new(
            &unit.chromosome,
            unit.length,
            unit.start,
            unit.end,
            ctx.config().min_base_quality,
        );
        let mut cursor = source.open()?;
        for read in cursor.fetch(&unit.chromosome, fetch_start, fetch_end)? {
            let read = read?;
            // A read is tallied by the block holding its start; every
            // overlapping block still walks it.
            let owned = read.pos >= unit.start && read.pos <= unit.end;
            let outcome = accumulator.observe(&read)?;
            if !owned {
                continue;
            }
            let tally = &counters[i];
            match outcome {
                ReadOutcome::Counted => {
                    tally.records.fetch_add(1, Ordering::Relaxed);
                }
                ReadOutcome::Skipped(reason) => {
                    tally.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(source = %path, chromosome = %unit.chromosome, position = read.pos, reason, "skipped read");
                }
                ReadOutcome::MissingMd => {
                    let missing = tally.missing_md.fetch_add(1, Ordering::Relaxed) + 1;
                    if missing > MAX_MISSING_MD {
                        return Err(PileupError::Alignment {
                            source_path: path,
                            reason: format!("more than {} reads lack an MD tag", MAX_MISSING_MD),
                        });
                    }
                }
                ReadOutcome::Malformed(reason) => {
                    tally.malformed.fetch_add(1, Ordering::Relaxed);
                    warn!(source = %path, chromosome = %unit.chromosome, position = read.pos, %reason, "malformed read skipped");
                }
            }
        }
        accumulator.finalize(thresholds[i])?;
        delta.apply(accumulator.block(), false)?;
    }
    Ok(delta)
}

/// Apply `delta` to the block's current counters and stage the result.
fn stage_block(
    reader: &mut Container,
    staging: &StagingArea,
    unit: &WorkUnit,
    delta: &ChromosomeSegment,
    direction: Direction,
) -> Result<PathBuf> {
    let mut current = reader.read_span(&unit.chromosome, unit.start, unit.end)?;
    current.apply(delta, direction == Direction::Remove)?;
    staging.stage(&current, unit.chromosome_index)
}
