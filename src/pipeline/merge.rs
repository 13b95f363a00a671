use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use super::{commit, run_units, staging::StagingArea, work_units, PipelineContext};
use crate::config::PipelineConfig;
use crate::ledger::{check_field, ProvenanceEntry, ProvenanceLog};
use crate::store::{ChromosomeSegment, PileupStore};
use crate::{PileupError, Result};

/// Outcome of [`merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MergeSummary {
    /// Source stores folded in, in input order.
    pub sources: Vec<PathBuf>,
    /// Provenance entries carried over from the sources.
    pub entries_carried: usize,
    /// Blocks whose counters changed.
    pub blocks_written: usize,
    /// Wall time of the run.
    pub runtime: Duration,
}

/// Add the counters of every source store into `target`.
///
/// All stores must share chromosomes (names, order and lengths) and
/// thresholds. Source logs are appended to the target's log.
pub fn merge(target: &Path, sources: &[PathBuf], config: &PipelineConfig) -> Result<MergeSummary> {
    merge_with_context(target, sources, &PipelineContext::new(config.clone()))
}

/// [`merge`] with a caller-owned context (for cancellation).
pub fn merge_with_context(target: &Path, sources: &[PathBuf], ctx: &PipelineContext) -> Result<MergeSummary> {
    if sources.is_empty() {
        return Err(PileupError::InvalidConfiguration(
            "no source stores given".to_string(),
        ));
    }
    let target_key = same_file_key(target);
    for source in sources {
        if same_file_key(source) == target_key {
            return Err(PileupError::incompatible(source, "source is the merge target"));
        }
        check_field("source store path", &source.display().to_string())?;
    }

    let mut store = PileupStore::open(target, true)?;
    let chromosomes = store.chromosomes()?;
    let parameters = store.parameters()?;
    let mut inputs = Vec::with_capacity(sources.len());
    for path in sources {
        let input = PileupStore::open(path, false)?;
        if input.store_id()? == store.store_id()? {
            return Err(PileupError::incompatible(path, "same store id as the merge target"));
        }
        if input.chromosomes()? != chromosomes {
            return Err(PileupError::incompatible(path, "chromosome names or lengths differ"));
        }
        if input.parameters()? != parameters {
            return Err(PileupError::incompatible(path, "low read count or non-reference percent differ"));
        }
        inputs.push(input);
    }

    let labels: Vec<String> = sources.iter().map(|p| p.display().to_string()).collect();
    let logs: Vec<(&str, &ProvenanceLog)> = labels
        .iter()
        .zip(&inputs)
        .map(|(label, input)| (label.as_str(), input.provenance()))
        .collect();
    store
        .provenance()
        .check_merge(&target.display().to_string(), &logs, ctx.config().allow_override)?;

    let staging = StagingArea::prepare(target)?;
    let units = work_units(&chromosomes, ctx.config().block_size);
    info!(
        store = %target.display(),
        sources = inputs.len(),
        units = units.len(),
        threads = ctx.config().threads,
        "merging"
    );

    let staged = {
        let (store, inputs, staging) = (&store, &inputs, &staging);
        run_units(ctx, &units, move |unit| {
            let mut sum: Option<ChromosomeSegment> = None;
            for input in inputs {
                ctx.check_cancelled()?;
                let block = input
                    .span_reader()?
                    .read_span(&unit.chromosome, unit.start, unit.end)?;
                if block.is_zero() {
                    continue;
                }
                match sum.as_mut() {
                    None => sum = Some(block),
                    Some(acc) => acc.apply(&block, false)?,
                }
            }
            let Some(delta) = sum else {
                return Ok(None);
            };
            let mut current = store
                .span_reader()?
                .read_span(&unit.chromosome, unit.start, unit.end)?;
            current.apply(&delta, false)?;
            staging.stage(&current, unit.chromosome_index).map(Some)
        })?
    };

    let runtime = ctx.elapsed();
    let mut carried = 0;
    commit(&mut store, &staging, &staged, |log| {
        for (input, path) in inputs.iter().zip(sources) {
            carried += log.absorb(input.provenance());
            log.append(ProvenanceEntry::merge(
                &path.display().to_string(),
                input.store_id()?,
                input.provenance().len() as u64,
                runtime,
                parameters,
            ));
        }
        Ok(())
    })?;
    drop(staging);
    for mut input in inputs {
        input.close()?;
    }
    store.close()?;
    info!(store = %target.display(), carried, blocks = staged.len(), "merge finished");

    Ok(MergeSummary {
        sources: sources.to_vec(),
        entries_carried: carried,
        blocks_written: staged.len(),
        runtime,
    })
}

fn same_file_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
