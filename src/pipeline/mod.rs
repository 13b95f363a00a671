//! Accumulation pipeline
//!
//! One invocation runs one of bootstrap, add, remove, merge or view. Writes
//! follow the same shape:
//!
//! 1. Open the store writable (takes the lock) and validate provenance
//! 2. Split every chromosome into blocks and run them on a bounded pool
//! 3. Each worker stages the new counters of its block
//! 4. Commit: copy staged blocks into the store and append provenance
//!
//! Nothing touches the store before step 4, so a failed or cancelled run
//! leaves it unchanged.

mod accumulate;
mod context;
mod merge;
mod staging;
mod view;

pub use accumulate::{add, add_with_context, remove, remove_with_context, AccumulationSummary, SourceSummary};
pub use context::{CancelToken, PipelineContext};
pub use merge::{merge, merge_with_context, MergeSummary};
pub use view::{render_view, view, ElementGroup, PositionRecord, Region, ViewSelection};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{debug, error, info};

use crate::config::StoreParameters;
use crate::genomics::ReferenceSource;
use crate::ledger::ProvenanceLog;
use crate::store::PileupStore;
use crate::{PileupError, Result};

use staging::StagingArea;

/// Create a store for every chromosome of `reference`.
pub fn bootstrap(
    store_path: &Path,
    reference: &dyn ReferenceSource,
    parameters: StoreParameters,
    overwrite: bool,
) -> Result<()> {
    let mut store = PileupStore::bootstrap(
        store_path,
        &reference.label(),
        reference.chromosomes(),
        parameters,
        overwrite,
    )?;
    store.close()
}

/// One block of one chromosome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkUnit {
    pub chromosome_index: usize,
    pub chromosome: String,
    pub length: u64,
    pub start: u64,
    pub end: u64,
}

/// Partition every chromosome into consecutive blocks of `block_size` positions.
pub(crate) fn work_units(chromosomes: &[(String, u64)], block_size: u64) -> Vec<WorkUnit> {
    let mut units = Vec::new();
    for (chromosome_index, (name, length)) in chromosomes.iter().enumerate() {
        let mut start = 1;
        while start <= *length {
            let end = (start + block_size - 1).min(*length);
            units.push(WorkUnit {
                chromosome_index,
                chromosome: name.clone(),
                length: *length,
                start,
                end,
            });
            start = end + 1;
        }
    }
    units
}

/// Run `work` for every unit on a pool of `ctx.config().threads` workers.
///
/// Returns the staged block files. The first failure stops units that have
/// not started yet and is returned once running units finish.
pub(crate) fn run_units<F>(ctx: &PipelineContext, units: &[WorkUnit], work: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&WorkUnit) -> Result<Option<PathBuf>> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.config().threads)
        .build()
        .map_err(|e| PileupError::WorkerPool(e.to_string()))?;

    let has_failed = AtomicBool::new(false);
    let first_error: Mutex<Option<PileupError>> = Mutex::new(None);
    let staged: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

    {
        let (has_failed, first_error, staged, work) = (&has_failed, &first_error, &staged, &work);
        pool.install(|| {
            rayon::scope(|s| {
                for unit in units {
                    if has_failed.load(Ordering::Relaxed) {
                        return;
                    }
                    s.spawn(move |_| {
                        if has_failed.load(Ordering::Relaxed) {
                            return;
                        }
                        let result = ctx.check_cancelled().and_then(|_| work(unit));
                        match result {
                            Ok(Some(path)) => lock(staged).push(path),
                            Ok(None) => {}
                            Err(err) => {
                                if !has_failed.swap(true, Ordering::Relaxed) {
                                    error!(
                                        chromosome = %unit.chromosome,
                                        start = unit.start,
                                        end = unit.end,
                                        error = %err,
                                        "work unit failed"
                                    );
                                    *lock(first_error) = Some(err);
                                }
                            }
                        }
                    });
                }
            })
        });
    }

    if let Some(err) = first_error.into_inner().unwrap_or_else(|e| e.into_inner()) {
        return Err(err);
    }
    ctx.check_cancelled()?;
    let mut staged = staged.into_inner().unwrap_or_else(|e| e.into_inner());
    staged.sort();
    debug!(units = units.len(), staged = staged.len(), "work units finished");
    Ok(staged)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Copy staged blocks into the store and record provenance in one commit.
pub(crate) fn commit<F>(store: &mut PileupStore, staging: &StagingArea, staged: &[PathBuf], record: F) -> Result<()>
where
    F: FnOnce(&mut ProvenanceLog) -> Result<()>,
{
    // Provenance is validated before anything is written.
    let mut provenance = store.provenance().clone();
    record(&mut provenance)?;

    store.begin_commit()?;
    for path in staged {
        let block = staging.load(path)?;
        store.write_span(&block)?;
    }
    *store.provenance_mut() = provenance;
    store.finish_commit()?;
    info!(
        store = %store.path().display(),
        blocks = staged.len(),
        entries = store.provenance().len(),
        "committed"
    );
    Ok(())
}
