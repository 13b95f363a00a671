//! Pileup store: chromosome segments persisted in a single container file.
//!
//! A store is opened for one pipeline invocation and closed at the end.
//! Every open handle holds the advisory lock for its whole lifetime,
//! exclusively when writable.

mod container;
mod counter;
pub mod lock;
mod segment;

pub use counter::{CounterArray, CounterFault, Element, Strand};
pub use lock::{LockMode, StoreLock};
pub use segment::{bytes_per_position, ChromosomeSegment};

pub(crate) use container::Container;

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::StoreParameters;
use crate::ledger::{check_field, ProvenanceEntry, ProvenanceLog};
use crate::{PileupError, Result};

use container::Header;

/// Open pileup store.
#[derive(Debug)]
pub struct PileupStore {
    path: PathBuf,
    container: Option<Container>,
    lock: Option<StoreLock>,
    provenance: ProvenanceLog,
    dirty: bool,
}

impl PileupStore {
    /// Create a store with zero-filled counters for every chromosome.
    ///
    /// Fails with `AlreadyExists` if `path` exists and `overwrite` is false.
    pub fn bootstrap(
        path: &Path,
        reference: &str,
        chromosomes: &[(String, u64)],
        parameters: StoreParameters,
        overwrite: bool,
    ) -> Result<Self> {
        let started = Instant::now();
        if path.exists() && !overwrite {
            return Err(PileupError::AlreadyExists(path.to_path_buf()));
        }
        validate_chromosomes(chromosomes)?;
        check_field("reference label", reference)?;
        let lock = StoreLock::acquire(path)?;
        if path.exists() {
            warn!(store = %path.display(), "overwriting existing store");
            std::fs::remove_file(path).map_err(|e| PileupError::io(path, e))?;
        }

        let store_id = new_store_id(path, reference, chromosomes);
        let header = Header::new(store_id, reference.to_string(), parameters, chromosomes);
        let mut provenance = ProvenanceLog::new();
        provenance.append(ProvenanceEntry::bootstrap(reference, parameters, started.elapsed()));
        let container = Container::create(path, header, &provenance.records())?;
        container.sync()?;

        info!(
            store = %path.display(),
            chromosomes = chromosomes.len(),
            positions = chromosomes.iter().map(|(_, len)| len).sum::<u64>(),
            "bootstrapped pileup store"
        );
        Ok(Self {
            path: path.to_path_buf(),
            container: Some(container),
            lock: Some(lock),
            provenance,
            dirty: false,
        })
    }

    /// Open an existing store.
    ///
    /// Writable opens take the lock exclusively, read-only opens shared;
    /// either fails with `StoreBusy` when the other kind is held.
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        if !path.is_file() {
            return Err(PileupError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "store file not found"),
            ));
        }
        let lock = if writable {
            StoreLock::acquire(path)?
        } else {
            StoreLock::acquire_shared(path)?
        };
        let mut container = Container::open(path, writable)?;
        let records = container.read_metadata()?;
        let provenance =
            ProvenanceLog::from_records(&records).map_err(|reason| PileupError::corrupt(path, reason))?;
        debug!(
            store = %path.display(),
            writable,
            entries = provenance.len(),
            "opened pileup store"
        );
        Ok(Self {
            path: path.to_path_buf(),
            container: Some(container),
            lock: Some(lock),
            provenance,
            dirty: false,
        })
    }

    /// Flush pending provenance, sync and release the lock. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut container) = self.container.take() else {
            return Ok(());
        };
        if self.dirty {
            container.write_metadata(&self.provenance.records())?;
            self.dirty = false;
        }
        container.sync()?;
        drop(container);
        self.lock = None;
        debug!(store = %self.path.display(), "closed pileup store");
        Ok(())
    }

    /// Whether [`PileupStore::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.container.is_none()
    }

    fn container(&self) -> Result<&Container> {
        self.container.as_ref().ok_or_else(|| self.closed_error())
    }

    fn container_mut(&mut self) -> Result<&mut Container> {
        match self.container.as_mut() {
            Some(container) => Ok(container),
            None => Err(PileupError::InvalidConfiguration(format!(
                "store {} is closed",
                self.path.display()
            ))),
        }
    }

    fn closed_error(&self) -> PileupError {
        PileupError::InvalidConfiguration(format!("store {} is closed", self.path.display()))
    }

    /// Store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle holds the write lock.
    pub fn is_writable(&self) -> bool {
        self.lock
            .as_ref()
            .is_some_and(|lock| lock.mode() == LockMode::Exclusive)
    }

    /// Identifier assigned at bootstrap.
    pub fn store_id(&self) -> Result<&str> {
        Ok(&self.container()?.header().store_id)
    }

    /// Reference the store was bootstrapped from.
    pub fn reference(&self) -> Result<&str> {
        Ok(&self.container()?.header().reference)
    }

    /// Thresholds fixed at bootstrap.
    pub fn parameters(&self) -> Result<StoreParameters> {
        Ok(self.container()?.header().parameters)
    }

    /// `(name, length)` of every chromosome in bootstrap order.
    pub fn chromosomes(&self) -> Result<Vec<(String, u64)>> {
        Ok(self
            .container()?
            .header()
            .segments
            .iter()
            .map(|s| (s.name.clone(), s.length))
            .collect())
    }

    /// Declared length of one chromosome.
    pub fn chromosome_length(&self, name: &str) -> Result<u64> {
        self.container()?
            .header()
            .find(name)
            .map(|s| s.length)
            .ok_or_else(|| PileupError::UnknownChromosome(name.to_string()))
    }

    /// Provenance log as currently held (including unflushed entries).
    pub fn provenance(&self) -> &ProvenanceLog {
        &self.provenance
    }

    pub(crate) fn provenance_mut(&mut self) -> &mut ProvenanceLog {
        self.dirty = true;
        &mut self.provenance
    }

    /// Load a whole chromosome.
    pub fn segment(&mut self, name: &str) -> Result<ChromosomeSegment> {
        let length = self.chromosome_length(name)?;
        self.container_mut()?.read_span(name, 1, length)
    }

    /// Load positions `[start, end]` of one chromosome.
    pub fn read_span(&mut self, name: &str, start: u64, end: u64) -> Result<ChromosomeSegment> {
        self.container_mut()?.read_span(name, start, end)
    }

    /// Independent read handle for a worker thread.
    pub(crate) fn span_reader(&self) -> Result<Container> {
        self.container()?.reopen_read()
    }

    /// Overwrite the counters covered by `segment`.
    pub(crate) fn write_span(&mut self, segment: &ChromosomeSegment) -> Result<()> {
        self.container_mut()?.write_span(segment)
    }

    /// Mark the store as mid-commit; cleared by [`PileupStore::finish_commit`].
    pub(crate) fn begin_commit(&mut self) -> Result<()> {
        self.container_mut()?.set_commit_flag(true)
    }

    /// Persist provenance, sync data and clear the commit flag.
    pub(crate) fn finish_commit(&mut self) -> Result<()> {
        let records = self.provenance.records();
        let container = self.container_mut()?;
        container.write_metadata(&records)?;
        container.sync()?;
        container.set_commit_flag(false)?;
        self.dirty = false;
        Ok(())
    }
}

impl Drop for PileupStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(store = %self.path.display(), error = %e, "failed to close pileup store");
        }
    }
}

fn validate_chromosomes(chromosomes: &[(String, u64)]) -> Result<()> {
    if chromosomes.is_empty() {
        return Err(PileupError::InvalidConfiguration(
            "reference has no chromosomes".to_string(),
        ));
    }
    let mut names = std::collections::HashSet::new();
    for (name, length) in chromosomes {
        if *length == 0 {
            return Err(PileupError::InvalidConfiguration(format!(
                "chromosome {} has zero length",
                name
            )));
        }
        if !names.insert(name.as_str()) {
            return Err(PileupError::InvalidConfiguration(format!(
                "chromosome {} appears twice",
                name
            )));
        }
    }
    Ok(())
}

fn new_store_id(path: &Path, reference: &str, chromosomes: &[(String, u64)]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(reference.as_bytes());
    for (name, length) in chromosomes {
        hasher.update(name.as_bytes());
        hasher.update(&length.to_le_bytes());
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.finalize().to_hex()[..16].to_string()
}
