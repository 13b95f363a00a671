//! Scratch directory holding new block counters until commit.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::store::ChromosomeSegment;
use crate::{PileupError, Result};

/// `<store>.staging/`; removed when dropped.
#[derive(Debug)]
pub(crate) struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Create an empty staging directory, discarding one left by a killed run.
    pub fn prepare(store: &Path) -> Result<Self> {
        let mut name = store.as_os_str().to_os_string();
        name.push(".staging");
        let dir = PathBuf::from(name);
        if dir.exists() {
            warn!(dir = %dir.display(), "discarding stale staging directory");
            fs::remove_dir_all(&dir).map_err(|e| PileupError::io(&dir, e))?;
        }
        fs::create_dir_all(&dir).map_err(|e| PileupError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// Staging directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a block's counters; returns the staged file.
    pub fn stage(&self, block: &ChromosomeSegment, chromosome_index: usize) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("{:05}_{:012}.blk", chromosome_index, block.start()));
        let file = File::create(&path).map_err(|e| PileupError::io(&path, e))?;
        let mut out = BufWriter::new(file);
        block
            .write_to(&mut out)
            .and_then(|_| out.flush())
            .map_err(|e| PileupError::io(&path, e))?;
        debug!(
            chromosome = block.name(),
            start = block.start(),
            end = block.end(),
            "staged block"
        );
        Ok(path)
    }

    /// Read a staged block back.
    pub fn load(&self, path: &Path) -> Result<ChromosomeSegment> {
        let file = File::open(path).map_err(|e| PileupError::io(path, e))?;
        ChromosomeSegment::read_from(&mut BufReader::new(file)).map_err(|e| PileupError::io(path, e))
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "failed to remove staging directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Element, Strand};

    #[test]
    fn staged_blocks_load_back_and_vanish_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("s.qplp");
        let staging = StagingArea::prepare(&store).unwrap();
        let mut block = ChromosomeSegment::zeroed_span("chr1", 100, 11, 20);
        block.increment(Strand::Forward, Element::BaseG, 15).unwrap();
        let path = staging.stage(&block, 0).unwrap();
        assert_eq!(staging.load(&path).unwrap(), block);
        let staged_dir = staging.dir().to_path_buf();
        drop(staging);
        assert!(!staged_dir.exists());
    }

    #[test]
    fn stale_directory_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("s.qplp");
        let stale = dir.path().join("s.qplp.staging");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("old.blk"), b"junk").unwrap();
        let staging = StagingArea::prepare(&store).unwrap();
        assert_eq!(fs::read_dir(staging.dir()).unwrap().count(), 0);
    }
}
