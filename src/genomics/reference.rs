//! Reference lengths for bootstrap: a FASTA index, or the FASTA itself.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{PileupError, Result};

/// Supplies `(chromosome, length)` pairs in reference order.
pub trait ReferenceSource {
    /// Label recorded in the store (usually the reference path).
    fn label(&self) -> String;

    /// Chromosomes in reference order.
    fn chromosomes(&self) -> &[(String, u64)];
}

/// Reference read from `<fasta>.fai`, or from FASTA headers when no index exists.
#[derive(Debug, Clone)]
pub struct FaiReference {
    path: PathBuf,
    chromosomes: Vec<(String, u64)>,
}

impl FaiReference {
    /// Load lengths for `path`, which may name the FASTA or its `.fai`.
    pub fn open(path: &Path) -> Result<Self> {
        let is_fai = path.extension().map_or(false, |ext| ext == "fai");
        let mut index = path.as_os_str().to_os_string();
        index.push(".fai");
        let index = PathBuf::from(index);

        let chromosomes = if is_fai {
            read_fai(path)?
        } else if index.exists() {
            debug!(index = %index.display(), "reading reference lengths from index");
            read_fai(&index)?
        } else {
            debug!(fasta = %path.display(), "scanning FASTA for reference lengths");
            scan_fasta(path)?
        };

        if chromosomes.is_empty() {
            return Err(reference_error(path, "no chromosomes found"));
        }
        let mut seen = HashSet::new();
        for (name, length) in &chromosomes {
            if !seen.insert(name.as_str()) {
                return Err(reference_error(path, format!("chromosome {} appears twice", name)));
            }
            if *length == 0 {
                return Err(reference_error(path, format!("chromosome {} is empty", name)));
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            chromosomes,
        })
    }
}

impl ReferenceSource for FaiReference {
    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn chromosomes(&self) -> &[(String, u64)] {
        &self.chromosomes
    }
}

/// Fixed chromosome list.
#[derive(Debug, Clone)]
pub struct StaticReference {
    label: String,
    chromosomes: Vec<(String, u64)>,
}

impl StaticReference {
    /// Reference named `label` with the given chromosomes.
    pub fn new(label: impl Into<String>, chromosomes: Vec<(String, u64)>) -> Self {
        Self {
            label: label.into(),
            chromosomes,
        }
    }
}

impl ReferenceSource for StaticReference {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn chromosomes(&self) -> &[(String, u64)] {
        &self.chromosomes
    }
}

fn reference_error(path: &Path, reason: impl Into<String>) -> PileupError {
    PileupError::Reference {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn read_fai(path: &Path) -> Result<Vec<(String, u64)>> {
    let file = File::open(path).map_err(|e| PileupError::io(path, e))?;
    let mut chromosomes = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| PileupError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let name = fields.next().unwrap_or_default().trim();
        let length = fields
            .next()
            .and_then(|f| f.trim().parse::<u64>().ok())
            .ok_or_else(|| reference_error(path, format!("line {} has no length", line_no + 1)))?;
        chromosomes.push((name.to_string(), length));
    }
    Ok(chromosomes)
}

fn scan_fasta(path: &Path) -> Result<Vec<(String, u64)>> {
    let file = File::open(path).map_err(|e| PileupError::io(path, e))?;
    let mut chromosomes: Vec<(String, u64)> = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| PileupError::io(path, e))?;
        if let Some(header) = line.strip_prefix('>') {
            let name = header.split_whitespace().next().unwrap_or_default();
            chromosomes.push((name.to_string(), 0));
        } else if let Some((_, length)) = chromosomes.last_mut() {
            *length += line.trim_end().len() as u64;
        } else if !line.trim().is_empty() {
            return Err(reference_error(path, "sequence before first FASTA header"));
        }
    }
    Ok(chromosomes)
}
