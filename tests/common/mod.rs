#![allow(dead_code)]

use std::path::{Path, PathBuf};

use pileup_store::genomics::{
    flags, parse_cigar, AlignedRead, AlignmentSource, MemorySource, StaticReference,
};
use pileup_store::pipeline;
use pileup_store::{SourceIdentity, StoreParameters};
use tempfile::TempDir;

/// Scratch directory plus the store path inside it.
pub struct Scratch {
    pub dir: TempDir,
    pub store: PathBuf,
}

impl Scratch {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create scratch directory");
        let store = dir.path().join("test.qplp");
        Self { dir, store }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// `{chr1: 100, chr2: 50}`.
pub fn reference() -> StaticReference {
    StaticReference::new(
        "test.fa",
        vec![("chr1".to_string(), 100), ("chr2".to_string(), 50)],
    )
}

pub fn bootstrap(path: &Path) {
    bootstrap_with(path, StoreParameters::default());
}

pub fn bootstrap_with(path: &Path, parameters: StoreParameters) {
    pipeline::bootstrap(path, &reference(), parameters, false).expect("bootstrap should succeed");
}

/// Forward or reverse read with a plain-M CIGAR fully matching the reference.
pub fn matching_read(chrom: &str, pos: u64, sequence: &str, reverse: bool) -> AlignedRead {
    read(chrom, pos, &format!("{}M", sequence.len()), sequence, reverse)
        .with_md(sequence.len().to_string())
}

/// Read with an arbitrary CIGAR; qualities are all 30, mapq 60.
pub fn read(chrom: &str, pos: u64, cigar: &str, sequence: &str, reverse: bool) -> AlignedRead {
    let cigar = parse_cigar(cigar).expect("valid CIGAR");
    let qualities = vec![30u8; sequence.len()];
    AlignedRead::new(chrom, pos, 60, cigar, sequence.as_bytes().to_vec(), qualities, reverse)
}

pub fn duplicate(read: AlignedRead) -> AlignedRead {
    let flags = read.flags | flags::DUPLICATE;
    read.with_flags(flags)
}

pub fn source(name: &str, reads: Vec<AlignedRead>) -> Box<dyn AlignmentSource> {
    let identity = SourceIdentity::new(format!("/data/{}.bam", name), format!("sig-{}", name))
        .expect("valid identity");
    Box::new(MemorySource::new(identity, reads))
}

/// Five forward reads calling A over chr1 10-20.
pub fn five_a_reads() -> Vec<AlignedRead> {
    (0..5)
        .map(|_| matching_read("chr1", 10, "AAAAAAAAAAA", false))
        .collect()
}
