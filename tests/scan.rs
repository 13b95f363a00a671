//! Window scanning over one or more stores.

#[path = "common/mod.rs"]
mod common;

use std::io::Write;

use pileup_store::pipeline::{self, Region};
use pileup_store::scan::{self, read_candidates, WindowClass};
use pileup_store::{Element, PileupError, PileupStore, PipelineConfig, ScanConfig};

fn open(path: &std::path::Path) -> PileupStore {
    PileupStore::open(path, false).expect("open should succeed")
}

#[test]
fn windows_with_too_few_candidates_are_skipped() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    pipeline::add(
        &scratch.store,
        &[common::source("s1", common::five_a_reads())],
        &PipelineConfig::default(),
    )
    .unwrap();

    assert_eq!(scan::windows(1, 100, 10).len(), 10);

    // Three candidates in 11-20, two in 21-30, four in 91-100.
    let candidates = [11, 12, 13, 21, 25, 91, 92, 93, 94];
    let config = ScanConfig::default().with_window(10).unwrap().with_min_positions(3);
    let mut stores = vec![open(&scratch.store)];
    let windows = scan::scan(&mut stores, &Region::span("chr1", 1, 100), &candidates, &config)
        .expect("scan should succeed");

    let spans: Vec<(u64, u64)> = windows.iter().map(|w| (w.start, w.end)).collect();
    assert_eq!(spans, vec![(11, 20), (91, 100)]);

    let covered = &windows[0];
    assert_eq!(covered.members, 3);
    assert_eq!(covered.total(Element::BaseA), 15);
    assert_eq!(covered.total_count, 15);
    assert_eq!(covered.regularity, 1.0);
    assert_eq!(covered.class, WindowClass::Regular);
    assert_eq!(covered.nonref_fraction, 0.0);
    assert!(!covered.high_confidence);

    let empty = &windows[1];
    assert_eq!(empty.total_count, 0);
    assert_eq!(empty.regularity, 0.0);
    assert_eq!(empty.class, WindowClass::Irregular);
}

#[test]
fn min_count_drops_shallow_windows_and_stores_are_summed() {
    let scratch = common::Scratch::new();
    let a = scratch.path("a.qplp");
    let b = scratch.path("b.qplp");
    for (path, name) in [(&a, "a"), (&b, "b")] {
        common::bootstrap(path);
        pipeline::add(path, &[common::source(name, common::five_a_reads())], &PipelineConfig::default())
            .unwrap();
    }
    let candidates: Vec<u64> = (1..=100).collect();
    let config = ScanConfig::default().with_window(10).unwrap().with_min_count(1);
    let mut stores = vec![open(&a), open(&b)];
    let windows = scan::scan(&mut stores, &Region::chromosome("chr1"), &candidates, &config).unwrap();

    let spans: Vec<(u64, u64)> = windows.iter().map(|w| (w.start, w.end)).collect();
    assert_eq!(spans, vec![(1, 10), (11, 20)]);
    // Only position 10 is covered in the first window: very uneven.
    assert_eq!(windows[0].total_count, 10);
    assert_eq!(windows[0].class, WindowClass::Irregular);
    assert_eq!(windows[1].total(Element::BaseA), 100);
    assert_eq!(windows[1].class, WindowClass::Regular);
}

#[test]
fn stores_must_agree_on_chromosome_length() {
    let scratch = common::Scratch::new();
    let a = scratch.path("a.qplp");
    let b = scratch.path("b.qplp");
    common::bootstrap(&a);
    let other = pileup_store::genomics::StaticReference::new("o.fa", vec![("chr1".to_string(), 90)]);
    pipeline::bootstrap(&b, &other, Default::default(), false).unwrap();
    let mut stores = vec![open(&a), open(&b)];
    let err = scan::scan(&mut stores, &Region::chromosome("chr1"), &[5, 6, 7], &ScanConfig::default())
        .unwrap_err();
    assert!(matches!(err, PileupError::IncompatibleStore { .. }));
}

#[test]
fn candidates_file_drives_a_scan() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let list = scratch.path("candidates.bed");
    let mut file = std::fs::File::create(&list).unwrap();
    writeln!(file, "track name=candidates").unwrap();
    writeln!(file, "chr1\t9\t12").unwrap();
    writeln!(file, "chr2\t0\t50").unwrap();
    drop(file);

    let positions = read_candidates(&list, "chr1").unwrap();
    assert_eq!(positions, vec![10, 11, 12]);
    let mut stores = vec![open(&scratch.store)];
    let windows = scan::scan(
        &mut stores,
        &Region::chromosome("chr1"),
        &positions,
        &ScanConfig::default(),
    )
    .unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!((windows[0].start, windows[0].end, windows[0].members), (1, 100, 3));

    let mut out = Vec::new();
    scan::write_windows(&mut out, &windows).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("#chromosome\tstart\tend"));
    assert_eq!(text.lines().count(), 2);
}

#[test]
fn zero_minimum_keeps_every_window() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let config = ScanConfig::default().with_window(10).unwrap().with_min_positions(0);
    let mut stores = vec![open(&scratch.store)];
    let windows = scan::scan(&mut stores, &Region::chromosome("chr1"), &[15], &config).unwrap();

    assert_eq!(windows.len(), 10);
    assert_eq!(windows[1].members, 1);
    let empty = &windows[0];
    assert_eq!((empty.start, empty.end, empty.members), (1, 10, 0));
    assert_eq!(empty.total_count, 0);
    assert_eq!(empty.regularity, 0.0);
}
