//! Accumulating sources into a store and taking them back out.

#[path = "common/mod.rs"]
mod common;

use std::path::Path;

use pileup_store::genomics::AlignedRead;
use pileup_store::pipeline::{self, CancelToken, PipelineContext};
use pileup_store::{
    ChromosomeSegment, Element, EntryStatus, Operation, PileupError, PileupStore, PipelineConfig,
    Strand,
};
use proptest::prelude::*;

fn snapshot(path: &Path) -> Vec<ChromosomeSegment> {
    let mut store = PileupStore::open(path, false).expect("open should succeed");
    let names: Vec<String> = store.chromosomes().unwrap().into_iter().map(|(n, _)| n).collect();
    names.iter().map(|n| store.segment(n).unwrap()).collect()
}

fn config(threads: usize, block_size: u64) -> PipelineConfig {
    PipelineConfig::default()
        .with_threads(threads)
        .unwrap()
        .with_block_size(block_size)
        .unwrap()
}

#[test]
fn five_forward_a_reads_fill_chr1_10_to_20() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let sources = vec![common::source("s1", common::five_a_reads())];
    let summary = pipeline::add(&scratch.store, &sources, &PipelineConfig::default())
        .expect("add should succeed");
    assert_eq!(summary.sources[0].records, 5);

    let mut store = PileupStore::open(&scratch.store, false).unwrap();
    let chr1 = store.segment("chr1").unwrap();
    for pos in 1..=100 {
        let expected = if (10..=20).contains(&pos) { 5 } else { 0 };
        assert_eq!(chr1.get(Strand::Forward, Element::BaseA, pos), Some(expected), "pos {}", pos);
        assert_eq!(chr1.get(Strand::Reverse, Element::BaseA, pos), Some(0));
    }
    assert_eq!(chr1.get(Strand::Forward, Element::ReferenceNo, 15), Some(5));
    assert_eq!(chr1.get(Strand::Forward, Element::LowRead, 15), Some(1));
    assert!(store.segment("chr2").unwrap().is_zero());

    let last = store.provenance().entries().last().unwrap();
    assert_eq!(last.operation, Operation::Add);
    assert_eq!(last.records, 5);
    assert_eq!(last.status, EntryStatus::Active);
}

#[test]
fn add_then_remove_restores_every_array() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let before = snapshot(&scratch.store);
    let sources = vec![common::source("s1", common::five_a_reads())];
    pipeline::add(&scratch.store, &sources, &PipelineConfig::default()).unwrap();
    assert_ne!(snapshot(&scratch.store), before);

    let summary = pipeline::remove(&scratch.store, &sources, &PipelineConfig::default())
        .expect("remove should succeed");
    assert_eq!(summary.sources[0].records, 5);
    assert_eq!(snapshot(&scratch.store), before);

    let store = PileupStore::open(&scratch.store, false).unwrap();
    let entries = store.provenance().entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[1].operation, Operation::Add);
    assert_eq!(entries[1].status, EntryStatus::Reversed);
    assert_eq!(entries[2].operation, Operation::Remove);
}

#[test]
fn re_adding_without_override_changes_nothing() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let sources = vec![common::source("s1", common::five_a_reads())];
    pipeline::add(&scratch.store, &sources, &PipelineConfig::default()).unwrap();
    let after_first = snapshot(&scratch.store);

    let err = pipeline::add(&scratch.store, &sources, &PipelineConfig::default()).unwrap_err();
    assert!(matches!(err, PileupError::DuplicateContribution { .. }), "got {:?}", err);
    assert_eq!(snapshot(&scratch.store), after_first);
    assert_eq!(
        PileupStore::open(&scratch.store, false).unwrap().provenance().len(),
        2
    );

    let allowed = PipelineConfig::default().with_override(true);
    pipeline::add(&scratch.store, &sources, &allowed).expect("override should succeed");
    let mut store = PileupStore::open(&scratch.store, false).unwrap();
    let chr1 = store.segment("chr1").unwrap();
    assert_eq!(chr1.get(Strand::Forward, Element::BaseA, 12), Some(10));
}

#[test]
fn same_source_twice_in_one_batch_is_a_duplicate() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let sources = vec![
        common::source("s1", common::five_a_reads()),
        common::source("s1", common::five_a_reads()),
    ];
    let err = pipeline::add(&scratch.store, &sources, &PipelineConfig::default()).unwrap_err();
    assert!(matches!(err, PileupError::DuplicateContribution { .. }));
}

#[test]
fn removing_an_unknown_source_fails() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let sources = vec![common::source("never", common::five_a_reads())];
    let err = pipeline::remove(&scratch.store, &sources, &PipelineConfig::default()).unwrap_err();
    assert!(matches!(err, PileupError::NoMatchingContribution { .. }), "got {:?}", err);
}

#[test]
fn removing_twice_fails_the_second_time() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let sources = vec![common::source("s1", common::five_a_reads())];
    pipeline::add(&scratch.store, &sources, &PipelineConfig::default()).unwrap();
    pipeline::remove(&scratch.store, &sources, &PipelineConfig::default()).unwrap();
    let err = pipeline::remove(&scratch.store, &sources, &PipelineConfig::default()).unwrap_err();
    assert!(matches!(err, PileupError::NoMatchingContribution { .. }));
}

#[test]
fn excluded_reads_do_not_touch_counters() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let reads = vec![
        common::duplicate(common::matching_read("chr1", 30, "CCCC", false)),
        common::read("chr1", 40, "4M", "GGGG", false),
        common::matching_read("chr2", 48, "TTTTTT", true),
    ];
    let summary = pipeline::add(
        &scratch.store,
        &[common::source("mixed", reads)],
        &PipelineConfig::default(),
    )
    .unwrap();
    let counts = &summary.sources[0];
    assert_eq!((counts.records, counts.skipped, counts.missing_md), (1, 1, 1));

    let mut store = PileupStore::open(&scratch.store, false).unwrap();
    assert!(store.segment("chr1").unwrap().is_zero());
    let chr2 = store.segment("chr2").unwrap();
    // Truncated at the chromosome end.
    assert_eq!(chr2.get(Strand::Reverse, Element::BaseT, 50), Some(1));
    assert_eq!(chr2.get(Strand::Reverse, Element::StartAll, 48), Some(1));
}

#[test]
fn high_nonreference_uses_store_thresholds() {
    let scratch = common::Scratch::new();
    let parameters = pileup_store::StoreParameters::default()
        .with_low_read_count(2)
        .unwrap();
    common::bootstrap_with(&scratch.store, parameters);
    let mut reads: Vec<AlignedRead> = (0..3)
        .map(|_| common::matching_read("chr1", 5, "AAA", false))
        .collect();
    reads.push(common::read("chr1", 5, "3M", "ACA", false).with_md("1A1"));
    pipeline::add(
        &scratch.store,
        &[common::source("s1", reads)],
        &PipelineConfig::default(),
    )
    .unwrap();
    let mut store = PileupStore::open(&scratch.store, false).unwrap();
    let chr1 = store.segment("chr1").unwrap();
    // 1 of 4 calls is non-reference: 25% >= 20%.
    assert_eq!(chr1.get(Strand::Forward, Element::HighNonreference, 6), Some(1));
    assert_eq!(chr1.get(Strand::Forward, Element::HighNonreference, 5), Some(0));
    assert_eq!(chr1.get(Strand::Forward, Element::LowRead, 5), Some(0));
}

#[test]
fn remove_reuses_thresholds_recorded_at_add() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let before = snapshot(&scratch.store);
    let lenient = pileup_store::StoreParameters::default()
        .with_low_read_count(2)
        .unwrap();
    let sources = vec![common::source("s1", common::five_a_reads())];
    pipeline::add(
        &scratch.store,
        &sources,
        &PipelineConfig::default().with_thresholds(lenient),
    )
    .unwrap();
    {
        let mut store = PileupStore::open(&scratch.store, false).unwrap();
        assert_eq!(store.provenance().entries()[1].parameters.low_read_count, 2);
        let chr1 = store.segment("chr1").unwrap();
        assert_eq!(chr1.get(Strand::Forward, Element::LowRead, 15), Some(0));
    }

    pipeline::remove(&scratch.store, &sources, &PipelineConfig::default()).unwrap();
    assert_eq!(snapshot(&scratch.store), before);
}

#[test]
fn cancelled_add_leaves_store_untouched() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let before = snapshot(&scratch.store);
    let token = CancelToken::new();
    token.cancel();
    let ctx = PipelineContext::new(PipelineConfig::default()).with_cancel_token(token);
    let sources = vec![common::source("s1", common::five_a_reads())];
    let err = pipeline::add_with_context(&scratch.store, &sources, &ctx).unwrap_err();
    assert!(matches!(err, PileupError::Cancelled));
    assert_eq!(snapshot(&scratch.store), before);
    assert_eq!(
        PileupStore::open(&scratch.store, false).unwrap().provenance().len(),
        1
    );
}

#[test]
fn reads_spanning_blocks_are_counted_once() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let reads = vec![common::read("chr1", 8, "2S6=", "TTACGTAC", false)];
    let summary = pipeline::add(&scratch.store, &[common::source("s1", reads)], &config(3, 5)).unwrap();
    assert_eq!(summary.sources[0].records, 1);
    let mut store = PileupStore::open(&scratch.store, false).unwrap();
    let chr1 = store.segment("chr1").unwrap();
    assert_eq!(chr1.get(Strand::Forward, Element::CigarS, 6), Some(1));
    assert_eq!(chr1.get(Strand::Forward, Element::CigarS, 7), Some(1));
    assert_eq!(chr1.get(Strand::Forward, Element::CigarSStart, 8), Some(1));
    assert_eq!(chr1.get(Strand::Forward, Element::StopAll, 13), Some(1));
}

fn arb_read() -> impl Strategy<Value = AlignedRead> {
    (
        prop_oneof![Just("chr1"), Just("chr2")],
        1u64..=110,
        0usize..3,
        1usize..8,
        0usize..3,
        0usize..3,
        1usize..5,
        any::<bool>(),
        proptest::collection::vec(prop_oneof![Just('A'), Just('C'), Just('G'), Just('T')], 30),
    )
        .prop_map(|(chrom, pos, clip, equal, insertion, deletion, diff, reverse, bases)| {
            let mut cigar = String::new();
            if clip > 0 {
                cigar.push_str(&format!("{}S", clip));
            }
            cigar.push_str(&format!("{}=", equal));
            if insertion > 0 {
                cigar.push_str(&format!("{}I", insertion));
            }
            if deletion > 0 {
                cigar.push_str(&format!("{}D", deletion));
            }
            cigar.push_str(&format!("{}X", diff));
            let len = clip + equal + insertion + diff;
            let sequence: String = bases.into_iter().take(len).collect();
            common::read(chrom, pos, &cigar, &sequence, reverse)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn removing_one_source_leaves_exactly_the_other(
        first in proptest::collection::vec(arb_read(), 0..12),
        second in proptest::collection::vec(arb_read(), 0..12),
        threads in 1usize..4,
        block_size in prop_oneof![Just(7u64), Just(25u64), Just(100_000u64)],
    ) {
        let scratch = common::Scratch::new();
        let both = scratch.store.clone();
        let only_second = scratch.path("second.qplp");
        common::bootstrap(&both);
        common::bootstrap(&only_second);

        let a = vec![common::source("a", first)];
        let b = vec![common::source("b", second)];
        pipeline::add(&both, &a, &config(threads, block_size)).unwrap();
        pipeline::add(&both, &b, &config(threads, block_size)).unwrap();
        pipeline::remove(&both, &a, &config(threads, block_size)).unwrap();
        pipeline::add(&only_second, &b, &PipelineConfig::default()).unwrap();

        prop_assert_eq!(snapshot(&both), snapshot(&only_second));
    }
}
