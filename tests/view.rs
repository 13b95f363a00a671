#[path = "common/mod.rs"]
mod common;

use pileup_store::pipeline::{self, ElementGroup, Region, ViewSelection};
use pileup_store::{Element, PileupError, PileupStore, PipelineConfig, Strand};
use test_case::test_case;

fn populated() -> common::Scratch {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    pipeline::add(
        &scratch.store,
        &[common::source("s1", common::five_a_reads())],
        &PipelineConfig::default(),
    )
    .expect("add should succeed");
    scratch
}

#[test_case(1, 100; "whole chromosome")]
#[test_case(18, 25; "straddles coverage edge")]
#[test_case(42, 42; "single position")]
fn view_returns_inclusive_ascending_positions(start: u64, end: u64) {
    let scratch = populated();
    let mut store = PileupStore::open(&scratch.store, false).unwrap();
    let records = pipeline::view(&mut store, &Region::span("chr1", start, end), &[]).unwrap();
    let positions: Vec<u64> = records.iter().map(|r| r.position).collect();
    assert_eq!(positions, (start..=end).collect::<Vec<_>>());
    assert!(records.iter().all(|r| r.forward.len() == Element::ALL.len()));
}

#[test]
fn view_selects_elements_in_requested_order() {
    let scratch = populated();
    let mut store = PileupStore::open(&scratch.store, false).unwrap();
    let records = pipeline::view(
        &mut store,
        &Region::span("chr1", 19, 21),
        &[Element::StopAll, Element::BaseA],
    )
    .unwrap();
    assert_eq!(records[0].forward, vec![0, 5]);
    assert_eq!(records[1].forward, vec![5, 5]);
    assert_eq!(records[2].forward, vec![0, 0]);
    assert_eq!(records[1].reverse, vec![0, 0]);
}

#[test_case(Region::span("chr1", 0, 10); "start below one")]
#[test_case(Region::span("chr1", 90, 101); "end past length")]
#[test_case(Region::span("chr1", 20, 10); "start after end")]
fn out_of_range_regions_are_rejected(region: Region) {
    let scratch = populated();
    let mut store = PileupStore::open(&scratch.store, false).unwrap();
    let err = pipeline::view(&mut store, &region, &[]).unwrap_err();
    assert!(matches!(err, PileupError::InvalidRegion { .. }), "got {:?}", err);
}

#[test]
fn rendered_view_has_header_provenance_and_rows() {
    let scratch = populated();
    let mut store = PileupStore::open(&scratch.store, false).unwrap();
    let mut out = Vec::new();
    pipeline::render_view(
        &mut out,
        &mut store,
        &"chr1:10-12".parse().unwrap(),
        &ViewSelection::elements(&[Element::BaseA]),
    )
        .unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert!(lines[0].starts_with("## STORE="));
    assert!(lines.contains(&"## INFO=BAMS_ADDED:1"));
    assert!(lines.iter().any(|l| l.starts_with("## MODE:add,") && l.contains("RECORDS:5")));
    let rows: Vec<&str> = lines.iter().copied().filter(|l| !l.starts_with("##")).collect();
    assert_eq!(
        rows,
        vec![
            "Reference,Position,baseA_for,baseA_rev",
            "chr1,10,5,0",
            "chr1,11,5,0",
            "chr1,12,5,0"
        ]
    );
}

#[test]
fn group_presets_pick_columns_and_strands() {
    let scratch = populated();
    let mut store = PileupStore::open(&scratch.store, false).unwrap();
    let region: Region = "chr1:10-11".parse().unwrap();
    let rows = |store: &mut PileupStore, selection: ViewSelection| -> Vec<String> {
        let mut out = Vec::new();
        pipeline::render_view(&mut out, store, &region, &selection).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .filter(|l| !l.starts_with("##"))
            .map(str::to_string)
            .collect()
    };

    let bases = rows(&mut store, ViewSelection::group(ElementGroup::Bases));
    assert_eq!(
        bases[0],
        "Reference,Position,baseA_for,baseC_for,baseG_for,baseT_for,baseN_for,\
         baseA_rev,baseC_rev,baseG_rev,baseT_rev,baseN_rev"
    );
    assert_eq!(bases[1], "chr1,10,5,0,0,0,0,0,0,0,0,0");

    let reverse = rows(&mut store, ViewSelection::group(ElementGroup::Reverse));
    assert_eq!(reverse[0].split(',').count(), 2 + Element::COUNT);
    assert!(reverse[0].split(',').skip(2).all(|c| c.ends_with("_rev")));
    assert!(reverse[1..].iter().all(|row| row.split(',').skip(2).all(|v| v == "0")));

    let forward_a = rows(
        &mut store,
        ViewSelection::elements(&[Element::BaseA]).only(Strand::Forward),
    );
    assert_eq!(forward_a, vec!["Reference,Position,baseA_for", "chr1,10,5", "chr1,11,5"]);
}
