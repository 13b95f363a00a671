//! Store bootstrap, open and close behaviour.

#[path = "common/mod.rs"]
mod common;

use std::fs;

use pileup_store::{Element, Operation, PileupError, PileupStore, StoreParameters, Strand};

#[test]
fn bootstrapped_arrays_have_declared_length_and_are_zero() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);

    let mut store = PileupStore::open(&scratch.store, false).expect("open should succeed");
    assert_eq!(
        store.chromosomes().unwrap(),
        vec![("chr1".to_string(), 100), ("chr2".to_string(), 50)]
    );
    for (name, length) in [("chr1", 100usize), ("chr2", 50)] {
        let segment = store.segment(name).expect("segment should load");
        assert!(segment.is_zero(), "{} should be all zero", name);
        for strand in Strand::ALL {
            for &element in Element::ALL {
                assert_eq!(segment.counter(strand, element).len(), length);
            }
        }
    }
    assert_eq!(store.provenance().len(), 1);
    assert_eq!(store.provenance().entries()[0].operation, Operation::Bootstrap);
    assert_eq!(store.provenance().entries()[0].file, "test.fa");
}

#[test]
fn bootstrap_refuses_existing_file_without_overwrite() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let err = pileup_store::pipeline::bootstrap(
        &scratch.store,
        &common::reference(),
        StoreParameters::default(),
        false,
    )
    .unwrap_err();
    assert!(matches!(err, PileupError::AlreadyExists(_)));

    let parameters = StoreParameters::default().with_low_read_count(3).unwrap();
    pileup_store::pipeline::bootstrap(&scratch.store, &common::reference(), parameters, true)
        .expect("overwrite should succeed");
    let store = PileupStore::open(&scratch.store, false).unwrap();
    assert_eq!(store.parameters().unwrap().low_read_count, 3);
}

#[test]
fn parameters_survive_reopen() {
    let scratch = common::Scratch::new();
    let parameters = StoreParameters::default()
        .with_low_read_count(4)
        .unwrap()
        .with_nonref_percent(35)
        .unwrap();
    common::bootstrap_with(&scratch.store, parameters);
    let store = PileupStore::open(&scratch.store, false).unwrap();
    assert_eq!(store.parameters().unwrap(), parameters);
    assert_eq!(store.reference().unwrap(), "test.fa");
    assert_eq!(store.store_id().unwrap().len(), 16);
}

#[test]
fn garbage_file_is_a_corrupt_store() {
    let scratch = common::Scratch::new();
    fs::write(&scratch.store, b"definitely not a pileup store").unwrap();
    let err = PileupStore::open(&scratch.store, false).unwrap_err();
    assert!(matches!(err, PileupError::CorruptStore { .. }), "got {:?}", err);
}

#[test]
fn truncated_store_is_corrupt() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let len = fs::metadata(&scratch.store).unwrap().len();
    let file = fs::OpenOptions::new().write(true).open(&scratch.store).unwrap();
    file.set_len(len / 2).unwrap();
    drop(file);
    let err = PileupStore::open(&scratch.store, false).unwrap_err();
    assert!(matches!(err, PileupError::CorruptStore { .. }), "got {:?}", err);
}

#[test]
fn unknown_chromosome_is_reported() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let mut store = PileupStore::open(&scratch.store, false).unwrap();
    assert!(matches!(
        store.segment("chrX"),
        Err(PileupError::UnknownChromosome(name)) if name == "chrX"
    ));
}

#[test]
fn close_is_idempotent() {
    let scratch = common::Scratch::new();
    common::bootstrap(&scratch.store);
    let mut store = PileupStore::open(&scratch.store, true).unwrap();
    store.close().expect("first close");
    store.close().expect("second close");
    assert!(store.is_closed());
    assert!(store.segment("chr1").is_err());
}

#[test]
fn reference_label_with_a_comma_is_rejected() {
    let scratch = common::Scratch::new();
    let reference = pileup_store::genomics::StaticReference::new(
        "/refs/GRCh38,decoy.fa",
        vec![("chr1".to_string(), 100)],
    );
    let err = pileup_store::pipeline::bootstrap(&scratch.store, &reference, StoreParameters::default(), false)
        .unwrap_err();
    assert!(matches!(err, PileupError::InvalidConfiguration(_)), "got {:?}", err);
    assert!(!scratch.store.exists());
}
