//! On-disk persistence tests for cyface-store.

use cyface_store::{Error, MeasurementQuery, Preferences, Store};
use cyface_types::{Acceleration, GeoLocation, MeasurementStatus, Modality};
use proptest::prelude::*;

#[test]
fn test_reopen_keeps_data_and_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("measurements.db");

    let first_id = {
        let store = Store::open(&path).unwrap();
        let measurement = store.create_measurement(1_000, Modality::Train).unwrap();
        store
            .save(
                measurement.id,
                &[GeoLocation::new(1_000, 51.0, 13.0, 10.0, 5.0)],
                &[Acceleration::new(1_000, 0.0, 0.0, 9.81)],
            )
            .unwrap();
        store.set_preference("installation_id", "device-1").unwrap();
        store.delete_all().unwrap();
        measurement.id
    };

    let store = Store::open(&path).unwrap();
    assert_eq!(store.count_measurements().unwrap(), 0);
    assert_eq!(
        store.get_preference("installation_id").unwrap(),
        Some("device-1".to_string())
    );

    let next = store.create_measurement(2_000, Modality::Train).unwrap();
    assert!(next.id > first_id);
}

#[test]
fn test_open_reports_unavailable_store() {
    let dir = tempfile::tempdir().unwrap();
    // A directory cannot be opened as a database file.
    let result = Store::open(dir.path());
    assert!(matches!(result, Err(Error::Unavailable { .. })));
}

#[test]
fn test_query_pagination() {
    let store = Store::open_in_memory().unwrap();
    for i in 0..5 {
        let m = store.create_measurement(i, Modality::Bicycle).unwrap();
        store.update_status(m.id, MeasurementStatus::Finished).unwrap();
    }

    let page = store
        .query_measurements(&MeasurementQuery::new().oldest_first().limit(2).offset(2))
        .unwrap();
    let ids: Vec<_> = page.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![3, 4]);
}

#[derive(Debug, Clone)]
enum Op {
    Create,
    DeleteNewest,
    DeleteAll,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Create),
        1 => Just(Op::DeleteNewest),
        1 => Just(Op::DeleteAll),
    ]
}

proptest! {
    #[test]
    fn identifiers_strictly_increase(ops in proptest::collection::vec(op(), 1..40)) {
        let store = Store::open_in_memory().unwrap();
        let mut highest = 0;

        for op in ops {
            match op {
                Op::Create => {
                    let m = store.create_measurement(0, Modality::Car).unwrap();
                    prop_assert!(m.id > highest);
                    highest = m.id;
                }
                Op::DeleteNewest => {
                    if let Some(m) = store.query_measurements(&MeasurementQuery::new().limit(1)).unwrap().first() {
                        store.delete(m.id).unwrap();
                    }
                }
                Op::DeleteAll => {
                    store.delete_all().unwrap();
                }
            }
        }
    }
}
