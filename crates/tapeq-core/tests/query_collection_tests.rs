use tapeq_core::{
    AddOutcome, CollectionOptions, InsertDate, ObjectName, OrderKey, QueryCollection, QueryRecord,
    TapeqError,
};

fn record(ll: &str, day: u8, lo: u32, payload: u32) -> QueryRecord<u32> {
    QueryRecord::new(
        ObjectName::new("/lustre", "/data", ll),
        InsertDate::new(2024, 1, day, 12, 0, 0),
        OrderKey::new(1, 0, 0, 0, lo),
        payload,
    )
}

#[test]
fn dedup_keeps_newest_version_per_key() -> Result<(), Box<dyn std::error::Error>> {
    let mut queries = QueryCollection::new()?;

    assert_eq!(queries.add(record("/a", 1, 10, 1), true)?, AddOutcome::Appended);
    assert_eq!(queries.add(record("/a", 3, 11, 2), true)?, AddOutcome::Replaced);
    assert_eq!(queries.add(record("/a", 5, 12, 3), true)?, AddOutcome::Replaced);
    assert_eq!(queries.add(record("/b", 2, 20, 4), true)?, AddOutcome::Appended);
    assert_eq!(queries.add(record("/c", 1, 30, 5), true)?, AddOutcome::Appended);
    assert_eq!(queries.add(record("/c", 9, 31, 6), true)?, AddOutcome::Replaced);

    assert_eq!(queries.len(), 3);
    let payloads: Vec<u32> = queries.iter().map(|query| query.payload).collect();
    assert_eq!(payloads, vec![3, 4, 6]);
    assert_eq!(queries.get(0)?.inserted_at.day, 5);
    assert_eq!(queries.get(2)?.order_key.lo, 31);

    Ok(())
}

#[test]
fn dedup_accepts_same_timestamp_as_replacement() -> Result<(), Box<dyn std::error::Error>> {
    let mut queries = QueryCollection::new()?;

    queries.add(record("/a", 4, 1, 1), true)?;
    assert_eq!(queries.add(record("/a", 4, 2, 2), true)?, AddOutcome::Replaced);

    assert_eq!(queries.len(), 1);
    assert_eq!(queries.get(0)?.payload, 2);
    Ok(())
}

#[test]
fn out_of_order_key_is_rejected_without_mutation() -> Result<(), Box<dyn std::error::Error>> {
    let mut queries = QueryCollection::new()?;
    queries.add(record("/b", 1, 1, 1), true)?;

    let err = queries
        .add(record("/a", 2, 2, 2), true)
        .expect_err("smaller key must be rejected");

    match err {
        TapeqError::OrderViolation { last, key } => {
            assert_eq!(last, "/lustre/data/b");
            assert_eq!(key, "/lustre/data/a");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(queries.len(), 1);
    assert_eq!(queries.get(0)?.payload, 1);

    // The last accepted key is still "/b".
    assert_eq!(queries.add(record("/b", 2, 3, 3), true)?, AddOutcome::Replaced);
    Ok(())
}

#[test]
fn older_version_is_rejected_as_stale() -> Result<(), Box<dyn std::error::Error>> {
    let mut queries = QueryCollection::new()?;
    queries.add(record("/a", 10, 1, 1), true)?;

    let err = queries
        .add(record("/a", 9, 2, 2), true)
        .expect_err("older version must be rejected");

    match err {
        TapeqError::StaleVersion {
            key,
            stored,
            presented,
        } => {
            assert_eq!(key, "/lustre/data/a");
            assert!(presented < stored);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(queries.len(), 1);
    assert_eq!(queries.get(0)?.payload, 1);
    assert_eq!(queries.get(0)?.inserted_at.day, 10);
    Ok(())
}

#[test]
fn replacement_updates_stored_timestamp() -> Result<(), Box<dyn std::error::Error>> {
    let mut queries = QueryCollection::new()?;
    queries.add(record("/a", 1, 1, 1), true)?;
    queries.add(record("/a", 8, 1, 2), true)?;

    // Newer than the first version but older than the replacement.
    assert!(matches!(
        queries.add(record("/a", 5, 1, 3), true),
        Err(TapeqError::StaleVersion { .. })
    ));
    assert_eq!(queries.get(0)?.payload, 2);
    Ok(())
}

#[test]
fn non_dedup_mode_appends_duplicates() -> Result<(), Box<dyn std::error::Error>> {
    let mut queries = QueryCollection::new()?;

    queries.add(record("/b", 2, 1, 1), false)?;
    queries.add(record("/a", 1, 1, 2), false)?;
    queries.add(record("/a", 1, 1, 3), false)?;

    assert_eq!(queries.len(), 3);
    Ok(())
}

#[test]
fn growth_preserves_every_record() -> Result<(), Box<dyn std::error::Error>> {
    let mut queries = QueryCollection::with_options(CollectionOptions {
        initial_capacity: 4,
    })?;
    let initial = queries.capacity();
    assert!(initial >= 4);

    for payload in 0..=(initial as u32) {
        queries.add(record("/same", 1, payload, payload), false)?;
    }

    assert_eq!(queries.len(), initial + 1);
    assert!(queries.capacity() >= 2 * initial);
    for index in 0..queries.len() {
        assert_eq!(queries.get(index)?.payload, index as u32);
    }
    Ok(())
}

#[test]
fn zero_initial_capacity_still_accepts_records() -> Result<(), Box<dyn std::error::Error>> {
    let mut queries = QueryCollection::with_options(CollectionOptions {
        initial_capacity: 0,
    })?;

    for payload in 0..10 {
        queries.add(record("/x", 1, payload, payload), false)?;
    }

    assert_eq!(queries.len(), 10);
    Ok(())
}

#[test]
fn get_past_end_is_out_of_range() -> Result<(), Box<dyn std::error::Error>> {
    let mut queries = QueryCollection::new()?;
    assert!(queries.is_empty());
    queries.add(record("/a", 1, 1, 1), true)?;

    match queries.get(1) {
        Err(TapeqError::IndexOutOfRange { index, len }) => {
            assert_eq!(index, 1);
            assert_eq!(len, 1);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[test]
fn locality_sort_orders_by_order_key() -> Result<(), Box<dyn std::error::Error>> {
    let mut queries = QueryCollection::new()?;
    let keys = [
        OrderKey::new(2, 0, 0, 0, 1),
        OrderKey::new(1, 5, 0, 0, 0),
        OrderKey::new(1, 0, 7, 0, 0),
        OrderKey::new(1, 0, 7, 0, 0),
        OrderKey::new(1, 0, 0, 3, 9),
        OrderKey::new(1, 0, 0, 3, 2),
        OrderKey::new(0, 9, 9, 9, 9),
    ];
    for (payload, key) in keys.iter().enumerate() {
        queries.add(
            QueryRecord::new(
                ObjectName::new("fs", "/hl", format!("/{payload}")),
                InsertDate::default(),
                *key,
                payload,
            ),
            false,
        )?;
    }

    queries.sort_for_locality();

    let sorted: Vec<OrderKey> = queries.iter().map(|query| query.order_key).collect();
    for pair in sorted.windows(2) {
        assert!(pair[0] <= pair[1], "{:?} > {:?}", pair[0], pair[1]);
    }
    assert_eq!(sorted.first(), Some(&OrderKey::new(0, 9, 9, 9, 9)));
    assert_eq!(sorted.last(), Some(&OrderKey::new(2, 0, 0, 0, 1)));

    // Equal keys keep their insertion order.
    let tied: Vec<usize> = queries
        .iter()
        .filter(|query| query.order_key == OrderKey::new(1, 0, 7, 0, 0))
        .map(|query| query.payload)
        .collect();
    assert_eq!(tied, vec![2, 3]);
    Ok(())
}

#[test]
fn into_records_returns_current_order() -> Result<(), Box<dyn std::error::Error>> {
    let mut queries = QueryCollection::new()?;
    queries.add(record("/a", 1, 9, 1), true)?;
    queries.add(record("/b", 1, 3, 2), true)?;
    queries.sort_for_locality();

    let payloads: Vec<u32> = queries.into_records().into_iter().map(|q| q.payload).collect();
    assert_eq!(payloads, vec![2, 1]);
    Ok(())
}
