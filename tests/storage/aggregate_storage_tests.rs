//! AggregateStore interface tests.
//!
//! These tests verify the contract of the AggregateStore trait.
//! Each SQL dialect should run these tests.
//!
//! Every test writes under fresh aggregate ids. Truncation is global, so
//! tests assert on their own aggregates only, never on total row counts.

use prost_types::{Any, Timestamp};
use uuid::Uuid;

use aggregate_storage::storage::{AggregateStore, EntityId};
use aggregate_storage::{EventRecord, LifecycleFlags, RecordKind, StorageError};

const BASE_SECONDS: i64 = 1_700_000_000;

/// Timestamp `offset` seconds after a fixed base.
pub fn at(offset: i64, nanos: i32) -> Timestamp {
    Timestamp {
        seconds: BASE_SECONDS + offset,
        nanos,
    }
}

fn payload(version: i32) -> Any {
    Any {
        type_url: format!("type.example/ProjectEvent{}", version),
        value: vec![10, 20, 30, version as u8],
    }
}

/// An event at `version`, recorded `version` seconds after the base.
pub fn make_event(version: i32) -> EventRecord {
    EventRecord::event(payload(version), version, at(version as i64, 0))
}

/// A snapshot at `version`, recorded `version` seconds after the base.
pub fn make_snapshot(version: i32) -> EventRecord {
    EventRecord::snapshot(payload(version), version, at(version as i64, 0))
}

fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// Full history of `id`, newest first.
pub async fn history<I: EntityId, S: AggregateStore<I>>(store: &S, id: &I) -> Vec<EventRecord> {
    store
        .history_backward(id, 0)
        .await
        .expect("history_backward should succeed")
        .collect_remaining()
        .await
        .expect("history should be readable")
}

fn versions(records: &[EventRecord]) -> Vec<i32> {
    records.iter().map(|r| r.version).collect()
}

async fn write_all<S: AggregateStore<String>>(store: &S, id: &String, records: Vec<EventRecord>) {
    for record in records {
        store
            .write_record(id, &record)
            .await
            .expect("write_record should succeed");
    }
}

// =============================================================================
// write_record / history_backward tests
// =============================================================================

pub async fn test_history_of_unknown_aggregate_is_empty<S: AggregateStore<String>>(store: &S) {
    let id = new_id("unknown");

    let mut cursor = store
        .history_backward(&id, 10)
        .await
        .expect("history_backward should succeed");

    assert!(!cursor.has_next().await.expect("has_next should succeed"));
    assert!(matches!(
        cursor.next().await,
        Err(StorageError::NoSuchElement)
    ));
}

pub async fn test_write_record_appends<S: AggregateStore<String>>(store: &S) {
    let id = new_id("append");

    write_all(store, &id, vec![make_event(1), make_event(2)]).await;
    let before = history(store, &id).await;

    store
        .write_record(&id, &make_event(3))
        .await
        .expect("write_record should succeed");
    let after = history(store, &id).await;

    assert_eq!(after.len(), 3);
    assert_eq!(after[0], make_event(3));
    assert_eq!(&after[1..], &before[..], "prior records must be untouched");
}

pub async fn test_history_preserves_payload<S: AggregateStore<String>>(store: &S) {
    let id = new_id("payload");
    let record = EventRecord::snapshot(
        Any {
            type_url: "type.example/ProjectState".to_string(),
            value: vec![1, 2, 3, 4, 5, 100, 200, 255],
        },
        7,
        at(7, 123_456_789),
    );

    store
        .write_record(&id, &record)
        .await
        .expect("write_record should succeed");

    let records = history(store, &id).await;
    assert_eq!(records, vec![record]);
    assert_eq!(records[0].kind, RecordKind::Snapshot);
}

pub async fn test_history_is_newest_first<S: AggregateStore<String>>(store: &S) {
    let id = new_id("order");

    write_all(
        store,
        &id,
        vec![make_event(2), make_event(5), make_event(1), make_snapshot(4), make_event(3)],
    )
    .await;

    assert_eq!(versions(&history(store, &id).await), vec![5, 4, 3, 2, 1]);
}

pub async fn test_equal_versions_order_by_timestamp<S: AggregateStore<String>>(store: &S) {
    let id = new_id("tie");
    let early = EventRecord::event(payload(1), 1, at(10, 0));
    let later_seconds = EventRecord::event(payload(2), 1, at(11, 0));
    let later_nanos = EventRecord::event(payload(3), 1, at(11, 500));

    write_all(store, &id, vec![later_seconds.clone(), early.clone(), later_nanos.clone()]).await;

    assert_eq!(
        history(store, &id).await,
        vec![later_nanos, later_seconds, early]
    );
}

pub async fn test_history_cursor_steps_one_row_at_a_time<S: AggregateStore<String>>(store: &S) {
    let id = new_id("cursor");
    write_all(store, &id, vec![make_event(1), make_event(2)]).await;

    let mut cursor = store
        .history_backward(&id, 1)
        .await
        .expect("history_backward should succeed");
    assert_eq!(cursor.fetch_size(), Some(1));

    assert!(cursor.has_next().await.unwrap());
    assert!(cursor.has_next().await.unwrap(), "has_next must not advance");
    assert_eq!(cursor.next().await.unwrap().version, 2);
    assert_eq!(cursor.next().await.unwrap().version, 1);
    assert!(!cursor.has_next().await.unwrap());
    assert!(matches!(
        cursor.next().await,
        Err(StorageError::NoSuchElement)
    ));
}

pub async fn test_history_cursor_closes_early<S: AggregateStore<String>>(store: &S) {
    let id = new_id("close");
    write_all(store, &id, vec![make_event(1), make_event(2), make_event(3)]).await;

    let mut cursor = store
        .history_backward(&id, 0)
        .await
        .expect("history_backward should succeed");
    assert_eq!(cursor.next().await.unwrap().version, 3);

    cursor.close().expect("close should succeed");
    cursor.close().expect("second close should be a no-op");
    assert!(!cursor.has_next().await.unwrap());

    // The released connection is usable again.
    assert_eq!(history(store, &id).await.len(), 3);
}

// =============================================================================
// truncate tests
// =============================================================================

pub async fn test_truncate_keeps_latest_snapshot<S: AggregateStore<String>>(store: &S) {
    let id = new_id("truncate");
    write_all(
        store,
        &id,
        vec![make_event(1), make_event(2), make_snapshot(3), make_event(4), make_event(5)],
    )
    .await;

    store.truncate(0).await.expect("truncate should succeed");

    assert_eq!(versions(&history(store, &id).await), vec![5, 4, 3]);
}

pub async fn test_truncate_with_cutoff_widens_window<S: AggregateStore<String>>(store: &S) {
    let id = new_id("cutoff");
    write_all(
        store,
        &id,
        vec![make_event(1), make_event(2), make_snapshot(3), make_event(4), make_event(5)],
    )
    .await;

    store
        .truncate_older_than(0, Some(at(2, 0)))
        .await
        .expect("truncate should succeed");

    assert_eq!(versions(&history(store, &id).await), vec![5, 4, 3, 2]);
}

pub async fn test_truncate_with_older_cutoff_keeps_snapshot_window<S: AggregateStore<String>>(
    store: &S,
) {
    let id = new_id("narrow");
    write_all(
        store,
        &id,
        vec![make_event(1), make_event(2), make_snapshot(3), make_event(4), make_event(5)],
    )
    .await;

    store
        .truncate_older_than(0, Some(at(4, 0)))
        .await
        .expect("truncate should succeed");

    assert_eq!(versions(&history(store, &id).await), vec![5, 4, 3]);
}

pub async fn test_truncate_keeps_index_plus_one_snapshots<S: AggregateStore<String>>(store: &S) {
    let id = new_id("snapshots");
    write_all(
        store,
        &id,
        vec![
            make_event(1),
            make_snapshot(2),
            make_event(3),
            make_snapshot(4),
            make_event(5),
            make_snapshot(6),
            make_event(7),
        ],
    )
    .await;

    store.truncate(1).await.expect("truncate should succeed");

    let records = history(store, &id).await;
    assert_eq!(versions(&records), vec![7, 6, 5, 4]);
    assert_eq!(records.iter().filter(|r| r.is_snapshot()).count(), 2);
}

pub async fn test_truncate_with_fewer_snapshots_keeps_all_of_them<S: AggregateStore<String>>(
    store: &S,
) {
    let id = new_id("few");
    write_all(
        store,
        &id,
        vec![make_event(1), make_snapshot(2), make_event(3)],
    )
    .await;

    store.truncate(5).await.expect("truncate should succeed");

    assert_eq!(versions(&history(store, &id).await), vec![3, 2]);
}

pub async fn test_truncate_without_snapshots_keeps_everything<S: AggregateStore<String>>(
    store: &S,
) {
    let id = new_id("nosnap");
    write_all(store, &id, vec![make_event(1), make_event(2), make_event(3)]).await;

    store.truncate(0).await.expect("truncate should succeed");

    assert_eq!(versions(&history(store, &id).await), vec![3, 2, 1]);
}

pub async fn test_truncate_cutoff_compares_nanos<S: AggregateStore<String>>(store: &S) {
    let id = new_id("nanos");
    write_all(
        store,
        &id,
        vec![
            EventRecord::event(payload(1), 1, at(20, 100)),
            EventRecord::event(payload(2), 2, at(20, 200)),
            EventRecord::event(payload(3), 3, at(20, 300)),
            EventRecord::snapshot(payload(4), 4, at(21, 0)),
        ],
    )
    .await;

    store
        .truncate_older_than(0, Some(at(20, 200)))
        .await
        .expect("truncate should succeed");

    assert_eq!(versions(&history(store, &id).await), vec![4, 3, 2]);
}

pub async fn test_truncate_is_per_aggregate<S: AggregateStore<String>>(store: &S) {
    let first = new_id("per-agg-a");
    let second = new_id("per-agg-b");
    write_all(
        store,
        &first,
        vec![make_event(1), make_snapshot(2), make_event(3)],
    )
    .await;
    write_all(
        store,
        &second,
        vec![make_event(1), make_event(2), make_event(3), make_snapshot(4)],
    )
    .await;

    let deleted = store.truncate(0).await.expect("truncate should succeed");

    assert!(deleted >= 4);
    assert_eq!(versions(&history(store, &first).await), vec![3, 2]);
    assert_eq!(versions(&history(store, &second).await), vec![4]);
}

// =============================================================================
// distinct_aggregate_ids tests
// =============================================================================

pub async fn test_distinct_aggregate_ids<S: AggregateStore<String>>(store: &S) {
    let first = new_id("ids-a");
    let second = new_id("ids-b");
    write_all(store, &first, vec![make_event(1), make_event(2)]).await;
    write_all(store, &second, vec![make_event(1)]).await;

    let ids = store
        .distinct_aggregate_ids()
        .await
        .expect("distinct_aggregate_ids should succeed")
        .collect_remaining()
        .await
        .expect("ids should be readable");

    assert_eq!(ids.iter().filter(|id| **id == first).count(), 1);
    assert_eq!(ids.iter().filter(|id| **id == second).count(), 1);
}

// =============================================================================
// lifecycle flags tests
// =============================================================================

pub async fn test_lifecycle_flags_absent<S: AggregateStore<String>>(store: &S) {
    let id = new_id("flags-none");

    let flags = store
        .read_lifecycle_flags(&id)
        .await
        .expect("read_lifecycle_flags should succeed");
    assert!(flags.is_none());
}

pub async fn test_lifecycle_flags_write_and_overwrite<S: AggregateStore<String>>(store: &S) {
    let id = new_id("flags");
    let archived = LifecycleFlags {
        archived: true,
        deleted: false,
    };
    let deleted = LifecycleFlags {
        archived: false,
        deleted: true,
    };

    store
        .write_lifecycle_flags(&id, &archived)
        .await
        .expect("first write should succeed");
    assert_eq!(store.read_lifecycle_flags(&id).await.unwrap(), Some(archived));

    store
        .write_lifecycle_flags(&id, &deleted)
        .await
        .expect("second write should succeed");
    assert_eq!(store.read_lifecycle_flags(&id).await.unwrap(), Some(deleted));
}

pub async fn test_lifecycle_flags_are_independent_of_history<S: AggregateStore<String>>(
    store: &S,
) {
    let id = new_id("flags-history");
    write_all(store, &id, vec![make_event(1)]).await;

    assert!(store.read_lifecycle_flags(&id).await.unwrap().is_none());
    store
        .write_lifecycle_flags(&id, &LifecycleFlags::default())
        .await
        .unwrap();

    let flags = store.read_lifecycle_flags(&id).await.unwrap().unwrap();
    assert!(flags.is_active());
    assert_eq!(history(store, &id).await.len(), 1);
}

// =============================================================================
// event count tests
// =============================================================================

pub async fn test_event_count_defaults_to_zero<S: AggregateStore<String>>(store: &S) {
    let id = new_id("count-none");

    let count = store
        .read_event_count_after_last_snapshot(&id)
        .await
        .expect("read should succeed");
    assert_eq!(count, 0);
}

pub async fn test_event_count_write_and_overwrite<S: AggregateStore<String>>(store: &S) {
    let id = new_id("count");

    for count in [1, 5, 0, 42] {
        store
            .write_event_count_after_last_snapshot(&id, count)
            .await
            .expect("write should succeed");
        assert_eq!(
            store.read_event_count_after_last_snapshot(&id).await.unwrap(),
            count
        );
    }
}

// =============================================================================
// isolation tests
// =============================================================================

pub async fn test_aggregate_isolation<S: AggregateStore<String>>(store: &S) {
    let first = new_id("iso-a");
    let second = new_id("iso-b");

    write_all(store, &first, vec![make_event(1), make_event(2)]).await;
    write_all(store, &second, vec![make_event(10)]).await;
    store
        .write_event_count_after_last_snapshot(&first, 2)
        .await
        .unwrap();

    assert_eq!(versions(&history(store, &first).await), vec![2, 1]);
    assert_eq!(versions(&history(store, &second).await), vec![10]);
    assert_eq!(
        store.read_event_count_after_last_snapshot(&second).await.unwrap(),
        0
    );
}

// =============================================================================
// identifier tests
// =============================================================================

/// Writes and reads back under `id`, for any identifier type.
pub async fn test_identifier_roundtrip<I, S>(store: &S, id: I)
where
    I: EntityId + PartialEq,
    S: AggregateStore<I>,
{
    store
        .write_record(&id, &make_snapshot(1))
        .await
        .expect("write_record should succeed");
    store
        .write_record(&id, &make_event(2))
        .await
        .expect("write_record should succeed");
    store
        .write_lifecycle_flags(
            &id,
            &LifecycleFlags {
                archived: true,
                deleted: false,
            },
        )
        .await
        .expect("write_lifecycle_flags should succeed");
    store
        .write_event_count_after_last_snapshot(&id, 1)
        .await
        .expect("write count should succeed");

    assert_eq!(versions(&history(store, &id).await), vec![2, 1]);
    assert!(store.read_lifecycle_flags(&id).await.unwrap().unwrap().archived);
    assert_eq!(
        store.read_event_count_after_last_snapshot(&id).await.unwrap(),
        1
    );

    let ids = store
        .distinct_aggregate_ids()
        .await
        .expect("distinct_aggregate_ids should succeed")
        .collect_remaining()
        .await
        .expect("ids should be readable");
    assert!(ids.contains(&id), "index should decode {:?} back", id);
}

/// Run all AggregateStore contract tests against a store implementation.
#[macro_export]
macro_rules! run_aggregate_storage_tests {
    ($store:expr) => {
        use $crate::storage::aggregate_storage_tests::*;

        // write / history tests
        test_history_of_unknown_aggregate_is_empty($store).await;
        println!("  test_history_of_unknown_aggregate_is_empty: PASSED");

        test_write_record_appends($store).await;
        println!("  test_write_record_appends: PASSED");

        test_history_preserves_payload($store).await;
        println!("  test_history_preserves_payload: PASSED");

        test_history_is_newest_first($store).await;
        println!("  test_history_is_newest_first: PASSED");

        test_equal_versions_order_by_timestamp($store).await;
        println!("  test_equal_versions_order_by_timestamp: PASSED");

        test_history_cursor_steps_one_row_at_a_time($store).await;
        println!("  test_history_cursor_steps_one_row_at_a_time: PASSED");

        test_history_cursor_closes_early($store).await;
        println!("  test_history_cursor_closes_early: PASSED");

        // truncate tests
        test_truncate_keeps_latest_snapshot($store).await;
        println!("  test_truncate_keeps_latest_snapshot: PASSED");

        test_truncate_with_cutoff_widens_window($store).await;
        println!("  test_truncate_with_cutoff_widens_window: PASSED");

        test_truncate_with_older_cutoff_keeps_snapshot_window($store).await;
        println!("  test_truncate_with_older_cutoff_keeps_snapshot_window: PASSED");

        test_truncate_keeps_index_plus_one_snapshots($store).await;
        println!("  test_truncate_keeps_index_plus_one_snapshots: PASSED");

        test_truncate_with_fewer_snapshots_keeps_all_of_them($store).await;
        println!("  test_truncate_with_fewer_snapshots_keeps_all_of_them: PASSED");

        test_truncate_without_snapshots_keeps_everything($store).await;
        println!("  test_truncate_without_snapshots_keeps_everything: PASSED");

        test_truncate_cutoff_compares_nanos($store).await;
        println!("  test_truncate_cutoff_compares_nanos: PASSED");

        test_truncate_is_per_aggregate($store).await;
        println!("  test_truncate_is_per_aggregate: PASSED");

        // index tests
        test_distinct_aggregate_ids($store).await;
        println!("  test_distinct_aggregate_ids: PASSED");

        // lifecycle flags tests
        test_lifecycle_flags_absent($store).await;
        println!("  test_lifecycle_flags_absent: PASSED");

        test_lifecycle_flags_write_and_overwrite($store).await;
        println!("  test_lifecycle_flags_write_and_overwrite: PASSED");

        test_lifecycle_flags_are_independent_of_history($store).await;
        println!("  test_lifecycle_flags_are_independent_of_history: PASSED");

        // event count tests
        test_event_count_defaults_to_zero($store).await;
        println!("  test_event_count_defaults_to_zero: PASSED");

        test_event_count_write_and_overwrite($store).await;
        println!("  test_event_count_write_and_overwrite: PASSED");

        // isolation tests
        test_aggregate_isolation($store).await;
        println!("  test_aggregate_isolation: PASSED");
    };
}
