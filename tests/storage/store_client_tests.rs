//! StoreClient interface tests.
//!
//! These tests verify the contract the event store relies on: point reads,
//! ascending paged partition queries and atomic conditional writes.

use bytes::Bytes;

use dynamo_eventstore::storage::{
    AttributeValue, Consistency, Item, ItemKey, Precondition, PutOutcome, StoreClient,
    TableSchema, PAYLOAD_ATTRIBUTE, VERSION_ATTRIBUTE,
};

use super::unique_id;

fn commit(events: &[&'static [u8]]) -> Item {
    Item::from([(
        PAYLOAD_ATTRIBUTE.to_string(),
        AttributeValue::BinaryList(events.iter().map(|e| Bytes::from_static(*e)).collect()),
    )])
}

fn snapshot(version: u64) -> Item {
    Item::from([
        (
            PAYLOAD_ATTRIBUTE.to_string(),
            AttributeValue::Binary(Bytes::from(format!("state@{}", version))),
        ),
        (
            VERSION_ATTRIBUTE.to_string(),
            AttributeValue::Number(version),
        ),
    ])
}

/// Write commits 1..=count for `id`.
async fn seed_commits(client: &dyn StoreClient, table: TableSchema<'_>, id: &str, count: u64) {
    for version in 1..=count {
        let outcome = client
            .conditional_put(
                table,
                &ItemKey::new(id, version),
                commit(&[b"event"]),
                Precondition::ItemAbsent,
            )
            .await
            .expect("seed put should succeed");
        assert_eq!(outcome, PutOutcome::Written);
    }
}

async fn put_snapshot(
    client: &dyn StoreClient,
    table: TableSchema<'_>,
    key: &ItemKey,
    version: u64,
) -> PutOutcome {
    let precondition = Precondition::AttributeAbsentOrBelow {
        attribute: VERSION_ATTRIBUTE.to_string(),
        value: version,
    };
    client
        .conditional_put(table, key, snapshot(version), precondition)
        .await
        .expect("snapshot put should reach the store")
}

// =============================================================================
// get_item tests
// =============================================================================

pub async fn test_get_absent_item(client: &dyn StoreClient, table: TableSchema<'_>) {
    let id = unique_id("get_absent");

    let item = client
        .get_item(table, &ItemKey::snapshot(&id), Consistency::Strong)
        .await
        .expect("get should succeed");
    assert!(item.is_none(), "absent item should read as None");
}

pub async fn test_get_returns_attributes(client: &dyn StoreClient, table: TableSchema<'_>) {
    let id = unique_id("get_attrs");
    client
        .conditional_put(
            table,
            &ItemKey::snapshot(&id),
            snapshot(7),
            Precondition::ItemAbsent,
        )
        .await
        .expect("put should succeed");

    let item = client
        .get_item(table, &ItemKey::snapshot(&id), Consistency::Strong)
        .await
        .expect("get should succeed")
        .expect("item should exist");

    assert_eq!(item.get(VERSION_ATTRIBUTE), Some(&AttributeValue::Number(7)));
    assert_eq!(
        item.get(PAYLOAD_ATTRIBUTE),
        Some(&AttributeValue::Binary(Bytes::from_static(b"state@7")))
    );
    assert!(
        !item.contains_key(table.partition_key),
        "key attributes should not be returned as payload"
    );
}

// =============================================================================
// query tests
// =============================================================================

pub async fn test_query_empty_partition(client: &dyn StoreClient, table: TableSchema<'_>) {
    let id = unique_id("query_empty");

    let page = client
        .query(table, &id, Some(0), Consistency::Strong)
        .await
        .expect("query should succeed");
    assert!(page.items.is_empty());
    assert!(page.last_evaluated.is_none());
}

pub async fn test_query_is_ascending_and_exclusive(
    client: &dyn StoreClient,
    table: TableSchema<'_>,
) {
    let id = unique_id("query_order");
    seed_commits(client, table, &id, 4).await;
    client
        .conditional_put(
            table,
            &ItemKey::snapshot(&id),
            snapshot(2),
            Precondition::ItemAbsent,
        )
        .await
        .expect("snapshot put should succeed");

    let page = client
        .query(table, &id, Some(0), Consistency::Strong)
        .await
        .expect("query should succeed");
    let keys: Vec<u64> = page.items.iter().map(|item| item.sort_key).collect();
    assert_eq!(keys, vec![1, 2, 3, 4], "cursor 0 should skip the snapshot");

    let page = client
        .query(table, &id, Some(2), Consistency::Strong)
        .await
        .expect("query should succeed");
    let keys: Vec<u64> = page.items.iter().map(|item| item.sort_key).collect();
    assert_eq!(keys, vec![3, 4], "cursor should be exclusive");

    let page = client
        .query(table, &id, None, Consistency::Strong)
        .await
        .expect("query should succeed");
    assert_eq!(page.items.first().map(|item| item.sort_key), Some(0));
}

pub async fn test_query_follows_resume_keys(client: &dyn StoreClient, table: TableSchema<'_>) {
    let id = unique_id("query_paging");
    seed_commits(client, table, &id, 6).await;

    let mut cursor = 0;
    let mut keys = Vec::new();
    loop {
        let page = client
            .query(table, &id, Some(cursor), Consistency::Strong)
            .await
            .expect("query should succeed");
        keys.extend(page.items.iter().map(|item| item.sort_key));
        match page.last_evaluated {
            Some(next) => cursor = next,
            None => break,
        }
    }

    assert_eq!(keys, vec![1, 2, 3, 4, 5, 6]);
}

pub async fn test_query_preserves_event_order(client: &dyn StoreClient, table: TableSchema<'_>) {
    let id = unique_id("query_payload");
    client
        .conditional_put(
            table,
            &ItemKey::new(&id, 1),
            commit(&[b"second", b"first", b"second"]),
            Precondition::ItemAbsent,
        )
        .await
        .expect("put should succeed");

    let page = client
        .query(table, &id, Some(0), Consistency::Strong)
        .await
        .expect("query should succeed");
    assert_eq!(page.items.len(), 1);

    let events = page.items[0]
        .attributes
        .get(PAYLOAD_ATTRIBUTE)
        .and_then(AttributeValue::as_binary_list)
        .expect("commit should carry an event list");
    assert_eq!(
        events,
        &[
            Bytes::from_static(b"second"),
            Bytes::from_static(b"first"),
            Bytes::from_static(b"second"),
        ]
    );
}

pub async fn test_query_reports_read_cost(client: &dyn StoreClient, table: TableSchema<'_>) {
    let id = unique_id("query_cost");
    seed_commits(client, table, &id, 2).await;

    let strong = client
        .query(table, &id, Some(0), Consistency::Strong)
        .await
        .expect("query should succeed");
    let eventual = client
        .query(table, &id, Some(0), Consistency::Eventual)
        .await
        .expect("query should succeed");

    assert!(strong.consumed_capacity > 0.0, "reads should cost capacity");
    assert!(
        eventual.consumed_capacity <= strong.consumed_capacity,
        "eventual reads should not cost more than strong reads"
    );
}

// =============================================================================
// conditional_put tests
// =============================================================================

pub async fn test_item_absent_admits_one_writer(client: &dyn StoreClient, table: TableSchema<'_>) {
    let id = unique_id("put_absent");
    let key = ItemKey::new(&id, 1);

    let first = client
        .conditional_put(table, &key, commit(&[b"first"]), Precondition::ItemAbsent)
        .await
        .expect("put should succeed");
    let second = client
        .conditional_put(table, &key, commit(&[b"second"]), Precondition::ItemAbsent)
        .await
        .expect("put should reach the store");

    assert_eq!(first, PutOutcome::Written);
    assert_eq!(second, PutOutcome::PreconditionFailed);

    let page = client
        .query(table, &id, Some(0), Consistency::Strong)
        .await
        .expect("query should succeed");
    assert_eq!(
        page.items[0].attributes.get(PAYLOAD_ATTRIBUTE),
        Some(&AttributeValue::BinaryList(vec![Bytes::from_static(b"first")])),
        "losing writer must not change the item"
    );
}

pub async fn test_version_precondition_is_monotonic(
    client: &dyn StoreClient,
    table: TableSchema<'_>,
) {
    let id = unique_id("put_version");
    let key = ItemKey::snapshot(&id);

    let put = |version| put_snapshot(client, table, &key, version);

    assert_eq!(put(3).await, PutOutcome::Written, "absent");
    assert_eq!(put(5).await, PutOutcome::Written, "newer");
    assert_eq!(put(5).await, PutOutcome::PreconditionFailed, "equal");
    assert_eq!(put(4).await, PutOutcome::PreconditionFailed, "older");

    let item = client
        .get_item(table, &key, Consistency::Strong)
        .await
        .expect("get should succeed")
        .expect("snapshot should exist");
    assert_eq!(item.get(VERSION_ATTRIBUTE), Some(&AttributeValue::Number(5)));
}

pub async fn test_partitions_are_isolated(client: &dyn StoreClient, table: TableSchema<'_>) {
    let a = unique_id("isolation_a");
    let b = unique_id("isolation_b");
    seed_commits(client, table, &a, 3).await;
    seed_commits(client, table, &b, 1).await;

    let page = client
        .query(table, &b, Some(0), Consistency::Strong)
        .await
        .expect("query should succeed");
    assert_eq!(page.items.len(), 1);
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all StoreClient interface tests against a store implementation.
#[macro_export]
macro_rules! run_store_client_tests {
    ($client:expr, $table:expr) => {
        use $crate::storage::store_client_tests::*;

        // get_item tests
        test_get_absent_item($client, $table).await;
        println!("  test_get_absent_item: PASSED");

        test_get_returns_attributes($client, $table).await;
        println!("  test_get_returns_attributes: PASSED");

        // query tests
        test_query_empty_partition($client, $table).await;
        println!("  test_query_empty_partition: PASSED");

        test_query_is_ascending_and_exclusive($client, $table).await;
        println!("  test_query_is_ascending_and_exclusive: PASSED");

        test_query_follows_resume_keys($client, $table).await;
        println!("  test_query_follows_resume_keys: PASSED");

        test_query_preserves_event_order($client, $table).await;
        println!("  test_query_preserves_event_order: PASSED");

        test_query_reports_read_cost($client, $table).await;
        println!("  test_query_reports_read_cost: PASSED");

        // conditional_put tests
        test_item_absent_admits_one_writer($client, $table).await;
        println!("  test_item_absent_admits_one_writer: PASSED");

        test_version_precondition_is_monotonic($client, $table).await;
        println!("  test_version_precondition_is_monotonic: PASSED");

        test_partitions_are_isolated($client, $table).await;
        println!("  test_partitions_are_isolated: PASSED");
    };
}
