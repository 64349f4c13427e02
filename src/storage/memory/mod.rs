//! In-memory store client.
//!
//! Keeps items in a sorted map and mimics the DynamoDB behaviours the event
//! store relies on: ascending partition queries split into pages, read cost
//! reported per page in 4 KiB units (halved for eventually consistent reads),
//! and conditional writes evaluated atomically with the write.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    AttributeValue, Consistency, Item, ItemKey, PutOutcome, Precondition, QueryPage, Result,
    StoreClient, StoreError, StoredItem, TableSchema,
};


/// Size of one read capacity unit.
const READ_UNIT_BYTES: usize = 4096;
/// Items returned per query page unless overridden.
const DEFAULT_PAGE_SIZE: usize = 100;

/// (table, partition, sort)
type StoreKey = (String, String, u64);

/// Store client that keeps items in memory.
#[derive(Debug)]
pub struct InMemoryStore {
    items: RwLock<BTreeMap<StoreKey, Item>>,
    page_size: usize,
    fail_on_get: RwLock<bool>,
    fail_on_query: RwLock<bool>,
    fail_on_put: RwLock<bool>,
    reads: AtomicUsize,
    queries: AtomicUsize,
    writes: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            fail_on_get: RwLock::new(false),
            fail_on_query: RwLock::new(false),
            fail_on_put: RwLock::new(false),
            reads: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Limit the number of items returned per query page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn set_fail_on_get(&self, fail: bool) {
        *self.fail_on_get.write().await = fail;
    }

    pub async fn set_fail_on_query(&self, fail: bool) {
        *self.fail_on_query.write().await = fail;
    }

    pub async fn set_fail_on_put(&self, fail: bool) {
        *self.fail_on_put.write().await = fail;
    }

    /// Number of `get_item` calls served.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of query pages served.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of conditional writes that changed the store.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Inspect a stored item.
    pub async fn item(&self, table: &str, key: &ItemKey) -> Option<Item> {
        self.items
            .read()
            .await
            .get(&store_key(table, key))
            .cloned()
    }

    /// Number of items stored in a partition, snapshot included.
    pub async fn partition_len(&self, table: &str, partition: &str) -> usize {
        self.items
            .read()
            .await
            .range(partition_range(table, partition, None))
            .count()
    }

    /// Store an item unconditionally. Used to seed fixtures.
    pub async fn insert(&self, table: &str, key: &ItemKey, attributes: Item) {
        self.items
            .write()
            .await
            .insert(store_key(table, key), attributes);
    }
}

fn store_key(table: &str, key: &ItemKey) -> StoreKey {
    (table.to_string(), key.partition.clone(), key.sort)
}

fn partition_range(
    table: &str,
    partition: &str,
    exclusive_start: Option<u64>,
) -> (Bound<StoreKey>, Bound<StoreKey>) {
    let lower = match exclusive_start {
        Some(sort) => Bound::Excluded((table.to_string(), partition.to_string(), sort)),
        None => Bound::Included((table.to_string(), partition.to_string(), 0)),
    };
    let upper = Bound::Included((table.to_string(), partition.to_string(), u64::MAX));
    (lower, upper)
}

/// Approximate item size the way DynamoDB bills it: names plus values.
fn item_size(key: &StoreKey, item: &Item) -> usize {
    let attributes: usize = item
        .iter()
        .map(|(name, value)| name.len() + value.size())
        .sum();
    key.1.len() + 8 + attributes
}

/// Read cost of `bytes`, rounded up to whole units with a minimum of one.
fn read_cost(bytes: usize, consistency: Consistency) -> f64 {
    let units = bytes.div_ceil(READ_UNIT_BYTES).max(1) as f64;
    if consistency.is_strong() {
        units
    } else {
        units / 2.0
    }
}

fn precondition_holds(existing: Option<&Item>, precondition: &Precondition) -> bool {
    match precondition {
        Precondition::ItemAbsent => existing.is_none(),
        Precondition::AttributeAbsentOrBelow { attribute, value } => {
            match existing.and_then(|item| item.get(attribute)) {
                None => true,
                Some(AttributeValue::Number(stored)) => stored < value,
                // Comparing mismatched types never satisfies the condition
                Some(_) => false,
            }
        }
    }
}

#[async_trait]
impl StoreClient for InMemoryStore {
    async fn get_item(
        &self,
        table: TableSchema<'_>,
        key: &ItemKey,
        _consistency: Consistency,
    ) -> Result<Option<Item>> {
        if *self.fail_on_get.read().await {
            return Err(StoreError::unavailable("GetItem", "injected failure"));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);

        let items = self.items.read().await;
        Ok(items.get(&store_key(table.table_name, key)).cloned())
    }

    async fn query(
        &self,
        table: TableSchema<'_>,
        partition: &str,
        exclusive_start: Option<u64>,
        consistency: Consistency,
    ) -> Result<QueryPage> {
        if *self.fail_on_query.read().await {
            return Err(StoreError::unavailable("Query", "injected failure"));
        }
        self.queries.fetch_add(1, Ordering::SeqCst);

        let items = self.items.read().await;
        let mut page = QueryPage::default();
        let mut bytes = 0;

        for (key, item) in items
            .range(partition_range(table.table_name, partition, exclusive_start))
            .take(self.page_size)
        {
            bytes += item_size(key, item);
            page.items.push(StoredItem {
                sort_key: key.2,
                attributes: item.clone(),
            });
        }

        // Like DynamoDB, a full page always carries a resume key, even when
        // nothing follows it.
        if page.items.len() == self.page_size {
            page.last_evaluated = page.items.last().map(|item| item.sort_key);
        }
        page.consumed_capacity = read_cost(bytes, consistency);

        debug!(
            table = %table.table_name,
            partition = %partition,
            items = page.items.len(),
            consumed_capacity = page.consumed_capacity,
            "Served in-memory query page"
        );

        Ok(page)
    }

    async fn conditional_put(
        &self,
        table: TableSchema<'_>,
        key: &ItemKey,
        attributes: Item,
        precondition: Precondition,
    ) -> Result<PutOutcome> {
        if *self.fail_on_put.read().await {
            return Err(StoreError::unavailable("UpdateItem", "injected failure"));
        }

        let mut items = self.items.write().await;
        let store_key = store_key(table.table_name, key);

        if !precondition_holds(items.get(&store_key), &precondition) {
            return Ok(PutOutcome::PreconditionFailed);
        }

        items.entry(store_key).or_default().extend(attributes);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(PutOutcome::Written)
    }
}
