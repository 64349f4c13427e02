//! Store client abstraction.
//!
//! The event store only needs three capabilities from the underlying sorted
//! key-value store: a point read, an ascending range query over one partition,
//! and a conditional write. Items are addressed by `(partition, sort)` where
//! the sort key is a version number.
//!
//! Persisted layout:
//! - Commit: `{ PK: aggregate_id, SK: version, P: [event, ...] }`
//! - Snapshot: `{ PK: aggregate_id, SK: 0, P: blob, V: version }`
//!
//! Implementations:
//! - `InMemoryStore`: in-process sorted map, used for tests and local runs
//! - `DynamoStoreClient`: AWS DynamoDB (feature `dynamo`)

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

pub mod memory;

#[cfg(feature = "dynamo")]
pub mod dynamo;

pub use memory::InMemoryStore;

#[cfg(feature = "dynamo")]
pub use dynamo::DynamoStoreClient;

/// Attribute holding a commit's events or a snapshot's blob.
pub const PAYLOAD_ATTRIBUTE: &str = "P";
/// Attribute holding the version a snapshot was taken at.
pub const VERSION_ATTRIBUTE: &str = "V";
/// Reserved sort key of the snapshot item. Commit versions start at 1.
pub const SNAPSHOT_SORT_KEY: u64 = 0;

/// Errors raised by a store client.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{operation} failed: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },

    #[error("malformed item: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn unavailable(operation: &'static str, err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable {
            operation,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Read consistency requested from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Strong,
    Eventual,
}

impl Consistency {
    pub fn is_strong(self) -> bool {
        self == Consistency::Strong
    }
}

/// Table and key field names, borrowed from the event store configuration.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema<'a> {
    pub table_name: &'a str,
    pub partition_key: &'a str,
    pub sort_key: &'a str,
}

/// Primary key of an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub partition: String,
    pub sort: u64,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: u64) -> Self {
        Self {
            partition: partition.into(),
            sort,
        }
    }

    /// Key of the snapshot item for an aggregate.
    pub fn snapshot(partition: impl Into<String>) -> Self {
        Self::new(partition, SNAPSHOT_SORT_KEY)
    }
}

/// Non-key attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Binary(Bytes),
    /// Ordered list of binaries. Order is preserved on write and read.
    BinaryList(Vec<Bytes>),
    Number(u64),
}

impl AttributeValue {
    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            AttributeValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_binary_list(&self) -> Option<&[Bytes]> {
        match self {
            AttributeValue::BinaryList(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<u64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Approximate stored size in bytes, used for read cost accounting.
    pub fn size(&self) -> usize {
        match self {
            AttributeValue::Binary(b) => b.len(),
            AttributeValue::BinaryList(list) => 3 + list.iter().map(|b| b.len() + 1).sum::<usize>(),
            AttributeValue::Number(n) => n.to_string().len(),
        }
    }
}

/// Non-key attributes of an item.
pub type Item = HashMap<String, AttributeValue>;

/// An item returned by a query, with its sort key.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub sort_key: u64,
    pub attributes: Item,
}

/// One page of a partition query.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    /// Items in ascending sort key order.
    pub items: Vec<StoredItem>,
    /// Sort key to resume after, if more items remain.
    pub last_evaluated: Option<u64>,
    /// Read cost reported by the store for this page.
    pub consumed_capacity: f64,
}

/// Condition a write must satisfy against the currently stored item.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// No item exists at the key.
    ItemAbsent,
    /// The attribute is absent, or holds a number strictly below `value`.
    AttributeAbsentOrBelow { attribute: String, value: u64 },
}

/// Result of a conditional write that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    PreconditionFailed,
}

/// Interface to the sorted key-value store.
///
/// Implementations must return query items in ascending sort key order and
/// must evaluate the precondition of `conditional_put` atomically with the
/// write.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Read a single item. Returns `None` if absent.
    async fn get_item(
        &self,
        table: TableSchema<'_>,
        key: &ItemKey,
        consistency: Consistency,
    ) -> Result<Option<Item>>;

    /// Read one page of a partition, strictly after `exclusive_start`.
    async fn query(
        &self,
        table: TableSchema<'_>,
        partition: &str,
        exclusive_start: Option<u64>,
        consistency: Consistency,
    ) -> Result<QueryPage>;

    /// Set `attributes` on the item at `key` if `precondition` holds,
    /// creating the item if needed.
    async fn conditional_put(
        &self,
        table: TableSchema<'_>,
        key: &ItemKey,
        attributes: Item,
        precondition: Precondition,
    ) -> Result<PutOutcome>;
}
