//! dynamo-eventstore - event-sourced aggregate persistence
//!
//! Maps aggregates onto a sorted key-value store (DynamoDB in production)
//! as immutable commits plus an optional snapshot. Saves use optimistic
//! concurrency through conditional writes; snapshots are taken when replay
//! gets expensive.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod event_store;
pub mod storage;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use aggregate::{Aggregate, AggregateError, AggregateState, SnapshotPolicy};
pub use config::{ConfigError, EventStoreConfig, SnapshotsEnableConfig};
pub use error::{EventStoreError, Result};
pub use event_store::EventStore;
pub use storage::{InMemoryStore, StoreClient, StoreError};

#[cfg(feature = "dynamo")]
pub use storage::DynamoStoreClient;
