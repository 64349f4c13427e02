//! Event store errors.

use crate::aggregate::AggregateError;
use crate::config::ConfigError;
use crate::storage::StoreError;

/// Errors returned by [`EventStore`](crate::EventStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Another writer already committed this version. Reload and retry.
    #[error("Concurrency conflict: aggregate {id} already has version {version}")]
    ConcurrencyConflict { id: String, version: u64 },

    /// Events were committed but a newer or equal snapshot already exists.
    #[error("Snapshot write skipped for aggregate {id} at version {version}")]
    SnapshotWriteSkipped { id: String, version: u64 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A hook rejected a stored payload.
    #[error("Failed to load aggregate {id} at version {version}: {source}")]
    Deserialization {
        id: String,
        version: u64,
        #[source]
        source: AggregateError,
    },

    /// The store failed the snapshot write after the commit was written.
    #[error("Snapshot write failed for aggregate {id} at version {version}: {source}")]
    SnapshotWriteFailed {
        id: String,
        version: u64,
        #[source]
        source: StoreError,
    },

    /// `create_snapshot` failed after the commit was written.
    #[error("Failed to serialize snapshot of aggregate {id}: {source}")]
    Serialization {
        id: String,
        #[source]
        source: AggregateError,
    },

    /// A stored item lacks a field the protocol requires.
    #[error("Corrupt item for aggregate {id} at sort key {sort_key}: {reason}")]
    CorruptItem {
        id: String,
        sort_key: u64,
        reason: String,
    },

    #[error("Aggregate {id} already holds state at version {version}; load a fresh instance")]
    AlreadyLoaded { id: String, version: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    /// Cancelled after the commit was written; the snapshot was not attempted.
    #[error("Cancelled after committing aggregate {id} at version {version}")]
    SnapshotCancelled { id: String, version: u64 },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EventStoreError {
    /// True for optimistic concurrency conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }

    /// True when the error was raised after the events were committed, so the
    /// save must not be retried.
    pub fn is_commit_durable(&self) -> bool {
        matches!(
            self,
            EventStoreError::SnapshotWriteSkipped { .. }
                | EventStoreError::SnapshotWriteFailed { .. }
                | EventStoreError::Serialization { .. }
                | EventStoreError::SnapshotCancelled { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EventStoreError>;
