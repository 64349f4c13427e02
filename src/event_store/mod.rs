//! Aggregate load/save protocol.
//!
//! Load reads the snapshot item (if any), then replays every commit after
//! the snapshot version page by page. Save writes the uncommitted buffer as
//! one commit at `version + 1` guarded by an item-absent precondition, then
//! writes a snapshot when the aggregate asks for one.
//!
//! All store calls are sequential. A cancellation signal is checked before
//! each call.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::aggregate::Aggregate;
use crate::config::EventStoreConfig;
use crate::error::{EventStoreError, Result};
use crate::storage::{
    AttributeValue, Item, ItemKey, Precondition, PutOutcome, StoreClient, StoredItem,
    PAYLOAD_ATTRIBUTE, SNAPSHOT_SORT_KEY, VERSION_ATTRIBUTE,
};


/// Persists aggregates as commits plus an optional snapshot.
pub struct EventStore {
    client: Arc<dyn StoreClient>,
    config: EventStoreConfig,
}

impl EventStore {
    /// Create an event store. Fails if the configuration is invalid.
    pub fn new(client: Arc<dyn StoreClient>, config: EventStoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    /// Hydrate a freshly constructed aggregate from its snapshot and commits.
    ///
    /// An aggregate with no stored data stays at version 0.
    #[instrument(skip_all, fields(aggregate_id = %aggregate.state().id()))]
    pub async fn load<A: Aggregate>(&self, aggregate: &mut A) -> Result<()> {
        self.load_inner(aggregate, None).await
    }

    /// Like [`load`](Self::load), aborting with `Cancelled` once `cancel`
    /// reads `true`.
    #[instrument(skip_all, fields(aggregate_id = %aggregate.state().id()))]
    pub async fn load_with_cancel<A: Aggregate>(
        &self,
        aggregate: &mut A,
        cancel: &watch::Receiver<bool>,
    ) -> Result<()> {
        self.load_inner(aggregate, Some(cancel)).await
    }

    /// Commit the uncommitted events as the next version.
    ///
    /// A no-op when nothing is buffered. Errors for which
    /// [`is_commit_durable`](EventStoreError::is_commit_durable) holds were
    /// raised after the commit succeeded, including a cancellation observed
    /// between the commit and the snapshot write.
    #[instrument(skip_all, fields(aggregate_id = %aggregate.state().id()))]
    pub async fn save<A: Aggregate>(&self, aggregate: &mut A) -> Result<()> {
        self.save_inner(aggregate, None).await
    }

    /// Like [`save`](Self::save), aborting with `Cancelled` once `cancel`
    /// reads `true`.
    #[instrument(skip_all, fields(aggregate_id = %aggregate.state().id()))]
    pub async fn save_with_cancel<A: Aggregate>(
        &self,
        aggregate: &mut A,
        cancel: &watch::Receiver<bool>,
    ) -> Result<()> {
        self.save_inner(aggregate, Some(cancel)).await
    }

    async fn load_inner<A: Aggregate>(
        &self,
        aggregate: &mut A,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<()> {
        let state = aggregate.state();
        if state.version() > 0 || state.has_uncommitted_events() {
            return Err(EventStoreError::AlreadyLoaded {
                id: state.id().to_string(),
                version: state.version(),
            });
        }

        let id = state.id().to_string();
        let table = self.config.table();
        let consistency = self.config.consistency();

        // Commit versions start above the snapshot sort key, so an empty
        // cursor still skips the snapshot item.
        let mut cursor = SNAPSHOT_SORT_KEY;

        if self.config.snapshots.read && aggregate.should_read_snapshot() {
            ensure_active(cancel)?;
            let snapshot = self
                .client
                .get_item(table, &ItemKey::snapshot(&id), consistency)
                .await?;

            if let Some(item) = snapshot {
                let (payload, version) = snapshot_fields(&id, item)?;
                aggregate
                    .load_snapshot(payload)
                    .map_err(|source| EventStoreError::Deserialization {
                        id: id.clone(),
                        version,
                        source,
                    })?;
                aggregate.state_mut().set_version(version);
                cursor = version;
                debug!(version, "Loaded snapshot");
            }
        }

        aggregate.state_mut().reset_read_cost();

        let mut commits = 0usize;
        loop {
            ensure_active(cancel)?;
            let page = self
                .client
                .query(table, &id, Some(cursor), consistency)
                .await?;

            aggregate.state_mut().add_read_cost(page.consumed_capacity);

            for item in page.items {
                if item.sort_key == SNAPSHOT_SORT_KEY {
                    continue;
                }
                let version = aggregate
                    .state()
                    .version()
                    .checked_add(1)
                    .ok_or_else(|| version_overflow(&id, item.sort_key))?;
                if item.sort_key != version {
                    warn!(
                        expected = version,
                        found = item.sort_key,
                        "Commit sort key does not follow the previous version"
                    );
                }

                let events = commit_events(&id, item)?;
                aggregate
                    .load_events(events)
                    .map_err(|source| EventStoreError::Deserialization {
                        id: id.clone(),
                        version,
                        source,
                    })?;
                aggregate.state_mut().set_version(version);
                commits += 1;
            }

            match page.last_evaluated {
                Some(next) => cursor = next,
                None => break,
            }
        }

        debug!(
            version = aggregate.state().version(),
            commits,
            read_cost = aggregate.state().read_cost_since_last_snapshot(),
            "Loaded aggregate"
        );
        Ok(())
    }

    async fn save_inner<A: Aggregate>(
        &self,
        aggregate: &mut A,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<()> {
        if !aggregate.state().has_uncommitted_events() {
            return Ok(());
        }
        ensure_active(cancel)?;

        let id = aggregate.state().id().to_string();
        let table = self.config.table();
        let new_version = aggregate
            .state()
            .version()
            .checked_add(1)
            .ok_or_else(|| version_overflow(&id, aggregate.state().version()))?;

        let events = aggregate.state_mut().take_uncommitted();
        let attributes = Item::from([(
            PAYLOAD_ATTRIBUTE.to_string(),
            AttributeValue::BinaryList(events.clone()),
        )]);

        let outcome = self
            .client
            .conditional_put(
                table,
                &ItemKey::new(&id, new_version),
                attributes,
                Precondition::ItemAbsent,
            )
            .await;

        match outcome {
            Ok(PutOutcome::Written) => {}
            Ok(PutOutcome::PreconditionFailed) => {
                aggregate.state_mut().restore_uncommitted(events);
                warn!(version = new_version, "Commit rejected: version already taken");
                return Err(EventStoreError::ConcurrencyConflict {
                    id,
                    version: new_version,
                });
            }
            Err(e) => {
                aggregate.state_mut().restore_uncommitted(events);
                return Err(e.into());
            }
        }

        aggregate.state_mut().set_version(new_version);
        debug!(version = new_version, events = events.len(), "Committed events");

        if self.config.snapshots.write && aggregate.should_create_snapshot() {
            if is_cancelled(cancel) {
                warn!(version = new_version, "Cancelled after commit; snapshot not written");
                return Err(EventStoreError::SnapshotCancelled {
                    id,
                    version: new_version,
                });
            }
            self.write_snapshot(aggregate, &id, new_version).await?;
        }

        Ok(())
    }

    async fn write_snapshot<A: Aggregate>(
        &self,
        aggregate: &mut A,
        id: &str,
        version: u64,
    ) -> Result<()> {
        let snapshot = aggregate
            .create_snapshot()
            .map_err(|source| EventStoreError::Serialization {
                id: id.to_string(),
                source,
            })?;

        let attributes = Item::from([
            (
                PAYLOAD_ATTRIBUTE.to_string(),
                AttributeValue::Binary(snapshot),
            ),
            (
                VERSION_ATTRIBUTE.to_string(),
                AttributeValue::Number(version),
            ),
        ]);
        let precondition = Precondition::AttributeAbsentOrBelow {
            attribute: VERSION_ATTRIBUTE.to_string(),
            value: version,
        };

        let outcome = self
            .client
            .conditional_put(
                self.config.table(),
                &ItemKey::snapshot(id),
                attributes,
                precondition,
            )
            .await
            .map_err(|source| EventStoreError::SnapshotWriteFailed {
                id: id.to_string(),
                version,
                source,
            })?;

        match outcome {
            PutOutcome::Written => {
                aggregate.state_mut().reset_read_cost();
                debug!(version, "Wrote snapshot");
                Ok(())
            }
            PutOutcome::PreconditionFailed => {
                warn!(version, "Snapshot skipped: a newer snapshot is stored");
                Err(EventStoreError::SnapshotWriteSkipped {
                    id: id.to_string(),
                    version,
                })
            }
        }
    }
}

fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.is_some_and(|rx| *rx.borrow())
}

fn ensure_active(cancel: Option<&watch::Receiver<bool>>) -> Result<()> {
    if is_cancelled(cancel) {
        return Err(EventStoreError::Cancelled);
    }
    Ok(())
}

fn version_overflow(id: &str, sort_key: u64) -> EventStoreError {
    EventStoreError::CorruptItem {
        id: id.to_string(),
        sort_key,
        reason: "version exceeds the maximum commit number".to_string(),
    }
}

fn snapshot_fields(id: &str, mut item: Item) -> Result<(Bytes, u64)> {
    let corrupt = |reason: &str| EventStoreError::CorruptItem {
        id: id.to_string(),
        sort_key: SNAPSHOT_SORT_KEY,
        reason: reason.to_string(),
    };

    let payload = match item.remove(PAYLOAD_ATTRIBUTE) {
        Some(AttributeValue::Binary(payload)) => payload,
        Some(_) => return Err(corrupt("snapshot payload is not binary")),
        None => return Err(corrupt("snapshot has no payload")),
    };
    let version = item
        .get(VERSION_ATTRIBUTE)
        .and_then(AttributeValue::as_number)
        .ok_or_else(|| corrupt("snapshot has no numeric version"))?;
    if version == u64::MAX {
        return Err(corrupt("snapshot version leaves no room for commits"));
    }

    Ok((payload, version))
}

fn commit_events(id: &str, mut item: StoredItem) -> Result<Vec<Bytes>> {
    match item.attributes.remove(PAYLOAD_ATTRIBUTE) {
        Some(AttributeValue::BinaryList(events)) => Ok(events),
        other => Err(EventStoreError::CorruptItem {
            id: id.to_string(),
            sort_key: item.sort_key,
            reason: if other.is_some() {
                "commit payload is not an event list".to_string()
            } else {
                "commit has no payload".to_string()
            },
        }),
    }
}
