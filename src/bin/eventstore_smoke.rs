//! eventstore-smoke: round trip against DynamoDB
//!
//! Loads a counter aggregate, increments it, saves it and reloads it to
//! check that the new version is visible. Useful for checking table setup
//! and credentials against DynamoDB Local or a real account.
//!
//! ## Configuration
//! - `eventstore.yaml`, `EVENTSTORE_CONFIG` and `EVENTSTORE__*` variables,
//!   e.g. `EVENTSTORE__DYNAMO__ENDPOINT_URL=http://localhost:8000`
//! - EVENTSTORE_LOG: tracing filter (default: info)
//!
//! ## Usage
//! ```text
//! eventstore-smoke [aggregate-id]
//! ```

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use dynamo_eventstore::utils::bootstrap::init_tracing;
use dynamo_eventstore::{
    Aggregate, AggregateError, AggregateState, DynamoStoreClient, EventStore, EventStoreConfig,
};

const DEFAULT_AGGREGATE_ID: &str = "eventstore-smoke";

#[derive(Debug, Serialize, Deserialize)]
struct Incremented {
    by: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CounterSnapshot {
    total: u64,
}

/// Aggregate counting increments.
struct Counter {
    state: AggregateState,
    total: u64,
}

impl Counter {
    fn new(id: &str) -> Self {
        Self {
            state: AggregateState::new(id),
            total: 0,
        }
    }

    fn increment(&mut self, by: u64) -> Result<(), AggregateError> {
        let encoded = serde_json::to_vec(&Incremented { by })?;
        self.total += by;
        self.state.record(encoded);
        Ok(())
    }
}

impl Aggregate for Counter {
    fn state(&self) -> &AggregateState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AggregateState {
        &mut self.state
    }

    fn load_snapshot(&mut self, snapshot: Bytes) -> Result<(), AggregateError> {
        let snapshot: CounterSnapshot = serde_json::from_slice(&snapshot)?;
        self.total = snapshot.total;
        Ok(())
    }

    fn load_events(&mut self, events: Vec<Bytes>) -> Result<(), AggregateError> {
        for event in events {
            let event: Incremented = serde_json::from_slice(&event)?;
            self.total += event.by;
        }
        Ok(())
    }

    fn create_snapshot(&self) -> Result<Bytes, AggregateError> {
        let snapshot = CounterSnapshot { total: self.total };
        Ok(Bytes::from(serde_json::to_vec(&snapshot)?))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let aggregate_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_AGGREGATE_ID.to_string());

    let config = EventStoreConfig::load(None)?;
    info!(
        table = %config.table_name,
        aggregate_id = %aggregate_id,
        "eventstore-smoke starting"
    );

    let client = DynamoStoreClient::connect(&config.dynamo).await;
    let store = EventStore::new(Arc::new(client), config)?;

    let mut counter = Counter::new(&aggregate_id);
    store.load(&mut counter).await?;
    let loaded_version = counter.state().version();
    info!(version = loaded_version, total = counter.total, "Loaded counter");

    counter.increment(1)?;
    if let Err(e) = store.save(&mut counter).await {
        if !e.is_commit_durable() {
            error!(error = %e, "Save failed");
            return Err(e.into());
        }
        info!(error = %e, "Committed without snapshot");
    }

    let mut reloaded = Counter::new(&aggregate_id);
    store.load(&mut reloaded).await?;
    info!(
        version = reloaded.state().version(),
        total = reloaded.total,
        "Reloaded counter"
    );

    if reloaded.state().version() <= loaded_version {
        error!("Reloaded version did not advance");
        return Err("reloaded version did not advance".into());
    }

    info!("eventstore-smoke passed");
    Ok(())
}
