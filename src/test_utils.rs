//! Sample aggregate for tests.
//!
//! `NameAggregate` holds a single optional name changed by `NameChanged`
//! events, encoded as JSON.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, AggregateError, AggregateState, SnapshotPolicy};

/// Events of the sample aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NameEvent {
    NameChanged { name: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct NameSnapshot {
    name: Option<String>,
}

/// Snapshot decision used by the sample aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SnapshotMode {
    Policy(SnapshotPolicy),
    Always,
    Never,
}

/// Aggregate holding a name.
#[derive(Debug)]
pub struct NameAggregate {
    state: AggregateState,
    name: Option<String>,
    snapshot_mode: SnapshotMode,
    read_snapshots: bool,
    snapshot_loaded: bool,
    commits_replayed: usize,
}

impl NameAggregate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            state: AggregateState::new(id),
            name: None,
            snapshot_mode: SnapshotMode::Policy(SnapshotPolicy::default()),
            read_snapshots: true,
            snapshot_loaded: false,
            commits_replayed: 0,
        }
    }

    pub fn with_snapshot_mode(mut self, mode: SnapshotMode) -> Self {
        self.snapshot_mode = mode;
        self
    }

    pub fn without_snapshot_reads(mut self) -> Self {
        self.read_snapshots = false;
        self
    }

    pub fn set_snapshot_mode(&mut self, mode: SnapshotMode) {
        self.snapshot_mode = mode;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn snapshot_loaded(&self) -> bool {
        self.snapshot_loaded
    }

    /// Commits applied by the last load.
    pub fn commits_replayed(&self) -> usize {
        self.commits_replayed
    }

    /// Change the name, buffering a `NameChanged` event.
    pub fn change_name(&mut self, name: impl Into<String>) -> Result<(), AggregateError> {
        let event = NameEvent::NameChanged { name: name.into() };
        let encoded = serde_json::to_vec(&event)?;
        self.apply(event);
        self.state.record(encoded);
        Ok(())
    }

    fn apply(&mut self, event: NameEvent) {
        match event {
            NameEvent::NameChanged { name } => self.name = Some(name),
        }
    }
}

impl Aggregate for NameAggregate {
    fn state(&self) -> &AggregateState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AggregateState {
        &mut self.state
    }

    fn should_read_snapshot(&self) -> bool {
        self.read_snapshots
    }

    fn load_snapshot(&mut self, snapshot: Bytes) -> Result<(), AggregateError> {
        let snapshot: NameSnapshot = serde_json::from_slice(&snapshot)?;
        self.name = snapshot.name;
        self.snapshot_loaded = true;
        Ok(())
    }

    fn load_events(&mut self, events: Vec<Bytes>) -> Result<(), AggregateError> {
        for event in events {
            let event: NameEvent = serde_json::from_slice(&event)?;
            self.apply(event);
        }
        self.commits_replayed += 1;
        Ok(())
    }

    fn snapshot_policy(&self) -> SnapshotPolicy {
        match self.snapshot_mode {
            SnapshotMode::Policy(policy) => policy,
            SnapshotMode::Always => SnapshotPolicy::with_threshold(f64::NEG_INFINITY),
            SnapshotMode::Never => SnapshotPolicy::never(),
        }
    }

    fn create_snapshot(&self) -> Result<Bytes, AggregateError> {
        let snapshot = NameSnapshot {
            name: self.name.clone(),
        };
        Ok(Bytes::from(serde_json::to_vec(&snapshot)?))
    }
}
