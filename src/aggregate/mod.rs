//! Aggregate contract.
//!
//! An aggregate is a consistency boundary whose state is derived from an
//! ordered history of commits. The event store drives hydration and flushing
//! through the [`Aggregate`] hooks and never looks at domain payloads.
//!
//! Bookkeeping lives in [`AggregateState`]. Application code can read it and
//! record new events; only the event store can move the version or the read
//! cost counter.

use bytes::Bytes;


/// Read cost above which the default policy asks for a snapshot.
pub const DEFAULT_SNAPSHOT_READ_COST_THRESHOLD: f64 = 3.0;

/// Errors raised by aggregate hooks while decoding or encoding payloads.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unknown event type: {0}")]
    UnknownEvent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence bookkeeping for one aggregate instance.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateState {
    id: String,
    version: u64,
    read_cost_since_last_snapshot: f64,
    uncommitted_events: Vec<Bytes>,
}

impl AggregateState {
    /// Fresh state at version 0.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            read_cost_since_last_snapshot: 0.0,
            uncommitted_events: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of commits applied so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Store-reported read cost accumulated since the last snapshot.
    pub fn read_cost_since_last_snapshot(&self) -> f64 {
        self.read_cost_since_last_snapshot
    }

    /// Events recorded since the last successful save, in order.
    pub fn uncommitted_events(&self) -> &[Bytes] {
        &self.uncommitted_events
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted_events.is_empty()
    }

    /// Buffer an encoded event for the next save.
    pub fn record(&mut self, event: impl Into<Bytes>) {
        self.uncommitted_events.push(event.into());
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub(crate) fn add_read_cost(&mut self, cost: f64) {
        self.read_cost_since_last_snapshot += cost;
    }

    pub(crate) fn reset_read_cost(&mut self) {
        self.read_cost_since_last_snapshot = 0.0;
    }

    /// Move the whole buffer out, leaving it empty.
    pub(crate) fn take_uncommitted(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.uncommitted_events)
    }

    /// Put a buffer back after a failed flush. Events recorded in the
    /// meantime stay after the restored ones.
    pub(crate) fn restore_uncommitted(&mut self, mut events: Vec<Bytes>) {
        events.append(&mut self.uncommitted_events);
        self.uncommitted_events = events;
    }
}

/// When an aggregate should write a snapshot after saving.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotPolicy {
    /// Snapshot once the accumulated read cost exceeds this value.
    pub read_cost_threshold: f64,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            read_cost_threshold: DEFAULT_SNAPSHOT_READ_COST_THRESHOLD,
        }
    }
}

impl SnapshotPolicy {
    pub fn with_threshold(read_cost_threshold: f64) -> Self {
        Self {
            read_cost_threshold,
        }
    }

    /// Policy that never asks for a snapshot.
    pub fn never() -> Self {
        Self::with_threshold(f64::INFINITY)
    }

    pub fn is_due(&self, state: &AggregateState) -> bool {
        state.read_cost_since_last_snapshot() > self.read_cost_threshold
    }
}

/// Hooks the event store uses to hydrate and flush an aggregate.
///
/// Implementors own an [`AggregateState`] and expose it through
/// `state`/`state_mut`; the remaining hooks translate opaque payloads to and
/// from domain state.
pub trait Aggregate: Send {
    fn state(&self) -> &AggregateState;

    fn state_mut(&mut self) -> &mut AggregateState;

    /// Whether Load should start from the stored snapshot.
    fn should_read_snapshot(&self) -> bool {
        true
    }

    /// Restore state from a snapshot blob. Called at most once per load,
    /// before any commit is replayed.
    fn load_snapshot(&mut self, snapshot: Bytes) -> Result<(), AggregateError>;

    /// Apply the events of one commit, in order.
    fn load_events(&mut self, events: Vec<Bytes>) -> Result<(), AggregateError>;

    fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy::default()
    }

    /// Evaluated after events were committed.
    fn should_create_snapshot(&self) -> bool {
        self.snapshot_policy().is_due(self.state())
    }

    /// Serialize current state. Only called when `should_create_snapshot`
    /// returned true.
    fn create_snapshot(&self) -> Result<Bytes, AggregateError>;
}
