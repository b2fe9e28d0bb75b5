use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use majolica_core::{AggregateId, ExpectedVersion};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence
/// number). The store assigns sequence numbers during commit.
///
/// Build one from a typed domain event with [`UncommittedEvent::from_typed`],
/// which serializes the payload and captures the event metadata needed to
/// deserialize it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are stream-scoped, start at 1, increase monotonically
/// with no gaps, and never change once assigned. The last sequence number of
/// a stream is its version, which is what optimistic concurrency checks
/// compare against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an event envelope for publication.
    pub fn to_envelope(&self) -> majolica_events::EventEnvelope<JsonValue> {
        majolica_events::EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// One stream's contribution to a commit unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    /// The stream version this append was decided against.
    pub expected_version: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

impl StreamAppend {
    /// Build a stream append from typed domain events.
    ///
    /// Serializes each event and stamps it with a fresh event id.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        expected_version: ExpectedVersion,
        events: &[E],
    ) -> Result<Self, StoreError>
    where
        E: majolica_events::Event + Serialize,
    {
        let aggregate_type = aggregate_type.into();
        let events = events
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type.clone(), Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            aggregate_id,
            aggregate_type,
            expected_version,
            events,
        })
    }
}

/// The atomic unit of a settlement action.
///
/// A unit carries one append per touched stream: an installment
/// settlement appends to the receipt stream, the treasury stream and the
/// counterparty account stream. The store applies the whole unit or none of
/// it; there is no API for applying a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommitUnit {
    pub appends: Vec<StreamAppend>,
}

impl CommitUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(append: StreamAppend) -> Self {
        Self {
            appends: vec![append],
        }
    }

    pub fn push(&mut self, append: StreamAppend) {
        self.appends.push(append);
    }

    pub fn with(mut self, append: StreamAppend) -> Self {
        self.push(append);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.appends.iter().all(|a| a.events.is_empty())
    }
}

/// Ledger store operation error.
///
/// Infrastructure taxonomy, distinct from the domain errors: conflicts are
/// surfaced for the engine's bounded retry; everything else aborts the unit.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed on at least one stream.
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    /// An append targeted a stream whose recorded aggregate type differs.
    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    /// The commit unit itself was malformed (duplicate streams, events not
    /// matching their append header, unserializable payload).
    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    /// The storage backend failed; the unit was not applied.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Append-only, multi-stream ledger store.
///
/// ## Commit semantics
///
/// `commit()`:
/// - validates every append's expected version against its stream **before**
///   touching anything;
/// - enforces aggregate-type stability per stream;
/// - assigns per-stream sequence numbers starting at `current_version + 1`;
/// - applies all appends as one unit: a failure on any stream leaves every
///   stream untouched. This is the transactional boundary behind "balance +
///   transaction + receipt + ledger entry update together or not at all".
///
/// ## Load semantics
///
/// `load_stream()` returns the full stream in sequence order (empty if the
/// aggregate does not exist yet). `load_streams_by_type()` returns every
/// stream of one aggregate type, each in sequence order, used for
/// dashboard summaries and audits.
///
/// Implementations must serialize commits touching the same stream so that
/// the read-modify-write of a treasury balance is linearizable per treasury;
/// commits touching disjoint streams may run in parallel.
pub trait LedgerStore: Send + Sync {
    /// Atomically append all streams in the unit (all or nothing).
    fn commit(&self, unit: CommitUnit) -> Result<Vec<StoredEvent>, StoreError>;

    /// Load the full stream for an aggregate.
    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, StoreError>;

    /// Load every stream of the given aggregate type.
    fn load_streams_by_type(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<Vec<StoredEvent>>, StoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn commit(&self, unit: CommitUnit) -> Result<Vec<StoredEvent>, StoreError> {
        (**self).commit(unit)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, StoreError> {
        (**self).load_stream(aggregate_id)
    }

    fn load_streams_by_type(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<Vec<StoredEvent>>, StoreError> {
        (**self).load_streams_by_type(aggregate_type)
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    ///
    /// Keeps the store decoupled from the domain crates while capturing the
    /// metadata needed for later deserialization.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, StoreError>
    where
        E: majolica_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| StoreError::InvalidCommit(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
