//! The settlement engine: application-level orchestration of the ledger.
//!
//! Every mutating operation follows the same pipeline:
//!
//! ```text
//! Operation
//!   ↓
//! 1. Load the touched streams and rehydrate their aggregates
//!   ↓
//! 2. Decide events (pure aggregate `handle`, no mutation)
//!   ↓
//! 3. Commit one atomic unit (all streams, optimistic per-stream versions)
//!   ↓
//! 4. Publish committed envelopes on the event bus
//! ```
//!
//! Steps 1–3 repeat under a bounded retry when a concurrent writer wins the
//! race on one of the streams: the engine reloads fresh state, re-decides and
//! re-commits. Validation failures never retry and never leave partial state;
//! a failed commit applies nothing.

mod contact_ops;
mod ledger_ops;
mod settlement_ops;
mod treasury_ops;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use majolica_core::{Aggregate, AggregateId, DomainError};
use majolica_events::{EventBus, EventEnvelope};
use majolica_fx::CurrencyCode;
use majolica_ledgers::{CounterpartyAccount, CounterpartyId};
use majolica_settlement::{GeneralReceipt, GeneralReceiptId, PaymentReceipt, ReceiptId};
use majolica_treasury::{Treasury, TreasuryId};

use crate::store::{CommitUnit, LedgerStore, StoreError, StoredEvent};

/// Stream type of treasury aggregates.
pub const TREASURY_AGGREGATE_TYPE: &str = "treasury";
/// Stream type of payment receipts.
pub const RECEIPT_AGGREGATE_TYPE: &str = "settlement.receipt";
/// Stream type of contact general receipts.
pub const GENERAL_RECEIPT_AGGREGATE_TYPE: &str = "settlement.general_receipt";
/// Stream type of counterparty account ledgers.
pub const ACCOUNT_AGGREGATE_TYPE: &str = "ledgers.account";

/// How many times a conflicted commit is retried before surfacing.
const DEFAULT_COMMIT_ATTEMPTS: u32 = 3;

/// Caller-facing error taxonomy.
///
/// Validation errors (`NotFound`, `InvalidArgument`, `InvalidState`) surface
/// immediately with no effects. `Conflict` means the bounded internal retry
/// was exhausted under contention; the caller may retry the whole operation.
/// `Storage` means the backing store failed; the atomic unit was not
/// applied.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found")]
    NotFound,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("concurrency conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(StoreError),

    #[error("failed to decode stored event: {0}")]
    Deserialize(String),

    /// Publication failed after a successful commit (at-least-once; the
    /// events are durable and republishing is safe).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument(msg) => EngineError::InvalidArgument(msg),
            DomainError::InvalidState(msg) => EngineError::InvalidState(msg),
            DomainError::InvalidId(msg) => EngineError::InvalidArgument(msg),
            DomainError::NotFound => EngineError::NotFound,
            DomainError::Conflict(msg) => EngineError::Conflict(msg),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            other => EngineError::Storage(other),
        }
    }
}

/// The financial ledger & treasury settlement engine.
///
/// Generic over the ledger store and the event bus so tests and embedders run
/// fully in memory while larger deployments plug in durable backends.
#[derive(Debug)]
pub struct SettlementEngine<S, B> {
    pub(crate) store: S,
    bus: B,
    base_currency: CurrencyCode,
    max_commit_attempts: u32,
}

impl<S, B> SettlementEngine<S, B> {
    pub fn new(store: S, bus: B, base_currency: CurrencyCode) -> Self {
        Self {
            store,
            bus,
            base_currency,
            max_commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }

    /// Override how many commit attempts a conflicted operation gets (minimum 1).
    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts.max(1);
        self
    }

    pub fn base_currency(&self) -> &CurrencyCode {
        &self.base_currency
    }

    /// The event bus committed envelopes are published on. External
    /// collaborators subscribe here.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> SettlementEngine<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Run `op` with bounded retries on concurrency conflicts.
    ///
    /// Each attempt reloads fresh state, so a retry is a full re-decision,
    /// not a blind re-commit.
    pub(crate) fn with_retry<T>(
        &self,
        mut op: impl FnMut() -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(EngineError::Conflict(msg)) if attempt < self.max_commit_attempts => {
                    tracing::debug!(attempt, %msg, "commit conflict, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Commit the unit, then publish every committed envelope.
    ///
    /// Publish happens only after the commit succeeds; a publish failure is
    /// surfaced as [`EngineError::Publish`] with the unit already durable.
    pub(crate) fn commit_and_publish(
        &self,
        unit: CommitUnit,
    ) -> Result<Vec<StoredEvent>, EngineError> {
        let committed = self.store.commit(unit)?;

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| EngineError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    /// Load and rehydrate one aggregate, returning it with the stream
    /// version the decision must be committed against.
    pub(crate) fn load_aggregate<A>(
        &self,
        aggregate_id: AggregateId,
        make: impl FnOnce() -> A,
    ) -> Result<(A, u64), EngineError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let version = stream_version(&history);

        let mut aggregate = make();
        for stored in history {
            let ev: A::Event = serde_json::from_value(stored.payload)
                .map_err(|e| EngineError::Deserialize(e.to_string()))?;
            aggregate.apply(&ev);
        }

        Ok((aggregate, version))
    }

    pub(crate) fn load_treasury(&self, id: TreasuryId) -> Result<(Treasury, u64), EngineError> {
        self.load_aggregate(id.0, || Treasury::empty(id))
    }

    pub(crate) fn load_receipt(&self, id: ReceiptId) -> Result<(PaymentReceipt, u64), EngineError> {
        self.load_aggregate(id.0, || PaymentReceipt::empty(id))
    }

    pub(crate) fn load_account(
        &self,
        id: CounterpartyId,
    ) -> Result<(CounterpartyAccount, u64), EngineError> {
        self.load_aggregate(id.0, || CounterpartyAccount::empty(id))
    }

    pub(crate) fn load_general_receipt(
        &self,
        id: GeneralReceiptId,
    ) -> Result<(GeneralReceipt, u64), EngineError> {
        self.load_aggregate(id.0, || GeneralReceipt::empty(id))
    }

    /// Rehydrate an aggregate from an already-loaded stream (summaries).
    pub(crate) fn rehydrate<A>(
        stream: &[StoredEvent],
        make: impl FnOnce(AggregateId) -> A,
    ) -> Result<Option<A>, EngineError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        let Some(first) = stream.first() else {
            return Ok(None);
        };

        let mut aggregate = make(first.aggregate_id);
        for stored in stream {
            let ev: A::Event = serde_json::from_value(stored.payload.clone())
                .map_err(|e| EngineError::Deserialize(e.to_string()))?;
            aggregate.apply(&ev);
        }

        Ok(Some(aggregate))
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

/// Defense in depth: reject streams a buggy backend returned malformed.
fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), EngineError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(EngineError::Storage(StoreError::Storage(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number == 0 || e.sequence_number <= last {
            return Err(EngineError::Storage(StoreError::Storage(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}
