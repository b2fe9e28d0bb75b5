use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use majolica_core::AggregateId;

use super::r#trait::{CommitUnit, LedgerStore, StoreError, StoredEvent};

/// In-memory append-only ledger store.
///
/// Intended for tests, embedders and small deployments. A single writer lock
/// spans the whole commit, which gives the two guarantees the contract asks
/// for at once: commits are all-or-nothing, and commits against the same
/// stream are serialized.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn commit(&self, unit: CommitUnit) -> Result<Vec<StoredEvent>, StoreError> {
        if unit.is_empty() {
            return Ok(vec![]);
        }

        // Each stream may appear at most once per unit; otherwise the
        // expected-version arithmetic below would be ambiguous.
        let mut seen = HashSet::new();
        for append in &unit.appends {
            if !seen.insert(append.aggregate_id) {
                return Err(StoreError::InvalidCommit(format!(
                    "stream {} appears more than once in the unit",
                    append.aggregate_id
                )));
            }

            for (idx, e) in append.events.iter().enumerate() {
                if e.aggregate_id != append.aggregate_id {
                    return Err(StoreError::InvalidCommit(format!(
                        "event {idx} does not match the append's aggregate_id"
                    )));
                }
                if e.aggregate_type != append.aggregate_type {
                    return Err(StoreError::AggregateTypeMismatch(format!(
                        "event {idx} does not match the append's aggregate_type"
                    )));
                }
            }
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;

        // Validate every stream before mutating any: a conflict on the last
        // append must leave the first one untouched.
        for append in &unit.appends {
            let stream = streams.get(&append.aggregate_id).map(Vec::as_slice).unwrap_or(&[]);
            let current = Self::current_version(stream);

            if !append.expected_version.matches(current) {
                return Err(StoreError::Conflict(format!(
                    "stream {}: expected {:?}, found {current}",
                    append.aggregate_id, append.expected_version
                )));
            }

            if let Some(existing) = stream.first() {
                if existing.aggregate_type != append.aggregate_type {
                    return Err(StoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, append.aggregate_type
                    )));
                }
            }
        }

        // All checks passed; apply the whole unit.
        let mut committed = Vec::new();
        for append in unit.appends {
            let stream = streams.entry(append.aggregate_id).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in append.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, StoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;

        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    fn load_streams_by_type(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<Vec<StoredEvent>>, StoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;

        let mut matching: Vec<Vec<StoredEvent>> = streams
            .values()
            .filter(|s| s.first().is_some_and(|e| e.aggregate_type == aggregate_type))
            .cloned()
            .collect();

        // Deterministic listing order (streams are keyed by UUIDv7, so this
        // is roughly creation order).
        matching.sort_by_key(|s| s.first().map(|e| *e.aggregate_id.as_uuid().as_bytes()));

        Ok(matching)
    }
}
