//! Counterparty account ledger operations: postings, balances, statements,
//! dashboard summaries.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::instrument;
use uuid::Uuid;

use majolica_core::{Aggregate, ExpectedVersion};
use majolica_events::{EventBus, EventEnvelope};
use majolica_ledgers::{
    AccountSummary, AppendEntry, CounterpartyAccount, CounterpartyAccountCommand,
    CounterpartyAccountEvent, CounterpartyId, CounterpartyRef, EntryDirection, LedgerEntry,
    ReferenceKind,
};

use crate::query::{Pagination, StatementPage};
use crate::store::{CommitUnit, LedgerStore, StreamAppend};

use super::{ACCOUNT_AGGREGATE_TYPE, EngineError, SettlementEngine};

impl<S, B> SettlementEngine<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Append one posting to a counterparty's running account.
    ///
    /// The new running balance is computed from the last entry's stored
    /// balance, never from a separate field that could drift.
    #[instrument(skip(self, description), fields(counterparty_id = %counterparty.id, %amount), err)]
    pub fn append_entry(
        &self,
        counterparty: CounterpartyRef,
        direction: EntryDirection,
        amount: Decimal,
        reference_kind: ReferenceKind,
        reference_id: Uuid,
        description: Option<String>,
    ) -> Result<LedgerEntry, EngineError> {
        self.with_retry(|| {
            let (account, version) = self.load_account(counterparty.id)?;
            let cmd = CounterpartyAccountCommand::AppendEntry(AppendEntry {
                counterparty,
                entry_id: Uuid::now_v7(),
                direction,
                amount,
                reference_kind,
                reference_id,
                description: description.clone(),
                occurred_at: Utc::now(),
            });
            let events = account.handle(&cmd).map_err(EngineError::from)?;

            self.commit_and_publish(CommitUnit::single(StreamAppend::from_typed(
                counterparty.id.0,
                ACCOUNT_AGGREGATE_TYPE,
                ExpectedVersion::Exact(version),
                &events,
            )?))?;

            let CounterpartyAccountEvent::EntryAppended(appended) = &events[0];
            Ok(appended.to_entry())
        })
    }

    /// The counterparty's current running balance: the latest entry's stored
    /// balance, or zero if no entries exist.
    pub fn account_balance(&self, counterparty_id: CounterpartyId) -> Result<Decimal, EngineError> {
        let (account, _) = self.load_account(counterparty_id)?;
        Ok(account.balance())
    }

    /// The full ordered entry sequence for a counterparty.
    pub fn statement(&self, counterparty_id: CounterpartyId) -> Result<Vec<LedgerEntry>, EngineError> {
        let history = self.store.load_stream(counterparty_id.0)?;

        let mut entries = Vec::with_capacity(history.len());
        for stored in history {
            let ev: CounterpartyAccountEvent = serde_json::from_value(stored.payload)
                .map_err(|e| EngineError::Deserialize(e.to_string()))?;
            let CounterpartyAccountEvent::EntryAppended(appended) = ev;
            entries.push(appended.to_entry());
        }
        Ok(entries)
    }

    /// One page of a counterparty statement (restartable offset/limit).
    pub fn statement_page(
        &self,
        counterparty_id: CounterpartyId,
        pagination: Pagination,
    ) -> Result<StatementPage, EngineError> {
        let all = self.statement(counterparty_id)?;
        let total = all.len() as u64;
        let start = (pagination.offset as usize).min(all.len());
        let end = (start + pagination.limit as usize).min(all.len());

        Ok(StatementPage {
            entries: all[start..end].to_vec(),
            total,
            pagination,
            has_more: (end as u64) < total,
        })
    }

    /// One aggregated row per counterparty, for dashboard listings.
    pub fn account_summaries(&self) -> Result<Vec<AccountSummary>, EngineError> {
        let streams = self.store.load_streams_by_type(ACCOUNT_AGGREGATE_TYPE)?;

        let mut summaries = Vec::with_capacity(streams.len());
        for stream in &streams {
            let account = Self::rehydrate(stream, |id| {
                CounterpartyAccount::empty(CounterpartyId::new(id))
            })?;
            if let Some(summary) = account.and_then(|a| a.summary()) {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }
}
