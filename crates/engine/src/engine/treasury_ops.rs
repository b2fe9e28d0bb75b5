//! Treasury ledger operations: open, deposit, withdraw, transfer,
//! deactivate, and transaction-log reads.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use majolica_core::{Aggregate, AggregateId, CompanyId, ExpectedVersion, UserId};
use majolica_events::{EventBus, EventEnvelope};
use majolica_treasury::{
    BankDetails, DeactivateTreasury, OpenTreasury, RecordDeposit, RecordWithdrawal, SourceRef,
    TransactionSource, TransferId, Treasury, TreasuryCommand, TreasuryEvent, TreasuryId,
    TreasuryKind, TreasuryTransaction,
};

use crate::store::{CommitUnit, LedgerStore, StreamAppend};

use super::{EngineError, SettlementEngine, TREASURY_AGGREGATE_TYPE};

impl<S, B> SettlementEngine<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Open a treasury with an opening balance (recorded as a synthetic
    /// opening-balance transaction).
    #[instrument(skip(self, name, bank), fields(name = %name.as_ref()), err)]
    pub fn open_treasury(
        &self,
        name: impl AsRef<str>,
        kind: TreasuryKind,
        company_id: Option<CompanyId>,
        bank: Option<BankDetails>,
        opening_balance: Decimal,
    ) -> Result<Treasury, EngineError> {
        let treasury_id = TreasuryId::new(AggregateId::new());
        let mut treasury = Treasury::empty(treasury_id);

        let cmd = TreasuryCommand::OpenTreasury(OpenTreasury {
            treasury_id,
            name: name.as_ref().to_string(),
            kind,
            company_id,
            bank,
            opening_balance,
            occurred_at: Utc::now(),
        });
        let events = treasury.handle(&cmd).map_err(EngineError::from)?;

        self.commit_and_publish(CommitUnit::single(StreamAppend::from_typed(
            treasury_id.0,
            TREASURY_AGGREGATE_TYPE,
            ExpectedVersion::Exact(0),
            &events,
        )?))?;

        for e in &events {
            treasury.apply(e);
        }
        info!(%treasury_id, %opening_balance, "treasury opened");
        Ok(treasury)
    }

    /// Record a deposit into a treasury.
    ///
    /// The balance update and its transaction row are one atomic commit; no
    /// observer can see one without the other.
    #[instrument(skip(self, description), fields(%treasury_id, %amount), err)]
    pub fn deposit(
        &self,
        treasury_id: TreasuryId,
        amount: Decimal,
        source: TransactionSource,
        description: Option<String>,
        recorded_by: Option<UserId>,
    ) -> Result<TreasuryTransaction, EngineError> {
        self.with_retry(|| {
            let (treasury, version) = self.load_treasury(treasury_id)?;
            let cmd = TreasuryCommand::RecordDeposit(RecordDeposit {
                treasury_id,
                amount,
                source,
                description: description.clone(),
                reference: None,
                recorded_by,
                occurred_at: Utc::now(),
            });
            let events = treasury.handle(&cmd).map_err(EngineError::from)?;

            let committed = self.commit_and_publish(CommitUnit::single(
                StreamAppend::from_typed(
                    treasury_id.0,
                    TREASURY_AGGREGATE_TYPE,
                    ExpectedVersion::Exact(version),
                    &events,
                )?,
            ))?;

            transaction_from_committed(&events, committed_event_ids(&committed))
        })
    }

    /// Record a withdrawal from a treasury. May drive the balance negative.
    #[instrument(skip(self, description), fields(%treasury_id, %amount), err)]
    pub fn withdraw(
        &self,
        treasury_id: TreasuryId,
        amount: Decimal,
        source: TransactionSource,
        description: Option<String>,
        recorded_by: Option<UserId>,
    ) -> Result<TreasuryTransaction, EngineError> {
        self.with_retry(|| {
            let (treasury, version) = self.load_treasury(treasury_id)?;
            let cmd = TreasuryCommand::RecordWithdrawal(RecordWithdrawal {
                treasury_id,
                amount,
                source,
                description: description.clone(),
                reference: None,
                recorded_by,
                occurred_at: Utc::now(),
            });
            let events = treasury.handle(&cmd).map_err(EngineError::from)?;

            let committed = self.commit_and_publish(CommitUnit::single(
                StreamAppend::from_typed(
                    treasury_id.0,
                    TREASURY_AGGREGATE_TYPE,
                    ExpectedVersion::Exact(version),
                    &events,
                )?,
            ))?;

            transaction_from_committed(&events, committed_event_ids(&committed))
        })
    }

    /// Move funds between two treasuries as one atomic unit.
    ///
    /// Both legs share a [`TransferId`] and carry the counterpart treasury,
    /// so the pair reads as one logical event. If either leg cannot be
    /// applied, neither treasury is touched.
    #[instrument(skip(self, description), fields(%from, %to, %amount), err)]
    pub fn transfer(
        &self,
        from: TreasuryId,
        to: TreasuryId,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<(TreasuryTransaction, TreasuryTransaction), EngineError> {
        if from == to {
            return Err(EngineError::InvalidArgument(
                "cannot transfer between a treasury and itself".to_string(),
            ));
        }

        self.with_retry(|| {
            let (source_treasury, source_version) = self.load_treasury(from)?;
            let (target_treasury, target_version) = self.load_treasury(to)?;
            let transfer_id = TransferId::new();
            let now = Utc::now();

            let out_events = source_treasury
                .handle(&TreasuryCommand::RecordWithdrawal(RecordWithdrawal {
                    treasury_id: from,
                    amount,
                    source: TransactionSource::TransferOut,
                    description: description.clone(),
                    reference: Some(SourceRef::Transfer {
                        transfer_id,
                        counterpart: to,
                    }),
                    recorded_by: None,
                    occurred_at: now,
                }))
                .map_err(EngineError::from)?;

            let in_events = target_treasury
                .handle(&TreasuryCommand::RecordDeposit(RecordDeposit {
                    treasury_id: to,
                    amount,
                    source: TransactionSource::TransferIn,
                    description: description.clone(),
                    reference: Some(SourceRef::Transfer {
                        transfer_id,
                        counterpart: from,
                    }),
                    recorded_by: None,
                    occurred_at: now,
                }))
                .map_err(EngineError::from)?;

            let unit = CommitUnit::new()
                .with(StreamAppend::from_typed(
                    from.0,
                    TREASURY_AGGREGATE_TYPE,
                    ExpectedVersion::Exact(source_version),
                    &out_events,
                )?)
                .with(StreamAppend::from_typed(
                    to.0,
                    TREASURY_AGGREGATE_TYPE,
                    ExpectedVersion::Exact(target_version),
                    &in_events,
                )?);

            let committed = self.commit_and_publish(unit)?;
            let ids = committed_event_ids(&committed);
            let (out_ids, in_ids) = ids.split_at(out_events.len());

            let out_tx = transaction_from_committed(&out_events, out_ids.to_vec())?;
            let in_tx = transaction_from_committed(&in_events, in_ids.to_vec())?;

            info!(%transfer_id, "transfer committed");
            Ok((out_tx, in_tx))
        })
    }

    /// Soft-deactivate a treasury. Its transaction log remains readable.
    #[instrument(skip(self), fields(%treasury_id), err)]
    pub fn deactivate_treasury(&self, treasury_id: TreasuryId) -> Result<Treasury, EngineError> {
        self.with_retry(|| {
            let (mut treasury, version) = self.load_treasury(treasury_id)?;
            let cmd = TreasuryCommand::DeactivateTreasury(DeactivateTreasury {
                treasury_id,
                occurred_at: Utc::now(),
            });
            let events = treasury.handle(&cmd).map_err(EngineError::from)?;

            self.commit_and_publish(CommitUnit::single(StreamAppend::from_typed(
                treasury_id.0,
                TREASURY_AGGREGATE_TYPE,
                ExpectedVersion::Exact(version),
                &events,
            )?))?;

            for e in &events {
                treasury.apply(e);
            }
            Ok(treasury)
        })
    }

    /// Current state of a treasury.
    pub fn get_treasury(&self, treasury_id: TreasuryId) -> Result<Treasury, EngineError> {
        let (treasury, _) = self.load_treasury(treasury_id)?;
        if !treasury.exists() {
            return Err(EngineError::NotFound);
        }
        Ok(treasury)
    }

    /// The treasury's full transaction log, in creation order.
    pub fn list_transactions(
        &self,
        treasury_id: TreasuryId,
    ) -> Result<Vec<TreasuryTransaction>, EngineError> {
        let history = self.store.load_stream(treasury_id.0)?;
        if history.is_empty() {
            return Err(EngineError::NotFound);
        }

        let mut transactions = Vec::new();
        for stored in history {
            let ev: TreasuryEvent = serde_json::from_value(stored.payload)
                .map_err(|e| EngineError::Deserialize(e.to_string()))?;
            if let Some(tx) = ev.as_transaction(stored.event_id) {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }
}

/// Collect committed event ids in commit order.
fn committed_event_ids(committed: &[crate::store::StoredEvent]) -> Vec<uuid::Uuid> {
    committed.iter().map(|e| e.event_id).collect()
}

/// Pair decided events with their committed ids and pull out the single
/// transaction record a movement produced.
fn transaction_from_committed(
    events: &[TreasuryEvent],
    event_ids: Vec<uuid::Uuid>,
) -> Result<TreasuryTransaction, EngineError> {
    events
        .iter()
        .zip(event_ids)
        .find_map(|(ev, id)| ev.as_transaction(id))
        .ok_or_else(|| {
            EngineError::InvalidState("movement command produced no transaction".to_string())
        })
}
