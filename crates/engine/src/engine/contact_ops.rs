//! Financial contact operations: general receipts and derived contact
//! balances.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::{info, instrument};

use majolica_core::{Aggregate, AggregateId, ExpectedVersion};
use majolica_events::{EventBus, EventEnvelope};
use majolica_ledgers::{ContactBalance, FinancialContactId};
use majolica_settlement::{
    GeneralReceipt, GeneralReceiptCommand, GeneralReceiptId, GeneralReceiptKind,
    RecordGeneralReceipt,
};
use majolica_treasury::{
    RecordDeposit, RecordWithdrawal, SourceRef, TransactionSource, TreasuryCommand, TreasuryId,
};

use crate::store::{CommitUnit, LedgerStore, StreamAppend};

use super::{
    EngineError, GENERAL_RECEIPT_AGGREGATE_TYPE, SettlementEngine, TREASURY_AGGREGATE_TYPE,
};

impl<S, B> SettlementEngine<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Record a deposit or withdrawal receipt against a financial contact.
    ///
    /// Fully settled at creation: the receipt record and the matching
    /// treasury movement commit as one unit.
    #[instrument(skip(self, notes), fields(%contact_id, %treasury_id, %amount), err)]
    pub fn record_general_receipt(
        &self,
        contact_id: FinancialContactId,
        treasury_id: TreasuryId,
        kind: GeneralReceiptKind,
        amount: Decimal,
        notes: Option<String>,
    ) -> Result<GeneralReceipt, EngineError> {
        self.with_retry(|| {
            let receipt_id = GeneralReceiptId::new(AggregateId::new());
            let (mut receipt, _) = self.load_general_receipt(receipt_id)?;
            let now = Utc::now();

            let receipt_events = receipt
                .handle(&GeneralReceiptCommand::RecordGeneralReceipt(RecordGeneralReceipt {
                    receipt_id,
                    contact_id,
                    treasury_id,
                    kind,
                    amount,
                    notes: notes.clone(),
                    occurred_at: now,
                }))
                .map_err(EngineError::from)?;

            let (treasury, treasury_version) = self.load_treasury(treasury_id)?;
            let reference = Some(SourceRef::GeneralReceipt {
                receipt_id: receipt_id.0,
            });
            let treasury_events = match kind {
                GeneralReceiptKind::Deposit => treasury
                    .handle(&TreasuryCommand::RecordDeposit(RecordDeposit {
                        treasury_id,
                        amount,
                        source: TransactionSource::Receipt,
                        description: Some(format!("contact deposit {contact_id}")),
                        reference,
                        recorded_by: None,
                        occurred_at: now,
                    }))
                    .map_err(EngineError::from)?,
                GeneralReceiptKind::Withdrawal => treasury
                    .handle(&TreasuryCommand::RecordWithdrawal(RecordWithdrawal {
                        treasury_id,
                        amount,
                        source: TransactionSource::Payment,
                        description: Some(format!("contact payout {contact_id}")),
                        reference,
                        recorded_by: None,
                        occurred_at: now,
                    }))
                    .map_err(EngineError::from)?,
            };

            let unit = CommitUnit::new()
                .with(StreamAppend::from_typed(
                    receipt_id.0,
                    GENERAL_RECEIPT_AGGREGATE_TYPE,
                    ExpectedVersion::Exact(0),
                    &receipt_events,
                )?)
                .with(StreamAppend::from_typed(
                    treasury_id.0,
                    TREASURY_AGGREGATE_TYPE,
                    ExpectedVersion::Exact(treasury_version),
                    &treasury_events,
                )?);

            self.commit_and_publish(unit)?;

            for e in &receipt_events {
                receipt.apply(e);
            }
            info!(%receipt_id, "general receipt recorded");
            Ok(receipt)
        })
    }

    /// All general receipts posted against a contact, in creation order.
    pub fn contact_receipts(
        &self,
        contact_id: FinancialContactId,
    ) -> Result<Vec<GeneralReceipt>, EngineError> {
        let streams = self.store.load_streams_by_type(GENERAL_RECEIPT_AGGREGATE_TYPE)?;

        let mut receipts = Vec::new();
        for stream in &streams {
            let receipt = Self::rehydrate(stream, |id| {
                GeneralReceipt::empty(GeneralReceiptId::new(id))
            })?;
            if let Some(receipt) = receipt {
                if receipt.contact_id() == Some(contact_id) {
                    receipts.push(receipt);
                }
            }
        }
        receipts.sort_by_key(|r| r.created_at());
        Ok(receipts)
    }

    /// Derived totals for one contact, folded from its receipt history.
    pub fn contact_summary(
        &self,
        contact_id: FinancialContactId,
    ) -> Result<ContactBalance, EngineError> {
        let mut balance = ContactBalance::new(contact_id);
        for receipt in self.contact_receipts(contact_id)? {
            match receipt.kind() {
                GeneralReceiptKind::Deposit => balance.record_deposit(receipt.amount()),
                GeneralReceiptKind::Withdrawal => balance.record_withdrawal(receipt.amount()),
            }
        }
        Ok(balance)
    }

    /// Derived totals for every contact with at least one receipt.
    pub fn contact_summaries(&self) -> Result<Vec<ContactBalance>, EngineError> {
        let streams = self.store.load_streams_by_type(GENERAL_RECEIPT_AGGREGATE_TYPE)?;

        let mut by_contact: BTreeMap<uuid::Uuid, ContactBalance> = BTreeMap::new();
        for stream in &streams {
            let receipt = Self::rehydrate(stream, |id| {
                GeneralReceipt::empty(GeneralReceiptId::new(id))
            })?;
            let Some(receipt) = receipt else { continue };
            let Some(contact_id) = receipt.contact_id() else { continue };

            let balance = by_contact
                .entry(*contact_id.0.as_uuid())
                .or_insert_with(|| ContactBalance::new(contact_id));
            match receipt.kind() {
                GeneralReceiptKind::Deposit => balance.record_deposit(receipt.amount()),
                GeneralReceiptKind::Withdrawal => balance.record_withdrawal(receipt.amount()),
            }
        }
        Ok(by_contact.into_values().collect())
    }
}
