//! Payment receipt & installment settlement operations.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{info, instrument};
use uuid::Uuid;

use majolica_core::{Aggregate, AggregateId, ExpectedVersion};
use majolica_events::{EventBus, EventEnvelope};
use majolica_fx::{CurrencyCode, ExchangeRate};
use majolica_ledgers::{AppendEntry, CounterpartyAccountCommand, CounterpartyRef, EntryDirection, ReferenceKind};
use majolica_settlement::{
    AddInstallment, CancelReceipt, CreateReceipt, InstallmentId, PaymentInstallment, PaymentMethod,
    PaymentReceipt, PurchaseId, ReceiptCommand, ReceiptEvent, ReceiptId, ReceiptKind,
    ReceiptStatus,
};
use majolica_treasury::{RecordWithdrawal, SourceRef, TransactionSource, TreasuryCommand, TreasuryId};

use crate::store::{CommitUnit, LedgerStore, StreamAppend};

use super::{
    ACCOUNT_AGGREGATE_TYPE, EngineError, RECEIPT_AGGREGATE_TYPE, SettlementEngine,
    TREASURY_AGGREGATE_TYPE,
};

impl<S, B> SettlementEngine<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Create a payment receipt. Records the obligation only; no treasury
    /// movement happens until installments are added.
    #[instrument(skip(self, notes), fields(%total, currency = %currency), err)]
    pub fn create_receipt(
        &self,
        counterparty: CounterpartyRef,
        purchase_id: Option<PurchaseId>,
        kind: ReceiptKind,
        total: Decimal,
        currency: CurrencyCode,
        exchange_rate: Option<ExchangeRate>,
        notes: Option<String>,
    ) -> Result<PaymentReceipt, EngineError> {
        let receipt_id = ReceiptId::new(AggregateId::new());
        let mut receipt = PaymentReceipt::empty(receipt_id);

        let cmd = ReceiptCommand::CreateReceipt(CreateReceipt {
            receipt_id,
            counterparty,
            purchase_id,
            kind,
            total,
            currency,
            exchange_rate,
            base_currency: self.base_currency().clone(),
            notes,
            occurred_at: Utc::now(),
        });
        let events = receipt.handle(&cmd).map_err(EngineError::from)?;

        self.commit_and_publish(CommitUnit::single(StreamAppend::from_typed(
            receipt_id.0,
            RECEIPT_AGGREGATE_TYPE,
            ExpectedVersion::Exact(0),
            &events,
        )?))?;

        for e in &events {
            receipt.apply(e);
        }
        info!(%receipt_id, "receipt created");
        Ok(receipt)
    }

    /// Settle part of a receipt.
    ///
    /// One atomic unit: the installment (and, when terminal, the settled
    /// status) on the receipt stream, the base-currency withdrawal on the
    /// treasury stream, and the payment posting on the counterparty's
    /// account ledger. A failure at any step applies nothing.
    #[instrument(skip(self, reference_number, notes), fields(%receipt_id, %treasury_id, %amount), err)]
    pub fn add_installment(
        &self,
        receipt_id: ReceiptId,
        amount: Decimal,
        treasury_id: TreasuryId,
        exchange_rate: Option<ExchangeRate>,
        method: Option<PaymentMethod>,
        reference_number: Option<String>,
        notes: Option<String>,
    ) -> Result<PaymentInstallment, EngineError> {
        self.with_retry(|| {
            self.settle_installment(
                receipt_id,
                Some(amount),
                treasury_id,
                exchange_rate,
                method,
                reference_number.clone(),
                notes.clone(),
            )
        })
    }

    /// Convenience path: settle the full remaining amount as one terminal
    /// installment. Same atomicity contract as [`Self::add_installment`].
    #[instrument(skip(self, reference_number), fields(%receipt_id, %treasury_id), err)]
    pub fn pay_receipt(
        &self,
        receipt_id: ReceiptId,
        treasury_id: TreasuryId,
        exchange_rate: Option<ExchangeRate>,
        method: Option<PaymentMethod>,
        reference_number: Option<String>,
    ) -> Result<PaymentReceipt, EngineError> {
        self.with_retry(|| {
            self.settle_installment(
                receipt_id,
                None,
                treasury_id,
                exchange_rate,
                method,
                reference_number.clone(),
                None,
            )
        })?;

        self.get_receipt(receipt_id)
    }

    /// Cancel a pending, unpaid receipt. There is no reversal path for
    /// recorded installments, so partially paid receipts are rejected.
    #[instrument(skip(self, reason), fields(%receipt_id), err)]
    pub fn cancel_receipt(
        &self,
        receipt_id: ReceiptId,
        reason: Option<String>,
    ) -> Result<PaymentReceipt, EngineError> {
        self.with_retry(|| {
            let (mut receipt, version) = self.load_receipt(receipt_id)?;
            let cmd = ReceiptCommand::CancelReceipt(CancelReceipt {
                receipt_id,
                reason: reason.clone(),
                occurred_at: Utc::now(),
            });
            let events = receipt.handle(&cmd).map_err(EngineError::from)?;

            self.commit_and_publish(CommitUnit::single(StreamAppend::from_typed(
                receipt_id.0,
                RECEIPT_AGGREGATE_TYPE,
                ExpectedVersion::Exact(version),
                &events,
            )?))?;

            for e in &events {
                receipt.apply(e);
            }
            Ok(receipt)
        })
    }

    /// Current state of a receipt.
    pub fn get_receipt(&self, receipt_id: ReceiptId) -> Result<PaymentReceipt, EngineError> {
        let (receipt, _) = self.load_receipt(receipt_id)?;
        if !receipt.exists() {
            return Err(EngineError::NotFound);
        }
        Ok(receipt)
    }

    /// Installments recorded against a receipt, in settlement order.
    pub fn list_installments(
        &self,
        receipt_id: ReceiptId,
    ) -> Result<Vec<PaymentInstallment>, EngineError> {
        Ok(self.get_receipt(receipt_id)?.installments().to_vec())
    }

    /// One settlement attempt (no retry): decide all three streams against
    /// their loaded versions and commit them as one unit.
    ///
    /// `amount == None` settles the full remaining amount (the pay-receipt
    /// path): full settlement is just "many installments of one".
    fn settle_installment(
        &self,
        receipt_id: ReceiptId,
        amount: Option<Decimal>,
        treasury_id: TreasuryId,
        exchange_rate: Option<ExchangeRate>,
        method: Option<PaymentMethod>,
        reference_number: Option<String>,
        notes: Option<String>,
    ) -> Result<PaymentInstallment, EngineError> {
        let (receipt, receipt_version) = self.load_receipt(receipt_id)?;
        if !receipt.exists() {
            return Err(EngineError::NotFound);
        }

        let amount = match amount {
            Some(a) => a,
            None => {
                if receipt.status() != ReceiptStatus::Pending {
                    return Err(EngineError::InvalidState(
                        "only pending receipts can be paid".to_string(),
                    ));
                }
                receipt.remaining()
            }
        };

        let installment_id = InstallmentId::new();
        let now = Utc::now();

        // 1) Decide the receipt leg (validates status, amount, rate).
        let receipt_events = receipt
            .handle(&ReceiptCommand::AddInstallment(AddInstallment {
                receipt_id,
                installment_id,
                amount,
                exchange_rate,
                treasury_id,
                method,
                reference_number: reference_number.clone(),
                notes: notes.clone(),
                occurred_at: now,
            }))
            .map_err(EngineError::from)?;

        let added = receipt_events
            .iter()
            .find_map(|e| match e {
                ReceiptEvent::InstallmentAdded(a) => Some(a.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                EngineError::InvalidState("settlement produced no installment".to_string())
            })?;

        // 2) Decide the treasury leg: withdraw the installment's own
        //    base-currency amount, linked back to the installment.
        let (treasury, treasury_version) = self.load_treasury(treasury_id)?;
        let treasury_events = treasury
            .handle(&TreasuryCommand::RecordWithdrawal(RecordWithdrawal {
                treasury_id,
                amount: added.base_amount,
                source: TransactionSource::Payment,
                description: Some(format!("settlement of receipt {receipt_id}")),
                reference: Some(SourceRef::Receipt {
                    receipt_id: receipt_id.0,
                    installment_id: *installment_id.as_uuid(),
                }),
                recorded_by: None,
                occurred_at: now,
            }))
            .map_err(EngineError::from)?;

        // 3) Decide the account-ledger leg: an outgoing payment posts as a
        //    debit for either counterparty role.
        let counterparty = receipt.counterparty().ok_or(EngineError::NotFound)?;
        let (account, account_version) = self.load_account(counterparty.id)?;
        let account_events = account
            .handle(&CounterpartyAccountCommand::AppendEntry(AppendEntry {
                counterparty,
                entry_id: Uuid::now_v7(),
                direction: EntryDirection::Debit,
                amount: added.base_amount,
                reference_kind: ReferenceKind::Payment,
                reference_id: *installment_id.as_uuid(),
                description: Some(format!("installment on receipt {receipt_id}")),
                occurred_at: now,
            }))
            .map_err(EngineError::from)?;

        // 4) Commit all three streams or none of them.
        let unit = CommitUnit::new()
            .with(StreamAppend::from_typed(
                receipt_id.0,
                RECEIPT_AGGREGATE_TYPE,
                ExpectedVersion::Exact(receipt_version),
                &receipt_events,
            )?)
            .with(StreamAppend::from_typed(
                treasury_id.0,
                TREASURY_AGGREGATE_TYPE,
                ExpectedVersion::Exact(treasury_version),
                &treasury_events,
            )?)
            .with(StreamAppend::from_typed(
                counterparty.id.0,
                ACCOUNT_AGGREGATE_TYPE,
                ExpectedVersion::Exact(account_version),
                &account_events,
            )?);

        self.commit_and_publish(unit)?;

        if added.new_remaining == Decimal::ZERO {
            info!(%receipt_id, "receipt fully settled");
        }

        Ok(PaymentInstallment {
            id: installment_id,
            receipt_id,
            amount: added.amount,
            exchange_rate: added.exchange_rate,
            base_amount: added.base_amount,
            treasury_id,
            method: added.method,
            reference_number: added.reference_number,
            notes: added.notes,
            created_at: now,
        })
    }
}
