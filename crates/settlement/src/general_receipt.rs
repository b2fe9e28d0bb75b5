//! General receipts: deposits/withdrawals posted against a financial contact
//! and a treasury simultaneously, fully settled at creation (no partial
//! state, no installments).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use majolica_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use majolica_events::Event;
use majolica_ledgers::FinancialContactId;
use majolica_treasury::TreasuryId;

/// General receipt identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneralReceiptId(pub AggregateId);

impl GeneralReceiptId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for GeneralReceiptId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Whether the contact paid money in or was paid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneralReceiptKind {
    Deposit,
    Withdrawal,
}

/// Aggregate root: GeneralReceipt.
///
/// A single-event record: once recorded it never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralReceipt {
    id: GeneralReceiptId,
    contact_id: Option<FinancialContactId>,
    treasury_id: Option<TreasuryId>,
    kind: GeneralReceiptKind,
    amount: Decimal,
    notes: Option<String>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl GeneralReceipt {
    /// Empty aggregate for rehydration.
    pub fn empty(id: GeneralReceiptId) -> Self {
        Self {
            id,
            contact_id: None,
            treasury_id: None,
            kind: GeneralReceiptKind::Deposit,
            amount: Decimal::ZERO,
            notes: None,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> GeneralReceiptId {
        self.id
    }

    pub fn contact_id(&self) -> Option<FinancialContactId> {
        self.contact_id
    }

    pub fn treasury_id(&self) -> Option<TreasuryId> {
        self.treasury_id
    }

    pub fn kind(&self) -> GeneralReceiptKind {
        self.kind
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for GeneralReceipt {
    type Id = GeneralReceiptId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordGeneralReceipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordGeneralReceipt {
    pub receipt_id: GeneralReceiptId,
    pub contact_id: FinancialContactId,
    pub treasury_id: TreasuryId,
    pub kind: GeneralReceiptKind,
    pub amount: Decimal,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneralReceiptCommand {
    RecordGeneralReceipt(RecordGeneralReceipt),
}

/// Event: GeneralReceiptRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralReceiptRecorded {
    pub receipt_id: GeneralReceiptId,
    pub contact_id: FinancialContactId,
    pub treasury_id: TreasuryId,
    pub kind: GeneralReceiptKind,
    pub amount: Decimal,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneralReceiptEvent {
    GeneralReceiptRecorded(GeneralReceiptRecorded),
}

impl Event for GeneralReceiptEvent {
    fn event_type(&self) -> &'static str {
        match self {
            GeneralReceiptEvent::GeneralReceiptRecorded(_) => "settlement.general_receipt.recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            GeneralReceiptEvent::GeneralReceiptRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for GeneralReceipt {
    type Command = GeneralReceiptCommand;
    type Event = GeneralReceiptEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            GeneralReceiptEvent::GeneralReceiptRecorded(e) => {
                self.id = e.receipt_id;
                self.contact_id = Some(e.contact_id);
                self.treasury_id = Some(e.treasury_id);
                self.kind = e.kind;
                self.amount = e.amount;
                self.notes = e.notes.clone();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            GeneralReceiptCommand::RecordGeneralReceipt(cmd) => self.handle_record(cmd),
        }
    }
}

impl GeneralReceipt {
    fn handle_record(
        &self,
        cmd: &RecordGeneralReceipt,
    ) -> Result<Vec<GeneralReceiptEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("general receipt already exists"));
        }

        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::invalid_argument("amount must be positive"));
        }

        Ok(vec![GeneralReceiptEvent::GeneralReceiptRecorded(
            GeneralReceiptRecorded {
                receipt_id: cmd.receipt_id,
                contact_id: cmd.contact_id,
                treasury_id: cmd.treasury_id,
                kind: cmd.kind,
                amount: cmd.amount,
                notes: cmd.notes.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_receipt_id() -> GeneralReceiptId {
        GeneralReceiptId::new(AggregateId::new())
    }

    #[test]
    fn record_emits_a_single_immutable_event() {
        let receipt_id = test_receipt_id();
        let mut receipt = GeneralReceipt::empty(receipt_id);
        let contact_id = FinancialContactId::new(AggregateId::new());
        let treasury_id = TreasuryId::new(AggregateId::new());

        let cmd = RecordGeneralReceipt {
            receipt_id,
            contact_id,
            treasury_id,
            kind: GeneralReceiptKind::Deposit,
            amount: dec!(250),
            notes: Some("cash drop-off".to_string()),
            occurred_at: Utc::now(),
        };

        let events = receipt
            .handle(&GeneralReceiptCommand::RecordGeneralReceipt(cmd.clone()))
            .unwrap();
        assert_eq!(events.len(), 1);
        receipt.apply(&events[0]);

        assert!(receipt.exists());
        assert_eq!(receipt.contact_id(), Some(contact_id));
        assert_eq!(receipt.amount(), dec!(250));

        // Re-recording the same aggregate is a conflict.
        let err = receipt
            .handle(&GeneralReceiptCommand::RecordGeneralReceipt(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let receipt_id = test_receipt_id();
        let receipt = GeneralReceipt::empty(receipt_id);
        let cmd = RecordGeneralReceipt {
            receipt_id,
            contact_id: FinancialContactId::new(AggregateId::new()),
            treasury_id: TreasuryId::new(AggregateId::new()),
            kind: GeneralReceiptKind::Withdrawal,
            amount: dec!(0),
            notes: None,
            occurred_at: Utc::now(),
        };
        let err = receipt
            .handle(&GeneralReceiptCommand::RecordGeneralReceipt(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
    }
}
