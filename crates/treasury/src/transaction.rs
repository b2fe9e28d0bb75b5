//! Transaction taxonomy and the outward transaction record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use majolica_core::{AggregateId, UserId};

use crate::treasury::TreasuryId;

/// Movement direction of a treasury transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Transfer,
}

/// What caused a treasury transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    /// A deposit receipt posted against a financial contact.
    Receipt,
    /// Settlement of a payment receipt (installment or contact payout).
    Payment,
    /// A manual adjustment recorded by a user.
    Manual,
    TransferIn,
    TransferOut,
    /// The synthetic transaction recorded when a treasury is opened.
    OpeningBalance,
}

/// Identifier shared by the two legs of an inter-treasury transfer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for TransferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Link from a transaction to the record that originated it.
///
/// Transfer legs store the counterpart treasury so the pair can be displayed
/// (or reversed) as one logical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    Receipt {
        receipt_id: AggregateId,
        installment_id: Uuid,
    },
    Transfer {
        transfer_id: TransferId,
        counterpart: TreasuryId,
    },
    GeneralReceipt {
        receipt_id: AggregateId,
    },
}

/// Outward, read-only view of one transaction in a treasury's log.
///
/// Built from the treasury's movement events; immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryTransaction {
    pub id: Uuid,
    pub treasury_id: TreasuryId,
    pub kind: TransactionKind,
    pub source: TransactionSource,
    /// Unsigned amount in base currency; `kind` carries the direction.
    pub amount: Decimal,
    /// Treasury balance immediately after this transaction was applied.
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub reference: Option<SourceRef>,
    pub recorded_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}
