use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use majolica_core::{Aggregate, AggregateId, AggregateRoot, CompanyId, DomainError, UserId};
use majolica_events::Event;

use crate::transaction::{
    SourceRef, TransactionKind, TransactionSource, TreasuryTransaction,
};

/// Treasury identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreasuryId(pub AggregateId);

impl TreasuryId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TreasuryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// High-level treasury kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreasuryKind {
    /// Cash pool owned by one of the distributor's companies.
    Company,
    General,
    Bank,
}

/// Bank metadata carried by bank-kind treasuries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    pub bank_name: String,
    pub account_number: String,
}

/// Aggregate root: Treasury.
///
/// The event stream is the append-only transaction log; `balance` is a cache
/// over it. Every movement event snapshots `balance_after`, so replaying the
/// stream reconstructs the balance exactly (see the engine's reconciliation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Treasury {
    id: TreasuryId,
    name: String,
    kind: TreasuryKind,
    company_id: Option<CompanyId>,
    bank: Option<BankDetails>,
    balance: Decimal,
    is_active: bool,
    version: u64,
    created: bool,
}

impl Treasury {
    /// Empty aggregate for rehydration.
    pub fn empty(id: TreasuryId) -> Self {
        Self {
            id,
            name: String::new(),
            kind: TreasuryKind::General,
            company_id: None,
            bank: None,
            balance: Decimal::ZERO,
            is_active: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TreasuryId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TreasuryKind {
        self.kind
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.company_id
    }

    pub fn bank(&self) -> Option<&BankDetails> {
        self.bank.as_ref()
    }

    /// Current balance in base currency. Signed: overdrafts are tracked,
    /// not rejected.
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Treasury {
    type Id = TreasuryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenTreasury.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTreasury {
    pub treasury_id: TreasuryId,
    pub name: String,
    pub kind: TreasuryKind,
    pub company_id: Option<CompanyId>,
    pub bank: Option<BankDetails>,
    pub opening_balance: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordDeposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDeposit {
    pub treasury_id: TreasuryId,
    pub amount: Decimal,
    pub source: TransactionSource,
    pub description: Option<String>,
    pub reference: Option<SourceRef>,
    pub recorded_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordWithdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordWithdrawal {
    pub treasury_id: TreasuryId,
    pub amount: Decimal,
    pub source: TransactionSource,
    pub description: Option<String>,
    pub reference: Option<SourceRef>,
    pub recorded_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateTreasury (soft; the transaction log remains).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateTreasury {
    pub treasury_id: TreasuryId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreasuryCommand {
    OpenTreasury(OpenTreasury),
    RecordDeposit(RecordDeposit),
    RecordWithdrawal(RecordWithdrawal),
    DeactivateTreasury(DeactivateTreasury),
}

/// Event: TreasuryOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryOpened {
    pub treasury_id: TreasuryId,
    pub name: String,
    pub kind: TreasuryKind,
    pub company_id: Option<CompanyId>,
    pub bank: Option<BankDetails>,
    pub opening_balance: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FundsDeposited.
///
/// One appended transaction. `balance_after` is the treasury balance
/// immediately after this movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsDeposited {
    pub treasury_id: TreasuryId,
    pub kind: TransactionKind,
    pub source: TransactionSource,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub reference: Option<SourceRef>,
    pub recorded_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FundsWithdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsWithdrawn {
    pub treasury_id: TreasuryId,
    pub kind: TransactionKind,
    pub source: TransactionSource,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub reference: Option<SourceRef>,
    pub recorded_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TreasuryDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryDeactivated {
    pub treasury_id: TreasuryId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreasuryEvent {
    TreasuryOpened(TreasuryOpened),
    FundsDeposited(FundsDeposited),
    FundsWithdrawn(FundsWithdrawn),
    TreasuryDeactivated(TreasuryDeactivated),
}

impl Event for TreasuryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TreasuryEvent::TreasuryOpened(_) => "treasury.opened",
            TreasuryEvent::FundsDeposited(_) => "treasury.funds_deposited",
            TreasuryEvent::FundsWithdrawn(_) => "treasury.funds_withdrawn",
            TreasuryEvent::TreasuryDeactivated(_) => "treasury.deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TreasuryEvent::TreasuryOpened(e) => e.occurred_at,
            TreasuryEvent::FundsDeposited(e) => e.occurred_at,
            TreasuryEvent::FundsWithdrawn(e) => e.occurred_at,
            TreasuryEvent::TreasuryDeactivated(e) => e.occurred_at,
        }
    }
}

impl TreasuryEvent {
    /// Render a movement event as an outward transaction record.
    ///
    /// Non-movement events (opened, deactivated) have no transaction row.
    pub fn as_transaction(&self, event_id: Uuid) -> Option<TreasuryTransaction> {
        match self {
            TreasuryEvent::FundsDeposited(e) => Some(TreasuryTransaction {
                id: event_id,
                treasury_id: e.treasury_id,
                kind: e.kind,
                source: e.source,
                amount: e.amount,
                balance_after: e.balance_after,
                description: e.description.clone(),
                reference: e.reference,
                recorded_by: e.recorded_by,
                created_at: e.occurred_at,
            }),
            TreasuryEvent::FundsWithdrawn(e) => Some(TreasuryTransaction {
                id: event_id,
                treasury_id: e.treasury_id,
                kind: e.kind,
                source: e.source,
                amount: e.amount,
                balance_after: e.balance_after,
                description: e.description.clone(),
                reference: e.reference,
                recorded_by: e.recorded_by,
                created_at: e.occurred_at,
            }),
            _ => None,
        }
    }
}

impl Aggregate for Treasury {
    type Command = TreasuryCommand;
    type Event = TreasuryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TreasuryEvent::TreasuryOpened(e) => {
                self.id = e.treasury_id;
                self.name = e.name.clone();
                self.kind = e.kind;
                self.company_id = e.company_id;
                self.bank = e.bank.clone();
                self.balance = Decimal::ZERO;
                self.is_active = true;
                self.created = true;
            }
            TreasuryEvent::FundsDeposited(e) => {
                self.balance = e.balance_after;
            }
            TreasuryEvent::FundsWithdrawn(e) => {
                self.balance = e.balance_after;
            }
            TreasuryEvent::TreasuryDeactivated(_) => {
                self.is_active = false;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TreasuryCommand::OpenTreasury(cmd) => self.handle_open(cmd),
            TreasuryCommand::RecordDeposit(cmd) => self.handle_deposit(cmd),
            TreasuryCommand::RecordWithdrawal(cmd) => self.handle_withdraw(cmd),
            TreasuryCommand::DeactivateTreasury(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl Treasury {
    fn ensure_treasury_id(&self, treasury_id: TreasuryId) -> Result<(), DomainError> {
        if self.id != treasury_id {
            return Err(DomainError::invalid_state("treasury_id mismatch"));
        }
        Ok(())
    }

    fn ensure_open(&self, treasury_id: TreasuryId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_treasury_id(treasury_id)?;
        if !self.is_active {
            return Err(DomainError::invalid_state(
                "treasury is deactivated and accepts no movements",
            ));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenTreasury) -> Result<Vec<TreasuryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("treasury already exists"));
        }

        if cmd.name.trim().is_empty() {
            return Err(DomainError::invalid_argument("treasury name must not be empty"));
        }

        if cmd.opening_balance < Decimal::ZERO {
            return Err(DomainError::invalid_argument(
                "opening balance must not be negative",
            ));
        }

        // The opening balance is always recorded as a synthetic transaction,
        // even when zero, so the log replays to the balance from an empty
        // starting point.
        Ok(vec![
            TreasuryEvent::TreasuryOpened(TreasuryOpened {
                treasury_id: cmd.treasury_id,
                name: cmd.name.clone(),
                kind: cmd.kind,
                company_id: cmd.company_id,
                bank: cmd.bank.clone(),
                opening_balance: cmd.opening_balance,
                occurred_at: cmd.occurred_at,
            }),
            TreasuryEvent::FundsDeposited(FundsDeposited {
                treasury_id: cmd.treasury_id,
                kind: TransactionKind::Deposit,
                source: TransactionSource::OpeningBalance,
                amount: cmd.opening_balance,
                balance_after: cmd.opening_balance,
                description: None,
                reference: None,
                recorded_by: None,
                occurred_at: cmd.occurred_at,
            }),
        ])
    }

    fn handle_deposit(&self, cmd: &RecordDeposit) -> Result<Vec<TreasuryEvent>, DomainError> {
        self.ensure_open(cmd.treasury_id)?;

        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::invalid_argument("amount must be positive"));
        }

        let kind = match cmd.source {
            TransactionSource::TransferIn => TransactionKind::Transfer,
            TransactionSource::TransferOut | TransactionSource::OpeningBalance => {
                return Err(DomainError::invalid_argument(
                    "source is not valid for a deposit",
                ));
            }
            _ => TransactionKind::Deposit,
        };

        Ok(vec![TreasuryEvent::FundsDeposited(FundsDeposited {
            treasury_id: cmd.treasury_id,
            kind,
            source: cmd.source,
            amount: cmd.amount,
            balance_after: self.balance + cmd.amount,
            description: cmd.description.clone(),
            reference: cmd.reference,
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_withdraw(&self, cmd: &RecordWithdrawal) -> Result<Vec<TreasuryEvent>, DomainError> {
        self.ensure_open(cmd.treasury_id)?;

        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::invalid_argument("amount must be positive"));
        }

        let kind = match cmd.source {
            TransactionSource::TransferOut => TransactionKind::Transfer,
            TransactionSource::TransferIn | TransactionSource::OpeningBalance => {
                return Err(DomainError::invalid_argument(
                    "source is not valid for a withdrawal",
                ));
            }
            _ => TransactionKind::Withdrawal,
        };

        // No overdraft floor: the balance may go negative. Callers needing a
        // hard floor check `balance()` before issuing the command.
        Ok(vec![TreasuryEvent::FundsWithdrawn(FundsWithdrawn {
            treasury_id: cmd.treasury_id,
            kind,
            source: cmd.source,
            amount: cmd.amount,
            balance_after: self.balance - cmd.amount,
            description: cmd.description.clone(),
            reference: cmd.reference,
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(
        &self,
        cmd: &DeactivateTreasury,
    ) -> Result<Vec<TreasuryEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_treasury_id(cmd.treasury_id)?;

        if !self.is_active {
            return Err(DomainError::invalid_state("treasury is already deactivated"));
        }

        Ok(vec![TreasuryEvent::TreasuryDeactivated(TreasuryDeactivated {
            treasury_id: cmd.treasury_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
