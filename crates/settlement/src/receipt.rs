use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use majolica_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use majolica_events::Event;
use majolica_fx::{CurrencyCode, ExchangeRate, to_base};
use majolica_ledgers::CounterpartyRef;
use majolica_treasury::TreasuryId;

/// Payment receipt identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptId(pub AggregateId);

impl ReceiptId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of one installment against a receipt.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallmentId(Uuid);

impl InstallmentId {
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

impl Default for InstallmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for InstallmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Reference to a purchase document owned by the purchasing module; the
/// settlement engine only records the link.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseId(Uuid);

impl PurchaseId {
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

impl Default for PurchaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PurchaseId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Receipt category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    MainPurchase,
    Expense,
    Return,
}

/// Receipt status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Paid,
    Cancelled,
}

/// How an installment was paid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Cheque,
    BankTransfer,
    Card,
}

/// One settled partial payment against a receipt (immutable once created).
///
/// `exchange_rate` is the rate used for **this** installment; it may differ
/// from the receipt's nominal rate. `base_amount` is what was actually
/// withdrawn from the treasury.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInstallment {
    pub id: InstallmentId,
    pub receipt_id: ReceiptId,
    /// Amount in the receipt's original currency.
    pub amount: Decimal,
    pub exchange_rate: Option<ExchangeRate>,
    pub base_amount: Decimal,
    pub treasury_id: TreasuryId,
    pub method: Option<PaymentMethod>,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate root: PaymentReceipt.
///
/// Created `Pending` with no treasury movement (the obligation exists before
/// any cash moves). `paid + remaining == total` holds after every applied
/// event; status is `Paid` iff `remaining == 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    id: ReceiptId,
    counterparty: Option<CounterpartyRef>,
    purchase_id: Option<PurchaseId>,
    kind: ReceiptKind,
    currency: Option<CurrencyCode>,
    exchange_rate: Option<ExchangeRate>,
    total: Decimal,
    base_total: Decimal,
    paid: Decimal,
    remaining: Decimal,
    base_paid: Decimal,
    status: ReceiptStatus,
    notes: Option<String>,
    installments: Vec<PaymentInstallment>,
    created_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PaymentReceipt {
    /// Empty aggregate for rehydration.
    pub fn empty(id: ReceiptId) -> Self {
        Self {
            id,
            counterparty: None,
            purchase_id: None,
            kind: ReceiptKind::MainPurchase,
            currency: None,
            exchange_rate: None,
            total: Decimal::ZERO,
            base_total: Decimal::ZERO,
            paid: Decimal::ZERO,
            remaining: Decimal::ZERO,
            base_paid: Decimal::ZERO,
            status: ReceiptStatus::Pending,
            notes: None,
            installments: Vec::new(),
            created_at: None,
            paid_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReceiptId {
        self.id
    }

    pub fn counterparty(&self) -> Option<CounterpartyRef> {
        self.counterparty
    }

    pub fn purchase_id(&self) -> Option<PurchaseId> {
        self.purchase_id
    }

    pub fn kind(&self) -> ReceiptKind {
        self.kind
    }

    pub fn currency(&self) -> Option<&CurrencyCode> {
        self.currency.as_ref()
    }

    /// The nominal rate fixed at creation; `None` for base-currency receipts.
    pub fn exchange_rate(&self) -> Option<ExchangeRate> {
        self.exchange_rate
    }

    /// Total obligation in the receipt's original currency.
    pub fn total(&self) -> Decimal {
        self.total
    }

    /// Nominal base-currency total priced at the creation-time rate.
    pub fn base_total(&self) -> Decimal {
        self.base_total
    }

    pub fn paid(&self) -> Decimal {
        self.paid
    }

    pub fn remaining(&self) -> Decimal {
        self.remaining
    }

    /// Base currency actually withdrawn across installments. Can diverge from
    /// `base_total` when installment rates differ from the nominal rate.
    pub fn base_paid(&self) -> Decimal {
        self.base_paid
    }

    pub fn status(&self) -> ReceiptStatus {
        self.status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn installments(&self) -> &[PaymentInstallment] {
        &self.installments
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    fn is_foreign(&self) -> bool {
        self.exchange_rate.is_some()
    }
}

impl AggregateRoot for PaymentReceipt {
    type Id = ReceiptId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateReceipt.
///
/// `base_currency` is the engine's configured base; the command carries it so
/// the aggregate can decide whether an exchange rate is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReceipt {
    pub receipt_id: ReceiptId,
    pub counterparty: CounterpartyRef,
    pub purchase_id: Option<PurchaseId>,
    pub kind: ReceiptKind,
    pub total: Decimal,
    pub currency: CurrencyCode,
    pub exchange_rate: Option<ExchangeRate>,
    pub base_currency: CurrencyCode,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddInstallment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddInstallment {
    pub receipt_id: ReceiptId,
    pub installment_id: InstallmentId,
    /// Amount in the receipt's original currency.
    pub amount: Decimal,
    /// Required for foreign-currency receipts; must be absent for
    /// base-currency ones.
    pub exchange_rate: Option<ExchangeRate>,
    pub treasury_id: TreasuryId,
    pub method: Option<PaymentMethod>,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelReceipt (pending and unpaid only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReceipt {
    pub receipt_id: ReceiptId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptCommand {
    CreateReceipt(CreateReceipt),
    AddInstallment(AddInstallment),
    CancelReceipt(CancelReceipt),
}

/// Event: ReceiptCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptCreated {
    pub receipt_id: ReceiptId,
    pub counterparty: CounterpartyRef,
    pub purchase_id: Option<PurchaseId>,
    pub kind: ReceiptKind,
    pub total: Decimal,
    pub currency: CurrencyCode,
    pub exchange_rate: Option<ExchangeRate>,
    pub base_total: Decimal,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InstallmentAdded.
///
/// Carries the post-settlement snapshots (`new_paid`, `new_remaining`,
/// `new_base_paid`) so replay reconstructs the receipt exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentAdded {
    pub receipt_id: ReceiptId,
    pub installment_id: InstallmentId,
    pub amount: Decimal,
    pub exchange_rate: Option<ExchangeRate>,
    pub base_amount: Decimal,
    pub new_paid: Decimal,
    pub new_remaining: Decimal,
    pub new_base_paid: Decimal,
    pub treasury_id: TreasuryId,
    pub method: Option<PaymentMethod>,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptSettled.
///
/// Emitted together with the terminal installment; this is the "receipt paid"
/// integration event external modules subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSettled {
    pub receipt_id: ReceiptId,
    pub counterparty: CounterpartyRef,
    pub total: Decimal,
    pub base_total: Decimal,
    pub base_paid: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptCancelled {
    pub receipt_id: ReceiptId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptEvent {
    ReceiptCreated(ReceiptCreated),
    InstallmentAdded(InstallmentAdded),
    ReceiptSettled(ReceiptSettled),
    ReceiptCancelled(ReceiptCancelled),
}

impl Event for ReceiptEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReceiptEvent::ReceiptCreated(_) => "settlement.receipt.created",
            ReceiptEvent::InstallmentAdded(_) => "settlement.receipt.installment_added",
            ReceiptEvent::ReceiptSettled(_) => "settlement.receipt.settled",
            ReceiptEvent::ReceiptCancelled(_) => "settlement.receipt.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReceiptEvent::ReceiptCreated(e) => e.occurred_at,
            ReceiptEvent::InstallmentAdded(e) => e.occurred_at,
            ReceiptEvent::ReceiptSettled(e) => e.occurred_at,
            ReceiptEvent::ReceiptCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PaymentReceipt {
    type Command = ReceiptCommand;
    type Event = ReceiptEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReceiptEvent::ReceiptCreated(e) => {
                self.id = e.receipt_id;
                self.counterparty = Some(e.counterparty);
                self.purchase_id = e.purchase_id;
                self.kind = e.kind;
                self.currency = Some(e.currency.clone());
                self.exchange_rate = e.exchange_rate;
                self.total = e.total;
                self.base_total = e.base_total;
                self.paid = Decimal::ZERO;
                self.remaining = e.total;
                self.base_paid = Decimal::ZERO;
                self.status = ReceiptStatus::Pending;
                self.notes = e.notes.clone();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ReceiptEvent::InstallmentAdded(e) => {
                self.paid = e.new_paid;
                self.remaining = e.new_remaining;
                self.base_paid = e.new_base_paid;
                self.installments.push(PaymentInstallment {
                    id: e.installment_id,
                    receipt_id: e.receipt_id,
                    amount: e.amount,
                    exchange_rate: e.exchange_rate,
                    base_amount: e.base_amount,
                    treasury_id: e.treasury_id,
                    method: e.method,
                    reference_number: e.reference_number.clone(),
                    notes: e.notes.clone(),
                    created_at: e.occurred_at,
                });
            }
            ReceiptEvent::ReceiptSettled(e) => {
                self.status = ReceiptStatus::Paid;
                self.paid_at = Some(e.occurred_at);
            }
            ReceiptEvent::ReceiptCancelled(_) => {
                self.status = ReceiptStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReceiptCommand::CreateReceipt(cmd) => self.handle_create(cmd),
            ReceiptCommand::AddInstallment(cmd) => self.handle_add_installment(cmd),
            ReceiptCommand::CancelReceipt(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PaymentReceipt {
    fn ensure_receipt_id(&self, receipt_id: ReceiptId) -> Result<(), DomainError> {
        if self.id != receipt_id {
            return Err(DomainError::invalid_state("receipt_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("receipt already exists"));
        }

        if cmd.total <= Decimal::ZERO {
            return Err(DomainError::invalid_argument("total must be positive"));
        }

        let base_total = if cmd.currency == cmd.base_currency {
            if cmd.exchange_rate.is_some() {
                return Err(DomainError::invalid_argument(
                    "exchange rate only applies to foreign-currency receipts",
                ));
            }
            cmd.total
        } else {
            let rate = cmd.exchange_rate.ok_or_else(|| {
                DomainError::invalid_argument(
                    "exchange rate is required for foreign-currency receipts",
                )
            })?;
            to_base(cmd.total, rate)
        };

        Ok(vec![ReceiptEvent::ReceiptCreated(ReceiptCreated {
            receipt_id: cmd.receipt_id,
            counterparty: cmd.counterparty,
            purchase_id: cmd.purchase_id,
            kind: cmd.kind,
            total: cmd.total,
            currency: cmd.currency.clone(),
            exchange_rate: cmd.exchange_rate,
            base_total,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_installment(
        &self,
        cmd: &AddInstallment,
    ) -> Result<Vec<ReceiptEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_receipt_id(cmd.receipt_id)?;

        match self.status {
            ReceiptStatus::Pending => {}
            ReceiptStatus::Paid => {
                return Err(DomainError::invalid_state("receipt is already fully paid"));
            }
            ReceiptStatus::Cancelled => {
                return Err(DomainError::invalid_state(
                    "cancelled receipts accept no further installments",
                ));
            }
        }

        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::invalid_argument("amount must be positive"));
        }

        if cmd.amount > self.remaining {
            return Err(DomainError::invalid_state(format!(
                "installment amount {} exceeds remaining balance {}",
                cmd.amount, self.remaining
            )));
        }

        // Each installment converts at its own rate. The treasury withdrawal
        // uses this rate, not the receipt's nominal one, so `base_paid` can
        // drift from `base_total` across a settlement.
        let base_amount = if self.is_foreign() {
            let rate = cmd.exchange_rate.ok_or_else(|| {
                DomainError::invalid_argument(
                    "exchange rate is required for installments on foreign-currency receipts",
                )
            })?;
            to_base(cmd.amount, rate)
        } else {
            if cmd.exchange_rate.is_some() {
                return Err(DomainError::invalid_argument(
                    "exchange rate only applies to foreign-currency receipts",
                ));
            }
            cmd.amount
        };

        let counterparty = self
            .counterparty
            .ok_or_else(|| DomainError::invalid_state("receipt has no counterparty"))?;

        let new_paid = self.paid + cmd.amount;
        let new_remaining = self.remaining - cmd.amount;
        let new_base_paid = self.base_paid + base_amount;

        let mut events = vec![ReceiptEvent::InstallmentAdded(InstallmentAdded {
            receipt_id: cmd.receipt_id,
            installment_id: cmd.installment_id,
            amount: cmd.amount,
            exchange_rate: cmd.exchange_rate,
            base_amount,
            new_paid,
            new_remaining,
            new_base_paid,
            treasury_id: cmd.treasury_id,
            method: cmd.method,
            reference_number: cmd.reference_number.clone(),
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })];

        if new_remaining == Decimal::ZERO {
            events.push(ReceiptEvent::ReceiptSettled(ReceiptSettled {
                receipt_id: cmd.receipt_id,
                counterparty,
                total: self.total,
                base_total: self.base_total,
                base_paid: new_base_paid,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_cancel(&self, cmd: &CancelReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_receipt_id(cmd.receipt_id)?;

        match self.status {
            ReceiptStatus::Pending => {}
            ReceiptStatus::Paid => {
                return Err(DomainError::invalid_state("cannot cancel a paid receipt"));
            }
            ReceiptStatus::Cancelled => {
                return Err(DomainError::invalid_state("receipt is already cancelled"));
            }
        }

        // There is no reversal path for treasury postings, so a receipt with
        // recorded installments cannot be cancelled.
        if self.paid > Decimal::ZERO {
            return Err(DomainError::invalid_state(
                "cannot cancel a receipt with recorded installments",
            ));
        }

        Ok(vec![ReceiptEvent::ReceiptCancelled(ReceiptCancelled {
            receipt_id: cmd.receipt_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
