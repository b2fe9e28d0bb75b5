use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use majolica_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use majolica_events::Event;

/// Counterparty identifier (supplier or customer; aggregate id of their
/// account ledger).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterpartyId(pub AggregateId);

impl CounterpartyId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CounterpartyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Which side of the business a counterparty sits on. Determines the sign
/// convention of its running balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterpartyRole {
    Supplier,
    Customer,
}

/// Counterparty reference carried by receipts and ledger commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartyRef {
    pub id: CounterpartyId,
    pub role: CounterpartyRole,
}

/// Posting direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    Debit,
    Credit,
}

/// What kind of record a ledger entry references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Sale,
    Purchase,
    Payment,
    Adjustment,
    Return,
}

/// Signed balance delta of a posting.
///
/// Customer balances grow on debit (they owe the business more); supplier
/// balances grow on credit (the business owes the supplier more).
pub fn signed_delta(role: CounterpartyRole, direction: EntryDirection, amount: Decimal) -> Decimal {
    match (role, direction) {
        (CounterpartyRole::Customer, EntryDirection::Debit) => amount,
        (CounterpartyRole::Customer, EntryDirection::Credit) => -amount,
        (CounterpartyRole::Supplier, EntryDirection::Debit) => -amount,
        (CounterpartyRole::Supplier, EntryDirection::Credit) => amount,
    }
}

/// One posting in a counterparty's running account (immutable once created).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub counterparty_id: CounterpartyId,
    pub direction: EntryDirection,
    pub amount: Decimal,
    /// Running balance after this entry: previous balance plus the signed
    /// amount. Stored, never recomputed from a separate field.
    pub balance: Decimal,
    pub reference_kind: ReferenceKind,
    pub reference_id: Uuid,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregated per-counterparty row for dashboard listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub counterparty_id: CounterpartyId,
    pub role: CounterpartyRole,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub balance: Decimal,
    pub entry_count: u64,
}

/// Aggregate root: CounterpartyAccount.
///
/// Created implicitly by its first entry; there is no separate "open account"
/// step. The stream of `EntryAppended` events is the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterpartyAccount {
    id: CounterpartyId,
    role: Option<CounterpartyRole>,
    balance: Decimal,
    total_debit: Decimal,
    total_credit: Decimal,
    entry_count: u64,
    version: u64,
}

impl CounterpartyAccount {
    /// Empty aggregate for rehydration.
    pub fn empty(id: CounterpartyId) -> Self {
        Self {
            id,
            role: None,
            balance: Decimal::ZERO,
            total_debit: Decimal::ZERO,
            total_credit: Decimal::ZERO,
            entry_count: 0,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> CounterpartyId {
        self.id
    }

    pub fn role(&self) -> Option<CounterpartyRole> {
        self.role
    }

    /// Latest stored running balance; zero for an account with no entries.
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn total_debit(&self) -> Decimal {
        self.total_debit
    }

    pub fn total_credit(&self) -> Decimal {
        self.total_credit
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Dashboard row for this account, `None` while the account has no
    /// postings.
    pub fn summary(&self) -> Option<AccountSummary> {
        let role = self.role?;
        Some(AccountSummary {
            counterparty_id: self.id,
            role,
            total_debit: self.total_debit,
            total_credit: self.total_credit,
            balance: self.balance,
            entry_count: self.entry_count,
        })
    }
}

impl AggregateRoot for CounterpartyAccount {
    type Id = CounterpartyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AppendEntry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntry {
    pub counterparty: CounterpartyRef,
    pub entry_id: Uuid,
    pub direction: EntryDirection,
    pub amount: Decimal,
    pub reference_kind: ReferenceKind,
    pub reference_id: Uuid,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterpartyAccountCommand {
    AppendEntry(AppendEntry),
}

/// Event: EntryAppended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryAppended {
    pub counterparty: CounterpartyRef,
    pub entry_id: Uuid,
    pub direction: EntryDirection,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub new_total_debit: Decimal,
    pub new_total_credit: Decimal,
    pub reference_kind: ReferenceKind,
    pub reference_id: Uuid,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl EntryAppended {
    pub fn to_entry(&self) -> LedgerEntry {
        LedgerEntry {
            id: self.entry_id,
            counterparty_id: self.counterparty.id,
            direction: self.direction,
            amount: self.amount,
            balance: self.balance_after,
            reference_kind: self.reference_kind,
            reference_id: self.reference_id,
            description: self.description.clone(),
            created_at: self.occurred_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterpartyAccountEvent {
    EntryAppended(EntryAppended),
}

impl Event for CounterpartyAccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CounterpartyAccountEvent::EntryAppended(_) => "ledgers.account.entry_appended",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CounterpartyAccountEvent::EntryAppended(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CounterpartyAccount {
    type Command = CounterpartyAccountCommand;
    type Event = CounterpartyAccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CounterpartyAccountEvent::EntryAppended(e) => {
                self.id = e.counterparty.id;
                self.role = Some(e.counterparty.role);
                self.balance = e.balance_after;
                self.total_debit = e.new_total_debit;
                self.total_credit = e.new_total_credit;
                self.entry_count += 1;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CounterpartyAccountCommand::AppendEntry(cmd) => self.handle_append(cmd),
        }
    }
}

impl CounterpartyAccount {
    fn handle_append(&self, cmd: &AppendEntry) -> Result<Vec<CounterpartyAccountEvent>, DomainError> {
        if cmd.counterparty.id != self.id {
            return Err(DomainError::invalid_state("counterparty_id mismatch"));
        }

        if let Some(role) = self.role {
            if role != cmd.counterparty.role {
                return Err(DomainError::invalid_state(
                    "counterparty role does not match the account's recorded role",
                ));
            }
        }

        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::invalid_argument("amount must be positive"));
        }

        let delta = signed_delta(cmd.counterparty.role, cmd.direction, cmd.amount);
        let (new_total_debit, new_total_credit) = match cmd.direction {
            EntryDirection::Debit => (self.total_debit + cmd.amount, self.total_credit),
            EntryDirection::Credit => (self.total_debit, self.total_credit + cmd.amount),
        };

        Ok(vec![CounterpartyAccountEvent::EntryAppended(EntryAppended {
            counterparty: cmd.counterparty,
            entry_id: cmd.entry_id,
            direction: cmd.direction,
            amount: cmd.amount,
            balance_after: self.balance + delta,
            new_total_debit,
            new_total_credit,
            reference_kind: cmd.reference_kind,
            reference_id: cmd.reference_id,
            description: cmd.description.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use majolica_core::AggregateId;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_counterparty(role: CounterpartyRole) -> CounterpartyRef {
        CounterpartyRef {
            id: CounterpartyId::new(AggregateId::new()),
            role,
        }
    }

    fn append_cmd(
        counterparty: CounterpartyRef,
        direction: EntryDirection,
        amount: Decimal,
        reference_kind: ReferenceKind,
    ) -> CounterpartyAccountCommand {
        CounterpartyAccountCommand::AppendEntry(AppendEntry {
            counterparty,
            entry_id: Uuid::now_v7(),
            direction,
            amount,
            reference_kind,
            reference_id: Uuid::now_v7(),
            description: None,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn customer_debits_raise_and_credits_lower_the_balance() {
        let counterparty = test_counterparty(CounterpartyRole::Customer);
        let mut account = CounterpartyAccount::empty(counterparty.id);

        let events = account
            .handle(&append_cmd(counterparty, EntryDirection::Debit, dec!(800), ReferenceKind::Sale))
            .unwrap();
        account.apply(&events[0]);
        assert_eq!(account.balance(), dec!(800));

        let events = account
            .handle(&append_cmd(counterparty, EntryDirection::Credit, dec!(300), ReferenceKind::Payment))
            .unwrap();
        account.apply(&events[0]);
        assert_eq!(account.balance(), dec!(500));
        assert_eq!(account.total_debit(), dec!(800));
        assert_eq!(account.total_credit(), dec!(300));
    }

    #[test]
    fn supplier_balance_uses_the_converse_signs() {
        let counterparty = test_counterparty(CounterpartyRole::Supplier);
        let mut account = CounterpartyAccount::empty(counterparty.id);

        // A purchase credits the supplier's account: the business owes more.
        let events = account
            .handle(&append_cmd(counterparty, EntryDirection::Credit, dec!(900), ReferenceKind::Purchase))
            .unwrap();
        account.apply(&events[0]);
        assert_eq!(account.balance(), dec!(900));

        // A payment debits it back down.
        let events = account
            .handle(&append_cmd(counterparty, EntryDirection::Debit, dec!(900), ReferenceKind::Payment))
            .unwrap();
        account.apply(&events[0]);
        assert_eq!(account.balance(), dec!(0));
    }

    #[test]
    fn role_changes_are_rejected() {
        let counterparty = test_counterparty(CounterpartyRole::Customer);
        let mut account = CounterpartyAccount::empty(counterparty.id);
        let events = account
            .handle(&append_cmd(counterparty, EntryDirection::Debit, dec!(10), ReferenceKind::Sale))
            .unwrap();
        account.apply(&events[0]);

        let flipped = CounterpartyRef {
            id: counterparty.id,
            role: CounterpartyRole::Supplier,
        };
        let err = account
            .handle(&append_cmd(flipped, EntryDirection::Debit, dec!(10), ReferenceKind::Purchase))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let counterparty = test_counterparty(CounterpartyRole::Customer);
        let account = CounterpartyAccount::empty(counterparty.id);
        let err = account
            .handle(&append_cmd(counterparty, EntryDirection::Debit, dec!(0), ReferenceKind::Sale))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
    }

    #[test]
    fn summary_reports_totals_and_balance() {
        let counterparty = test_counterparty(CounterpartyRole::Customer);
        let mut account = CounterpartyAccount::empty(counterparty.id);
        assert!(account.summary().is_none());

        for (direction, amount) in [
            (EntryDirection::Debit, dec!(100)),
            (EntryDirection::Debit, dec!(50)),
            (EntryDirection::Credit, dec!(30)),
        ] {
            let events = account
                .handle(&append_cmd(counterparty, direction, amount, ReferenceKind::Adjustment))
                .unwrap();
            account.apply(&events[0]);
        }

        let summary = account.summary().unwrap();
        assert_eq!(summary.total_debit, dec!(150));
        assert_eq!(summary.total_credit, dec!(30));
        assert_eq!(summary.balance, dec!(120));
        assert_eq!(summary.entry_count, 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: entries form a prefix-sum sequence. Every appended
        /// entry's stored balance equals the previous balance plus its
        /// signed amount, for both counterparty roles.
        #[test]
        fn entries_form_a_prefix_sum_sequence(
            is_supplier in any::<bool>(),
            postings in prop::collection::vec((any::<bool>(), 1i64..1_000_000i64), 1..30),
        ) {
            let role = if is_supplier {
                CounterpartyRole::Supplier
            } else {
                CounterpartyRole::Customer
            };
            let counterparty = test_counterparty(role);
            let mut account = CounterpartyAccount::empty(counterparty.id);
            let mut previous = Decimal::ZERO;

            for (is_debit, raw) in postings {
                let amount = Decimal::new(raw, 2);
                let direction = if is_debit {
                    EntryDirection::Debit
                } else {
                    EntryDirection::Credit
                };
                let events = account
                    .handle(&append_cmd(counterparty, direction, amount, ReferenceKind::Adjustment))
                    .unwrap();
                let CounterpartyAccountEvent::EntryAppended(e) = &events[0];
                prop_assert_eq!(
                    e.balance_after,
                    previous + signed_delta(role, direction, amount)
                );
                previous = e.balance_after;
                account.apply(&events[0]);
            }

            prop_assert_eq!(account.balance(), previous);
        }
    }
}
