//! `majolica-ledgers` — running-balance account ledgers for counterparties
//! and ad-hoc financial contacts.
//!
//! A [`CounterpartyAccount`] is an append-only prefix-sum sequence: every
//! appended entry stores the running balance it produced, so the latest entry
//! *is* the account balance and the full sequence is its own audit trail.
//! Corrections are new `Adjustment` entries, never edits.

pub mod account;
pub mod contact;

pub use account::{
    AccountSummary, AppendEntry, CounterpartyAccount, CounterpartyAccountCommand,
    CounterpartyAccountEvent, CounterpartyId, CounterpartyRef, CounterpartyRole, EntryAppended,
    EntryDirection, LedgerEntry, ReferenceKind, signed_delta,
};
pub use contact::{ContactBalance, FinancialContactId};
