//! `majolica-engine` — the settlement engine and its storage layer.
//!
//! The engine composes the pure domain aggregates (treasuries, receipts,
//! counterparty accounts) into the atomic units a settlement action needs:
//! one [`store::CommitUnit`] carries the balance movement, its transaction
//! row, the receipt/installment update and the account-ledger posting, and
//! the store applies it all or not at all.

pub mod engine;
pub mod query;
pub mod reconcile;
pub mod store;

pub use engine::{EngineError, SettlementEngine};
pub use query::{Pagination, StatementPage};
pub use reconcile::{AccountReconciliation, TreasuryReconciliation};
pub use store::{
    CommitUnit, InMemoryLedgerStore, LedgerStore, StoreError, StoredEvent, StreamAppend,
    UncommittedEvent,
};

#[cfg(test)]
mod integration_tests;
