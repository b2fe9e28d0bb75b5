//! `majolica-treasury` — the treasury ledger domain model.
//!
//! A [`Treasury`] is a named money pool (cash drawer, bank account) whose
//! event stream is its append-only transaction log. Deposits and withdrawals
//! are the only legal way to change a balance; every movement event carries a
//! `balance_after` snapshot so the stream replays to the cached balance
//! exactly.

pub mod transaction;
pub mod treasury;

pub use transaction::{
    SourceRef, TransactionKind, TransactionSource, TransferId, TreasuryTransaction,
};
pub use treasury::{
    BankDetails, DeactivateTreasury, FundsDeposited, FundsWithdrawn, OpenTreasury, RecordDeposit,
    RecordWithdrawal, Treasury, TreasuryCommand, TreasuryDeactivated, TreasuryEvent, TreasuryId,
    TreasuryKind, TreasuryOpened,
};
