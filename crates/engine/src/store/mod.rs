//! Append-only ledger store boundary.
//!
//! This module defines an infrastructure-facing abstraction for storing and
//! loading the engine's event streams without making any storage assumptions.
//! Unlike a plain per-stream event store, a commit here may span **several**
//! streams (treasury + receipt + account ledger) and is applied atomically.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use r#trait::{CommitUnit, LedgerStore, StoreError, StoredEvent, StreamAppend, UncommittedEvent};
