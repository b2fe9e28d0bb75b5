//! Replay-based reconciliation.
//!
//! Balances are caches over append-only logs; these audits replay the logs
//! and check every snapshot along the way. Used by tests and by operators
//! when a ledger is suspected of drifting.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::instrument;

use majolica_events::{EventBus, EventEnvelope};
use majolica_ledgers::{CounterpartyAccountEvent, CounterpartyId, signed_delta};
use majolica_treasury::{TreasuryEvent, TreasuryId};

use crate::engine::{EngineError, SettlementEngine};
use crate::store::LedgerStore;

/// Result of replaying a treasury's transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryReconciliation {
    pub treasury_id: TreasuryId,
    /// Balance cached on the treasury row.
    pub cached_balance: Decimal,
    /// Balance recomputed by replaying every transaction in creation order.
    pub replayed_balance: Decimal,
    pub transaction_count: u64,
    /// Sequence numbers whose `balance_after` snapshot did not chain from
    /// the running replay.
    pub mismatched_sequences: Vec<u64>,
}

impl TreasuryReconciliation {
    pub fn is_consistent(&self) -> bool {
        self.mismatched_sequences.is_empty() && self.cached_balance == self.replayed_balance
    }
}

/// Result of replaying a counterparty account's entry sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountReconciliation {
    pub counterparty_id: CounterpartyId,
    pub cached_balance: Decimal,
    pub replayed_balance: Decimal,
    pub entry_count: u64,
    pub mismatched_sequences: Vec<u64>,
}

impl AccountReconciliation {
    pub fn is_consistent(&self) -> bool {
        self.mismatched_sequences.is_empty() && self.cached_balance == self.replayed_balance
    }
}

impl<S, B> SettlementEngine<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Replay a treasury's transaction log and check it against the cached
    /// balance and every `balance_after` snapshot.
    #[instrument(skip(self), fields(%treasury_id), err)]
    pub fn reconcile_treasury(
        &self,
        treasury_id: TreasuryId,
    ) -> Result<TreasuryReconciliation, EngineError> {
        let treasury = self.get_treasury(treasury_id)?;
        let history = self.store.load_stream(treasury_id.0)?;

        let mut running = Decimal::ZERO;
        let mut count = 0u64;
        let mut mismatched = Vec::new();

        for stored in &history {
            let ev: TreasuryEvent = serde_json::from_value(stored.payload.clone())
                .map_err(|e| EngineError::Deserialize(e.to_string()))?;
            let (signed, snapshot) = match ev {
                TreasuryEvent::FundsDeposited(d) => (d.amount, d.balance_after),
                TreasuryEvent::FundsWithdrawn(w) => (-w.amount, w.balance_after),
                _ => continue,
            };

            running += signed;
            count += 1;
            if snapshot != running {
                mismatched.push(stored.sequence_number);
            }
        }

        Ok(TreasuryReconciliation {
            treasury_id,
            cached_balance: treasury.balance(),
            replayed_balance: running,
            transaction_count: count,
            mismatched_sequences: mismatched,
        })
    }

    /// Replay a counterparty account and check the prefix-sum chain.
    #[instrument(skip(self), fields(%counterparty_id), err)]
    pub fn reconcile_account(
        &self,
        counterparty_id: CounterpartyId,
    ) -> Result<AccountReconciliation, EngineError> {
        let (account, _) = self.load_account(counterparty_id)?;
        let history = self.store.load_stream(counterparty_id.0)?;

        let mut running = Decimal::ZERO;
        let mut count = 0u64;
        let mut mismatched = Vec::new();

        for stored in &history {
            let ev: CounterpartyAccountEvent = serde_json::from_value(stored.payload.clone())
                .map_err(|e| EngineError::Deserialize(e.to_string()))?;
            let CounterpartyAccountEvent::EntryAppended(e) = ev;

            running += signed_delta(e.counterparty.role, e.direction, e.amount);
            count += 1;
            if e.balance_after != running {
                mismatched.push(stored.sequence_number);
            }
        }

        Ok(AccountReconciliation {
            counterparty_id,
            cached_balance: account.balance(),
            replayed_balance: running,
            entry_count: count,
            mismatched_sequences: mismatched,
        })
    }
}
