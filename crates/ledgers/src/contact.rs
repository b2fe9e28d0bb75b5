//! Financial contacts: ad-hoc external parties outside the supplier/customer
//! registry, settled directly against a treasury via general receipts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use majolica_core::AggregateId;

/// Identifier of a financial contact.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinancialContactId(pub AggregateId);

impl FinancialContactId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for FinancialContactId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Derived totals for a financial contact, folded from its general-receipt
/// history. Read-mostly; rebuilt on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactBalance {
    pub contact_id: FinancialContactId,
    pub total_deposit: Decimal,
    pub total_withdrawal: Decimal,
    /// `total_deposit - total_withdrawal`: what the business currently holds
    /// for (positive) or has advanced to (negative) the contact.
    pub current_balance: Decimal,
    pub receipt_count: u64,
}

impl ContactBalance {
    pub fn new(contact_id: FinancialContactId) -> Self {
        Self {
            contact_id,
            total_deposit: Decimal::ZERO,
            total_withdrawal: Decimal::ZERO,
            current_balance: Decimal::ZERO,
            receipt_count: 0,
        }
    }

    pub fn record_deposit(&mut self, amount: Decimal) {
        self.total_deposit += amount;
        self.current_balance += amount;
        self.receipt_count += 1;
    }

    pub fn record_withdrawal(&mut self, amount: Decimal) {
        self.total_withdrawal += amount;
        self.current_balance -= amount;
        self.receipt_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn totals_and_balance_track_receipts() {
        let mut balance = ContactBalance::new(FinancialContactId::new(AggregateId::new()));
        balance.record_deposit(dec!(400));
        balance.record_deposit(dec!(100));
        balance.record_withdrawal(dec!(150));

        assert_eq!(balance.total_deposit, dec!(500));
        assert_eq!(balance.total_withdrawal, dec!(150));
        assert_eq!(balance.current_balance, dec!(350));
        assert_eq!(balance.receipt_count, 3);
    }
}
