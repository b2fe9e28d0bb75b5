//! End-to-end tests for the settlement engine.
//!
//! Operation → atomic commit → event bus → reads. Verifies the ledger
//! invariants (replay, prefix sums, receipt arithmetic), the no-partial-write
//! guarantee, and serialization of contended treasuries.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value as JsonValue;

use majolica_core::{AggregateId, UserId};
use majolica_events::{EventBus, EventEnvelope, InMemoryEventBus};
use majolica_fx::{CurrencyCode, ExchangeRate};
use majolica_ledgers::{
    CounterpartyId, CounterpartyRef, CounterpartyRole, EntryDirection, FinancialContactId,
    ReferenceKind,
};
use majolica_settlement::{
    GeneralReceiptKind, PaymentMethod, ReceiptEvent, ReceiptKind, ReceiptStatus,
};
use majolica_treasury::{
    SourceRef, TransactionKind, TransactionSource, TreasuryId, TreasuryKind,
};

use crate::engine::{EngineError, SettlementEngine};
use crate::query::Pagination;
use crate::store::InMemoryLedgerStore;

type TestEngine = SettlementEngine<Arc<InMemoryLedgerStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

fn base() -> CurrencyCode {
    CurrencyCode::new("LYD").unwrap()
}

fn usd() -> CurrencyCode {
    CurrencyCode::new("USD").unwrap()
}

fn setup() -> TestEngine {
    majolica_observability::init();
    let store = Arc::new(InMemoryLedgerStore::new());
    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
    SettlementEngine::new(store, bus, base())
}

fn open_treasury(engine: &TestEngine, opening: Decimal) -> TreasuryId {
    engine
        .open_treasury("Main cash", TreasuryKind::Company, None, None, opening)
        .unwrap()
        .id_typed()
}

fn supplier() -> CounterpartyRef {
    CounterpartyRef {
        id: CounterpartyId::new(AggregateId::new()),
        role: CounterpartyRole::Supplier,
    }
}

fn customer() -> CounterpartyRef {
    CounterpartyRef {
        id: CounterpartyId::new(AggregateId::new()),
        role: CounterpartyRole::Customer,
    }
}

#[test]
fn deposit_updates_balance_and_logs_one_transaction() {
    // Scenario: treasury opened with 1000, manual deposit of 500.
    let engine = setup();
    let treasury_id = open_treasury(&engine, dec!(1000));

    let actor = UserId::new();
    let tx = engine
        .deposit(treasury_id, dec!(500), TransactionSource::Manual, None, Some(actor))
        .unwrap();
    assert_eq!(tx.kind, TransactionKind::Deposit);
    assert_eq!(tx.balance_after, dec!(1500));
    assert_eq!(tx.recorded_by, Some(actor));

    let treasury = engine.get_treasury(treasury_id).unwrap();
    assert_eq!(treasury.balance(), dec!(1500));

    // Opening-balance transaction + the deposit.
    let log = engine.list_transactions(treasury_id).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].source, TransactionSource::OpeningBalance);
    assert_eq!(log[1].balance_after, dec!(1500));

    let audit = engine.reconcile_treasury(treasury_id).unwrap();
    assert!(audit.is_consistent());
}

#[test]
fn base_currency_receipt_settles_across_two_installments() {
    // Scenario: receipt of 900, installments of 300 and 600.
    let engine = setup();
    let treasury_id = open_treasury(&engine, dec!(2000));
    let counterparty = supplier();

    let receipt = engine
        .create_receipt(
            counterparty,
            None,
            ReceiptKind::MainPurchase,
            dec!(900),
            base(),
            None,
            None,
        )
        .unwrap();
    let receipt_id = receipt.id_typed();
    assert_eq!(receipt.status(), ReceiptStatus::Pending);
    assert_eq!(receipt.remaining(), dec!(900));

    engine
        .add_installment(receipt_id, dec!(300), treasury_id, None, Some(PaymentMethod::Cash), None, None)
        .unwrap();
    let receipt = engine.get_receipt(receipt_id).unwrap();
    assert_eq!(receipt.paid(), dec!(300));
    assert_eq!(receipt.remaining(), dec!(600));
    assert_eq!(receipt.status(), ReceiptStatus::Pending);

    engine
        .add_installment(receipt_id, dec!(600), treasury_id, None, Some(PaymentMethod::Cash), None, None)
        .unwrap();
    let receipt = engine.get_receipt(receipt_id).unwrap();
    assert_eq!(receipt.paid(), dec!(900));
    assert_eq!(receipt.remaining(), dec!(0));
    assert_eq!(receipt.status(), ReceiptStatus::Paid);
    assert!(receipt.paid_at().is_some());

    // The treasury was debited exactly 900 across the two installments.
    let treasury = engine.get_treasury(treasury_id).unwrap();
    assert_eq!(treasury.balance(), dec!(1100));

    // Both payments were posted to the supplier's account.
    let statement = engine.statement(counterparty.id).unwrap();
    assert_eq!(statement.len(), 2);
    assert!(statement.iter().all(|e| e.reference_kind == ReferenceKind::Payment));
    assert_eq!(engine.account_balance(counterparty.id).unwrap(), dec!(-900));
}

#[test]
fn installment_rates_may_diverge_from_the_nominal_rate() {
    // Scenario: 200 USD at nominal 5.0; installments at 5.0 and 5.2.
    let engine = setup();
    let treasury_id = open_treasury(&engine, dec!(5000));
    let counterparty = supplier();

    let receipt = engine
        .create_receipt(
            counterparty,
            None,
            ReceiptKind::MainPurchase,
            dec!(200),
            usd(),
            Some(ExchangeRate::new(dec!(5.0)).unwrap()),
            None,
        )
        .unwrap();
    let receipt_id = receipt.id_typed();
    assert_eq!(receipt.base_total(), dec!(1000.0));

    let first = engine
        .add_installment(
            receipt_id,
            dec!(100),
            treasury_id,
            Some(ExchangeRate::new(dec!(5.0)).unwrap()),
            None,
            None,
            None,
        )
        .unwrap();
    assert_eq!(first.base_amount, dec!(500.0));

    let second = engine
        .add_installment(
            receipt_id,
            dec!(100),
            treasury_id,
            Some(ExchangeRate::new(dec!(5.2)).unwrap()),
            None,
            None,
            None,
        )
        .unwrap();
    assert_eq!(second.base_amount, dec!(520.0));

    let receipt = engine.get_receipt(receipt_id).unwrap();
    assert_eq!(receipt.remaining(), dec!(0));
    assert_eq!(receipt.status(), ReceiptStatus::Paid);
    // Total base withdrawn (1020) diverges from the nominal 1000; expected,
    // since every installment converts at its own rate.
    assert_eq!(receipt.base_paid(), dec!(1020.0));
    assert_eq!(receipt.base_total(), dec!(1000.0));

    let treasury = engine.get_treasury(treasury_id).unwrap();
    assert_eq!(treasury.balance(), dec!(5000) - dec!(1020.0));

    assert!(engine.reconcile_treasury(treasury_id).unwrap().is_consistent());
    assert!(engine.reconcile_account(counterparty.id).unwrap().is_consistent());
}

#[test]
fn transfer_moves_funds_and_links_both_legs() {
    // Scenario: 300 from A (1000) to B (200).
    let engine = setup();
    let from = open_treasury(&engine, dec!(1000));
    let to = open_treasury(&engine, dec!(200));

    let (out_tx, in_tx) = engine.transfer(from, to, dec!(300), None).unwrap();

    assert_eq!(engine.get_treasury(from).unwrap().balance(), dec!(700));
    assert_eq!(engine.get_treasury(to).unwrap().balance(), dec!(500));

    assert_eq!(out_tx.kind, TransactionKind::Transfer);
    assert_eq!(out_tx.source, TransactionSource::TransferOut);
    assert_eq!(in_tx.kind, TransactionKind::Transfer);
    assert_eq!(in_tx.source, TransactionSource::TransferIn);

    // Exactly two new transactions, cross-referencing each other.
    let (out_transfer, out_counterpart) = match out_tx.reference {
        Some(SourceRef::Transfer { transfer_id, counterpart }) => (transfer_id, counterpart),
        other => panic!("Expected transfer reference, got {other:?}"),
    };
    let (in_transfer, in_counterpart) = match in_tx.reference {
        Some(SourceRef::Transfer { transfer_id, counterpart }) => (transfer_id, counterpart),
        other => panic!("Expected transfer reference, got {other:?}"),
    };
    assert_eq!(out_transfer, in_transfer);
    assert_eq!(out_counterpart, to);
    assert_eq!(in_counterpart, from);

    assert_eq!(engine.list_transactions(from).unwrap().len(), 2);
    assert_eq!(engine.list_transactions(to).unwrap().len(), 2);
}

#[test]
fn transfer_to_self_is_rejected() {
    let engine = setup();
    let treasury_id = open_treasury(&engine, dec!(100));

    let err = engine.transfer(treasury_id, treasury_id, dec!(10), None).unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
    assert_eq!(engine.get_treasury(treasury_id).unwrap().balance(), dec!(100));
}

#[test]
fn failed_transfer_leaves_neither_treasury_mutated() {
    let engine = setup();
    let from = open_treasury(&engine, dec!(1000));
    let missing = TreasuryId::new(AggregateId::new());

    let err = engine.transfer(from, missing, dec!(300), None).unwrap_err();
    assert!(matches!(err, EngineError::NotFound));

    assert_eq!(engine.get_treasury(from).unwrap().balance(), dec!(1000));
    assert_eq!(engine.list_transactions(from).unwrap().len(), 1);
}

#[test]
fn overdrawing_installment_is_rejected_with_no_effects() {
    // Scenario: remaining 30, attempted installment of 50.
    let engine = setup();
    let treasury_id = open_treasury(&engine, dec!(1000));
    let counterparty = supplier();

    let receipt = engine
        .create_receipt(counterparty, None, ReceiptKind::Expense, dec!(80), base(), None, None)
        .unwrap();
    let receipt_id = receipt.id_typed();
    engine
        .add_installment(receipt_id, dec!(50), treasury_id, None, None, None, None)
        .unwrap();

    let err = engine
        .add_installment(receipt_id, dec!(50), treasury_id, None, None, None, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    // No records created, balances unchanged.
    let receipt = engine.get_receipt(receipt_id).unwrap();
    assert_eq!(receipt.paid(), dec!(50));
    assert_eq!(receipt.remaining(), dec!(30));
    assert_eq!(receipt.installments().len(), 1);
    assert_eq!(engine.get_treasury(treasury_id).unwrap().balance(), dec!(950));
    assert_eq!(engine.list_transactions(treasury_id).unwrap().len(), 2);
    assert_eq!(engine.statement(counterparty.id).unwrap().len(), 1);
}

#[test]
fn installment_against_unknown_treasury_applies_nothing() {
    let engine = setup();
    let counterparty = supplier();
    let receipt = engine
        .create_receipt(counterparty, None, ReceiptKind::Expense, dec!(100), base(), None, None)
        .unwrap();
    let receipt_id = receipt.id_typed();

    let missing = TreasuryId::new(AggregateId::new());
    let err = engine
        .add_installment(receipt_id, dec!(40), missing, None, None, None, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound));

    // The receipt leg was decided but never committed.
    let receipt = engine.get_receipt(receipt_id).unwrap();
    assert_eq!(receipt.paid(), dec!(0));
    assert_eq!(receipt.installments().len(), 0);
    assert!(engine.statement(counterparty.id).unwrap().is_empty());
}

#[test]
fn pay_receipt_settles_the_full_remaining_amount() {
    let engine = setup();
    let treasury_id = open_treasury(&engine, dec!(1000));
    let counterparty = supplier();

    let receipt = engine
        .create_receipt(counterparty, None, ReceiptKind::MainPurchase, dec!(640), base(), None, None)
        .unwrap();
    let receipt_id = receipt.id_typed();
    engine
        .add_installment(receipt_id, dec!(140), treasury_id, None, None, None, None)
        .unwrap();

    let receipt = engine
        .pay_receipt(receipt_id, treasury_id, None, Some(PaymentMethod::BankTransfer), None)
        .unwrap();
    assert_eq!(receipt.status(), ReceiptStatus::Paid);
    assert_eq!(receipt.remaining(), dec!(0));
    assert_eq!(receipt.installments().len(), 2);

    // The full-settlement path still went through the treasury primitive.
    assert_eq!(engine.get_treasury(treasury_id).unwrap().balance(), dec!(360));

    let err = engine
        .pay_receipt(receipt_id, treasury_id, None, None, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[test]
fn cancel_is_only_legal_before_any_installment() {
    let engine = setup();
    let treasury_id = open_treasury(&engine, dec!(1000));
    let counterparty = supplier();

    let pristine = engine
        .create_receipt(counterparty, None, ReceiptKind::Expense, dec!(50), base(), None, None)
        .unwrap();
    let cancelled = engine
        .cancel_receipt(pristine.id_typed(), Some("duplicate entry".to_string()))
        .unwrap();
    assert_eq!(cancelled.status(), ReceiptStatus::Cancelled);

    let err = engine
        .add_installment(cancelled.id_typed(), dec!(10), treasury_id, None, None, None, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    let paid_some = engine
        .create_receipt(counterparty, None, ReceiptKind::Expense, dec!(50), base(), None, None)
        .unwrap();
    engine
        .add_installment(paid_some.id_typed(), dec!(20), treasury_id, None, None, None, None)
        .unwrap();
    let err = engine.cancel_receipt(paid_some.id_typed(), None).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[test]
fn foreign_receipts_require_rates_on_creation_and_settlement() {
    let engine = setup();
    let treasury_id = open_treasury(&engine, dec!(1000));
    let counterparty = supplier();

    let err = engine
        .create_receipt(counterparty, None, ReceiptKind::MainPurchase, dec!(100), usd(), None, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    let receipt = engine
        .create_receipt(
            counterparty,
            None,
            ReceiptKind::MainPurchase,
            dec!(100),
            usd(),
            Some(ExchangeRate::new(dec!(5)).unwrap()),
            None,
        )
        .unwrap();
    let err = engine
        .add_installment(receipt.id_typed(), dec!(40), treasury_id, None, None, None, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
}

#[test]
fn concurrent_deposits_serialize_per_treasury() {
    let engine = Arc::new(setup().with_max_commit_attempts(64));
    let treasury_id = open_treasury(&engine, dec!(100));

    const THREADS: usize = 4;
    const DEPOSITS_PER_THREAD: usize = 10;

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            let engine = Arc::clone(&engine);
            scope.spawn(move || {
                for _ in 0..DEPOSITS_PER_THREAD {
                    engine
                        .deposit(treasury_id, dec!(1), TransactionSource::Manual, None, None)
                        .unwrap();
                }
            });
        }
    });

    let expected = dec!(100) + Decimal::from((THREADS * DEPOSITS_PER_THREAD) as i64);
    assert_eq!(engine.get_treasury(treasury_id).unwrap().balance(), expected);
    assert_eq!(
        engine.list_transactions(treasury_id).unwrap().len(),
        THREADS * DEPOSITS_PER_THREAD + 1
    );

    // Lost updates would break the balance_after chain; replay proves none.
    assert!(engine.reconcile_treasury(treasury_id).unwrap().is_consistent());
}

#[test]
fn statement_pages_are_restartable() {
    let engine = setup();
    let counterparty = customer();

    for i in 1..=5i64 {
        engine
            .append_entry(
                counterparty,
                EntryDirection::Debit,
                Decimal::from(i * 10),
                ReferenceKind::Sale,
                uuid::Uuid::now_v7(),
                None,
            )
            .unwrap();
    }

    let page = engine
        .statement_page(counterparty.id, Pagination::new(Some(2), Some(0)))
        .unwrap();
    assert_eq!(page.entries.len(), 2);
    assert_eq!(page.total, 5);
    assert!(page.has_more);

    let last = engine
        .statement_page(counterparty.id, Pagination::new(Some(2), Some(4)))
        .unwrap();
    assert_eq!(last.entries.len(), 1);
    assert!(!last.has_more);
    // The last page ends at the account's current balance.
    assert_eq!(
        last.entries[0].balance,
        engine.account_balance(counterparty.id).unwrap()
    );
}

#[test]
fn account_summaries_cover_every_posted_counterparty() {
    let engine = setup();
    let first = customer();
    let second = supplier();

    engine
        .append_entry(first, EntryDirection::Debit, dec!(120), ReferenceKind::Sale, uuid::Uuid::now_v7(), None)
        .unwrap();
    engine
        .append_entry(second, EntryDirection::Credit, dec!(80), ReferenceKind::Purchase, uuid::Uuid::now_v7(), None)
        .unwrap();

    let summaries = engine.account_summaries().unwrap();
    assert_eq!(summaries.len(), 2);

    let first_row = summaries
        .iter()
        .find(|s| s.counterparty_id == first.id)
        .unwrap();
    assert_eq!(first_row.balance, dec!(120));
    assert_eq!(first_row.role, CounterpartyRole::Customer);

    let second_row = summaries
        .iter()
        .find(|s| s.counterparty_id == second.id)
        .unwrap();
    assert_eq!(second_row.balance, dec!(80));
    assert_eq!(second_row.total_credit, dec!(80));
}

#[test]
fn unknown_account_has_zero_balance_and_empty_statement() {
    let engine = setup();
    let counterparty_id = CounterpartyId::new(AggregateId::new());
    assert_eq!(engine.account_balance(counterparty_id).unwrap(), dec!(0));
    assert!(engine.statement(counterparty_id).unwrap().is_empty());
}

#[test]
fn general_receipts_move_the_treasury_and_fold_into_contact_totals() {
    let engine = setup();
    let treasury_id = open_treasury(&engine, dec!(1000));
    let contact_id = FinancialContactId::new(AggregateId::new());

    engine
        .record_general_receipt(contact_id, treasury_id, GeneralReceiptKind::Deposit, dec!(400), None)
        .unwrap();
    engine
        .record_general_receipt(contact_id, treasury_id, GeneralReceiptKind::Withdrawal, dec!(150), None)
        .unwrap();

    assert_eq!(engine.get_treasury(treasury_id).unwrap().balance(), dec!(1250));

    let log = engine.list_transactions(treasury_id).unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log[1].source, TransactionSource::Receipt);
    assert_eq!(log[2].source, TransactionSource::Payment);
    assert!(matches!(log[1].reference, Some(SourceRef::GeneralReceipt { .. })));

    let receipts = engine.contact_receipts(contact_id).unwrap();
    assert_eq!(receipts.len(), 2);

    let summary = engine.contact_summary(contact_id).unwrap();
    assert_eq!(summary.total_deposit, dec!(400));
    assert_eq!(summary.total_withdrawal, dec!(150));
    assert_eq!(summary.current_balance, dec!(250));

    let all = engine.contact_summaries().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0], summary);
}

#[test]
fn settling_a_receipt_publishes_the_settled_event() {
    let engine = setup();
    let treasury_id = open_treasury(&engine, dec!(1000));
    let counterparty = supplier();

    // Subscribe before acting so nothing is missed.
    let subscription = engine.bus().subscribe();

    let receipt = engine
        .create_receipt(counterparty, None, ReceiptKind::MainPurchase, dec!(75), base(), None, None)
        .unwrap();
    engine
        .pay_receipt(receipt.id_typed(), treasury_id, None, None, None)
        .unwrap();

    let mut saw_settled = false;
    while let Ok(envelope) = subscription.try_recv() {
        if envelope.aggregate_type() != "settlement.receipt" {
            continue;
        }
        let ev: ReceiptEvent = serde_json::from_value(envelope.payload().clone()).unwrap();
        if let ReceiptEvent::ReceiptSettled(settled) = ev {
            assert_eq!(settled.receipt_id, receipt.id_typed());
            assert_eq!(settled.base_paid, dec!(75));
            saw_settled = true;
        }
    }
    assert!(saw_settled, "expected a ReceiptSettled envelope on the bus");
}
