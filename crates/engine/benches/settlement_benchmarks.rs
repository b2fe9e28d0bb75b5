use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use rust_decimal_macros::dec;
use serde_json::Value as JsonValue;

use majolica_engine::{InMemoryLedgerStore, SettlementEngine};
use majolica_events::{EventEnvelope, InMemoryEventBus};
use majolica_fx::CurrencyCode;
use majolica_ledgers::{CounterpartyId, CounterpartyRef, CounterpartyRole};
use majolica_settlement::ReceiptKind;
use majolica_treasury::{TransactionSource, TreasuryId, TreasuryKind};

use majolica_core::AggregateId;

type BenchEngine =
    SettlementEngine<Arc<InMemoryLedgerStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

fn new_engine() -> BenchEngine {
    let store = Arc::new(InMemoryLedgerStore::new());
    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
    SettlementEngine::new(store, bus, CurrencyCode::new("LYD").unwrap())
}

fn open_treasury(engine: &BenchEngine) -> TreasuryId {
    engine
        .open_treasury("Bench treasury", TreasuryKind::General, None, None, dec!(1_000_000))
        .unwrap()
        .id_typed()
}

fn bench_deposit_latency(c: &mut Criterion) {
    let engine = new_engine();
    let treasury_id = open_treasury(&engine);

    c.bench_function("deposit_commit_latency", |b| {
        b.iter(|| {
            engine
                .deposit(
                    black_box(treasury_id),
                    dec!(1),
                    TransactionSource::Manual,
                    None,
                    None,
                )
                .unwrap()
        })
    });
}

fn bench_receipt_settlement(c: &mut Criterion) {
    let engine = new_engine();
    let treasury_id = open_treasury(&engine);
    let counterparty = CounterpartyRef {
        id: CounterpartyId::new(AggregateId::new()),
        role: CounterpartyRole::Supplier,
    };

    // Full settlement commits three streams (receipt, treasury, account).
    c.bench_function("receipt_full_settlement", |b| {
        b.iter_batched(
            || {
                engine
                    .create_receipt(
                        counterparty,
                        None,
                        ReceiptKind::MainPurchase,
                        dec!(100),
                        CurrencyCode::new("LYD").unwrap(),
                        None,
                        None,
                    )
                    .unwrap()
                    .id_typed()
            },
            |receipt_id| {
                engine
                    .pay_receipt(black_box(receipt_id), treasury_id, None, None, None)
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_stream_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("treasury_replay");

    for transactions in [100u64, 1_000] {
        let engine = new_engine();
        let treasury_id = open_treasury(&engine);
        for _ in 0..transactions {
            engine
                .deposit(treasury_id, dec!(1), TransactionSource::Manual, None, None)
                .unwrap();
        }

        group.throughput(Throughput::Elements(transactions));
        group.bench_with_input(
            BenchmarkId::from_parameter(transactions),
            &transactions,
            |b, _| {
                b.iter(|| {
                    let audit = engine.reconcile_treasury(black_box(treasury_id)).unwrap();
                    assert!(audit.is_consistent());
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_deposit_latency,
    bench_receipt_settlement,
    bench_stream_replay
);
criterion_main!(benches);
