use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rail_engine::prelude::*;
use rail_engine::rail::rate_queue::{RateChange, RateChangeQueue};
use rail_engine::simulation::workload::{run_workload, WorkloadConfig};
use rust_decimal::Decimal;

fn ledger_with_rails(rails: usize) -> (RailLedger, Vec<RailId>, PartyId) {
    let ledger = RailLedger::in_memory(EngineConfig::default());
    let token = TokenId::new("USDFC");
    let payer = PartyId::new("payer");
    let payee = PartyId::new("payee");
    let operator = PartyId::new("operator");
    ledger
        .deposit(&token, &payer, Decimal::from(1_000_000_000u64))
        .unwrap();
    ledger
        .approve_operator(&token, &payer, &operator, Decimal::MAX, Decimal::MAX, 10_000)
        .unwrap();
    let ids = (0..rails)
        .map(|_| {
            let terms = RailTerms::new(token.clone(), payer.clone(), payee.clone(), operator.clone())
                .with_rate(Decimal::from(10))
                .with_lockup(100, Decimal::from(50))
                .with_commission_bps(100);
            ledger.create_rail(terms, 0).unwrap()
        })
        .collect();
    (ledger, ids, payee)
}

fn bench_settle_single_rail(c: &mut Criterion) {
    c.bench_function("settle_single_rail_100_epochs", |b| {
        b.iter_batched(
            || ledger_with_rails(1),
            |(ledger, rails, payee)| {
                for epoch in 1..=100 {
                    black_box(ledger.settle_rail(rails[0], &payee, epoch, epoch).unwrap());
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_naive_amount_long_queue(c: &mut Criterion) {
    let mut queue = RateChangeQueue::new();
    for i in 1..=1_000u64 {
        queue
            .enqueue(RateChange {
                until_epoch: i * 10,
                rate: Decimal::from(i % 17 + 1),
                settled_up_to_before: 0,
            })
            .unwrap();
    }

    c.bench_function("naive_amount_1000_rate_changes", |b| {
        b.iter(|| queue.naive_amount(black_box(0), black_box(10_500), Decimal::from(5)))
    });
}

fn bench_workload(c: &mut Criterion) {
    let config = WorkloadConfig {
        party_count: 20,
        rail_count: 50,
        steps: 1_000,
        ..Default::default()
    };

    c.bench_function("workload_50_rails_1000_steps", |b| {
        b.iter(|| run_workload(black_box(&config)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_settle_single_rail,
    bench_naive_amount_long_queue,
    bench_workload
);
criterion_main!(benches);
