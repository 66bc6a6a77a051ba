use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use dispensary_core::{FixedClock, MedicationId, UserId};
use dispensary_dispensing::{DispenseMode, Prescription, PrescriptionId, PrescriptionLine};
use dispensary_infra::{InMemoryEngine, RetryPolicy};
use dispensary_inventory::{BatchId, BatchInventory, ReceiveBatch};

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn receive(engine: &InMemoryEngine, medication_id: MedicationId, days_to_expiry: i64, quantity: u64) -> BatchId {
    let batch_id = BatchId::generate();
    engine
        .inventory
        .receive_batch(ReceiveBatch {
            batch_id,
            medication_id,
            lot_number: format!("L-{batch_id}"),
            expiration_date: today() + chrono::Duration::days(days_to_expiry),
            manufacturing_date: today() - chrono::Duration::days(365),
            quantity,
            occurred_at: Utc::now(),
        })
        .unwrap();
    batch_id
}

/// Reserve + release on one batch with a growing stream behind it.
fn bench_reserve_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve_latency");

    for history in [0usize, 100, 1000] {
        let engine = InMemoryEngine::new(RetryPolicy::default());
        let batch_id = receive(&engine, MedicationId::new(), 365, 1_000_000);
        for _ in 0..history / 2 {
            engine.inventory.reserve(batch_id, 1, Utc::now()).unwrap();
            engine.inventory.release(batch_id, 1, Utc::now()).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(history), &batch_id, |b, batch_id| {
            b.iter(|| {
                engine.inventory.reserve(black_box(*batch_id), 1, Utc::now()).unwrap();
                engine.inventory.release(*batch_id, 1, Utc::now()).unwrap();
            })
        });
    }

    group.finish();
}

/// Propose + confirm of a complete dispense spanning several batches.
fn bench_dispense_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispense_pipeline");

    for batches in [1usize, 4, 16] {
        let engine = InMemoryEngine::with_clock(RetryPolicy::default(), Arc::new(FixedClock::on(today())));
        let medication_id = MedicationId::new();
        for i in 0..batches {
            receive(&engine, medication_id, 30 + i as i64, 1_000_000);
        }
        let rx = Prescription::new(
            PrescriptionId::generate(),
            vec![PrescriptionLine::new(medication_id, 10)],
        )
        .unwrap();
        engine.prescriptions.upsert(rx.clone()).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(batches), &rx.id, |b, id| {
            b.iter(|| {
                let draft = engine.orchestrator.propose(*id).unwrap();
                engine
                    .orchestrator
                    .confirm(*id, DispenseMode::Complete, draft, None, UserId::new())
                    .unwrap()
            })
        });
    }

    group.finish();
}

/// Full projection rebuild from the store.
fn bench_projection_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild");

    for batches in [10usize, 100] {
        let engine = InMemoryEngine::new(RetryPolicy::default());
        let medication_id = MedicationId::new();
        for i in 0..batches {
            let id = receive(&engine, medication_id, 30 + i as i64, 100);
            engine.inventory.reserve(id, 10, Utc::now()).unwrap();
        }
        let history = engine.store.all_events().unwrap();

        group.throughput(Throughput::Elements(history.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batches), &history, |b, history| {
            b.iter(|| engine.inventory.rebuild_projection(black_box(history.clone())).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_reserve_latency,
    bench_dispense_pipeline,
    bench_projection_rebuild
);
criterion_main!(benches);
