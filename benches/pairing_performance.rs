//! Performance benchmarks for pairing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pairing_room::config::BackoffPolicy;
use pairing_room::matchmaker::{matchmaker_for_store, Matchmaker, OldestFirstPolicy, PairingPolicy};
use pairing_room::metrics::MetricsCollector;
use pairing_room::party::PartyHandle;
use pairing_room::store::InMemoryStore;
use pairing_room::types::QueueEntry;
use pairing_room::utils::{ManualClock, SequentialSessionIds};
use std::sync::Arc;

fn create_bench_system() -> (Arc<Matchmaker>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let matchmaker = matchmaker_for_store(
        Arc::new(InMemoryStore::default()),
        clock.clone(),
        BackoffPolicy::default(),
        metrics,
    )
    .with_session_ids(Arc::new(SequentialSessionIds::new("bench-")));

    (Arc::new(matchmaker), clock)
}

fn bench_select_pair(c: &mut Criterion) {
    let policy = OldestFirstPolicy::new();
    let mut group = c.benchmark_group("select_pair");

    for size in [10usize, 100, 1000] {
        // Reverse arrival order so the sort has work to do
        let snapshot: Vec<QueueEntry> = (0..size)
            .map(|i| {
                QueueEntry::waiting(
                    format!("party_{}", i),
                    chrono::DateTime::from_timestamp_millis((size - i) as i64).unwrap(),
                )
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &snapshot, |b, snapshot| {
            b.iter(|| black_box(policy.select_pair(snapshot)))
        });
    }
    group.finish();
}

fn bench_join_pair(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("join_and_pair_two_parties", |b| {
        b.to_async(&rt).iter(|| async {
            let (matchmaker, clock) = create_bench_system();
            let alice = PartyHandle::new("alice", matchmaker.clone(), clock.clone());
            let bob = PartyHandle::new("bob", matchmaker.clone(), clock.clone());

            alice.join().await.unwrap();
            clock.advance(1);
            bob.join().await.unwrap();
            black_box(matchmaker.sessions().get("bench-1").await.unwrap())
        })
    });
}

fn bench_drain_queue(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("drain_100_waiting_parties", |b| {
        b.to_async(&rt).iter(|| async {
            let (matchmaker, _clock) = create_bench_system();

            for i in 0..100 {
                let entry = QueueEntry::waiting(
                    format!("party_{}", i),
                    chrono::DateTime::from_timestamp_millis(i).unwrap(),
                );
                matchmaker.queue().enqueue(&entry).await.unwrap();
            }

            black_box(matchmaker.pair_until_settled("bench").await.unwrap())
        })
    });
}

fn bench_concurrent_joins(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("concurrent_joins_64_parties", |b| {
        b.to_async(&rt).iter(|| async {
            let (matchmaker, clock) = create_bench_system();

            let tasks: Vec<_> = (0..64)
                .map(|i| {
                    let party = PartyHandle::new(
                        format!("party_{}", i),
                        matchmaker.clone(),
                        clock.clone(),
                    );
                    tokio::spawn(async move { party.join().await.map(|_| ()) })
                })
                .collect();

            for result in futures::future::join_all(tasks).await {
                result.unwrap().unwrap();
            }
            black_box(matchmaker.sessions().list_active().await.unwrap().len())
        })
    });
}

criterion_group!(
    benches,
    bench_select_pair,
    bench_join_pair,
    bench_drain_queue,
    bench_concurrent_joins
);
criterion_main!(benches);
