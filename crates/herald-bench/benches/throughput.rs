//! Throughput benchmarks for Herald.
//!
//! These benchmarks measure the raw message throughput of the broker core.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use herald_bench::{broker_with_subscribers, drain, payload};
use herald_core::{HistoryBuffer, Message, Topic, TopicRegistry};
use std::sync::Arc;

/// Benchmark publishing to a topic.
fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    group.throughput(Throughput::Elements(1));

    // No subscribers: sequence assignment and history only
    group.bench_function("0_sub", |b| {
        let topic = Topic::new("test");
        let message = payload(64);
        b.iter(|| topic.publish(black_box(message.clone())).unwrap());
    });

    // Publish with 1 subscriber
    group.bench_function("1_sub", |b| {
        let (broker, sessions) = broker_with_subscribers("test", 1, 1024);
        let mut publisher = broker.connect();
        let message = payload(64);
        b.iter(|| {
            publisher.publish("test", black_box(message.clone())).unwrap();
            drain(&sessions[0]);
        });
    });

    // Publish with 100 subscribers that never drain: drop-oldest path
    group.bench_function("100_sub_backlogged", |b| {
        let (broker, _sessions) = broker_with_subscribers("test", 100, 64);
        let mut publisher = broker.connect();
        let message = payload(64);
        b.iter(|| publisher.publish("test", black_box(message.clone())).unwrap());
    });

    group.finish();
}

/// Benchmark fan-out scenarios.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for size in [10, 100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (broker, sessions) = broker_with_subscribers("broadcast", size, 16);
            let mut publisher = broker.connect();
            let message = payload(64);

            b.iter(|| {
                publisher
                    .publish("broadcast", black_box(message.clone()))
                    .unwrap();
                for session in &sessions {
                    drain(session);
                }
            });
        });
    }

    group.finish();
}

/// Benchmark the history ring.
fn bench_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("history");

    group.bench_function("append_full", |b| {
        let mut history = HistoryBuffer::new();
        let message = Arc::new(Message::new("test", 1, payload(64)));
        for _ in 0..history.capacity() {
            history.append(Arc::clone(&message));
        }
        b.iter(|| history.append(black_box(Arc::clone(&message))));
    });

    for n in [10, 100].iter() {
        group.bench_with_input(BenchmarkId::new("replay", n), n, |b, &n| {
            let mut history = HistoryBuffer::new();
            for sequence in 1..=150 {
                history.append(Arc::new(Message::new("test", sequence, payload(64))));
            }
            b.iter(|| history.replay(black_box(n)));
        });
    }

    group.finish();
}

/// Benchmark topic registry operations.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("create_delete", |b| {
        let registry = TopicRegistry::new();
        let mut i = 0u64;
        b.iter(|| {
            let name = format!("topic:{}", i);
            i += 1;
            registry.create(&name).unwrap();
            registry.delete(&name).unwrap();
        });
    });

    group.bench_function("lookup", |b| {
        let registry = TopicRegistry::new();
        for i in 0..1000 {
            registry.create(&format!("topic:{}", i)).unwrap();
        }
        let mut i = 0;
        b.iter(|| {
            let name = format!("topic:{}", i % 1000);
            i += 1;
            registry.get(black_box(&name)).unwrap()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_publish,
    bench_fanout,
    bench_history,
    bench_registry,
);
criterion_main!(benches);
