//! Latency benchmarks for Herald.
//!
//! These benchmarks focus on the cost of single operations end to end.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use herald_bench::{broker_with_subscribers, drain, payload};
use herald_core::{Broker, StatsCollector};
use herald_protocol::{codec, Request, WireFormat};
use std::sync::Arc;
use std::time::Instant;

/// Benchmark publish + receive latency.
fn bench_pubsub_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("pubsub_latency");

    group.bench_function("single_subscriber", |b| {
        b.iter_custom(|iters| {
            let (broker, sessions) = broker_with_subscribers("test", 1, 1024);
            let mut publisher = broker.connect();

            let start = Instant::now();
            for _ in 0..iters {
                publisher.publish("test", payload(64)).unwrap();
                let _ = sessions[0].subscriber().try_recv();
            }
            start.elapsed()
        });
    });

    group.bench_function("ten_subscribers", |b| {
        b.iter_custom(|iters| {
            let (broker, sessions) = broker_with_subscribers("test", 10, 1024);
            let mut publisher = broker.connect();

            let start = Instant::now();
            for _ in 0..iters {
                publisher.publish("test", payload(64)).unwrap();
                for session in &sessions {
                    let _ = session.subscriber().try_recv();
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmark subscribing with a full replay.
fn bench_subscribe_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscribe_replay");

    let broker = Arc::new(Broker::new());
    broker.create_topic("history").unwrap();
    let mut publisher = broker.connect();
    for _ in 0..150 {
        publisher.publish("history", payload(64)).unwrap();
    }

    for replay in [0usize, 10, 100] {
        group.bench_function(format!("replay_{}", replay), |b| {
            let mut session = broker.connect();
            b.iter(|| {
                session.subscribe("history", black_box(replay)).unwrap();
                session.unsubscribe("history").unwrap();
                drain(&session);
            });
        });
    }

    group.finish();
}

/// Benchmark a full request cycle: decode, dispatch, encode.
fn bench_request_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_cycle");

    let (broker, _sessions) = broker_with_subscribers("test", 1, 1024);
    let text = r#"{"action":"publish","topic":"test","message":{"data":"hello"},"request_id":"1"}"#;

    for format in [WireFormat::Json, WireFormat::MessagePack] {
        group.bench_function(format!("publish_{:?}", format).to_lowercase(), |b| {
            let mut session = broker.connect();
            b.iter(|| {
                let request: Request = codec::decode_text(black_box(text), codec::MAX_FRAME_SIZE)
                    .unwrap();
                let reply = session.handle(request);
                codec::encode(&reply, format).unwrap()
            });
        });
    }

    group.finish();
}

/// Benchmark statistics collection.
fn bench_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("stats");

    let broker = Broker::new();
    for i in 0..1000 {
        broker.create_topic(&format!("topic:{}", i)).unwrap();
    }

    group.bench_function("collect_1000_topics", |b| {
        b.iter(|| StatsCollector::new(broker.registry()).collect());
    });

    group.bench_function("health_1000_topics", |b| b.iter(|| broker.health()));

    group.finish();
}

criterion_group!(
    benches,
    bench_pubsub_latency,
    bench_subscribe_replay,
    bench_request_cycle,
    bench_stats,
);
criterion_main!(benches);
