use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use servwatch_agent::{
    metrics::collector::parse_diskstats,
    transport::{ReconnectOptions, SocketIoTransport},
    ConnectionManager, CounterSample, MetricsConfig, MetricsSnapshot, OutboundBuffer,
    OutboundMessage, RateTracker, Sampler, SystemCollector,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Benchmark a full sampler pass against the host
fn bench_snapshot_collection(c: &mut Criterion) {
    let collector = SystemCollector::with_gpu(false).expect("Should create collector");
    let mut sampler = Sampler::new(collector, MetricsConfig::default());

    c.bench_function("sampler_collect_all", |b| {
        b.iter(|| sampler.collect_all().expect("Should collect snapshot"))
    });
}

/// Benchmark rate computation for growing interface counts
fn bench_rate_tracker(c: &mut Criterion) {
    for keys in [4usize, 32, 256].iter() {
        c.bench_with_input(BenchmarkId::new("rate_tracker_update", keys), keys, |b, &keys| {
            let mut tracker = RateTracker::new();
            let start = Instant::now();
            let mut tick = 0u64;

            b.iter(|| {
                tick += 1;
                let values: HashMap<usize, u64> = (0..keys).map(|k| (k, tick * 1500 + k as u64)).collect();
                tracker.update(CounterSample::new(values, start + Duration::from_millis(tick * 100)))
            })
        });
    }
}

/// Benchmark enqueue on a full buffer, the drop-oldest path
fn bench_buffer_overflow(c: &mut Criterion) {
    let buffer = OutboundBuffer::new(100);
    for i in 0..100 {
        buffer.enqueue(OutboundMessage::new("bench", MetricsSnapshot::at(i)));
    }

    c.bench_function("buffer_enqueue_full", |b| {
        b.iter(|| buffer.enqueue(OutboundMessage::new("bench", MetricsSnapshot::at(0))))
    });
}

/// Benchmark building the wire payload of a real snapshot
fn bench_payload_serialization(c: &mut Criterion) {
    let collector = SystemCollector::with_gpu(false).expect("Should create collector");
    let mut sampler = Sampler::new(collector, MetricsConfig::default());
    sampler.collect_all().expect("Should collect snapshot");
    let snapshot = sampler.collect_all().expect("Should collect snapshot");
    let message = OutboundMessage::new("bench-agent", snapshot);

    c.bench_function("payload_to_json", |b| {
        b.iter(|| {
            let payload = message.to_payload().expect("Should build payload");
            serde_json::to_string(&payload).expect("Should serialize")
        })
    });
}

/// Benchmark transmit while the collector is unreachable
fn bench_offline_transmit(c: &mut Criterion) {
    let manager = ConnectionManager::new(
        "bench-agent",
        SocketIoTransport::new("http://127.0.0.1:9", ReconnectOptions::default()),
        100,
    );

    c.bench_function("transmit_offline", |b| {
        b.iter(|| manager.transmit(MetricsSnapshot::at(1)))
    });
}

/// Benchmark /proc/diskstats parsing
fn bench_diskstats_parsing(c: &mut Criterion) {
    let contents: String = (0..64)
        .map(|i| format!("   8       {}  sd{} 1000 0 20000 0 500 0 8000 0 0 0 0\n", i, i))
        .collect();

    c.bench_function("diskstats_parsing", |b| {
        b.iter(|| parse_diskstats(&contents, |_| true))
    });
}

criterion_group!(
    benches,
    bench_snapshot_collection,
    bench_rate_tracker,
    bench_buffer_overflow,
    bench_payload_serialization,
    bench_offline_transmit,
    bench_diskstats_parsing
);

criterion_main!(benches);
