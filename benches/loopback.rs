//! Loopback benchmark suite.
//!
//! Benchmarks a managed connection against the embedded server:
//! - Send throughput at different payload sizes
//! - Full connect cycle (init, start, open, destroy)
//!
//! Run with: cargo bench --bench loopback
//! Results saved to: target/criterion/

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;
use ws_keeper::{
    ConnectionConfig, ConnectionKey, ConnectionListener, ConnectionRegistry, NoopListener,
    Payload, PeerId, ServerListener,
};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PAYLOAD_SIZES: &[usize] = &[64, 1024, 16 * 1024];
const MESSAGES_PER_ITER: usize = 100;

// ============================================================================
// Helpers
// ============================================================================

/// Counts messages received by the server.
#[derive(Default)]
struct Counter {
    received: AtomicUsize,
}

impl ServerListener for Counter {
    fn on_message(&self, _peer: PeerId, _payload: &Payload) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }
}

fn loopback() -> SocketAddr {
    ([127, 0, 0, 1], 0).into()
}

fn client_config(addr: SocketAddr, key: &str) -> ConnectionConfig {
    ConnectionConfig::builder(format!("ws://{addr}"))
        .key(key)
        .ping_interval_secs(0)
        .reconnect_attempts(0)
        .listener(Arc::new(NoopListener) as Arc<dyn ConnectionListener>)
        .build()
        .expect("valid config")
}

async fn wait_until_connected(registry: &ConnectionRegistry, key: &ConnectionKey) {
    while !registry.is_connected(key) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

async fn wait_for_count(counter: &Counter, expected: usize) {
    while counter.received.load(Ordering::Relaxed) < expected {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Benchmark: Send Throughput
// ============================================================================

fn bench_send_throughput(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let counter = Arc::new(Counter::default());
    let (registry, key) = rt.block_on(async {
        let registry = ConnectionRegistry::new().expect("registry");
        let addr = registry
            .start_server(loopback(), counter.clone())
            .await
            .expect("server");
        let key = registry.init(client_config(addr, "bench"));
        registry.start().await;
        wait_until_connected(&registry, &key).await;
        (registry, key)
    });

    let mut group = c.benchmark_group("send_throughput");
    group.measurement_time(Duration::from_secs(10));

    for &size in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes((size * MESSAGES_PER_ITER) as u64));
        group.bench_with_input(BenchmarkId::new("bytes", size), &size, |b, &size| {
            let payload = vec![0xAB_u8; size];
            b.to_async(&rt).iter(|| async {
                let target = counter.received.load(Ordering::Relaxed) + MESSAGES_PER_ITER;
                for _ in 0..MESSAGES_PER_ITER {
                    registry
                        .send(&key, payload.clone())
                        .expect("send on open connection");
                }
                wait_for_count(&counter, target).await;
            });
        });
    }

    group.finish();
    rt.block_on(registry.destroy());
}

// ============================================================================
// Benchmark: Connect Cycle
// ============================================================================

fn bench_connect_cycle(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let (server_registry, addr) = rt.block_on(async {
        let registry = ConnectionRegistry::new().expect("registry");
        let addr = registry
            .start_server(loopback(), Arc::new(NoopListener))
            .await
            .expect("server");
        (registry, addr)
    });

    let mut group = c.benchmark_group("connect_cycle");
    group.sample_size(20);

    group.bench_function("init_start_destroy", |b| {
        b.to_async(&rt).iter(|| async {
            let registry = ConnectionRegistry::new().expect("registry");
            let key = registry.init(client_config(addr, "cycle"));
            registry.start().await;
            wait_until_connected(&registry, &key).await;
            registry.destroy().await;
        });
    });

    group.finish();
    rt.block_on(server_registry.destroy());
}

criterion_group!(benches, bench_send_throughput, bench_connect_cycle);
criterion_main!(benches);
