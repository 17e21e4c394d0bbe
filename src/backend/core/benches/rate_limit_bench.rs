//! Benchmarks for token bucket admission.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use edge_gateway::middleware::{BucketRegistry, ClientKey, RateLimitConfig, TokenBucket};
use std::{
    net::{IpAddr, Ipv4Addr},
    time::Instant,
};

fn bench_token_bucket(c: &mut Criterion) {
    c.bench_function("token_bucket_try_consume", |b| {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(u32::MAX, 1, start);
        b.iter(|| black_box(bucket.try_consume(black_box(start))));
    });
}

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_try_acquire");

    for clients in [1u32, 100, 10_000] {
        let config = RateLimitConfig::builder()
            .burst_capacity(u32::MAX)
            .requests_per_second(1)
            .build();
        let registry = BucketRegistry::new(config).unwrap();
        let keys: Vec<ClientKey> = (0..clients)
            .map(|i| ClientKey::from_ip(IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + i))))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(clients), &keys, |b, keys| {
            let mut i = 0usize;
            b.iter(|| {
                let key = &keys[i % keys.len()];
                i = i.wrapping_add(1);
                black_box(registry.try_acquire(key))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_token_bucket, bench_registry);
criterion_main!(benches);
