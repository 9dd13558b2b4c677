//! Backoff policy benchmarks
//!
//! The delay computation runs once per failed attempt; this keeps it honest
//! for large attempt counts where the exponent saturates.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use msglink::{BackoffPolicy, Endpoint, EndpointResolver, ReconnectConfig};

fn bench_delay_for(c: &mut Criterion) {
    let policy = BackoffPolicy::new(&ReconnectConfig::default());
    c.bench_function("delay_for_0_to_100", |b| {
        b.iter(|| {
            let mut total = std::time::Duration::ZERO;
            for attempt in 0..100 {
                total += policy.delay_for(black_box(attempt));
            }
            black_box(total)
        });
    });
}

fn bench_resolver_rotation(c: &mut Criterion) {
    let failover = (1..=4).map(|i| Endpoint::new("backup", 5000 + i)).collect();
    let mut resolver = EndpointResolver::new(Endpoint::new("primary", 5672), failover);
    c.bench_function("resolver_next", |b| {
        b.iter(|| black_box(resolver.next().port()));
    });
}

criterion_group!(benches, bench_delay_for, bench_resolver_rotation);

criterion_main!(benches);
