use criterion::{black_box, criterion_group, criterion_main, Criterion};
use patient_shards::identity::{IdGenerator, RandomIdGenerator};
use patient_shards::{PatientId, ShardRouter};

fn router_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("shard_router");
    let router = ShardRouter::new(16).unwrap();

    group.bench_function("route_sequential", |b| {
        let mut n = 0u64;
        b.iter(|| {
            n = n.wrapping_add(1);
            router.route(black_box(&PatientId::Sequential(n)))
        });
    });

    // Pre-generated so the benchmark measures hashing, not the RNG
    let ids: Vec<PatientId> = (0..1024).map(|_| RandomIdGenerator.generate_id().unwrap()).collect();
    group.bench_function("route_random", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % ids.len();
            router.route(black_box(&ids[i]))
        });
    });

    group.finish();
}

criterion_group!(benches, router_benchmark);
criterion_main!(benches);
