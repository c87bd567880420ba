use criterion::{Criterion, criterion_group, criterion_main};
use docqa::vector_store::LocalBackend;
use std::hint::black_box;

const DIMENSION: usize = 768;
const PASSAGES: usize = 2000;

/// Deterministic pseudo-random vector so runs are comparable
fn vector(seed: usize) -> Vec<f32> {
    let mut state = (seed as u64).wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    (0..DIMENSION)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) as f32 / u32::MAX as f32) - 0.25
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut backend = LocalBackend::with_capacity(DIMENSION, PASSAGES);
    for seed in 0..PASSAGES {
        backend.insert(&vector(seed)).expect("can insert vector");
    }
    let query = vector(PASSAGES + 1);

    c.bench_function("local_search_top10", |b| {
        b.iter(|| backend.search(black_box(&query), black_box(10)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
