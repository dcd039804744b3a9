use criterion::{criterion_group, criterion_main, Criterion};
use parclean::sample::{sample, Reservoir, Tailer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::hint::black_box;

fn bench_reservoir(c: &mut Criterion) {
    c.bench_function("reservoir_1k_of_1m", |b| {
        b.iter(|| {
            let mut reservoir: Reservoir<u64> =
                Reservoir::new(1_000, StdRng::seed_from_u64(42));
            for i in 0..1_000_000u64 {
                reservoir.consider(black_box(i));
            }
            black_box(reservoir.into_items())
        })
    });
}

fn bench_tailer(c: &mut Criterion) {
    c.bench_function("tailer_1k_of_1m", |b| {
        b.iter(|| {
            let mut tailer: Tailer<u64> = Tailer::new(1_000);
            let mut displaced = 0u64;
            for i in 0..1_000_000u64 {
                if tailer.push(black_box(i)).is_some() {
                    displaced += 1;
                }
            }
            black_box((displaced, tailer.into_tail()))
        })
    });
}

fn bench_full_sample(c: &mut Criterion) {
    let lines: Vec<Vec<u8>> = (0..100_000)
        .map(|i| format!("source sentence {i}\ttarget sentence {i}").into_bytes())
        .collect();

    c.bench_function("sample_1k_of_100k_rows", |b| {
        b.iter(|| {
            let sections = sample(
                1_000,
                lines.iter().cloned(),
                StdRng::seed_from_u64(42),
            );
            black_box(sections.into_vec())
        })
    });
}

criterion_group!(benches, bench_reservoir, bench_tailer, bench_full_sample);
criterion_main!(benches);
