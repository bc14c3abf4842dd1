use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dgxwall::types::{LaneMask, Vectorized, DIM};
use dgxwall::xwall::spalding::{enrichment_value_and_gradient_vectorized, solve_spalding};

const YPLUS: [f64; 6] = [0.1, 1., 5., 30., 300., 3000.];

fn spalding_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spalding");
    group.sample_size(10);
    for yplus in YPLUS.iter() {
        let name = format!("solve y+={}", yplus);
        group.bench_function(&name, |b| b.iter(|| solve_spalding(black_box(*yplus))));
    }
    group.finish();
}

fn enrichment_benchmark(c: &mut Criterion) {
    let distance = Vectorized::from_fn(|l| 0.01 * (l + 1) as f64);
    let tauw = Vectorized::from_fn(|l| 0.5 + 0.1 * l as f64);
    let grad_distance: [Vectorized; DIM] = [Vectorized::splat(0.), Vectorized::splat(1.)];
    let grad_tauw: [Vectorized; DIM] = [Vectorized::splat(0.1), Vectorized::splat(0.)];
    let mut group = c.benchmark_group("enrichment");
    group.sample_size(10);
    group.bench_function("value_and_gradient", |b| {
        b.iter(|| {
            enrichment_value_and_gradient_vectorized(
                black_box(distance),
                black_box(tauw),
                &grad_distance,
                &grad_tauw,
                1. / 180.,
                LaneMask::ALL,
            )
        })
    });
    group.finish();
}

criterion_group!(benches, spalding_benchmark, enrichment_benchmark);
criterion_main!(benches);
