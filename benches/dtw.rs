//! DTW性能基准
//!
//! 比较带窗口约束与无约束的单对计算，以及批量距离矩阵。

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use signal_lab::alignment::{compute_batch, compute_distance, DtwConfig};
use signal_lab::Series;

fn random_walk(rng: &mut StdRng, len: usize) -> Series {
    let mut value = 0.0;
    let values: Vec<f64> = (0..len)
        .map(|_| {
            value += rng.gen_range(-1.0..1.0);
            value
        })
        .collect();
    Series::scalar(values)
}

fn bench_pair(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let mut group = c.benchmark_group("dtw_pair");

    for len in [128usize, 512, 1024] {
        let a = random_walk(&mut rng, len);
        let b = random_walk(&mut rng, len);

        group.bench_with_input(BenchmarkId::new("unconstrained", len), &len, |bench, _| {
            let config = DtwConfig::default();
            bench.iter(|| compute_distance(black_box(&a), black_box(&b), &config))
        });

        group.bench_with_input(BenchmarkId::new("window_10pct", len), &len, |bench, &len| {
            let config = DtwConfig::default().with_window(len / 10);
            bench.iter(|| compute_distance(black_box(&a), black_box(&b), &config))
        });
    }
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(11);
    let mut group = c.benchmark_group("dtw_batch");
    group.sample_size(20);

    for count in [8usize, 32] {
        let series: Vec<Series> = (0..count).map(|_| random_walk(&mut rng, 200)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &series, |bench, series| {
            let config = DtwConfig::default().with_window(20);
            bench.iter(|| compute_batch(black_box(series), &config))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pair, bench_batch);
criterion_main!(benches);
