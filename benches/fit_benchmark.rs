// Measures the elastic-net logistic solver on synthetic expression-like data:
// a single warm-started regularization path per l1 ratio, at the sizes a
// typical inner CV fold sees.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use mpmp::logistic::{ElasticNetLogistic, SolverOptions};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

const N_SAMPLES: usize = 600;
const FEATURE_COUNTS: [usize; 3] = [50, 200, 800];
const ALPHAS: [f64; 6] = [10.0, 1.0, 0.1, 0.01, 0.001, 0.0001];

/// Standard normal features; the first five carry signal.
fn synthetic(n: usize, p: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let x = Array2::from_shape_fn((n, p), |_| normal.sample(&mut rng));
    let y = Array1::from_shape_fn(n, |i| {
        let eta: f64 = (0..p.min(5)).map(|j| 0.8 * x[[i, j]]).sum();
        let prob = 1.0 / (1.0 + (-eta).exp());
        if rng.gen_range(0.0..1.0) < prob { 1.0 } else { 0.0 }
    });
    (x, y)
}

fn bench_fit_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("elastic_net_path");
    group.sample_size(10);

    for &p in &FEATURE_COUNTS {
        let (x, y) = synthetic(N_SAMPLES, p);
        let solver = ElasticNetLogistic::new(x.view(), y.view(), SolverOptions::default()).unwrap();
        group.throughput(Throughput::Elements((N_SAMPLES * p) as u64));

        for l1_ratio in [0.0, 0.5, 1.0] {
            group.bench_with_input(
                BenchmarkId::new(format!("l1_{l1_ratio}"), p),
                &l1_ratio,
                |b, &l1_ratio| b.iter(|| solver.fit_path(black_box(&ALPHAS), l1_ratio).unwrap()),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_fit_path);
criterion_main!(benches);
