use criterion::{criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;

use sarimax_mle::{batch_fit, fit, simulate_arima, ArimaOrder, FitOptions, ModelSpec};

fn bench_fit_arma11(c: &mut Criterion) {
    let spec = ModelSpec::new(ArimaOrder::arma(1, 1));
    let mut rng = StdRng::seed_from_u64(7);
    let y = simulate_arima(&spec, &[0.0, 0.5, 0.3], 1.0, 500, 100, None, &mut rng).unwrap();
    let opts = FitOptions::default();

    c.bench_function("fit_arma11_500", |b| {
        b.iter(|| fit(&y, None, &spec, None, &opts).unwrap().loglike)
    });
}

fn bench_batch_fit(c: &mut Criterion) {
    let spec = ModelSpec::new(ArimaOrder::arma(1, 0)).with_intercept(false);
    let series: Vec<Vec<f64>> = (0..16)
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(i);
            simulate_arima(&spec, &[0.6], 1.0, 300, 100, None, &mut rng).unwrap()
        })
        .collect();
    let opts = FitOptions::default();

    let mut group = c.benchmark_group("batch");
    group.sample_size(20);
    group.bench_function("batch_fit_ar1_16x300", |b| {
        b.iter(|| batch_fit(&series, &spec, None, &opts).len())
    });
    group.finish();
}

criterion_group!(benches, bench_fit_arma11, bench_batch_fit);
criterion_main!(benches);
