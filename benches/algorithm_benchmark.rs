//! Fit and predict benchmarks for the registered algorithms
//!
//! Run with: cargo bench --bench algorithm_benchmark

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use zero::{Hyperparameters, Rating, RatingSet, RecommendationAlgorithm, Registry};

const NB_USERS: usize = 200;
const NB_WORKS: usize = 100;

/// Generate a synthetic rating set with about `density` of the matrix rated
fn generate_ratings(density: f64) -> RatingSet {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    (0..NB_USERS)
        .flat_map(|u| (0..NB_WORKS).map(move |i| (u, i)))
        .filter(|_| rng.gen::<f64>() < density)
        .map(|(u, i)| Rating::new(u, i, ((u * 7 + i * 3) % 5) as f64 + 1.0))
        .collect()
}

fn fitted(
    registry: &Registry,
    name: &str,
    params: &Hyperparameters,
    ratings: &RatingSet,
) -> Box<dyn RecommendationAlgorithm> {
    let mut model = registry.instantiate_with(name, params).unwrap();
    model.set_parameters(NB_USERS, NB_WORKS);
    model.fit(ratings).unwrap();
    model
}

fn bench_params(name: &str) -> Hyperparameters {
    match name {
        "als" | "sgd" | "svd" => Hyperparameters::new().with("nb_components", 10usize),
        _ => Hyperparameters::new(),
    }
}

/// Benchmark fit with various densities
fn bench_fit(c: &mut Criterion) {
    let registry = Registry::with_builtin();
    let mut group = c.benchmark_group("fit");
    group.sample_size(10);

    for density in [0.05, 0.2] {
        let ratings = generate_ratings(density);
        group.throughput(Throughput::Elements(ratings.len() as u64));
        for name in ["als", "sgd", "svd", "knn"] {
            let params = bench_params(name);
            group.bench_with_input(BenchmarkId::new(name, density), &ratings, |b, ratings| {
                b.iter(|| fitted(&registry, name, &params, ratings));
            });
        }
    }

    group.finish();
}

/// Benchmark batched prediction over every pair of the matrix
fn bench_predict(c: &mut Criterion) {
    let registry = Registry::with_builtin();
    let ratings = generate_ratings(0.1);
    let pairs: Vec<_> = (0..NB_USERS)
        .flat_map(|u| (0..NB_WORKS).map(move |i| (u, i)))
        .collect();

    let mut group = c.benchmark_group("predict");
    group.throughput(Throughput::Elements(pairs.len() as u64));

    for name in ["als", "svd", "knn", "knn2"] {
        let model = fitted(&registry, name, &bench_params(name), &ratings);
        group.bench_function(name, |b| b.iter(|| model.predict(&pairs).unwrap()));
    }

    group.finish();
}

criterion_group!(benches, bench_fit, bench_predict);
criterion_main!(benches);
