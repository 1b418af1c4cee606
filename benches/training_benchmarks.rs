//! Training and evaluation benchmarks
//!
//! - Preprocessing (split + fit + encode)
//! - Logistic regression and random forest fits
//! - Full evaluation including cross-validation and SVG rendering

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trueno_champion::dataset::{FeatureSchema, Record, RecordSet};
use trueno_champion::evaluate::Evaluator;
use trueno_champion::model::{Hyperparameters, RandomForestParams, Trainer};
use trueno_champion::preprocess::{PreprocessedSplit, Preprocessor};

/// Heart-disease shaped records with a learnable signal
fn create_records(n: usize) -> RecordSet {
    let schema = FeatureSchema::heart_disease();
    let mut rng = StdRng::seed_from_u64(7);
    let rows = (0..n)
        .map(|i| {
            let label = u8::from(i % 2 == 0);
            let shift = f64::from(label);
            let features = schema
                .features()
                .iter()
                .map(|spec| {
                    let span = spec.max - spec.min;
                    let base = spec.min + span * (0.35 + 0.2 * shift);
                    let value = base + rng.gen_range(-0.2..0.2) * span;
                    Some(value.clamp(spec.min, spec.max).round())
                })
                .collect();
            Record::new(features, label)
        })
        .collect();
    RecordSet::new(schema, rows).unwrap()
}

fn split(n: usize) -> PreprocessedSplit {
    Preprocessor::new(42, 0.2)
        .unwrap()
        .fit_transform(&create_records(n))
        .unwrap()
        .0
}

fn bench_preprocess(c: &mut Criterion) {
    let mut group = c.benchmark_group("preprocess");
    for rows in [303, 3030] {
        let records = create_records(rows);
        let pre = Preprocessor::new(42, 0.2).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(rows), &records, |b, records| {
            b.iter(|| pre.fit_transform(black_box(records)).unwrap());
        });
    }
    group.finish();
}

fn bench_training(c: &mut Criterion) {
    let data = split(303);
    let trainer = Trainer::new();
    let mut group = c.benchmark_group("train");

    let logistic = Hyperparameters::defaults_for("logistic_regression").unwrap();
    group.bench_function("logistic_regression", |b| {
        b.iter(|| trainer.train("logistic_regression", &logistic, black_box(&data)).unwrap());
    });

    for trees in [10, 100] {
        let forest = Hyperparameters::RandomForest(RandomForestParams {
            n_estimators: trees,
            ..RandomForestParams::default()
        });
        group.bench_with_input(BenchmarkId::new("random_forest", trees), &forest, |b, params| {
            b.iter(|| trainer.train("random_forest", params, black_box(&data)).unwrap());
        });
    }
    group.finish();
}

fn bench_evaluation(c: &mut Criterion) {
    let data = split(303);
    let params = Hyperparameters::defaults_for("logistic_regression").unwrap();
    let candidate = Trainer::new()
        .train("logistic_regression", &params, &data)
        .unwrap();
    let evaluator = Evaluator::default();

    c.bench_function("evaluate/logistic_regression", |b| {
        b.iter(|| evaluator.evaluate(black_box(&candidate), &data).unwrap());
    });
}

criterion_group!(benches, bench_preprocess, bench_training, bench_evaluation);
criterion_main!(benches);
