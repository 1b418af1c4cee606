//! Shared fixtures for integration tests

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use trueno_champion::dataset::{FeatureSchema, Record, RecordSet};
use trueno_champion::evaluate::{ArtifactBundle, MetricName, MetricSet};
use trueno_champion::experiment::Run;
use trueno_champion::model::{CandidateModel, Hyperparameters, Trainer};
use trueno_champion::preprocess::PreprocessedSplit;

/// Synthetic Cleveland-shaped patients; age, thalach, exang and oldpeak
/// carry the signal, `ca` is occasionally missing.
pub fn patients(n: usize, seed: u64) -> RecordSet {
    let schema = FeatureSchema::heart_disease();
    let mut rng = StdRng::seed_from_u64(seed);
    let rows = (0..n)
        .map(|i| {
            let label = u8::from(i % 2 == 1);
            let shift = f64::from(label);
            let features = vec![
                Some((52.0 + 8.0 * shift + rng.gen_range(-9.0..9.0_f64)).round()),
                Some(f64::from(rng.gen_range(0..=1_u8))),
                Some(f64::from(rng.gen_range(0..=3_u8))),
                Some(f64::from(rng.gen_range(100..=170_u16))),
                Some(f64::from(rng.gen_range(170..=340_u16))),
                Some(f64::from(rng.gen_range(0..=1_u8))),
                Some(f64::from(rng.gen_range(0..=2_u8))),
                Some((160.0 - 22.0 * shift + rng.gen_range(-18.0..18.0_f64)).round()),
                Some(if rng.gen_bool(0.15 + 0.5 * shift) { 1.0 } else { 0.0 }),
                Some(((rng.gen_range(0.0..2.0_f64) + 1.2 * shift) * 10.0).round() / 10.0),
                Some(f64::from(rng.gen_range(0..=2_u8))),
                if i % 13 == 0 {
                    None
                } else {
                    Some(f64::from(rng.gen_range(0..=3_u8)))
                },
                Some([3.0, 6.0, 7.0][rng.gen_range(0..3)]),
            ];
            Record::new(features, label)
        })
        .collect();
    RecordSet::new(schema, rows).unwrap()
}

/// Write `set` as a headed CSV; missing values become empty fields.
pub fn write_csv(path: &Path, set: &RecordSet) {
    let schema = set.schema();
    let mut out = String::new();
    let header: Vec<&str> = schema
        .features()
        .iter()
        .map(|f| f.name.as_str())
        .chain(std::iter::once(schema.target()))
        .collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for record in set.rows() {
        for value in record.features() {
            if let Some(v) = value {
                write!(out, "{v}").unwrap();
            }
            out.push(',');
        }
        writeln!(out, "{}", record.label()).unwrap();
    }
    std::fs::write(path, out).unwrap();
}

/// `algorithm` fitted with default parameters on a one-feature toy split.
pub fn toy_candidate(algorithm: &str) -> Arc<CandidateModel> {
    let split = PreprocessedSplit::new(
        vec![vec![-1.2], vec![-0.3], vec![0.4], vec![1.3]],
        vec![vec![0.0]],
        vec![0, 0, 1, 1],
        vec![0],
        vec!["x".into()],
    )
    .unwrap();
    let params = Hyperparameters::defaults_for(algorithm).unwrap();
    Arc::new(Trainer::new().train(algorithm, &params, &split).unwrap())
}

/// A run with the given selection keys and neutral other metrics.
pub fn run_with(run_id: &str, algorithm: &str, roc_auc: f64, cv_mean: f64, sequence: u64) -> Run {
    let metrics = MetricSet::from_pairs(MetricName::ALL.map(|m| match m {
        MetricName::RocAuc => (m, roc_auc),
        MetricName::CvAccuracyMean => (m, cv_mean),
        _ => (m, 0.8),
    }))
    .unwrap();
    Run::new(
        run_id,
        toy_candidate(algorithm),
        metrics,
        ArtifactBundle::new(),
        chrono::Utc::now(),
        sequence,
    )
}
