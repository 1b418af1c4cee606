//! Property-based tests for trueno-champion
//!
//! - Preprocessing is a pure function of (records, seed, ratio)
//! - Selection always returns a maximum-ROC-AUC run
//! - Registry tags are always strings with the fixed metric formatting
//! - Run with ProptestConfig::with_cases(32); forest-free to stay fast

mod common;

use common::{patients, run_with};
use proptest::prelude::*;
use trueno_champion::evaluate::{metrics, MetricName};
use trueno_champion::preprocess::Preprocessor;
use trueno_champion::registry::{promotion_tags, KvModelRegistry, ModelRegistry, CHAMPION_ALIAS};
use trueno_champion::selector;

// ============================================================================
// Strategies
// ============================================================================

/// (roc_auc, cv_accuracy_mean) pairs drawn from a coarse grid so ties occur
fn arb_scores() -> impl Strategy<Value = Vec<(f64, f64)>> {
    proptest::collection::vec(((0u8..5).prop_map(|v| 0.8 + f64::from(v) * 0.05), (0u8..4).prop_map(|v| 0.7 + f64::from(v) * 0.05)), 1..6)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: fit_transform is deterministic for a fixed seed and ratio
    #[test]
    fn prop_fit_transform_deterministic(seed in 0u64..1000, data_seed in 0u64..50, ratio in 0.15f64..0.4) {
        let records = patients(60, data_seed);
        let pre = Preprocessor::new(seed, ratio).unwrap();
        let (a, ta) = pre.fit_transform(&records).unwrap();
        let (b, tb) = pre.fit_transform(&records).unwrap();
        prop_assert_eq!(a.train_x(), b.train_x());
        prop_assert_eq!(a.test_x(), b.test_x());
        prop_assert_eq!(a.train_y(), b.train_y());
        prop_assert_eq!(a.test_y(), b.test_y());
        prop_assert_eq!(ta, tb);
    }

    /// Property: both classes land on both sides of the split
    #[test]
    fn prop_split_is_stratified(seed in 0u64..1000, ratio in 0.1f64..0.5) {
        let (split, _) = Preprocessor::new(seed, ratio).unwrap().fit_transform(&patients(50, 3)).unwrap();
        for side in [split.train_y(), split.test_y()] {
            prop_assert!(side.contains(&0));
            prop_assert!(side.contains(&1));
        }
        prop_assert_eq!(split.train_y().len() + split.test_y().len(), 50);
    }

    /// Property: the selected run has the maximum roc_auc, and among those
    /// the maximum cv_accuracy_mean, and among those the lowest sequence
    #[test]
    fn prop_select_maximises_roc_auc(scores in arb_scores()) {
        let runs: Vec<_> = scores
            .iter()
            .enumerate()
            .map(|(i, &(auc, cv))| run_with(&format!("r{i}"), "logistic_regression", auc, cv, i as u64))
            .collect();
        let winner = selector::select(&runs).unwrap();
        let best_auc = scores.iter().map(|s| s.0).fold(f64::MIN, f64::max);
        prop_assert!((winner.metrics().roc_auc() - best_auc).abs() < f64::EPSILON);
        let best_cv = scores
            .iter()
            .filter(|s| (s.0 - best_auc).abs() < f64::EPSILON)
            .map(|s| s.1)
            .fold(f64::MIN, f64::max);
        prop_assert!((winner.metrics().cv_accuracy_mean() - best_cv).abs() < f64::EPSILON);
        let first = runs
            .iter()
            .find(|r| {
                (r.metrics().roc_auc() - best_auc).abs() < f64::EPSILON
                    && (r.metrics().cv_accuracy_mean() - best_cv).abs() < f64::EPSILON
            })
            .unwrap();
        prop_assert_eq!(winner.run_id(), first.run_id());
    }

    /// Property: every promotion tag is a string; metric tags parse back to
    /// the metric rounded to four decimals
    #[test]
    fn prop_tags_are_four_decimal_strings(auc in 0.0f64..=1.0, cv in 0.0f64..=1.0) {
        let run = run_with("r", "logistic_regression", auc, cv, 0);
        let tags = promotion_tags(&run);
        prop_assert_eq!(tags.len(), 3 + MetricName::ALL.len());
        for (key, value) in &tags {
            if let Some(metric) = MetricName::parse(key) {
                let decimals = value.split('.').nth(1).map_or(0, str::len);
                prop_assert_eq!(decimals, 4);
                let parsed: f64 = value.parse().unwrap();
                prop_assert!((parsed - run.metrics().get(metric)).abs() <= 5e-5 + 1e-12);
            }
        }
    }

    /// Property: ROC-AUC stays within [0, 1] and flips under label inversion
    #[test]
    fn prop_roc_auc_symmetry(scores in proptest::collection::vec(0.0f64..1.0, 4..40)) {
        let labels: Vec<u8> = (0..scores.len()).map(|i| u8::from(i % 2 == 0)).collect();
        let flipped: Vec<u8> = labels.iter().map(|&y| 1 - y).collect();
        let auc = metrics::roc_auc(&labels, &scores).unwrap();
        let inverse = metrics::roc_auc(&flipped, &scores).unwrap();
        prop_assert!((0.0..=1.0).contains(&auc));
        prop_assert!((auc + inverse - 1.0).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_set_alias_is_idempotent() {
    let registry = KvModelRegistry::in_memory();
    let name = "heart-disease-logistic_regression";
    let version = registry.register_version(name, b"blob".to_vec()).await.unwrap();
    registry.set_alias(name, CHAMPION_ALIAS, version).await.unwrap();
    let once = registry.store().snapshot();
    registry.set_alias(name, CHAMPION_ALIAS, version).await.unwrap();
    assert_eq!(registry.store().snapshot(), once);
    assert_eq!(registry.get_alias(name, CHAMPION_ALIAS).await.unwrap(), Some(version));
}
