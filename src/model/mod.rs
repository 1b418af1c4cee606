//! Candidate models and the trainer that fits them
//!
//! Two algorithms are supported, both implemented natively so fitted state
//! serialises into the registry package without a foreign runtime:
//!
//! - `logistic_regression` - L2-regularised logistic regression (Newton/IRLS)
//! - `random_forest` - bootstrap-aggregated Gini decision trees
//!
//! Fitting is deterministic for a given split and hyperparameter set.

mod forest;
mod logistic;

pub use forest::{MaxFeatures, RandomForestModel, RandomForestParams};
pub use logistic::{LogisticRegressionModel, LogisticRegressionParams};

use crate::preprocess::PreprocessedSplit;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Algorithm identifier for logistic regression
pub const LOGISTIC_REGRESSION: &str = "logistic_regression";
/// Algorithm identifier for random forest
pub const RANDOM_FOREST: &str = "random_forest";
/// Every algorithm the trainer accepts
pub const ALGORITHMS: [&str; 2] = [LOGISTIC_REGRESSION, RANDOM_FOREST];

/// Probabilistic binary classifier over encoded rows.
pub trait Classifier {
    /// Probability of class 1 for one encoded row.
    fn predict_proba(&self, row: &[f64]) -> f64;

    /// Hard prediction (class 1 when probability exceeds 0.5).
    fn predict(&self, row: &[f64]) -> u8 {
        u8::from(self.predict_proba(row) > 0.5)
    }

    /// Per-feature importance, when the model defines one.
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }
}

/// Hyperparameters, tagged by algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Hyperparameters {
    /// Logistic regression settings
    LogisticRegression(LogisticRegressionParams),
    /// Random forest settings
    RandomForest(RandomForestParams),
}

impl Hyperparameters {
    /// Default hyperparameters for a known algorithm id.
    ///
    /// # Errors
    ///
    /// Returns `Error::Training` for an unknown id.
    pub fn defaults_for(algorithm_id: &str) -> Result<Self> {
        match algorithm_id {
            LOGISTIC_REGRESSION => Ok(Self::LogisticRegression(
                LogisticRegressionParams::default(),
            )),
            RANDOM_FOREST => Ok(Self::RandomForest(RandomForestParams::default())),
            other => Err(Error::training(other, "unknown algorithm")),
        }
    }

    /// Algorithm identifier these parameters belong to.
    #[must_use]
    pub const fn algorithm_id(&self) -> &'static str {
        match self {
            Self::LogisticRegression(_) => LOGISTIC_REGRESSION,
            Self::RandomForest(_) => RANDOM_FOREST,
        }
    }

    /// Parameters as the string map recorded with each run.
    #[must_use]
    pub fn to_param_map(&self) -> BTreeMap<String, String> {
        match self {
            Self::LogisticRegression(p) => p.to_param_map(),
            Self::RandomForest(p) => p.to_param_map(),
        }
    }

    /// Fit on encoded rows and labels.
    ///
    /// # Errors
    ///
    /// Returns `Error::Training` on invalid parameters, degenerate input or
    /// non-convergence.
    pub fn fit(&self, x: &[Vec<f64>], y: &[u8]) -> Result<FittedModel> {
        check_training_data(self.algorithm_id(), x, y)?;
        match self {
            Self::LogisticRegression(p) => p.fit(x, y).map(FittedModel::LogisticRegression),
            Self::RandomForest(p) => p.fit(x, y).map(FittedModel::RandomForest),
        }
    }
}

/// Fitted state of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum FittedModel {
    /// Fitted logistic regression
    LogisticRegression(LogisticRegressionModel),
    /// Fitted random forest
    RandomForest(RandomForestModel),
}

impl Classifier for FittedModel {
    fn predict_proba(&self, row: &[f64]) -> f64 {
        match self {
            Self::LogisticRegression(m) => m.predict_proba(row),
            Self::RandomForest(m) => m.predict_proba(row),
        }
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        match self {
            Self::LogisticRegression(m) => m.feature_importances(),
            Self::RandomForest(m) => m.feature_importances(),
        }
    }
}

/// One fitted model produced by one trainer invocation. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateModel {
    algorithm_id: String,
    hyperparameters: Hyperparameters,
    fitted: FittedModel,
}

impl CandidateModel {
    /// Algorithm identifier.
    #[must_use]
    pub fn algorithm_id(&self) -> &str {
        &self.algorithm_id
    }

    /// Hyperparameters used for the fit.
    #[must_use]
    pub const fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    /// Fitted state.
    #[must_use]
    pub const fn fitted(&self) -> &FittedModel {
        &self.fitted
    }

    /// Class-1 probabilities for a batch of encoded rows.
    #[must_use]
    pub fn predict_proba_batch(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.fitted.predict_proba(r)).collect()
    }
}

impl Classifier for CandidateModel {
    fn predict_proba(&self, row: &[f64]) -> f64 {
        self.fitted.predict_proba(row)
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        self.fitted.feature_importances()
    }
}

/// Fits candidate models on a preprocessed split.
#[derive(Debug, Clone, Copy, Default)]
pub struct Trainer;

impl Trainer {
    /// Create a trainer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Fit `algorithm_id` with `hyperparameters` on the training side of `split`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Training` if the id and parameters disagree, the
    /// parameters are invalid, or the fit does not converge.
    pub fn train(
        &self,
        algorithm_id: &str,
        hyperparameters: &Hyperparameters,
        split: &PreprocessedSplit,
    ) -> Result<CandidateModel> {
        if hyperparameters.algorithm_id() != algorithm_id {
            return Err(Error::training(
                algorithm_id,
                format!(
                    "hyperparameters belong to '{}'",
                    hyperparameters.algorithm_id()
                ),
            ));
        }
        let started = std::time::Instant::now();
        let fitted = hyperparameters.fit(split.train_x(), split.train_y())?;
        tracing::info!(
            algorithm = algorithm_id,
            rows = split.train_y().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "trained candidate"
        );
        Ok(CandidateModel {
            algorithm_id: algorithm_id.to_string(),
            hyperparameters: hyperparameters.clone(),
            fitted,
        })
    }
}

fn check_training_data(algorithm: &str, x: &[Vec<f64>], y: &[u8]) -> Result<()> {
    if x.is_empty() || x.len() != y.len() {
        return Err(Error::training(
            algorithm,
            format!("{} rows with {} labels", x.len(), y.len()),
        ));
    }
    let width = x[0].len();
    if width == 0 || x.iter().any(|r| r.len() != width) {
        return Err(Error::training(algorithm, "ragged or empty feature matrix"));
    }
    if x.iter().flatten().any(|v| !v.is_finite()) {
        return Err(Error::training(algorithm, "non-finite feature value"));
    }
    let positives = y.iter().filter(|&&v| v == 1).count();
    if positives == 0 || positives == y.len() {
        return Err(Error::training(algorithm, "training labels contain a single class"));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Two noisy Gaussian blobs separated along the first two features.
    pub fn blobs(n: usize, width: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<u8>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = Vec::with_capacity(n);
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let label = u8::from(i % 2 == 0);
            let shift = if label == 1 { 1.0 } else { -1.0 };
            let row = (0..width)
                .map(|j| {
                    let noise: f64 = rng.gen_range(-1.5..1.5);
                    if j < 2 { shift + noise } else { noise }
                })
                .collect();
            x.push(row);
            y.push(label);
        }
        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::blobs;
    use super::*;

    fn split(seed: u64) -> PreprocessedSplit {
        let (train_x, train_y) = blobs(120, 4, seed);
        let (test_x, test_y) = blobs(40, 4, seed + 1);
        let names = (0..4).map(|i| format!("f{i}")).collect();
        PreprocessedSplit::new(train_x, test_x, train_y, test_y, names).unwrap()
    }

    #[test]
    fn test_train_is_deterministic() {
        let split = split(11);
        let trainer = Trainer::new();
        for id in ALGORITHMS {
            let params = Hyperparameters::defaults_for(id).unwrap();
            let a = trainer.train(id, &params, &split).unwrap();
            let b = trainer.train(id, &params, &split).unwrap();
            assert_eq!(a, b, "{id} must be deterministic");
        }
    }

    #[test]
    fn test_mismatched_algorithm_is_training_error() {
        let params = Hyperparameters::defaults_for(RANDOM_FOREST).unwrap();
        let err = Trainer::new()
            .train(LOGISTIC_REGRESSION, &params, &split(3))
            .unwrap_err();
        assert!(matches!(err, Error::Training { .. }));
    }

    #[test]
    fn test_unknown_algorithm() {
        assert!(Hyperparameters::defaults_for("svm").is_err());
    }

    #[test]
    fn test_single_class_rejected() {
        let x = vec![vec![1.0], vec![2.0]];
        let params = Hyperparameters::defaults_for(LOGISTIC_REGRESSION).unwrap();
        let err = params.fit(&x, &[1, 1]).unwrap_err();
        assert!(err.to_string().contains("single class"));
    }

    #[test]
    fn test_param_map_is_strings() {
        let params = Hyperparameters::defaults_for(RANDOM_FOREST).unwrap();
        let map = params.to_param_map();
        assert_eq!(map.get("n_estimators").map(String::as_str), Some("100"));
    }

    #[test]
    fn test_hyperparameters_serde_tag() {
        let params = Hyperparameters::defaults_for(LOGISTIC_REGRESSION).unwrap();
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["algorithm"], "logistic_regression");
        let back: Hyperparameters = serde_json::from_value(json).unwrap();
        assert_eq!(back, params);
    }
}
