//! Candidate evaluation: held-out metrics, cross-validation and plots
//!
//! Every metric leaving this module is a finite `f64`. A candidate whose
//! metrics cannot be computed (single-class test split, non-finite value,
//! failed fold) is rejected with `Error::Evaluation` and drops out of the
//! candidate pool.

mod artifacts;
pub mod metrics;

pub use artifacts::{
    render_confusion_matrix, render_feature_importance, render_roc_curve, Artifact,
    ArtifactBundle, TOP_FEATURES,
};
pub use metrics::ConfusionMatrix;

use crate::model::{CandidateModel, Classifier};
use crate::preprocess::PreprocessedSplit;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default number of cross-validation folds
pub const DEFAULT_CV_FOLDS: usize = 5;

/// Names in the fixed metric vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    /// Held-out accuracy
    Accuracy,
    /// Held-out precision
    Precision,
    /// Held-out recall
    Recall,
    /// Held-out F1
    F1,
    /// Held-out ROC-AUC, the selection key
    RocAuc,
    /// Mean k-fold accuracy on the training side
    CvAccuracyMean,
    /// Population std of k-fold accuracy
    CvAccuracyStd,
}

impl MetricName {
    /// Every metric, in reporting order.
    pub const ALL: [Self; 7] = [
        Self::Accuracy,
        Self::Precision,
        Self::Recall,
        Self::F1,
        Self::RocAuc,
        Self::CvAccuracyMean,
        Self::CvAccuracyStd,
    ];

    /// Wire name used for tracking keys and registry tags.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Precision => "precision",
            Self::Recall => "recall",
            Self::F1 => "f1",
            Self::RocAuc => "roc_auc",
            Self::CvAccuracyMean => "cv_accuracy_mean",
            Self::CvAccuracyStd => "cv_accuracy_std",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The seven evaluation metrics of one candidate. All values are finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    accuracy: f64,
    precision: f64,
    recall: f64,
    f1: f64,
    roc_auc: f64,
    cv_accuracy_mean: f64,
    cv_accuracy_std: f64,
}

impl MetricSet {
    /// Build from `(name, value)` pairs covering the whole vocabulary.
    ///
    /// # Errors
    ///
    /// `Error::Evaluation` if a metric is missing or non-finite.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (MetricName, f64)>) -> Result<Self> {
        let map: BTreeMap<MetricName, f64> = pairs.into_iter().collect();
        let get = |name: MetricName| -> Result<f64> {
            let value = *map
                .get(&name)
                .ok_or_else(|| Error::Evaluation(format!("metric '{name}' missing")))?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(Error::Evaluation(format!("metric '{name}' is {value}")))
            }
        };
        Ok(Self {
            accuracy: get(MetricName::Accuracy)?,
            precision: get(MetricName::Precision)?,
            recall: get(MetricName::Recall)?,
            f1: get(MetricName::F1)?,
            roc_auc: get(MetricName::RocAuc)?,
            cv_accuracy_mean: get(MetricName::CvAccuracyMean)?,
            cv_accuracy_std: get(MetricName::CvAccuracyStd)?,
        })
    }

    /// Build from a string-keyed map, e.g. one read back from tracking.
    ///
    /// # Errors
    ///
    /// `Error::Evaluation` on unknown, missing or non-finite metrics.
    pub fn from_map(map: &BTreeMap<String, f64>) -> Result<Self> {
        let pairs = map
            .iter()
            .map(|(k, v)| {
                MetricName::parse(k)
                    .map(|m| (m, *v))
                    .ok_or_else(|| Error::Evaluation(format!("unknown metric '{k}'")))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_pairs(pairs)
    }

    /// Value of one metric.
    #[must_use]
    pub const fn get(&self, name: MetricName) -> f64 {
        match name {
            MetricName::Accuracy => self.accuracy,
            MetricName::Precision => self.precision,
            MetricName::Recall => self.recall,
            MetricName::F1 => self.f1,
            MetricName::RocAuc => self.roc_auc,
            MetricName::CvAccuracyMean => self.cv_accuracy_mean,
            MetricName::CvAccuracyStd => self.cv_accuracy_std,
        }
    }

    /// Held-out ROC-AUC; the selection criterion.
    #[must_use]
    pub const fn roc_auc(&self) -> f64 {
        self.roc_auc
    }

    /// Mean cross-validated accuracy; the first tie-break.
    #[must_use]
    pub const fn cv_accuracy_mean(&self) -> f64 {
        self.cv_accuracy_mean
    }

    /// `(name, value)` pairs in reporting order.
    pub fn iter(&self) -> impl Iterator<Item = (MetricName, f64)> + '_ {
        MetricName::ALL.into_iter().map(|m| (m, self.get(m)))
    }

    /// String-keyed copy for tracking stores.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.iter().map(|(m, v)| (m.as_str().to_string(), v)).collect()
    }
}

/// Computes metrics and artifacts for candidate models.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    cv_folds: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self {
            cv_folds: DEFAULT_CV_FOLDS,
        }
    }
}

impl Evaluator {
    /// Evaluator with `cv_folds` stratified folds.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` if `cv_folds < 2`.
    pub fn new(cv_folds: usize) -> Result<Self> {
        if cv_folds < 2 {
            return Err(Error::InvalidInput(format!(
                "cv_folds must be >= 2, got {cv_folds}"
            )));
        }
        Ok(Self { cv_folds })
    }

    /// Configured fold count.
    #[must_use]
    pub const fn cv_folds(&self) -> usize {
        self.cv_folds
    }

    /// Score `candidate` on the test side of `split`, cross-validate its
    /// hyperparameters on the training side, and render diagnostics.
    ///
    /// # Errors
    ///
    /// `Error::Evaluation` when a metric is undefined or non-finite,
    /// `Error::Artifact` when rendering fails.
    pub fn evaluate(
        &self,
        candidate: &CandidateModel,
        split: &PreprocessedSplit,
    ) -> Result<(MetricSet, ArtifactBundle)> {
        let algorithm = candidate.algorithm_id();
        let scores = candidate.predict_proba_batch(split.test_x());
        let predictions: Vec<u8> = scores.iter().map(|&p| u8::from(p > 0.5)).collect();
        let matrix = ConfusionMatrix::from_predictions(split.test_y(), &predictions);
        let auc = metrics::roc_auc(split.test_y(), &scores)?;
        let (cv_mean, cv_std) = self.cross_validate(candidate, split)?;

        let metric_set = MetricSet::from_pairs([
            (MetricName::Accuracy, matrix.accuracy()),
            (MetricName::Precision, matrix.precision()),
            (MetricName::Recall, matrix.recall()),
            (MetricName::F1, matrix.f1()),
            (MetricName::RocAuc, auc),
            (MetricName::CvAccuracyMean, cv_mean),
            (MetricName::CvAccuracyStd, cv_std),
        ])?;
        tracing::info!(
            algorithm,
            roc_auc = metric_set.roc_auc(),
            accuracy = metric_set.get(MetricName::Accuracy),
            cv_accuracy_mean = cv_mean,
            "evaluated candidate"
        );

        let mut bundle = ArtifactBundle::new();
        let curve = metrics::roc_curve(split.test_y(), &scores)?;
        bundle.insert(render_roc_curve(algorithm, &curve, auc)?);
        bundle.insert(render_confusion_matrix(algorithm, &matrix)?);
        if let Some(importances) = candidate.feature_importances() {
            bundle.insert(render_feature_importance(
                algorithm,
                split.feature_names(),
                &importances,
            )?);
        }
        Ok((metric_set, bundle))
    }

    /// Stratified k-fold accuracy `(mean, population std)` over the
    /// training side, refitting the candidate's hyperparameters per fold.
    ///
    /// # Errors
    ///
    /// `Error::Evaluation` if a class has fewer rows than folds or a fold
    /// fails to fit.
    #[allow(clippy::cast_precision_loss)]
    pub fn cross_validate(
        &self,
        candidate: &CandidateModel,
        split: &PreprocessedSplit,
    ) -> Result<(f64, f64)> {
        let x = split.train_x();
        let y = split.train_y();
        let folds = stratified_folds(y, self.cv_folds)?;

        let mut scores = Vec::with_capacity(folds.len());
        for (k, held_out) in folds.iter().enumerate() {
            let mut in_fold = vec![false; y.len()];
            held_out.iter().for_each(|&i| in_fold[i] = true);

            let (mut fx, mut fy) = (Vec::new(), Vec::new());
            for i in (0..y.len()).filter(|&i| !in_fold[i]) {
                fx.push(x[i].clone());
                fy.push(y[i]);
            }
            let model = candidate.hyperparameters().fit(&fx, &fy).map_err(|e| {
                Error::Evaluation(format!("cross-validation fold {k} failed: {e}"))
            })?;
            let truth: Vec<u8> = held_out.iter().map(|&i| y[i]).collect();
            let pred: Vec<u8> = held_out.iter().map(|&i| model.predict(&x[i])).collect();
            scores.push(metrics::accuracy(&truth, &pred));
        }

        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let std = (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();
        Ok((mean, std))
    }
}

/// Held-out index sets for stratified k-fold without shuffling: each
/// class's rows, in order, are cut into `k` contiguous chunks whose sizes
/// differ by at most one.
///
/// # Errors
///
/// `Error::Evaluation` if either class has fewer than `k` rows.
pub fn stratified_folds(labels: &[u8], k: usize) -> Result<Vec<Vec<usize>>> {
    let mut folds = vec![Vec::new(); k];
    for class in [0u8, 1] {
        let members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        if members.len() < k {
            return Err(Error::Evaluation(format!(
                "class {class} has {} training rows, fewer than {k} folds",
                members.len()
            )));
        }
        let (base, extra) = (members.len() / k, members.len() % k);
        let mut start = 0;
        for (f, fold) in folds.iter_mut().enumerate() {
            let size = base + usize::from(f < extra);
            fold.extend_from_slice(&members[start..start + size]);
            start += size;
        }
    }
    folds.iter_mut().for_each(|f| f.sort_unstable());
    Ok(folds)
}
