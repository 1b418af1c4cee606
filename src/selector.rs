//! Champion selection
//!
//! Ordering, best first: highest `roc_auc`, then highest
//! `cv_accuracy_mean`, then earliest timestamp, then lowest recording
//! sequence. Metrics are finite, so `total_cmp` gives a total order and the
//! winner is independent of input order.

use std::cmp::Ordering;

use crate::experiment::Run;
use crate::{Error, Result};

/// Compare two runs; `Ordering::Less` means `a` ranks ahead of `b`.
#[must_use]
pub fn rank(a: &Run, b: &Run) -> Ordering {
    b.metrics()
        .roc_auc()
        .total_cmp(&a.metrics().roc_auc())
        .then_with(|| {
            b.metrics()
                .cv_accuracy_mean()
                .total_cmp(&a.metrics().cv_accuracy_mean())
        })
        .then_with(|| a.timestamp().cmp(&b.timestamp()))
        .then_with(|| a.sequence().cmp(&b.sequence()))
}

/// Pick the champion among `runs`.
///
/// # Errors
///
/// `Error::NoCandidate` if `runs` is empty.
pub fn select(runs: &[Run]) -> Result<&Run> {
    let winner = runs
        .iter()
        .min_by(|a, b| rank(a, b))
        .ok_or_else(|| Error::NoCandidate("no run survived training and evaluation".to_string()))?;
    tracing::info!(
        run_id = winner.run_id(),
        algorithm = winner.algorithm_id(),
        roc_auc = winner.metrics().roc_auc(),
        candidates = runs.len(),
        "selected champion"
    );
    Ok(winner)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};

    use crate::evaluate::{ArtifactBundle, MetricName, MetricSet};
    use crate::experiment::Run;
    use crate::model::{CandidateModel, Hyperparameters, Trainer, LOGISTIC_REGRESSION};
    use crate::preprocess::PreprocessedSplit;

    pub fn tiny_candidate() -> Arc<CandidateModel> {
        let split = PreprocessedSplit::new(
            vec![vec![-1.0], vec![-0.4], vec![0.3], vec![1.1]],
            vec![vec![0.0]],
            vec![0, 0, 1, 1],
            vec![0],
            vec!["x".into()],
        )
        .unwrap();
        let params = Hyperparameters::defaults_for(LOGISTIC_REGRESSION).unwrap();
        Arc::new(Trainer::new().train(LOGISTIC_REGRESSION, &params, &split).unwrap())
    }

    pub fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    pub fn run(id: &str, roc_auc: f64, cv_mean: f64, ts: i64, seq: u64) -> Run {
        let metrics = MetricSet::from_pairs(MetricName::ALL.map(|m| {
            let v = match m {
                MetricName::RocAuc => roc_auc,
                MetricName::CvAccuracyMean => cv_mean,
                _ => 0.5,
            };
            (m, v)
        }))
        .unwrap();
        Run::new(id, tiny_candidate(), metrics, ArtifactBundle::new(), at(ts), seq)
    }
}
