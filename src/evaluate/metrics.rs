//! Binary classification metrics

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// 2x2 confusion matrix for labels `{0, 1}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Predicted 0, actual 0
    pub true_negatives: usize,
    /// Predicted 1, actual 0
    pub false_positives: usize,
    /// Predicted 0, actual 1
    pub false_negatives: usize,
    /// Predicted 1, actual 1
    pub true_positives: usize,
}

impl ConfusionMatrix {
    /// Tally predictions against ground truth.
    #[must_use]
    pub fn from_predictions(y_true: &[u8], y_pred: &[u8]) -> Self {
        let mut m = Self::default();
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t, p) {
                (0, 0) => m.true_negatives += 1,
                (0, _) => m.false_positives += 1,
                (_, 0) => m.false_negatives += 1,
                _ => m.true_positives += 1,
            }
        }
        m
    }

    /// Total number of tallied rows.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.true_negatives + self.false_positives + self.false_negatives + self.true_positives
    }

    /// Fraction of correct predictions (0.0 when empty).
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    /// `tp / (tp + fp)`, 0.0 when nothing was predicted positive.
    #[must_use]
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// `tp / (tp + fn)`, 0.0 when there are no positives.
    #[must_use]
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Harmonic mean of precision and recall, 0.0 when both are zero.
    #[must_use]
    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Fraction of positions where `y_true` and `y_pred` agree.
#[must_use]
pub fn accuracy(y_true: &[u8], y_pred: &[u8]) -> f64 {
    ConfusionMatrix::from_predictions(y_true, y_pred).accuracy()
}

fn class_counts(y_true: &[u8]) -> (usize, usize) {
    let positives = y_true.iter().filter(|&&y| y == 1).count();
    (y_true.len() - positives, positives)
}

/// Area under the ROC curve via the Mann-Whitney rank statistic.
///
/// Tied scores receive their average rank.
///
/// # Errors
///
/// `Error::Evaluation` if `y_true` contains a single class or lengths differ.
#[allow(clippy::cast_precision_loss)]
pub fn roc_auc(y_true: &[u8], scores: &[f64]) -> Result<f64> {
    if y_true.len() != scores.len() {
        return Err(Error::Evaluation(format!(
            "{} labels but {} scores",
            y_true.len(),
            scores.len()
        )));
    }
    let (negatives, positives) = class_counts(y_true);
    if negatives == 0 || positives == 0 {
        return Err(Error::Evaluation(
            "ROC-AUC is undefined for a single-class test split".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && scores[order[end + 1]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; a tie group shares the mean of its ranks
        let avg_rank = (start + end) as f64 / 2.0 + 1.0;
        positive_rank_sum += order[start..=end]
            .iter()
            .filter(|&&i| y_true[i] == 1)
            .count() as f64
            * avg_rank;
        start = end + 1;
    }

    let (p, n) = (positives as f64, negatives as f64);
    Ok((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// ROC curve points `(false_positive_rate, true_positive_rate)`, starting
/// at `(0, 0)` and ending at `(1, 1)`, one point per distinct threshold.
///
/// # Errors
///
/// `Error::Evaluation` if `y_true` contains a single class.
#[allow(clippy::cast_precision_loss)]
pub fn roc_curve(y_true: &[u8], scores: &[f64]) -> Result<Vec<(f64, f64)>> {
    let (negatives, positives) = class_counts(y_true);
    if negatives == 0 || positives == 0 {
        return Err(Error::Evaluation(
            "ROC curve is undefined for a single-class test split".to_string(),
        ));
    }
    let mut order: Vec<usize> = (0..scores.len().min(y_true.len())).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut points = vec![(0.0, 0.0)];
    let (mut tp, mut fp) = (0usize, 0usize);
    for (k, &i) in order.iter().enumerate() {
        if y_true[i] == 1 {
            tp += 1;
        } else {
            fp += 1;
        }
        let last_of_threshold = order.get(k + 1).map_or(true, |&j| scores[j] != scores[i]);
        if last_of_threshold {
            points.push((fp as f64 / negatives as f64, tp as f64 / positives as f64));
        }
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_counts() {
        let m = ConfusionMatrix::from_predictions(&[0, 0, 1, 1, 1], &[0, 1, 0, 1, 1]);
        assert_eq!(m.true_negatives, 1);
        assert_eq!(m.false_positives, 1);
        assert_eq!(m.false_negatives, 1);
        assert_eq!(m.true_positives, 2);
        assert!((m.accuracy() - 0.6).abs() < 1e-12);
        assert!((m.precision() - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.recall() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_division_is_zero() {
        let m = ConfusionMatrix::from_predictions(&[0, 1], &[0, 0]);
        assert_eq!(m.precision(), 0.0);
        assert_eq!(m.f1(), 0.0);
    }

    #[test]
    fn test_roc_auc_perfect_and_inverted() {
        let y = [0, 0, 1, 1];
        assert!((roc_auc(&y, &[0.1, 0.2, 0.8, 0.9]).unwrap() - 1.0).abs() < 1e-12);
        assert!(roc_auc(&y, &[0.9, 0.8, 0.2, 0.1]).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_ties_count_half() {
        // one positive tied with one negative, other pair ordered correctly
        let auc = roc_auc(&[0, 1, 0, 1], &[0.5, 0.5, 0.1, 0.9]).unwrap();
        assert!((auc - 0.875).abs() < 1e-12);
        let all_tied = roc_auc(&[0, 1, 0, 1], &[0.3; 4]).unwrap();
        assert!((all_tied - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_single_class_fails() {
        assert!(matches!(
            roc_auc(&[1, 1, 1], &[0.2, 0.4, 0.9]),
            Err(Error::Evaluation(_))
        ));
    }

    #[test]
    fn test_roc_curve_endpoints() {
        let points = roc_curve(&[0, 1, 0, 1], &[0.2, 0.7, 0.4, 0.7]).unwrap();
        assert_eq!(points.first(), Some(&(0.0, 0.0)));
        assert_eq!(points.last(), Some(&(1.0, 1.0)));
        // tied positives collapse into one threshold
        assert_eq!(points[1], (0.0, 1.0));
    }
}
