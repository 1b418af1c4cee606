//! Preprocessor - stratified split plus a fitted scaling/encoding transform
//!
//! The split happens first and the transform is fit on training rows only,
//! so test rows never leak into imputation or scaling statistics. The
//! resulting [`FittedTransform`] is serialisable and travels with its model
//! into the registry package.

use crate::dataset::{FeatureKind, FeatureSchema, RecordSet};
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Train/test matrices derived from one record set.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedSplit {
    train_x: Vec<Vec<f64>>,
    test_x: Vec<Vec<f64>>,
    train_y: Vec<u8>,
    test_y: Vec<u8>,
    feature_names: Vec<String>,
}

impl PreprocessedSplit {
    /// Assemble a split from already-encoded matrices.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if row and label counts or widths disagree.
    pub fn new(
        train_x: Vec<Vec<f64>>,
        test_x: Vec<Vec<f64>>,
        train_y: Vec<u8>,
        test_y: Vec<u8>,
        feature_names: Vec<String>,
    ) -> Result<Self> {
        if train_x.len() != train_y.len() || test_x.len() != test_y.len() {
            return Err(Error::InvalidInput(
                "matrix rows and label counts differ".to_string(),
            ));
        }
        let width = feature_names.len();
        if train_x.iter().chain(&test_x).any(|row| row.len() != width) {
            return Err(Error::InvalidInput(format!(
                "every encoded row must have {width} columns"
            )));
        }
        Ok(Self {
            train_x,
            test_x,
            train_y,
            test_y,
            feature_names,
        })
    }

    /// Encoded training rows.
    #[must_use]
    pub fn train_x(&self) -> &[Vec<f64>] {
        &self.train_x
    }

    /// Encoded held-out rows.
    #[must_use]
    pub fn test_x(&self) -> &[Vec<f64>] {
        &self.test_x
    }

    /// Training labels.
    #[must_use]
    pub fn train_y(&self) -> &[u8] {
        &self.train_y
    }

    /// Held-out labels.
    #[must_use]
    pub fn test_y(&self) -> &[u8] {
        &self.test_y
    }

    /// Names of encoded columns, in matrix order.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Encoded width.
    #[must_use]
    pub fn width(&self) -> usize {
        self.feature_names.len()
    }
}

/// Per-column transform learned from training rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnTransform {
    /// Median fill, then `(x - mean) / std`
    Scale {
        /// Imputation value
        fill: f64,
        /// Training mean after imputation
        mean: f64,
        /// Training standard deviation (1.0 when constant)
        std: f64,
    },
    /// Mode fill, then one indicator per observed category
    OneHot {
        /// Imputation value
        fill: f64,
        /// Sorted observed categories
        categories: Vec<f64>,
    },
}

impl ColumnTransform {
    fn width(&self) -> usize {
        match self {
            Self::Scale { .. } => 1,
            Self::OneHot { categories, .. } => categories.len(),
        }
    }

    fn encode_into(&self, value: Option<f64>, out: &mut Vec<f64>) {
        match self {
            Self::Scale { fill, mean, std } => {
                out.push((value.unwrap_or(*fill) - mean) / std);
            }
            Self::OneHot { fill, categories } => {
                let v = value.unwrap_or(*fill);
                // unseen categories encode as all zeros
                out.extend(categories.iter().map(|c| if *c == v { 1.0 } else { 0.0 }));
            }
        }
    }
}

/// Fitted preprocessing transform, reusable at inference time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedTransform {
    schema: FeatureSchema,
    columns: Vec<ColumnTransform>,
}

impl FittedTransform {
    /// Fit imputation, scaling and encoding statistics on `rows`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if a column has no observed value.
    pub fn fit(schema: &FeatureSchema, rows: &[&[Option<f64>]]) -> Result<Self> {
        let mut columns = Vec::with_capacity(schema.width());
        for (j, spec) in schema.features().iter().enumerate() {
            let observed: Vec<f64> = rows.iter().filter_map(|r| r[j]).collect();
            if observed.is_empty() {
                return Err(Error::Schema(format!(
                    "{}: no observed values in the training split",
                    spec.name
                )));
            }
            let column = match spec.kind {
                FeatureKind::Numerical => {
                    let fill = median(&observed);
                    let filled: Vec<f64> = rows.iter().map(|r| r[j].unwrap_or(fill)).collect();
                    let (mean, std) = mean_std(&filled);
                    ColumnTransform::Scale {
                        fill,
                        mean,
                        std: if std > 0.0 { std } else { 1.0 },
                    }
                }
                FeatureKind::Categorical => {
                    let fill = mode(&observed);
                    let mut categories: Vec<f64> = observed.clone();
                    categories.push(fill);
                    categories.sort_by(f64::total_cmp);
                    categories.dedup();
                    ColumnTransform::OneHot { fill, categories }
                }
            };
            columns.push(column);
        }
        Ok(Self {
            schema: schema.clone(),
            columns,
        })
    }

    /// Schema the transform was fit against.
    #[must_use]
    pub const fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Learned per-column transforms.
    #[must_use]
    pub fn columns(&self) -> &[ColumnTransform] {
        &self.columns
    }

    /// Encoded width.
    #[must_use]
    pub fn output_width(&self) -> usize {
        self.columns.iter().map(ColumnTransform::width).sum()
    }

    /// Encoded column names (`age`, `cp=1`, ...).
    #[must_use]
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.output_width());
        for (spec, column) in self.schema.features().iter().zip(&self.columns) {
            match column {
                ColumnTransform::Scale { .. } => names.push(spec.name.clone()),
                ColumnTransform::OneHot { categories, .. } => {
                    names.extend(categories.iter().map(|c| format!("{}={c}", spec.name)));
                }
            }
        }
        names
    }

    /// Encode one raw row.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if the row does not match the schema.
    pub fn transform_row(&self, row: &[Option<f64>]) -> Result<Vec<f64>> {
        self.schema.check_row(row)?;
        let mut out = Vec::with_capacity(self.output_width());
        for (column, value) in self.columns.iter().zip(row) {
            column.encode_into(*value, &mut out);
        }
        Ok(out)
    }
}

/// Splits and encodes a record set.
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    seed: u64,
    test_ratio: f64,
}

impl Preprocessor {
    /// Create a preprocessor with a split seed and held-out fraction.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` unless `0 < test_ratio < 1`.
    pub fn new(seed: u64, test_ratio: f64) -> Result<Self> {
        if !(test_ratio > 0.0 && test_ratio < 1.0) {
            return Err(Error::InvalidInput(format!(
                "test ratio must be in (0, 1), got {test_ratio}"
            )));
        }
        Ok(Self { seed, test_ratio })
    }

    /// Split `records` stratified by label, fit the transform on the training
    /// side and encode both sides.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if the records cannot be split or encoded.
    pub fn fit_transform(&self, records: &RecordSet) -> Result<(PreprocessedSplit, FittedTransform)> {
        let rows = records.rows();
        for (i, row) in rows.iter().enumerate() {
            records
                .schema()
                .check_row(row.features())
                .map_err(|e| Error::Schema(format!("row {i}: {e}")))?;
        }
        let labels: Vec<u8> = rows.iter().map(|r| r.label()).collect();
        let (train_idx, test_idx) = stratified_split(&labels, self.test_ratio, self.seed)?;

        let train_rows: Vec<&[Option<f64>]> =
            train_idx.iter().map(|&i| rows[i].features()).collect();
        let transform = FittedTransform::fit(records.schema(), &train_rows)?;

        let encode = |idx: &[usize]| -> Result<Vec<Vec<f64>>> {
            idx.iter()
                .map(|&i| transform.transform_row(rows[i].features()))
                .collect()
        };
        let split = PreprocessedSplit::new(
            encode(&train_idx)?,
            encode(&test_idx)?,
            train_idx.iter().map(|&i| labels[i]).collect(),
            test_idx.iter().map(|&i| labels[i]).collect(),
            transform.feature_names(),
        )?;

        tracing::info!(
            train = split.train_y().len(),
            test = split.test_y().len(),
            width = split.width(),
            seed = self.seed,
            "preprocessed record set"
        );
        Ok((split, transform))
    }
}

/// Seeded stratified split returning sorted `(train, test)` row indices.
///
/// # Errors
///
/// Returns `Error::Schema` if a class has fewer than two rows.
pub fn stratified_split(labels: &[u8], test_ratio: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in [0u8, 1u8] {
        let mut members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, y)| **y == class)
            .map(|(i, _)| i)
            .collect();
        if members.len() < 2 {
            return Err(Error::Schema(format!(
                "class {class} has {} rows; a stratified split needs at least 2",
                members.len()
            )));
        }
        members.shuffle(&mut rng);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n_test = ((members.len() as f64 * test_ratio).round() as usize).clamp(1, members.len() - 1);
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Most frequent value; ties resolve to the smallest.
fn mode(values: &[f64]) -> f64 {
    let mut counts: BTreeMap<u64, (f64, usize)> = BTreeMap::new();
    for &v in values {
        counts.entry(v.to_bits()).or_insert((v, 0)).1 += 1;
    }
    counts
        .values()
        .fold(None::<(f64, usize)>, |best, &(v, n)| match best {
            Some((bv, bn)) if bn > n || (bn == n && bv <= v) => Some((bv, bn)),
            _ => Some((v, n)),
        })
        .map_or(0.0, |(v, _)| v)
}

#[allow(clippy::cast_precision_loss)]
fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{FeatureSpec, Record, ValueType};

    fn toy_records(n: usize) -> RecordSet {
        let schema = FeatureSchema::new(
            vec![
                FeatureSpec::new("x", FeatureKind::Numerical, ValueType::Float, -100.0, 100.0),
                FeatureSpec::new("c", FeatureKind::Categorical, ValueType::Integer, 0.0, 3.0),
            ],
            "target",
        )
        .unwrap();
        #[allow(clippy::cast_precision_loss)]
        let rows = (0..n)
            .map(|i| {
                let x = if i % 7 == 0 { None } else { Some(i as f64 / 3.0) };
                Record::new(vec![x, Some((i % 3) as f64)], u8::from(i % 2 == 0))
            })
            .collect();
        RecordSet::new(schema, rows).unwrap()
    }

    #[test]
    fn test_split_is_stratified_and_disjoint() {
        let labels: Vec<u8> = (0..100).map(|i| u8::from(i < 30)).collect();
        let (train, test) = stratified_split(&labels, 0.2, 42).unwrap();
        assert_eq!(train.len() + test.len(), 100);
        assert_eq!(test.iter().filter(|&&i| labels[i] == 1).count(), 6);
        assert_eq!(test.iter().filter(|&&i| labels[i] == 0).count(), 14);
        assert!(train.iter().all(|i| !test.contains(i)));
    }

    #[test]
    fn test_split_rejects_single_member_class() {
        let labels = vec![0, 0, 0, 1];
        let err = stratified_split(&labels, 0.25, 1).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_fit_transform_shapes_and_names() {
        let pre = Preprocessor::new(42, 0.25).unwrap();
        let (split, transform) = pre.fit_transform(&toy_records(40)).unwrap();
        assert_eq!(split.train_y().len() + split.test_y().len(), 40);
        // x + three one-hot columns for c
        assert_eq!(split.width(), 4);
        assert_eq!(transform.feature_names(), vec!["x", "c=0", "c=1", "c=2"]);
    }

    #[test]
    fn test_training_columns_are_standardised() {
        let pre = Preprocessor::new(7, 0.2).unwrap();
        let (split, _) = pre.fit_transform(&toy_records(60)).unwrap();
        let xs: Vec<f64> = split.train_x().iter().map(|r| r[0]).collect();
        let (mean, std) = mean_std(&xs);
        assert!(mean.abs() < 1e-9);
        assert!((std - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unseen_category_encodes_as_zeros() {
        let pre = Preprocessor::new(3, 0.2).unwrap();
        let (_, transform) = pre.fit_transform(&toy_records(30)).unwrap();
        let encoded = transform.transform_row(&[Some(1.0), Some(3.0)]).unwrap();
        assert_eq!(&encoded[1..], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_invalid_ratio() {
        assert!(Preprocessor::new(1, 0.0).is_err());
        assert!(Preprocessor::new(1, 1.0).is_err());
        assert!(Preprocessor::new(1, f64::NAN).is_err());
    }

    #[test]
    fn test_mode_tie_breaks_low() {
        assert!((mode(&[2.0, 1.0, 2.0, 1.0, 3.0]) - 1.0).abs() < f64::EPSILON);
        assert!((median(&[4.0, 1.0, 3.0, 2.0]) - 2.5).abs() < f64::EPSILON);
    }
}
