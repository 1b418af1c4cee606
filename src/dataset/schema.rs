//! Feature schema - names, kinds and declared valid ranges

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a feature is encoded by the preprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Continuous value: median-imputed, standard-scaled
    Numerical,
    /// Discrete code: mode-imputed, one-hot encoded
    Categorical,
}

/// Declared value type of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Whole numbers only
    Integer,
    /// Any finite number
    Float,
}

/// One column of the feature schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Column name in the raw table
    pub name: String,
    /// Encoding kind
    pub kind: FeatureKind,
    /// Declared value type
    pub value_type: ValueType,
    /// Inclusive lower bound
    pub min: f64,
    /// Inclusive upper bound
    pub max: f64,
}

impl FeatureSpec {
    /// Create a feature spec.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: FeatureKind,
        value_type: ValueType,
        min: f64,
        max: f64,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            value_type,
            min,
            max,
        }
    }

    /// Check a single present value against type and range.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` describing the violation.
    pub fn check(&self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::Schema(format!(
                "{}: value {value} is not finite",
                self.name
            )));
        }
        if self.value_type == ValueType::Integer && value.fract() != 0.0 {
            return Err(Error::Schema(format!(
                "{}: value {value} is not an integer",
                self.name
            )));
        }
        if value < self.min || value > self.max {
            return Err(Error::Schema(format!(
                "{}: value {value} out of range [{}, {}]",
                self.name, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Ordered feature schema shared by the preprocessor and the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    features: Vec<FeatureSpec>,
    target: String,
}

impl FeatureSchema {
    /// Create a schema from ordered feature specs and the label column name.
    ///
    /// # Errors
    ///
    /// Returns error if the schema is empty, names repeat, or a range is inverted.
    pub fn new(features: Vec<FeatureSpec>, target: impl Into<String>) -> Result<Self> {
        let target = target.into();
        if features.is_empty() {
            return Err(Error::Schema("feature schema is empty".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for spec in &features {
            if !seen.insert(spec.name.as_str()) || spec.name == target {
                return Err(Error::Schema(format!("duplicate column '{}'", spec.name)));
            }
            if spec.min > spec.max {
                return Err(Error::Schema(format!(
                    "{}: min {} exceeds max {}",
                    spec.name, spec.min, spec.max
                )));
            }
        }
        Ok(Self { features, target })
    }

    /// Schema of the Cleveland heart-disease table.
    ///
    /// Ranges accept both the raw UCI codes (`cp` 1-4, `thal` 3/6/7) and the
    /// zero-based re-encoding used by common CSV mirrors.
    #[must_use]
    pub fn heart_disease() -> Self {
        use FeatureKind::{Categorical, Numerical};
        use ValueType::{Float, Integer};
        let features = vec![
            FeatureSpec::new("age", Numerical, Integer, 0.0, 120.0),
            FeatureSpec::new("sex", Categorical, Integer, 0.0, 1.0),
            FeatureSpec::new("cp", Categorical, Integer, 0.0, 4.0),
            FeatureSpec::new("trestbps", Numerical, Integer, 50.0, 250.0),
            FeatureSpec::new("chol", Numerical, Integer, 100.0, 600.0),
            FeatureSpec::new("fbs", Categorical, Integer, 0.0, 1.0),
            FeatureSpec::new("restecg", Categorical, Integer, 0.0, 2.0),
            FeatureSpec::new("thalach", Numerical, Integer, 50.0, 250.0),
            FeatureSpec::new("exang", Categorical, Integer, 0.0, 1.0),
            FeatureSpec::new("oldpeak", Numerical, Float, 0.0, 10.0),
            FeatureSpec::new("slope", Categorical, Integer, 0.0, 3.0),
            FeatureSpec::new("ca", Categorical, Integer, 0.0, 4.0),
            FeatureSpec::new("thal", Categorical, Integer, 0.0, 7.0),
        ];
        Self {
            features,
            target: "target".to_string(),
        }
    }

    /// Ordered feature specs.
    #[must_use]
    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    /// Label column name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Number of raw feature columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.features.len()
    }

    /// Validate one raw row (missing values allowed).
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` on width mismatch or the first invalid value.
    pub fn check_row(&self, values: &[Option<f64>]) -> Result<()> {
        if values.len() != self.width() {
            return Err(Error::Schema(format!(
                "row has {} values, schema declares {}",
                values.len(),
                self.width()
            )));
        }
        for (spec, value) in self.features.iter().zip(values) {
            if let Some(v) = value {
                spec.check(*v)?;
            }
        }
        Ok(())
    }

    /// Validate a serving request keyed by feature name.
    ///
    /// Returns every problem found; an empty list means the request is valid.
    #[must_use]
    pub fn validate_request(&self, features: &HashMap<String, f64>) -> Vec<String> {
        let mut errors = Vec::new();
        for spec in &self.features {
            match features.get(&spec.name) {
                None => errors.push(format!("Missing required feature: {}", spec.name)),
                Some(v) => {
                    if let Err(Error::Schema(msg)) = spec.check(*v) {
                        errors.push(msg);
                    }
                }
            }
        }
        errors
    }

    /// Order a named request into a raw row.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` listing every validation problem.
    pub fn row_from_request(&self, features: &HashMap<String, f64>) -> Result<Vec<Option<f64>>> {
        let errors = self.validate_request(features);
        if !errors.is_empty() {
            return Err(Error::Schema(errors.join("; ")));
        }
        Ok(self
            .features
            .iter()
            .map(|spec| features.get(&spec.name).copied())
            .collect())
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::heart_disease()
    }
}
