//! Record sets - the typed raw table consumed by the pipeline
//!
//! A [`RecordSet`] is an ordered list of rows, each holding one optional
//! value per schema feature and a binary label. Rows are validated against
//! the [`FeatureSchema`] when the set is built, so every consumer downstream
//! can rely on width, type and range.
//!
//! ```rust
//! use trueno_champion::dataset::{FeatureSchema, Record, RecordSet};
//!
//! let schema = FeatureSchema::heart_disease();
//! let row = Record::new(
//!     vec![Some(63.0), Some(1.0), Some(3.0), Some(145.0), Some(233.0), Some(1.0),
//!          Some(0.0), Some(150.0), Some(0.0), Some(2.3), Some(0.0), Some(0.0), Some(1.0)],
//!     1,
//! );
//! let set = RecordSet::new(schema, vec![row])?;
//! assert_eq!(set.len(), 1);
//! # Ok::<(), trueno_champion::Error>(())
//! ```

mod schema;
mod source;

pub use schema::{FeatureKind, FeatureSchema, FeatureSpec, ValueType};
pub use source::{FileRecordSource, MemoryRecordSource, RecordSource};

use crate::{Error, Result};
use arrow::array::{Array, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

/// One raw row: feature values in schema order plus a binary label.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    features: Vec<Option<f64>>,
    label: u8,
}

impl Record {
    /// Create a row. Labels above zero collapse to class 1.
    #[must_use]
    pub fn new(features: Vec<Option<f64>>, label: u8) -> Self {
        Self {
            features,
            label: u8::from(label > 0),
        }
    }

    /// Feature values in schema order (`None` = missing).
    #[must_use]
    pub fn features(&self) -> &[Option<f64>] {
        &self.features
    }

    /// Binary label (0 = no disease, 1 = disease).
    #[must_use]
    pub const fn label(&self) -> u8 {
        self.label
    }
}

/// Validated raw table.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    schema: FeatureSchema,
    rows: Vec<Record>,
}

impl RecordSet {
    /// Build a record set, validating every row against `schema`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` naming the first offending row.
    pub fn new(schema: FeatureSchema, rows: Vec<Record>) -> Result<Self> {
        for (i, row) in rows.iter().enumerate() {
            schema
                .check_row(row.features())
                .map_err(|e| Error::Schema(format!("row {i}: {e}")))?;
        }
        Ok(Self { schema, rows })
    }

    /// Convert Arrow batches into a record set.
    ///
    /// Columns are located by name and cast to `Float64`; extra columns are
    /// ignored. Rows whose label is null are dropped, matching the cleaning
    /// step of the raw heart-disease table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if a declared column is missing, cannot be
    /// cast to a number, or holds an invalid value.
    pub fn from_batches(schema: FeatureSchema, batches: &[RecordBatch]) -> Result<Self> {
        let mut rows = Vec::new();
        let mut dropped = 0usize;

        for batch in batches {
            let columns = schema
                .features()
                .iter()
                .map(|spec| numeric_column(batch, &spec.name))
                .collect::<Result<Vec<_>>>()?;
            let labels = numeric_column(batch, schema.target())?;

            for row in 0..batch.num_rows() {
                if labels.is_null(row) {
                    dropped += 1;
                    continue;
                }
                let label = labels.value(row);
                if !label.is_finite() || label < 0.0 {
                    return Err(Error::Schema(format!(
                        "{}: invalid label {label}",
                        schema.target()
                    )));
                }
                let features = columns
                    .iter()
                    .map(|col| (!col.is_null(row)).then(|| col.value(row)))
                    .collect();
                rows.push(Record::new(features, u8::from(label > 0.0)));
            }
        }

        if dropped > 0 {
            tracing::debug!(dropped, "dropped rows with missing label");
        }
        Self::new(schema, rows)
    }

    /// Feature schema of this set.
    #[must_use]
    pub const fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Rows in load order.
    #[must_use]
    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the set has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Count of rows with label 1.
    #[must_use]
    pub fn positives(&self) -> usize {
        self.rows.iter().filter(|r| r.label == 1).count()
    }
}

fn numeric_column(batch: &RecordBatch, name: &str) -> Result<Float64Array> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| Error::Schema(format!("missing column '{name}'")))?;
    let casted = cast(column, &DataType::Float64)
        .map_err(|e| Error::Schema(format!("column '{name}' is not numeric: {e}")))?;
    casted
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| Error::Schema(format!("column '{name}' could not be read as Float64")))
}
