//! Record sources - "load raw record set" collaborators

use super::{FeatureSchema, RecordSet};
use crate::storage::StorageEngine;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Produces a validated [`RecordSet`] for a dataset identifier.
///
/// Acquisition failures surface as `Error::DataUnavailable`; rows that load
/// but violate the schema surface as `Error::Schema`. Both are fatal to a
/// pipeline execution.
pub trait RecordSource: Send + Sync {
    /// Load the record set named `dataset_id`.
    ///
    /// # Errors
    ///
    /// `Error::DataUnavailable` or `Error::Schema`.
    fn load(&self, dataset_id: &str) -> Result<RecordSet>;
}

/// Reads `<root>/<dataset_id>` (or an absolute path) as Parquet or CSV.
#[derive(Debug, Clone)]
pub struct FileRecordSource {
    root: PathBuf,
    schema: FeatureSchema,
}

impl FileRecordSource {
    /// Create a source resolving relative dataset ids against `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, schema: FeatureSchema) -> Self {
        Self {
            root: root.into(),
            schema,
        }
    }

    fn resolve(&self, dataset_id: &str) -> PathBuf {
        let candidate = Path::new(dataset_id);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }
}

impl RecordSource for FileRecordSource {
    fn load(&self, dataset_id: &str) -> Result<RecordSet> {
        let path = self.resolve(dataset_id);
        let storage = StorageEngine::load(&path)
            .map_err(|e| Error::DataUnavailable(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), rows = storage.num_rows(), "loaded raw table");
        RecordSet::from_batches(self.schema.clone(), storage.batches())
    }
}

/// In-memory source keyed by dataset id.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordSource {
    sets: HashMap<String, RecordSet>,
}

impl MemoryRecordSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record set under `dataset_id`.
    #[must_use]
    pub fn with(mut self, dataset_id: impl Into<String>, set: RecordSet) -> Self {
        self.sets.insert(dataset_id.into(), set);
        self
    }
}

impl RecordSource for MemoryRecordSource {
    fn load(&self, dataset_id: &str) -> Result<RecordSet> {
        self.sets
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| Error::DataUnavailable(format!("unknown dataset '{dataset_id}'")))
    }
}
