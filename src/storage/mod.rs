//! Storage backend (Arrow/Parquet/CSV)
//!
//! Raw training tables are read whole into Arrow record batches. The engine
//! is append-only: a dataset is a list of batches sharing one schema, and
//! conversion into typed rows happens in [`crate::dataset`].
//!
//! [`write_atomic`] is the write path for every file this crate persists
//! (tracking snapshots, KV entries, exported models); [`write_exclusive`]
//! is its create-only variant used to claim registry versions.

use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Rows per batch when decoding CSV
const CSV_BATCH_ROWS: usize = 8192;

/// Storage engine for Arrow record batches
pub struct StorageEngine {
    batches: Vec<RecordBatch>,
}

impl StorageEngine {
    /// Load a table by file extension (`.parquet` or `.csv`)
    ///
    /// # Errors
    /// Returns error if the extension is unsupported or the file cannot be read
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("parquet") => Self::load_parquet(path),
            Some("csv") => Self::load_csv(path),
            other => Err(Error::StorageError(format!(
                "Unsupported table format {other:?} for {}",
                path.display()
            ))),
        }
    }

    /// Load table from Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let file = File::open(path.as_ref()).map_err(|e| {
            Error::StorageError(format!("Failed to open Parquet file: {e}"))
        })?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            Error::StorageError(format!("Failed to parse Parquet file: {e}"))
        })?;

        let reader = builder.build().map_err(|e| {
            Error::StorageError(format!("Failed to create Parquet reader: {e}"))
        })?;

        let mut batches = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| {
                Error::StorageError(format!("Failed to read record batch: {e}"))
            })?;
            batches.push(batch);
        }

        Ok(Self { batches })
    }

    /// Load table from a headered CSV file
    ///
    /// Column types are inferred from the data; empty fields become nulls.
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        use arrow::csv::reader::Format;
        use arrow::csv::ReaderBuilder;
        use std::io::{Seek, SeekFrom};

        let mut file = File::open(path.as_ref())
            .map_err(|e| Error::StorageError(format!("Failed to open CSV file: {e}")))?;

        let (schema, _) = Format::default()
            .with_header(true)
            .infer_schema(&mut file, None)
            .map_err(|e| Error::StorageError(format!("Failed to infer CSV schema: {e}")))?;
        file.seek(SeekFrom::Start(0))?;

        let reader = ReaderBuilder::new(Arc::new(schema))
            .with_header(true)
            .with_batch_size(CSV_BATCH_ROWS)
            .build(file)
            .map_err(|e| Error::StorageError(format!("Failed to create CSV reader: {e}")))?;

        let mut batches = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| {
                Error::StorageError(format!("Failed to read CSV record batch: {e}"))
            })?;
            batches.push(batch);
        }

        Ok(Self { batches })
    }

    /// Get all record batches
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total rows across batches
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }
}

/// Write `bytes` to a fresh sibling temp file, creating parent directories.
fn stage_temp(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::StorageError(format!("Invalid target path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(tmp)
}

/// Write `bytes` to `path` via a sibling temp file and rename, creating
/// parent directories as needed. Readers never observe a partial file.
///
/// # Errors
/// Returns error if the directory cannot be created or the write fails
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = stage_temp(path, bytes)?;
    std::fs::rename(&tmp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })?;
    Ok(())
}

/// Create `path` with `bytes` only if it does not exist yet.
///
/// The content is staged in a temp file and hard-linked into place, so the
/// file appears complete or not at all, and of several concurrent callers
/// (threads or processes) exactly one gets `Ok(true)`.
///
/// # Errors
/// Returns error if the directory cannot be created or the write fails
pub fn write_exclusive(path: &Path, bytes: &[u8]) -> Result<bool> {
    let tmp = stage_temp(path, bytes)?;
    let linked = std::fs::hard_link(&tmp, path);
    let _ = std::fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}
