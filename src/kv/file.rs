//! Directory-backed KV store.
//!
//! Each key maps to one file. Key segments are escaped so that any key
//! string is a safe relative path, and leaf files carry a `~` suffix so a
//! key can also be the parent of other keys:
//!
//! ```text
//! models/heart-disease-random_forest/latest
//!   -> <root>/models/heart-disease-random_forest/latest~
//! ```
//!
//! `set_if_absent` hard-links a staged file into place, which fails when the
//! target exists, so it is exclusive across processes sharing the root.

use super::KvStore;
use crate::{Error, Result};
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Persistent key-value store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    /// Store rooted at `root`; the directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        let mut segments = key.split('/').peekable();
        while let Some(segment) = segments.next() {
            let mut name = escape_segment(segment);
            if segments.peek().is_none() {
                name.push('~');
            }
            path.push(name);
        }
        path
    }
}

fn escape_segment(segment: &str) -> String {
    if segment.is_empty() {
        return "%".to_string();
    }
    let mut out = String::with_capacity(segment.len());
    for (i, b) in segment.bytes().enumerate() {
        let safe = b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || (b == b'.' && i > 0);
        if safe {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

fn storage_err(path: &Path, e: &std::io::Error) -> Error {
    Error::StorageError(format!("{}: {e}", path.display()))
}

impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(&path, &e)),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || crate::storage::write_atomic(&path, &value))
            .await
            .map_err(|e| Error::StorageError(format!("write task failed: {e}")))?
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(&path, &e)),
        }
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || crate::storage::write_exclusive(&path, &value))
            .await
            .map_err(|e| Error::StorageError(format!("write task failed: {e}")))?
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| storage_err(&path, &e))
    }
}
