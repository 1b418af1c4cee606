//! Model registry over a [`KvStore`].
//!
//! Layout per model name:
//!
//! ```text
//! models/<name>/latest                 allocation hint, never above the true maximum
//! models/<name>/versions/<v>/blob      package bytes; creating it claims `v`
//! models/<name>/versions/<v>/meta      RegistryEntry JSON
//! models/<name>/aliases/<alias>        version number
//! ```
//!
//! A version number is allocated by creating its `blob` with
//! [`KvStore::set_if_absent`], stepping upward from `latest + 1`, so claimed
//! numbers are contiguous from 1 even with several processes sharing one
//! store. A claim is never released: a registration that fails after the
//! claim leaves a blob without `meta`, and the number is skipped. A version
//! becomes visible once its `meta` key is written. Tag and alias writes
//! within one process are serialised by an async mutex.

use super::{ModelRegistry, RegistryEntry};
use crate::kv::{FileKvStore, KvStore, MemoryKvStore};
use crate::{Error, Result};
use std::path::PathBuf;
use tokio::sync::Mutex;

/// [`ModelRegistry`] storing everything in a key-value store.
#[derive(Debug)]
pub struct KvModelRegistry<S> {
    store: S,
    write_lock: Mutex<()>,
}

impl KvModelRegistry<MemoryKvStore> {
    /// Registry held in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryKvStore::new())
    }
}

impl KvModelRegistry<FileKvStore> {
    /// Registry persisted under `root`.
    #[must_use]
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self::new(FileKvStore::new(root))
    }
}

impl<S: KvStore> KvModelRegistry<S> {
    /// Registry over `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Backing store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Reserve the next free version number by creating its blob.
    async fn claim_version(&self, model_name: &str, blob: Vec<u8>) -> Result<u64> {
        let mut version = self.latest(model_name).await? + 1;
        while !self
            .store
            .set_if_absent(&blob_key(model_name, version), blob.clone())
            .await?
        {
            tracing::debug!(model_name, version, "version already claimed");
            version += 1;
        }
        Ok(version)
    }

    /// Raise the `latest` hint to `version` unless it is already higher.
    async fn advance_latest(&self, model_name: &str, version: u64) -> Result<()> {
        if self.latest(model_name).await? < version {
            self.store
                .set(&latest_key(model_name), version.to_string().into_bytes())
                .await?;
        }
        Ok(())
    }

    async fn latest(&self, model_name: &str) -> Result<u64> {
        match self.store.get(&latest_key(model_name)).await? {
            Some(bytes) => parse_version(&bytes),
            None => Ok(0),
        }
    }

    async fn read_meta(&self, model_name: &str, version: u64) -> Result<Option<RegistryEntry>> {
        self.store
            .get(&meta_key(model_name, version))
            .await?
            .map(|bytes| decode_meta(&bytes))
            .transpose()
    }
}

fn check_name(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('/') {
        return Err(Error::Registry(format!("invalid {kind} '{value}'")));
    }
    Ok(())
}

fn latest_key(model_name: &str) -> String {
    format!("models/{model_name}/latest")
}

fn meta_key(model_name: &str, version: u64) -> String {
    format!("models/{model_name}/versions/{version}/meta")
}

fn blob_key(model_name: &str, version: u64) -> String {
    format!("models/{model_name}/versions/{version}/blob")
}

fn alias_key(model_name: &str, alias: &str) -> String {
    format!("models/{model_name}/aliases/{alias}")
}

fn parse_version(bytes: &[u8]) -> Result<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| Error::Registry("corrupt version pointer".to_string()))
}

fn decode_meta(bytes: &[u8]) -> Result<RegistryEntry> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::MetadataSerialization(format!("unreadable version metadata: {e}")))
}

fn encode_meta(entry: &RegistryEntry) -> Result<Vec<u8>> {
    serde_json::to_vec(entry).map_err(|e| Error::MetadataSerialization(e.to_string()))
}

impl<S: KvStore> ModelRegistry for KvModelRegistry<S> {
    async fn register_version(&self, model_name: &str, blob: Vec<u8>) -> Result<u64> {
        check_name("model name", model_name)?;
        let version = self.claim_version(model_name, blob).await?;
        let entry = RegistryEntry::new(model_name, version);
        self.store
            .set(&meta_key(model_name, version), encode_meta(&entry)?)
            .await?;
        self.advance_latest(model_name, version).await?;
        tracing::info!(model_name, version, "registered model version");
        Ok(version)
    }

    async fn get_version(&self, model_name: &str, version: u64) -> Result<Option<RegistryEntry>> {
        self.read_meta(model_name, version).await
    }

    async fn list_versions(&self, model_name: &str) -> Result<Vec<RegistryEntry>> {
        // the hint may lag behind claims made by other writers
        let hint = self.latest(model_name).await?;
        let keys: Vec<String> = (1..=hint).map(|v| meta_key(model_name, v)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let mut metas = self.store.batch_get(&refs).await?;
        let mut version = hint + 1;
        while self.store.exists(&blob_key(model_name, version)).await? {
            metas.push(self.store.get(&meta_key(model_name, version)).await?);
            version += 1;
        }
        metas
            .into_iter()
            .flatten()
            .map(|bytes| decode_meta(&bytes))
            .collect()
    }

    async fn set_tag(&self, model_name: &str, version: u64, key: &str, value: &str) -> Result<()> {
        if key.is_empty() || key.chars().any(char::is_control) {
            return Err(Error::MetadataSerialization(format!(
                "tag key {key:?} is not a valid metadata key"
            )));
        }
        let _guard = self.write_lock.lock().await;
        let mut entry = self.read_meta(model_name, version).await?.ok_or_else(|| {
            Error::Registry(format!("{model_name} v{version} is not registered"))
        })?;
        entry.set_tag(key, value);
        self.store
            .set(&meta_key(model_name, version), encode_meta(&entry)?)
            .await
    }

    async fn set_alias(&self, model_name: &str, alias: &str, version: u64) -> Result<()> {
        check_name("alias", alias)?;
        let _guard = self.write_lock.lock().await;
        if self.read_meta(model_name, version).await?.is_none() {
            return Err(Error::Registry(format!(
                "cannot alias '{alias}' to unregistered {model_name} v{version}"
            )));
        }
        let key = alias_key(model_name, alias);
        if let Some(current) = self.store.get(&key).await? {
            if parse_version(&current).ok() == Some(version) {
                tracing::debug!(model_name, alias, version, "alias already set");
                return Ok(());
            }
        }
        self.store.set(&key, version.to_string().into_bytes()).await?;
        tracing::info!(model_name, alias, version, "alias reassigned");
        Ok(())
    }

    async fn get_alias(&self, model_name: &str, alias: &str) -> Result<Option<u64>> {
        self.store
            .get(&alias_key(model_name, alias))
            .await?
            .map(|bytes| parse_version(&bytes))
            .transpose()
    }

    async fn get_model(
        &self,
        model_name: &str,
        alias: &str,
    ) -> Result<Option<(RegistryEntry, Vec<u8>)>> {
        let Some(version) = self.get_alias(model_name, alias).await? else {
            return Ok(None);
        };
        let entry = self.read_meta(model_name, version).await?.ok_or_else(|| {
            Error::Registry(format!("alias '{alias}' points at missing v{version}"))
        })?;
        let blob = self
            .store
            .get(&blob_key(model_name, version))
            .await?
            .ok_or_else(|| Error::Registry(format!("{model_name} v{version} has no blob")))?;
        Ok(Some((entry, blob)))
    }
}
