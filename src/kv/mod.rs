//! Key-value stores backing the model registry
//!
//! Keys are `/`-separated paths such as `models/heart-disease-random_forest/latest`.
//! Two backends ship:
//! - [`MemoryKvStore`]: `DashMap`, lost on restart
//! - [`FileKvStore`]: one file per key under a root directory, atomic writes
//!
//! # Example
//!
//! ```rust
//! use trueno_champion::kv::{KvStore, MemoryKvStore};
//!
//! # async fn example() -> trueno_champion::Result<()> {
//! let store = MemoryKvStore::new();
//!
//! store.set("models/m/latest", b"3".to_vec()).await?;
//! assert_eq!(store.get("models/m/latest").await?, Some(b"3".to_vec()));
//!
//! store.delete("models/m/latest").await?;
//! assert!(!store.exists("models/m/latest").await?);
//! # Ok(())
//! # }
//! ```

mod file;
mod memory;

pub use file::FileKvStore;
pub use memory::MemoryKvStore;

use crate::Result;
use std::future::Future;

/// Async key-value store.
///
/// Implementations must be safe to share between tasks; a single `set` is
/// atomic (readers see the old or the new value, never a mix).
pub trait KvStore: Send + Sync {
    /// Get a value by key.
    ///
    /// Returns `None` if the key doesn't exist.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Set a value for a key.
    ///
    /// Overwrites any existing value.
    fn set(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Delete a key.
    ///
    /// No-op if the key doesn't exist.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Check if a key exists.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Set `key` only if it is absent.
    ///
    /// Returns `true` if this call created the key. Exactly one of several
    /// racing callers succeeds, including callers in other processes for
    /// persistent backends.
    fn set_if_absent(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<bool>> + Send;

    /// Get multiple keys in a batch.
    ///
    /// Returns values in the same order as keys. Missing keys return `None`.
    fn batch_get(
        &self,
        keys: &[&str],
    ) -> impl Future<Output = Result<Vec<Option<Vec<u8>>>>> + Send {
        async move {
            let mut results = Vec::with_capacity(keys.len());
            for key in keys {
                results.push(self.get(key).await?);
            }
            Ok(results)
        }
    }
}

/// Behaviour shared by every backend.
#[cfg(test)]
pub(crate) async fn exercise_store<S: KvStore>(store: &S) {
    assert_eq!(store.get("models/m/latest").await.unwrap(), None);

    store.set("models/m/latest", b"1".to_vec()).await.unwrap();
    store.set("models/m/latest", b"2".to_vec()).await.unwrap();
    assert_eq!(store.get("models/m/latest").await.unwrap(), Some(b"2".to_vec()));

    // a key may be both a value and the parent of other keys
    store.set("models/m", b"parent".to_vec()).await.unwrap();
    store.set("models/m/aliases/champion", b"2".to_vec()).await.unwrap();
    assert_eq!(store.get("models/m").await.unwrap(), Some(b"parent".to_vec()));

    store.set("", b"empty_key_value".to_vec()).await.unwrap();
    assert_eq!(store.get("").await.unwrap(), Some(b"empty_key_value".to_vec()));
    store.set("empty", vec![]).await.unwrap();
    assert_eq!(store.get("empty").await.unwrap(), Some(vec![]));

    let results = store
        .batch_get(&["models/m/latest", "models/m/aliases/champion", "missing"])
        .await
        .unwrap();
    assert_eq!(results, vec![Some(b"2".to_vec()), Some(b"2".to_vec()), None]);

    assert!(store.set_if_absent("models/m/versions/1/blob", b"a".to_vec()).await.unwrap());
    assert!(!store.set_if_absent("models/m/versions/1/blob", b"b".to_vec()).await.unwrap());
    assert_eq!(
        store.get("models/m/versions/1/blob").await.unwrap(),
        Some(b"a".to_vec())
    );

    store.delete("models/m/latest").await.unwrap();
    store.delete("never/set").await.unwrap();
    assert!(!store.exists("models/m/latest").await.unwrap());
    assert!(store.exists("models/m/aliases/champion").await.unwrap());
}
