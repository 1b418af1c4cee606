//! Versioned model registry
//!
//! A registered model is a logical name (`heart-disease-<algorithm>`) with
//! monotonically numbered versions. Each version holds an opaque package
//! blob plus string-only tags; aliases are reassignable pointers from a name
//! to one version. The `champion` alias is what serving resolves.
//!
//! Tag values are `&str` at the type level: the metadata layer accepts
//! nothing else, so numbers are formatted before they reach it.

mod kv_registry;
mod package;
mod promoter;

pub use kv_registry::KvModelRegistry;
pub use package::{
    load_champion, LoadedChampion, ModelPackage, Prediction, Predictor, BEST_MODEL_FILE, PIPELINE_FILE,
};
pub use promoter::{
    assign_champion, list_models, promote_flagged, promotion_tags, ModelListing, PromotionOutcome,
    RegistryPromoter, RetryPolicy,
};

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;

/// Alias served in production
pub const CHAMPION_ALIAS: &str = "champion";
/// Tag marking the version picked as best by a pipeline execution
pub const BEST_MODEL_TAG: &str = "best_model";
/// Prefix of every registered model name
pub const MODEL_NAME_PREFIX: &str = "heart-disease-";

/// Registered model name for an algorithm.
#[must_use]
pub fn model_name_for(algorithm_id: &str) -> String {
    format!("{MODEL_NAME_PREFIX}{algorithm_id}")
}

/// Registered model names for every algorithm the trainer accepts.
#[must_use]
pub fn known_model_names() -> Vec<String> {
    crate::model::ALGORITHMS.iter().map(|id| model_name_for(id)).collect()
}

/// One registered version and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    model_name: String,
    version: u64,
    created_at: DateTime<Utc>,
    tags: BTreeMap<String, String>,
}

impl RegistryEntry {
    /// New entry without tags.
    #[must_use]
    pub fn new(model_name: impl Into<String>, version: u64) -> Self {
        Self {
            model_name: model_name.into(),
            version,
            created_at: Utc::now(),
            tags: BTreeMap::new(),
        }
    }

    /// Registered model name.
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Version number (1-based).
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Registration time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// String tags.
    #[must_use]
    pub const fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Single tag value.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Whether `best_model = "true"`.
    #[must_use]
    pub fn is_best_model(&self) -> bool {
        self.tag(BEST_MODEL_TAG) == Some("true")
    }

    pub(crate) fn set_tag(&mut self, key: &str, value: &str) {
        self.tags.insert(key.to_string(), value.to_string());
    }
}

/// Champion state of one version.
///
/// `Unregistered -> Registered -> Champion`; the promoter only ever performs
/// `Registered -> Champion`, and repeating it is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChampionState {
    /// Version does not exist
    Unregistered,
    /// Version exists; the champion alias points elsewhere or nowhere
    Registered,
    /// The champion alias points at this version
    Champion,
}

/// Versioned model store.
pub trait ModelRegistry: Send + Sync {
    /// Store `blob` as the next version of `model_name` and return it.
    fn register_version(
        &self,
        model_name: &str,
        blob: Vec<u8>,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Metadata of one version, `None` if not (yet) visible.
    fn get_version(
        &self,
        model_name: &str,
        version: u64,
    ) -> impl Future<Output = Result<Option<RegistryEntry>>> + Send;

    /// Every visible version, ascending.
    fn list_versions(&self, model_name: &str)
        -> impl Future<Output = Result<Vec<RegistryEntry>>> + Send;

    /// Set one string tag on a version.
    fn set_tag(
        &self,
        model_name: &str,
        version: u64,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Point `alias` at `version`; last writer wins.
    fn set_alias(
        &self,
        model_name: &str,
        alias: &str,
        version: u64,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Version `alias` points at.
    fn get_alias(
        &self,
        model_name: &str,
        alias: &str,
    ) -> impl Future<Output = Result<Option<u64>>> + Send;

    /// Entry and blob of the version `alias` points at.
    fn get_model(
        &self,
        model_name: &str,
        alias: &str,
    ) -> impl Future<Output = Result<Option<(RegistryEntry, Vec<u8>)>>> + Send;
}

/// Champion state of `version` of `model_name`.
///
/// # Errors
///
/// Propagates registry read failures.
pub async fn champion_state<R: ModelRegistry>(
    registry: &R,
    model_name: &str,
    version: u64,
) -> Result<ChampionState> {
    if registry.get_version(model_name, version).await?.is_none() {
        return Ok(ChampionState::Unregistered);
    }
    let state = if registry.get_alias(model_name, CHAMPION_ALIAS).await? == Some(version) {
        ChampionState::Champion
    } else {
        ChampionState::Registered
    };
    Ok(state)
}
