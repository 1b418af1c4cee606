//! Registry promotion of the selected run
//!
//! Promotion is split by consequence. Registering the version and seeing it
//! become visible must succeed, or promotion fails. Tagging and aliasing
//! happen after the model is safely stored, so their failures degrade to
//! warnings carrying a manual recovery instruction.

use super::{model_name_for, ModelPackage, ModelRegistry, RegistryEntry, BEST_MODEL_TAG, CHAMPION_ALIAS};
use crate::evaluate::MetricName;
use crate::experiment::Run;
use crate::preprocess::FittedTransform;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Bounded retries with a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts including the first (>= 1)
    pub attempts: u32,
    /// Pause between attempts
    #[serde(with = "millis")]
    pub delay: Duration,
}

impl RetryPolicy {
    /// Policy with `attempts` tries spaced by `delay`.
    #[must_use]
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < attempts => {
                    tracing::debug!(attempt, error = %e, "retrying registry call");
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(500))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Result of a promotion that registered the model.
#[derive(Debug, Clone)]
pub struct PromotionOutcome {
    /// Entry as last read back from the registry
    pub entry: RegistryEntry,
    /// Whether the champion alias now points at the new version
    pub champion_assigned: bool,
    /// Tag/alias failures; non-empty means degraded success
    pub warnings: Vec<String>,
}

impl PromotionOutcome {
    /// Registered but not fully tagged or aliased.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Registers the winning run and moves the champion alias to it.
#[derive(Debug)]
pub struct RegistryPromoter<R> {
    registry: R,
    visibility: RetryPolicy,
    metadata: RetryPolicy,
}

impl<R: ModelRegistry> RegistryPromoter<R> {
    /// Promoter with separate policies for the visibility poll and for
    /// tag/alias writes.
    pub const fn new(registry: R, visibility: RetryPolicy, metadata: RetryPolicy) -> Self {
        Self {
            registry,
            visibility,
            metadata,
        }
    }

    /// The wrapped registry.
    pub const fn registry(&self) -> &R {
        &self.registry
    }

    /// Promote `run`, packaged together with `transform`.
    ///
    /// # Errors
    ///
    /// `Error::RegistrationTimeout` if the version never becomes visible, or
    /// the registry error if registration itself fails. Tag and alias
    /// failures are reported through [`PromotionOutcome::warnings`].
    pub async fn promote(&self, run: &Run, transform: &FittedTransform) -> Result<PromotionOutcome> {
        let model_name = model_name_for(run.algorithm_id());
        let package = ModelPackage::new(run.candidate().as_ref().clone(), transform.clone(), run.run_id());
        let version = self
            .registry
            .register_version(&model_name, package.to_bytes()?)
            .await?;

        let entry = self.await_visible(&model_name, version).await?;
        let mut warnings = Vec::new();

        if let Err(e) = self.write_tags(run, &model_name, version).await {
            tracing::warn!(model_name, version, error = %e, "tagging failed after retries");
            warnings.push(format!("tags not written: {e}"));
        }
        if let Err(e) = self.demote_previous(&model_name, version).await {
            tracing::warn!(model_name, version, error = %e, "could not clear earlier best_model tags");
            warnings.push(format!("earlier best_model tags not cleared: {e}"));
        }

        let champion_assigned = match self
            .metadata
            .run(|| self.registry.set_alias(&model_name, CHAMPION_ALIAS, version))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    model_name,
                    version,
                    error = %e,
                    "champion alias not assigned; run `champion-train promote {model_name} {version}` to assign it manually"
                );
                warnings.push(format!(
                    "alias '{CHAMPION_ALIAS}' not assigned: {e}; assign it manually with `champion-train promote {model_name} {version}`"
                ));
                false
            }
        };

        let entry = match self.registry.get_version(&model_name, version).await {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                tracing::warn!(model_name, version, "promoted version unreadable; reporting pre-tag entry");
                entry
            }
            Err(e) => {
                tracing::warn!(
                    model_name,
                    version,
                    error = %e,
                    "re-reading promoted version failed; reporting pre-tag entry"
                );
                entry
            }
        };
        tracing::info!(
            model_name,
            version,
            champion_assigned,
            degraded = !warnings.is_empty(),
            "promotion finished"
        );
        Ok(PromotionOutcome {
            entry,
            champion_assigned,
            warnings,
        })
    }

    async fn await_visible(&self, model_name: &str, version: u64) -> Result<RegistryEntry> {
        let attempts = self.visibility.attempts.max(1);
        for attempt in 1..=attempts {
            match self.registry.get_version(model_name, version).await {
                Ok(Some(entry)) => return Ok(entry),
                Ok(None) => tracing::debug!(model_name, version, attempt, "version not visible yet"),
                Err(e) => tracing::debug!(model_name, version, attempt, error = %e, "visibility poll failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.visibility.delay).await;
            }
        }
        Err(Error::RegistrationTimeout {
            model_name: model_name.to_string(),
            version,
            attempts,
        })
    }

    async fn write_tags(&self, run: &Run, model_name: &str, version: u64) -> Result<()> {
        for (key, value) in promotion_tags(run) {
            self.metadata
                .run(|| self.registry.set_tag(model_name, version, &key, &value))
                .await?;
        }
        Ok(())
    }

    async fn demote_previous(&self, model_name: &str, version: u64) -> Result<()> {
        for previous in self.registry.list_versions(model_name).await? {
            if previous.version() != version && previous.is_best_model() {
                self.metadata
                    .run(|| {
                        self.registry
                            .set_tag(model_name, previous.version(), BEST_MODEL_TAG, "false")
                    })
                    .await?;
            }
        }
        Ok(())
    }
}

/// Manual recovery: point the champion alias at `version` (latest when
/// `None`) and move the `best_model` flag to it.
///
/// # Errors
///
/// `Error::Registry` if the model or version does not exist, or the
/// registry error of the first failed write.
pub async fn assign_champion<R: ModelRegistry>(
    registry: &R,
    model_name: &str,
    version: Option<u64>,
) -> Result<RegistryEntry> {
    let versions = registry.list_versions(model_name).await?;
    let target = match version {
        Some(v) => versions.iter().find(|e| e.version() == v),
        None => versions.last(),
    }
    .ok_or_else(|| {
        Error::Registry(format!(
            "no version {} of '{model_name}'",
            version.map_or_else(|| "at all".to_string(), |v| v.to_string())
        ))
    })?
    .version();

    for entry in &versions {
        if entry.version() != target && entry.is_best_model() {
            registry
                .set_tag(model_name, entry.version(), BEST_MODEL_TAG, "false")
                .await?;
        }
    }
    registry.set_tag(model_name, target, BEST_MODEL_TAG, "true").await?;
    registry.set_alias(model_name, CHAMPION_ALIAS, target).await?;
    tracing::info!(model_name, version = target, "champion alias assigned manually");
    registry
        .get_version(model_name, target)
        .await?
        .ok_or_else(|| Error::Registry(format!("version {target} of '{model_name}' vanished")))
}

/// One registered model as shown by `champion-train list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelListing {
    /// Registered model name
    pub model_name: String,
    /// Version the champion alias points at
    pub champion: Option<u64>,
    /// Every visible version, oldest first
    pub versions: Vec<RegistryEntry>,
}

/// Registered models among `model_names`; names without versions are skipped.
///
/// # Errors
///
/// The first registry read error.
pub async fn list_models<R: ModelRegistry>(
    registry: &R,
    model_names: &[String],
) -> Result<Vec<ModelListing>> {
    let mut listings = Vec::new();
    for model_name in model_names {
        let versions = registry.list_versions(model_name).await?;
        if versions.is_empty() {
            continue;
        }
        listings.push(ModelListing {
            model_name: model_name.clone(),
            champion: registry.get_alias(model_name, CHAMPION_ALIAS).await?,
            versions,
        });
    }
    Ok(listings)
}

/// Make the `best_model = "true"` version with the highest `roc_auc` tag
/// across `model_names` champion of its model. Without any flagged version,
/// the latest version of the first registered model is used.
///
/// # Errors
///
/// `Error::Registry` if none of `model_names` has a version, or the error of
/// [`assign_champion`].
pub async fn promote_flagged<R: ModelRegistry>(
    registry: &R,
    model_names: &[String],
) -> Result<RegistryEntry> {
    let listings = list_models(registry, model_names).await?;
    let roc_auc = |entry: &RegistryEntry| {
        entry
            .tag(MetricName::RocAuc.as_str())
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    };
    let flagged = listings
        .iter()
        .flat_map(|l| l.versions.iter())
        .filter(|e| e.is_best_model())
        .reduce(|best, e| if roc_auc(e) > roc_auc(best) { e } else { best });

    let (model_name, version) = match flagged {
        Some(entry) => {
            tracing::info!(
                model_name = entry.model_name(),
                version = entry.version(),
                roc_auc = roc_auc(entry),
                "found flagged best model"
            );
            (entry.model_name().to_string(), Some(entry.version()))
        }
        None => {
            let first = listings.first().ok_or_else(|| {
                Error::Registry(format!("no versions registered under {}", model_names.join(", ")))
            })?;
            tracing::warn!(
                model_name = %first.model_name,
                "no version tagged best_model; promoting the latest version"
            );
            (first.model_name.clone(), None)
        }
    };
    assign_champion(registry, &model_name, version).await
}

/// Tags written on a promoted version, values already string-encoded.
#[must_use]
pub fn promotion_tags(run: &Run) -> Vec<(String, String)> {
    let mut tags = vec![
        (BEST_MODEL_TAG.to_string(), "true".to_string()),
        ("model_type".to_string(), run.algorithm_id().to_string()),
        ("run_id".to_string(), run.run_id().to_string()),
    ];
    tags.extend(
        run.metrics()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), format!("{value:.4}"))),
    );
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::FeatureSchema;
    use crate::registry::{KvModelRegistry, CHAMPION_ALIAS};
    use crate::selector::test_support::run;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    fn transform() -> FittedTransform {
        let schema = FeatureSchema::heart_disease();
        let row: Vec<Option<f64>> = schema.features().iter().map(|f| Some(f.min)).collect();
        FittedTransform::fit(&schema, &[row.as_slice()]).unwrap()
    }

    #[tokio::test]
    async fn test_promote_tags_and_aliases() {
        let promoter = RegistryPromoter::new(KvModelRegistry::in_memory(), quick(), quick());
        let winner = run("run-a", 0.966_54, 0.83, 0, 0);
        let outcome = promoter.promote(&winner, &transform()).await.unwrap();

        assert!(!outcome.is_degraded());
        assert!(outcome.champion_assigned);
        let entry = &outcome.entry;
        assert_eq!(entry.model_name(), "heart-disease-logistic_regression");
        assert_eq!(entry.tag("best_model"), Some("true"));
        assert_eq!(entry.tag("roc_auc"), Some("0.9665"));
        assert_eq!(entry.tag("run_id"), Some("run-a"));
        assert_eq!(entry.tag("model_type"), Some("logistic_regression"));
        assert_eq!(
            promoter
                .registry()
                .get_alias(entry.model_name(), CHAMPION_ALIAS)
                .await
                .unwrap(),
            Some(entry.version())
        );
    }

    #[tokio::test]
    async fn test_second_promotion_demotes_first() {
        let promoter = RegistryPromoter::new(KvModelRegistry::in_memory(), quick(), quick());
        let first = promoter.promote(&run("r1", 0.9, 0.8, 0, 0), &transform()).await.unwrap();
        let second = promoter.promote(&run("r2", 0.9, 0.8, 0, 0), &transform()).await.unwrap();
        assert_eq!(second.entry.version(), first.entry.version() + 1);

        let versions = promoter
            .registry()
            .list_versions(first.entry.model_name())
            .await
            .unwrap();
        let flagged: Vec<u64> = versions
            .iter()
            .filter(|e| e.is_best_model())
            .map(RegistryEntry::version)
            .collect();
        assert_eq!(flagged, vec![second.entry.version()]);
    }

    /// Registry whose metadata writes always fail, whose versions only
    /// appear after a number of polls, and whose reads break after a budget.
    struct Flaky {
        inner: KvModelRegistry<crate::kv::MemoryKvStore>,
        hidden_polls: AtomicU32,
        fail_metadata: bool,
        reads_left: AtomicU32,
    }

    impl ModelRegistry for Flaky {
        async fn register_version(&self, model_name: &str, blob: Vec<u8>) -> Result<u64> {
            self.inner.register_version(model_name, blob).await
        }

        async fn get_version(&self, model_name: &str, version: u64) -> Result<Option<RegistryEntry>> {
            if self.hidden_polls.load(Ordering::SeqCst) > 0 {
                self.hidden_polls.fetch_sub(1, Ordering::SeqCst);
                return Ok(None);
            }
            if self.reads_left.load(Ordering::SeqCst) == 0 {
                return Err(Error::Registry("connection reset".into()));
            }
            self.reads_left.fetch_sub(1, Ordering::SeqCst);
            self.inner.get_version(model_name, version).await
        }

        async fn list_versions(&self, model_name: &str) -> Result<Vec<RegistryEntry>> {
            self.inner.list_versions(model_name).await
        }

        async fn set_tag(&self, model_name: &str, version: u64, key: &str, value: &str) -> Result<()> {
            if self.fail_metadata {
                return Err(Error::MetadataSerialization(format!("cannot encode {key}")));
            }
            self.inner.set_tag(model_name, version, key, value).await
        }

        async fn set_alias(&self, model_name: &str, alias: &str, version: u64) -> Result<()> {
            if self.fail_metadata {
                return Err(Error::MetadataSerialization("alias payload rejected".into()));
            }
            self.inner.set_alias(model_name, alias, version).await
        }

        async fn get_alias(&self, model_name: &str, alias: &str) -> Result<Option<u64>> {
            self.inner.get_alias(model_name, alias).await
        }

        async fn get_model(
            &self,
            model_name: &str,
            alias: &str,
        ) -> Result<Option<(RegistryEntry, Vec<u8>)>> {
            self.inner.get_model(model_name, alias).await
        }
    }

    #[tokio::test]
    async fn test_metadata_failure_is_degraded_success() {
        let registry = Flaky {
            inner: KvModelRegistry::in_memory(),
            hidden_polls: AtomicU32::new(0),
            fail_metadata: true,
            reads_left: AtomicU32::new(u32::MAX),
        };
        let promoter = RegistryPromoter::new(registry, quick(), quick());
        let outcome = promoter.promote(&run("r", 0.9, 0.8, 0, 0), &transform()).await.unwrap();
        assert!(outcome.is_degraded());
        assert!(!outcome.champion_assigned);
        assert!(outcome.warnings.iter().any(|w| w.contains("assign it manually")));
        assert_eq!(outcome.entry.version(), 1);
    }

    #[tokio::test]
    async fn test_failed_reread_falls_back_to_registered_entry() {
        let registry = Flaky {
            inner: KvModelRegistry::in_memory(),
            hidden_polls: AtomicU32::new(0),
            fail_metadata: false,
            // visibility poll succeeds, the final read-back fails
            reads_left: AtomicU32::new(1),
        };
        let promoter = RegistryPromoter::new(registry, quick(), quick());
        let outcome = promoter.promote(&run("r", 0.9, 0.8, 0, 0), &transform()).await.unwrap();
        assert!(!outcome.is_degraded());
        assert!(outcome.champion_assigned);
        assert_eq!(outcome.entry.version(), 1);
        assert_eq!(outcome.entry.tag(BEST_MODEL_TAG), None);
        let stored = promoter
            .registry()
            .inner
            .get_version(outcome.entry.model_name(), 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.tag(BEST_MODEL_TAG), Some("true"));
    }

    #[tokio::test]
    async fn test_slow_visibility_within_budget() {
        let registry = Flaky {
            inner: KvModelRegistry::in_memory(),
            hidden_polls: AtomicU32::new(2),
            fail_metadata: false,
            reads_left: AtomicU32::new(u32::MAX),
        };
        let promoter = RegistryPromoter::new(registry, quick(), quick());
        let outcome = promoter.promote(&run("r", 0.9, 0.8, 0, 0), &transform()).await.unwrap();
        assert!(outcome.champion_assigned);
    }

    #[tokio::test]
    async fn test_visibility_timeout() {
        let registry = Flaky {
            inner: KvModelRegistry::in_memory(),
            hidden_polls: AtomicU32::new(100),
            fail_metadata: false,
            reads_left: AtomicU32::new(u32::MAX),
        };
        let promoter = RegistryPromoter::new(registry, quick(), quick());
        let err = promoter
            .promote(&run("r", 0.9, 0.8, 0, 0), &transform())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RegistrationTimeout { attempts: 3, .. }));
    }

    #[test]
    fn test_promotion_tag_values_are_formatted_strings() {
        let tags = promotion_tags(&run("r", 0.5, 0.123_456, 0, 0));
        let map: std::collections::HashMap<_, _> = tags.into_iter().collect();
        assert_eq!(map["cv_accuracy_mean"], "0.1235");
        assert_eq!(map["best_model"], "true");
        assert_eq!(map.len(), 10);
    }

    #[tokio::test]
    async fn test_assign_champion_recovers_degraded_promotion() {
        let registry = KvModelRegistry::in_memory();
        let name = "heart-disease-random_forest";
        registry.register_version(name, b"v1".to_vec()).await.unwrap();
        registry.set_tag(name, 1, BEST_MODEL_TAG, "true").await.unwrap();
        registry.register_version(name, b"v2".to_vec()).await.unwrap();

        let entry = assign_champion(&registry, name, None).await.unwrap();
        assert_eq!(entry.version(), 2);
        assert!(entry.is_best_model());
        assert_eq!(registry.get_alias(name, CHAMPION_ALIAS).await.unwrap(), Some(2));
        let first = registry.get_version(name, 1).await.unwrap().unwrap();
        assert_eq!(first.tag(BEST_MODEL_TAG), Some("false"));

        assert!(assign_champion(&registry, name, Some(9)).await.is_err());
        assert!(assign_champion(&registry, "heart-disease-svm", None).await.is_err());
    }

    #[tokio::test]
    async fn test_list_models_skips_unregistered_names() {
        let registry = KvModelRegistry::in_memory();
        let lr = "heart-disease-logistic_regression";
        registry.register_version(lr, b"v1".to_vec()).await.unwrap();
        registry.register_version(lr, b"v2".to_vec()).await.unwrap();
        registry.set_alias(lr, CHAMPION_ALIAS, 1).await.unwrap();

        let listings = list_models(&registry, &crate::registry::known_model_names())
            .await
            .unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].model_name, lr);
        assert_eq!(listings[0].champion, Some(1));
        assert_eq!(listings[0].versions.len(), 2);
    }

    #[tokio::test]
    async fn test_promote_flagged_picks_highest_roc_auc() {
        let registry = KvModelRegistry::in_memory();
        let lr = "heart-disease-logistic_regression";
        let rf = "heart-disease-random_forest";
        registry.register_version(lr, b"lr".to_vec()).await.unwrap();
        registry.set_tag(lr, 1, BEST_MODEL_TAG, "true").await.unwrap();
        registry.set_tag(lr, 1, "roc_auc", "0.8700").await.unwrap();
        registry.register_version(rf, b"rf1".to_vec()).await.unwrap();
        registry.set_tag(rf, 1, BEST_MODEL_TAG, "true").await.unwrap();
        registry.set_tag(rf, 1, "roc_auc", "0.9100").await.unwrap();
        // newer but unflagged
        registry.register_version(rf, b"rf2".to_vec()).await.unwrap();

        let names = crate::registry::known_model_names();
        let entry = promote_flagged(&registry, &names).await.unwrap();
        assert_eq!((entry.model_name(), entry.version()), (rf, 1));
        assert_eq!(registry.get_alias(rf, CHAMPION_ALIAS).await.unwrap(), Some(1));
        assert_eq!(registry.get_alias(lr, CHAMPION_ALIAS).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_promote_flagged_falls_back_to_latest() {
        let registry = KvModelRegistry::in_memory();
        let names = crate::registry::known_model_names();
        assert!(matches!(
            promote_flagged(&registry, &names).await,
            Err(Error::Registry(_))
        ));

        let rf = "heart-disease-random_forest";
        registry.register_version(rf, b"rf1".to_vec()).await.unwrap();
        registry.register_version(rf, b"rf2".to_vec()).await.unwrap();
        let entry = promote_flagged(&registry, &names).await.unwrap();
        assert_eq!(entry.version(), 2);
        assert!(entry.is_best_model());
    }
}
