//! Training and promotion pipeline
//!
//! Load → preprocess → (train → evaluate → record) per algorithm → select →
//! promote → export. Candidate-local failures are recorded and excluded;
//! everything else aborts the execution.

use crate::config::PipelineConfig;
use crate::dataset::{FileRecordSource, RecordSource};
use crate::evaluate::{ArtifactBundle, Evaluator, MetricSet};
use crate::experiment::{ExperimentRecord, ExperimentStore, Run, RunRecorder, TrackingStore};
use crate::kv::FileKvStore;
use crate::model::{CandidateModel, Trainer};
use crate::preprocess::{FittedTransform, PreprocessedSplit, Preprocessor};
use crate::registry::{
    model_name_for, KvModelRegistry, ModelRegistry, PromotionOutcome, RegistryPromoter,
    BEST_MODEL_FILE, PIPELINE_FILE,
};
use crate::selector;
use crate::storage::write_atomic;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Summary file written next to the exported model.
pub const MODEL_INFO_FILE: &str = "model_info.json";

/// A candidate dropped from selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exclusion {
    /// Algorithm that failed
    pub algorithm_id: String,
    /// Failure message
    pub reason: String,
    /// Tracking run of the failed attempt, if it could be recorded
    pub run_id: Option<String>,
}

/// What one execution produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Runs that survived, in recording order
    pub runs: Vec<Run>,
    /// Index of the selected run in `runs`
    pub winner: usize,
    /// Candidates removed by training/evaluation/tracking failures
    pub excluded: Vec<Exclusion>,
    /// Registry result; `None` when the version never became visible
    pub promotion: Option<PromotionOutcome>,
    /// Degraded-success notices
    pub warnings: Vec<String>,
    /// Directory the local artifacts were written to
    pub models_dir: PathBuf,
}

impl PipelineReport {
    /// The champion run.
    #[must_use]
    pub fn winner(&self) -> &Run {
        &self.runs[self.winner]
    }

    /// Registration happened but tagging, aliasing or visibility did not
    /// fully succeed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Serialize)]
struct ModelInfo<'a> {
    model_name: &'a str,
    algorithm_id: &'a str,
    run_id: &'a str,
    registry_version: Option<u64>,
    champion_assigned: bool,
    trained_at: DateTime<Utc>,
    metrics: BTreeMap<String, f64>,
    config: &'a PipelineConfig,
}

/// One pipeline execution over injected collaborators.
pub struct TrainingPipeline<S, T, R> {
    config: PipelineConfig,
    source: S,
    recorder: RunRecorder<T>,
    promoter: RegistryPromoter<R>,
}

impl TrainingPipeline<FileRecordSource, ExperimentStore, KvModelRegistry<FileKvStore>> {
    /// File-backed pipeline: raw table from `data.raw_path`, tracking
    /// snapshot in `tracking.store_dir`, registry under `registry.root`.
    ///
    /// # Errors
    ///
    /// `Error::Config` for an invalid configuration, `Error::Tracking` if
    /// the tracking store cannot be opened.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let source = FileRecordSource::new(".", config.features.schema()?);
        let mut store = ExperimentStore::open(&config.tracking.store_dir)?;
        let experiment = ExperimentRecord::builder(
            &config.tracking.experiment_name,
            &config.tracking.experiment_name,
        )
        .config(serde_json::to_value(&config)?)
        .build();
        store.ensure_experiment(experiment)?;
        let registry = KvModelRegistry::open(&config.registry.root);
        Ok(Self::new(config, source, store, registry))
    }
}

impl<S, T, R> TrainingPipeline<S, T, R>
where
    S: RecordSource,
    T: TrackingStore,
    R: ModelRegistry,
{
    /// Assemble a pipeline. The experiment named in `config.tracking` must
    /// already exist in `tracking`.
    pub fn new(config: PipelineConfig, source: S, tracking: T, registry: R) -> Self {
        let recorder = RunRecorder::new(tracking, config.tracking.experiment_name.clone());
        let promoter = RegistryPromoter::new(
            registry,
            config.registry.visibility_policy(),
            config.registry.metadata_policy(),
        );
        Self {
            config,
            source,
            recorder,
            promoter,
        }
    }

    /// Active configuration.
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Tracking store runs are recorded into.
    pub const fn tracking(&self) -> &T {
        self.recorder.store()
    }

    /// Registry champions are promoted into.
    pub const fn registry(&self) -> &R {
        self.promoter.registry()
    }

    /// Execute once.
    ///
    /// # Errors
    ///
    /// Fatal errors only: `DataUnavailable`, `Schema`, `NoCandidate`,
    /// `Config`, registration failures other than a visibility timeout, and
    /// failures writing the local artifacts.
    pub async fn run(&mut self) -> Result<PipelineReport> {
        let dataset_id = self.config.data.raw_path.to_string_lossy().into_owned();
        let records = self.source.load(&dataset_id)?;
        tracing::info!(rows = records.len(), positives = records.positives(), "loaded records");

        let preprocessor =
            Preprocessor::new(self.config.data.random_state, self.config.data.test_size)?;
        let (split, transform) = preprocessor.fit_transform(&records)?;
        let split = Arc::new(split);
        let evaluator = Evaluator::new(self.config.models.cv_folds)?;

        let mut runs = Vec::new();
        let mut excluded = Vec::new();
        let algorithms = self.config.models.models_to_train.clone();
        for algorithm in &algorithms {
            let started_at = Utc::now();
            let attempt = self.attempt(algorithm, &split, evaluator).await;
            let recorded = match attempt {
                Ok((candidate, metrics, artifacts)) => {
                    self.recorder
                        .record(Arc::new(candidate), metrics, artifacts, started_at)
                }
                Err(e) => Err(e),
            };
            match recorded {
                Ok(run) => runs.push(run),
                Err(e) if e.is_candidate_local() => {
                    excluded.push(self.exclude(algorithm, &e, started_at));
                }
                Err(e) => return Err(e),
            }
        }

        let winner_index = {
            let winner = selector::select(&runs)?;
            runs.iter()
                .position(|r| r.run_id() == winner.run_id())
                .unwrap_or_default()
        };
        let winner = &runs[winner_index];

        let mut warnings = Vec::new();
        let promotion = match self.promoter.promote(winner, &transform).await {
            Ok(outcome) => {
                warnings.extend(outcome.warnings.iter().cloned());
                Some(outcome)
            }
            Err(e @ Error::RegistrationTimeout { .. }) => {
                tracing::warn!(
                    error = %e,
                    "registered version not visible; verify it in the registry and assign the champion alias manually"
                );
                warnings.push(e.to_string());
                None
            }
            Err(e) => return Err(e),
        };

        let models_dir = self.config.output.models_dir.clone();
        self.export(&models_dir, winner, &transform, promotion.as_ref())?;
        tracing::info!(
            run_id = winner.run_id(),
            algorithm = winner.algorithm_id(),
            roc_auc = winner.metrics().roc_auc(),
            excluded = excluded.len(),
            degraded = !warnings.is_empty(),
            "pipeline finished"
        );

        Ok(PipelineReport {
            runs,
            winner: winner_index,
            excluded,
            promotion,
            warnings,
            models_dir,
        })
    }

    async fn attempt(
        &self,
        algorithm: &str,
        split: &Arc<PreprocessedSplit>,
        evaluator: Evaluator,
    ) -> Result<(CandidateModel, MetricSet, ArtifactBundle)> {
        let params = self.config.models.hyperparameters(algorithm)?;
        let split = Arc::clone(split);
        let algorithm = algorithm.to_string();
        let worker_algorithm = algorithm.clone();
        tokio::task::spawn_blocking(move || {
            let candidate = Trainer::new().train(&worker_algorithm, &params, &split)?;
            let (metrics, artifacts) = evaluator.evaluate(&candidate, &split)?;
            Ok((candidate, metrics, artifacts))
        })
        .await
        .map_err(|e| Error::training(&algorithm, format!("worker failed: {e}")))?
    }

    fn exclude(&mut self, algorithm: &str, reason: &Error, started_at: DateTime<Utc>) -> Exclusion {
        tracing::warn!(algorithm, error = %reason, "candidate excluded");
        let params = self
            .config
            .models
            .hyperparameters(algorithm)
            .map(|p| p.to_param_map())
            .unwrap_or_default();
        let run_id = match self
            .recorder
            .record_failure(algorithm, params, reason, started_at)
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(algorithm, error = %e, "failed attempt could not be recorded");
                None
            }
        };
        Exclusion {
            algorithm_id: algorithm.to_string(),
            reason: reason.to_string(),
            run_id,
        }
    }

    fn export(
        &self,
        dir: &Path,
        winner: &Run,
        transform: &FittedTransform,
        promotion: Option<&PromotionOutcome>,
    ) -> Result<()> {
        let model_name = model_name_for(winner.algorithm_id());
        let info = ModelInfo {
            model_name: &model_name,
            algorithm_id: winner.algorithm_id(),
            run_id: winner.run_id(),
            registry_version: promotion.map(|p| p.entry.version()),
            champion_assigned: promotion.is_some_and(|p| p.champion_assigned),
            trained_at: winner.timestamp(),
            metrics: winner.metrics().to_map(),
            config: &self.config,
        };
        write_atomic(
            &dir.join(BEST_MODEL_FILE),
            &serde_json::to_vec_pretty(winner.candidate().as_ref())?,
        )?;
        write_atomic(&dir.join(PIPELINE_FILE), &serde_json::to_vec_pretty(transform)?)?;
        write_atomic(&dir.join(MODEL_INFO_FILE), &serde_json::to_vec_pretty(&info)?)?;
        tracing::info!(dir = %dir.display(), "exported champion artifacts");
        Ok(())
    }
}
