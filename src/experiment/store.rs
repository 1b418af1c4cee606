//! Experiment Store - tracking store for runs, metrics and artifacts
//!
//! Everything lives in memory. A store opened on a directory additionally
//! snapshots itself after every run:
//!
//! ```text
//! <root>/store.json          experiments, runs, metrics, artifact records
//! <root>/blobs/<sha256-hex>  artifact content, written once per digest
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ArtifactRecord, ExperimentRecord, MetricRecord, RunRecord};
use crate::evaluate::Artifact;
use crate::storage::write_atomic;
use crate::{Error, Result};

const SNAPSHOT_FILE: &str = "store.json";
const BLOB_DIR: &str = "blobs";

/// How a submitted attempt ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Trained and evaluated; metrics and artifacts are logged.
    Completed {
        /// Metric name to finite value
        metrics: BTreeMap<String, f64>,
        /// Rendered artifacts
        artifacts: Vec<Artifact>,
    },
    /// Training or evaluation failed.
    Failed {
        /// Human-readable reason
        reason: String,
    },
}

/// Everything the tracking store needs to create one run.
#[derive(Debug, Clone)]
pub struct RunSubmission {
    /// Parent experiment
    pub experiment_id: String,
    /// Algorithm trained
    pub algorithm_id: String,
    /// Hyperparameters as strings
    pub params: BTreeMap<String, String>,
    /// Training start
    pub started_at: DateTime<Utc>,
    /// Result of the attempt
    pub outcome: RunOutcome,
}

/// Durable sink for run records.
pub trait TrackingStore: Send {
    /// Persist one immutable run and return its id.
    ///
    /// # Errors
    ///
    /// `Error::Tracking` if the run cannot be stored.
    fn create_run(&mut self, submission: RunSubmission) -> Result<String>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    experiments: Vec<ExperimentRecord>,
    runs: Vec<RunRecord>,
    metrics: Vec<MetricRecord>,
    artifacts: Vec<ArtifactRecord>,
}

/// In-memory store for experiment tracking data, optionally snapshotted
/// to a directory.
#[derive(Debug, Default)]
pub struct ExperimentStore {
    experiments: HashMap<String, ExperimentRecord>,
    runs: HashMap<String, RunRecord>,
    metrics: Vec<MetricRecord>,
    artifacts: Vec<ArtifactRecord>,
    blobs: HashMap<String, Vec<u8>>,
    root: Option<PathBuf>,
}

impl ExperimentStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or create) a store snapshotted under `root`.
    ///
    /// # Errors
    ///
    /// `Error::Tracking` if an existing snapshot or blob cannot be read.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let mut store = Self {
            root: Some(root.clone()),
            ..Self::default()
        };
        let snapshot_path = root.join(SNAPSHOT_FILE);
        if !snapshot_path.exists() {
            return Ok(store);
        }

        let bytes = std::fs::read(&snapshot_path).map_err(|e| tracking_io(&snapshot_path, &e))?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Tracking(format!("corrupt snapshot {}: {e}", snapshot_path.display())))?;
        for artifact in &snapshot.artifacts {
            if store.blobs.contains_key(artifact.cas_hash()) {
                continue;
            }
            let path = root.join(BLOB_DIR).join(artifact.blob_name());
            let blob = std::fs::read(&path).map_err(|e| tracking_io(&path, &e))?;
            store.blobs.insert(artifact.cas_hash().to_string(), blob);
        }
        store.experiments = snapshot
            .experiments
            .into_iter()
            .map(|e| (e.experiment_id().to_string(), e))
            .collect();
        store.runs = snapshot
            .runs
            .into_iter()
            .map(|r| (r.run_id().to_string(), r))
            .collect();
        store.metrics = snapshot.metrics;
        store.artifacts = snapshot.artifacts;
        tracing::debug!(root = %root.display(), runs = store.runs.len(), "opened tracking store");
        Ok(store)
    }

    /// Snapshot directory, if any.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Check if the store is empty (no experiments, runs, or metrics).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty() && self.runs.is_empty() && self.metrics.is_empty()
    }

    /// Get the number of experiments in the store.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    /// Get the number of runs in the store.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Get the number of metrics in the store.
    #[must_use]
    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    /// Register an experiment unless one with the same id exists.
    ///
    /// # Errors
    ///
    /// `Error::Tracking` if the snapshot cannot be written.
    pub fn ensure_experiment(&mut self, experiment: ExperimentRecord) -> Result<()> {
        if self.experiments.contains_key(experiment.experiment_id()) {
            return Ok(());
        }
        self.experiments
            .insert(experiment.experiment_id().to_string(), experiment);
        self.persist()
    }

    /// Get an experiment by ID.
    #[must_use]
    pub fn get_experiment(&self, experiment_id: &str) -> Option<&ExperimentRecord> {
        self.experiments.get(experiment_id)
    }

    /// Get a run by ID.
    #[must_use]
    pub fn get_run(&self, run_id: &str) -> Option<&RunRecord> {
        self.runs.get(run_id)
    }

    /// All runs of an experiment in creation order.
    #[must_use]
    pub fn get_runs_for_experiment(&self, experiment_id: &str) -> Vec<&RunRecord> {
        let mut runs: Vec<&RunRecord> = self
            .runs
            .values()
            .filter(|run| run.experiment_id() == experiment_id)
            .collect();
        runs.sort_by_key(|r| r.sequence());
        runs
    }

    /// Metrics logged for a run, keyed by name.
    #[must_use]
    pub fn get_metrics_for_run(&self, run_id: &str) -> BTreeMap<String, f64> {
        self.metrics
            .iter()
            .filter(|m| m.run_id() == run_id)
            .map(|m| (m.key().to_string(), m.value()))
            .collect()
    }

    /// Artifact records of a run.
    #[must_use]
    pub fn get_artifacts_for_run(&self, run_id: &str) -> Vec<&ArtifactRecord> {
        self.artifacts.iter().filter(|a| a.run_id() == run_id).collect()
    }

    /// Content of a run's artifact.
    #[must_use]
    pub fn artifact_bytes(&self, run_id: &str, key: &str) -> Option<&[u8]> {
        self.artifacts
            .iter()
            .find(|a| a.run_id() == run_id && a.key() == key)
            .and_then(|a| self.blobs.get(a.cas_hash()))
            .map(Vec::as_slice)
    }

    fn persist(&self) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        for artifact in &self.artifacts {
            let path = root.join(BLOB_DIR).join(artifact.blob_name());
            if path.exists() {
                continue;
            }
            let blob = self.blobs.get(artifact.cas_hash()).ok_or_else(|| {
                Error::Tracking(format!("missing blob for {}", artifact.cas_hash()))
            })?;
            write_atomic(&path, blob).map_err(|e| Error::Tracking(e.to_string()))?;
        }

        let mut runs: Vec<&RunRecord> = self.runs.values().collect();
        runs.sort_by_key(|r| r.sequence());
        let mut experiments: Vec<&ExperimentRecord> = self.experiments.values().collect();
        experiments.sort_by(|a, b| a.experiment_id().cmp(b.experiment_id()));
        let snapshot = serde_json::json!({
            "experiments": experiments,
            "runs": runs,
            "metrics": self.metrics,
            "artifacts": self.artifacts,
        });
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        write_atomic(&root.join(SNAPSHOT_FILE), &bytes).map_err(|e| Error::Tracking(e.to_string()))
    }
}

impl TrackingStore for ExperimentStore {
    fn create_run(&mut self, submission: RunSubmission) -> Result<String> {
        if !self.experiments.contains_key(&submission.experiment_id) {
            return Err(Error::Tracking(format!(
                "unknown experiment '{}'",
                submission.experiment_id
            )));
        }
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let mut run = RunRecord::builder(&run_id, &submission.experiment_id, &submission.algorithm_id)
            .sequence(self.runs.len() as u64)
            .params(submission.params)
            .started_at(submission.started_at)
            .build();
        run.start();

        let (metrics_before, artifacts_before) = (self.metrics.len(), self.artifacts.len());
        let mut new_blobs = Vec::new();
        match submission.outcome {
            RunOutcome::Completed { metrics, artifacts } => {
                if let Some((key, value)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
                    return Err(Error::Tracking(format!("metric '{key}' is {value}")));
                }
                self.metrics.extend(
                    metrics
                        .into_iter()
                        .map(|(key, value)| MetricRecord::new(&run_id, key, value)),
                );
                for artifact in artifacts {
                    let record = ArtifactRecord::for_content(
                        &run_id,
                        artifact.name(),
                        artifact.content_type(),
                        artifact.bytes(),
                    );
                    if !self.blobs.contains_key(record.cas_hash()) {
                        self.blobs
                            .insert(record.cas_hash().to_string(), artifact.bytes().to_vec());
                        new_blobs.push(record.cas_hash().to_string());
                    }
                    self.artifacts.push(record);
                }
                run.succeed();
            }
            RunOutcome::Failed { reason } => run.fail(reason),
        }
        self.runs.insert(run_id.clone(), run);

        if let Err(e) = self.persist() {
            self.runs.remove(&run_id);
            self.metrics.truncate(metrics_before);
            self.artifacts.truncate(artifacts_before);
            for hash in &new_blobs {
                self.blobs.remove(hash);
            }
            return Err(e);
        }
        tracing::debug!(run_id = %run_id, algorithm = %submission.algorithm_id, "created run");
        Ok(run_id)
    }
}

fn tracking_io(path: &Path, e: &std::io::Error) -> Error {
    Error::Tracking(format!("{}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::RunStatus;

    fn completed(experiment_id: &str) -> RunSubmission {
        RunSubmission {
            experiment_id: experiment_id.to_string(),
            algorithm_id: "random_forest".to_string(),
            params: BTreeMap::from([("n_estimators".to_string(), "100".to_string())]),
            started_at: Utc::now(),
            outcome: RunOutcome::Completed {
                metrics: BTreeMap::from([("roc_auc".to_string(), 0.91)]),
                artifacts: vec![Artifact::svg("roc_curve_random_forest.svg", "<svg/>".into())],
            },
        }
    }

    #[test]
    fn test_store_default() {
        let store = ExperimentStore::new();
        assert!(store.is_empty());
        assert_eq!(store.experiment_count(), 0);
        assert_eq!(store.run_count(), 0);
        assert_eq!(store.metric_count(), 0);
    }

    #[test]
    fn test_ensure_experiment_keeps_first_record() {
        let mut store = ExperimentStore::new();
        store.ensure_experiment(ExperimentRecord::named("heart")).unwrap();
        store
            .ensure_experiment(ExperimentRecord::builder("heart", "renamed").build())
            .unwrap();
        assert_eq!(store.experiment_count(), 1);
        assert_eq!(store.get_experiment("heart").unwrap().name(), "heart");
        assert!(store.get_experiment("other").is_none());
    }

    #[test]
    fn test_failed_persist_rolls_back_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ExperimentStore::open(dir.path()).unwrap();
        store.ensure_experiment(ExperimentRecord::named("heart")).unwrap();
        // a file where the blob directory should be makes every blob write fail
        std::fs::write(dir.path().join(BLOB_DIR), b"").unwrap();

        assert!(matches!(store.create_run(completed("heart")), Err(Error::Tracking(_))));
        assert_eq!(store.run_count(), 0);
        assert_eq!(store.metric_count(), 0);
        assert!(store.artifacts.is_empty());
        assert!(store.blobs.is_empty());
    }

    #[test]
    fn test_create_run_requires_experiment() {
        let mut store = ExperimentStore::new();
        assert!(matches!(
            store.create_run(completed("missing")),
            Err(Error::Tracking(_))
        ));
    }

    #[test]
    fn test_create_run_logs_everything() {
        let mut store = ExperimentStore::new();
        store.ensure_experiment(ExperimentRecord::named("heart")).unwrap();
        let run_id = store.create_run(completed("heart")).unwrap();

        let run = store.get_run(&run_id).unwrap();
        assert_eq!(run.status(), RunStatus::Success);
        assert_eq!(run.params()["n_estimators"], "100");
        assert_eq!(store.get_metrics_for_run(&run_id)["roc_auc"], 0.91);
        assert_eq!(
            store.artifact_bytes(&run_id, "roc_curve_random_forest.svg"),
            Some(&b"<svg/>"[..])
        );
    }

    #[test]
    fn test_runs_are_never_overwritten() {
        let mut store = ExperimentStore::new();
        store.ensure_experiment(ExperimentRecord::named("heart")).unwrap();
        let a = store.create_run(completed("heart")).unwrap();
        let b = store.create_run(completed("heart")).unwrap();
        assert_ne!(a, b);
        let runs = store.get_runs_for_experiment("heart");
        assert_eq!(runs.len(), 2);
        assert!(runs[0].sequence() < runs[1].sequence());
    }

    #[test]
    fn test_failed_run_is_recorded() {
        let mut store = ExperimentStore::new();
        store.ensure_experiment(ExperimentRecord::named("heart")).unwrap();
        let mut submission = completed("heart");
        submission.outcome = RunOutcome::Failed {
            reason: "singular Hessian".to_string(),
        };
        let run_id = store.create_run(submission).unwrap();
        let run = store.get_run(&run_id).unwrap();
        assert_eq!(run.status(), RunStatus::Failed);
        assert!(store.get_metrics_for_run(&run_id).is_empty());
    }

    #[test]
    fn test_non_finite_metric_rejected() {
        let mut store = ExperimentStore::new();
        store.ensure_experiment(ExperimentRecord::named("heart")).unwrap();
        let mut submission = completed("heart");
        submission.outcome = RunOutcome::Completed {
            metrics: BTreeMap::from([("roc_auc".to_string(), f64::NAN)]),
            artifacts: vec![],
        };
        assert!(store.create_run(submission).is_err());
        assert_eq!(store.run_count(), 0);
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = {
            let mut store = ExperimentStore::open(dir.path()).unwrap();
            store.ensure_experiment(ExperimentRecord::named("heart")).unwrap();
            store.create_run(completed("heart")).unwrap()
        };
        assert!(dir.path().join("store.json").exists());

        let store = ExperimentStore::open(dir.path()).unwrap();
        assert_eq!(store.run_count(), 1);
        assert_eq!(store.get_run(&run_id).unwrap().algorithm_id(), "random_forest");
        assert!(store
            .artifact_bytes(&run_id, "roc_curve_random_forest.svg")
            .is_some());
    }
}
