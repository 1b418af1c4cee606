//! Run Recorder - turns evaluated candidates into tracked runs

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{RunOutcome, RunSubmission, TrackingStore};
use crate::evaluate::{ArtifactBundle, MetricSet};
use crate::model::CandidateModel;
use crate::{Error, Result};

/// A recorded, evaluated candidate. Immutable.
#[derive(Debug, Clone)]
pub struct Run {
    run_id: String,
    candidate: Arc<CandidateModel>,
    metrics: MetricSet,
    artifacts: ArtifactBundle,
    timestamp: DateTime<Utc>,
    sequence: u64,
}

impl Run {
    /// Assemble a run from its parts.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        candidate: Arc<CandidateModel>,
        metrics: MetricSet,
        artifacts: ArtifactBundle,
        timestamp: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            candidate,
            metrics,
            artifacts,
            timestamp,
            sequence,
        }
    }

    /// Tracking-store run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The fitted candidate.
    #[must_use]
    pub fn candidate(&self) -> &Arc<CandidateModel> {
        &self.candidate
    }

    /// Shorthand for the candidate's algorithm id.
    #[must_use]
    pub fn algorithm_id(&self) -> &str {
        self.candidate.algorithm_id()
    }

    /// Evaluation metrics.
    #[must_use]
    pub const fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    /// Rendered diagnostics.
    #[must_use]
    pub const fn artifacts(&self) -> &ArtifactBundle {
        &self.artifacts
    }

    /// When the run was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Recording order within one pipeline execution.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Records runs for one experiment into a [`TrackingStore`].
#[derive(Debug)]
pub struct RunRecorder<T> {
    store: T,
    experiment_id: String,
    next_sequence: u64,
}

impl<T: TrackingStore> RunRecorder<T> {
    /// Recorder writing runs under `experiment_id`.
    pub fn new(store: T, experiment_id: impl Into<String>) -> Self {
        Self {
            store,
            experiment_id: experiment_id.into(),
            next_sequence: 0,
        }
    }

    /// Persist an evaluated candidate as a successful run.
    ///
    /// # Errors
    ///
    /// `Error::Tracking` if the store rejects the run.
    pub fn record(
        &mut self,
        candidate: Arc<CandidateModel>,
        metrics: MetricSet,
        artifacts: ArtifactBundle,
        started_at: DateTime<Utc>,
    ) -> Result<Run> {
        let submission = RunSubmission {
            experiment_id: self.experiment_id.clone(),
            algorithm_id: candidate.algorithm_id().to_string(),
            params: candidate.hyperparameters().to_param_map(),
            started_at,
            outcome: RunOutcome::Completed {
                metrics: metrics.to_map(),
                artifacts: artifacts.iter().cloned().collect(),
            },
        };
        let run_id = self.store.create_run(submission).map_err(as_tracking)?;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        tracing::info!(
            run_id = %run_id,
            algorithm = candidate.algorithm_id(),
            sequence,
            "recorded run"
        );
        Ok(Run::new(run_id, candidate, metrics, artifacts, Utc::now(), sequence))
    }

    /// Persist a failed attempt so it remains visible in tracking.
    ///
    /// # Errors
    ///
    /// `Error::Tracking` if the store rejects the run.
    pub fn record_failure(
        &mut self,
        algorithm_id: &str,
        params: BTreeMap<String, String>,
        reason: &Error,
        started_at: DateTime<Utc>,
    ) -> Result<String> {
        let submission = RunSubmission {
            experiment_id: self.experiment_id.clone(),
            algorithm_id: algorithm_id.to_string(),
            params,
            started_at,
            outcome: RunOutcome::Failed {
                reason: reason.to_string(),
            },
        };
        self.store.create_run(submission).map_err(as_tracking)
    }

    /// Underlying store.
    pub const fn store(&self) -> &T {
        &self.store
    }

    /// Give back the store.
    pub fn into_store(self) -> T {
        self.store
    }
}

fn as_tracking(e: Error) -> Error {
    match e {
        Error::Tracking(_) => e,
        other => Error::Tracking(other.to_string()),
    }
}
