//! Experiment tracking
//!
//! Every training attempt becomes an immutable run in a [`TrackingStore`].
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< RunRecord (N)
//!                              │
//!                              ├──< MetricRecord (N) [scalar]
//!                              └──< ArtifactRecord (N) [CAS]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use chrono::Utc;
//! use trueno_champion::experiment::{
//!     ExperimentRecord, ExperimentStore, RunOutcome, RunStatus, RunSubmission, TrackingStore,
//! };
//!
//! let mut store = ExperimentStore::new();
//! store.ensure_experiment(ExperimentRecord::named("heart-disease")).unwrap();
//!
//! let run_id = store
//!     .create_run(RunSubmission {
//!         experiment_id: "heart-disease".into(),
//!         algorithm_id: "random_forest".into(),
//!         params: BTreeMap::new(),
//!         started_at: Utc::now(),
//!         outcome: RunOutcome::Completed {
//!             metrics: BTreeMap::from([("roc_auc".into(), 0.93)]),
//!             artifacts: vec![],
//!         },
//!     })
//!     .unwrap();
//!
//! assert_eq!(store.get_run(&run_id).unwrap().status(), RunStatus::Success);
//! ```

mod artifact_record;
mod experiment_record;
mod metric_record;
mod recorder;
mod run_record;
mod store;

pub use artifact_record::ArtifactRecord;
pub use experiment_record::{ExperimentRecord, ExperimentRecordBuilder};
pub use metric_record::MetricRecord;
pub use recorder::{Run, RunRecorder};
pub use run_record::{RunRecord, RunRecordBuilder, RunStatus};
pub use store::{ExperimentStore, RunOutcome, RunSubmission, TrackingStore};
