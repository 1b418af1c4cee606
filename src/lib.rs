//! # Trueno-Champion: Multi-Model Training with Champion Promotion
//!
//! **Version**: 0.1.0
//!
//! Trains several candidate classifiers on the Cleveland heart-disease table,
//! scores them with a common metric set, picks one champion deterministically
//! and promotes it into a versioned model registry through string tags and a
//! reassignable `champion` alias.
//!
//! ## Design Principles
//!
//! - **Partial-failure tolerance**: one algorithm failing never sinks the run
//! - **String-only registry metadata**: tag values are formatted before they
//!   reach the registry, never passed as native numbers or booleans
//! - **Aliases over stages**: promotion is a last-writer-wins pointer swap
//! - **Bounded waits**: registration visibility is polled with a fixed budget
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use trueno_champion::config::PipelineConfig;
//! use trueno_champion::pipeline::TrainingPipeline;
//!
//! # async fn run() -> trueno_champion::Result<()> {
//! let config = PipelineConfig::load(Some("champion.toml".as_ref()))?;
//! let report = TrainingPipeline::from_config(config)?.run().await?;
//! println!("champion: {}", report.winner().algorithm_id());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluate;
pub mod experiment;
pub mod kv;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod registry;
pub mod selector;
pub mod storage;

pub use error::{Error, Result};
