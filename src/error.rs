//! Error types for trueno-champion
//!
//! Errors are split by blast radius: input failures abort the pipeline,
//! candidate failures drop one algorithm, promotion failures degrade to a
//! warning once the model is safely registered.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// trueno-champion error types
#[derive(Error, Debug)]
pub enum Error {
    /// Input rows violate the declared feature schema (fatal)
    #[error("Schema error: {0}")]
    Schema(String),

    /// Record source could not produce a record set (fatal)
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// One algorithm failed to fit; excludes that candidate only
    #[error("Training error [{algorithm}]: {message}")]
    Training {
        /// Algorithm identifier that failed
        algorithm: String,
        /// Failure detail
        message: String,
    },

    /// Metrics or artifacts could not be computed for one candidate
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Tracking store rejected a run; excludes that candidate only
    #[error("Tracking error: {0}")]
    Tracking(String),

    /// No candidate survived training, evaluation and recording (fatal)
    #[error("No candidate: {0}")]
    NoCandidate(String),

    /// Registered version never became visible within the poll budget
    #[error("Registration of {model_name} v{version} not visible after {attempts} attempts")]
    RegistrationTimeout {
        /// Registered model name
        model_name: String,
        /// Version returned by the registry
        version: u64,
        /// Number of polls performed
        attempts: u32,
    },

    /// Registry metadata serializer rejected a tag or alias payload
    #[error("Metadata serialization failed: {0}\nAssign the alias manually once the payload is fixed")]
    MetadataSerialization(String),

    /// Registry store failure
    #[error("Registry error: {0}")]
    Registry(String),

    /// Storage error (Parquet/Arrow/KV files)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Rendering a diagnostic artifact failed
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a training error for `algorithm`.
    pub fn training(algorithm: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Training {
            algorithm: algorithm.into(),
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole pipeline.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Schema(_) | Self::DataUnavailable(_) | Self::NoCandidate(_) | Self::Config(_)
        )
    }

    /// Whether this error only removes one candidate from the selection pool.
    #[must_use]
    pub const fn is_candidate_local(&self) -> bool {
        matches!(
            self,
            Self::Training { .. } | Self::Evaluation(_) | Self::Tracking(_) | Self::Artifact(_)
        )
    }
}
