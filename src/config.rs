//! Pipeline configuration
//!
//! Layered with `figment`: built-in defaults, then an optional TOML file,
//! then `CHAMPION_`-prefixed environment variables where `__` separates
//! nested keys (`CHAMPION_DATA__TEST_SIZE=0.25`).

use crate::dataset::{FeatureKind, FeatureSchema, FeatureSpec};
use crate::evaluate::DEFAULT_CV_FOLDS;
use crate::model::{
    Hyperparameters, LogisticRegressionParams, RandomForestParams, LOGISTIC_REGRESSION,
    RANDOM_FOREST,
};
use crate::registry::RetryPolicy;
use crate::{Error, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CHAMPION_";

/// Full pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw data location and split
    pub data: DataConfig,
    /// Feature columns
    pub features: FeaturesConfig,
    /// Algorithms and their hyperparameters
    pub models: ModelsConfig,
    /// Experiment tracking store
    pub tracking: TrackingConfig,
    /// Model registry and promotion retries
    pub registry: RegistryConfig,
    /// Local artifact export
    pub output: OutputConfig,
}

/// `[data]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Parquet or CSV file holding the raw table
    pub raw_path: PathBuf,
    /// Held-out fraction in `(0, 1)`
    pub test_size: f64,
    /// Split seed
    pub random_state: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            raw_path: PathBuf::from("data/raw/heart.csv"),
            test_size: 0.2,
            random_state: 42,
        }
    }
}

/// `[features]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Label column
    pub target: String,
    /// Median-imputed, standard-scaled columns
    pub numerical: Vec<String>,
    /// Mode-imputed, one-hot encoded columns
    pub categorical: Vec<String>,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        let schema = FeatureSchema::heart_disease();
        let names = |kind: FeatureKind| {
            schema
                .features()
                .iter()
                .filter(|f| f.kind == kind)
                .map(|f| f.name.clone())
                .collect()
        };
        Self {
            target: schema.target().to_string(),
            numerical: names(FeatureKind::Numerical),
            categorical: names(FeatureKind::Categorical),
        }
    }
}

impl FeaturesConfig {
    /// Build the schema for the configured columns.
    ///
    /// Ranges and value types come from the heart-disease schema; the kind
    /// follows the list a column appears in.
    ///
    /// # Errors
    ///
    /// `Error::Config` for unknown or duplicated columns.
    pub fn schema(&self) -> Result<FeatureSchema> {
        let known = FeatureSchema::heart_disease();
        let mut specs = Vec::with_capacity(self.numerical.len() + self.categorical.len());
        let columns = self
            .numerical
            .iter()
            .map(|n| (n, FeatureKind::Numerical))
            .chain(self.categorical.iter().map(|n| (n, FeatureKind::Categorical)));
        for (name, kind) in columns {
            let base = known
                .features()
                .iter()
                .find(|f| &f.name == name)
                .ok_or_else(|| Error::Config(format!("unknown feature column '{name}'")))?;
            specs.push(FeatureSpec::new(name.clone(), kind, base.value_type, base.min, base.max));
        }
        FeatureSchema::new(specs, self.target.clone()).map_err(|e| Error::Config(e.to_string()))
    }
}

/// `[models]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Algorithms to train, in recording order
    pub models_to_train: Vec<String>,
    /// Cross-validation folds
    pub cv_folds: usize,
    /// `[models.logistic_regression]`
    pub logistic_regression: LogisticRegressionParams,
    /// `[models.random_forest]`
    pub random_forest: RandomForestParams,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            models_to_train: vec![LOGISTIC_REGRESSION.to_string(), RANDOM_FOREST.to_string()],
            cv_folds: DEFAULT_CV_FOLDS,
            logistic_regression: LogisticRegressionParams::default(),
            random_forest: RandomForestParams::default(),
        }
    }
}

impl ModelsConfig {
    /// Hyperparameters for `algorithm_id`.
    ///
    /// # Errors
    ///
    /// `Error::Config` for an unknown algorithm.
    pub fn hyperparameters(&self, algorithm_id: &str) -> Result<Hyperparameters> {
        match algorithm_id {
            LOGISTIC_REGRESSION => Ok(Hyperparameters::LogisticRegression(
                self.logistic_regression.clone(),
            )),
            RANDOM_FOREST => Ok(Hyperparameters::RandomForest(self.random_forest.clone())),
            other => Err(Error::Config(format!("unknown algorithm '{other}'"))),
        }
    }
}

/// `[tracking]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Directory of the experiment store snapshot
    pub store_dir: PathBuf,
    /// Experiment all runs are filed under
    pub experiment_name: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("mlruns"),
            experiment_name: "heart-disease-classification".to_string(),
        }
    }
}

/// `[registry]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Root of the file-backed registry
    pub root: PathBuf,
    /// Visibility polls after registration
    pub visibility_attempts: u32,
    /// Delay between visibility polls, milliseconds
    pub visibility_delay_ms: u64,
    /// Attempts per tag or alias write
    pub metadata_attempts: u32,
    /// Delay between tag/alias attempts, milliseconds
    pub metadata_delay_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("mlruns/registry"),
            visibility_attempts: 10,
            visibility_delay_ms: 500,
            metadata_attempts: 3,
            metadata_delay_ms: 200,
        }
    }
}

impl RegistryConfig {
    /// Retry policy for the registration-visibility poll.
    #[must_use]
    pub const fn visibility_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.visibility_attempts,
            Duration::from_millis(self.visibility_delay_ms),
        )
    }

    /// Retry policy for tag and alias writes.
    #[must_use]
    pub const fn metadata_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.metadata_attempts,
            Duration::from_millis(self.metadata_delay_ms),
        )
    }
}

/// `[output]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving `best_model.json` and friends
    pub models_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
        }
    }
}

impl PipelineConfig {
    /// Defaults merged with `path` (when given) and the environment.
    ///
    /// # Errors
    ///
    /// `Error::Config` if a layer fails to parse or the result is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::Config(format!("config file not found: {}", path.display())));
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(&figment)
    }

    /// Parse a TOML document over the defaults, ignoring the environment.
    ///
    /// # Errors
    ///
    /// `Error::Config` on parse or validation failure.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml));
        Self::extract(&figment)
    }

    fn extract(figment: &Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// `Error::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if !(self.data.test_size > 0.0 && self.data.test_size < 1.0) {
            return Err(Error::Config(format!(
                "data.test_size must be in (0, 1), got {}",
                self.data.test_size
            )));
        }
        if self.models.cv_folds < 2 {
            return Err(Error::Config(format!(
                "models.cv_folds must be at least 2, got {}",
                self.models.cv_folds
            )));
        }
        if self.models.models_to_train.is_empty() {
            return Err(Error::Config("models.models_to_train is empty".to_string()));
        }
        for algorithm in &self.models.models_to_train {
            self.models.hyperparameters(algorithm)?;
        }
        if self.registry.visibility_attempts == 0 || self.registry.metadata_attempts == 0 {
            return Err(Error::Config("registry retry attempts must be at least 1".to_string()));
        }
        self.features.schema()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MaxFeatures;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.models.models_to_train, vec!["logistic_regression", "random_forest"]);
        assert_eq!(config.features.schema().unwrap().width(), 13);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [data]
            test_size = 0.3

            [models]
            models_to_train = ["random_forest"]

            [models.random_forest]
            n_estimators = 25
            max_features = "log2"
            "#,
        )
        .unwrap();
        assert!((config.data.test_size - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.data.random_state, 42);
        assert_eq!(config.models.random_forest.n_estimators, 25);
        assert_eq!(config.models.random_forest.max_features, MaxFeatures::Log2);
        assert_eq!(config.models.random_forest.random_state, 42);
    }

    #[test]
    fn test_rejects_bad_ratio_and_unknown_algorithm() {
        assert!(matches!(
            PipelineConfig::from_toml_str("[data]\ntest_size = 1.0"),
            Err(Error::Config(_))
        ));
        let err = PipelineConfig::from_toml_str("[models]\nmodels_to_train = [\"svm\"]").unwrap_err();
        assert!(err.to_string().contains("svm"));
        assert!(PipelineConfig::from_toml_str("[models]\ncv_folds = 0").is_err());
        assert!(PipelineConfig::from_toml_str("[models]\nmodels_to_train = []").is_err());
    }

    #[test]
    fn test_unknown_feature_column() {
        let err = PipelineConfig::from_toml_str("[features]\nnumerical = [\"bmi\"]").unwrap_err();
        assert!(err.to_string().contains("bmi"));
    }

    #[test]
    fn test_env_layer() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CHAMPION_DATA__RANDOM_STATE", "7");
            jail.set_env("CHAMPION_REGISTRY__VISIBILITY_ATTEMPTS", "2");
            let config = PipelineConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.data.random_state, 7);
            assert_eq!(config.registry.visibility_policy().attempts, 2);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::load(Some(Path::new("/nonexistent/champion.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
