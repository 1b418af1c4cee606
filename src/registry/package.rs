//! Registry payload and the serving-side consumer
//!
//! A [`ModelPackage`] pairs a fitted model with the preprocessing transform
//! it was trained behind; the two are never stored apart.

use super::{ModelRegistry, RegistryEntry, CHAMPION_ALIAS};
use crate::model::{CandidateModel, Classifier};
use crate::preprocess::FittedTransform;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Current package layout version
pub const PACKAGE_FORMAT: u32 = 1;

/// File name of the exported model
pub const BEST_MODEL_FILE: &str = "best_model.json";
/// File name of the exported transform
pub const PIPELINE_FILE: &str = "preprocessing_pipeline.json";

/// Model plus transform plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPackage {
    format: u32,
    run_id: String,
    created_at: DateTime<Utc>,
    model: CandidateModel,
    transform: FittedTransform,
}

impl ModelPackage {
    /// Package `model` with its `transform`, produced by `run_id`.
    #[must_use]
    pub fn new(model: CandidateModel, transform: FittedTransform, run_id: impl Into<String>) -> Self {
        Self {
            format: PACKAGE_FORMAT,
            run_id: run_id.into(),
            created_at: Utc::now(),
            model,
            transform,
        }
    }

    /// Tracking run that produced the model.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The fitted model.
    #[must_use]
    pub const fn model(&self) -> &CandidateModel {
        &self.model
    }

    /// The preprocessing transform.
    #[must_use]
    pub const fn transform(&self) -> &FittedTransform {
        &self.transform
    }

    /// Serialize for the registry.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a registry blob.
    ///
    /// # Errors
    ///
    /// Returns `Error::Registry` for unknown layouts or undecodable bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let package: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::Registry(format!("undecodable model package: {e}")))?;
        if package.format != PACKAGE_FORMAT {
            return Err(Error::Registry(format!(
                "unsupported package format {}",
                package.format
            )));
        }
        Ok(package)
    }
}

/// The current champion of one registered model.
#[derive(Debug, Clone)]
pub struct LoadedChampion {
    /// Registry metadata of the champion version
    pub entry: RegistryEntry,
    /// Decoded package
    pub package: ModelPackage,
}

/// Resolve `model_name@champion`; `None` if no champion has been assigned.
///
/// # Errors
///
/// Registry read failures or an undecodable package.
pub async fn load_champion<R: ModelRegistry>(
    registry: &R,
    model_name: &str,
) -> Result<Option<LoadedChampion>> {
    let Some((entry, blob)) = registry.get_model(model_name, CHAMPION_ALIAS).await? else {
        return Ok(None);
    };
    let package = ModelPackage::from_bytes(&blob)?;
    tracing::info!(
        model_name,
        version = entry.version(),
        run_id = package.run_id(),
        "loaded champion"
    );
    Ok(Some(LoadedChampion { entry, package }))
}

/// Answer for one patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// 1 = disease present
    pub prediction: u8,
    /// Human-readable class
    pub prediction_label: String,
    /// P(class 0)
    pub probability_no_disease: f64,
    /// P(class 1)
    pub probability_disease: f64,
    /// Probability of the predicted class
    pub confidence: f64,
}

/// Runs requests through the packaged transform and model.
#[derive(Debug, Clone)]
pub struct Predictor {
    model: Arc<CandidateModel>,
    transform: Arc<FittedTransform>,
}

impl Predictor {
    /// Predictor over a registry package.
    #[must_use]
    pub fn new(package: ModelPackage) -> Self {
        Self {
            model: Arc::new(package.model),
            transform: Arc::new(package.transform),
        }
    }

    /// Predictor over the files exported to a local models directory.
    ///
    /// # Errors
    ///
    /// Returns an error if either file is missing or undecodable.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let read = |name: &str| {
            let path = dir.join(name);
            std::fs::read(&path).map_err(|e| {
                Error::StorageError(format!("{}: {e}", path.display()))
            })
        };
        let model: CandidateModel = serde_json::from_slice(&read(BEST_MODEL_FILE)?)?;
        let transform: FittedTransform = serde_json::from_slice(&read(PIPELINE_FILE)?)?;
        Ok(Self {
            model: Arc::new(model),
            transform: Arc::new(transform),
        })
    }

    /// Algorithm behind the predictions.
    #[must_use]
    pub fn algorithm_id(&self) -> &str {
        self.model.algorithm_id()
    }

    /// Predict from a request keyed by feature name.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` listing every missing or out-of-range feature.
    pub fn predict(&self, features: &HashMap<String, f64>) -> Result<Prediction> {
        let row = self.transform.schema().row_from_request(features)?;
        let encoded = self.transform.transform_row(&row)?;
        let p = self.model.predict_proba(&encoded);
        let prediction = u8::from(p > 0.5);
        Ok(Prediction {
            prediction,
            prediction_label: if prediction == 1 {
                "Heart Disease"
            } else {
                "No Heart Disease"
            }
            .to_string(),
            probability_no_disease: 1.0 - p,
            probability_disease: p,
            confidence: p.max(1.0 - p),
        })
    }

    /// Predict several requests; fails on the first invalid one.
    ///
    /// # Errors
    ///
    /// See [`Predictor::predict`].
    pub fn predict_batch(&self, requests: &[HashMap<String, f64>]) -> Result<Vec<Prediction>> {
        requests.iter().map(|r| self.predict(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{FeatureKind, FeatureSchema, FeatureSpec, Record, RecordSet, ValueType};
    use crate::model::{Hyperparameters, Trainer, LOGISTIC_REGRESSION};
    use crate::preprocess::Preprocessor;

    fn package() -> ModelPackage {
        let schema = FeatureSchema::new(
            vec![
                FeatureSpec::new("x", FeatureKind::Numerical, ValueType::Float, -10.0, 10.0),
                FeatureSpec::new("c", FeatureKind::Categorical, ValueType::Integer, 0.0, 3.0),
            ],
            "target",
        )
        .unwrap();
        #[allow(clippy::cast_precision_loss)]
        let rows = (0..40)
            .map(|i| {
                let label = u8::from(i % 2 == 0);
                let x = if label == 1 { 1.0 } else { -1.0 } + (i % 5) as f64 * 0.1;
                Record::new(vec![Some(x), Some(f64::from(i % 3))], label)
            })
            .collect();
        let set = RecordSet::new(schema, rows).unwrap();
        let (split, transform) = Preprocessor::new(42, 0.25).unwrap().fit_transform(&set).unwrap();
        let params = Hyperparameters::defaults_for(LOGISTIC_REGRESSION).unwrap();
        let model = Trainer::new().train(LOGISTIC_REGRESSION, &params, &split).unwrap();
        ModelPackage::new(model, transform, "run-1")
    }

    fn request(x: f64, c: f64) -> HashMap<String, f64> {
        HashMap::from([("x".to_string(), x), ("c".to_string(), c)])
    }

    #[test]
    fn test_package_bytes_roundtrip() {
        let pkg = package();
        let back = ModelPackage::from_bytes(&pkg.to_bytes().unwrap()).unwrap();
        assert_eq!(back, pkg);
        assert!(ModelPackage::from_bytes(b"not json").is_err());
    }

    #[test]
    fn test_predict_shape() {
        let predictor = Predictor::new(package());
        let p = predictor.predict(&request(2.0, 1.0)).unwrap();
        assert_eq!(p.prediction, 1);
        assert_eq!(p.prediction_label, "Heart Disease");
        assert!((p.probability_disease + p.probability_no_disease - 1.0).abs() < 1e-12);
        assert!(p.confidence >= 0.5);
    }

    #[test]
    fn test_predict_rejects_invalid_request() {
        let predictor = Predictor::new(package());
        let err = predictor.predict(&HashMap::from([("x".to_string(), 50.0)])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Missing required feature: c"), "{msg}");
    }

    #[test]
    fn test_predict_batch_fails_on_first_bad_request() {
        let predictor = Predictor::new(package());
        let batch = predictor
            .predict_batch(&[request(2.0, 1.0), request(-2.0, 0.0)])
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].prediction, 1);
        assert_eq!(batch[1].prediction, 0);
        assert!(predictor
            .predict_batch(&[request(2.0, 1.0), HashMap::new()])
            .is_err());
    }

    #[tokio::test]
    async fn test_load_champion_none_until_aliased() {
        use crate::registry::{KvModelRegistry, ModelRegistry};

        let registry = KvModelRegistry::in_memory();
        let name = "heart-disease-logistic_regression";
        assert!(load_champion(&registry, name).await.unwrap().is_none());

        let v = registry
            .register_version(name, package().to_bytes().unwrap())
            .await
            .unwrap();
        registry.set_alias(name, CHAMPION_ALIAS, v).await.unwrap();
        let loaded = load_champion(&registry, name).await.unwrap().unwrap();
        assert_eq!(loaded.entry.version(), v);
        assert_eq!(loaded.package.run_id(), "run-1");
    }
}
