//! Trained interval predictors.
//!
//! Models are produced offline and only evaluated here. Every variant scores
//! in log-days and maps the result back with `exp`, so a model can never
//! predict a negative interval.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduling::features::{FeatureVector, FEATURE_DIM};
use crate::scheduling::types::MIN_INTERVAL_DAYS;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationStat {
    pub mean: f64,
    pub std_dev: f64,
}

impl Default for NormalizationStat {
    fn default() -> Self {
        Self {
            mean: 0.0,
            std_dev: 1.0,
        }
    }
}

impl NormalizationStat {
    fn apply(&self, value: f64) -> f64 {
        if self.std_dev.abs() < 1e-12 {
            value - self.mean
        } else {
            (value - self.mean) / self.std_dev
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinearModel {
    /// Empty means the features are used as-is.
    #[serde(default)]
    pub normalization: Vec<NormalizationStat>,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LinearModel {
    fn log_days(&self, features: &FeatureVector) -> SchedulerResult<f64> {
        if self.weights.len() != FEATURE_DIM {
            return Err(SchedulerError::Unavailable(format!(
                "linear model expects {} weights, has {}",
                FEATURE_DIM,
                self.weights.len()
            )));
        }
        if !self.normalization.is_empty() && self.normalization.len() != FEATURE_DIM {
            return Err(SchedulerError::Unavailable(format!(
                "linear model has {} normalizers for {} features",
                self.normalization.len(),
                FEATURE_DIM
            )));
        }

        let mut score = self.bias;
        for (i, (x, w)) in features.values().iter().zip(&self.weights).enumerate() {
            let x = match self.normalization.get(i) {
                Some(stat) => stat.apply(*x),
                None => *x,
            };
            score += w * x;
        }
        Ok(score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    pub left: f64,
    pub right: f64,
}

/// Additive depth-1 trees, as exported by a gradient-boosting trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StumpEnsemble {
    pub base_score: f64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    pub stumps: Vec<Stump>,
}

fn default_learning_rate() -> f64 {
    1.0
}

impl StumpEnsemble {
    fn log_days(&self, features: &FeatureVector) -> SchedulerResult<f64> {
        let values = features.values();
        let mut score = 0.0;
        for stump in &self.stumps {
            let x = values.get(stump.feature).ok_or_else(|| {
                SchedulerError::Unavailable(format!(
                    "stump references feature {} of {}",
                    stump.feature, FEATURE_DIM
                ))
            })?;
            score += if *x <= stump.threshold {
                stump.left
            } else {
                stump.right
            };
        }
        Ok(self.base_score + self.learning_rate * score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedPredictor {
    pub weight: f64,
    pub model: LearnedPredictor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleModel {
    pub members: Vec<WeightedPredictor>,
}

impl EnsembleModel {
    fn days(&self, features: &FeatureVector) -> SchedulerResult<f64> {
        if self.members.is_empty() {
            return Err(SchedulerError::Unavailable("ensemble has no members".into()));
        }
        let total_weight: f64 = self.members.iter().map(|m| m.weight).sum();
        let negative = self.members.iter().any(|m| m.weight < 0.0);
        if negative || total_weight.is_nan() || total_weight <= 0.0 {
            return Err(SchedulerError::Unavailable(
                "ensemble weights must be non-negative with a positive sum".into(),
            ));
        }

        let mut sum = 0.0;
        for member in self.members.iter().filter(|m| m.weight > 0.0) {
            sum += member.weight * member.model.raw_days(features)?;
        }
        Ok(sum / total_weight)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LearnedPredictor {
    Linear(LinearModel),
    Stumps(StumpEnsemble),
    Ensemble(EnsembleModel),
}

impl LearnedPredictor {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Linear(_) => "linear",
            Self::Stumps(_) => "stumps",
            Self::Ensemble(_) => "ensemble",
        }
    }

    /// Interval in days clamped to `[1, max_interval_days]`.
    pub fn predict_interval(
        &self,
        features: &FeatureVector,
        max_interval_days: f64,
    ) -> SchedulerResult<f64> {
        if !features.is_finite() {
            return Err(SchedulerError::Unavailable("non-finite feature vector".into()));
        }
        let days = self.raw_days(features)?;
        Ok(days.clamp(MIN_INTERVAL_DAYS, max_interval_days.max(MIN_INTERVAL_DAYS)))
    }

    /// Runs the model once on a neutral input so shape errors show up at
    /// load time rather than on the first review.
    pub fn validate(&self) -> SchedulerResult<()> {
        self.raw_days(&FeatureVector::new([0.0; FEATURE_DIM]))
            .map(|_| ())
    }

    fn raw_days(&self, features: &FeatureVector) -> SchedulerResult<f64> {
        let days = match self {
            Self::Linear(model) => model.log_days(features)?.exp(),
            Self::Stumps(model) => model.log_days(features)?.exp(),
            Self::Ensemble(model) => model.days(features)?,
        };
        if days.is_nan() {
            return Err(SchedulerError::Unavailable(format!(
                "{} model produced NaN",
                self.name()
            )));
        }
        Ok(days)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelRef(String);

impl ModelRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub trait ModelLoader: Send + Sync {
    fn load_predictor(&self, model_ref: &ModelRef) -> SchedulerResult<LearnedPredictor>;
}

/// Reads `<dir>/<model_ref>.json`.
#[derive(Debug, Clone)]
pub struct FileModelLoader {
    dir: PathBuf,
}

impl FileModelLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, model_ref: &ModelRef) -> SchedulerResult<PathBuf> {
        let name = model_ref.as_str();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(SchedulerError::Unavailable(format!(
                "invalid model reference {name:?}"
            )));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}

impl ModelLoader for FileModelLoader {
    fn load_predictor(&self, model_ref: &ModelRef) -> SchedulerResult<LearnedPredictor> {
        let path = self.path_for(model_ref)?;
        let load = || -> SchedulerResult<LearnedPredictor> {
            let raw = std::fs::read_to_string(&path)?;
            let predictor: LearnedPredictor = serde_json::from_str(&raw)?;
            predictor.validate()?;
            Ok(predictor)
        };
        load().map_err(SchedulerError::into_unavailable)
    }
}

#[derive(Debug)]
pub struct ActiveModel {
    pub model_ref: ModelRef,
    pub predictor: Arc<LearnedPredictor>,
    pub loaded_at: DateTime<Utc>,
}

/// Holds the predictor reviews run against. Readers clone the `Arc` and keep
/// using that snapshot even if a reload lands mid-review.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    active: RwLock<Option<Arc<ActiveModel>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<ActiveModel>> {
        self.active.read().clone()
    }

    pub fn install(&self, model_ref: ModelRef, predictor: LearnedPredictor) -> SchedulerResult<()> {
        predictor.validate()?;
        let model = ActiveModel {
            model_ref,
            predictor: Arc::new(predictor),
            loaded_at: Utc::now(),
        };
        tracing::info!(
            model = %model.model_ref.as_str(),
            kind = model.predictor.name(),
            "learned predictor installed"
        );
        *self.active.write() = Some(Arc::new(model));
        Ok(())
    }

    pub fn clear(&self) {
        *self.active.write() = None;
    }

    /// On failure the previously active model stays in place.
    pub fn reload(&self, loader: &dyn ModelLoader, model_ref: &ModelRef) -> SchedulerResult<()> {
        match loader.load_predictor(model_ref) {
            Ok(predictor) => self.install(model_ref.clone(), predictor),
            Err(err) => {
                tracing::warn!(
                    model = %model_ref.as_str(),
                    error = %err,
                    kept = ?self.current().map(|m| m.model_ref.clone()),
                    "model reload failed"
                );
                Err(err)
            }
        }
    }
}
