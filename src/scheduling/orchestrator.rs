use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduling::baseline::{BaselineOutcome, BaselinePredictor};
use crate::scheduling::features::{FeatureExtractor, FeatureVector};
use crate::scheduling::learned::ModelRegistry;
use crate::scheduling::types::{AlgorithmMode, AlgorithmUsed, Item, LearnerSettings, ReviewRecord};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub applied_interval: f64,
    pub algorithm_used: AlgorithmUsed,
    pub baseline_interval: f64,
    pub learned_interval: Option<f64>,
    /// Strength and difficulty always follow the baseline update, whichever
    /// interval is applied.
    pub baseline: BaselineOutcome,
}

/// Decides which predictor governs a review. Holds no per-review state; the
/// model registry is only read.
#[derive(Debug, Clone)]
pub struct AlgorithmOrchestrator {
    baseline: BaselinePredictor,
    extractor: FeatureExtractor,
    registry: Arc<ModelRegistry>,
    inference_timeout: Duration,
}

impl AlgorithmOrchestrator {
    pub fn new(
        baseline: BaselinePredictor,
        extractor: FeatureExtractor,
        registry: Arc<ModelRegistry>,
        inference_timeout: Duration,
    ) -> Self {
        Self {
            baseline,
            extractor,
            registry,
            inference_timeout,
        }
    }

    pub fn from_config(
        config: &SchedulerConfig,
        extractor: FeatureExtractor,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self::new(
            BaselinePredictor::new(config.baseline.clone(), config.max_interval_days),
            extractor,
            registry,
            config.inference_timeout,
        )
    }

    pub fn baseline(&self) -> &BaselinePredictor {
        &self.baseline
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub async fn resolve<R: Rng + Send>(
        &self,
        item: &Item,
        history: &[ReviewRecord],
        settings: &LearnerSettings,
        recalled: bool,
        response_time_ms: u64,
        rng: &mut R,
    ) -> SchedulerResult<Resolution> {
        let features = self.extractor.extract(item, history)?;
        self.resolve_with_features(item, &features, settings, recalled, response_time_ms, rng)
            .await
    }

    pub async fn resolve_with_features<R: Rng + Send>(
        &self,
        item: &Item,
        features: &FeatureVector,
        settings: &LearnerSettings,
        recalled: bool,
        response_time_ms: u64,
        rng: &mut R,
    ) -> SchedulerResult<Resolution> {
        let baseline = self.baseline.compute(item, recalled, response_time_ms);
        let learned = match settings.algorithm_mode {
            AlgorithmMode::Baseline => None,
            AlgorithmMode::Learned | AlgorithmMode::Comparison => {
                Some(self.predict_learned(*features).await)
            }
        };
        Ok(select(settings.algorithm_mode, baseline, learned, rng))
    }

    /// Runs the active model off the async threads, bounded by the inference
    /// timeout. Every failure is reported as `Unavailable`.
    pub async fn predict_learned(&self, features: FeatureVector) -> SchedulerResult<f64> {
        let active = self
            .registry
            .current()
            .ok_or_else(|| SchedulerError::Unavailable("no learned model loaded".into()))?;
        let predictor = Arc::clone(&active.predictor);
        let max_interval = self.baseline.max_interval_days();

        let task = tokio::task::spawn_blocking(move || {
            predictor.predict_interval(&features, max_interval)
        });
        match tokio::time::timeout(self.inference_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SchedulerError::Unavailable(format!(
                "inference task failed: {join_err}"
            ))),
            Err(_) => Err(SchedulerError::Unavailable(format!(
                "inference for model {} exceeded {:?}",
                active.model_ref.as_str(),
                self.inference_timeout
            ))),
        }
    }
}

/// Picks the applied interval. `learned` is `None` when the learned predictor
/// was not consulted.
pub fn select<R: Rng>(
    mode: AlgorithmMode,
    baseline: BaselineOutcome,
    learned: Option<SchedulerResult<f64>>,
    rng: &mut R,
) -> Resolution {
    let baseline_only = Resolution {
        applied_interval: baseline.interval_days,
        algorithm_used: AlgorithmUsed::Baseline,
        baseline_interval: baseline.interval_days,
        learned_interval: None,
        baseline,
    };

    let learned_interval = match learned {
        None => return baseline_only,
        Some(Ok(days)) => days,
        Some(Err(err)) => {
            tracing::warn!(
                mode = mode.as_str(),
                error = %err,
                "learned predictor unavailable, falling back to baseline"
            );
            return baseline_only;
        }
    };

    let use_learned = match mode {
        AlgorithmMode::Baseline => false,
        AlgorithmMode::Learned => true,
        AlgorithmMode::Comparison => rng.random_bool(0.5),
    };

    let (applied_interval, algorithm_used) = if use_learned {
        (learned_interval, AlgorithmUsed::Learned)
    } else {
        (baseline.interval_days, AlgorithmUsed::Baseline)
    };

    Resolution {
        applied_interval,
        algorithm_used,
        baseline_interval: baseline.interval_days,
        learned_interval: match mode {
            AlgorithmMode::Baseline => None,
            _ => Some(learned_interval),
        },
        baseline,
    }
}
