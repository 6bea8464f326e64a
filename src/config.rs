use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scheduling::types::AlgorithmMode;

pub const DEFAULT_MAX_INTERVAL_DAYS: f64 = 365.0;
/// Hard upper bound on any configured interval cap, about a century.
pub const MAX_INTERVAL_CEILING_DAYS: f64 = 36_500.0;
pub const DEFAULT_INFERENCE_TIMEOUT_MS: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineParams {
    pub initial_strength: f64,
    pub strength_floor: f64,
    /// Share of the strength above the floor kept after a lapse.
    pub lapse_carry: f64,
    pub base_gain: f64,
    pub min_gain: f64,
    pub seed_interval_days: f64,
    pub reset_interval_days: f64,
    pub min_ease: f64,
    pub ease_per_strength: f64,
    pub difficulty_up: f64,
    pub difficulty_down: f64,
    pub initial_difficulty: f64,
    pub fast_response_ms: i64,
    pub slow_response_ms: i64,
}

impl Default for BaselineParams {
    fn default() -> Self {
        Self {
            initial_strength: 1.0,
            strength_floor: 0.5,
            lapse_carry: 0.2,
            base_gain: 0.6,
            min_gain: 0.1,
            seed_interval_days: 1.0,
            reset_interval_days: 1.0,
            min_ease: 1.3,
            ease_per_strength: 0.4,
            difficulty_up: 0.15,
            difficulty_down: 0.05,
            initial_difficulty: 0.3,
            fast_response_ms: 2000,
            slow_response_ms: 5000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_interval_days: f64,
    pub inference_timeout: Duration,
    pub model_dir: Option<PathBuf>,
    pub model_ref: Option<String>,
    pub rng_seed: Option<u64>,
    pub default_mode: AlgorithmMode,
    pub log_level: String,
    pub baseline: BaselineParams,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_interval_days: DEFAULT_MAX_INTERVAL_DAYS,
            inference_timeout: Duration::from_millis(DEFAULT_INFERENCE_TIMEOUT_MS),
            model_dir: None,
            model_ref: None,
            rng_seed: None,
            default_mode: AlgorithmMode::Baseline,
            log_level: "info".to_string(),
            baseline: BaselineParams::default(),
        }
    }
}

impl SchedulerConfig {
    /// Applies a `.env` file if one exists, then reads the environment.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(days) = std::env::var("SCHEDULER_MAX_INTERVAL_DAYS")
            .ok()
            .and_then(|v| parse_max_interval(&v))
        {
            config.max_interval_days = days;
        }
        if let Some(ms) = std::env::var("SCHEDULER_INFERENCE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.inference_timeout = Duration::from_millis(ms);
        }
        config.model_dir = std::env::var("SCHEDULER_MODEL_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        config.model_ref = std::env::var("SCHEDULER_MODEL_REF")
            .ok()
            .filter(|v| !v.trim().is_empty());
        config.rng_seed = std::env::var("SCHEDULER_RNG_SEED")
            .ok()
            .and_then(|v| v.parse::<u64>().ok());
        if let Ok(val) = std::env::var("SCHEDULER_DEFAULT_MODE") {
            config.default_mode = AlgorithmMode::parse(&val).unwrap_or_default();
        }
        config.log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        config
    }
}

/// Accepts a finite cap of at least one day. Values above
/// [`MAX_INTERVAL_CEILING_DAYS`] are capped to it.
fn parse_max_interval(raw: &str) -> Option<f64> {
    let days = raw.trim().parse::<f64>().ok()?;
    if !days.is_finite() || days < 1.0 {
        return None;
    }
    Some(days.min(MAX_INTERVAL_CEILING_DAYS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_interval_days, 365.0);
        assert_eq!(config.inference_timeout, Duration::from_millis(50));
        assert_eq!(config.default_mode, AlgorithmMode::Baseline);
        assert!(config.baseline.seed_interval_days >= 1.0);
        assert!(config.baseline.strength_floor < config.baseline.initial_strength);
    }

    #[test]
    fn test_max_interval_is_capped() {
        assert_eq!(parse_max_interval("180"), Some(180.0));
        assert_eq!(parse_max_interval(" 1e8 "), Some(MAX_INTERVAL_CEILING_DAYS));
        assert_eq!(parse_max_interval("1e300"), Some(MAX_INTERVAL_CEILING_DAYS));
        assert_eq!(parse_max_interval("0.5"), None);
        assert_eq!(parse_max_interval("inf"), None);
        assert_eq!(parse_max_interval("NaN"), None);
        assert_eq!(parse_max_interval("a year"), None);
    }
}
