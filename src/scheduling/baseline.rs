use serde::{Deserialize, Serialize};

use crate::config::{BaselineParams, DEFAULT_MAX_INTERVAL_DAYS, MAX_INTERVAL_CEILING_DAYS};
use crate::scheduling::types::{Item, MAX_STRENGTH, MIN_INTERVAL_DAYS, MIN_STRENGTH};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineOutcome {
    pub interval_days: f64,
    pub updated_strength: f64,
    pub updated_difficulty: f64,
}

/// SM-2 style strength/interval update. Pure: the same item, outcome and
/// response time always give the same result.
#[derive(Debug, Clone)]
pub struct BaselinePredictor {
    params: BaselineParams,
    max_interval_days: f64,
}

impl Default for BaselinePredictor {
    fn default() -> Self {
        Self::new(BaselineParams::default(), DEFAULT_MAX_INTERVAL_DAYS)
    }
}

impl BaselinePredictor {
    /// The cap is forced into `[1, MAX_INTERVAL_CEILING_DAYS]`; a non-finite
    /// cap falls back to the default.
    pub fn new(params: BaselineParams, max_interval_days: f64) -> Self {
        Self {
            params,
            max_interval_days: finite_or(max_interval_days, DEFAULT_MAX_INTERVAL_DAYS)
                .clamp(MIN_INTERVAL_DAYS, MAX_INTERVAL_CEILING_DAYS),
        }
    }

    pub fn params(&self) -> &BaselineParams {
        &self.params
    }

    pub fn max_interval_days(&self) -> f64 {
        self.max_interval_days
    }

    pub fn compute(&self, item: &Item, recalled: bool, response_time_ms: u64) -> BaselineOutcome {
        let p = &self.params;
        let strength = finite_or(item.memory_strength, p.initial_strength)
            .clamp(MIN_STRENGTH, MAX_STRENGTH);
        let difficulty = finite_or(item.difficulty_rating, p.initial_difficulty).clamp(0.0, 1.0);

        if !recalled {
            let updated_strength = if strength > p.strength_floor {
                p.strength_floor + (strength - p.strength_floor) * p.lapse_carry
            } else {
                strength
            };
            return BaselineOutcome {
                interval_days: self.clamp_interval(p.reset_interval_days),
                updated_strength: updated_strength.clamp(MIN_STRENGTH, MAX_STRENGTH),
                updated_difficulty: (difficulty + p.difficulty_up).clamp(0.0, 1.0),
            };
        }

        let gain = (p.min_gain + p.base_gain * (1.0 - difficulty))
            * self.speed_factor(response_time_ms);
        let updated_strength = (strength + gain).clamp(MIN_STRENGTH, MAX_STRENGTH);

        let unscheduled = !item.interval_days.is_finite() || item.interval_days <= 0.0;
        let previous = if item.is_new() || unscheduled {
            p.seed_interval_days
        } else {
            item.interval_days.max(p.seed_interval_days)
        };
        let ease = p.min_ease + p.ease_per_strength * updated_strength;

        BaselineOutcome {
            interval_days: self.clamp_interval(previous * ease),
            updated_strength,
            updated_difficulty: (difficulty - p.difficulty_down).clamp(0.0, 1.0),
        }
    }

    pub fn clamp_interval(&self, days: f64) -> f64 {
        finite_or(days, MIN_INTERVAL_DAYS).clamp(MIN_INTERVAL_DAYS, self.max_interval_days)
    }

    fn speed_factor(&self, response_time_ms: u64) -> f64 {
        let rt = response_time_ms.min(i64::MAX as u64) as i64;
        if rt < self.params.fast_response_ms {
            1.1
        } else if rt < self.params.slow_response_ms {
            1.0
        } else {
            0.85
        }
    }
}

/// Baseline with default parameters and the default interval ceiling.
pub fn compute_baseline(item: &Item, recalled: bool, response_time_ms: u64) -> BaselineOutcome {
    BaselinePredictor::default().compute(item, recalled, response_time_ms)
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
