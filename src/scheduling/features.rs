use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduling::types::{Item, ReviewRecord};

pub const FEATURE_DIM: usize = 8;

/// Column order of every [`FeatureVector`]. Trained models depend on it.
pub const FEATURE_LABELS: [&str; FEATURE_DIM] = [
    "memoryStrength",
    "difficultyRating",
    "timeSinceLastReviewDays",
    "successRate",
    "averageResponseTimeMs",
    "totalReviews",
    "consecutiveCorrect",
    "normalizedTimeOfDay",
];

pub const IDX_MEMORY_STRENGTH: usize = 0;
pub const IDX_DIFFICULTY: usize = 1;
pub const IDX_DAYS_SINCE_REVIEW: usize = 2;
pub const IDX_SUCCESS_RATE: usize = 3;
pub const IDX_AVG_RESPONSE_MS: usize = 4;
pub const IDX_TOTAL_REVIEWS: usize = 5;
pub const IDX_STREAK: usize = 6;
pub const IDX_TIME_OF_DAY: usize = 7;

const MS_PER_DAY: f64 = 86_400_000.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector([f64; FEATURE_DIM]);

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_DIM]) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64; FEATURE_DIM] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }

    pub fn dim(&self) -> usize {
        FEATURE_DIM
    }

    pub fn labels() -> &'static [&'static str; FEATURE_DIM] {
        &FEATURE_LABELS
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

/// Time source for everything wall-clock dependent. Pin it with `Fixed` when
/// results must be reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Self::System => Utc::now(),
            Self::Fixed(at) => *at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    clock: Clock,
}

impl FeatureExtractor {
    pub fn new(clock: Clock) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn extract(&self, item: &Item, history: &[ReviewRecord]) -> SchedulerResult<FeatureVector> {
        self.extract_at(item, history, self.clock.now())
    }

    /// `history` is the item's own review log, oldest first.
    pub fn extract_at(
        &self,
        item: &Item,
        history: &[ReviewRecord],
        now: DateTime<Utc>,
    ) -> SchedulerResult<FeatureVector> {
        if !item.memory_strength.is_finite() || !item.difficulty_rating.is_finite() {
            return Err(SchedulerError::InvalidState(format!(
                "item {} has non-finite strength or difficulty",
                item.id
            )));
        }
        if let Some(record) = history.iter().find(|r| r.timestamp > now) {
            return Err(SchedulerError::InvalidState(format!(
                "review of item {} is dated in the future ({})",
                record.item_id, record.timestamp
            )));
        }
        if let Some(record) = history.iter().find(|r| r.item_id != item.id) {
            return Err(SchedulerError::InvalidState(format!(
                "history for item {} contains a review of item {}",
                item.id, record.item_id
            )));
        }

        let days_since_review = match item.last_reviewed_at {
            Some(at) if at > now => {
                return Err(SchedulerError::InvalidState(format!(
                    "item {} was last reviewed in the future ({at})",
                    item.id
                )));
            }
            Some(at) => (now - at).num_milliseconds() as f64 / MS_PER_DAY,
            None => 0.0,
        };

        let answered = item.total_answers();
        let success_rate = if answered == 0 {
            0.0
        } else {
            f64::from(item.times_correct) / f64::from(answered)
        };

        let average_response_ms = if history.is_empty() {
            0.0
        } else {
            history.iter().map(|r| r.response_time_ms as f64).sum::<f64>() / history.len() as f64
        };

        let streak = history.iter().rev().take_while(|r| r.recalled).count();
        let time_of_day = f64::from(now.num_seconds_from_midnight()) / SECONDS_PER_DAY;

        let vector = FeatureVector([
            item.memory_strength,
            item.difficulty_rating,
            days_since_review,
            success_rate,
            average_response_ms,
            history.len() as f64,
            streak as f64,
            time_of_day,
        ]);

        if !vector.is_finite() {
            return Err(SchedulerError::InvalidState(format!(
                "non-finite features for item {}",
                item.id
            )));
        }
        Ok(vector)
    }
}
