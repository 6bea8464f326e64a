use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BaselineParams;
use crate::scheduling::sequence::ItemSequence;

pub const MIN_STRENGTH: f64 = 0.0;
pub const MAX_STRENGTH: f64 = 5.0;
pub const MIN_INTERVAL_DAYS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub prompt: String,
    pub answer: String,
    pub memory_strength: f64,
    pub difficulty_rating: f64,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub times_correct: u32,
    pub times_incorrect: u32,
    /// Last applied interval; zero until the first review.
    pub interval_days: f64,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "nextIndex")]
    pub(crate) next: Option<ItemId>,
}

impl Item {
    pub fn new(
        prompt: impl Into<String>,
        answer: impl Into<String>,
        now: DateTime<Utc>,
        params: &BaselineParams,
    ) -> Self {
        Self {
            id: ItemId::new(),
            prompt: prompt.into(),
            answer: answer.into(),
            memory_strength: params.initial_strength.clamp(MIN_STRENGTH, MAX_STRENGTH),
            difficulty_rating: params.initial_difficulty.clamp(0.0, 1.0),
            last_reviewed_at: None,
            times_correct: 0,
            times_incorrect: 0,
            interval_days: 0.0,
            due_at: now,
            created_at: now,
            next: None,
        }
    }

    /// Following item in the chain, `None` at the end.
    pub fn next(&self) -> Option<ItemId> {
        self.next
    }

    pub fn is_new(&self) -> bool {
        self.last_reviewed_at.is_none()
    }

    pub fn total_answers(&self) -> u32 {
        self.times_correct + self.times_incorrect
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum AlgorithmMode {
    #[default]
    Baseline,
    Learned,
    Comparison,
}

impl AlgorithmMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Learned => "learned",
            Self::Comparison => "comparison",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "baseline" => Some(Self::Baseline),
            "learned" => Some(Self::Learned),
            "comparison" | "ab" => Some(Self::Comparison),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmUsed {
    Baseline,
    Learned,
}

impl AlgorithmUsed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Learned => "learned",
        }
    }
}

impl fmt::Display for AlgorithmUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One answered review. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub item_id: ItemId,
    pub timestamp: DateTime<Utc>,
    pub recalled: bool,
    pub response_time_ms: u64,
    pub interval_used: f64,
    pub algorithm_used: AlgorithmUsed,
    pub baseline_interval: f64,
    pub learned_interval: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerSettings {
    pub algorithm_mode: AlgorithmMode,
}

impl LearnerSettings {
    pub fn with_mode(algorithm_mode: AlgorithmMode) -> Self {
        Self { algorithm_mode }
    }
}

/// Everything owned by one learner: items, their chain order, review history
/// and settings. Persisted and replaced as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerAggregate {
    pub learner_id: String,
    pub sequence: ItemSequence,
    #[serde(default)]
    pub history: BTreeMap<ItemId, Vec<ReviewRecord>>,
    #[serde(default)]
    pub settings: LearnerSettings,
}

impl LearnerAggregate {
    pub fn new(learner_id: impl Into<String>, settings: LearnerSettings) -> Self {
        Self {
            learner_id: learner_id.into(),
            sequence: ItemSequence::new(),
            history: BTreeMap::new(),
            settings,
        }
    }

    pub fn history_for(&self, item_id: &ItemId) -> &[ReviewRecord] {
        self.history
            .get(item_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all_records(&self) -> impl Iterator<Item = &ReviewRecord> {
        self.history.values().flatten()
    }
}
