//! Post-hoc evaluation of paired baseline/learned predictions.
//!
//! A review counts for the arm whose interval it applied, and its outcome is
//! whether the *next* review of the same item was recalled. Only records that
//! carry both predictions are considered.

use serde::{Deserialize, Serialize};

use crate::scheduling::types::{AlgorithmUsed, ReviewRecord};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonOptions {
    pub significance_level: f64,
    pub min_samples: u64,
}

impl Default for ComparisonOptions {
    fn default() -> Self {
        Self {
            significance_level: 0.05,
            min_samples: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmStats {
    pub algorithm: AlgorithmUsed,
    pub reviews: u64,
    /// Reviews that already have a follow-up review.
    pub outcomes: u64,
    pub recalled_next: u64,
    pub recall_rate: f64,
    pub mean_applied_interval: f64,
    pub mean_prediction_gap: f64,
}

impl ArmStats {
    fn empty(algorithm: AlgorithmUsed) -> Self {
        Self {
            algorithm,
            reviews: 0,
            outcomes: 0,
            recalled_next: 0,
            recall_rate: 0.0,
            mean_applied_interval: 0.0,
            mean_prediction_gap: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub baseline: ArmStats,
    pub learned: ArmStats,
    pub z_score: Option<f64>,
    pub p_value: Option<f64>,
    pub recommendation: Option<AlgorithmUsed>,
}

#[derive(Default)]
struct Accumulator {
    reviews: u64,
    outcomes: u64,
    recalled_next: u64,
    interval_sum: f64,
    gap_sum: f64,
}

impl Accumulator {
    fn finish(self, algorithm: AlgorithmUsed) -> ArmStats {
        if self.reviews == 0 {
            return ArmStats::empty(algorithm);
        }
        ArmStats {
            algorithm,
            reviews: self.reviews,
            outcomes: self.outcomes,
            recalled_next: self.recalled_next,
            recall_rate: if self.outcomes == 0 {
                0.0
            } else {
                self.recalled_next as f64 / self.outcomes as f64
            },
            mean_applied_interval: self.interval_sum / self.reviews as f64,
            mean_prediction_gap: self.gap_sum / self.reviews as f64,
        }
    }
}

impl ComparisonReport {
    /// `histories` yields one chronological review log per item.
    pub fn from_history<'a, I>(histories: I, options: ComparisonOptions) -> Self
    where
        I: IntoIterator<Item = &'a [ReviewRecord]>,
    {
        let mut baseline = Accumulator::default();
        let mut learned = Accumulator::default();

        for history in histories {
            for (i, record) in history.iter().enumerate() {
                let Some(learned_interval) = record.learned_interval else {
                    continue;
                };
                let acc = match record.algorithm_used {
                    AlgorithmUsed::Baseline => &mut baseline,
                    AlgorithmUsed::Learned => &mut learned,
                };
                acc.reviews += 1;
                acc.interval_sum += record.interval_used;
                acc.gap_sum += (learned_interval - record.baseline_interval).abs();
                if let Some(next) = history.get(i + 1) {
                    acc.outcomes += 1;
                    if next.recalled {
                        acc.recalled_next += 1;
                    }
                }
            }
        }

        let baseline = baseline.finish(AlgorithmUsed::Baseline);
        let learned = learned.finish(AlgorithmUsed::Learned);
        let z_score = two_proportion_z(&baseline, &learned);
        let p_value = z_score.map(|z| 2.0 * (1.0 - standard_normal_cdf(z.abs())));

        let enough =
            baseline.outcomes >= options.min_samples && learned.outcomes >= options.min_samples;
        let recommendation = match (z_score, p_value) {
            (Some(z), Some(p)) if enough && p < options.significance_level => {
                Some(if z > 0.0 {
                    AlgorithmUsed::Learned
                } else {
                    AlgorithmUsed::Baseline
                })
            }
            _ => None,
        };

        Self {
            baseline,
            learned,
            z_score,
            p_value,
            recommendation,
        }
    }
}

/// Positive when the learned arm recalls more often.
fn two_proportion_z(baseline: &ArmStats, learned: &ArmStats) -> Option<f64> {
    if baseline.outcomes == 0 || learned.outcomes == 0 {
        return None;
    }
    let n1 = baseline.outcomes as f64;
    let n2 = learned.outcomes as f64;
    let pooled = (baseline.recalled_next + learned.recalled_next) as f64 / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if se < 1e-12 {
        return None;
    }
    Some((learned.recall_rate - baseline.recall_rate) / se)
}

pub fn standard_normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

// Abramowitz & Stegun 7.1.26, |error| < 1.5e-7
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736
                + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::types::ItemId;
    use chrono::{Duration, Utc};

    fn paired(item: ItemId, used: AlgorithmUsed, recalled: bool, day: i64) -> ReviewRecord {
        let (baseline, learned) = (2.0, 5.0);
        ReviewRecord {
            item_id: item,
            timestamp: Utc::now() - Duration::days(100 - day),
            recalled,
            response_time_ms: 1500,
            interval_used: if used == AlgorithmUsed::Learned { learned } else { baseline },
            algorithm_used: used,
            baseline_interval: baseline,
            learned_interval: Some(learned),
        }
    }

    /// Alternates arms starting with baseline; each flag is whether reviews
    /// scheduled by that arm are recalled next time.
    fn build_history(
        item: ItemId,
        rounds: usize,
        learned_hit: bool,
        baseline_hit: bool,
    ) -> Vec<ReviewRecord> {
        let mut out = Vec::new();
        for i in 0..rounds {
            let used = if i % 2 == 0 {
                AlgorithmUsed::Baseline
            } else {
                AlgorithmUsed::Learned
            };
            // recalled flag describes the outcome of the previous review
            let recalled = match (i, used) {
                (0, _) => true,
                (_, AlgorithmUsed::Learned) => baseline_hit,
                (_, AlgorithmUsed::Baseline) => learned_hit,
            };
            out.push(paired(item, used, recalled, i as i64));
        }
        out
    }

    #[test]
    fn test_cdf_reference_points() {
        assert!((standard_normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((standard_normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((standard_normal_cdf(-1.96) - 0.025).abs() < 1e-3);
    }

    #[test]
    fn test_empty_history() {
        let none: Vec<&[ReviewRecord]> = Vec::new();
        let report = ComparisonReport::from_history(none, ComparisonOptions::default());
        assert_eq!(report.baseline.reviews, 0);
        assert!(report.z_score.is_none());
        assert!(report.recommendation.is_none());
    }

    #[test]
    fn test_unpaired_records_are_ignored() {
        let item = ItemId::new();
        let mut record = paired(item, AlgorithmUsed::Baseline, true, 0);
        record.learned_interval = None;
        let history = vec![record];
        let report =
            ComparisonReport::from_history([history.as_slice()], ComparisonOptions::default());
        assert_eq!(report.baseline.reviews, 0);
    }

    #[test]
    fn test_learned_arm_recommended_when_clearly_better() {
        let histories: Vec<Vec<ReviewRecord>> = (0..40)
            .map(|_| build_history(ItemId::new(), 4, true, false))
            .collect();
        let report = ComparisonReport::from_history(
            histories.iter().map(Vec::as_slice),
            ComparisonOptions::default(),
        );

        // rounds 0 and 2 are baseline, 1 and 3 learned; last has no outcome
        assert_eq!(report.baseline.reviews, 80);
        assert_eq!(report.learned.reviews, 80);
        assert_eq!(report.baseline.outcomes, 80);
        assert_eq!(report.learned.outcomes, 40);
        assert_eq!(report.learned.recall_rate, 1.0);
        assert_eq!(report.baseline.recall_rate, 0.0);
        assert_eq!(report.learned.mean_applied_interval, 5.0);
        assert_eq!(report.baseline.mean_prediction_gap, 3.0);
        assert!(report.z_score.unwrap() > 0.0);
        assert!(report.p_value.unwrap() < 0.05);
        assert_eq!(report.recommendation, Some(AlgorithmUsed::Learned));
    }

    #[test]
    fn test_small_samples_get_no_recommendation() {
        let histories: Vec<Vec<ReviewRecord>> = (0..3)
            .map(|_| build_history(ItemId::new(), 4, true, false))
            .collect();
        let report = ComparisonReport::from_history(
            histories.iter().map(Vec::as_slice),
            ComparisonOptions::default(),
        );
        assert!(report.recommendation.is_none());
    }
}
