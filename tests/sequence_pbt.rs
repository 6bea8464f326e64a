//! Property-based tests for the review chain and the baseline update.
//!
//! Invariants:
//! - Chain: after any mix of insert/remove/advance the chain from `head` is
//!   acyclic, due-ordered and holds exactly the live items
//! - Baseline: intervals stay inside [1, max], strength inside [0, 5],
//!   difficulty inside [0, 1]; a miss always resets the interval

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use danci_scheduler::config::BaselineParams;
use danci_scheduler::scheduling::baseline::BaselinePredictor;
use danci_scheduler::scheduling::sequence::ItemSequence;
use danci_scheduler::scheduling::types::{Item, ItemId, MAX_STRENGTH, MIN_STRENGTH};

// ============================================================================
// Arbitrary Generators
// ============================================================================

#[derive(Debug, Clone)]
enum ChainOp {
    Insert { due_offset_hours: i64 },
    Remove { pick: usize },
    Advance { pick: usize, interval_days: f64 },
    AdvanceHead { interval_days: f64 },
}

fn arb_chain_op() -> impl Strategy<Value = ChainOp> {
    prop_oneof![
        3 => (-48i64..=48i64).prop_map(|due_offset_hours| ChainOp::Insert { due_offset_hours }),
        1 => any::<usize>().prop_map(|pick| ChainOp::Remove { pick }),
        2 => (any::<usize>(), 0.01f64..=400.0f64)
            .prop_map(|(pick, interval_days)| ChainOp::Advance { pick, interval_days }),
        2 => (0.01f64..=400.0f64).prop_map(|interval_days| ChainOp::AdvanceHead { interval_days }),
    ]
}

fn arb_item_state() -> impl Strategy<Value = (f64, f64, f64, bool)> {
    (
        (0u64..=5000u64).prop_map(|v| v as f64 / 1000.0),  // strength
        (0u64..=1000u64).prop_map(|v| v as f64 / 1000.0),  // difficulty
        prop_oneof![Just(0.0f64), 1.0f64..=400.0f64],     // interval
        any::<bool>(),                                      // reviewed before
    )
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn chain_invariant_survives_random_ops(ops in prop::collection::vec(arb_chain_op(), 1..80)) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let params = BaselineParams::default();
        let mut seq = ItemSequence::new();
        let mut live: Vec<ItemId> = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            let now = start + Duration::minutes(step as i64);
            match op {
                ChainOp::Insert { due_offset_hours } => {
                    let mut item = Item::new("q", "a", now, &params);
                    item.due_at = now + Duration::hours(due_offset_hours);
                    live.push(item.id);
                    seq.insert(item).unwrap();
                }
                ChainOp::Remove { pick } => {
                    if live.is_empty() {
                        prop_assert!(seq.remove(&ItemId::new()).is_err());
                        continue;
                    }
                    let id = live.swap_remove(pick % live.len());
                    let removed = seq.remove(&id).unwrap();
                    prop_assert_eq!(removed.id, id);
                }
                ChainOp::Advance { pick, interval_days } => {
                    if live.is_empty() {
                        continue;
                    }
                    let id = live[pick % live.len()];
                    let item = seq.get(&id).unwrap().clone();
                    seq.advance(item, interval_days, now).unwrap();
                }
                ChainOp::AdvanceHead { interval_days } => {
                    if let Some(head) = seq.peek_due().cloned() {
                        let id = head.id;
                        seq.advance(head, interval_days, now).unwrap();
                        prop_assert!(seq.get(&id).unwrap().due_at > now);
                    }
                }
            }

            prop_assert!(seq.verify().is_ok());
            prop_assert_eq!(seq.len(), live.len());
            prop_assert_eq!(seq.iter().count(), live.len());
            prop_assert_eq!(seq.head().is_none(), live.is_empty());
        }
    }

    #[test]
    fn advance_rejects_non_positive_intervals(
        interval in prop_oneof![Just(0.0f64), -100.0f64..0.0f64],
    ) {
        let now = Utc::now();
        let mut seq = ItemSequence::new();
        let item = Item::new("q", "a", now, &BaselineParams::default());
        let id = item.id;
        seq.insert(item).unwrap();
        let copy = seq.get(&id).unwrap().clone();
        prop_assert!(seq.advance(copy, interval, now).is_err());
        prop_assert_eq!(seq.get(&id).unwrap().due_at, now);
        prop_assert!(seq.verify().is_ok());
    }

    #[test]
    fn baseline_stays_in_range(
        (strength, difficulty, interval, reviewed) in arb_item_state(),
        recalled in any::<bool>(),
        response_time_ms in 0u64..=20_000u64,
    ) {
        let now = Utc::now();
        let predictor = BaselinePredictor::default();
        let mut item = Item::new("q", "a", now, predictor.params());
        item.memory_strength = strength;
        item.difficulty_rating = difficulty;
        item.interval_days = interval;
        if reviewed {
            item.last_reviewed_at = Some(now - Duration::days(2));
        }

        let outcome = predictor.compute(&item, recalled, response_time_ms);
        prop_assert!(outcome.interval_days >= 1.0);
        prop_assert!(outcome.interval_days <= predictor.max_interval_days());
        prop_assert!(outcome.updated_strength >= MIN_STRENGTH);
        prop_assert!(outcome.updated_strength <= MAX_STRENGTH);
        prop_assert!((0.0..=1.0).contains(&outcome.updated_difficulty));
        if recalled {
            prop_assert!(outcome.updated_difficulty <= difficulty + 1e-12);
        } else {
            prop_assert_eq!(outcome.interval_days, predictor.params().reset_interval_days);
            prop_assert!(outcome.updated_difficulty >= difficulty - 1e-12);
        }
    }
}
