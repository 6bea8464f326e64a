use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::{BaselineParams, SchedulerConfig};
use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduling::comparison::{ComparisonOptions, ComparisonReport};
use crate::scheduling::features::{Clock, FeatureExtractor};
use crate::scheduling::learned::{FileModelLoader, ModelLoader, ModelRef, ModelRegistry};
use crate::scheduling::orchestrator::AlgorithmOrchestrator;
use crate::scheduling::types::{
    AlgorithmMode, AlgorithmUsed, Item, ItemId, LearnerAggregate, LearnerSettings, ReviewRecord,
};
use crate::services::store::LearnerStore;

type LearnerSlot = Arc<AsyncMutex<Option<LearnerAggregate>>>;
type LearnerGuard = OwnedMutexGuard<Option<LearnerAggregate>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub correct: bool,
    pub correct_answer: String,
    pub next_interval_days: f64,
    pub next_due_at: DateTime<Utc>,
    pub algorithm_used: AlgorithmUsed,
    pub feedback: String,
}

/// Entry point for answering reviews.
///
/// Each learner has one async mutex slot caching its aggregate. Every
/// mutation clones the cached aggregate, applies the change to the clone,
/// saves it and only then swaps it into the cache. The save and swap run in a
/// spawned task that owns the slot guard, so a caller dropping its future
/// mid-save cannot leave cache and store out of step.
pub struct ReviewProcessor<S: LearnerStore> {
    store: Arc<S>,
    orchestrator: AlgorithmOrchestrator,
    baseline_params: BaselineParams,
    default_mode: AlgorithmMode,
    learners: Mutex<HashMap<String, LearnerSlot>>,
    rng: Mutex<ChaCha8Rng>,
}

impl<S: LearnerStore> ReviewProcessor<S> {
    /// Builds a processor with a fresh model registry. When the config names
    /// a model directory and reference, that model is loaded up front; a
    /// failed load leaves the processor running on the baseline.
    pub fn new(config: &SchedulerConfig, store: Arc<S>) -> Self {
        let registry = Arc::new(ModelRegistry::new());
        if let (Some(dir), Some(name)) = (&config.model_dir, &config.model_ref) {
            let loader = FileModelLoader::new(dir.clone());
            if let Err(err) = registry.reload(&loader, &ModelRef::new(name.clone())) {
                tracing::warn!(
                    model = %name,
                    dir = %dir.display(),
                    error = %err,
                    "startup model load failed, scheduling on baseline"
                );
            }
        }
        Self::with_registry(config, store, registry, Clock::System)
    }

    pub fn with_registry(
        config: &SchedulerConfig,
        store: Arc<S>,
        registry: Arc<ModelRegistry>,
        clock: Clock,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        Self {
            store,
            orchestrator: AlgorithmOrchestrator::from_config(
                config,
                FeatureExtractor::new(clock),
                registry,
            ),
            baseline_params: config.baseline.clone(),
            default_mode: config.default_mode,
            learners: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn orchestrator(&self) -> &AlgorithmOrchestrator {
        &self.orchestrator
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        self.orchestrator.registry()
    }

    pub fn default_settings(&self) -> LearnerSettings {
        LearnerSettings::with_mode(self.default_mode)
    }

    pub async fn register_learner(
        &self,
        learner_id: &str,
        settings: LearnerSettings,
    ) -> SchedulerResult<()> {
        if learner_id.trim().is_empty() {
            return Err(SchedulerError::InvalidState(
                "learner id must not be empty".into(),
            ));
        }
        let created = self.create_learner(learner_id, settings).await;
        if created.is_err() {
            self.forget_if_vacant(learner_id);
        }
        created?;
        tracing::info!(
            learner_id,
            mode = settings.algorithm_mode.as_str(),
            "learner registered"
        );
        Ok(())
    }

    async fn create_learner(
        &self,
        learner_id: &str,
        settings: LearnerSettings,
    ) -> SchedulerResult<()> {
        let guard = self.slot(learner_id).lock_owned().await;
        let exists = guard.is_some()
            || self
                .store
                .load_learner_aggregate(learner_id)
                .await?
                .is_some();
        if exists {
            return Err(SchedulerError::Conflict(format!(
                "learner {learner_id} already exists"
            )));
        }
        let aggregate = LearnerAggregate::new(learner_id, settings);
        self.commit(learner_id, guard, aggregate).await
    }

    /// Answers the learner's head item. Any error leaves the learner exactly
    /// as it was: no interval change and no review record.
    pub async fn submit_answer(
        &self,
        learner_id: &str,
        item_id: ItemId,
        answer: &str,
        response_time_ms: u64,
    ) -> SchedulerResult<SubmitOutcome> {
        let guard = self.lock_loaded(learner_id).await?;
        let current = loaded(&guard, learner_id)?;

        let item = current.sequence.get(&item_id).ok_or_else(|| {
            SchedulerError::NotFound(format!("item {item_id} for learner {learner_id}"))
        })?;
        if current.sequence.head() != Some(item_id) {
            return Err(SchedulerError::Conflict(format!(
                "item {item_id} is not the next due item for learner {learner_id}"
            )));
        }

        let recalled = answers_match(answer, &item.answer);
        let extractor = self.orchestrator.extractor();
        let now = extractor.clock().now();
        let features = extractor.extract_at(item, current.history_for(&item_id), now)?;
        let mut rng = self.review_rng();
        let resolution = self
            .orchestrator
            .resolve_with_features(
                item,
                &features,
                &current.settings,
                recalled,
                response_time_ms,
                &mut rng,
            )
            .await?;

        let mut reviewed = item.clone();
        let mut working = current.clone();

        reviewed.memory_strength = resolution.baseline.updated_strength;
        reviewed.difficulty_rating = resolution.baseline.updated_difficulty;
        if recalled {
            reviewed.times_correct = reviewed.times_correct.saturating_add(1);
        } else {
            reviewed.times_incorrect = reviewed.times_incorrect.saturating_add(1);
        }
        reviewed.last_reviewed_at = Some(now);
        reviewed.interval_days = resolution.applied_interval;
        let correct_answer = reviewed.answer.clone();

        working
            .history
            .entry(item_id)
            .or_default()
            .push(ReviewRecord {
                item_id,
                timestamp: now,
                recalled,
                response_time_ms,
                interval_used: resolution.applied_interval,
                algorithm_used: resolution.algorithm_used,
                baseline_interval: resolution.baseline_interval,
                learned_interval: resolution.learned_interval,
            });
        working
            .sequence
            .advance(reviewed, resolution.applied_interval, now)?;
        let next_due_at = working
            .sequence
            .get(&item_id)
            .map(|i| i.due_at)
            .ok_or_else(|| {
                SchedulerError::InvalidState(format!("item {item_id} lost on advance"))
            })?;

        self.commit(learner_id, guard, working).await?;

        tracing::debug!(
            learner_id,
            item_id = %item_id,
            recalled,
            algorithm = resolution.algorithm_used.as_str(),
            interval_days = resolution.applied_interval,
            "review applied"
        );

        Ok(SubmitOutcome {
            correct: recalled,
            feedback: feedback_text(recalled, &correct_answer, resolution.applied_interval),
            correct_answer,
            next_interval_days: resolution.applied_interval,
            next_due_at,
            algorithm_used: resolution.algorithm_used,
        })
    }

    /// The item that surfaces next, due or not. `None` when the learner has
    /// no items. Never mutates.
    pub async fn peek_due(&self, learner_id: &str) -> SchedulerResult<Option<Item>> {
        let guard = self.lock_loaded(learner_id).await?;
        let current = loaded(&guard, learner_id)?;
        Ok(current.sequence.peek_due().cloned())
    }

    pub async fn set_algorithm_mode(
        &self,
        learner_id: &str,
        mode: AlgorithmMode,
    ) -> SchedulerResult<LearnerSettings> {
        let guard = self.lock_loaded(learner_id).await?;
        let current = loaded(&guard, learner_id)?;
        if current.settings.algorithm_mode == mode {
            return Ok(current.settings);
        }
        let mut working = current.clone();
        working.settings.algorithm_mode = mode;
        let settings = working.settings;
        self.commit(learner_id, guard, working).await?;
        tracing::info!(learner_id, mode = mode.as_str(), "algorithm mode changed");
        Ok(settings)
    }

    pub async fn add_item(
        &self,
        learner_id: &str,
        prompt: &str,
        answer: &str,
    ) -> SchedulerResult<ItemId> {
        if normalize_answer(answer).is_empty() {
            return Err(SchedulerError::InvalidState(
                "item answer must not be blank".into(),
            ));
        }
        let guard = self.lock_loaded(learner_id).await?;
        let current = loaded(&guard, learner_id)?;
        let now = self.orchestrator.extractor().clock().now();
        let item = Item::new(prompt, answer, now, &self.baseline_params);
        let id = item.id;

        let mut working = current.clone();
        working.sequence.insert(item)?;
        self.commit(learner_id, guard, working).await?;
        Ok(id)
    }

    /// Review history of a removed item is kept.
    pub async fn remove_item(&self, learner_id: &str, item_id: ItemId) -> SchedulerResult<Item> {
        let guard = self.lock_loaded(learner_id).await?;
        let current = loaded(&guard, learner_id)?;
        let mut working = current.clone();
        let removed = working.sequence.remove(&item_id)?;
        self.commit(learner_id, guard, working).await?;
        Ok(removed)
    }

    pub async fn settings(&self, learner_id: &str) -> SchedulerResult<LearnerSettings> {
        let guard = self.lock_loaded(learner_id).await?;
        let current = loaded(&guard, learner_id)?;
        Ok(current.settings)
    }

    pub async fn history(
        &self,
        learner_id: &str,
        item_id: ItemId,
    ) -> SchedulerResult<Vec<ReviewRecord>> {
        let guard = self.lock_loaded(learner_id).await?;
        let current = loaded(&guard, learner_id)?;
        if !current.sequence.contains(&item_id) && !current.history.contains_key(&item_id) {
            return Err(SchedulerError::NotFound(format!(
                "item {item_id} for learner {learner_id}"
            )));
        }
        Ok(current.history_for(&item_id).to_vec())
    }

    pub async fn comparison_report(
        &self,
        learner_id: &str,
        options: ComparisonOptions,
    ) -> SchedulerResult<ComparisonReport> {
        let guard = self.lock_loaded(learner_id).await?;
        let current = loaded(&guard, learner_id)?;
        Ok(ComparisonReport::from_history(
            current.history.values().map(Vec::as_slice),
            options,
        ))
    }

    pub fn reload_model(
        &self,
        loader: &dyn ModelLoader,
        model_ref: &ModelRef,
    ) -> SchedulerResult<()> {
        self.orchestrator.registry().reload(loader, model_ref)
    }

    /// Drops the cached aggregate; the next call reloads it from the store.
    /// The learner's slot is released too unless another call is using it.
    pub async fn evict(&self, learner_id: &str) {
        let slot = self.learners.lock().get(learner_id).cloned();
        if let Some(slot) = slot {
            *slot.lock().await = None;
            drop(slot);
            self.forget_if_vacant(learner_id);
        }
    }

    /// Number of learner slots currently held in memory.
    pub fn cached_learners(&self) -> usize {
        self.learners.lock().len()
    }

    fn slot(&self, learner_id: &str) -> LearnerSlot {
        let mut learners = self.learners.lock();
        Arc::clone(
            learners
                .entry(learner_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(None))),
        )
    }

    fn review_rng(&self) -> ChaCha8Rng {
        let mut master = self.rng.lock();
        ChaCha8Rng::from_rng(&mut *master)
    }

    /// Removes the learner's slot when nothing but the map holds it and it
    /// caches nothing. Slots are only cloned under the map lock, so a strong
    /// count of one means no caller can be waiting on it.
    fn forget_if_vacant(&self, learner_id: &str) {
        let mut learners = self.learners.lock();
        let vacant = learners.get(learner_id).is_some_and(|slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|cached| cached.is_none())
        });
        if vacant {
            learners.remove(learner_id);
        }
    }

    /// Locks the learner's slot with its aggregate loaded and verified. On
    /// failure the guard is released and a slot left empty is dropped, so
    /// lookups of unknown learners do not accumulate slots.
    async fn lock_loaded(&self, learner_id: &str) -> SchedulerResult<LearnerGuard> {
        let mut guard = self.slot(learner_id).lock_owned().await;
        if guard.is_some() {
            return Ok(guard);
        }
        match self.load_verified(learner_id).await {
            Ok(aggregate) => {
                *guard = Some(aggregate);
                Ok(guard)
            }
            Err(err) => {
                drop(guard);
                self.forget_if_vacant(learner_id);
                Err(err)
            }
        }
    }

    async fn load_verified(&self, learner_id: &str) -> SchedulerResult<LearnerAggregate> {
        let aggregate = self
            .store
            .load_learner_aggregate(learner_id)
            .await
            .map_err(SchedulerError::into_persistence)?
            .ok_or_else(|| SchedulerError::NotFound(format!("learner {learner_id}")))?;
        if let Err(err) = aggregate.sequence.verify() {
            tracing::error!(learner_id, error = %err, "stored review chain is inconsistent");
            return Err(err);
        }
        Ok(aggregate)
    }

    async fn commit(
        &self,
        learner_id: &str,
        mut guard: LearnerGuard,
        working: LearnerAggregate,
    ) -> SchedulerResult<()> {
        let store = Arc::clone(&self.store);
        let owner = learner_id.to_string();
        let task = tokio::spawn(async move {
            match store.save_learner_aggregate(&owner, &working).await {
                Ok(()) => {
                    *guard = Some(working);
                    Ok(())
                }
                Err(err) => {
                    let err = err.into_persistence();
                    tracing::error!(
                        learner_id = %owner,
                        error = %err,
                        "failed to save learner aggregate"
                    );
                    Err(err)
                }
            }
        });
        task.await.map_err(|e| {
            SchedulerError::PersistenceFailure(format!("save task for {learner_id} failed: {e}"))
        })?
    }
}

fn loaded<'a>(guard: &'a LearnerGuard, learner_id: &str) -> SchedulerResult<&'a LearnerAggregate> {
    guard
        .as_ref()
        .ok_or_else(|| SchedulerError::NotFound(format!("learner {learner_id}")))
}

fn normalize_answer(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whitespace and case insensitive. A blank stored answer never matches.
pub fn answers_match(submitted: &str, expected: &str) -> bool {
    let expected = normalize_answer(expected);
    !expected.is_empty() && normalize_answer(submitted) == expected
}

fn describe_interval(days: f64) -> String {
    let rounded = (days * 10.0).round() / 10.0;
    if rounded == 1.0 {
        "1 day".to_string()
    } else if rounded.fract() == 0.0 {
        format!("{rounded:.0} days")
    } else {
        format!("{rounded:.1} days")
    }
}

fn feedback_text(correct: bool, expected: &str, interval_days: f64) -> String {
    let next = describe_interval(interval_days);
    if correct {
        format!("Correct. Next review in {next}.")
    } else {
        format!("Not quite, the answer is \"{expected}\". Next review in {next}.")
    }
}
