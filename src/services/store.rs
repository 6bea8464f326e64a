use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduling::types::LearnerAggregate;

/// Persistence collaborator. Both calls are atomic from the scheduler's point
/// of view: a save either fully lands or reports failure.
pub trait LearnerStore: Send + Sync + 'static {
    /// `Ok(None)` when the learner is unknown.
    fn load_learner_aggregate(
        &self,
        learner_id: &str,
    ) -> impl Future<Output = SchedulerResult<Option<LearnerAggregate>>> + Send;

    fn save_learner_aggregate(
        &self,
        learner_id: &str,
        aggregate: &LearnerAggregate,
    ) -> impl Future<Output = SchedulerResult<()>> + Send;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    learners: Mutex<HashMap<String, LearnerAggregate>>,
    fail_next: AtomicUsize,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` saves report failure without storing anything.
    pub fn fail_next_saves(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn snapshot(&self, learner_id: &str) -> Option<LearnerAggregate> {
        self.learners.lock().get(learner_id).cloned()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl LearnerStore for MemoryStore {
    async fn load_learner_aggregate(
        &self,
        learner_id: &str,
    ) -> SchedulerResult<Option<LearnerAggregate>> {
        Ok(self.snapshot(learner_id))
    }

    async fn save_learner_aggregate(
        &self,
        learner_id: &str,
        aggregate: &LearnerAggregate,
    ) -> SchedulerResult<()> {
        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SchedulerError::PersistenceFailure(format!(
                "injected save failure for learner {learner_id}"
            )));
        }
        self.learners
            .lock()
            .insert(learner_id.to_string(), aggregate.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One JSON document per learner. Writes go to a temp file that is renamed
/// over the previous version.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, learner_id: &str) -> SchedulerResult<PathBuf> {
        let valid = !learner_id.is_empty()
            && learner_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SchedulerError::PersistenceFailure(format!(
                "learner id {learner_id:?} cannot be used as a file name"
            )));
        }
        Ok(self.dir.join(format!("{learner_id}.json")))
    }
}

impl LearnerStore for JsonFileStore {
    async fn load_learner_aggregate(
        &self,
        learner_id: &str,
    ) -> SchedulerResult<Option<LearnerAggregate>> {
        let path = self.path_for(learner_id)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SchedulerError::from(e).into_persistence()),
        };
        let aggregate: LearnerAggregate = serde_json::from_slice(&raw)
            .map_err(|e| SchedulerError::from(e).into_persistence())?;
        Ok(Some(aggregate))
    }

    async fn save_learner_aggregate(
        &self,
        learner_id: &str,
        aggregate: &LearnerAggregate,
    ) -> SchedulerResult<()> {
        let path = self.path_for(learner_id)?;
        let tmp = path.with_extension("json.tmp");
        let write = async {
            let body = serde_json::to_vec_pretty(aggregate)?;
            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&tmp, body).await?;
            tokio::fs::rename(&tmp, &path).await?;
            Ok::<(), SchedulerError>(())
        };
        write.await.map_err(SchedulerError::into_persistence)
    }
}
