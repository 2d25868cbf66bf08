use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use crate::{
    error::Result,
    types::{FinishReason, WorkoutLogEntry, WorkoutSet},
};

/// External store for finished sessions
#[async_trait]
pub trait PersistenceService: Send + Sync + 'static {
    /// Store one log entry
    async fn submit(&self, entry: WorkoutLogEntry) -> Result<()>;
}

/// Keeps submitted entries in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryPersistence {
    entries: Arc<Mutex<Vec<WorkoutLogEntry>>>,
}

impl InMemoryPersistence {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries submitted so far
    pub async fn entries(&self) -> Vec<WorkoutLogEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl PersistenceService for InMemoryPersistence {
    async fn submit(&self, entry: WorkoutLogEntry) -> Result<()> {
        self.entries.lock().await.push(entry);
        Ok(())
    }
}

/// Outcome of the background submission, posted back to the engine
#[derive(Debug)]
pub struct SubmissionResult {
    /// Entry that was submitted
    pub entry: WorkoutLogEntry,
    /// Persistence outcome
    pub result: Result<()>,
}

/// Aggregate completed sets into a log entry
#[must_use]
pub fn summarize(exercise_name: &str, sets: &[WorkoutSet]) -> WorkoutLogEntry {
    let completed = || sets.iter().filter(|s| s.completed);

    WorkoutLogEntry {
        exercise_name: exercise_name.to_string(),
        sets_completed: u32::try_from(completed().count()).unwrap_or(u32::MAX),
        reps_completed: completed().map(|s| s.actual_reps).sum(),
        weight_used: completed().next().map(|s| s.actual_weight),
    }
}

/// Builds the log entry once and submits it without blocking the engine
pub struct CompletionGateway<E> {
    persistence: Arc<dyn PersistenceService>,
    results: mpsc::UnboundedSender<E>,
    finalized: bool,
}

impl<E> CompletionGateway<E>
where
    E: From<SubmissionResult> + Send + 'static,
{
    /// Gateway submitting to `persistence`, reporting into `results`
    #[must_use]
    pub fn new(persistence: Arc<dyn PersistenceService>, results: mpsc::UnboundedSender<E>) -> Self {
        Self {
            persistence,
            results,
            finalized: false,
        }
    }

    /// The session has already been finalized
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Summarize and submit exactly once. Later calls return `None`.
    pub fn finalize(
        &mut self,
        exercise_name: &str,
        sets: &[WorkoutSet],
        reason: FinishReason,
    ) -> Option<WorkoutLogEntry> {
        if self.finalized {
            return None;
        }
        self.finalized = true;

        let entry = summarize(exercise_name, sets);
        info!(
            "Finalizing '{}' ({:?}): {} sets, {} reps",
            entry.exercise_name, reason, entry.sets_completed, entry.reps_completed
        );

        let persistence = Arc::clone(&self.persistence);
        let results = self.results.clone();
        let submitted = entry.clone();
        tokio::spawn(async move {
            let result = persistence.submit(submitted.clone()).await;
            if let Err(e) = &result {
                error!("Failed to save '{}': {}", submitted.exercise_name, e);
            }
            let _ = results.send(E::from(SubmissionResult {
                entry: submitted,
                result,
            }));
        });

        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::WorkoutError, types::ExercisePlan};

    struct Unavailable;

    #[async_trait]
    impl PersistenceService for Unavailable {
        async fn submit(&self, _entry: WorkoutLogEntry) -> Result<()> {
            Err(WorkoutError::Persistence("backend unavailable".to_string()))
        }
    }

    fn sets_with(completed: &[(u32, f64)], total: usize) -> Vec<WorkoutSet> {
        let mut sets = ExercisePlan::uniform("Squat", total, 10, 60.0, 90).to_sets();
        for (set, (reps, weight)) in sets.iter_mut().zip(completed) {
            set.complete(*reps, *weight);
        }
        sets
    }

    #[test]
    fn test_summary_counts_completed_sets_only() {
        let sets = sets_with(&[(10, 60.0), (8, 62.5)], 3);
        let entry = summarize("Squat", &sets);

        assert_eq!(entry.exercise_name, "Squat");
        assert_eq!(entry.sets_completed, 2);
        assert_eq!(entry.reps_completed, 18);
        assert_eq!(entry.weight_used, Some(60.0));
    }

    #[test]
    fn test_summary_without_completed_sets() {
        let entry = summarize("Squat", &sets_with(&[], 3));
        assert_eq!(entry.sets_completed, 0);
        assert_eq!(entry.reps_completed, 0);
        assert!(entry.weight_used.is_none());
    }

    #[tokio::test]
    async fn test_finalize_twice_submits_once() {
        let store = InMemoryPersistence::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<SubmissionResult>();
        let mut gateway = CompletionGateway::new(Arc::new(store.clone()), tx);
        let sets = sets_with(&[(10, 60.0)], 3);

        assert!(gateway
            .finalize("Squat", &sets, FinishReason::Early)
            .is_some());
        assert!(gateway
            .finalize("Squat", &sets, FinishReason::Normal)
            .is_none());
        assert!(gateway.is_finalized());

        let outcome = rx.recv().await.unwrap();
        assert!(outcome.result.is_ok());
        assert_eq!(store.entries().await.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_raised() {
        let (tx, mut rx) = mpsc::unbounded_channel::<SubmissionResult>();
        let mut gateway = CompletionGateway::new(Arc::new(Unavailable), tx);

        let entry = gateway
            .finalize("Bench", &sets_with(&[(5, 80.0)], 1), FinishReason::Normal)
            .unwrap();

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.entry, entry);
        assert!(matches!(outcome.result, Err(WorkoutError::Persistence(_))));
    }
}
