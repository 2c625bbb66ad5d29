use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use scrumai_standups::{
    LedgerMutation, LookbackWindow, RollingTask, Standup, decide_mutation, rolling_candidates,
};

use crate::store::{RollingTaskStore, StandupStore, StoreError};

/// Result of applying detection to the ledger for one standup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionOutcome {
    pub created: Vec<RollingTask>,
    pub updated: Vec<RollingTask>,
    /// Descriptions whose lookup or write failed.
    pub failed: Vec<String>,
}

impl DetectionOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn rolling_count(&self) -> usize {
        self.created.len() + self.updated.len()
    }
}

/// Runs the pure detection rules against the stores.
#[derive(Clone)]
pub struct RollingTaskDetector {
    standups: Arc<dyn StandupStore>,
    tasks: Arc<dyn RollingTaskStore>,
    lookback_days: u32,
}

impl RollingTaskDetector {
    pub fn new(
        standups: Arc<dyn StandupStore>,
        tasks: Arc<dyn RollingTaskStore>,
        lookback_days: u32,
    ) -> Self {
        Self {
            standups,
            tasks,
            lookback_days,
        }
    }

    /// Detect rolling tasks in `standup` and apply them to the ledger.
    ///
    /// Fails only when the history cannot be read. A failure on one task is
    /// logged and recorded in the outcome; the remaining tasks still run.
    #[instrument(skip(self, standup), fields(standup_id = %standup.id, user_id = %standup.user_id))]
    pub async fn detect(&self, standup: &Standup) -> Result<DetectionOutcome, StoreError> {
        let window = LookbackWindow::before(standup.date, self.lookback_days);
        let history = self
            .standups
            .list_by_user(standup.user_id, window.from, window.to)
            .await?;

        let candidates = rolling_candidates(standup, &history, self.lookback_days);
        debug!(
            history = history.len(),
            candidates = candidates.len(),
            "rolling candidates computed"
        );

        let mut outcome = DetectionOutcome::default();
        for candidate in candidates {
            let description = candidate.description.as_str();
            let existing = match self
                .tasks
                .get_active_by_description(standup.user_id, description)
                .await
            {
                Ok(existing) => existing,
                Err(error) => {
                    warn!(task = description, %error, "rolling task lookup failed");
                    outcome.failed.push(description.to_string());
                    continue;
                }
            };

            let now = Utc::now();
            match decide_mutation(&candidate, existing.as_ref(), standup, now) {
                LedgerMutation::Create(task) => match self.tasks.create(&task).await {
                    Ok(stored) => outcome.created.push(stored),
                    Err(error) => {
                        warn!(task = description, %error, "rolling task create failed");
                        outcome.failed.push(description.to_string());
                    }
                },
                LedgerMutation::Mention { id, date } => {
                    match self.tasks.record_mention(id, date, now).await {
                        Ok(bumped) => outcome.updated.push(bumped),
                        Err(error) => {
                            warn!(task = description, %error, "rolling task update failed");
                            outcome.failed.push(description.to_string());
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate};
    use tokio::sync::Barrier;

    use scrumai_core::{RollingTaskId, TeamId, UserId};

    use crate::store::InMemoryStore;
    use crate::testing::{FlakyStore, date, standup_on};

    /// Ledger whose lookups wait on a barrier, so both callers read the same
    /// record before either writes.
    struct LockstepLedger {
        inner: Arc<InMemoryStore>,
        lookups: Barrier,
    }

    #[async_trait]
    impl RollingTaskStore for LockstepLedger {
        async fn get_active_by_description(
            &self,
            user_id: UserId,
            description: &str,
        ) -> Result<Option<RollingTask>, StoreError> {
            let found = self.inner.get_active_by_description(user_id, description).await;
            self.lookups.wait().await;
            found
        }

        async fn create(&self, task: &RollingTask) -> Result<RollingTask, StoreError> {
            RollingTaskStore::create(&*self.inner, task).await
        }

        async fn update(&self, task: &RollingTask) -> Result<(), StoreError> {
            self.inner.update(task).await
        }

        async fn record_mention(
            &self,
            id: RollingTaskId,
            date: NaiveDate,
            now: DateTime<Utc>,
        ) -> Result<RollingTask, StoreError> {
            self.inner.record_mention(id, date, now).await
        }

        async fn list_active_by_team(
            &self,
            team_id: TeamId,
        ) -> Result<Vec<RollingTask>, StoreError> {
            self.inner.list_active_by_team(team_id).await
        }

        async fn list_active_by_user(
            &self,
            user_id: UserId,
        ) -> Result<Vec<RollingTask>, StoreError> {
            self.inner.list_active_by_user(user_id).await
        }
    }

    async fn seed(store: &FlakyStore, standups: &[&Standup]) {
        for s in standups {
            StandupStore::create(store, s).await.unwrap();
        }
    }

    #[tokio::test]
    async fn no_history_means_no_rolling_tasks() {
        let store = FlakyStore::new();
        let detector = RollingTaskDetector::new(store.clone(), store.clone(), 7);
        let today = standup_on(UserId::new(), TeamId::new(), date(2024, 6, 10))
            .with_in_progress(["fix bug A"]);
        seed(&store, &[&today]).await;

        let outcome = detector.detect(&today).await.unwrap();
        assert_eq!(outcome, DetectionOutcome::default());
    }

    #[tokio::test]
    async fn existing_active_record_is_bumped() {
        let store = FlakyStore::new();
        let detector = RollingTaskDetector::new(store.clone(), store.clone(), 7);
        let (user, team) = (UserId::new(), TeamId::new());

        let d1 = standup_on(user, team, date(2024, 6, 1)).with_in_progress(["Deploy"]);
        let d2 = standup_on(user, team, date(2024, 6, 2)).with_planned(["deploy "]);
        let d3 = standup_on(user, team, date(2024, 6, 3)).with_in_progress(["DEPLOY"]);
        seed(&store, &[&d1, &d2, &d3]).await;

        let first = detector.detect(&d2).await.unwrap();
        assert_eq!(first.created.len(), 1);
        assert_eq!(first.created[0].occurrence_count, 2);

        let second = detector.detect(&d3).await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.updated.len(), 1);
        assert_eq!(second.updated[0].occurrence_count, 3);
        assert_eq!(second.updated[0].last_mentioned, date(2024, 6, 3));
    }

    #[tokio::test]
    async fn interleaved_detectors_both_bump_the_same_record() {
        let store = Arc::new(InMemoryStore::new());
        let (user, team) = (UserId::new(), TeamId::new());

        let d1 = standup_on(user, team, date(2024, 6, 1)).with_in_progress(["deploy"]);
        let d2 = standup_on(user, team, date(2024, 6, 2)).with_in_progress(["deploy"]);
        let d3 = standup_on(user, team, date(2024, 6, 3)).with_in_progress(["deploy"]);
        let d4 = standup_on(user, team, date(2024, 6, 4)).with_in_progress(["deploy"]);
        for s in [&d1, &d2, &d3, &d4] {
            StandupStore::create(&*store, s).await.unwrap();
        }

        let seeded = RollingTaskDetector::new(store.clone(), store.clone(), 7)
            .detect(&d2)
            .await
            .unwrap();
        assert_eq!(seeded.created[0].occurrence_count, 2);

        let ledger = Arc::new(LockstepLedger {
            inner: store.clone(),
            lookups: Barrier::new(2),
        });
        let worker_a = RollingTaskDetector::new(store.clone(), ledger.clone(), 7);
        let worker_b = RollingTaskDetector::new(store.clone(), ledger, 7);

        let (a, b) = tokio::join!(worker_a.detect(&d3), worker_b.detect(&d4));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.updated.len(), 1);
        assert_eq!(b.updated.len(), 1);

        let stored = store.list_active_by_user(user).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].occurrence_count, 4);
        assert_eq!(stored[0].last_mentioned, date(2024, 6, 4));
    }

    #[tokio::test]
    async fn ledger_failures_are_per_task() {
        let store = FlakyStore::new();
        let detector = RollingTaskDetector::new(store.clone(), store.clone(), 7);
        let (user, team) = (UserId::new(), TeamId::new());

        let prior = standup_on(user, team, date(2024, 6, 1)).with_in_progress(["a", "b"]);
        let today = standup_on(user, team, date(2024, 6, 2)).with_in_progress(["a", "b"]);
        seed(&store, &[&prior, &today]).await;

        store.fail_task_ops.store(true, Ordering::SeqCst);
        let outcome = detector.detect(&today).await.unwrap();
        assert_eq!(outcome.failed, vec!["a".to_string(), "b".to_string()]);
        assert!(outcome.is_partial());
        assert_eq!(outcome.rolling_count(), 0);
    }

    #[tokio::test]
    async fn unreadable_history_fails_detection() {
        let store = FlakyStore::new();
        let detector = RollingTaskDetector::new(store.clone(), store.clone(), 7);
        let today = standup_on(UserId::new(), TeamId::new(), date(2024, 6, 2));

        store.fail_history.store(true, Ordering::SeqCst);
        assert!(matches!(
            detector.detect(&today).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
