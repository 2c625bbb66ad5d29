//! Test doubles shared by the unit and integration tests of this crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use scrumai_ai::{AiError, InsightProvider};
use scrumai_core::{ReportId, RollingTaskId, StandupId, TeamId, UserId};
use scrumai_standups::{AnalysisReport, RollingTask, Standup};

use crate::store::{InMemoryStore, ReportStore, RollingTaskStore, StandupStore, StoreError};

/// In-memory store with switchable failures.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_standup_get: AtomicBool,
    pub fail_history: AtomicBool,
    pub fail_task_ops: AtomicBool,
    pub fail_report_create: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("{what} unavailable")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StandupStore for FlakyStore {
    async fn create(&self, standup: &Standup) -> Result<(), StoreError> {
        StandupStore::create(&self.inner, standup).await
    }

    async fn get_by_id(&self, id: StandupId) -> Result<Option<Standup>, StoreError> {
        Self::check(&self.fail_standup_get, "standups")?;
        StandupStore::get_by_id(&self.inner, id).await
    }

    async fn list_by_user(
        &self,
        user_id: UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Standup>, StoreError> {
        Self::check(&self.fail_history, "history")?;
        self.inner.list_by_user(user_id, from, to).await
    }

    async fn list_by_team(
        &self,
        team_id: TeamId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Standup>, StoreError> {
        StandupStore::list_by_team(&self.inner, team_id, from, to).await
    }
}

#[async_trait]
impl RollingTaskStore for FlakyStore {
    async fn get_active_by_description(
        &self,
        user_id: UserId,
        description: &str,
    ) -> Result<Option<RollingTask>, StoreError> {
        Self::check(&self.fail_task_ops, "ledger")?;
        self.inner.get_active_by_description(user_id, description).await
    }

    async fn create(&self, task: &RollingTask) -> Result<RollingTask, StoreError> {
        Self::check(&self.fail_task_ops, "ledger")?;
        RollingTaskStore::create(&self.inner, task).await
    }

    async fn update(&self, task: &RollingTask) -> Result<(), StoreError> {
        Self::check(&self.fail_task_ops, "ledger")?;
        self.inner.update(task).await
    }

    async fn record_mention(
        &self,
        id: RollingTaskId,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<RollingTask, StoreError> {
        Self::check(&self.fail_task_ops, "ledger")?;
        self.inner.record_mention(id, date, now).await
    }

    async fn list_active_by_team(&self, team_id: TeamId) -> Result<Vec<RollingTask>, StoreError> {
        self.inner.list_active_by_team(team_id).await
    }

    async fn list_active_by_user(&self, user_id: UserId) -> Result<Vec<RollingTask>, StoreError> {
        self.inner.list_active_by_user(user_id).await
    }
}

#[async_trait]
impl ReportStore for FlakyStore {
    async fn create(&self, report: &AnalysisReport) -> Result<(), StoreError> {
        Self::check(&self.fail_report_create, "reports")?;
        ReportStore::create(&self.inner, report).await
    }

    async fn get_by_id(&self, id: ReportId) -> Result<Option<AnalysisReport>, StoreError> {
        ReportStore::get_by_id(&self.inner, id).await
    }

    async fn list_by_team(&self, team_id: TeamId) -> Result<Vec<AnalysisReport>, StoreError> {
        ReportStore::list_by_team(&self.inner, team_id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubBehavior {
    Answer,
    Fail,
    Hang,
}

/// Provider whose outcome is chosen by the test.
#[derive(Debug)]
pub struct StubProvider {
    behavior: StubBehavior,
    calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(behavior: StubBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InsightProvider for StubProvider {
    fn name(&self) -> String {
        "stub".to_string()
    }

    async fn generate_insight(&self, standup: &Standup) -> Result<String, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            StubBehavior::Answer => Ok(format!("insight for {}", standup.id)),
            StubBehavior::Fail => Err(AiError::Request("connection refused".to_string())),
            StubBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("too late".to_string())
            }
        }
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn standup_on(user: UserId, team: TeamId, on: NaiveDate) -> Standup {
    Standup::new(StandupId::new(), user, team, on, Utc::now())
}
