//! In-memory stores for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use scrumai_core::{ReportId, RollingTaskId, StandupId, TeamId, UserId};
use scrumai_standups::{AnalysisReport, RollingTask, Standup};

use super::{ReportStore, RollingTaskStore, StandupStore, StoreError};

/// All three stores behind one set of locks.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    standups: RwLock<HashMap<StandupId, Standup>>,
    tasks: RwLock<HashMap<RollingTaskId, RollingTask>>,
    reports: RwLock<HashMap<ReportId, AnalysisReport>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every ledger record, active or not.
    pub fn all_rolling_tasks(&self) -> Vec<RollingTask> {
        match self.tasks.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => vec![],
        }
    }

    pub fn report_count(&self) -> usize {
        self.reports.read().map(|m| m.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl StandupStore for InMemoryStore {
    async fn create(&self, standup: &Standup) -> Result<(), StoreError> {
        let mut map = self.standups.write().map_err(poisoned)?;
        if map.contains_key(&standup.id) {
            return Err(StoreError::Conflict(format!("standup {} already exists", standup.id)));
        }
        map.insert(standup.id, standup.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: StandupId) -> Result<Option<Standup>, StoreError> {
        let map = self.standups.read().map_err(poisoned)?;
        Ok(map.get(&id).cloned())
    }

    async fn list_by_user(
        &self,
        user_id: UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Standup>, StoreError> {
        let map = self.standups.read().map_err(poisoned)?;
        let mut out: Vec<Standup> = map
            .values()
            .filter(|s| s.user_id == user_id && s.date >= from && s.date <= to)
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.date, s.created_at));
        Ok(out)
    }

    async fn list_by_team(
        &self,
        team_id: TeamId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Standup>, StoreError> {
        let map = self.standups.read().map_err(poisoned)?;
        let mut out: Vec<Standup> = map
            .values()
            .filter(|s| s.team_id == team_id && s.date >= from && s.date <= to)
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.date, s.created_at));
        Ok(out)
    }
}

#[async_trait]
impl RollingTaskStore for InMemoryStore {
    async fn get_active_by_description(
        &self,
        user_id: UserId,
        description: &str,
    ) -> Result<Option<RollingTask>, StoreError> {
        let map = self.tasks.read().map_err(poisoned)?;
        Ok(map
            .values()
            .find(|t| t.user_id == user_id && t.is_active() && t.task_description == description)
            .cloned())
    }

    async fn create(&self, task: &RollingTask) -> Result<RollingTask, StoreError> {
        // Check and insert under one write lock so concurrent creators merge.
        let mut map = self.tasks.write().map_err(poisoned)?;
        let existing = map.values_mut().find(|t| {
            t.user_id == task.user_id
                && t.is_active()
                && t.task_description == task.task_description
        });
        if let Some(existing) = existing {
            existing.record_mention(task.last_mentioned, task.updated_at);
            return Ok(existing.clone());
        }
        map.insert(task.id, task.clone());
        Ok(task.clone())
    }

    async fn update(&self, task: &RollingTask) -> Result<(), StoreError> {
        let mut map = self.tasks.write().map_err(poisoned)?;
        match map.get_mut(&task.id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("rolling task {}", task.id))),
        }
    }

    async fn record_mention(
        &self,
        id: RollingTaskId,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<RollingTask, StoreError> {
        let mut map = self.tasks.write().map_err(poisoned)?;
        match map.get_mut(&id).filter(|t| t.is_active()) {
            Some(task) => {
                task.record_mention(date, now);
                Ok(task.clone())
            }
            None => Err(StoreError::NotFound(format!("active rolling task {id}"))),
        }
    }

    async fn list_active_by_team(&self, team_id: TeamId) -> Result<Vec<RollingTask>, StoreError> {
        let map = self.tasks.read().map_err(poisoned)?;
        let mut out: Vec<RollingTask> = map
            .values()
            .filter(|t| t.team_id == team_id && t.is_active())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn list_active_by_user(&self, user_id: UserId) -> Result<Vec<RollingTask>, StoreError> {
        let map = self.tasks.read().map_err(poisoned)?;
        let mut out: Vec<RollingTask> = map
            .values()
            .filter(|t| t.user_id == user_id && t.is_active())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[async_trait]
impl ReportStore for InMemoryStore {
    async fn create(&self, report: &AnalysisReport) -> Result<(), StoreError> {
        let mut map = self.reports.write().map_err(poisoned)?;
        map.insert(report.id, report.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: ReportId) -> Result<Option<AnalysisReport>, StoreError> {
        let map = self.reports.read().map_err(poisoned)?;
        Ok(map.get(&id).cloned())
    }

    async fn list_by_team(&self, team_id: TeamId) -> Result<Vec<AnalysisReport>, StoreError> {
        let map = self.reports.read().map_err(poisoned)?;
        let mut out: Vec<AnalysisReport> = map
            .values()
            .filter(|r| r.team_id == team_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }
}
