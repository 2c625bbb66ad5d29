//! Report Store / Task Ledger boundary.
//!
//! The stores are the only shared mutable state of the analysis pipeline.
//! Every implementation must be safe under concurrent callers: two workers may
//! analyze standups of the same user at the same time.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use scrumai_core::{ReportId, RollingTaskId, StandupId, TeamId, UserId};
use scrumai_standups::{AnalysisReport, RollingTask, Standup};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait StandupStore: Send + Sync {
    async fn create(&self, standup: &Standup) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: StandupId) -> Result<Option<Standup>, StoreError>;

    /// Standups of one user with `from <= date <= to`, oldest first.
    async fn list_by_user(
        &self,
        user_id: UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Standup>, StoreError>;

    async fn list_by_team(
        &self,
        team_id: TeamId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Standup>, StoreError>;
}

/// Ledger of rolling tasks.
///
/// At most one *active* record exists per (user, normalized description).
#[async_trait]
pub trait RollingTaskStore: Send + Sync {
    async fn get_active_by_description(
        &self,
        user_id: UserId,
        description: &str,
    ) -> Result<Option<RollingTask>, StoreError>;

    /// Insert a new active record. If a concurrent writer already created one
    /// for the same (user, description), that record absorbs this mention
    /// (count + 1, `last_mentioned` moved forward) and is returned instead.
    async fn create(&self, task: &RollingTask) -> Result<RollingTask, StoreError>;

    /// Overwrite a record (status changes). Last writer wins; use
    /// `record_mention` to count mentions.
    async fn update(&self, task: &RollingTask) -> Result<(), StoreError>;

    /// Atomically count one more mention of an active record on `date`.
    ///
    /// The increment happens inside the store, so two callers bumping the same
    /// record both land. `last_mentioned` only moves forward. Returns the
    /// record after the bump, or `NotFound` when no active record has `id`.
    async fn record_mention(
        &self,
        id: RollingTaskId,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<RollingTask, StoreError>;

    async fn list_active_by_team(&self, team_id: TeamId) -> Result<Vec<RollingTask>, StoreError>;

    async fn list_active_by_user(&self, user_id: UserId) -> Result<Vec<RollingTask>, StoreError>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn create(&self, report: &AnalysisReport) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: ReportId) -> Result<Option<AnalysisReport>, StoreError>;

    /// Newest first.
    async fn list_by_team(&self, team_id: TeamId) -> Result<Vec<AnalysisReport>, StoreError>;
}
