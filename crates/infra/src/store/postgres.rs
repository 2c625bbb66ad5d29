//! Postgres-backed stores.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (check constraint violation) | `23514` | `Corrupt` |
//! | Database (other) | Any other | `Unavailable` |
//! | PoolClosed, Io, timeouts | N/A | `Unavailable` |
//! | Column decode failures | N/A | `Corrupt` |
//!
//! ## Ledger concurrency
//!
//! `rolling_tasks` carries a partial unique index on
//! `(user_id, task_description) WHERE status = 'active'`. `create` is a single
//! `INSERT .. ON CONFLICT .. DO UPDATE`, so two workers racing on the same
//! task end up with one record whose count reflects both mentions.
//! `record_mention` increments in SQL (`occurrence_count + 1`) rather than
//! writing back a count read earlier, so concurrent bumps are never lost.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use scrumai_core::{ReportId, RollingTaskId, StandupId, TeamId, UserId};
use scrumai_standups::{AnalysisReport, ReportKind, RollingTask, RollingTaskStatus, Standup};

use super::{ReportStore, RollingTaskStore, StandupStore, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS standups (
        id                UUID PRIMARY KEY,
        user_id           UUID NOT NULL,
        team_id           UUID NOT NULL,
        date              DATE NOT NULL,
        completed_tasks   JSONB NOT NULL DEFAULT '[]',
        in_progress_tasks JSONB NOT NULL DEFAULT '[]',
        planned_tasks     JSONB NOT NULL DEFAULT '[]',
        blockers          JSONB NOT NULL DEFAULT '[]',
        notes             TEXT NOT NULL DEFAULT '',
        created_at        TIMESTAMPTZ NOT NULL,
        updated_at        TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS standups_user_date ON standups (user_id, date)",
    "CREATE INDEX IF NOT EXISTS standups_team_date ON standups (team_id, date)",
    r#"
    CREATE TABLE IF NOT EXISTS rolling_tasks (
        id               UUID PRIMARY KEY,
        team_id          UUID NOT NULL,
        user_id          UUID NOT NULL,
        task_description TEXT NOT NULL,
        first_mentioned  DATE NOT NULL,
        last_mentioned   DATE NOT NULL,
        occurrence_count INTEGER NOT NULL CHECK (occurrence_count > 0),
        status           TEXT NOT NULL CHECK (status IN ('active', 'resolved')),
        created_at       TIMESTAMPTZ NOT NULL,
        updated_at       TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS rolling_tasks_one_active
        ON rolling_tasks (user_id, task_description)
        WHERE status = 'active'
    "#,
    "CREATE INDEX IF NOT EXISTS rolling_tasks_team ON rolling_tasks (team_id) WHERE status = 'active'",
    r#"
    CREATE TABLE IF NOT EXISTS analysis_reports (
        id           UUID PRIMARY KEY,
        team_id      UUID NOT NULL,
        kind         TEXT NOT NULL,
        date_from    DATE NOT NULL,
        date_to      DATE NOT NULL,
        payload      JSONB NOT NULL,
        generated_by UUID NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS analysis_reports_team ON analysis_reports (team_id, created_at DESC)",
];

const STANDUP_COLUMNS: &str = "id, user_id, team_id, date, completed_tasks, in_progress_tasks, \
     planned_tasks, blockers, notes, created_at, updated_at";

const TASK_COLUMNS: &str = "id, team_id, user_id, task_description, first_mentioned, \
     last_mentioned, occurrence_count, status, created_at, updated_at";

fn record_mention_sql() -> String {
    format!(
        "UPDATE rolling_tasks SET \
             occurrence_count = occurrence_count + 1, \
             last_mentioned = GREATEST(last_mentioned, $2), \
             updated_at = $3 \
         WHERE id = $1 AND status = 'active' \
         RETURNING {TASK_COLUMNS}"
    )
}

const REPORT_COLUMNS: &str =
    "id, team_id, kind, date_from, date_to, payload, generated_by, created_at";

/// Postgres implementation of all three stores.
///
/// `Send + Sync`; all access goes through the SQLx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if missing. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StandupStore for PostgresStore {
    #[instrument(skip(self, standup), fields(standup_id = %standup.id), err)]
    async fn create(&self, standup: &Standup) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO standups ({STANDUP_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(standup.id.as_uuid())
        .bind(standup.user_id.as_uuid())
        .bind(standup.team_id.as_uuid())
        .bind(standup.date)
        .bind(Json(&standup.completed))
        .bind(Json(&standup.in_progress))
        .bind(Json(&standup.planned))
        .bind(Json(&standup.blockers))
        .bind(&standup.notes)
        .bind(standup.created_at)
        .bind(standup.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_standup", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(standup_id = %id), err)]
    async fn get_by_id(&self, id: StandupId) -> Result<Option<Standup>, StoreError> {
        let row = sqlx::query(&format!("SELECT {STANDUP_COLUMNS} FROM standups WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_standup", e))?;
        row.as_ref().map(standup_from_row).transpose()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_by_user(
        &self,
        user_id: UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Standup>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {STANDUP_COLUMNS} FROM standups \
             WHERE user_id = $1 AND date >= $2 AND date <= $3 \
             ORDER BY date ASC, created_at ASC"
        ))
        .bind(user_id.as_uuid())
        .bind(from)
        .bind(to)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_standups_by_user", e))?;
        rows.iter().map(standup_from_row).collect()
    }

    #[instrument(skip(self), fields(team_id = %team_id), err)]
    async fn list_by_team(
        &self,
        team_id: TeamId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Standup>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {STANDUP_COLUMNS} FROM standups \
             WHERE team_id = $1 AND date >= $2 AND date <= $3 \
             ORDER BY date ASC, created_at ASC"
        ))
        .bind(team_id.as_uuid())
        .bind(from)
        .bind(to)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_standups_by_team", e))?;
        rows.iter().map(standup_from_row).collect()
    }
}

#[async_trait]
impl RollingTaskStore for PostgresStore {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn get_active_by_description(
        &self,
        user_id: UserId,
        description: &str,
    ) -> Result<Option<RollingTask>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM rolling_tasks \
             WHERE user_id = $1 AND task_description = $2 AND status = 'active'"
        ))
        .bind(user_id.as_uuid())
        .bind(description)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_active_rolling_task", e))?;
        row.as_ref().map(task_from_row).transpose()
    }

    #[instrument(skip(self, task), fields(user_id = %task.user_id, task = %task.task_description), err)]
    async fn create(&self, task: &RollingTask) -> Result<RollingTask, StoreError> {
        let count = occurrence_to_sql(task.occurrence_count)?;
        let row = sqlx::query(&format!(
            "INSERT INTO rolling_tasks ({TASK_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (user_id, task_description) WHERE status = 'active' \
             DO UPDATE SET \
                 occurrence_count = rolling_tasks.occurrence_count + 1, \
                 last_mentioned = GREATEST(rolling_tasks.last_mentioned, EXCLUDED.last_mentioned), \
                 updated_at = EXCLUDED.updated_at \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task.id.as_uuid())
        .bind(task.team_id.as_uuid())
        .bind(task.user_id.as_uuid())
        .bind(&task.task_description)
        .bind(task.first_mentioned)
        .bind(task.last_mentioned)
        .bind(count)
        .bind(task.status.as_str())
        .bind(task.created_at)
        .bind(task.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_rolling_task", e))?;
        task_from_row(&row)
    }

    #[instrument(skip(self, task), fields(rolling_task_id = %task.id), err)]
    async fn update(&self, task: &RollingTask) -> Result<(), StoreError> {
        let count = occurrence_to_sql(task.occurrence_count)?;
        let result = sqlx::query(
            "UPDATE rolling_tasks SET \
                 first_mentioned = $2, last_mentioned = $3, occurrence_count = $4, \
                 status = $5, updated_at = $6 \
             WHERE id = $1",
        )
        .bind(task.id.as_uuid())
        .bind(task.first_mentioned)
        .bind(task.last_mentioned)
        .bind(count)
        .bind(task.status.as_str())
        .bind(task.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_rolling_task", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("rolling task {}", task.id)));
        }
        Ok(())
    }

    #[instrument(skip(self, now), fields(rolling_task_id = %id), err)]
    async fn record_mention(
        &self,
        id: RollingTaskId,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<RollingTask, StoreError> {
        let row = sqlx::query(&record_mention_sql())
            .bind(id.as_uuid())
            .bind(date)
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_rolling_task_mention", e))?;

        match row {
            Some(row) => task_from_row(&row),
            None => Err(StoreError::NotFound(format!("active rolling task {id}"))),
        }
    }

    #[instrument(skip(self), fields(team_id = %team_id), err)]
    async fn list_active_by_team(&self, team_id: TeamId) -> Result<Vec<RollingTask>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM rolling_tasks \
             WHERE team_id = $1 AND status = 'active' \
             ORDER BY occurrence_count DESC, id ASC"
        ))
        .bind(team_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_active_rolling_tasks_by_team", e))?;
        rows.iter().map(task_from_row).collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_active_by_user(&self, user_id: UserId) -> Result<Vec<RollingTask>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM rolling_tasks \
             WHERE user_id = $1 AND status = 'active' \
             ORDER BY occurrence_count DESC, id ASC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_active_rolling_tasks_by_user", e))?;
        rows.iter().map(task_from_row).collect()
    }
}

#[async_trait]
impl ReportStore for PostgresStore {
    #[instrument(skip(self, report), fields(report_id = %report.id, team_id = %report.team_id), err)]
    async fn create(&self, report: &AnalysisReport) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO analysis_reports ({REPORT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(report.id.as_uuid())
        .bind(report.team_id.as_uuid())
        .bind(report.kind.as_str())
        .bind(report.date_from)
        .bind(report.date_to)
        .bind(&report.payload)
        .bind(report.generated_by.as_uuid())
        .bind(report.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_report", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(report_id = %id), err)]
    async fn get_by_id(&self, id: ReportId) -> Result<Option<AnalysisReport>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {REPORT_COLUMNS} FROM analysis_reports WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_report", e))?;
        row.as_ref().map(report_from_row).transpose()
    }

    #[instrument(skip(self), fields(team_id = %team_id), err)]
    async fn list_by_team(&self, team_id: TeamId) -> Result<Vec<AnalysisReport>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {REPORT_COLUMNS} FROM analysis_reports \
             WHERE team_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(team_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_reports_by_team", e))?;
        rows.iter().map(report_from_row).collect()
    }
}

fn standup_from_row(row: &PgRow) -> Result<Standup, StoreError> {
    Ok(Standup {
        id: StandupId::from_uuid(column(row, "id")?),
        user_id: UserId::from_uuid(column(row, "user_id")?),
        team_id: TeamId::from_uuid(column(row, "team_id")?),
        date: column(row, "date")?,
        completed: column::<Json<Vec<String>>>(row, "completed_tasks")?.0,
        in_progress: column::<Json<Vec<String>>>(row, "in_progress_tasks")?.0,
        planned: column::<Json<Vec<String>>>(row, "planned_tasks")?.0,
        blockers: column::<Json<Vec<String>>>(row, "blockers")?.0,
        notes: column(row, "notes")?,
        created_at: column::<DateTime<Utc>>(row, "created_at")?,
        updated_at: column::<DateTime<Utc>>(row, "updated_at")?,
    })
}

fn task_from_row(row: &PgRow) -> Result<RollingTask, StoreError> {
    let count: i32 = column(row, "occurrence_count")?;
    let status: String = column(row, "status")?;
    Ok(RollingTask {
        id: RollingTaskId::from_uuid(column(row, "id")?),
        team_id: TeamId::from_uuid(column(row, "team_id")?),
        user_id: UserId::from_uuid(column(row, "user_id")?),
        task_description: column(row, "task_description")?,
        first_mentioned: column(row, "first_mentioned")?,
        last_mentioned: column(row, "last_mentioned")?,
        occurrence_count: u32::try_from(count)
            .map_err(|_| StoreError::Corrupt(format!("negative occurrence_count {count}")))?,
        status: status
            .parse::<RollingTaskStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn report_from_row(row: &PgRow) -> Result<AnalysisReport, StoreError> {
    let kind: String = column(row, "kind")?;
    Ok(AnalysisReport {
        id: ReportId::from_uuid(column(row, "id")?),
        team_id: TeamId::from_uuid(column(row, "team_id")?),
        kind: kind
            .parse::<ReportKind>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        date_from: column(row, "date_from")?,
        date_to: column(row, "date_to")?,
        payload: column(row, "payload")?,
        generated_by: UserId::from_uuid(column(row, "generated_by")?),
        created_at: column(row, "created_at")?,
    })
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("column {name}: {e}")))
}

fn occurrence_to_sql(count: u32) -> Result<i32, StoreError> {
    i32::try_from(count).map_err(|_| StoreError::Corrupt(format!("occurrence_count {count} overflows")))
}

/// Map SQLx errors to `StoreError` (see module docs).
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_declares_partial_unique_index_on_active_tasks() {
        let index = SCHEMA
            .iter()
            .find(|s| s.contains("rolling_tasks_one_active"))
            .unwrap();
        assert!(index.contains("UNIQUE"));
        assert!(index.contains("WHERE status = 'active'"));
    }

    #[test]
    fn mention_increments_in_sql_and_only_touches_active_records() {
        let sql = record_mention_sql();
        assert!(sql.contains("occurrence_count = occurrence_count + 1"));
        assert!(sql.contains("GREATEST(last_mentioned, $2)"));
        assert!(sql.contains("status = 'active'"));
        assert!(sql.contains("RETURNING"));
    }

    #[test]
    fn occurrence_count_must_fit_integer_column() {
        assert_eq!(occurrence_to_sql(3).unwrap(), 3);
        assert!(matches!(
            occurrence_to_sql(u32::MAX),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn pool_closed_is_transient() {
        assert!(matches!(
            map_sqlx_error("op", sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
    }
}
