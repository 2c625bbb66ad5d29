use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use scrumai_core::{DomainError, RollingTaskId, TeamId, UserId};

/// Lifecycle of a rolling-task record.
///
/// Records are never deleted. Nothing in the pipeline moves a record to
/// `Resolved` yet; the state exists so the ledger can be closed out externally.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollingTaskStatus {
    Active,
    Resolved,
}

impl RollingTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollingTaskStatus::Active => "active",
            RollingTaskStatus::Resolved => "resolved",
        }
    }
}

impl core::str::FromStr for RollingTaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "resolved" => Ok(Self::Resolved),
            other => Err(DomainError::validation(format!(
                "unknown rolling task status '{other}'"
            ))),
        }
    }
}

/// A task description that keeps showing up in one user's open work.
///
/// Invariant (enforced by the ledger store): at most one `Active` record per
/// `(user_id, task_description)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingTask {
    pub id: RollingTaskId,
    pub team_id: TeamId,
    pub user_id: UserId,
    /// Normalized (trimmed, case-folded) description.
    pub task_description: String,
    pub first_mentioned: NaiveDate,
    pub last_mentioned: NaiveDate,
    pub occurrence_count: u32,
    pub status: RollingTaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RollingTask {
    pub fn is_active(&self) -> bool {
        self.status == RollingTaskStatus::Active
    }

    /// Count one more mention on `date`.
    ///
    /// `last_mentioned` only moves forward, so a late redelivery of an older
    /// standup cannot rewind it. The count is bumped unconditionally.
    pub fn record_mention(&mut self, date: NaiveDate, now: DateTime<Utc>) {
        if date > self.last_mentioned {
            self.last_mentioned = date;
        }
        self.occurrence_count = self.occurrence_count.saturating_add(1);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn task(last: NaiveDate) -> RollingTask {
        RollingTask {
            id: RollingTaskId::new(),
            team_id: TeamId::new(),
            user_id: UserId::new(),
            task_description: "fix bug a".to_string(),
            first_mentioned: date(2024, 3, 1),
            last_mentioned: last,
            occurrence_count: 2,
            status: RollingTaskStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn record_mention_bumps_count_and_date() {
        let mut t = task(date(2024, 3, 3));
        t.record_mention(date(2024, 3, 4), Utc::now());
        assert_eq!(t.occurrence_count, 3);
        assert_eq!(t.last_mentioned, date(2024, 3, 4));
    }

    #[test]
    fn older_mention_still_counts_but_keeps_last_date() {
        let mut t = task(date(2024, 3, 5));
        t.record_mention(date(2024, 3, 2), Utc::now());
        assert_eq!(t.occurrence_count, 3);
        assert_eq!(t.last_mentioned, date(2024, 3, 5));
    }

    #[test]
    fn status_parses_wire_names() {
        assert_eq!("active".parse::<RollingTaskStatus>().unwrap(), RollingTaskStatus::Active);
        assert_eq!(
            "resolved".parse::<RollingTaskStatus>().unwrap(),
            RollingTaskStatus::Resolved
        );
        assert!("done".parse::<RollingTaskStatus>().is_err());
    }
}
