use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use scrumai_core::{StandupId, TeamId, UserId};

/// One user's report for one calendar date.
///
/// The analysis pipeline only reads standups; it never mutates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standup {
    pub id: StandupId,
    pub user_id: UserId,
    pub team_id: TeamId,
    pub date: NaiveDate,
    #[serde(rename = "completed_tasks", default)]
    pub completed: Vec<String>,
    #[serde(rename = "in_progress_tasks", default)]
    pub in_progress: Vec<String>,
    #[serde(rename = "planned_tasks", default)]
    pub planned: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Standup {
    /// A standup with empty task lists, stamped at `now`.
    pub fn new(
        id: StandupId,
        user_id: UserId,
        team_id: TeamId,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            team_id,
            date,
            completed: Vec::new(),
            in_progress: Vec::new(),
            planned: Vec::new(),
            blockers: Vec::new(),
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_completed<S: Into<String>>(mut self, tasks: impl IntoIterator<Item = S>) -> Self {
        self.completed = tasks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_in_progress<S: Into<String>>(mut self, tasks: impl IntoIterator<Item = S>) -> Self {
        self.in_progress = tasks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_planned<S: Into<String>>(mut self, tasks: impl IntoIterator<Item = S>) -> Self {
        self.planned = tasks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_blockers<S: Into<String>>(mut self, blockers: impl IntoIterator<Item = S>) -> Self {
        self.blockers = blockers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Tasks still open at report time: `in_progress` followed by `planned`.
    pub fn open_tasks(&self) -> impl Iterator<Item = &str> {
        self.in_progress
            .iter()
            .chain(self.planned.iter())
            .map(String::as_str)
    }

    /// True when no task list carries anything.
    pub fn has_no_tasks(&self) -> bool {
        self.completed.is_empty()
            && self.in_progress.is_empty()
            && self.planned.is_empty()
            && self.blockers.is_empty()
    }
}
