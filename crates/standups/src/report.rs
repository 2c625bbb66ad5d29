use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use scrumai_core::{DomainError, ReportId, TeamId, UserId};

use crate::standup::Standup;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    TeamSummary,
    RollingTasks,
    Blockers,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::TeamSummary => "team_summary",
            ReportKind::RollingTasks => "rolling_tasks",
            ReportKind::Blockers => "blockers",
        }
    }
}

impl core::str::FromStr for ReportKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "team_summary" => Ok(Self::TeamSummary),
            "rolling_tasks" => Ok(Self::RollingTasks),
            "blockers" => Ok(Self::Blockers),
            other => Err(DomainError::validation(format!("unknown report kind '{other}'"))),
        }
    }
}

/// Persisted output of one analysis run. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub id: ReportId,
    pub team_id: TeamId,
    pub kind: ReportKind,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    /// Free-form structured payload.
    pub payload: JsonValue,
    pub generated_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl AnalysisReport {
    /// A `team_summary` report carrying the insight generated for `standup`.
    ///
    /// Payload shape: `{ "standup_id", "user_id", "insight", "provider" }`.
    pub fn insight_for(
        standup: &Standup,
        insight: impl Into<String>,
        provider: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReportId::new(),
            team_id: standup.team_id,
            kind: ReportKind::TeamSummary,
            date_from: standup.date,
            date_to: standup.date,
            payload: json!({
                "standup_id": standup.id,
                "user_id": standup.user_id,
                "insight": insight.into(),
                "provider": provider,
            }),
            generated_by: standup.user_id,
            created_at: now,
        }
    }

    /// The insight text, when this is an insight report.
    pub fn insight(&self) -> Option<&str> {
        self.payload.get("insight").and_then(JsonValue::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrumai_core::StandupId;

    #[test]
    fn insight_report_embeds_source_identifiers() {
        let standup = Standup::new(
            StandupId::new(),
            UserId::new(),
            TeamId::new(),
            NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            Utc::now(),
        );

        let report = AnalysisReport::insight_for(&standup, "all good", "mock", Utc::now());

        assert_eq!(report.kind, ReportKind::TeamSummary);
        assert_eq!(report.team_id, standup.team_id);
        assert_eq!(report.date_from, standup.date);
        assert_eq!(report.date_to, standup.date);
        assert_eq!(report.insight(), Some("all good"));
        assert_eq!(report.payload["standup_id"], json!(standup.id.to_string()));
        assert_eq!(report.payload["user_id"], json!(standup.user_id.to_string()));
        assert_eq!(report.payload["provider"], json!("mock"));
    }

    #[test]
    fn kind_names_match_storage_values() {
        for kind in [ReportKind::TeamSummary, ReportKind::RollingTasks, ReportKind::Blockers] {
            assert_eq!(kind.as_str().parse::<ReportKind>().unwrap(), kind);
        }
    }
}
