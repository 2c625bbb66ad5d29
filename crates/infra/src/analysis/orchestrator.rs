//! One analysis run for one standup.
//!
//! Steps run in independent failure domains:
//!
//! 1. fetch the standup (missing or unreadable: the run fails)
//! 2. rolling-task detection (failure logged, run continues)
//! 3. insight generation, bounded by a timeout (failure logged, no report)
//! 4. report persistence (failure logged)
//!
//! Re-running for the same standup is safe but not side-effect free: each run
//! bumps the matching rolling-task counts again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use scrumai_ai::InsightProvider;
use scrumai_core::{ReportId, StandupId};
use scrumai_standups::{AnalysisReport, DEFAULT_LOOKBACK_DAYS, Standup};

use super::detector::{DetectionOutcome, RollingTaskDetector};
use crate::store::{ReportStore, RollingTaskStore, StandupStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("standup {0} not found")]
    StandupNotFound(StandupId),

    #[error("failed to load standup: {0}")]
    Store(#[from] StoreError),
}

impl AnalysisError {
    /// Whether running again later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalysisError::Store(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisConfig {
    pub lookback_days: u32,
    pub insight_timeout: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            insight_timeout: Duration::from_secs(90),
        }
    }
}

/// What one run achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSummary {
    pub standup_id: StandupId,
    /// `None` when detection could not run at all.
    pub detection: Option<DetectionOutcome>,
    pub insight_generated: bool,
    pub report_id: Option<ReportId>,
}

/// Capability used by the worker and the submission flow.
#[async_trait]
pub trait StandupAnalyzer: Send + Sync {
    async fn analyze(&self, standup_id: StandupId) -> Result<AnalysisSummary, AnalysisError>;
}

#[derive(Clone)]
pub struct AnalysisOrchestrator {
    standups: Arc<dyn StandupStore>,
    reports: Arc<dyn ReportStore>,
    provider: Arc<dyn InsightProvider>,
    detector: RollingTaskDetector,
    insight_timeout: Duration,
}

impl AnalysisOrchestrator {
    pub fn new(
        standups: Arc<dyn StandupStore>,
        tasks: Arc<dyn RollingTaskStore>,
        reports: Arc<dyn ReportStore>,
        provider: Arc<dyn InsightProvider>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            detector: RollingTaskDetector::new(standups.clone(), tasks, config.lookback_days),
            standups,
            reports,
            provider,
            insight_timeout: config.insight_timeout,
        }
    }

    async fn generate_insight(&self, standup: &Standup) -> Option<String> {
        let provider = self.provider.name();
        match tokio::time::timeout(self.insight_timeout, self.provider.generate_insight(standup))
            .await
        {
            Ok(Ok(insight)) => Some(insight),
            Ok(Err(error)) => {
                warn!(%provider, %error, "insight generation failed");
                None
            }
            Err(_) => {
                warn!(
                    %provider,
                    timeout_secs = self.insight_timeout.as_secs(),
                    "insight generation timed out"
                );
                None
            }
        }
    }
}

#[async_trait]
impl StandupAnalyzer for AnalysisOrchestrator {
    #[instrument(skip(self), fields(standup_id = %standup_id))]
    async fn analyze(&self, standup_id: StandupId) -> Result<AnalysisSummary, AnalysisError> {
        let standup = self
            .standups
            .get_by_id(standup_id)
            .await?
            .ok_or(AnalysisError::StandupNotFound(standup_id))?;

        let detection = match self.detector.detect(&standup).await {
            Ok(outcome) => {
                if outcome.is_partial() {
                    info!(
                        failed = outcome.failed.len(),
                        applied = outcome.rolling_count(),
                        "rolling-task detection partially failed"
                    );
                }
                Some(outcome)
            }
            Err(error) => {
                warn!(%error, "rolling-task detection failed");
                None
            }
        };

        let mut summary = AnalysisSummary {
            standup_id,
            detection,
            insight_generated: false,
            report_id: None,
        };

        let Some(insight) = self.generate_insight(&standup).await else {
            return Ok(summary);
        };
        summary.insight_generated = true;

        let report = AnalysisReport::insight_for(&standup, insight, &self.provider.name(), Utc::now());
        match self.reports.create(&report).await {
            Ok(()) => summary.report_id = Some(report.id),
            Err(error) => warn!(report_id = %report.id, %error, "failed to persist analysis report"),
        }

        info!(
            user_id = %standup.user_id,
            rolling = summary.detection.as_ref().map_or(0, DetectionOutcome::rolling_count),
            report = summary.report_id.is_some(),
            "standup analyzed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use scrumai_core::{TeamId, UserId};

    use crate::testing::{FlakyStore, StubBehavior, StubProvider, date, standup_on};

    fn orchestrator(store: &Arc<FlakyStore>, provider: Arc<StubProvider>) -> AnalysisOrchestrator {
        AnalysisOrchestrator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            provider,
            AnalysisConfig {
                lookback_days: 7,
                insight_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn missing_standup_is_not_found() {
        let store = FlakyStore::new();
        let orch = orchestrator(&store, StubProvider::new(StubBehavior::Answer));
        let id = StandupId::new();

        let err = orch.analyze(id).await.unwrap_err();
        assert!(matches!(err, AnalysisError::StandupNotFound(missing) if missing == id));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn unreadable_standup_is_transient() {
        let store = FlakyStore::new();
        let orch = orchestrator(&store, StubProvider::new(StubBehavior::Answer));
        store.fail_standup_get.store(true, Ordering::SeqCst);

        let err = orch.analyze(StandupId::new()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn successful_run_persists_one_team_summary() {
        let store = FlakyStore::new();
        let orch = orchestrator(&store, StubProvider::new(StubBehavior::Answer));
        let s = standup_on(UserId::new(), TeamId::new(), date(2024, 6, 3)).with_completed(["x"]);
        StandupStore::create(&*store, &s).await.unwrap();

        let summary = orch.analyze(s.id).await.unwrap();
        assert!(summary.insight_generated);
        let report_id = summary.report_id.unwrap();

        let report = ReportStore::get_by_id(&*store, report_id).await.unwrap().unwrap();
        assert_eq!(report.kind, scrumai_standups::ReportKind::TeamSummary);
        assert_eq!(report.generated_by, s.user_id);
        assert_eq!(report.payload["standup_id"], s.id.to_string());
        assert_eq!(report.payload["provider"], "stub");
        assert_eq!(report.insight(), Some(format!("insight for {}", s.id).as_str()));
    }

    #[tokio::test]
    async fn provider_failure_still_succeeds_without_report() {
        let store = FlakyStore::new();
        let orch = orchestrator(&store, StubProvider::new(StubBehavior::Fail));
        let s = standup_on(UserId::new(), TeamId::new(), date(2024, 6, 3));
        StandupStore::create(&*store, &s).await.unwrap();

        let summary = orch.analyze(s.id).await.unwrap();
        assert!(!summary.insight_generated);
        assert_eq!(summary.report_id, None);
        assert_eq!(store.inner.report_count(), 0);
    }

    #[tokio::test]
    async fn report_write_failure_does_not_fail_the_run() {
        let store = FlakyStore::new();
        let orch = orchestrator(&store, StubProvider::new(StubBehavior::Answer));
        let s = standup_on(UserId::new(), TeamId::new(), date(2024, 6, 3));
        StandupStore::create(&*store, &s).await.unwrap();
        store.fail_report_create.store(true, Ordering::SeqCst);

        let summary = orch.analyze(s.id).await.unwrap();
        assert!(summary.insight_generated);
        assert_eq!(summary.report_id, None);
    }

    #[tokio::test]
    async fn history_failure_skips_detection_only() {
        let store = FlakyStore::new();
        let orch = orchestrator(&store, StubProvider::new(StubBehavior::Answer));
        let s = standup_on(UserId::new(), TeamId::new(), date(2024, 6, 3));
        StandupStore::create(&*store, &s).await.unwrap();
        store.fail_history.store(true, Ordering::SeqCst);

        let summary = orch.analyze(s.id).await.unwrap();
        assert_eq!(summary.detection, None);
        assert!(summary.report_id.is_some());
    }
}
