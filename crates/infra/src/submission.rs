//! Standup submission: durable write, immediate best-effort analysis, then a
//! trigger on the queue as the durable backstop.
//!
//! The same standup is therefore usually analyzed twice (inline and from the
//! queue). Analysis is at-least-once, never exactly-once.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{info, instrument, warn};

use scrumai_ai::InsightProvider;
use scrumai_core::{StandupId, TeamId, UserId};
use scrumai_events::AnalysisTrigger;
use scrumai_standups::Standup;

use crate::analysis::StandupAnalyzer;
use crate::dedup::ProcessedSet;
use crate::publisher::AnalysisPublisher;
use crate::store::{StandupStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("failed to store standup: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default)]
pub struct SubmitStandup {
    pub user_id: UserId,
    pub team_id: TeamId,
    pub date: NaiveDate,
    pub completed: Vec<String>,
    pub in_progress: Vec<String>,
    pub planned: Vec<String>,
    pub blockers: Vec<String>,
    pub notes: String,
    /// Free-form transcript used to fill the lists when all of them are empty.
    pub transcript: Option<String>,
}

#[derive(Clone)]
pub struct StandupSubmission {
    standups: Arc<dyn StandupStore>,
    analyzer: Arc<dyn StandupAnalyzer>,
    publisher: AnalysisPublisher,
    provider: Arc<dyn InsightProvider>,
    dedup: Option<Arc<dyn ProcessedSet>>,
}

impl StandupSubmission {
    pub fn new(
        standups: Arc<dyn StandupStore>,
        analyzer: Arc<dyn StandupAnalyzer>,
        publisher: AnalysisPublisher,
        provider: Arc<dyn InsightProvider>,
    ) -> Self {
        Self {
            standups,
            analyzer,
            publisher,
            provider,
            dedup: None,
        }
    }

    pub fn with_dedup(mut self, dedup: Arc<dyn ProcessedSet>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    /// Only the durable write can fail this call.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, date = %request.date), err)]
    pub async fn submit(&self, request: SubmitStandup) -> Result<Standup, SubmitError> {
        let standup = self.build(request).await;
        self.standups.create(&standup).await?;
        info!(standup_id = %standup.id, "standup stored");

        match self.analyzer.analyze(standup.id).await {
            Ok(_) => {
                if let Some(dedup) = &self.dedup {
                    if let Err(error) = dedup.mark(standup.id).await {
                        warn!(standup_id = %standup.id, %error, "failed to record processed standup");
                    }
                }
            }
            Err(error) => warn!(standup_id = %standup.id, %error, "inline analysis failed"),
        }

        let standup = self.refetch(standup).await;

        let trigger = AnalysisTrigger::new(standup.id, standup.user_id, standup.team_id);
        if let Err(error) = self.publisher.publish(&trigger).await {
            warn!(standup_id = %standup.id, %error, "failed to publish analysis trigger");
        }

        Ok(standup)
    }

    async fn build(&self, request: SubmitStandup) -> Standup {
        let SubmitStandup {
            user_id,
            team_id,
            date,
            completed,
            in_progress,
            planned,
            blockers,
            mut notes,
            transcript,
        } = request;

        let mut standup = Standup::new(StandupId::new(), user_id, team_id, date, Utc::now())
            .with_completed(completed)
            .with_in_progress(in_progress)
            .with_planned(planned)
            .with_blockers(blockers);

        if let Some(raw) = transcript.filter(|t| !t.trim().is_empty()) {
            if standup.has_no_tasks() {
                match self.provider.parse_transcript(&raw).await {
                    Ok(parsed) => {
                        standup.completed = parsed.completed_tasks;
                        standup.in_progress = parsed.in_progress_tasks;
                        standup.planned = parsed.planned_tasks;
                        standup.blockers = parsed.blockers;
                        if notes.trim().is_empty() {
                            notes = parsed.notes;
                        }
                    }
                    Err(error) => warn!(%error, "transcript parsing failed, keeping submitted lists"),
                }
            }
        }

        standup.with_notes(notes)
    }

    async fn refetch(&self, stored: Standup) -> Standup {
        match self.standups.get_by_id(stored.id).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => stored,
            Err(error) => {
                warn!(standup_id = %stored.id, %error, "failed to re-fetch standup");
                stored
            }
        }
    }
}
