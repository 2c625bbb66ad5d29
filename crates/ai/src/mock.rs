use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use scrumai_standups::Standup;

use crate::provider::InsightProvider;
use crate::result::{AiError, ParsedStandup};

/// Offline provider with deterministic output. Used by default and in tests.
#[derive(Debug, Default)]
pub struct MockProvider {
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InsightProvider for MockProvider {
    fn name(&self) -> String {
        "mock".to_string()
    }

    async fn generate_insight(&self, standup: &Standup) -> Result<String, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut insight = format!(
            "Summary: {} completed, {} in progress, {} planned.",
            standup.completed.len(),
            standup.in_progress.len(),
            standup.planned.len()
        );
        if standup.blockers.is_empty() {
            insight.push_str(" No blockers reported.");
        } else {
            insight.push_str(&format!(" Blockers need attention: {}.", standup.blockers.join("; ")));
        }
        if standup.in_progress.len() > 3 {
            insight.push_str(" Consider limiting work in progress.");
        }
        Ok(insight)
    }

    /// Reads `completed:`, `in progress:`, `planned:` and `blocker:` prefixed
    /// lines; anything else is folded into notes.
    async fn parse_transcript(&self, raw: &str) -> Result<ParsedStandup, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut parsed = ParsedStandup::default();
        let mut notes = Vec::new();

        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let bucket = [
                ("completed:", &mut parsed.completed_tasks),
                ("in progress:", &mut parsed.in_progress_tasks),
                ("planned:", &mut parsed.planned_tasks),
                ("blocker:", &mut parsed.blockers),
            ]
            .into_iter()
            .find(|(prefix, _)| {
                line.get(..prefix.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
            });

            match bucket {
                Some((prefix, list)) => {
                    let item = line.get(prefix.len()..).unwrap_or_default().trim();
                    if !item.is_empty() {
                        list.push(item.to_string());
                    }
                }
                None => notes.push(line),
            }
        }

        parsed.notes = notes.join(" ");
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use scrumai_core::{StandupId, TeamId, UserId};

    fn standup() -> Standup {
        Standup::new(
            StandupId::new(),
            UserId::new(),
            TeamId::new(),
            NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn insight_mentions_blockers() {
        let mock = MockProvider::new();
        let s = standup()
            .with_completed(["a"])
            .with_blockers(["vpn down"]);
        let insight = mock.generate_insight(&s).await.unwrap();
        assert!(insight.starts_with("Summary: 1 completed, 0 in progress, 0 planned."));
        assert!(insight.contains("vpn down"));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn insight_is_deterministic() {
        let mock = MockProvider::new();
        let s = standup().with_in_progress(["x"]);
        let a = mock.generate_insight(&s).await.unwrap();
        let b = mock.generate_insight(&s).await.unwrap();
        assert_eq!(a, b);
        assert!(a.contains("No blockers reported."));
    }

    #[tokio::test]
    async fn transcript_lines_are_bucketed() {
        let raw = "Completed: login page\nIn progress: payments\nPlanned: docs\n\
                   Blocker: waiting on keys\nSomething else entirely";
        let parsed = MockProvider::new().parse_transcript(raw).await.unwrap();
        assert_eq!(parsed.completed_tasks, vec!["login page"]);
        assert_eq!(parsed.in_progress_tasks, vec!["payments"]);
        assert_eq!(parsed.planned_tasks, vec!["docs"]);
        assert_eq!(parsed.blockers, vec!["waiting on keys"]);
        assert_eq!(parsed.notes, "Something else entirely");
    }
}
