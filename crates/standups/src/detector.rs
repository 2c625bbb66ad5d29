//! Rolling-task detection (pure).
//!
//! A task is *rolling* when it is still open (`in_progress` or `planned`) in the
//! current standup and was already open in at least one of the same user's
//! standups within the lookback window. Tasks that only appear in `completed`
//! are never considered.
//!
//! Detection re-derives everything from the history it is given, so it does not
//! depend on the order in which standups are analyzed. Applying the resulting
//! ledger mutations is *not* idempotent: every application bumps the count.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Days, NaiveDate, Utc};

use scrumai_core::RollingTaskId;

use crate::rolling_task::{RollingTask, RollingTaskStatus};
use crate::standup::Standup;
use crate::task::NormalizedTask;

pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;

/// Inclusive date range preceding (and excluding) a standup's date.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LookbackWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl LookbackWindow {
    /// The `days` calendar days before `date`, excluding `date` itself.
    pub fn before(date: NaiveDate, days: u32) -> Self {
        let from = date
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        let to = date.pred_opt().unwrap_or(NaiveDate::MIN);
        Self { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }
}

/// A task from the current standup that was already open in the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollingCandidate {
    pub description: NormalizedTask,
    /// Number of open mentions across the window's standups.
    pub prior_mentions: u32,
}

/// Classify the current standup's open tasks against the user's history.
///
/// History entries for other users, outside the window, or for the current
/// standup itself are ignored, so callers may pass a loosely filtered slice.
/// Each normalized description yields at most one candidate, in first-seen order.
pub fn rolling_candidates(
    current: &Standup,
    history: &[Standup],
    lookback_days: u32,
) -> Vec<RollingCandidate> {
    let window = LookbackWindow::before(current.date, lookback_days);

    let mut seen: HashMap<NormalizedTask, u32> = HashMap::new();
    for prior in history.iter().filter(|s| {
        s.user_id == current.user_id && s.id != current.id && window.contains(s.date)
    }) {
        for task in prior.open_tasks().filter_map(NormalizedTask::parse) {
            *seen.entry(task).or_default() += 1;
        }
    }

    if seen.is_empty() {
        return Vec::new();
    }

    let mut emitted: HashSet<NormalizedTask> = HashSet::new();
    let mut candidates = Vec::new();
    for task in current.open_tasks().filter_map(NormalizedTask::parse) {
        let Some(&prior_mentions) = seen.get(&task) else {
            continue;
        };
        if emitted.insert(task.clone()) {
            candidates.push(RollingCandidate {
                description: task,
                prior_mentions,
            });
        }
    }

    candidates
}

/// What to do to the ledger for one rolling candidate.
///
/// A mention on an existing record carries only its id and the date; the
/// store applies the increment itself so concurrent mentions are all counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerMutation {
    Create(RollingTask),
    Mention { id: RollingTaskId, date: NaiveDate },
}

/// Decide the ledger mutation for `candidate` given the existing active record.
///
/// - existing record: one more mention on the current date
/// - no record: a new active record with `prior_mentions + 1` occurrences and
///   `first_mentioned` approximated as `prior_mentions` days before the current date
pub fn decide_mutation(
    candidate: &RollingCandidate,
    existing: Option<&RollingTask>,
    current: &Standup,
    now: DateTime<Utc>,
) -> LedgerMutation {
    match existing {
        Some(task) => LedgerMutation::Mention {
            id: task.id,
            date: current.date,
        },
        None => {
            let first_mentioned = current
                .date
                .checked_sub_days(Days::new(u64::from(candidate.prior_mentions)))
                .unwrap_or(NaiveDate::MIN);
            LedgerMutation::Create(RollingTask {
                id: RollingTaskId::new(),
                team_id: current.team_id,
                user_id: current.user_id,
                task_description: candidate.description.as_str().to_string(),
                first_mentioned,
                last_mentioned: current.date,
                occurrence_count: candidate.prior_mentions.saturating_add(1),
                status: RollingTaskStatus::Active,
                created_at: now,
                updated_at: now,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use scrumai_core::{StandupId, TeamId, UserId};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn standup(user: UserId, team: TeamId, date: NaiveDate) -> Standup {
        Standup::new(StandupId::new(), user, team, date, Utc::now())
    }

    fn descriptions(candidates: &[RollingCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.description.as_str()).collect()
    }

    #[test]
    fn window_excludes_current_date() {
        let w = LookbackWindow::before(day(10), 7);
        assert_eq!(w.from, day(3));
        assert_eq!(w.to, day(9));
        assert!(w.contains(day(3)));
        assert!(!w.contains(day(10)));
        assert!(!w.contains(day(2)));
    }

    #[test]
    fn no_history_means_no_rolling_tasks() {
        let current = standup(UserId::new(), TeamId::new(), day(3))
            .with_in_progress(["fix bug A"])
            .with_planned(["write docs"]);

        assert!(rolling_candidates(&current, &[], DEFAULT_LOOKBACK_DAYS).is_empty());
    }

    #[test]
    fn task_repeated_after_two_days_is_rolling() {
        let (user, team) = (UserId::new(), TeamId::new());
        let day1 = standup(user, team, day(1)).with_in_progress(["fix bug A"]);
        let day3 = standup(user, team, day(3)).with_in_progress(["fix bug A", "write docs"]);

        let candidates = rolling_candidates(&day3, &[day1], DEFAULT_LOOKBACK_DAYS);

        assert_eq!(descriptions(&candidates), vec!["fix bug a"]);
        assert_eq!(candidates[0].prior_mentions, 1);

        let mutation = decide_mutation(&candidates[0], None, &day3, Utc::now());
        match mutation {
            LedgerMutation::Create(t) => {
                assert_eq!(t.occurrence_count, 2);
                assert_eq!(t.first_mentioned, day(2));
                assert_eq!(t.last_mentioned, day(3));
                assert_eq!(t.status, RollingTaskStatus::Active);
                assert_eq!(t.user_id, user);
                assert_eq!(t.team_id, team);
            }
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn completed_only_tasks_are_never_rolling() {
        let (user, team) = (UserId::new(), TeamId::new());
        let prior = standup(user, team, day(1)).with_completed(["ship release"]);
        let current = standup(user, team, day(2))
            .with_completed(["ship release"])
            .with_in_progress(["review pr"]);

        assert!(rolling_candidates(&current, &[prior], DEFAULT_LOOKBACK_DAYS).is_empty());
    }

    #[test]
    fn previously_open_task_now_completed_is_not_rolling() {
        let (user, team) = (UserId::new(), TeamId::new());
        let prior = standup(user, team, day(1)).with_in_progress(["ship release"]);
        let current = standup(user, team, day(2)).with_completed(["ship release"]);

        assert!(rolling_candidates(&current, &[prior], DEFAULT_LOOKBACK_DAYS).is_empty());
    }

    #[test]
    fn planned_and_in_progress_both_feed_detection() {
        let (user, team) = (UserId::new(), TeamId::new());
        let prior = standup(user, team, day(4)).with_planned(["Migrate DB"]);
        let current = standup(user, team, day(5)).with_in_progress(["  migrate db "]);

        let candidates = rolling_candidates(&current, &[prior], DEFAULT_LOOKBACK_DAYS);
        assert_eq!(descriptions(&candidates), vec!["migrate db"]);
    }

    #[test]
    fn history_outside_window_or_for_other_users_is_ignored() {
        let (user, team) = (UserId::new(), TeamId::new());
        let too_old = standup(user, team, day(1)).with_in_progress(["old task"]);
        let other_user = standup(UserId::new(), team, day(8)).with_in_progress(["shared task"]);
        let same_day = standup(user, team, day(9)).with_in_progress(["same day task"]);
        let current = standup(user, team, day(9)).with_in_progress([
            "old task",
            "shared task",
            "same day task",
        ]);

        let history = vec![too_old, other_user, same_day];
        assert!(rolling_candidates(&current, &history, DEFAULT_LOOKBACK_DAYS).is_empty());
    }

    #[test]
    fn current_standup_in_history_does_not_match_itself() {
        let (user, team) = (UserId::new(), TeamId::new());
        let current = standup(user, team, day(9)).with_in_progress(["task"]);
        let mut echoed = current.clone();
        echoed.date = day(8);

        assert!(rolling_candidates(&current, &[echoed], DEFAULT_LOOKBACK_DAYS).is_empty());
    }

    #[test]
    fn duplicate_open_entries_yield_one_candidate() {
        let (user, team) = (UserId::new(), TeamId::new());
        let prior = standup(user, team, day(1)).with_in_progress(["Task X"]);
        let current = standup(user, team, day(2))
            .with_in_progress(["task x"])
            .with_planned(["TASK X "]);

        let candidates = rolling_candidates(&current, &[prior], DEFAULT_LOOKBACK_DAYS);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn prior_mentions_count_every_open_mention() {
        let (user, team) = (UserId::new(), TeamId::new());
        let history = vec![
            standup(user, team, day(2)).with_in_progress(["task"]),
            standup(user, team, day(3)).with_planned(["task"]),
            standup(user, team, day(4)).with_in_progress(["Task"]),
        ];
        let current = standup(user, team, day(5)).with_in_progress(["task"]);

        let candidates = rolling_candidates(&current, &history, DEFAULT_LOOKBACK_DAYS);
        assert_eq!(candidates[0].prior_mentions, 3);

        let LedgerMutation::Create(t) = decide_mutation(&candidates[0], None, &current, Utc::now())
        else {
            panic!("expected create");
        };
        assert_eq!(t.occurrence_count, 4);
        assert_eq!(t.first_mentioned, day(2));
    }

    #[test]
    fn blank_entries_never_match() {
        let (user, team) = (UserId::new(), TeamId::new());
        let prior = standup(user, team, day(1)).with_in_progress(["", "   "]);
        let current = standup(user, team, day(2)).with_in_progress([" ", ""]);

        assert!(rolling_candidates(&current, &[prior], DEFAULT_LOOKBACK_DAYS).is_empty());
    }

    #[test]
    fn existing_record_gets_a_mention_not_a_new_record() {
        let (user, team) = (UserId::new(), TeamId::new());
        let current = standup(user, team, day(6)).with_in_progress(["task"]);
        let candidate = RollingCandidate {
            description: NormalizedTask::parse("task").unwrap(),
            prior_mentions: 1,
        };
        let existing = RollingTask {
            id: RollingTaskId::new(),
            team_id: team,
            user_id: user,
            task_description: "task".to_string(),
            first_mentioned: day(4),
            last_mentioned: day(5),
            occurrence_count: 2,
            status: RollingTaskStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert_eq!(
            decide_mutation(&candidate, Some(&existing), &current, Utc::now()),
            LedgerMutation::Mention {
                id: existing.id,
                date: day(6),
            }
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: with no prior standups nothing is rolling, whatever the tasks.
        #[test]
        fn empty_history_never_flags(
            in_progress in prop::collection::vec("[A-Za-z ]{0,12}", 0..6),
            planned in prop::collection::vec("[A-Za-z ]{0,12}", 0..6),
        ) {
            let current = standup(UserId::new(), TeamId::new(), day(15))
                .with_in_progress(in_progress)
                .with_planned(planned);
            prop_assert!(rolling_candidates(&current, &[], DEFAULT_LOOKBACK_DAYS).is_empty());
        }

        /// Property: every candidate is one of the current standup's open tasks.
        #[test]
        fn candidates_come_from_current_open_tasks(
            prior in prop::collection::vec("[a-c]{1,2}", 0..6),
            open in prop::collection::vec("[a-c]{1,2}", 0..6),
            done in prop::collection::vec("[a-c]{1,2}", 0..6),
        ) {
            let (user, team) = (UserId::new(), TeamId::new());
            let history = vec![standup(user, team, day(14)).with_in_progress(prior)];
            let current = standup(user, team, day(15))
                .with_in_progress(open.clone())
                .with_completed(done);

            let open_keys: HashSet<NormalizedTask> =
                open.iter().filter_map(|t| NormalizedTask::parse(t)).collect();
            for c in rolling_candidates(&current, &history, DEFAULT_LOOKBACK_DAYS) {
                prop_assert!(open_keys.contains(&c.description));
                prop_assert!(c.prior_mentions >= 1);
            }
        }
    }
}
