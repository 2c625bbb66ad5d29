//! Standup domain module.
//!
//! Business rules for standups and the rolling-task ledger, implemented as
//! deterministic domain logic (no IO, no messaging, no storage).

pub mod detector;
pub mod report;
pub mod rolling_task;
pub mod standup;
pub mod task;

pub use detector::{
    DEFAULT_LOOKBACK_DAYS, LedgerMutation, LookbackWindow, RollingCandidate, decide_mutation,
    rolling_candidates,
};
pub use report::{AnalysisReport, ReportKind};
pub use rolling_task::{RollingTask, RollingTaskStatus};
pub use standup::Standup;
pub use task::NormalizedTask;
