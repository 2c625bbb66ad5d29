//! The analysis pipeline: rolling-task detection, insight generation and
//! report persistence for one standup at a time.

pub mod detector;
pub mod orchestrator;

pub use detector::{DetectionOutcome, RollingTaskDetector};
pub use orchestrator::{
    AnalysisConfig, AnalysisError, AnalysisOrchestrator, AnalysisSummary, StandupAnalyzer,
};
