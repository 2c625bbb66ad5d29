//! Infrastructure layer: stores, broker adapters, configuration and the
//! analysis pipeline that ties them together.

pub mod analysis;
pub mod config;
pub mod dedup;
pub mod event_bus;
pub mod publisher;
pub mod store;
pub mod submission;
pub mod workers;

#[cfg(test)]
mod testing;

pub use analysis::{
    AnalysisConfig, AnalysisError, AnalysisOrchestrator, AnalysisSummary, DetectionOutcome,
    RollingTaskDetector, StandupAnalyzer,
};
pub use config::{AppConfig, BrokerConfig, ConfigError};
pub use dedup::{InMemoryProcessedSet, ProcessedSet};
pub use publisher::{AnalysisPublisher, PublishError};
pub use store::{
    InMemoryStore, PostgresStore, ReportStore, RollingTaskStore, StandupStore, StoreError,
};
pub use submission::{StandupSubmission, SubmitError, SubmitStandup};
pub use workers::{AnalysisWorker, Disposition, WorkerHandle, WorkerSettings, WorkerStats};
