//! Long-running background workers.

pub mod analysis_worker;

pub use analysis_worker::{AnalysisWorker, Disposition, WorkerHandle, WorkerSettings, WorkerStats};
