use async_trait::async_trait;

use scrumai_standups::Standup;

use crate::result::{AiError, ParsedStandup};

/// External text-generation capability.
///
/// Implementations may block on network I/O; callers bound each call with
/// their own timeout and treat expiry as a provider failure.
#[async_trait]
pub trait InsightProvider: Send + Sync {
    /// Short identity recorded with generated reports (e.g. `openai:gpt-4o`).
    fn name(&self) -> String;

    /// Free-text commentary about one standup.
    async fn generate_insight(&self, standup: &Standup) -> Result<String, AiError>;

    /// Extract task lists from a raw transcript. Optional capability.
    async fn parse_transcript(&self, _raw: &str) -> Result<ParsedStandup, AiError> {
        Err(AiError::Unsupported("transcript parsing"))
    }
}
