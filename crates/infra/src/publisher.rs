use std::sync::Arc;

use tracing::instrument;

use scrumai_events::{AnalysisTrigger, BrokerError, MessagePublisher};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to encode trigger: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Emits analysis triggers after a standup is durably stored.
///
/// Callers log failures; publishing is a redundancy path and never aborts a
/// submission.
#[derive(Clone)]
pub struct AnalysisPublisher {
    broker: Arc<dyn MessagePublisher>,
}

impl AnalysisPublisher {
    pub fn new(broker: Arc<dyn MessagePublisher>) -> Self {
        Self { broker }
    }

    #[instrument(
        skip(self, trigger),
        fields(standup_id = %trigger.standup_id, user_id = %trigger.user_id),
        err
    )]
    pub async fn publish(&self, trigger: &AnalysisTrigger) -> Result<(), PublishError> {
        let body = trigger.encode()?;
        self.broker.publish(body).await?;
        Ok(())
    }
}
