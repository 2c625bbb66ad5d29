//! Analysis trigger wire format.
//!
//! ```json
//! { "standup_id": "<uuid>", "user_id": "<uuid>", "team_id": "<uuid>" }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use scrumai_core::{StandupId, TeamId, UserId};

/// Queue payload identifying a standup that needs analysis.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisTrigger {
    pub standup_id: StandupId,
    pub user_id: UserId,
    pub team_id: TeamId,
}

#[derive(Debug, Error)]
#[error("malformed analysis trigger: {0}")]
pub struct TriggerDecodeError(#[from] serde_json::Error);

impl AnalysisTrigger {
    pub fn new(standup_id: StandupId, user_id: UserId, team_id: TeamId) -> Self {
        Self {
            standup_id,
            user_id,
            team_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a message body. Any failure here is permanent for that message.
    pub fn decode(body: &[u8]) -> Result<Self, TriggerDecodeError> {
        Ok(serde_json::from_slice(body)?)
    }
}
