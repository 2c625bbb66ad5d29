use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Task lists extracted from a free-form standup transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedStandup {
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(default)]
    pub in_progress_tasks: Vec<String>,
    #[serde(default)]
    pub planned_tasks: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Error)]
pub enum AiError {
    #[error("invalid provider configuration: {0}")]
    Config(String),

    #[error("provider request failed: {0}")]
    Request(String),

    #[error("{provider} API error (status {status}): {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("empty response from {0}")]
    EmptyResponse(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        AiError::Request(err.to_string())
    }
}
