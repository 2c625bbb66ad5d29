//! Task description normalization.

use serde::{Deserialize, Serialize};

/// A task description reduced to its comparison key: surrounding whitespace
/// trimmed, case folded. Never empty.
///
/// No other normalization is applied; "fix bug A" and "fixing bug A" remain
/// different tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedTask(String);

impl NormalizedTask {
    /// Normalize a raw task string. Empty or whitespace-only input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for NormalizedTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
