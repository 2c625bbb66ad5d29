//! Process configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use scrumai_ai::{AiSettings, ProviderKind};
use scrumai_standups::DEFAULT_LOOKBACK_DAYS;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/scrumai";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_ANALYSIS_STREAM: &str = "scrumai:standup_analysis";
pub const DEFAULT_ANALYSIS_DLQ: &str = "scrumai:standup_analysis:dlq";
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;
pub const DEFAULT_INSIGHT_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_POLL_MS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: `{value}` ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Provider(String),
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub redis_url: String,
    pub stream: String,
    pub group: String,
    pub dead_letter_stream: String,
    pub consumer_name: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub broker: BrokerConfig,
    /// `0` disables the dead-letter cap.
    pub max_deliveries: u32,
    /// `None` disables redelivery dedup.
    pub dedup_ttl: Option<Duration>,
    pub lookback_days: u32,
    pub insight_timeout: Duration,
    pub poll_interval: Duration,
    pub ai: AiSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let text = |var: &str, default: &str| get(var).unwrap_or_else(|| default.to_string());

        let insight_timeout = Duration::from_secs(parse_or(
            &get,
            "INSIGHT_TIMEOUT_SECS",
            DEFAULT_INSIGHT_TIMEOUT_SECS,
        )?);
        if insight_timeout.is_zero() {
            return Err(invalid("INSIGHT_TIMEOUT_SECS", "0", "must be positive"));
        }

        let poll_ms: u64 = parse_or(&get, "WORKER_POLL_MS", DEFAULT_POLL_MS)?;
        if poll_ms == 0 {
            return Err(invalid("WORKER_POLL_MS", "0", "must be positive"));
        }

        let dedup_ttl = match get("ANALYSIS_DEDUP_TTL_SECS") {
            None => None,
            Some(raw) => {
                let secs: u64 = parse_value("ANALYSIS_DEDUP_TTL_SECS", &raw)?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
        };

        let provider = match get("AI_PROVIDER") {
            None => ProviderKind::Mock,
            Some(raw) => ProviderKind::from_str(&raw).map_err(|e| ConfigError::Provider(e.to_string()))?,
        };

        let defaults = AiSettings::default();
        let ai = AiSettings {
            provider,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: text("OPENAI_MODEL", &defaults.openai_model),
            openai_base_url: get("OPENAI_BASE_URL"),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: text("GEMINI_MODEL", &defaults.gemini_model),
            freellm_model: text("FREELLM_MODEL", &defaults.freellm_model),
            huggingface_api_key: get("HUGGINGFACE_API_KEY"),
            huggingface_model: text("HUGGINGFACE_MODEL", &defaults.huggingface_model),
            request_timeout: insight_timeout,
        };
        let missing_key = match ai.provider {
            ProviderKind::OpenAi if ai.openai_api_key.is_none() => Some("OPENAI_API_KEY"),
            ProviderKind::Gemini if ai.gemini_api_key.is_none() => Some("GEMINI_API_KEY"),
            _ => None,
        };
        if let Some(var) = missing_key {
            return Err(ConfigError::Provider(format!(
                "{var} is required when AI_PROVIDER={}",
                ai.provider
            )));
        }

        Ok(Self {
            database_url: text("DATABASE_URL", DEFAULT_DATABASE_URL),
            broker: BrokerConfig {
                redis_url: text("REDIS_URL", DEFAULT_REDIS_URL),
                stream: text("ANALYSIS_STREAM", DEFAULT_ANALYSIS_STREAM),
                group: text("ANALYSIS_GROUP", scrumai_events::ANALYSIS_QUEUE),
                dead_letter_stream: text("ANALYSIS_DLQ", DEFAULT_ANALYSIS_DLQ),
                consumer_name: get("WORKER_NAME")
                    .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::now_v7())),
            },
            max_deliveries: parse_or(&get, "ANALYSIS_MAX_DELIVERIES", DEFAULT_MAX_DELIVERIES)?,
            dedup_ttl,
            lookback_days: parse_or(&get, "ANALYSIS_LOOKBACK_DAYS", DEFAULT_LOOKBACK_DAYS)?,
            insight_timeout,
            poll_interval: Duration::from_millis(poll_ms),
            ai,
        })
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => parse_value(var, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| invalid(var, raw, &e.to_string()))
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
