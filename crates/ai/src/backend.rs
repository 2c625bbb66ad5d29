use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use scrumai_standups::Standup;

use crate::gemini::GeminiProvider;
use crate::huggingface::HuggingFaceProvider;
use crate::mock::MockProvider;
use crate::openai::OpenAiCompatible;
use crate::provider::InsightProvider;
use crate::result::{AiError, ParsedStandup};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_FREELLM_MODEL: &str = "meta-llama-3-8b-instruct";
pub const DEFAULT_HUGGINGFACE_MODEL: &str = "google/gemma-2b-it";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    OpenAi,
    FreeLlm,
    Gemini,
    HuggingFace,
    #[default]
    Mock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::FreeLlm => "freellm",
            ProviderKind::Gemini => "gemini",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "freellm" => Ok(ProviderKind::FreeLlm),
            "gemini" => Ok(ProviderKind::Gemini),
            "huggingface" => Ok(ProviderKind::HuggingFace),
            "mock" | "" => Ok(ProviderKind::Mock),
            other => Err(AiError::Config(format!("unknown AI provider `{other}`"))),
        }
    }
}

/// Provider selection and credentials, usually read from the environment.
#[derive(Debug, Clone)]
pub struct AiSettings {
    pub provider: ProviderKind,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub freellm_model: String,
    pub huggingface_api_key: Option<String>,
    pub huggingface_model: String,
    pub request_timeout: Duration,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Mock,
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_base_url: None,
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            freellm_model: DEFAULT_FREELLM_MODEL.to_string(),
            huggingface_api_key: None,
            huggingface_model: DEFAULT_HUGGINGFACE_MODEL.to_string(),
            request_timeout: Duration::from_secs(90),
        }
    }
}

/// The configured provider, chosen once at startup.
#[derive(Debug)]
pub enum InsightBackend {
    OpenAi(OpenAiCompatible),
    FreeLlm(OpenAiCompatible),
    Gemini(GeminiProvider),
    HuggingFace(HuggingFaceProvider),
    Mock(MockProvider),
}

impl InsightBackend {
    pub fn from_settings(settings: &AiSettings) -> Result<Self, AiError> {
        let timeout = settings.request_timeout;
        match settings.provider {
            ProviderKind::OpenAi => {
                let key = required(&settings.openai_api_key, "OPENAI_API_KEY")?;
                Ok(InsightBackend::OpenAi(OpenAiCompatible::openai(
                    key,
                    settings.openai_model.clone(),
                    settings.openai_base_url.clone(),
                    timeout,
                )?))
            }
            ProviderKind::FreeLlm => Ok(InsightBackend::FreeLlm(OpenAiCompatible::freellm(
                settings.freellm_model.clone(),
                timeout,
            )?)),
            ProviderKind::Gemini => {
                let key = required(&settings.gemini_api_key, "GEMINI_API_KEY")?;
                Ok(InsightBackend::Gemini(GeminiProvider::new(
                    key,
                    settings.gemini_model.clone(),
                    timeout,
                )?))
            }
            ProviderKind::HuggingFace => Ok(InsightBackend::HuggingFace(
                HuggingFaceProvider::new(
                    settings.huggingface_api_key.clone(),
                    settings.huggingface_model.clone(),
                    timeout,
                )?,
            )),
            ProviderKind::Mock => Ok(InsightBackend::Mock(MockProvider::new())),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            InsightBackend::OpenAi(_) => ProviderKind::OpenAi,
            InsightBackend::FreeLlm(_) => ProviderKind::FreeLlm,
            InsightBackend::Gemini(_) => ProviderKind::Gemini,
            InsightBackend::HuggingFace(_) => ProviderKind::HuggingFace,
            InsightBackend::Mock(_) => ProviderKind::Mock,
        }
    }

    fn inner(&self) -> &dyn InsightProvider {
        match self {
            InsightBackend::OpenAi(p) | InsightBackend::FreeLlm(p) => p,
            InsightBackend::Gemini(p) => p,
            InsightBackend::HuggingFace(p) => p,
            InsightBackend::Mock(p) => p,
        }
    }
}

#[async_trait]
impl InsightProvider for InsightBackend {
    fn name(&self) -> String {
        self.inner().name()
    }

    async fn generate_insight(&self, standup: &Standup) -> Result<String, AiError> {
        self.inner().generate_insight(standup).await
    }

    async fn parse_transcript(&self, raw: &str) -> Result<ParsedStandup, AiError> {
        self.inner().parse_transcript(raw).await
    }
}

fn required<'a>(value: &'a Option<String>, var: &str) -> Result<&'a str, AiError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AiError::Config(format!("{var} is required for this provider")))
}
