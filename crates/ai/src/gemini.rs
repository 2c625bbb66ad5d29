use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scrumai_standups::Standup;

use crate::openai::build_client;
use crate::prompt::{
    detailed_insight_prompt, parse_structured_reply, transcript_prompt, INSIGHT_SYSTEM_PROMPT,
    TRANSCRIPT_SYSTEM_PROMPT,
};
use crate::provider::InsightProvider;
use crate::result::{AiError, ParsedStandup};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: GEMINI_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn generate(&self, system: &str, user: String) -> Result<String, AiError> {
        let req = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: system.to_string() }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: user }],
            }],
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let res = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&req)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(AiError::Api {
                provider: "gemini".to_string(),
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            });
        }

        let parsed: GenerateResponse = res.json().await?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| AiError::EmptyResponse("gemini".to_string()))
    }
}

#[async_trait]
impl InsightProvider for GeminiProvider {
    fn name(&self) -> String {
        format!("gemini:{}", self.model)
    }

    #[instrument(skip_all, fields(provider = "gemini", standup_id = %standup.id))]
    async fn generate_insight(&self, standup: &Standup) -> Result<String, AiError> {
        self.generate(INSIGHT_SYSTEM_PROMPT, detailed_insight_prompt(standup))
            .await
    }

    #[instrument(skip_all, fields(provider = "gemini"))]
    async fn parse_transcript(&self, raw: &str) -> Result<ParsedStandup, AiError> {
        let reply = self
            .generate(TRANSCRIPT_SYSTEM_PROMPT, transcript_prompt(raw))
            .await?;
        parse_structured_reply(&reply)
    }
}
