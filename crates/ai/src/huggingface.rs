use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scrumai_standups::Standup;

use crate::openai::build_client;
use crate::prompt::{compact_insight_prompt, parse_structured_reply, transcript_prompt};
use crate::provider::InsightProvider;
use crate::result::{AiError, ParsedStandup};

pub const HUGGINGFACE_BASE_URL: &str = "https://router.huggingface.co/models";

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: Parameters,
}

#[derive(Serialize)]
struct Parameters {
    max_new_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct Generation {
    #[serde(default)]
    generated_text: String,
}

/// Text-generation inference on the Hugging Face router.
///
/// Instruction models answer with the prompt echoed in front of the
/// completion; the echo is stripped before the text is returned.
#[derive(Debug, Clone)]
pub struct HuggingFaceProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HuggingFaceProvider {
    /// Without a key, requests go out anonymously.
    pub fn new(
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: HUGGINGFACE_BASE_URL.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn generate(&self, prompt: &str, parameters: Parameters) -> Result<String, AiError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), self.model);
        let mut req = self.client.post(url).json(&InferenceRequest {
            inputs: prompt,
            parameters,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(AiError::Api {
                provider: "huggingface".to_string(),
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            });
        }

        let generations: Vec<Generation> = res.json().await?;
        generations
            .into_iter()
            .next()
            .map(|g| strip_echo(&g.generated_text, prompt).to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AiError::EmptyResponse("huggingface".to_string()))
    }
}

/// `[INST]`-wrapped prompt for instruction-tuned models.
fn instruct(prompt: &str) -> String {
    format!("[INST] {} [/INST]", prompt.trim_end())
}

fn strip_echo<'a>(generated: &'a str, prompt: &str) -> &'a str {
    generated.strip_prefix(prompt).unwrap_or(generated).trim()
}

#[async_trait]
impl InsightProvider for HuggingFaceProvider {
    fn name(&self) -> String {
        format!("huggingface:{}", self.model)
    }

    #[instrument(skip_all, fields(provider = "huggingface", standup_id = %standup.id))]
    async fn generate_insight(&self, standup: &Standup) -> Result<String, AiError> {
        let prompt = instruct(&compact_insight_prompt(standup));
        self.generate(
            &prompt,
            Parameters {
                max_new_tokens: 500,
                temperature: 0.7,
            },
        )
        .await
    }

    #[instrument(skip_all, fields(provider = "huggingface"))]
    async fn parse_transcript(&self, raw: &str) -> Result<ParsedStandup, AiError> {
        let prompt = instruct(&transcript_prompt(raw));
        let reply = self
            .generate(
                &prompt,
                Parameters {
                    max_new_tokens: 800,
                    temperature: 0.1,
                },
            )
            .await?;
        parse_structured_reply(&reply)
    }
}
