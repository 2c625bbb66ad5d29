use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scrumai_standups::Standup;

use crate::prompt::{
    compact_insight_prompt, detailed_insight_prompt, parse_structured_reply, transcript_prompt,
    INSIGHT_SYSTEM_PROMPT, TRANSCRIPT_SYSTEM_PROMPT,
};
use crate::provider::InsightProvider;
use crate::result::{AiError, ParsedStandup};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const FREELLM_BASE_URL: &str = "https://api.llm7.io/v1";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    OpenAi,
    FreeLlm,
}

/// Client for any endpoint speaking the OpenAI chat-completions dialect.
#[derive(Debug, Clone)]
pub struct OpenAiCompatible {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    flavor: Flavor,
}

impl OpenAiCompatible {
    pub fn openai(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key: Some(api_key.into()),
            model: model.into(),
            flavor: Flavor::OpenAi,
        })
    }

    /// Keyless community endpoint; smaller models get the compact prompt.
    pub fn freellm(model: impl Into<String>, timeout: Duration) -> Result<Self, AiError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: FREELLM_BASE_URL.to_string(),
            api_key: None,
            model: model.into(),
            flavor: Flavor::FreeLlm,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn provider_label(&self) -> &'static str {
        match self.flavor {
            Flavor::OpenAi => "openai",
            Flavor::FreeLlm => "freellm",
        }
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        json_mode: bool,
    ) -> Result<String, AiError> {
        let req = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            response_format: json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(url).json(&req);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(AiError::Api {
                provider: self.provider_label().to_string(),
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            });
        }

        let parsed: ChatResponse = res.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AiError::EmptyResponse(self.provider_label().to_string()))
    }
}

#[async_trait]
impl InsightProvider for OpenAiCompatible {
    fn name(&self) -> String {
        format!("{}:{}", self.provider_label(), self.model)
    }

    #[instrument(skip_all, fields(provider = self.provider_label(), standup_id = %standup.id))]
    async fn generate_insight(&self, standup: &Standup) -> Result<String, AiError> {
        let prompt = match self.flavor {
            Flavor::OpenAi => detailed_insight_prompt(standup),
            Flavor::FreeLlm => compact_insight_prompt(standup),
        };
        self.complete(INSIGHT_SYSTEM_PROMPT, &prompt, false).await
    }

    #[instrument(skip_all, fields(provider = self.provider_label()))]
    async fn parse_transcript(&self, raw: &str) -> Result<ParsedStandup, AiError> {
        let json_mode = self.flavor == Flavor::OpenAi;
        let reply = self
            .complete(TRANSCRIPT_SYSTEM_PROMPT, &transcript_prompt(raw), json_mode)
            .await?;
        parse_structured_reply(&reply)
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<Client, AiError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AiError::Config(format!("http client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_carry_flavor_and_model() {
        let openai =
            OpenAiCompatible::openai("sk-test", "gpt-4o", None, Duration::from_secs(5)).unwrap();
        assert_eq!(openai.name(), "openai:gpt-4o");
        assert_eq!(openai.base_url, OPENAI_BASE_URL);

        let free = OpenAiCompatible::freellm("meta-llama-3-8b-instruct", Duration::from_secs(5))
            .unwrap();
        assert_eq!(free.name(), "freellm:meta-llama-3-8b-instruct");
        assert!(free.api_key.is_none());
    }

    #[test]
    fn request_omits_response_format_unless_json_mode() {
        let req = ChatRequest {
            model: "m",
            messages: vec![ChatMessage { role: "user", content: "hi" }],
            response_format: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("response_format").is_none());

        let req = ChatRequest {
            response_format: Some(ResponseFormat { kind: "json_object" }),
            ..req
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn response_tolerates_null_content() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
