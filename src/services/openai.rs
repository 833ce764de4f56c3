use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::ProviderError;
use crate::models::TokenUsage;
use crate::services::llm::{LlmBackend, LlmRequest, LlmResponse};
use crate::services::prompts::{self, RenderedPrompt};

const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Chat-completions client for OpenAI and OpenAI-compatible providers (Groq).
pub struct OpenAiClient {
    http: reqwest::Client,
    name: &'static str,
    api_key: String,
    base_url: String,
    model: String,
    json_mode: bool,
}

impl OpenAiClient {
    pub fn openai(api_key: String, base_url: &str, model: &str) -> Self {
        Self::with_base("openai", api_key, base_url, model, true)
    }

    pub fn groq(api_key: String, model: &str) -> Self {
        Self::with_base("groq", api_key, GROQ_API_BASE, model, false)
    }

    fn with_base(
        name: &'static str,
        api_key: String,
        base_url: &str,
        model: &str,
        json_mode: bool,
    ) -> Self {
        OpenAiClient {
            http: http_client(),
            name,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            json_mode,
        }
    }

    fn build_request(&self, prompt: &RenderedPrompt, wants_json: bool) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            temperature: 0.1,
            max_tokens: 4096,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            response_format: (self.json_mode && wants_json).then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[async_trait]
impl LlmBackend for OpenAiClient {
    fn name(&self) -> &str {
        self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let prompt = prompts::render(request);
        let body = self.build_request(&prompt, request.variant.wants_json());

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ProviderError::EmptyResponse)?;

        let usage = match body.usage {
            Some(usage) => TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
            None => TokenUsage::estimate(&format!("{}{}", prompt.system, prompt.user), &content),
        };
        debug!(
            provider = self.name,
            variant = request.variant.name(),
            prompt_chars = prompt.combined_len(),
            input_tokens = usage.input_tokens(),
            output_tokens = usage.output_tokens(),
            "chat completion usage"
        );

        Ok(LlmResponse { content, usage })
    }
}
