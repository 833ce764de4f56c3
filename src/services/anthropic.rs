use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;
use crate::models::TokenUsage;
use crate::services::llm::{LlmBackend, LlmRequest, LlmResponse};
use crate::services::openai::http_client;
use crate::services::prompts;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: &str) -> Self {
        AnthropicClient {
            http: http_client(),
            api_key,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl LlmBackend for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let prompt = prompts::render(request);
        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 4096,
            temperature: 0.1,
            system: prompt.system.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.user.clone(),
            }],
        };

        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let content = join_text(&body.content);
        if content.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        let usage = match body.usage {
            Some(usage) => TokenUsage::new(usage.input_tokens, usage.output_tokens),
            None => TokenUsage::estimate(&format!("{}{}", prompt.system, prompt.user), &content),
        };
        debug!(
            provider = "anthropic",
            variant = request.variant.name(),
            input_tokens = usage.input_tokens(),
            output_tokens = usage.output_tokens(),
            "messages usage"
        );

        Ok(LlmResponse { content, usage })
    }
}

fn join_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter(|block| block.block_type == "text")
        .map(|block| block.text.as_str())
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string()
}
