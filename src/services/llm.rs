use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{LlmProvider, Settings};
use crate::error::{ConfigError, ProviderError};
use crate::models::{PageType, TokenUsage};
use crate::services::anthropic::AnthropicClient;
use crate::services::openai::OpenAiClient;

/// Which prompt and output schema a call uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVariant {
    Classify,
    BillItems { strict: bool },
    PharmacyItems { strict: bool },
}

impl PromptVariant {
    pub fn for_page(page_type: PageType, strict: bool) -> Self {
        match page_type {
            PageType::Pharmacy => PromptVariant::PharmacyItems { strict },
            PageType::BillDetail | PageType::FinalBill | PageType::Unknown => {
                PromptVariant::BillItems { strict }
            }
        }
    }

    /// Whether the provider should be asked for a JSON object response.
    pub fn wants_json(self) -> bool {
        !matches!(self, PromptVariant::Classify)
    }

    pub fn name(self) -> &'static str {
        match self {
            PromptVariant::Classify => "classify",
            PromptVariant::BillItems { strict: false } => "bill_items",
            PromptVariant::BillItems { strict: true } => "bill_items_strict",
            PromptVariant::PharmacyItems { strict: false } => "pharmacy_items",
            PromptVariant::PharmacyItems { strict: true } => "pharmacy_items_strict",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub variant: PromptVariant,
    pub ocr_text: String,
}

impl LlmRequest {
    pub fn new(variant: PromptVariant, ocr_text: impl Into<String>) -> Self {
        LlmRequest {
            variant,
            ocr_text: ocr_text.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError>;
}

pub fn build_backend(settings: &Settings) -> Result<Arc<dyn LlmBackend>, ConfigError> {
    let backend: Arc<dyn LlmBackend> = match settings.llm_provider {
        LlmProvider::OpenAi => {
            let key = settings
                .openai_api_key
                .clone()
                .ok_or(ConfigError::MissingKey("OPENAI_API_KEY"))?;
            Arc::new(OpenAiClient::openai(
                key,
                &settings.openai_api_base,
                &settings.openai_model,
            ))
        }
        LlmProvider::Groq => {
            let key = settings
                .groq_api_key
                .clone()
                .ok_or(ConfigError::MissingKey("GROQ_API_KEY"))?;
            Arc::new(OpenAiClient::groq(key, &settings.groq_model))
        }
        LlmProvider::Anthropic => {
            let key = settings
                .anthropic_api_key
                .clone()
                .ok_or(ConfigError::MissingKey("ANTHROPIC_API_KEY"))?;
            Arc::new(AnthropicClient::new(key, &settings.anthropic_model))
        }
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_follows_page_type() {
        assert_eq!(
            PromptVariant::for_page(PageType::Pharmacy, false),
            PromptVariant::PharmacyItems { strict: false }
        );
        assert_eq!(
            PromptVariant::for_page(PageType::Unknown, true),
            PromptVariant::BillItems { strict: true }
        );
        assert_eq!(
            PromptVariant::for_page(PageType::FinalBill, true).name(),
            "bill_items_strict"
        );
        assert!(!PromptVariant::Classify.wants_json());
    }

    #[test]
    fn backend_needs_key_for_selected_provider() {
        let settings = Settings {
            llm_provider: LlmProvider::Anthropic,
            ..Settings::default()
        };
        assert!(matches!(
            build_backend(&settings),
            Err(ConfigError::MissingKey("ANTHROPIC_API_KEY"))
        ));

        let settings = Settings {
            llm_provider: LlmProvider::Groq,
            groq_api_key: Some("gsk-test".into()),
            ..Settings::default()
        };
        assert_eq!(build_backend(&settings).unwrap().name(), "groq");
    }
}
