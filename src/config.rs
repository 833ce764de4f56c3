use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Groq,
    OpenAi,
    Anthropic,
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(LlmProvider::Groq),
            "openai" => Ok(LlmProvider::OpenAi),
            "anthropic" => Ok(LlmProvider::Anthropic),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub llm_provider: LlmProvider,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_api_base: String,
    pub groq_api_key: Option<String>,
    pub groq_model: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub ocr_language: String,
    pub api_host: String,
    pub api_port: u16,
    pub max_concurrent_pages: usize,
    pub request_timeout: Duration,
    pub llm_max_retries: usize,
    pub amount_tolerance: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            llm_provider: LlmProvider::Groq,
            openai_api_key: None,
            openai_model: "gpt-4o".to_string(),
            openai_api_base: "https://api.openai.com/v1".to_string(),
            groq_api_key: None,
            groq_model: "groq/compound".to_string(),
            anthropic_api_key: None,
            anthropic_model: "claude-3-opus-20240229".to_string(),
            ocr_language: "eng".to_string(),
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            max_concurrent_pages: 4,
            request_timeout: Duration::from_secs(300),
            llm_max_retries: 3,
            amount_tolerance: 0.01,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; unset or blank keys keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut settings = Settings::default();

        if let Some(value) = get("LLM_PROVIDER") {
            settings.llm_provider = value.parse()?;
        }
        settings.openai_api_key = get("OPENAI_API_KEY");
        settings.groq_api_key = get("GROQ_API_KEY");
        settings.anthropic_api_key = get("ANTHROPIC_API_KEY");
        if let Some(value) = get("OPENAI_MODEL") {
            settings.openai_model = value;
        }
        if let Some(value) = get("OPENAI_API_BASE") {
            settings.openai_api_base = value.trim_end_matches('/').to_string();
        }
        if let Some(value) = get("GROQ_MODEL") {
            settings.groq_model = value;
        }
        if let Some(value) = get("ANTHROPIC_MODEL") {
            settings.anthropic_model = value;
        }
        if let Some(value) = get("OCR_LANGUAGE") {
            settings.ocr_language = value;
        }
        if let Some(value) = get("API_HOST") {
            settings.api_host = value;
        }
        if let Some(value) = get("API_PORT") {
            settings.api_port = parse_number("API_PORT", &value)?;
        }
        if let Some(value) = get("MAX_CONCURRENT_PAGES") {
            let pages: usize = parse_number("MAX_CONCURRENT_PAGES", &value)?;
            if pages == 0 {
                return Err(ConfigError::Invalid {
                    key: "MAX_CONCURRENT_PAGES",
                    value,
                });
            }
            settings.max_concurrent_pages = pages;
        }
        if let Some(value) = get("REQUEST_TIMEOUT_SECS") {
            settings.request_timeout =
                Duration::from_secs(parse_number("REQUEST_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = get("LLM_MAX_RETRIES") {
            settings.llm_max_retries = parse_number("LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = get("AMOUNT_TOLERANCE") {
            let tolerance: f64 = parse_number("AMOUNT_TOLERANCE", &value)?;
            if !(0.0..1.0).contains(&tolerance) {
                return Err(ConfigError::Invalid {
                    key: "AMOUNT_TOLERANCE",
                    value,
                });
            }
            settings.amount_tolerance = tolerance;
        }

        Ok(settings)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}
