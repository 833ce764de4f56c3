use thiserror::Error;

/// Failure talking to an LLM provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("provider response had no content")]
    EmptyResponse,
    #[error("could not decode provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Rate limits, server errors, timeouts and dropped connections are worth
    /// another attempt; everything else fails the same way twice.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(err) => {
                err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
            }
            ProviderError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            ProviderError::Unavailable(_) | ProviderError::EmptyResponse => true,
            ProviderError::Decode(_) => false,
        }
    }
}

/// Failure turning one page's LLM answer into candidate items.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response does not match the {schema} schema: {detail}")]
    Schema { schema: &'static str, detail: String },
}

/// Failure producing page text for a whole document. The only failure that
/// turns a request into `is_success: false`.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("could not download document: {0}")]
    Download(#[from] reqwest::Error),
    #[error("document server returned {0}")]
    Status(u16),
    #[error("could not read document: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported document format")]
    UnsupportedFormat,
    #[error("document produced no pages")]
    NoPages,
    #[error("PDF text extraction failed: {0}")]
    Pdf(String),
    #[error("OCR failed: {0}")]
    Ocr(String),
    #[error("image documents need the `ocr` feature")]
    OcrUnavailable,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("unknown LLM provider {0:?} (expected groq, openai or anthropic)")]
    UnknownProvider(String),
    #[error("{0} is not set")]
    MissingKey(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        let status = |status| ProviderError::Status {
            status,
            body: String::new(),
        };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(ProviderError::Unavailable("busy".into()).is_transient());
        assert!(!ProviderError::Decode("bad".into()).is_transient());
    }
}
