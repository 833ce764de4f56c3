use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Settings;
use crate::models::{
    Diagnostic, DiagnosticCode, ExtractionResult, PageResult, PageText, TokenUsage,
};
use crate::services::aggregator::Aggregator;
use crate::services::classifier::PageClassifier;
use crate::services::extractor::LineItemExtractor;
use crate::services::ledger::UsageLedger;
use crate::services::llm::LlmBackend;
use crate::services::retry::RetryPolicy;
use crate::services::text_extraction::PageSource;
use crate::services::validator::Validator;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_concurrent_pages: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub amount_tolerance: f64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            max_concurrent_pages: 4,
            request_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            amount_tolerance: 0.01,
        }
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        PipelineOptions {
            max_concurrent_pages: settings.max_concurrent_pages,
            request_timeout: settings.request_timeout,
            retry: RetryPolicy::with_max_retries(settings.llm_max_retries),
            amount_tolerance: settings.amount_tolerance,
        }
    }
}

struct PageOutcome {
    page: PageResult,
    diagnostics: Vec<Diagnostic>,
}

/// Classify, extract and validate every page of a document, then aggregate.
///
/// A pipeline holds no per-request state and can serve any number of runs
/// at once; each run gets its own usage ledger.
pub struct Pipeline {
    backend: Arc<dyn LlmBackend>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(backend: Arc<dyn LlmBackend>, options: PipelineOptions) -> Self {
        Pipeline { backend, options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub async fn run(&self, pages: Vec<PageText>) -> ExtractionResult {
        let span = info_span!("extraction", run_id = %Uuid::new_v4(), pages = pages.len());
        self.run_pages(pages).instrument(span).await
    }

    /// Loads the document through `source` and runs it. Any document-level
    /// failure becomes an unsuccessful result rather than an error.
    pub async fn extract_document(&self, source: &dyn PageSource, document: &str) -> ExtractionResult {
        let span = info_span!("extraction", run_id = %Uuid::new_v4(), document);
        async move {
            match source.pages(document).await {
                Ok(pages) => self.run_pages(pages).await,
                Err(err) => {
                    error!(error = %err, "document could not be turned into pages");
                    ExtractionResult::failure(
                        TokenUsage::default(),
                        Diagnostic::new(DiagnosticCode::DocumentFailure, err.to_string()),
                    )
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_pages(&self, mut pages: Vec<PageText>) -> ExtractionResult {
        if pages.is_empty() {
            error!("document has no pages");
            return ExtractionResult::failure(
                TokenUsage::default(),
                Diagnostic::new(DiagnosticCode::DocumentFailure, "document produced no pages"),
            );
        }

        pages.sort_by_key(|page| page.page_no);
        let mut diagnostics = numbering_diagnostics(&pages);

        let ledger = UsageLedger::new();
        let limit = self.options.max_concurrent_pages.max(1);
        info!(pages = pages.len(), concurrency = limit, "starting extraction");

        // Futures are lazy; buffer_unordered starts at most `limit` at a time.
        let page_futures: Vec<_> = pages
            .iter()
            .map(|page| self.process_page(page, &ledger))
            .collect();
        let work = stream::iter(page_futures)
            .buffer_unordered(limit)
            .collect::<Vec<PageOutcome>>();

        let mut outcomes = match timeout(self.options.request_timeout, work).await {
            Ok(outcomes) => outcomes,
            Err(_) => {
                let usage = ledger.total();
                error!(
                    timeout_secs = self.options.request_timeout.as_secs_f64(),
                    calls = ledger.call_count(),
                    total_tokens = usage.total_tokens(),
                    "extraction timed out; partial results discarded"
                );
                return ExtractionResult::failure(
                    usage,
                    Diagnostic::new(
                        DiagnosticCode::Timeout,
                        format!(
                            "extraction did not finish within {:?}",
                            self.options.request_timeout
                        ),
                    ),
                );
            }
        };

        outcomes.sort_by_key(|outcome| outcome.page.page_no());
        let mut page_results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            diagnostics.extend(outcome.diagnostics);
            page_results.push(outcome.page);
        }

        let aggregated = Aggregator::new(self.options.amount_tolerance).aggregate(page_results);
        diagnostics.extend(aggregated.diagnostics);

        let usage = ledger.total();
        info!(
            items = aggregated.data.total_item_count(),
            calls = ledger.call_count(),
            input_tokens = usage.input_tokens(),
            output_tokens = usage.output_tokens(),
            total_tokens = usage.total_tokens(),
            diagnostics = diagnostics.len(),
            "extraction finished"
        );
        ExtractionResult::success(aggregated.data, usage, diagnostics)
    }

    async fn process_page(&self, page: &PageText, ledger: &UsageLedger) -> PageOutcome {
        let page_no = page.page_no;
        let backend = self.backend.as_ref();
        let retry = &self.options.retry;

        let classification = PageClassifier::new(backend, retry).classify(&page.text).await;
        if let Some(usage) = classification.usage {
            ledger.record(usage);
        }
        let page_type = classification.page_type;
        let mut diagnostics: Vec<Diagnostic> = classification
            .diagnostics
            .into_iter()
            .map(|d| d.on_page(page_no))
            .collect();

        if page.text.trim().is_empty() {
            info!(page_no, "blank page skipped");
            diagnostics.push(Diagnostic::new(DiagnosticCode::EmptyPage, "page has no text").on_page(page_no));
            return PageOutcome {
                page: PageResult::empty(page_no, page_type),
                diagnostics,
            };
        }

        let extraction = LineItemExtractor::new(backend, retry)
            .extract(&page.text, page_type)
            .await;
        for usage in &extraction.usage {
            ledger.record(*usage);
        }
        diagnostics.extend(extraction.diagnostics.into_iter().map(|d| d.on_page(page_no)));

        let validated = Validator::new(self.options.amount_tolerance).validate(
            page_no,
            &extraction.candidates,
            extraction.candidate_subtotal,
        );
        diagnostics.extend(validated.diagnostics);

        info!(
            page_no,
            %page_type,
            candidates = extraction.candidates.len(),
            items = validated.bill_items.len(),
            "page processed"
        );
        PageOutcome {
            page: PageResult::new(page_no, page_type, validated.bill_items, validated.page_subtotal),
            diagnostics,
        }
    }
}

/// Page numbers are expected to run 1..=N without gaps or repeats. Anything
/// else is processed as given and reported.
fn numbering_diagnostics(sorted: &[PageText]) -> Vec<Diagnostic> {
    let contiguous = sorted
        .iter()
        .enumerate()
        .all(|(index, page)| page.page_no as usize == index + 1);
    if contiguous {
        return Vec::new();
    }
    let numbers: Vec<u32> = sorted.iter().map(|page| page.page_no).collect();
    warn!(?numbers, "page numbers are not contiguous from 1");
    vec![Diagnostic::new(
        DiagnosticCode::PageNumbering,
        format!("expected pages 1..={}, got {:?}", sorted.len(), numbers),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DocumentError, ProviderError};
    use crate::services::llm::{LlmRequest, LlmResponse, PromptVariant};
    use async_trait::async_trait;

    /// Answers every extraction call with the same item list.
    struct FixedItems(&'static str);

    #[async_trait]
    impl LlmBackend for FixedItems {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
            let content = match request.variant {
                PromptVariant::Classify => "Bill Detail".to_string(),
                _ => self.0.to_string(),
            };
            Ok(LlmResponse {
                content,
                usage: TokenUsage::new(50, 5),
            })
        }
    }

    struct Unreadable;

    #[async_trait]
    impl PageSource for Unreadable {
        async fn pages(&self, _document: &str) -> Result<Vec<PageText>, DocumentError> {
            Err(DocumentError::UnsupportedFormat)
        }
    }

    fn pipeline(reply: &'static str) -> Pipeline {
        Pipeline::new(
            Arc::new(FixedItems(reply)),
            PipelineOptions {
                retry: RetryPolicy::immediate(0),
                ..PipelineOptions::default()
            },
        )
    }

    const ONE_ITEM: &str = r#"{"bill_items": [{"item_name": "ECG", "item_amount": 300, "item_rate": 300, "item_quantity": 1}]}"#;

    #[tokio::test]
    async fn no_pages_is_a_document_failure() {
        let result = pipeline(ONE_ITEM).run(Vec::new()).await;
        assert!(!result.is_success);
        assert!(result.has_diagnostic(DiagnosticCode::DocumentFailure));
        assert_eq!(result.token_usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn unreadable_document_is_a_document_failure() {
        let result = pipeline(ONE_ITEM).extract_document(&Unreadable, "x.doc").await;
        assert!(!result.is_success);
        assert_eq!(result.data.total_item_count(), 0);
        assert!(result.has_diagnostic(DiagnosticCode::DocumentFailure));
    }

    #[tokio::test]
    async fn gaps_in_page_numbers_are_reported() {
        let result = pipeline(ONE_ITEM)
            .run(vec![
                PageText::new(3, "ECG 300"),
                PageText::new(1, "ECG 300"),
            ])
            .await;
        assert!(result.is_success);
        assert!(result.has_diagnostic(DiagnosticCode::PageNumbering));
        let order: Vec<u32> = result
            .data
            .pagewise_line_items()
            .iter()
            .map(PageResult::page_no)
            .collect();
        assert_eq!(order, vec![1, 3]);
    }

    #[tokio::test]
    async fn usage_covers_every_call() {
        // Two pages: one classify and one extract call each.
        let result = pipeline(ONE_ITEM)
            .run(vec![PageText::new(1, "ECG 300"), PageText::new(2, "ECG 300")])
            .await;
        assert_eq!(result.token_usage, TokenUsage::new(200, 20));
        assert_eq!(result.data.total_item_count(), 2);
    }

    #[test]
    fn options_follow_settings() {
        let settings = Settings {
            max_concurrent_pages: 8,
            llm_max_retries: 1,
            amount_tolerance: 0.5,
            ..Settings::default()
        };
        let options = PipelineOptions::from_settings(&settings);
        assert_eq!(options.max_concurrent_pages, 8);
        assert_eq!(options.retry.max_retries, 1);
        assert_eq!(options.amount_tolerance, 0.5);
    }
}
