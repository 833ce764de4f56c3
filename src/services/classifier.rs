use tracing::{debug, warn};

use crate::models::{Diagnostic, DiagnosticCode, PageType, TokenUsage};
use crate::services::llm::{LlmBackend, LlmRequest, PromptVariant};
use crate::services::retry::RetryPolicy;
use crate::utils::truncate_chars;

const HEADER_LINES: usize = 15;
const LLM_TEXT_LIMIT: usize = 2000;

const PHARMACY_KEYWORDS: &[&str] = &[
    "pharmacy",
    "chemist",
    "batch",
    "expiry",
    "exp. date",
    "mfg",
    "mrp",
    "tablet",
    "capsule",
    "syrup",
    "drug lic",
];

const FINAL_BILL_KEYWORDS: &[&str] = &[
    "final bill",
    "bill summary",
    "summary of charges",
    "net payable",
    "amount payable",
    "grand total",
    "advance paid",
    "discharge bill",
];

const BILL_DETAIL_KEYWORDS: &[&str] = &[
    "bill detail",
    "detailed bill",
    "itemised",
    "itemized",
    "breakup",
    "break-up",
    "service code",
    "particulars",
];

#[derive(Debug, Clone)]
pub struct Classification {
    pub page_type: PageType,
    pub usage: Option<TokenUsage>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Classification {
    fn local(page_type: PageType) -> Self {
        Classification {
            page_type,
            usage: None,
            diagnostics: Vec::new(),
        }
    }
}

pub struct PageClassifier<'a> {
    backend: &'a dyn LlmBackend,
    retry: &'a RetryPolicy,
}

impl<'a> PageClassifier<'a> {
    pub fn new(backend: &'a dyn LlmBackend, retry: &'a RetryPolicy) -> Self {
        PageClassifier { backend, retry }
    }

    /// Blank pages are `Unknown` for free; keyword hits decide clear cases;
    /// everything else goes to the LLM.
    pub async fn classify(&self, ocr_text: &str) -> Classification {
        if ocr_text.trim().is_empty() {
            return Classification::local(PageType::Unknown);
        }
        if let Some(page_type) = classify_by_keywords(ocr_text) {
            debug!(%page_type, "page classified by keywords");
            return Classification::local(page_type);
        }

        let request = LlmRequest::new(
            PromptVariant::Classify,
            truncate_chars(ocr_text, LLM_TEXT_LIMIT),
        );
        match self.retry.call(self.backend, &request).await {
            Ok(response) => {
                let mut classification = Classification::local(PageType::Unknown);
                classification.usage = Some(response.usage);
                match PageType::from_label(&response.content) {
                    Some(page_type) => classification.page_type = page_type,
                    None => {
                        warn!(answer = %truncate_chars(&response.content, 80), "LLM page type outside known labels");
                        classification.diagnostics.push(Diagnostic::new(
                            DiagnosticCode::ClassificationFallback,
                            format!(
                                "classifier answered {:?}; using Unknown",
                                truncate_chars(&response.content, 80)
                            ),
                        ));
                    }
                }
                classification
            }
            Err(err) => {
                warn!(error = %err, "page classification failed");
                let mut classification = Classification::local(PageType::Unknown);
                classification.diagnostics.push(Diagnostic::new(
                    DiagnosticCode::ProviderFailure,
                    format!("classification call failed: {}", err),
                ));
                classification
            }
        }
    }
}

/// Keyword scoring over the page. Header hits count double. Conclusive only
/// when one page type clearly leads.
pub fn classify_by_keywords(text: &str) -> Option<PageType> {
    let lowered = text.to_lowercase();
    let header: String = lowered
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(HEADER_LINES)
        .collect::<Vec<_>>()
        .join("\n");

    let score = |keywords: &[&str]| -> usize {
        keywords
            .iter()
            .map(|keyword| {
                if header.contains(keyword) {
                    2
                } else if lowered.contains(keyword) {
                    1
                } else {
                    0
                }
            })
            .sum()
    };

    let mut scores = [
        (PageType::Pharmacy, score(PHARMACY_KEYWORDS)),
        (PageType::FinalBill, score(FINAL_BILL_KEYWORDS)),
        (PageType::BillDetail, score(BILL_DETAIL_KEYWORDS)),
    ];
    scores.sort_by(|a, b| b.1.cmp(&a.1));

    let (best, best_score) = scores[0];
    let runner_up = scores[1].1;
    (best_score >= 2 && best_score > runner_up).then_some(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::services::llm::LlmResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Answer {
        reply: Result<&'static str, ()>,
        calls: AtomicUsize,
    }

    impl Answer {
        fn ok(reply: &'static str) -> Self {
            Answer {
                reply: Ok(reply),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for Answer {
        fn name(&self) -> &str {
            "answer"
        }

        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
            assert_eq!(request.variant, PromptVariant::Classify);
            assert!(request.ocr_text.chars().count() <= LLM_TEXT_LIMIT);
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Ok(reply) => Ok(LlmResponse {
                    content: reply.to_string(),
                    usage: TokenUsage::new(20, 2),
                }),
                Err(()) => Err(ProviderError::Status {
                    status: 400,
                    body: "bad request".into(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn blank_page_is_unknown_without_a_call() {
        let backend = Answer::ok("Pharmacy");
        let retry = RetryPolicy::immediate(0);
        let result = PageClassifier::new(&backend, &retry).classify("  \n\t ").await;
        assert_eq!(result.page_type, PageType::Unknown);
        assert!(result.usage.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clear_headers_skip_the_llm() {
        let backend = Answer::ok("Final Bill");
        let retry = RetryPolicy::immediate(0);
        let text = "CITY PHARMACY\nDrug Lic No 123\nParacetamol 500 Batch A12 Expiry 12/26  45.00";
        let result = PageClassifier::new(&backend, &retry).classify(text).await;
        assert_eq!(result.page_type, PageType::Pharmacy);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn inconclusive_text_asks_the_llm() {
        let backend = Answer::ok("Bill Detail");
        let retry = RetryPolicy::immediate(0);
        let long_text = "Consultation Charge  1000.00\n".repeat(200);
        let result = PageClassifier::new(&backend, &retry).classify(&long_text).await;
        assert_eq!(result.page_type, PageType::BillDetail);
        assert_eq!(result.usage, Some(TokenUsage::new(20, 2)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn out_of_domain_answer_becomes_unknown() {
        let backend = Answer::ok("Radiology Report");
        let retry = RetryPolicy::immediate(0);
        let result = PageClassifier::new(&backend, &retry)
            .classify("Consultation Charge  1000.00")
            .await;
        assert_eq!(result.page_type, PageType::Unknown);
        assert_eq!(result.usage, Some(TokenUsage::new(20, 2)));
        assert_eq!(result.diagnostics[0].code, DiagnosticCode::ClassificationFallback);
    }

    #[tokio::test]
    async fn provider_failure_becomes_unknown() {
        let backend = Answer {
            reply: Err(()),
            calls: AtomicUsize::new(0),
        };
        let retry = RetryPolicy::immediate(2);
        let result = PageClassifier::new(&backend, &retry)
            .classify("Consultation Charge  1000.00")
            .await;
        assert_eq!(result.page_type, PageType::Unknown);
        assert!(result.usage.is_none());
        assert_eq!(result.diagnostics[0].code, DiagnosticCode::ProviderFailure);
    }

    #[test]
    fn keyword_scores() {
        assert_eq!(
            classify_by_keywords("FINAL BILL\nGrand Total 5000\nNet Payable 4000"),
            Some(PageType::FinalBill)
        );
        assert_eq!(
            classify_by_keywords("Detailed Bill\nParticulars  Qty  Rate  Amount"),
            Some(PageType::BillDetail)
        );
        assert_eq!(classify_by_keywords("Consultation Charge 1000.00"), None);
        assert_eq!(classify_by_keywords("Final Bill\nPharmacy"), None);
    }
}
