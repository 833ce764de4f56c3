use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign};

use crate::utils::round_cents;

/// Structural format of a bill page. Closed set: anything the classifier
/// cannot place lands on `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageType {
    #[serde(rename = "Bill Detail")]
    BillDetail,
    #[serde(rename = "Final Bill")]
    FinalBill,
    #[serde(rename = "Pharmacy")]
    Pharmacy,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl PageType {
    pub const ALL: [PageType; 4] = [
        PageType::BillDetail,
        PageType::FinalBill,
        PageType::Pharmacy,
        PageType::Unknown,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PageType::BillDetail => "Bill Detail",
            PageType::FinalBill => "Final Bill",
            PageType::Pharmacy => "Pharmacy",
            PageType::Unknown => "Unknown",
        }
    }

    /// Maps a free-form label (typically an LLM answer) onto the closed set.
    /// Returns `None` when the text names no label or more than one.
    pub fn from_label(raw: &str) -> Option<PageType> {
        let squashed: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        if squashed.is_empty() {
            return None;
        }

        let mut found = PageType::ALL.iter().copied().filter(|page_type| {
            let label: String = page_type
                .label()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect();
            squashed.contains(&label)
        });

        match (found.next(), found.next()) {
            (Some(page_type), None) => Some(page_type),
            _ => None,
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Token consumption of one or more LLM calls.
///
/// `total_tokens` is always derived from the two counts; there is no way to
/// build an inconsistent value, including through deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTokenUsage")]
pub struct TokenUsage {
    total_tokens: u64,
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct RawTokenUsage {
    total_tokens: u64,
    input_tokens: u64,
    output_tokens: u64,
}

impl TryFrom<RawTokenUsage> for TokenUsage {
    type Error = String;

    fn try_from(raw: RawTokenUsage) -> Result<Self, Self::Error> {
        let usage = TokenUsage::new(raw.input_tokens, raw.output_tokens);
        if usage.total_tokens != raw.total_tokens {
            return Err(format!(
                "total_tokens {} does not equal input_tokens {} + output_tokens {}",
                raw.total_tokens, raw.input_tokens, raw.output_tokens
            ));
        }
        Ok(usage)
    }
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        TokenUsage {
            total_tokens: input_tokens.saturating_add(output_tokens),
            input_tokens,
            output_tokens,
        }
    }

    /// Rough count for providers that do not report usage: about four
    /// characters per token.
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        let count = |text: &str| (text.chars().count() / 4) as u64;
        TokenUsage::new(count(prompt), count(completion))
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn is_consistent(&self) -> bool {
        self.input_tokens.checked_add(self.output_tokens) == Some(self.total_tokens)
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, other: TokenUsage) -> TokenUsage {
        TokenUsage::new(
            self.input_tokens.saturating_add(other.input_tokens),
            self.output_tokens.saturating_add(other.output_tokens),
        )
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: TokenUsage) {
        *self = *self + other;
    }
}

impl std::iter::Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), Add::add)
    }
}

/// One page of text as produced by the page source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page_no: u32,
    pub text: String,
}

impl PageText {
    pub fn new(page_no: u32, text: impl Into<String>) -> Self {
        PageText {
            page_no,
            text: text.into(),
        }
    }
}

/// A line item as read from the LLM payload, numerics already normalized.
/// Fields that were missing or could not be normalized are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateItem {
    pub item_name: Option<String>,
    pub item_amount: Option<f64>,
    pub item_rate: Option<f64>,
    pub item_quantity: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemFlag {
    AmountMismatch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BillItem {
    pub item_name: String,
    pub item_amount: f64,
    pub item_rate: Option<f64>,
    pub item_quantity: Option<f64>,
    pub flags: Vec<ItemFlag>,
}

impl BillItem {
    pub fn has_flag(&self, flag: ItemFlag) -> bool {
        self.flags.contains(&flag)
    }
}

#[derive(Serialize)]
struct WireBillItem<'a> {
    item_name: &'a str,
    item_amount: f64,
    item_rate: f64,
    item_quantity: f64,
}

// The response format always carries numeric rate and quantity: a missing
// quantity is one unit and a missing rate is the per-unit share of the amount.
impl Serialize for BillItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let quantity = self.item_quantity.unwrap_or(1.0);
        let rate = self
            .item_rate
            .unwrap_or_else(|| round_cents(self.item_amount / quantity));
        WireBillItem {
            item_name: &self.item_name,
            item_amount: self.item_amount,
            item_rate: rate,
            item_quantity: quantity,
        }
        .serialize(serializer)
    }
}

fn page_no_as_string<S: Serializer>(page_no: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&page_no.to_string())
}

/// Validated items of one page. Built once by the pipeline and read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageResult {
    #[serde(serialize_with = "page_no_as_string")]
    page_no: u32,
    page_type: PageType,
    bill_items: Vec<BillItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_subtotal: Option<f64>,
}

impl PageResult {
    pub fn new(
        page_no: u32,
        page_type: PageType,
        bill_items: Vec<BillItem>,
        page_subtotal: Option<f64>,
    ) -> Self {
        PageResult {
            page_no,
            page_type,
            bill_items,
            page_subtotal,
        }
    }

    pub fn empty(page_no: u32, page_type: PageType) -> Self {
        PageResult::new(page_no, page_type, Vec::new(), None)
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn bill_items(&self) -> &[BillItem] {
        &self.bill_items
    }

    pub fn page_subtotal(&self) -> Option<f64> {
        self.page_subtotal
    }
}

/// The `data` block of a response. `total_item_count` is derived from the
/// pages in the only constructor and cannot be set independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionData {
    pagewise_line_items: Vec<PageResult>,
    total_item_count: usize,
}

impl ExtractionData {
    pub fn from_pages(pagewise_line_items: Vec<PageResult>) -> Self {
        let total_item_count = pagewise_line_items
            .iter()
            .map(|page| page.bill_items.len())
            .sum();
        ExtractionData {
            pagewise_line_items,
            total_item_count,
        }
    }

    pub fn pagewise_line_items(&self) -> &[PageResult] {
        &self.pagewise_line_items
    }

    pub fn total_item_count(&self) -> usize {
        self.total_item_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCode {
    AmountMismatch,
    ItemDropped,
    FieldDropped,
    SubtotalDetected,
    SectionHeader,
    SchemaViolation,
    ProviderFailure,
    ClassificationFallback,
    EmptyPage,
    NoItemsExtracted,
    PossibleDuplicate,
    PageNumbering,
    Timeout,
    DocumentFailure,
}

/// Reports a degradation without failing the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_no: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_index: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            page_no: None,
            item_index: None,
            message: message.into(),
        }
    }

    pub fn on_page(mut self, page_no: u32) -> Self {
        self.page_no = Some(page_no);
        self
    }

    pub fn at_item(mut self, item_index: usize) -> Self {
        self.item_index = Some(item_index);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub is_success: bool,
    pub token_usage: TokenUsage,
    pub data: ExtractionData,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl ExtractionResult {
    pub fn success(data: ExtractionData, token_usage: TokenUsage, diagnostics: Vec<Diagnostic>) -> Self {
        ExtractionResult {
            is_success: true,
            token_usage,
            data,
            diagnostics,
        }
    }

    /// Whole-request failure: empty data, whatever tokens were already spent.
    pub fn failure(token_usage: TokenUsage, diagnostic: Diagnostic) -> Self {
        ExtractionResult {
            is_success: false,
            token_usage,
            data: ExtractionData::default(),
            diagnostics: vec![diagnostic],
        }
    }

    pub fn has_diagnostic(&self, code: DiagnosticCode) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractBillRequest {
    pub document: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_type_from_label_accepts_llm_noise() {
        assert_eq!(PageType::from_label("Bill Detail"), Some(PageType::BillDetail));
        assert_eq!(PageType::from_label("  \"final bill\".\n"), Some(PageType::FinalBill));
        assert_eq!(PageType::from_label("Answer: Pharmacy"), Some(PageType::Pharmacy));
        assert_eq!(PageType::from_label("Lab Report"), None);
        assert_eq!(PageType::from_label("Pharmacy or Final Bill"), None);
        assert_eq!(PageType::from_label(""), None);
    }

    #[test]
    fn token_usage_total_is_derived() {
        let usage = TokenUsage::new(120, 30) + TokenUsage::new(5, 5);
        assert_eq!(usage.input_tokens(), 125);
        assert_eq!(usage.output_tokens(), 35);
        assert_eq!(usage.total_tokens(), 160);
        assert!(usage.is_consistent());
    }

    #[test]
    fn token_usage_rejects_inconsistent_json() {
        let ok: TokenUsage =
            serde_json::from_value(json!({"total_tokens": 3, "input_tokens": 1, "output_tokens": 2}))
                .unwrap();
        assert_eq!(ok.total_tokens(), 3);

        let bad = serde_json::from_value::<TokenUsage>(
            json!({"total_tokens": 4, "input_tokens": 1, "output_tokens": 2}),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn wire_shape_matches_api_contract() {
        let item = BillItem {
            item_name: "Consultation Charge".to_string(),
            item_amount: 1000.0,
            item_rate: None,
            item_quantity: None,
            flags: vec![],
        };
        let page = PageResult::new(1, PageType::BillDetail, vec![item], None);
        let result = ExtractionResult::success(
            ExtractionData::from_pages(vec![page]),
            TokenUsage::new(10, 5),
            vec![],
        );

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "is_success": true,
                "token_usage": {"total_tokens": 15, "input_tokens": 10, "output_tokens": 5},
                "data": {
                    "pagewise_line_items": [{
                        "page_no": "1",
                        "page_type": "Bill Detail",
                        "bill_items": [{
                            "item_name": "Consultation Charge",
                            "item_amount": 1000.0,
                            "item_rate": 1000.0,
                            "item_quantity": 1.0
                        }]
                    }],
                    "total_item_count": 1
                }
            })
        );
    }

    #[test]
    fn failure_has_empty_data() {
        let result = ExtractionResult::failure(
            TokenUsage::default(),
            Diagnostic::new(DiagnosticCode::DocumentFailure, "no pages"),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["is_success"], json!(false));
        assert_eq!(value["data"], json!({"pagewise_line_items": [], "total_item_count": 0}));
        assert_eq!(value["diagnostics"][0]["code"], json!("document_failure"));
    }
}
