use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ExtractError;
use crate::models::{CandidateItem, Diagnostic, DiagnosticCode, PageType, TokenUsage};
use crate::services::llm::{LlmBackend, LlmRequest, PromptVariant};
use crate::services::retry::RetryPolicy;
use crate::utils::{parse_amount, strip_code_fences, truncate_chars};

static BILL_ITEMS_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    compile(json!({
        "type": "object",
        "required": ["bill_items"],
        "properties": {
            "bill_items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["item_name", "item_amount"],
                    "properties": {
                        "item_name": {"type": ["string", "null"]},
                        "item_amount": {"type": ["number", "string", "null"]},
                        "item_rate": {"type": ["number", "string", "null"]},
                        "item_quantity": {"type": ["number", "string", "null"]}
                    }
                }
            },
            "page_subtotal": {"type": ["number", "string", "null"]}
        }
    }))
});

static PHARMACY_ITEMS_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    compile(json!({
        "type": "object",
        "required": ["medicines"],
        "properties": {
            "medicines": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["medicine_name", "amount"],
                    "properties": {
                        "medicine_name": {"type": ["string", "null"]},
                        "batch_no": {"type": ["string", "number", "null"]},
                        "expiry": {"type": ["string", "null"]},
                        "quantity": {"type": ["number", "string", "null"]},
                        "mrp": {"type": ["number", "string", "null"]},
                        "amount": {"type": ["number", "string", "null"]}
                    }
                }
            },
            "page_subtotal": {"type": ["number", "string", "null"]}
        }
    }))
});

fn compile(schema: Value) -> JSONSchema {
    JSONSchema::compile(&schema).expect("Invalid JSON schema")
}

#[derive(Deserialize)]
struct BillItemsPayload {
    bill_items: Vec<RawBillItem>,
    #[serde(default)]
    page_subtotal: Option<Value>,
}

#[derive(Deserialize)]
struct RawBillItem {
    item_name: Option<String>,
    item_amount: Option<Value>,
    #[serde(default)]
    item_rate: Option<Value>,
    #[serde(default)]
    item_quantity: Option<Value>,
}

#[derive(Deserialize)]
struct PharmacyPayload {
    medicines: Vec<RawMedicine>,
    #[serde(default)]
    page_subtotal: Option<Value>,
}

#[derive(Deserialize)]
struct RawMedicine {
    medicine_name: Option<String>,
    amount: Option<Value>,
    #[serde(default)]
    quantity: Option<Value>,
    #[serde(default)]
    mrp: Option<Value>,
}

/// Fields read from either schema, before numeric normalization.
struct RawRecord {
    name: Option<String>,
    amount: Option<Value>,
    rate: Option<Value>,
    quantity: Option<Value>,
}

struct ParsedPayload {
    records: Vec<RawRecord>,
    subtotal: Option<Value>,
}

/// Candidate items for one page plus the cost of getting them.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub candidates: Vec<CandidateItem>,
    pub candidate_subtotal: Option<f64>,
    pub usage: Vec<TokenUsage>,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct LineItemExtractor<'a> {
    backend: &'a dyn LlmBackend,
    retry: &'a RetryPolicy,
}

impl<'a> LineItemExtractor<'a> {
    pub fn new(backend: &'a dyn LlmBackend, retry: &'a RetryPolicy) -> Self {
        LineItemExtractor { backend, retry }
    }

    /// One relaxed attempt, then one strict attempt. A page whose answers
    /// never parse yields no candidates instead of an error.
    pub async fn extract(&self, ocr_text: &str, page_type: PageType) -> Extraction {
        let mut extraction = Extraction::default();
        let mut last_error = None;

        for strict in [false, true] {
            let request = LlmRequest::new(PromptVariant::for_page(page_type, strict), ocr_text);
            let response = match self.retry.call(self.backend, &request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(error = %err, strict, "line item extraction call failed");
                    extraction.diagnostics.push(Diagnostic::new(
                        DiagnosticCode::ProviderFailure,
                        format!("extraction call failed: {}", err),
                    ));
                    return extraction;
                }
            };
            extraction.usage.push(response.usage);

            match parse_payload(&response.content, page_type) {
                Ok(payload) => {
                    normalize_into(payload, &mut extraction);
                    debug!(
                        candidates = extraction.candidates.len(),
                        strict, "parsed line item payload"
                    );
                    return extraction;
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        strict,
                        response = %truncate_chars(&response.content, 200),
                        "line item payload rejected"
                    );
                    last_error = Some(err);
                }
            }
        }

        let detail = last_error.map(|err| err.to_string()).unwrap_or_default();
        extraction.diagnostics.push(Diagnostic::new(
            DiagnosticCode::SchemaViolation,
            format!("no parsable answer after retry: {}", detail),
        ));
        extraction
    }
}

fn parse_payload(raw: &str, page_type: PageType) -> Result<ParsedPayload, ExtractError> {
    let value: Value = serde_json::from_str(strip_code_fences(raw))?;

    if page_type == PageType::Pharmacy {
        check_schema(&PHARMACY_ITEMS_SCHEMA, "medicines", &value)?;
        let payload: PharmacyPayload = serde_json::from_value(value)?;
        Ok(ParsedPayload {
            records: payload
                .medicines
                .into_iter()
                .map(|m| RawRecord {
                    name: m.medicine_name,
                    amount: m.amount,
                    rate: m.mrp,
                    quantity: m.quantity,
                })
                .collect(),
            subtotal: payload.page_subtotal,
        })
    } else {
        check_schema(&BILL_ITEMS_SCHEMA, "bill_items", &value)?;
        let payload: BillItemsPayload = serde_json::from_value(value)?;
        Ok(ParsedPayload {
            records: payload
                .bill_items
                .into_iter()
                .map(|item| RawRecord {
                    name: item.item_name,
                    amount: item.item_amount,
                    rate: item.item_rate,
                    quantity: item.item_quantity,
                })
                .collect(),
            subtotal: payload.page_subtotal,
        })
    }
}

fn check_schema(schema: &JSONSchema, name: &'static str, value: &Value) -> Result<(), ExtractError> {
    if let Err(errors) = schema.validate(value) {
        let detail = errors
            .map(|e| e.to_string())
            .take(3)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ExtractError::Schema { schema: name, detail });
    }
    Ok(())
}

fn normalize_into(payload: ParsedPayload, extraction: &mut Extraction) {
    for (index, record) in payload.records.into_iter().enumerate() {
        let mut field = |label: &str, value: Option<Value>| -> Option<f64> {
            let (number, rejected) = normalize_number(value.as_ref());
            if let Some(raw) = rejected {
                extraction.diagnostics.push(
                    Diagnostic::new(
                        DiagnosticCode::FieldDropped,
                        format!("{} {:?} is not a number", label, raw),
                    )
                    .at_item(index),
                );
            }
            number
        };

        let item_amount = field("item_amount", record.amount);
        let item_rate = field("item_rate", record.rate);
        let item_quantity = field("item_quantity", record.quantity);
        extraction.candidates.push(CandidateItem {
            item_name: record.name,
            item_amount,
            item_rate,
            item_quantity,
        });
    }

    let (subtotal, _) = normalize_number(payload.subtotal.as_ref());
    extraction.candidate_subtotal = subtotal;
}

/// Returns the parsed number, or the raw text when something was present
/// but could not be read as a number.
fn normalize_number(value: Option<&Value>) -> (Option<f64>, Option<String>) {
    match value {
        None | Some(Value::Null) => (None, None),
        Some(Value::Number(number)) => match number.as_f64().filter(|n| n.is_finite()) {
            Some(n) => (Some(n), None),
            None => (None, Some(number.to_string())),
        },
        Some(Value::String(text)) if text.trim().is_empty() => (None, None),
        Some(Value::String(text)) => match parse_amount(text) {
            Some(n) => (Some(n), None),
            None => (None, Some(text.clone())),
        },
        Some(other) => (None, Some(other.to_string())),
    }
}
