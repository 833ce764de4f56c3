use crate::services::llm::{LlmRequest, PromptVariant};

#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl RenderedPrompt {
    pub fn combined_len(&self) -> usize {
        self.system.len() + self.user.len()
    }
}

pub fn render(request: &LlmRequest) -> RenderedPrompt {
    let text = &request.ocr_text;
    match request.variant {
        PromptVariant::Classify => RenderedPrompt {
            system: CLASSIFY_SYSTEM.to_string(),
            user: format!("Classify this bill page:\n\n{}", text),
        },
        PromptVariant::BillItems { strict } => RenderedPrompt {
            system: with_strictness(BILL_ITEMS_SYSTEM, strict),
            user: format!("Bill page text:\n\n{}\n\nJSON:", text),
        },
        PromptVariant::PharmacyItems { strict } => RenderedPrompt {
            system: with_strictness(PHARMACY_ITEMS_SYSTEM, strict),
            user: format!("Pharmacy bill page text:\n\n{}\n\nJSON:", text),
        },
    }
}

fn with_strictness(base: &str, strict: bool) -> String {
    if strict {
        format!("{}\n{}", base, STRICT_SUFFIX)
    } else {
        base.to_string()
    }
}

const CLASSIFY_SYSTEM: &str = r#"You classify pages of hospital and medical bills.
Answer with exactly one label and nothing else:
- Bill Detail: itemised charges with line items
- Final Bill: summary page with totals, payable amounts, deposits
- Pharmacy: medicines with batch numbers, expiry dates, MRP
- Unknown: none of the above"#;

const BILL_ITEMS_SYSTEM: &str = r#"You extract line items from medical bill pages.
Return one JSON object:
{
  "bill_items": [
    {"item_name": "string", "item_amount": 0.0, "item_rate": 0.0, "item_quantity": 1.0}
  ],
  "page_subtotal": null
}
- item_name: the description exactly as printed
- item_amount: net amount of the line after discounts
- item_rate: unit price, or null if not printed
- item_quantity: quantity, or null if not printed
- page_subtotal: the page's sub total if printed, else null
Keep the order of the page. Do not report sub totals, totals or section headings as items."#;

const PHARMACY_ITEMS_SYSTEM: &str = r#"You extract medicines from pharmacy bill pages.
Return one JSON object:
{
  "medicines": [
    {"medicine_name": "string", "batch_no": null, "expiry": null, "quantity": 1.0, "mrp": 0.0, "amount": 0.0}
  ],
  "page_subtotal": null
}
- medicine_name: the product as printed, including strength
- batch_no, expiry: as printed, or null
- quantity: units sold, or null
- mrp: price per unit, or null
- amount: net amount of the line after discounts
- page_subtotal: the page's sub total if printed, else null
Keep the order of the page. Do not report sub totals or totals as medicines."#;

const STRICT_SUFFIX: &str = r#"Your previous answer could not be parsed.
Output ONLY the JSON object: no Markdown, no code fences, no commentary.
Every number must be a plain JSON number or null."#;
