use tracing::{info, warn};

use crate::models::{Diagnostic, DiagnosticCode, ExtractionData, PageResult};
use crate::utils::{amounts_agree, normalize_label};

#[derive(Debug, Clone)]
pub struct Aggregated {
    pub data: ExtractionData,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct Aggregator {
    tolerance: f64,
}

impl Aggregator {
    pub fn new(tolerance: f64) -> Self {
        Aggregator { tolerance }
    }

    /// Orders pages by number and freezes them into the response data. Items
    /// are never merged across pages; exact repeats on adjacent pages are
    /// only reported.
    pub fn aggregate(&self, mut pages: Vec<PageResult>) -> Aggregated {
        pages.sort_by_key(PageResult::page_no);

        let mut diagnostics = self.adjacent_repeats(&pages);
        let data = ExtractionData::from_pages(pages);

        if data.total_item_count() == 0 {
            warn!(pages = data.pagewise_line_items().len(), "no line items extracted");
            diagnostics.push(Diagnostic::new(
                DiagnosticCode::NoItemsExtracted,
                "no line items could be extracted from the document",
            ));
        } else {
            info!(
                pages = data.pagewise_line_items().len(),
                items = data.total_item_count(),
                "aggregated line items"
            );
        }

        Aggregated { data, diagnostics }
    }

    fn adjacent_repeats(&self, pages: &[PageResult]) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for pair in pages.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);
            if previous.page_no().checked_add(1) != Some(current.page_no()) {
                continue;
            }
            let earlier: Vec<(String, f64)> = previous
                .bill_items()
                .iter()
                .map(|item| (normalize_label(&item.item_name), item.item_amount))
                .collect();

            for (index, item) in current.bill_items().iter().enumerate() {
                let label = normalize_label(&item.item_name);
                let repeated = earlier.iter().any(|(name, amount)| {
                    *name == label && amounts_agree(*amount, item.item_amount, self.tolerance)
                });
                if repeated {
                    diagnostics.push(
                        Diagnostic::new(
                            DiagnosticCode::PossibleDuplicate,
                            format!(
                                "{:?} ({}) also appears on page {}",
                                item.item_name,
                                item.item_amount,
                                previous.page_no()
                            ),
                        )
                        .on_page(current.page_no())
                        .at_item(index),
                    );
                }
            }
        }
        diagnostics
    }
}
