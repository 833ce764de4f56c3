use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::models::{BillItem, CandidateItem, Diagnostic, DiagnosticCode, ItemFlag};
use crate::utils::{amounts_agree, normalize_label};

static SUBTOTAL_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        ^\s*(sub[\s-]*total|total|grand\s+total|net\s+(amount|total|payable)|amount\s+payable|total\s+(amount|charges|bill))
            \s*[:.\-]*\s*(\(.*\))?\s*$
        | ^\s*sub[\s-]*total\b
        | \b(b/f|c/f|carried\s+forward|brought\s+forward)\b",
    )
    .expect("valid subtotal pattern")
});

#[derive(Debug, Clone, Default)]
pub struct Validated {
    pub bill_items: Vec<BillItem>,
    pub page_subtotal: Option<f64>,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct Validator {
    tolerance: f64,
}

impl Validator {
    pub fn new(tolerance: f64) -> Self {
        Validator { tolerance }
    }

    pub fn is_subtotal_label(name: &str) -> bool {
        SUBTOTAL_LABEL.is_match(name)
    }

    /// Turns candidates into bill items in their original order. Bad fields
    /// are dropped, unusable items are dropped, subtotal and heading lines are
    /// pulled out of the item list.
    ///
    /// A zero-amount bare line is a heading only when it opens a section. A
    /// bare line repeating the heading of its section is that section's
    /// subtotal when its amount equals the sum of the items above it. Any
    /// other line without a subtotal label stays an item.
    pub fn validate(
        &self,
        page_no: u32,
        candidates: &[CandidateItem],
        candidate_subtotal: Option<f64>,
    ) -> Validated {
        let mut out = Validated::default();
        let mut detected_subtotal = None;
        let mut section_sum = 0.0;
        let mut section_len = 0usize;
        let mut heading: Option<String> = None;

        for (index, candidate) in candidates.iter().enumerate() {
            let report = |code: DiagnosticCode, message: String| {
                Diagnostic::new(code, message).on_page(page_no).at_item(index)
            };

            let name = candidate
                .item_name
                .as_deref()
                .map(str::trim)
                .unwrap_or_default();
            if name.is_empty() {
                out.diagnostics
                    .push(report(DiagnosticCode::ItemDropped, "item has no name".into()));
                continue;
            }

            let amount = match candidate.item_amount {
                Some(amount) if amount.is_finite() && amount >= 0.0 => amount,
                Some(amount) => {
                    out.diagnostics.push(report(
                        DiagnosticCode::ItemDropped,
                        format!("{:?} has invalid amount {}", name, amount),
                    ));
                    continue;
                }
                None => {
                    out.diagnostics.push(report(
                        DiagnosticCode::ItemDropped,
                        format!("{:?} has no readable amount", name),
                    ));
                    continue;
                }
            };

            let rate = match candidate.item_rate {
                Some(rate) if rate.is_finite() && rate >= 0.0 => Some(rate),
                Some(rate) => {
                    out.diagnostics.push(report(
                        DiagnosticCode::FieldDropped,
                        format!("{:?} has invalid rate {}", name, rate),
                    ));
                    None
                }
                None => None,
            };
            let quantity = match candidate.item_quantity {
                Some(quantity) if quantity.is_finite() && quantity > 0.0 => Some(quantity),
                Some(quantity) => {
                    out.diagnostics.push(report(
                        DiagnosticCode::FieldDropped,
                        format!("{:?} has invalid quantity {}", name, quantity),
                    ));
                    None
                }
                None => None,
            };

            let bare = rate.is_none() && quantity.is_none();
            if bare && amount == 0.0 && section_len == 0 {
                out.diagnostics.push(report(
                    DiagnosticCode::SectionHeader,
                    format!("{:?} is a section heading", name),
                ));
                heading = Some(normalize_label(name));
                section_sum = 0.0;
                continue;
            }

            let labeled = Self::is_subtotal_label(name);
            let closes_heading = bare
                && section_len > 0
                && heading.as_deref() == Some(normalize_label(name).as_str())
                && amounts_agree(section_sum, amount, self.tolerance);
            if labeled || closes_heading {
                debug!(page_no, name, amount, labeled, "subtotal line separated from items");
                out.diagnostics.push(report(
                    DiagnosticCode::SubtotalDetected,
                    format!("{:?} ({}) treated as subtotal", name, amount),
                ));
                detected_subtotal = Some(amount);
                heading = None;
                section_sum = 0.0;
                section_len = 0;
                continue;
            }

            let mut flags = Vec::new();
            if let (Some(rate), Some(quantity)) = (rate, quantity) {
                let expected = rate * quantity;
                if !amounts_agree(expected, amount, self.tolerance) {
                    flags.push(ItemFlag::AmountMismatch);
                    out.diagnostics.push(report(
                        DiagnosticCode::AmountMismatch,
                        format!(
                            "{:?}: amount {} differs from rate {} x quantity {} = {}",
                            name, amount, rate, quantity, expected
                        ),
                    ));
                }
            }

            section_sum += amount;
            section_len += 1;
            out.bill_items.push(BillItem {
                item_name: name.to_string(),
                item_amount: amount,
                item_rate: rate,
                item_quantity: quantity,
                flags,
            });
        }

        out.page_subtotal = candidate_subtotal
            .filter(|subtotal| subtotal.is_finite() && *subtotal >= 0.0)
            .or(detected_subtotal);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, amount: Option<f64>, rate: Option<f64>, quantity: Option<f64>) -> CandidateItem {
        CandidateItem {
            item_name: Some(name.to_string()),
            item_amount: amount,
            item_rate: rate,
            item_quantity: quantity,
        }
    }

    fn codes(validated: &Validated) -> Vec<DiagnosticCode> {
        validated.diagnostics.iter().map(|d| d.code).collect()
    }

    #[test]
    fn keeps_valid_items_in_order() {
        let validated = Validator::new(0.01).validate(
            1,
            &[
                item("  Consultation Charge ", Some(1000.0), None, None),
                item("ECG", Some(300.0), Some(300.0), Some(1.0)),
                item("Blood Test", Some(450.0), Some(150.0), Some(3.0)),
            ],
            None,
        );
        let names: Vec<_> = validated.bill_items.iter().map(|i| i.item_name.as_str()).collect();
        assert_eq!(names, vec!["Consultation Charge", "ECG", "Blood Test"]);
        assert!(validated.diagnostics.is_empty());
    }

    #[test]
    fn drops_unnamed_and_unpriced_items() {
        let validated = Validator::new(0.01).validate(
            2,
            &[
                CandidateItem {
                    item_name: Some("   ".into()),
                    item_amount: Some(10.0),
                    ..CandidateItem::default()
                },
                item("Gloves", None, None, None),
                item("Refund", Some(-50.0), None, None),
                item("Syringe", Some(20.0), None, None),
            ],
            None,
        );
        assert_eq!(validated.bill_items.len(), 1);
        assert_eq!(validated.bill_items[0].item_name, "Syringe");
        assert_eq!(codes(&validated), vec![DiagnosticCode::ItemDropped; 3]);
        assert_eq!(validated.diagnostics[1].page_no, Some(2));
        assert_eq!(validated.diagnostics[1].item_index, Some(1));
    }

    #[test]
    fn flags_rate_quantity_mismatch_but_keeps_item() {
        let validated = Validator::new(0.01).validate(
            1,
            &[item("Room Rent", Some(2500.0), Some(1000.0), Some(2.0))],
            None,
        );
        assert_eq!(validated.bill_items.len(), 1);
        assert!(validated.bill_items[0].has_flag(ItemFlag::AmountMismatch));
        assert_eq!(codes(&validated), vec![DiagnosticCode::AmountMismatch]);

        let within = Validator::new(0.01).validate(
            1,
            &[item("Room Rent", Some(2005.0), Some(1000.0), Some(2.0))],
            None,
        );
        assert!(within.bill_items[0].flags.is_empty());
    }

    #[test]
    fn drops_bad_rate_and_quantity_fields_only() {
        let validated = Validator::new(0.01).validate(
            1,
            &[item("Dressing", Some(200.0), Some(-5.0), Some(0.0))],
            None,
        );
        assert_eq!(validated.bill_items.len(), 1);
        assert_eq!(validated.bill_items[0].item_rate, None);
        assert_eq!(validated.bill_items[0].item_quantity, None);
        assert_eq!(codes(&validated), vec![DiagnosticCode::FieldDropped; 2]);
    }

    #[test]
    fn labeled_subtotal_is_not_an_item() {
        let validated = Validator::new(0.01).validate(
            2,
            &[
                item("Sub Total", Some(4200.0), None, None),
                item("Physiotherapy", Some(800.0), None, None),
            ],
            None,
        );
        assert_eq!(validated.bill_items.len(), 1);
        assert_eq!(validated.page_subtotal, Some(4200.0));
        assert_eq!(codes(&validated), vec![DiagnosticCode::SubtotalDetected]);
    }

    #[test]
    fn running_sum_line_becomes_subtotal() {
        let validated = Validator::new(0.01).validate(
            1,
            &[
                item("Room Charges", Some(0.0), None, None),
                item("General Ward", Some(3000.0), Some(1500.0), Some(2.0)),
                item("Nursing", Some(600.0), Some(300.0), Some(2.0)),
                item("Room Charges", Some(3600.0), None, None),
                item("Lab", Some(900.0), None, None),
            ],
            None,
        );
        let names: Vec<_> = validated.bill_items.iter().map(|i| i.item_name.as_str()).collect();
        assert_eq!(names, vec!["General Ward", "Nursing", "Lab"]);
        assert_eq!(validated.page_subtotal, Some(3600.0));
        assert_eq!(
            codes(&validated),
            vec![DiagnosticCode::SectionHeader, DiagnosticCode::SubtotalDetected]
        );
    }

    #[test]
    fn single_equal_neighbour_is_still_an_item() {
        let validated = Validator::new(0.01).validate(
            1,
            &[
                item("Room Rent", Some(1000.0), None, None),
                item("Nursing", Some(1000.0), None, None),
            ],
            None,
        );
        assert_eq!(validated.bill_items.len(), 2);
        assert_eq!(validated.page_subtotal, None);
    }

    #[test]
    fn matching_sum_without_heading_stays_an_item() {
        let validated = Validator::new(0.01).validate(
            1,
            &[
                item("Consultation", Some(500.0), None, None),
                item("Registration", Some(500.0), None, None),
                item("Dressing", Some(1000.0), None, None),
            ],
            None,
        );
        let names: Vec<_> = validated.bill_items.iter().map(|i| i.item_name.as_str()).collect();
        assert_eq!(names, vec!["Consultation", "Registration", "Dressing"]);
        assert_eq!(validated.page_subtotal, None);
        assert!(validated.diagnostics.is_empty());
    }

    #[test]
    fn heading_total_must_match_its_section() {
        let validated = Validator::new(0.01).validate(
            1,
            &[
                item("Lab Charges", Some(0.0), None, None),
                item("CBC", Some(400.0), None, None),
                item("LFT", Some(600.0), None, None),
                item("Lab Charges", Some(1500.0), None, None),
            ],
            None,
        );
        assert_eq!(validated.bill_items.len(), 3);
        assert_eq!(validated.page_subtotal, None);
    }

    #[test]
    fn zero_amount_inside_a_section_is_an_item() {
        let validated = Validator::new(0.01).validate(
            1,
            &[
                item("ECG", Some(100.0), None, None),
                item("X-Ray", Some(200.0), None, None),
                item("Diet Consultation (complimentary)", Some(0.0), None, None),
            ],
            None,
        );
        let names: Vec<_> = validated.bill_items.iter().map(|i| i.item_name.as_str()).collect();
        assert_eq!(names, vec!["ECG", "X-Ray", "Diet Consultation (complimentary)"]);
        assert_eq!(validated.bill_items[2].item_amount, 0.0);
        assert!(validated.diagnostics.is_empty());
    }

    #[test]
    fn explicit_subtotal_wins_over_detected() {
        let validated = Validator::new(0.01).validate(
            1,
            &[item("Total", Some(999.0), None, None)],
            Some(1200.0),
        );
        assert!(validated.bill_items.is_empty());
        assert_eq!(validated.page_subtotal, Some(1200.0));
    }

    #[test]
    fn subtotal_labels() {
        for label in ["Sub Total", "SUBTOTAL", "sub-total (Pharmacy)", "Total:", "Grand Total", "Balance B/F", "Net Amount"] {
            assert!(Validator::is_subtotal_label(label), "{label}");
        }
        for label in ["Total Knee Replacement", "Consultation Charge", "Subtle Dressing"] {
            assert!(!Validator::is_subtotal_label(label), "{label}");
        }
    }

    #[test]
    fn same_input_same_output() {
        let candidates = vec![
            item("A", Some(10.0), None, None),
            item("B", Some(20.0), Some(10.0), Some(2.0)),
        ];
        let validator = Validator::new(0.01);
        let first = validator.validate(1, &candidates, None);
        let second = validator.validate(1, &candidates, None);
        assert_eq!(first.bill_items, second.bill_items);
    }
}
