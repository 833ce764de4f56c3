use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static CURRENCY_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(₹|\$|€|£|\binr|\busd|\beur|\brs\.?|/-)").expect("valid currency pattern")
});

static PLAIN_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("valid number pattern"));

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parses an amount as printed on a bill: `1,000.00`, `₹500`, `Rs. 1,20,000`,
/// `1.000,50`, `(250.00)`. Returns `None` when nothing numeric is left.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let stripped = CURRENCY_MARKERS.replace_all(raw.trim(), "");
    let mut text: String = stripped.chars().filter(|c| !c.is_whitespace()).collect();
    if text.is_empty() {
        return None;
    }

    let mut negative = false;
    if text.starts_with('(') && text.ends_with(')') && text.len() > 2 {
        negative = true;
        text = text[1..text.len() - 1].to_string();
    }
    if let Some(rest) = text.strip_prefix('-') {
        negative = !negative;
        text = rest.to_string();
    }
    if let Some(rest) = text.strip_prefix('+') {
        text = rest.to_string();
    }

    let canonical = canonical_separators(&text)?;
    if !PLAIN_NUMBER.is_match(&canonical) {
        return None;
    }
    let value: f64 = canonical.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

// Rewrites grouping/decimal separators into a plain `1234.56` form.
fn canonical_separators(text: &str) -> Option<String> {
    if ["..", ",,", ",.", ".,"].iter().any(|pair| text.contains(pair)) {
        return None;
    }
    let last_comma = text.rfind(',');
    let last_dot = text.rfind('.');

    let decimal_at = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) => Some(comma.max(dot)),
        (Some(comma), None) => {
            let tail = &text[comma + 1..];
            let single = text.matches(',').count() == 1;
            (single && (1..=2).contains(&tail.len())).then_some(comma)
        }
        (None, Some(dot)) => (text.matches('.').count() == 1).then_some(dot),
        (None, None) => None,
    };

    let mut out = String::with_capacity(text.len());
    for (idx, ch) in text.char_indices() {
        match ch {
            ',' | '.' if Some(idx) == decimal_at => out.push('.'),
            ',' | '.' => {}
            c if c.is_ascii_digit() => out.push(c),
            _ => return None,
        }
    }
    Some(out)
}

/// Relative agreement between an expected and an observed amount:
/// `|actual - expected| / max(|actual|, 1) <= tolerance`.
pub fn amounts_agree(expected: f64, actual: f64, tolerance: f64) -> bool {
    (actual - expected).abs() / actual.abs().max(1.0) <= tolerance
}

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Pulls the JSON object out of an LLM answer that may be wrapped in a
/// Markdown fence or surrounded by prose.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut body = raw.trim();
    if body.starts_with("```") {
        body = match body.find('\n') {
            Some(newline) => &body[newline + 1..],
            None => body.trim_start_matches('`'),
        };
        body = body.trim_end().trim_end_matches('`').trim();
    }
    if !body.starts_with('{') {
        if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) {
            if start < end {
                body = &body[start..=end];
            }
        }
    }
    body
}

/// Lowercased alphanumeric words, used to compare item names across pages.
pub fn normalize_label(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn looks_like_text(text: &str) -> bool {
    text.len() > 50 && text.split_whitespace().count() > 10
}
