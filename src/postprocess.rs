//! Post-processing: deterministic normalization of the extracted record.
//!
//! The model's answer is usually right but rarely clean: prefixes on the
//! company name, punctuation in invoice numbers, a dozen date spellings,
//! weights quoted in quintals or tons. The rules here are cheap,
//! independent, and idempotent — `normalize(normalize(r)) == normalize(r)`
//! — so the pipeline can re-run them safely and tests can check each in
//! isolation. Nothing in this module raises: a value that cannot be
//! normalized is logged and left as it was.

use crate::record::{CandidateRecord, ConfidenceScores, ProductLine, NOT_AVAILABLE};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Per-field score for a value the model actually produced.
const FIELD_CONFIDENCE: f64 = 0.9;

/// Products confidence grows by this much per extracted line, capped at
/// [`FIELD_CONFIDENCE`].
const PER_PRODUCT_CONFIDENCE: f64 = 0.2;

/// Normalize an extracted record against its source text.
///
/// Applies, independently: company-name salvage (only when the model's
/// value is a known-bad placeholder), invoice-number cleanup, FSSAI
/// recovery from the source text, date normalization to `DD/MM/YYYY`,
/// product numeric cleanup, and weight-unit conversion.
pub fn normalize(mut record: CandidateRecord, source_text: &str) -> CandidateRecord {
    if is_bad_company_name(&record.company_name) {
        if let Some(salvaged) = salvage_company_name(source_text) {
            record.company_name = salvaged;
        }
    }
    record.company_name = strip_company_prefix(&record.company_name);

    record.invoice_number = clean_invoice_number(&record.invoice_number);

    if record.fssai_number.trim().is_empty() || record.fssai_number == NOT_AVAILABLE {
        if let Some(fssai) = find_fssai_number(source_text) {
            record.fssai_number = fssai;
        }
    }

    if record.invoice_date != NOT_AVAILABLE {
        match normalize_date(&record.invoice_date) {
            Some(normalized) => record.invoice_date = normalized,
            None => warn!(date = %record.invoice_date, "unparseable invoice date left unmodified"),
        }
    }

    for product in &mut record.products {
        normalize_product(product);
    }

    record
}

/// Per-field confidence vector for the normalized record.
///
/// 0.9 for any field the model filled in, 0.0 for the sentinel; the
/// products score scales with the extracted line count up to the cap;
/// `overall` is the unweighted mean.
pub fn confidence_scores(record: &CandidateRecord) -> ConfidenceScores {
    let field = |value: &str| {
        if value == NOT_AVAILABLE {
            0.0
        } else {
            FIELD_CONFIDENCE
        }
    };
    let company_name = field(&record.company_name);
    let invoice_number = field(&record.invoice_number);
    let fssai_number = field(&record.fssai_number);
    let invoice_date = field(&record.invoice_date);
    let products =
        (PER_PRODUCT_CONFIDENCE * record.products.len() as f64).min(FIELD_CONFIDENCE);
    let overall =
        (company_name + invoice_number + fssai_number + invoice_date + products) / 5.0;
    ConfidenceScores {
        company_name,
        invoice_number,
        fssai_number,
        invoice_date,
        products,
        overall,
    }
}

// ── Company name ─────────────────────────────────────────────────────────

static RE_COMPANY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^M/S\.?\s+").expect("static regex"));

/// Strip a leading "M/s "-style prefix, preserving the rest verbatim.
pub fn strip_company_prefix(name: &str) -> String {
    RE_COMPANY_PREFIX.replace(name, "").into_owned()
}

fn is_bad_company_name(name: &str) -> bool {
    matches!(name.trim(), "" | "N/A" | "NULL") || name.trim() == "RICE MILL"
}

/// Ordered salvage candidates: an "M/s"-prefixed entity name, a capitalized
/// phrase ending in a known organizational suffix, a labeled seller field.
static RE_COMPANY_CANDIDATES: Lazy<Vec<(Regex, usize)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(
                r"(?i)M/S\.?\s+((?:[A-Z][A-Za-z.]*\s+)*(?:RICE MILL|AGRO|INDUSTRIES|PVT\.?\s?LTD\.?|LIMITED))",
            )
            .expect("static regex"),
            // Bonus for the explicit seller prefix.
            5,
        ),
        (
            Regex::new(
                r"((?:[A-Z][A-Za-z.]*\s+)+(?:RICE MILL|AGRO|INDUSTRIES|PVT\.?\s?LTD\.?|LIMITED))",
            )
            .expect("static regex"),
            0,
        ),
        (
            Regex::new(r"(?:Company|Seller|From)\s*:\s*([A-Z][A-Za-z. ]+)").expect("static regex"),
            0,
        ),
    ]
});

/// Scan the head of the document for the seller name; longest match wins.
fn salvage_company_name(text: &str) -> Option<String> {
    let head: Vec<&str> = text.lines().take(20).collect();

    let mut best: Option<(String, usize)> = None;
    for (pattern, bonus) in RE_COMPANY_CANDIDATES.iter() {
        for line in &head {
            for caps in pattern.captures_iter(line) {
                let candidate = caps[1].trim().to_string();
                if candidate.is_empty() {
                    continue;
                }
                let score = candidate.len() + bonus;
                if best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
                    best = Some((candidate, score));
                }
            }
        }
    }
    best.map(|(name, _)| name)
}

// ── Invoice number ───────────────────────────────────────────────────────

/// Reduce to alphanumeric characters, preserving case and digits.
pub fn clean_invoice_number(value: &str) -> String {
    if value == NOT_AVAILABLE {
        return value.to_string();
    }
    value.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

// ── FSSAI number ─────────────────────────────────────────────────────────

static RE_FSSAI: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)FSSAI\s*(?:No\.?|Number\.?|#)?\s*:?\s*(\d{10,14})").expect("static regex"),
        Regex::new(r"(?i)(?:FSSAI|Food License)\s*:?\s*(\d{10,14})").expect("static regex"),
    ]
});

/// Search the full text for a 10–14 digit sequence following an FSSAI label.
fn find_fssai_number(text: &str) -> Option<String> {
    RE_FSSAI
        .iter()
        .find_map(|p| p.captures(text).map(|c| c[1].to_string()))
}

// ── Dates ────────────────────────────────────────────────────────────────

static RE_DATE_YMD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})").expect("static regex"));
static RE_DATE_DMY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})[-/.](\d{1,2})[-/.](\d{2,4})").expect("static regex"));
static RE_DATE_WORDED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,2})\s*(?:st|nd|rd|th)?\s+([A-Za-z]+)[,\s]+(\d{2,4})").expect("static regex")
});

/// Normalize a date to `DD/MM/YYYY`.
///
/// Accepts `DD-MM-YYYY`, `YYYY-MM-DD`, and `D[th] Month, YYYY` shapes with
/// `-`, `/` or `.` separators. Two-digit years below 30 map to the 2000s,
/// the rest to the 1900s. Returns `None` for anything else.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();

    if let Some(caps) = RE_DATE_YMD.captures(raw) {
        let year: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        return Some(format!("{day:02}/{month:02}/{year}"));
    }

    if let Some(caps) = RE_DATE_DMY.captures(raw) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year = expand_year(caps[3].parse().ok()?);
        return Some(format!("{day:02}/{month:02}/{year}"));
    }

    if let Some(caps) = RE_DATE_WORDED.captures(raw) {
        let day: u32 = caps[1].parse().ok()?;
        let month = month_number(&caps[2])?;
        let year = expand_year(caps[3].parse().ok()?);
        return Some(format!("{day:02}/{month:02}/{year}"));
    }

    None
}

fn expand_year(year: u32) -> u32 {
    if year >= 100 {
        year
    } else if year < 30 {
        year + 2000
    } else {
        year + 1900
    }
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    let lower = name.to_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == lower || (lower.len() == 3 && m.starts_with(&lower)))
        .map(|i| i as u32 + 1)
}

// ── Product numerics ─────────────────────────────────────────────────────

fn normalize_product(product: &mut ProductLine) {
    product.hsn_sac_code = clean_hsn_code(&product.hsn_sac_code);

    for value in [
        &mut product.quantity,
        &mut product.rate,
        &mut product.amount,
    ] {
        *value = clean_numeric(value);
    }

    product.original_weight = product.weight.clone();
    product.weight_in_kg = convert_weight_to_kg(&product.weight);
}

/// HSN/SAC reduced to digits only, else the sentinel.
fn clean_hsn_code(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        digits
    }
}

/// Strip everything except digits, the decimal point and currency symbols.
fn clean_numeric(value: &str) -> String {
    if value == NOT_AVAILABLE {
        return value.to_string();
    }
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '\u{20B9}' || *c == '$')
        .collect();
    if cleaned.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        cleaned
    }
}

static RE_WEIGHT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?)\s*([a-zA-Z]+)").expect("static regex"));

/// Convert a "value unit" weight string to kilograms.
///
/// `qtl` multiplies by 100, `ton`/`tons` by 1000, `kg` passes through; an
/// unrecognized unit (or shape) returns the input unchanged.
pub fn convert_weight_to_kg(weight: &str) -> String {
    if weight == NOT_AVAILABLE {
        return weight.to_string();
    }
    let compact = weight.replace(',', "");
    let Some(caps) = RE_WEIGHT.captures(compact.trim()) else {
        return weight.to_string();
    };
    let Ok(value) = caps[1].parse::<f64>() else {
        return weight.to_string();
    };
    let unit = caps[2].to_lowercase();

    let kg = if unit.contains("qtl") {
        value * 100.0
    } else if unit.contains("ton") {
        value * 1000.0
    } else if unit.contains("kg") {
        value
    } else {
        return weight.to_string();
    };

    format_weight(kg)
}

fn format_weight(kg: f64) -> String {
    if kg.fract() == 0.0 {
        format!("{kg:.0}")
    } else {
        format!("{kg}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(company: &str, invoice: &str, date: &str) -> CandidateRecord {
        CandidateRecord {
            company_name: company.into(),
            invoice_number: invoice.into(),
            invoice_date: date.into(),
            ..CandidateRecord::default()
        }
    }

    // ── Idempotence ──────────────────────────────────────────────────────

    #[test]
    fn normalize_is_idempotent() {
        let record = CandidateRecord {
            company_name: "M/s Example Rice Mill".into(),
            invoice_number: "INV-123/A#".into(),
            fssai_number: "N/A".into(),
            invoice_date: "2023-06-26".into(),
            products: vec![ProductLine {
                goods_description: "STEAM RICE".into(),
                hsn_sac_code: "HSN 10063090".into(),
                quantity: "500 bags".into(),
                weight: "250 qtl".into(),
                rate: "Rs. 4,300".into(),
                amount: "10,75,000".into(),
                ..ProductLine::default()
            }],
        };
        let text = "M/s Example Rice Mill\nFSSAI: 12345678901234";
        let once = normalize(record, text);
        let twice = normalize(once.clone(), text);
        assert_eq!(
            serde_json::to_value(&once).unwrap(),
            serde_json::to_value(&twice).unwrap()
        );
    }

    // ── Company name ─────────────────────────────────────────────────────

    #[test]
    fn company_prefix_stripping() {
        assert_eq!(
            strip_company_prefix("M/s Example Rice Mill"),
            "Example Rice Mill"
        );
        assert_eq!(strip_company_prefix("Example Rice Mill"), "Example Rice Mill");
    }

    #[test]
    fn bad_company_name_is_salvaged_from_head() {
        let text = "TAX INVOICE\nM/s Shri Ganesh Rice Mill\nSomewhere Road";
        let record = normalize(record_with("N/A", "1", "01/01/2024"), text);
        assert_eq!(record.company_name, "Shri Ganesh Rice Mill");
    }

    #[test]
    fn longest_salvage_candidate_wins() {
        let text = "From: Acme\nKrishna Agro Industries Pvt. Ltd. AGRO\nShri Mahalaxmi Traders Rice Mill supplies";
        let salvaged = salvage_company_name(text).unwrap();
        assert!(salvaged.len() >= "Krishna Agro Industries".len());
    }

    #[test]
    fn good_company_name_is_not_replaced() {
        let text = "M/s Other Mill Rice Mill";
        let record = normalize(record_with("Fine Foods Limited", "1", "01/01/2024"), text);
        assert_eq!(record.company_name, "Fine Foods Limited");
    }

    // ── Invoice number ───────────────────────────────────────────────────

    #[test]
    fn invoice_number_cleanup() {
        assert_eq!(clean_invoice_number("INV-123/A#"), "INV123A");
        assert_eq!(clean_invoice_number("780"), "780");
        assert_eq!(clean_invoice_number("N/A"), "N/A");
    }

    // ── FSSAI ────────────────────────────────────────────────────────────

    #[test]
    fn fssai_recovered_from_text() {
        let text = "... FSSAI No: 12345678901 ...";
        let record = normalize(record_with("X", "1", "01/01/2024"), text);
        assert_eq!(record.fssai_number, "12345678901");
    }

    #[test]
    fn fssai_requires_plausible_digit_run() {
        assert!(find_fssai_number("FSSAI: 1234").is_none());
    }

    // ── Dates ────────────────────────────────────────────────────────────

    #[test]
    fn date_dmy_forms() {
        assert_eq!(normalize_date("26-06-2023").as_deref(), Some("26/06/2023"));
        assert_eq!(normalize_date("5/6/2023").as_deref(), Some("05/06/2023"));
        assert_eq!(normalize_date("26.06.2023").as_deref(), Some("26/06/2023"));
    }

    #[test]
    fn date_ymd_form() {
        assert_eq!(normalize_date("2023-06-26").as_deref(), Some("26/06/2023"));
    }

    #[test]
    fn date_worded_forms() {
        assert_eq!(
            normalize_date("21st June, 2023").as_deref(),
            Some("21/06/2023")
        );
        assert_eq!(normalize_date("3 Aug 2024").as_deref(), Some("03/08/2024"));
        assert_eq!(normalize_date("1 MAY, 23").as_deref(), Some("01/05/2023"));
    }

    #[test]
    fn two_digit_year_pivot() {
        assert_eq!(normalize_date("01/01/29").as_deref(), Some("01/01/2029"));
        assert_eq!(normalize_date("01/01/30").as_deref(), Some("01/01/1930"));
    }

    #[test]
    fn unparseable_date_is_left_unmodified() {
        assert!(normalize_date("sometime last week").is_none());
        let record = normalize(record_with("X", "1", "not a date"), "");
        assert_eq!(record.invoice_date, "not a date");
    }

    #[test]
    fn normalized_date_is_stable() {
        let once = normalize_date("26-06-2023").unwrap();
        assert_eq!(normalize_date(&once).unwrap(), once);
    }

    // ── Product numerics ─────────────────────────────────────────────────

    #[test]
    fn hsn_reduced_to_digits() {
        assert_eq!(clean_hsn_code("HSN 1006-3090"), "10063090");
        assert_eq!(clean_hsn_code("none"), "N/A");
    }

    #[test]
    fn numeric_cleanup_keeps_currency_and_decimal() {
        assert_eq!(clean_numeric("4,300.50"), "4300.50");
        assert_eq!(clean_numeric("\u{20B9}1075000"), "\u{20B9}1075000");
        assert_eq!(clean_numeric("500 bags"), "500");
        assert_eq!(clean_numeric("unknown"), "N/A");
    }

    // ── Weight conversion ────────────────────────────────────────────────

    #[test]
    fn weight_conversion_table() {
        assert_eq!(convert_weight_to_kg("5 qtl"), "500");
        assert_eq!(convert_weight_to_kg("2 ton"), "2000");
        assert_eq!(convert_weight_to_kg("2 tons"), "2000");
        assert_eq!(convert_weight_to_kg("10 kg"), "10");
        assert_eq!(convert_weight_to_kg("abc"), "abc");
        assert_eq!(convert_weight_to_kg("N/A"), "N/A");
    }

    #[test]
    fn weight_conversion_handles_decimals_and_commas() {
        assert_eq!(convert_weight_to_kg("2.5 qtl"), "250");
        assert_eq!(convert_weight_to_kg("1,000 kg"), "1000");
        assert_eq!(convert_weight_to_kg("0.26 ton"), "260");
    }

    #[test]
    fn product_keeps_original_weight_alongside_kg() {
        let record = CandidateRecord {
            products: vec![ProductLine {
                weight: "5 qtl".into(),
                ..ProductLine::default()
            }],
            ..record_with("X", "1", "01/01/2024")
        };
        let normalized = normalize(record, "");
        assert_eq!(normalized.products[0].original_weight, "5 qtl");
        assert_eq!(normalized.products[0].weight_in_kg, "500");
        assert_eq!(normalized.products[0].weight, "5 qtl");
    }

    // ── Confidence ───────────────────────────────────────────────────────

    #[test]
    fn confidence_vector_shape() {
        let mut record = record_with("Example Mill", "780", "26/06/2023");
        record.fssai_number = NOT_AVAILABLE.into();
        record.products = vec![ProductLine::default(); 2];
        let scores = confidence_scores(&record);
        assert_eq!(scores.company_name, 0.9);
        assert_eq!(scores.fssai_number, 0.0);
        assert!((scores.products - 0.4).abs() < 1e-9);
        let expected = (0.9 + 0.9 + 0.0 + 0.9 + 0.4) / 5.0;
        assert!((scores.overall - expected).abs() < 1e-9);
    }

    #[test]
    fn products_confidence_caps_at_field_level() {
        let mut record = record_with("X", "1", "01/01/2024");
        record.products = vec![ProductLine::default(); 10];
        assert_eq!(confidence_scores(&record).products, 0.9);
    }
}
