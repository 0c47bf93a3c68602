//! Tabular-layout classification.
//!
//! Two complementary signals are combined into a [`LayoutPattern`]:
//!
//! 1. **Literal catalog match** — header sets of known invoice families
//!    (A–D plus a generic fallback) scored by the fraction of header tokens
//!    present verbatim in the text, weighted by the catalog entry's
//!    confidence.
//! 2. **Semantic column detection** — the header row of the first detected
//!    table, classified into column roles by keyword membership.
//!
//! Semantic detection wins the tie-break: when it yields at least one role
//! it shapes the returned pattern key and floors the confidence at 0.4.
//! Otherwise the literal best is used above 0.3, and below that the result
//! is the generic pattern at exactly 0.3 — classification is total and
//! deterministic for arbitrary text, including empty input.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Floor for the generic fallback.
const GENERIC_CONFIDENCE_FLOOR: f64 = 0.3;

/// Floor applied whenever at least one column role was detected directly
/// from table headers.
const SEMANTIC_CONFIDENCE_FLOOR: f64 = 0.4;

/// Minimum literal score required to use a catalog match for the key.
const LITERAL_MATCH_THRESHOLD: f64 = 0.3;

/// Named cluster of invoice table structures sharing a column arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternFamily {
    /// Description + HSN + quantity/bags + weight + rate + amount.
    A,
    /// Description + quantity + rate + amount, no HSN.
    B,
    /// Batch/lot layouts with net-weight columns.
    C,
    /// Bag + package + metric-ton quantity layouts.
    D,
    /// Fallback for anything unrecognized.
    Generic,
}

impl PatternFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternFamily::A => "pattern_a",
            PatternFamily::B => "pattern_b",
            PatternFamily::C => "pattern_c",
            PatternFamily::D => "pattern_d",
            PatternFamily::Generic => "generic",
        }
    }
}

impl fmt::Display for PatternFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic role of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColumnRole {
    Quantity,
    Weight,
    Rate,
    Amount,
    Description,
}

/// Result of classification: family, detected column headers per role,
/// confidence in [0, 1], and the pattern key handed to the prompt builder.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutPattern {
    pub family: PatternFamily,
    pub detected_columns: BTreeMap<ColumnRole, String>,
    pub confidence: f64,
    key: String,
}

impl LayoutPattern {
    /// The generic fallback pattern at the floor confidence.
    pub fn generic() -> Self {
        Self {
            family: PatternFamily::Generic,
            detected_columns: BTreeMap::new(),
            confidence: GENERIC_CONFIDENCE_FLOOR,
            key: "generic".to_string(),
        }
    }

    /// Pattern key: family name plus detected column labels.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_generic(&self) -> bool {
        self.family == PatternFamily::Generic && self.detected_columns.is_empty()
    }
}

/// One candidate header set in the catalog.
struct CatalogEntry {
    family: PatternFamily,
    headers: &'static [&'static str],
    confidence: f64,
    /// Explicit quantity/weight column names for layouts where the count
    /// column is not literally called "QUANTITY".
    quantity_col: Option<&'static str>,
    weight_col: Option<&'static str>,
}

const fn entry(
    family: PatternFamily,
    headers: &'static [&'static str],
    confidence: f64,
) -> CatalogEntry {
    CatalogEntry {
        family,
        headers,
        confidence,
        quantity_col: None,
        weight_col: None,
    }
}

const fn entry_cols(
    family: PatternFamily,
    headers: &'static [&'static str],
    confidence: f64,
    quantity_col: &'static str,
    weight_col: &'static str,
) -> CatalogEntry {
    CatalogEntry {
        family,
        headers,
        confidence,
        quantity_col: Some(quantity_col),
        weight_col: Some(weight_col),
    }
}

/// Purely structural header catalog — no company or industry identifiers.
static CATALOG: &[CatalogEntry] = &[
    // Family A: description + HSN + quantity + weight + rate + amount
    entry(PatternFamily::A, &["DESCRIPTION", "HSN", "QUANTITY", "WEIGHT", "RATE", "AMOUNT"], 0.9),
    entry(PatternFamily::A, &["DESCRIPTION OF GOODS", "HSN", "QTY", "WEIGHT", "RATE", "AMOUNT"], 0.9),
    entry(PatternFamily::A, &["GOODS DESCRIPTION", "HSN/SAC", "QTY", "WEIGHT", "RATE", "AMOUNT"], 0.9),
    entry(PatternFamily::A, &["GOODS", "HSN CODE", "QUANTITY", "WEIGHT", "RATE", "AMOUNT"], 0.9),
    entry_cols(PatternFamily::A, &["DESCRIPTION", "HSN", "BAGS", "WEIGHT", "RATE", "AMOUNT"], 0.9, "BAGS", "WEIGHT"),
    entry_cols(PatternFamily::A, &["DESCRIPTION", "HSN", "BAGS", "QUINTAL", "RATE", "AMOUNT"], 0.9, "BAGS", "QUINTAL"),
    // Family B: no HSN column
    entry(PatternFamily::B, &["DESCRIPTION", "QUANTITY", "RATE", "AMOUNT"], 0.9),
    entry(PatternFamily::B, &["ITEM", "QTY", "RATE", "AMOUNT"], 0.9),
    entry(PatternFamily::B, &["PARTICULARS", "QUANTITY", "RATE", "VALUE"], 0.9),
    entry(PatternFamily::B, &["GOODS", "QTY", "PRICE", "TOTAL"], 0.9),
    entry(PatternFamily::B, &["PRODUCT", "QUANTITY", "PRICE", "TOTAL"], 0.9),
    // Family C: batch/lot layouts
    entry(PatternFamily::C, &["DESCRIPTION", "HSN", "BATCH", "NET", "QUANTITY", "WEIGHT", "RATE"], 0.9),
    entry(PatternFamily::C, &["PRODUCT", "HSN/SAC", "LOT", "QTY", "WEIGHT", "RATE", "AMOUNT"], 0.9),
    entry_cols(PatternFamily::C, &["DESCRIPTION", "HSN", "BATCH", "NET", "BAGS", "WEIGHT", "RATE"], 0.9, "BAGS", "WEIGHT"),
    // Family D: bag + package + metric-ton quantity
    entry_cols(PatternFamily::D, &["DESCRIPTION", "HSN/SAC", "BATCH", "BAG", "PKG", "QUANTITY", "RATE", "PER", "AMOUNT"], 0.95, "QUANTITY", "WEIGHT"),
    entry_cols(PatternFamily::D, &["DESCRIPTION OF GOODS", "HSN/SAC", "BATCH", "BAG", "PKG", "QUANTITY", "RATE", "PER", "AMOUNT"], 0.95, "QUANTITY", "WEIGHT"),
    entry_cols(PatternFamily::D, &["SR", "DESCRIPTION", "HSN/SAC", "BATCH", "BAG", "PKG", "QUANTITY", "RATE", "PER", "AMOUNT"], 0.95, "QUANTITY", "WEIGHT"),
    entry_cols(PatternFamily::D, &["DESCRIPTION", "HSN/SAC", "BAG", "PKG", "QUANTITY", "RATE", "PER", "AMOUNT"], 0.95, "QUANTITY", "WEIGHT"),
    entry_cols(PatternFamily::D, &["DESCRIPTION", "HSN/SAC", "BAG", "PKG", "QUANTITY", "RATE", "PER"], 0.95, "QUANTITY", "WEIGHT"),
    // Generic fallback shapes
    entry(PatternFamily::Generic, &["DESCRIPTION", "QUANTITY", "RATE", "AMOUNT"], 0.7),
    entry(PatternFamily::Generic, &["ITEM", "QTY", "PRICE", "VALUE"], 0.7),
    entry(PatternFamily::Generic, &["GOODS", "QUANTITY", "PRICE", "TOTAL"], 0.7),
];

const QUANTITY_TERMS: &[&str] = &["QTY", "QUANTITY", "BAGS", "NOS", "PIECES", "PCS", "COUNT"];
const WEIGHT_TERMS: &[&str] = &["WEIGHT", "WT", "KG", "NET", "QUINTAL", "QTL", "MT", "TON"];
const RATE_TERMS: &[&str] = &["RATE", "PRICE", "UNIT PRICE", "/KG", "/QTL", "/BAG", "PER"];
const AMOUNT_TERMS: &[&str] = &["AMOUNT", "TOTAL", "VALUE", "AMT"];
const DESCRIPTION_TERMS: &[&str] = &["DESC", "ITEM", "PRODUCT", "COMMODITY", "PARTICULARS"];

/// Classify extracted invoice text into a layout pattern.
///
/// Pure function: the same text always yields the same pattern.
pub fn classify(text: &str) -> LayoutPattern {
    let upper = text.to_uppercase();

    // ── Signal (b): semantic roles from the first table's header row ─────
    let mut detected: BTreeMap<ColumnRole, String> = BTreeMap::new();
    let tables = tables_from_text(text);
    if let Some(header_row) = tables.first().and_then(|t| t.first()) {
        for header in header_row.iter().filter(|h| !h.is_empty()) {
            let h = header.to_uppercase();
            if let Some(role) = classify_header(&h) {
                detected.insert(role, h);
            }
        }
    }

    // ── Signal (a): best literal catalog match ───────────────────────────
    let mut best_score = 0.0_f64;
    let mut best_entry: Option<&CatalogEntry> = None;
    for candidate in CATALOG {
        let found = candidate
            .headers
            .iter()
            .filter(|h| upper.contains(&h.to_uppercase()))
            .count();
        let score = candidate.confidence * found as f64 / candidate.headers.len() as f64;
        if score > best_score {
            best_score = score;
            best_entry = Some(candidate);
        }
    }
    let best_family = best_entry.map(|e| e.family).unwrap_or(PatternFamily::Generic);

    // ── Tie-break: semantic detection takes precedence for the key ───────
    let pattern = if !detected.is_empty() {
        let quantity = detected
            .get(&ColumnRole::Quantity)
            .map(String::as_str)
            .unwrap_or("QUANTITY");
        let weight = detected
            .get(&ColumnRole::Weight)
            .map(String::as_str)
            .unwrap_or("WEIGHT");
        let rate = detected
            .get(&ColumnRole::Rate)
            .map(String::as_str)
            .unwrap_or("RATE");
        LayoutPattern {
            family: best_family,
            confidence: best_score.max(SEMANTIC_CONFIDENCE_FLOOR),
            key: format!("{}:{}:{}:{}", best_family, quantity, weight, rate),
            detected_columns: detected,
        }
    } else if best_score > LITERAL_MATCH_THRESHOLD {
        let candidate = best_entry.expect("score above threshold implies an entry");
        let key = if let Some(quantity_col) = candidate.quantity_col {
            format!(
                "{}:{}:{}",
                best_family,
                quantity_col,
                candidate.weight_col.unwrap_or("WEIGHT")
            )
        } else {
            let headers: Vec<String> = candidate
                .headers
                .iter()
                .take(3)
                .map(|h| h.replace(' ', "_"))
                .collect();
            format!("{}:{}", best_family, headers.join("-"))
        };
        LayoutPattern {
            family: best_family,
            detected_columns: BTreeMap::new(),
            confidence: best_score,
            key,
        }
    } else {
        LayoutPattern::generic()
    };

    debug!(
        key = pattern.key(),
        confidence = pattern.confidence,
        "layout classified"
    );
    pattern
}

/// Classify a single (uppercased) header label into a column role.
fn classify_header(header: &str) -> Option<ColumnRole> {
    if QUANTITY_TERMS.iter().any(|t| header.contains(t)) {
        Some(ColumnRole::Quantity)
    } else if WEIGHT_TERMS.iter().any(|t| header.contains(t)) {
        Some(ColumnRole::Weight)
    } else if RATE_TERMS.iter().any(|t| header.contains(t)) {
        Some(ColumnRole::Rate)
    } else if AMOUNT_TERMS.iter().any(|t| header.contains(t)) {
        Some(ColumnRole::Amount)
    } else if DESCRIPTION_TERMS.iter().any(|t| header.contains(t)) {
        Some(ColumnRole::Description)
    } else {
        None
    }
}

static TABLE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n-+\s*TABLE\s+\d+\.\d+\s*-+\n").expect("static regex"));

/// Recover table matrices from the delimited blocks the text extractor
/// appends (`--- TABLE p.i ---` followed by `" | "`-joined rows).
pub(crate) fn tables_from_text(text: &str) -> Vec<Vec<Vec<String>>> {
    let mut tables = Vec::new();
    let sections: Vec<&str> = TABLE_MARKER.split(text).collect();
    // The first section precedes any table marker.
    let candidates = if sections.len() > 1 {
        &sections[1..]
    } else {
        &sections[..]
    };

    for section in candidates {
        let rows: Vec<Vec<String>> = section
            .lines()
            .filter(|line| line.contains(" | "))
            .map(|line| line.split(" | ").map(|cell| cell.trim().to_string()).collect())
            .collect();
        if !rows.is_empty() {
            tables.push(rows);
        }
    }

    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_deterministic() {
        let text = "DESCRIPTION HSN QUANTITY WEIGHT RATE AMOUNT";
        assert_eq!(classify(text), classify(text));
    }

    #[test]
    fn empty_text_is_generic_at_floor() {
        let pattern = classify("");
        assert_eq!(pattern.family, PatternFamily::Generic);
        assert_eq!(pattern.confidence, 0.3);
        assert_eq!(pattern.key(), "generic");
    }

    #[test]
    fn headerless_prose_is_generic_at_floor() {
        let pattern = classify("Dear sir, please find attached the documents we discussed.");
        assert!(pattern.is_generic());
        assert_eq!(pattern.confidence, 0.3);
    }

    #[test]
    fn bag_pkg_table_matches_family_d_with_boost() {
        let text = "\n--- TABLE 1.1 ---\nDESCRIPTION | HSN/SAC | BAG | PKG | QUANTITY | RATE | PER | AMOUNT\nLoose Rice | 1006309 | 307 | 0.26 | 79.82 | 4850 | KGS | 387127\n";
        let pattern = classify(text);
        assert_eq!(pattern.family, PatternFamily::D);
        assert!(
            pattern.confidence >= 0.95,
            "confidence {}",
            pattern.confidence
        );
        assert_eq!(
            pattern.detected_columns.get(&ColumnRole::Quantity).map(String::as_str),
            Some("QUANTITY")
        );
        assert!(pattern.key().starts_with("pattern_d:QUANTITY:"));
    }

    #[test]
    fn semantic_detection_floors_confidence() {
        // Headers recognizable by role but matching no catalog entry well.
        let text = "\n--- TABLE 1.1 ---\nCOMMODITY | NOS | /QTL\nWheat | 12 | 2100\n";
        let pattern = classify(text);
        assert!(pattern.confidence >= 0.4);
        assert!(!pattern.detected_columns.is_empty());
    }

    #[test]
    fn literal_match_without_table_uses_catalog_key() {
        let text = "ITEM  QTY  RATE  AMOUNT\nrice 5 100 500";
        let pattern = classify(text);
        assert!(pattern.confidence > 0.3);
        assert!(pattern.detected_columns.is_empty());
        assert!(pattern.key().contains(':'));
    }

    #[test]
    fn tables_from_text_parses_marker_blocks() {
        let text = "header\n--- TABLE 1.1 ---\nA | B\n1 | 2\n--- TABLE 2.1 ---\nC | D\n";
        let tables = tables_from_text(text);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0][0], vec!["A", "B"]);
        assert_eq!(tables[1][0], vec!["C", "D"]);
    }
}
