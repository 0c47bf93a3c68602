//! Extraction prompts for the document-understanding service.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the extraction contract (a new
//!    field, a new layout quirk) requires editing exactly one place.
//! 2. **Testability** — unit tests inspect prompts directly without calling
//!    a real service, so prompt regressions are caught cheaply.
//!
//! Layout-specific disambiguation is an ordered rule table: a predicate
//! over the raw text selects an instruction block, first match wins. New
//! layouts are added by appending a rule, not by editing control flow.

use crate::classify::LayoutPattern;
use once_cell::sync::Lazy;
use regex::Regex;

/// Fixed field-extraction instruction block: the ten required fields and
/// the column-interpretation rules that hold across all layouts.
pub const BASE_PROMPT: &str = r#"You are an expert in extracting structured data from invoices. Extract these details accurately:

1. **Goods Description**: The exact product name/description as written in the invoice.
2. **HSN/SAC Code**: The HSN or SAC numerical code.
3. **Quantity**: The numerical count of items/bags/pieces. This is often labeled as "BAGS" or "QTY".
4. **Weight**: The total weight with unit (kg, qtl, tons) - NOT the weight per unit.
5. **Rate**: The rate per unit of weight (often per kg/quintal). Look for a monetary value.
6. **Amount**: The total amount for this product. This is not the invoice total.
7. **Company Name**: The name of the SELLER (not buyer) issuing the invoice.
8. **Invoice Number**: Only the number, without "Invoice No." prefix.
9. **FSSAI Number**: The seller's FSSAI license number if available.
10. **Date of Invoice**: The invoice date.

**CRITICALLY IMPORTANT FOR COLUMN INTERPRETATION**:
- "BAGS" or similar columns ALWAYS represent the quantity (number of bags/units)
- "NET (Kg)" or similar columns represent the total weight, not quantity
- "NET (Kg) PER BAG" represents weight per individual bag, not the quantity
- "Rate" is usually price per weight unit (per kg/quintal) not price per bag

If a column is labeled "NET (Kg) PER BAG" or similar, this is NOT the quantity - it's the weight of each individual bag.
If a different column shows the count of bags (often labeled "BAGS"), that is the quantity."#;

/// Disambiguation block for layouts mixing a bag count with a
/// weight-per-bag column.
const BAGGED_WEIGHT_RULES: &str = r#"
**SPECIAL COLUMN HANDLING REQUIRED IN THIS INVOICE**:

This invoice has a specific table structure that MUST be interpreted as follows:

1. "BAGS" column = QUANTITY (count of bags)
   - This is always a whole number like 200, 300, 500 bags
   - Goes into the "quantity" field

2. "NET (Kg) PER BAG" or similar = WEIGHT PER UNIT
   - This is the weight of ONE bag (like 25kg, 50kg)
   - NOT a quantity - DO NOT use this for the quantity field
   - DO NOT use this as the total weight either

3. "NET" column = TOTAL WEIGHT
   - This is the total weight (BAGS x weight per bag)
   - This goes into the "weight" field (with kg unit)

4. "Rate" column = PRICE PER WEIGHT UNIT
   - Usually price per 100kg or per quintal
   - This goes into the "rate" field

MANDATORY FIELD MAPPING:
- "BAGS" -> quantity field
- "NET" -> weight field (with kg unit)
- "Rate" -> rate field

Example row with CORRECT interpretation:
| Description | HSN | BAGS | NET (Kg) PER BAG | NET | Rate | Amount |
| ----------- | --- | ---- | ---------------- | --- | ---- | ------ |
| STEAM RICE  | 123 | 200  | 25               | 5000| 2000 | 100000 |

You MUST extract this as:
```json
{
  "goods_description": "STEAM RICE",
  "hsn_sac_code": "123",
  "quantity": "200",
  "weight": "5000 kg",
  "rate": "2000",
  "amount": "100000"
}
```

DO NOT use "NET (Kg) PER BAG" as the quantity under any circumstances."#;

/// Disambiguation block for bag/package layouts where the QUANTITY column
/// is a decimal in metric tons.
const BAG_PKG_QUANTITY_RULES: &str = r#"
**SPECIAL COLUMN HANDLING REQUIRED FOR THIS INVOICE FORMAT**:

This invoice has a multi-column structure that MUST be interpreted correctly:

1. "BAG" column = Number of bags (a packaging count)
   - This is NOT the primary quantity for extraction

2. "PKG" column = Package information (usually a code)
   - This is NOT used for quantity calculation

3. "QUANTITY" column = The actual TOTAL QUANTITY in metric tons (MT) or similar unit
   - This is the MAIN quantity to extract
   - This is a decimal value (like 0.26, 80.08, etc.)
   - Example: 0.26 MT = 260 kg

4. "RATE" column = Price per unit
   - The "PER" column specifies the unit (usually KGS)

MANDATORY FIELD MAPPING:
- Description column -> goods_description
- HSN/SAC column -> hsn_sac_code
- QUANTITY column -> quantity/weight field (include the unit like MT)
- RATE column -> rate field

Example row with CORRECT interpretation:
| Description | HSN/SAC | Batch | Bag | Pkg | Quantity | Rate | Per | Amount |
| ----------- | ------- | ----- | --- | --- | -------- | ---- | --- | ------ |
| Loose Rice  | 1006309 | 511   | 307 | 0.26| 79.82    | 4850 | KGS | 387127 |

You MUST extract this as:
```json
{
  "goods_description": "Loose Rice",
  "hsn_sac_code": "1006309",
  "quantity": "79.82 MT",
  "rate": "4850",
  "amount": "387127"
}
```

If the QUANTITY column has a small decimal value (like 0.26), it's likely in Metric Tons (MT) and should be interpreted as such."#;

/// One worked example of the expected response shape.
const EXAMPLE_JSON: &str = r#"{
  "company_name": "SHRI EXAMPLE RICE MILL",
  "invoice_number": "780",
  "fssai_number": "12345678901234",
  "invoice_date": "26/06/2023",
  "products": [
    {
      "goods_description": "STEAM KOLAM RICE",
      "hsn_sac_code": "10063090",
      "quantity": "500",
      "weight": "25000 kg",
      "rate": "4300",
      "amount": "1075000"
    }
  ]
}"#;

/// A layout-disambiguation rule: when `applies` matches the (uppercased)
/// source text, `instructions` is appended to the prompt.
struct DisambiguationRule {
    name: &'static str,
    applies: fn(&str) -> bool,
    instructions: &'static str,
}

/// Ordered rule table, first match wins.
static RULES: &[DisambiguationRule] = &[
    DisambiguationRule {
        name: "bagged-weight-per-unit",
        applies: |upper| {
            upper.contains("NET (KG) PER BAG")
                || upper.contains("PER BAG")
                || upper.contains("NET (KG)")
                || (upper.contains("BAGS") && upper.contains("NET") && upper.contains("RATE"))
        },
        instructions: BAGGED_WEIGHT_RULES,
    },
    DisambiguationRule {
        name: "bag-pkg-metric-ton",
        applies: |upper| {
            upper.contains("BAG") && upper.contains("PKG") && upper.contains("QUANTITY")
        },
        instructions: BAG_PKG_QUANTITY_RULES,
    },
];

/// Build the extraction prompt for one attempt.
///
/// Assembled in order: base instruction block, the first matching
/// layout-disambiguation block (if any), column-type hints derived from a
/// numeric scan of any table (if the scan classified at least one column),
/// the worked example, and the (possibly truncated) source text.
pub fn build(pattern: &LayoutPattern, text: &str, max_source_chars: usize) -> String {
    let upper = text.to_uppercase();
    let mut prompt = String::with_capacity(BASE_PROMPT.len() + text.len().min(max_source_chars) + 2048);
    prompt.push_str(BASE_PROMPT);

    if let Some(rule) = RULES.iter().find(|r| (r.applies)(&upper)) {
        tracing::debug!(rule = rule.name, pattern = pattern.key(), "layout rule applied");
        prompt.push('\n');
        prompt.push_str(rule.instructions);
    }

    if let Some(hints) = column_hints(text) {
        prompt.push_str("\n\n**DETECTED COLUMN STRUCTURE**:\n");
        prompt.push_str(&hints);
    }

    prompt.push_str("\n\nHere's an example of the expected JSON output:\n");
    prompt.push_str(EXAMPLE_JSON);
    prompt.push_str("\n\nNow extract from this invoice text:\n");
    prompt.push_str(&truncate_source(text, max_source_chars));

    prompt
}

static NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("static regex"));

/// Lightweight numeric-range analysis of pipe-delimited table rows.
///
/// Classifies each column as quantity / weight-per-unit / total weight /
/// rate / amount from its header keyword, and reports the observed value
/// range so the model can sanity-check its column mapping. Returns `None`
/// when no column could be classified.
fn column_hints(text: &str) -> Option<String> {
    let mut headers: Vec<String> = Vec::new();
    let mut ranges: Vec<Option<(f64, f64)>> = Vec::new();

    for line in text.lines() {
        if line.matches('|').count() < 3 {
            continue;
        }
        let cells: Vec<&str> = line.split('|').map(str::trim).collect();
        if headers.is_empty() {
            headers = cells.iter().map(|c| c.to_string()).collect();
            ranges = vec![None; headers.len()];
            continue;
        }
        for (i, cell) in cells.iter().enumerate().take(headers.len()) {
            if let Some(m) = NUMERIC.find(cell) {
                if let Ok(value) = m.as_str().parse::<f64>() {
                    ranges[i] = Some(match ranges[i] {
                        Some((min, max)) => (min.min(value), max.max(value)),
                        None => (value, value),
                    });
                }
            }
        }
    }

    if headers.is_empty() {
        return None;
    }

    let mut lines = Vec::new();
    for (i, header) in headers.iter().enumerate() {
        let Some((min, max)) = ranges[i] else { continue };
        let Some(col_type) = classify_column(&header.to_uppercase()) else {
            continue;
        };
        lines.push(format!(
            "Column '{}': {} - Value range: {} to {}",
            header, col_type, min, max
        ));
    }

    if lines.is_empty() {
        return None;
    }

    let found: Vec<String> = headers
        .iter()
        .filter(|h| !h.is_empty())
        .map(|h| format!("\"{}\"", h))
        .collect();
    Some(format!(
        "Found columns: {}\n\nColumn type suggestions based on patterns:\n{}",
        found.join(", "),
        lines.join("\n")
    ))
}

/// Header-keyword column typing used by the hint section.
fn classify_column(header: &str) -> Option<&'static str> {
    if ["BAG", "QTY", "QUANTITY", "PCS"].iter().any(|t| header.contains(t)) {
        Some("QUANTITY (count of items/bags)")
    } else if header.contains("PER")
        && ["KG", "WEIGHT", "NET"].iter().any(|t| header.contains(t))
    {
        Some("WEIGHT PER UNIT")
    } else if ["WEIGHT", "NET", "KG"].iter().any(|t| header.contains(t)) {
        Some("TOTAL WEIGHT")
    } else if ["RATE", "PRICE"].iter().any(|t| header.contains(t)) {
        Some("RATE (price per unit)")
    } else if ["AMOUNT", "TOTAL", "VALUE"].iter().any(|t| header.contains(t)) {
        Some("AMOUNT (total price)")
    } else {
        None
    }
}

/// Cap the source text, always preserving the head of the document (where
/// the seller block and invoice metadata live) and marking the cut.
fn truncate_source(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}\u{2026}")
}
