//! Result records returned by the extraction pipeline.
//!
//! [`ExtractionResult`] is the only value that ever crosses the
//! `process_invoice` boundary — success and every failure mode alike are
//! encoded here, so callers (the HTTP layer, the batch driver, the CLI)
//! never need exception handling. The tagged-constructor pattern
//! ([`ExtractionResult::failure`] / [`ExtractionResult::rate_limited`])
//! keeps the "always return a result, never throw" contract enforceable
//! at the type level.

use serde::{Deserialize, Serialize};

/// Sentinel used for any field the model could not extract.
pub const NOT_AVAILABLE: &str = "N/A";

/// One extracted product line.
///
/// Numeric fields are normalized strings holding only digits, a decimal
/// point and currency symbols — or the `"N/A"` sentinel. `weight` keeps the
/// model's (cleaned) value, `original_weight` the value as returned, and
/// `weight_in_kg` the kilogram-normalized figure when the unit was
/// recognized (qtl, ton, kg), otherwise the original string unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductLine {
    #[serde(default = "na")]
    pub goods_description: String,
    #[serde(default = "na")]
    pub hsn_sac_code: String,
    #[serde(default = "na")]
    pub quantity: String,
    #[serde(default = "na")]
    pub weight: String,
    #[serde(default = "na")]
    pub original_weight: String,
    #[serde(default = "na")]
    pub weight_in_kg: String,
    #[serde(default = "na")]
    pub rate: String,
    #[serde(default = "na")]
    pub amount: String,
}

fn na() -> String {
    NOT_AVAILABLE.to_string()
}

impl Default for ProductLine {
    fn default() -> Self {
        Self {
            goods_description: na(),
            hsn_sac_code: na(),
            quantity: na(),
            weight: na(),
            original_weight: na(),
            weight_in_kg: na(),
            rate: na(),
            amount: na(),
        }
    }
}

/// Per-field confidence in [0, 1], plus the unweighted mean.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScores {
    pub company_name: f64,
    pub invoice_number: f64,
    pub fssai_number: f64,
    pub invoice_date: f64,
    pub products: f64,
    pub overall: f64,
}

/// The structured record produced for one invoice.
///
/// Created fresh per `process_invoice` call; the core never persists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub success: bool,
    /// Present iff `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present iff the failure was caused by service throttling; the batch
    /// layer uses it to schedule a deferred retry pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limited: Option<bool>,
    pub company_name: String,
    pub invoice_number: String,
    /// `DD/MM/YYYY` after normalization, or `"N/A"`.
    pub invoice_date: String,
    pub fssai_number: String,
    pub products: Vec<ProductLine>,
    pub confidence_scores: ConfidenceScores,
    /// Layout pattern key the successful (or last) attempt used.
    pub pattern_used: String,
    /// Wall-clock seconds spent in `process_invoice`.
    pub processing_time: f64,
}

/// The model's parsed response before normalization.
///
/// Field defaults are the `"N/A"` sentinel so a partially filled response
/// still deserializes; the validator decides what is actually missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(default = "na")]
    pub company_name: String,
    #[serde(default = "na")]
    pub invoice_number: String,
    #[serde(default = "na")]
    pub fssai_number: String,
    #[serde(default = "na")]
    pub invoice_date: String,
    #[serde(default)]
    pub products: Vec<ProductLine>,
}

impl Default for CandidateRecord {
    fn default() -> Self {
        Self {
            company_name: na(),
            invoice_number: na(),
            fssai_number: na(),
            invoice_date: na(),
            products: Vec::new(),
        }
    }
}

impl ExtractionResult {
    /// A failure record with every extracted field set to the sentinel.
    pub fn failure(error: impl Into<String>, pattern_used: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            rate_limited: None,
            company_name: na(),
            invoice_number: na(),
            invoice_date: na(),
            fssai_number: na(),
            products: Vec::new(),
            confidence_scores: ConfidenceScores::default(),
            pattern_used: pattern_used.into(),
            processing_time: 0.0,
        }
    }

    /// A failure record tagged as caused by throttling.
    pub fn rate_limited(error: impl Into<String>, pattern_used: impl Into<String>) -> Self {
        let mut r = Self::failure(error, pattern_used);
        r.rate_limited = Some(true);
        r
    }

    /// Stamp the wall-clock duration, in seconds.
    pub fn with_processing_time(mut self, secs: f64) -> Self {
        self.processing_time = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_record_shape() {
        let r = ExtractionResult::failure("no text", "generic");
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("no text"));
        assert!(r.rate_limited.is_none());
        assert_eq!(r.company_name, NOT_AVAILABLE);
        assert!(r.products.is_empty());
    }

    #[test]
    fn rate_limited_record_sets_flag() {
        let r = ExtractionResult::rate_limited("throttled", "pattern_a");
        assert_eq!(r.rate_limited, Some(true));
        assert!(!r.success);
    }

    #[test]
    fn error_field_omitted_on_success_serialization() {
        let mut r = ExtractionResult::failure("x", "generic");
        r.success = true;
        r.error = None;
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("\"error\""));
        assert!(!json.contains("\"rate_limited\""));
    }

    #[test]
    fn product_line_deserializes_with_missing_fields() {
        let p: ProductLine =
            serde_json::from_str(r#"{"goods_description": "STEAM RICE"}"#).unwrap();
        assert_eq!(p.goods_description, "STEAM RICE");
        assert_eq!(p.quantity, NOT_AVAILABLE);
    }
}
