//! Validation of the model's structured response.
//!
//! [`validate`] is total: it never fails, it returns an ordered error list.
//! An empty list means valid. The orchestrator folds each error category
//! into targeted corrective instructions for the next attempt, so the
//! variants here are the vocabulary of the refinement loop.
//!
//! Two normalizations happen in place as side effects, because every
//! downstream consumer wants them regardless of validity: a leading
//! "M/s "-style prefix is stripped from the company name, and the invoice
//! number is reduced to alphanumeric characters.

use crate::postprocess::{clean_invoice_number, strip_company_prefix};
use crate::record::{CandidateRecord, NOT_AVAILABLE};
use std::fmt;

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required top-level field is empty.
    MissingField { field: &'static str },
    /// The invoice number contains no digit at all.
    InvoiceNumberWithoutDigits { value: String },
    /// The product list is empty.
    NoProducts,
    /// A numeric product field came back as the "N/A" sentinel.
    SuspiciousProductField {
        index: usize,
        field: &'static str,
        value: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingField { field } => {
                write!(f, "Missing required field: {field}")
            }
            ValidationError::InvoiceNumberWithoutDigits { value } => {
                write!(f, "Invoice number '{value}' doesn't contain any digits")
            }
            ValidationError::NoProducts => write!(f, "No products extracted"),
            ValidationError::SuspiciousProductField {
                index,
                field,
                value,
            } => write!(
                f,
                "Product {} has suspicious '{}' value: {}",
                index + 1,
                field,
                value
            ),
        }
    }
}

/// Check the candidate against required-field and shape invariants.
///
/// Pure except for the two in-place normalizations described in the module
/// docs. `_source_text` is accepted for parity with the post-processor's
/// signature; current checks do not consult it.
pub fn validate(candidate: &mut CandidateRecord, _source_text: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if candidate.company_name.trim().is_empty() {
        errors.push(ValidationError::MissingField {
            field: "company_name",
        });
    }
    if candidate.invoice_number.trim().is_empty() {
        errors.push(ValidationError::MissingField {
            field: "invoice_number",
        });
    }
    if candidate.invoice_date.trim().is_empty() {
        errors.push(ValidationError::MissingField {
            field: "invoice_date",
        });
    }
    if candidate.products.is_empty() {
        errors.push(ValidationError::MissingField { field: "products" });
    }

    candidate.company_name = strip_company_prefix(&candidate.company_name);

    if candidate.invoice_number != NOT_AVAILABLE {
        if !candidate.invoice_number.chars().any(|c| c.is_ascii_digit()) {
            errors.push(ValidationError::InvoiceNumberWithoutDigits {
                value: candidate.invoice_number.clone(),
            });
        }
        candidate.invoice_number = clean_invoice_number(&candidate.invoice_number);
    }

    if candidate.products.is_empty() {
        errors.push(ValidationError::NoProducts);
    } else {
        for (index, product) in candidate.products.iter().enumerate() {
            for (field, value) in [
                ("quantity", &product.quantity),
                ("rate", &product.rate),
                ("amount", &product.amount),
            ] {
                if value == NOT_AVAILABLE {
                    errors.push(ValidationError::SuspiciousProductField {
                        index,
                        field,
                        value: value.clone(),
                    });
                }
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ProductLine;

    fn complete_candidate() -> CandidateRecord {
        CandidateRecord {
            company_name: "Example Rice Mill".into(),
            invoice_number: "780".into(),
            fssai_number: "12345678901234".into(),
            invoice_date: "26/06/2023".into(),
            products: vec![ProductLine {
                goods_description: "STEAM RICE".into(),
                quantity: "500".into(),
                rate: "4300".into(),
                amount: "1075000".into(),
                ..ProductLine::default()
            }],
        }
    }

    #[test]
    fn complete_record_is_valid() {
        let mut c = complete_candidate();
        assert!(validate(&mut c, "").is_empty());
    }

    #[test]
    fn empty_fields_are_reported_in_order() {
        let mut c = CandidateRecord {
            company_name: String::new(),
            invoice_number: String::new(),
            invoice_date: String::new(),
            ..CandidateRecord::default()
        };
        let errors = validate(&mut c, "");
        assert_eq!(
            errors[0],
            ValidationError::MissingField {
                field: "company_name"
            }
        );
        assert!(errors.contains(&ValidationError::NoProducts));
    }

    #[test]
    fn company_prefix_is_stripped_in_place() {
        let mut c = complete_candidate();
        c.company_name = "M/s Example Rice Mill".into();
        validate(&mut c, "");
        assert_eq!(c.company_name, "Example Rice Mill");
    }

    #[test]
    fn invoice_number_without_digits_is_flagged() {
        let mut c = complete_candidate();
        c.invoice_number = "UNKNOWN".into();
        let errors = validate(&mut c, "");
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvoiceNumberWithoutDigits { .. })));
    }

    #[test]
    fn invoice_number_is_normalized_in_place() {
        let mut c = complete_candidate();
        c.invoice_number = "INV-123/A#".into();
        let errors = validate(&mut c, "");
        assert!(errors.is_empty());
        assert_eq!(c.invoice_number, "INV123A");
    }

    #[test]
    fn sentinel_invoice_number_is_left_alone() {
        let mut c = complete_candidate();
        c.invoice_number = NOT_AVAILABLE.into();
        let errors = validate(&mut c, "");
        assert!(errors.is_empty());
        assert_eq!(c.invoice_number, NOT_AVAILABLE);
    }

    #[test]
    fn na_numeric_product_fields_are_suspicious() {
        let mut c = complete_candidate();
        c.products[0].rate = NOT_AVAILABLE.into();
        let errors = validate(&mut c, "");
        assert_eq!(
            errors,
            vec![ValidationError::SuspiciousProductField {
                index: 0,
                field: "rate",
                value: NOT_AVAILABLE.into(),
            }]
        );
    }

    #[test]
    fn validation_never_panics_on_defaults() {
        let mut c = CandidateRecord::default();
        let errors = validate(&mut c, "");
        assert!(!errors.is_empty());
    }
}
