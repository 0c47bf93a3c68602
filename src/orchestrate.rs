//! The attempt/validate/refine loop against the document-understanding
//! service.
//!
//! Each document runs a small state machine: `Attempting(k)` transitions to
//! `Success` (validated record), `Refining` (validation errors folded into
//! corrective clauses for the next prompt), `Backoff` (throttled — record
//! the document and sleep exponentially), or `Exhausted` (attempt budget
//! spent). The loop below keeps that structure explicit: an attempt
//! counter, an accumulated list of corrective clauses, and a per-attempt
//! outcome tag.
//!
//! ## Backoff
//!
//! Throttling errors sleep `1 s → 2 s → ... → 32 s` plus up to one second
//! of jitter, resetting on any successful call; other transient errors
//! sleep a flat second. Sleeps never hold the rate limiter's lock.

use crate::classify::LayoutPattern;
use crate::config::ProcessingConfig;
use crate::prompts;
use crate::ratelimit::RateLimiter;
use crate::record::{CandidateRecord, ProductLine, NOT_AVAILABLE};
use crate::service::DocumentModel;
use crate::validate::{validate, ValidationError};
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Initial backoff after a throttling error.
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Backoff ceiling for consecutive throttling errors.
const BACKOFF_MAX: Duration = Duration::from_secs(32);

/// Flat delay after a non-throttling transient error or unparseable
/// response.
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    ValidationFailed,
    RateLimited,
    TransientError,
    ParseError,
}

/// Record of a single attempt, kept for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct ExtractionAttempt {
    /// 1-based attempt index.
    pub index: u32,
    pub prompt: String,
    /// Raw model response, when a call completed.
    pub response: Option<String>,
    /// Parsed candidate, when the response was well-formed.
    pub candidate: Option<CandidateRecord>,
    pub errors: Vec<ValidationError>,
    pub outcome: AttemptOutcome,
}

/// Result of one orchestration pass over a document.
#[derive(Debug)]
pub struct Orchestration {
    /// The validated record, when any attempt succeeded.
    pub record: Option<CandidateRecord>,
    /// Every attempt made, in order.
    pub attempts: Vec<ExtractionAttempt>,
}

impl Orchestration {
    /// Whether any attempt in this pass hit the throttling condition.
    pub fn was_throttled(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| a.outcome == AttemptOutcome::RateLimited)
    }
}

/// Drive the extraction loop for one document.
///
/// `doc_id` identifies the document in the limiter's failed-file set; it is
/// recorded on every throttling error so the batch layer can schedule a
/// deferred retry.
pub async fn run_extraction(
    model: &dyn DocumentModel,
    limiter: &RateLimiter,
    pattern: &LayoutPattern,
    text: &str,
    config: &ProcessingConfig,
    doc_id: &str,
) -> Orchestration {
    let base_prompt = prompts::build(pattern, text, config.max_source_chars);
    let mut corrective: Vec<&'static str> = Vec::new();
    let mut backoff = BACKOFF_INITIAL;
    let mut attempts: Vec<ExtractionAttempt> = Vec::new();

    for index in 1..=config.max_attempts {
        let prompt = compose_prompt(&base_prompt, &corrective);
        info!(
            attempt = index,
            max = config.max_attempts,
            pattern = pattern.key(),
            "extraction attempt"
        );

        // Force a wait on retries so a refining loop cannot hammer the
        // service back-to-back.
        limiter.wait_if_needed(index > 1).await;
        limiter.add_call();

        match model.generate(&prompt).await {
            Ok(raw) => {
                backoff = BACKOFF_INITIAL;
                match parse_candidate(&raw) {
                    Some(mut candidate) => {
                        let errors = validate(&mut candidate, text);
                        if errors.is_empty() {
                            attempts.push(ExtractionAttempt {
                                index,
                                prompt,
                                response: Some(raw),
                                candidate: Some(candidate.clone()),
                                errors,
                                outcome: AttemptOutcome::Success,
                            });
                            return Orchestration {
                                record: Some(candidate),
                                attempts,
                            };
                        }

                        warn!(attempt = index, ?errors, "validation failed; refining prompt");
                        for clause in refinement_clauses(&errors) {
                            if !corrective.contains(&clause) {
                                corrective.push(clause);
                            }
                        }
                        attempts.push(ExtractionAttempt {
                            index,
                            prompt,
                            response: Some(raw),
                            candidate: Some(candidate),
                            errors,
                            outcome: AttemptOutcome::ValidationFailed,
                        });
                    }
                    None => {
                        warn!(attempt = index, "response was not parseable JSON");
                        attempts.push(ExtractionAttempt {
                            index,
                            prompt,
                            response: Some(raw),
                            candidate: None,
                            errors: Vec::new(),
                            outcome: AttemptOutcome::ParseError,
                        });
                        if index < config.max_attempts {
                            sleep(TRANSIENT_RETRY_DELAY).await;
                        }
                    }
                }
            }
            Err(e) if e.is_throttled() => {
                limiter.add_failed_file(doc_id);
                let jitter = Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..1.0));
                let wait = backoff + jitter;
                warn!(
                    attempt = index,
                    wait_secs = wait.as_secs_f64(),
                    "service throttled; backing off"
                );
                attempts.push(ExtractionAttempt {
                    index,
                    prompt,
                    response: None,
                    candidate: None,
                    errors: Vec::new(),
                    outcome: AttemptOutcome::RateLimited,
                });
                if index < config.max_attempts {
                    sleep(wait).await;
                }
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
            Err(e) => {
                warn!(attempt = index, error = %e, "transient service error");
                attempts.push(ExtractionAttempt {
                    index,
                    prompt,
                    response: None,
                    candidate: None,
                    errors: Vec::new(),
                    outcome: AttemptOutcome::TransientError,
                });
                if index < config.max_attempts {
                    sleep(TRANSIENT_RETRY_DELAY).await;
                }
            }
        }
    }

    debug!(attempts = attempts.len(), "attempt budget exhausted");
    Orchestration {
        record: None,
        attempts,
    }
}

fn compose_prompt(base: &str, corrective: &[&'static str]) -> String {
    if corrective.is_empty() {
        return base.to_string();
    }
    format!(
        "{base}\n\n**IMPORTANT CORRECTIONS NEEDED:**\n{}",
        corrective.join("\n")
    )
}

/// Parse the model response, tolerating fenced code blocks.
fn parse_candidate(raw: &str) -> Option<CandidateRecord> {
    let body = strip_fences(raw);
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;

    match value {
        serde_json::Value::Array(_) => {
            // Some responses come back as a bare product array; lift it
            // into the record shape, taking common fields from the first
            // element when present.
            let first = value.get(0).cloned().unwrap_or_default();
            let common = |field: &str| {
                first
                    .get(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or(NOT_AVAILABLE)
                    .to_string()
            };
            let products: Vec<ProductLine> = serde_json::from_value(value).ok()?;
            Some(CandidateRecord {
                company_name: common("company_name"),
                invoice_number: common("invoice_number"),
                fssai_number: common("fssai_number"),
                invoice_date: common("invoice_date"),
                products,
            })
        }
        serde_json::Value::Object(_) => serde_json::from_value(value).ok(),
        _ => None,
    }
}

/// Extract the payload from a fenced response, or pass it through.
fn strip_fences(raw: &str) -> &str {
    if let Some(start) = raw.find("```json") {
        let rest = &raw[start + "```json".len()..];
        return rest.split("```").next().unwrap_or(rest);
    }
    if let Some(start) = raw.find("```") {
        let rest = &raw[start + 3..];
        return rest.split("```").next().unwrap_or(rest);
    }
    raw
}

/// Targeted corrective instruction per validation-error category.
fn refinement_clauses(errors: &[ValidationError]) -> Vec<&'static str> {
    let mut clauses = Vec::new();
    for error in errors {
        let clause = match error {
            ValidationError::MissingField {
                field: "company_name",
            } => "- The company name should be the SELLER (the entity issuing the invoice), not the buyer.",
            ValidationError::MissingField {
                field: "invoice_number",
            }
            | ValidationError::InvoiceNumberWithoutDigits { .. } => {
                "- Extract ONLY the number part after 'Invoice No.' - do not include the prefix."
            }
            ValidationError::MissingField {
                field: "invoice_date",
            } => "- The invoice date usually appears near the invoice number at the top of the document.",
            ValidationError::MissingField { field: "products" }
            | ValidationError::NoProducts => {
                "- Look carefully for the product table. It usually contains columns for description, quantity, rate, and amount."
            }
            ValidationError::SuspiciousProductField {
                field: "quantity", ..
            } => "- Look for numerical quantity values, often in a column labeled 'BAGS' or 'QTY'.",
            ValidationError::SuspiciousProductField { field: "rate", .. } => {
                "- The rate should be a monetary value, often in a column labeled 'RATE' or 'Price'."
            }
            ValidationError::SuspiciousProductField {
                field: "amount", ..
            } => "- The amount should be the total cost for each product, often in a column labeled 'AMOUNT' or 'Total'.",
            _ => continue,
        };
        if !clauses.contains(&clause) {
            clauses.push(clause);
        }
    }
    if !clauses.is_empty() {
        clauses.push("- Ensure all extracted values match exactly what's in the invoice.");
        clauses.push("- Pay special attention to the table structure for product details.");
    }
    clauses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedModel {
        responses: Mutex<VecDeque<Result<String, ServiceError>>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<String, ServiceError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl DocumentModel for ScriptedModel {
        async fn generate(&self, _prompt: &str) -> Result<String, ServiceError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ServiceError::EmptyResponse))
        }
    }

    fn fast_config() -> ProcessingConfig {
        ProcessingConfig::builder()
            .max_attempts(2)
            .max_calls_per_window(100)
            .window(Duration::from_millis(200))
            .build()
            .unwrap()
    }

    const VALID_RESPONSE: &str = r#"{
        "company_name": "Example Rice Mill",
        "invoice_number": "780",
        "fssai_number": "12345678901234",
        "invoice_date": "26/06/2023",
        "products": [{
            "goods_description": "STEAM RICE",
            "hsn_sac_code": "10063090",
            "quantity": "500",
            "weight": "25000 kg",
            "rate": "4300",
            "amount": "1075000"
        }]
    }"#;

    #[tokio::test]
    async fn first_attempt_success() {
        let model = ScriptedModel::new(vec![Ok(VALID_RESPONSE.to_string())]);
        let limiter = RateLimiter::new(100, Duration::from_secs(60));
        let config = fast_config();
        let pattern = classify("");

        let run = run_extraction(&model, &limiter, &pattern, "", &config, "doc.pdf").await;
        assert!(run.record.is_some());
        assert_eq!(run.attempts.len(), 1);
        assert_eq!(run.attempts[0].outcome, AttemptOutcome::Success);
        assert!(!run.was_throttled());
    }

    #[tokio::test]
    async fn fenced_response_is_parsed() {
        let fenced = format!("```json\n{VALID_RESPONSE}\n```");
        let model = ScriptedModel::new(vec![Ok(fenced)]);
        let limiter = RateLimiter::new(100, Duration::from_secs(60));
        let config = fast_config();
        let pattern = classify("");

        let run = run_extraction(&model, &limiter, &pattern, "", &config, "doc.pdf").await;
        assert_eq!(
            run.record.unwrap().company_name,
            "Example Rice Mill"
        );
    }

    #[tokio::test]
    async fn validation_failure_refines_next_prompt() {
        let incomplete = r#"{"company_name": "Example Mill", "invoice_number": "780",
                             "invoice_date": "26/06/2023", "products": []}"#;
        let model = ScriptedModel::new(vec![
            Ok(incomplete.to_string()),
            Ok(VALID_RESPONSE.to_string()),
        ]);
        let limiter = RateLimiter::new(100, Duration::from_millis(200));
        let config = fast_config();
        let pattern = classify("");

        let run = run_extraction(&model, &limiter, &pattern, "", &config, "doc.pdf").await;
        assert!(run.record.is_some());
        assert_eq!(run.attempts.len(), 2);
        assert_eq!(run.attempts[0].outcome, AttemptOutcome::ValidationFailed);
        assert!(!run.attempts[0].prompt.contains("IMPORTANT CORRECTIONS NEEDED"));
        assert!(run.attempts[1].prompt.contains("IMPORTANT CORRECTIONS NEEDED"));
        assert!(run.attempts[1]
            .prompt
            .contains("Look carefully for the product table"));
    }

    #[tokio::test]
    async fn throttling_exhausts_and_records_document() {
        let model = ScriptedModel::new(vec![
            Err(ServiceError::Throttled { retry_after: None }),
            Err(ServiceError::Throttled { retry_after: None }),
        ]);
        let limiter = RateLimiter::new(100, Duration::from_millis(200));
        let config = fast_config();
        let pattern = classify("");

        let run =
            run_extraction(&model, &limiter, &pattern, "", &config, "invoice-42.pdf").await;
        assert!(run.record.is_none());
        assert!(run.was_throttled());
        assert_eq!(run.attempts.len(), 2);
        assert!(limiter.has_failed_file("invoice-42.pdf"));
    }

    #[tokio::test]
    async fn parse_error_retries_then_succeeds() {
        let model = ScriptedModel::new(vec![
            Ok("this is not json at all".to_string()),
            Ok(VALID_RESPONSE.to_string()),
        ]);
        let limiter = RateLimiter::new(100, Duration::from_millis(200));
        let config = fast_config();
        let pattern = classify("");

        let run = run_extraction(&model, &limiter, &pattern, "", &config, "doc.pdf").await;
        assert_eq!(run.attempts[0].outcome, AttemptOutcome::ParseError);
        assert!(run.record.is_some());
    }

    #[test]
    fn bare_array_response_is_lifted() {
        let raw = r#"[{"company_name": "Mill", "invoice_number": "9",
                       "goods_description": "RICE", "quantity": "5",
                       "rate": "100", "amount": "500"}]"#;
        let candidate = parse_candidate(raw).unwrap();
        assert_eq!(candidate.company_name, "Mill");
        assert_eq!(candidate.products.len(), 1);
        assert_eq!(candidate.products[0].goods_description, "RICE");
    }

    #[test]
    fn strip_fences_variants() {
        assert_eq!(strip_fences("```json\n{}\n```").trim(), "{}");
        assert_eq!(strip_fences("```\n{}\n```").trim(), "{}");
        assert_eq!(strip_fences("{}"), "{}");
        assert_eq!(
            strip_fences("prefix text ```json\n{\"a\":1}\n``` suffix").trim(),
            "{\"a\":1}"
        );
    }

    #[test]
    fn refinement_clauses_map_categories() {
        let errors = vec![
            ValidationError::NoProducts,
            ValidationError::SuspiciousProductField {
                index: 0,
                field: "rate",
                value: "N/A".into(),
            },
        ];
        let clauses = refinement_clauses(&errors);
        assert!(clauses.iter().any(|c| c.contains("product table")));
        assert!(clauses.iter().any(|c| c.contains("monetary value")));
        // General accuracy clauses are always appended.
        assert!(clauses.iter().any(|c| c.contains("match exactly")));
    }

    #[test]
    fn no_clauses_for_clean_validation() {
        assert!(refinement_clauses(&[]).is_empty());
    }
}
