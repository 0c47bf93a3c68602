//! Entry points: one invoice in, one [`ExtractionResult`] out.
//!
//! [`InvoiceProcessor`] owns the injected collaborators — the
//! document-understanding model, the process-wide rate limiter, and an
//! optional cache — and wires the pipeline stages together:
//!
//! ```text
//! PDF ─▶ extract ─▶ classify ─▶ { prompt ⇄ orchestrate ⇄ ratelimit ⇄ validate } ─▶ postprocess
//! ```
//!
//! No failure mode crosses these entry points as `Err` or panic: every
//! outcome is folded into the result record, so batch callers always
//! inspect `success`/`error`/`rate_limited` and nothing else.

use crate::cache::ResponseCache;
use crate::classify::{self, LayoutPattern};
use crate::config::ProcessingConfig;
use crate::error::InvoiceError;
use crate::extract::{self, ExtractedText, RawDocument};
use crate::orchestrate;
use crate::postprocess;
use crate::ratelimit::RateLimiter;
use crate::record::ExtractionResult;
use crate::service::{DocumentModel, GeminiClient};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Failure message surfaced when the attempt budget died to throttling.
const RATE_LIMITED_MESSAGE: &str =
    "API rate limit exceeded. Please try again later or process fewer files at once.";

/// The assembled pipeline. Cheap to clone; clones share the same model,
/// rate limiter and cache.
#[derive(Clone)]
pub struct InvoiceProcessor {
    model: Arc<dyn DocumentModel>,
    limiter: Arc<RateLimiter>,
    cache: Option<Arc<dyn ResponseCache>>,
    config: ProcessingConfig,
}

impl InvoiceProcessor {
    /// Build a processor around an explicit model implementation.
    pub fn new(model: Arc<dyn DocumentModel>, config: ProcessingConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.max_calls_per_window, config.window));
        Self {
            model,
            limiter,
            cache: None,
            config,
        }
    }

    /// Inject a cache for extracted text, keyed by document fingerprint.
    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    // ── Batch-layer coordination (delegated to the shared limiter) ───────

    /// Record the intended batch size so the limiter can adapt its waits.
    pub fn set_batch_size(&self, n: usize) {
        self.limiter.set_batch_size(n);
    }

    /// Current rate-limit window utilization, in percent.
    pub fn utilization(&self) -> f64 {
        self.limiter.utilization()
    }

    /// Documents whose extraction failed due to throttling.
    pub fn failed_files(&self) -> Vec<String> {
        self.limiter.failed_files()
    }

    /// Reset the throttled-document set (after a deferred retry pass).
    pub fn clear_failed_files(&self) {
        self.limiter.clear_failed_files();
    }

    /// Let the batch layer pace itself against the shared window.
    pub async fn wait_if_needed(&self, force: bool) -> bool {
        self.limiter.wait_if_needed(force).await
    }

    // ── Entry points ─────────────────────────────────────────────────────

    /// Process one invoice file.
    pub async fn process(&self, path: impl AsRef<Path>) -> ExtractionResult {
        let start = Instant::now();
        let result = match RawDocument::open(path.as_ref()) {
            Ok(doc) => self.run(doc).await,
            Err(e) => ExtractionResult::failure(e.to_string(), "generic"),
        };
        result.with_processing_time(start.elapsed().as_secs_f64())
    }

    /// Process an invoice already held in memory.
    pub async fn process_bytes(&self, bytes: &[u8]) -> ExtractionResult {
        let start = Instant::now();
        let result = match RawDocument::from_bytes(bytes) {
            Ok(doc) => self.run(doc).await,
            Err(e) => ExtractionResult::failure(e.to_string(), "generic"),
        };
        result.with_processing_time(start.elapsed().as_secs_f64())
    }

    /// Process many invoices concurrently.
    ///
    /// Results come back in input order. Concurrency is bounded by
    /// `config.concurrency`, but the shared rate limiter remains the
    /// authority on actual call admission.
    pub async fn process_batch(&self, paths: &[impl AsRef<Path>]) -> Vec<ExtractionResult> {
        self.set_batch_size(paths.len());
        stream::iter(paths.iter().map(|p| self.process(p.as_ref())))
            .buffered(self.config.concurrency)
            .collect()
            .await
    }

    /// Run the pipeline on already-extracted text.
    ///
    /// This is the pipeline minus the PDF stages — useful when text comes
    /// from elsewhere, and the seam the integration tests drive. `doc_id`
    /// feeds the throttling bookkeeping exactly like a file path.
    pub async fn process_text(&self, doc_id: &str, text: &str) -> ExtractionResult {
        let start = Instant::now();
        let result = self.extract_record(doc_id, text).await;
        result.with_processing_time(start.elapsed().as_secs_f64())
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn run(&self, doc: RawDocument) -> ExtractionResult {
        let extracted = match self.extract_cached(&doc).await {
            Ok(extracted) => extracted,
            Err(e) => return ExtractionResult::failure(e.to_string(), "generic"),
        };

        if extracted.is_empty() {
            let e = InvoiceError::TextExtractionFailed {
                path: doc.path().to_path_buf(),
            };
            warn!(%e, "terminal extraction failure");
            return ExtractionResult::failure(e.to_string(), "generic");
        }

        self.extract_record(&doc.id(), &extracted.text).await
    }

    async fn extract_cached(&self, doc: &RawDocument) -> Result<ExtractedText, InvoiceError> {
        let key = format!("extract:{}", doc.fingerprint());

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key) {
                if let Ok(cached) = serde_json::from_str::<ExtractedText>(&hit) {
                    debug!(fingerprint = doc.fingerprint(), "extraction cache hit");
                    return Ok(cached);
                }
            }
        }

        let extracted = extract::extract(doc, &self.config).await?;

        if let Some(cache) = &self.cache {
            if let Ok(serialized) = serde_json::to_string(&extracted) {
                cache.put(&key, serialized, self.config.cache_ttl);
            }
        }

        Ok(extracted)
    }

    async fn extract_record(&self, doc_id: &str, text: &str) -> ExtractionResult {
        let pattern = classify::classify(text);
        info!(doc_id, pattern = pattern.key(), confidence = pattern.confidence, "pattern identified");

        let mut used_pattern = pattern.clone();
        let mut run = orchestrate::run_extraction(
            self.model.as_ref(),
            &self.limiter,
            &pattern,
            text,
            &self.config,
            doc_id,
        )
        .await;

        // A specific layout that fails entirely gets one more full pass
        // with the generic pattern before giving up.
        if run.record.is_none() && !pattern.is_generic() {
            info!(doc_id, "specific pattern failed; retrying with generic pattern");
            let generic = LayoutPattern::generic();
            let fallback = orchestrate::run_extraction(
                self.model.as_ref(),
                &self.limiter,
                &generic,
                text,
                &self.config,
                doc_id,
            )
            .await;
            if fallback.record.is_some() {
                used_pattern = generic;
            }
            run = merge_orchestrations(run, fallback);
        }

        match run.record {
            Some(record) => {
                let normalized = postprocess::normalize(record, text);
                let confidence_scores = postprocess::confidence_scores(&normalized);
                ExtractionResult {
                    success: true,
                    error: None,
                    rate_limited: None,
                    company_name: normalized.company_name,
                    invoice_number: normalized.invoice_number,
                    invoice_date: normalized.invoice_date,
                    fssai_number: normalized.fssai_number,
                    products: normalized.products,
                    confidence_scores,
                    pattern_used: used_pattern.key().to_string(),
                    processing_time: 0.0,
                }
            }
            None => {
                if self.limiter.has_failed_file(doc_id) {
                    warn!(doc_id, "extraction exhausted by throttling");
                    ExtractionResult::rate_limited(RATE_LIMITED_MESSAGE, pattern.key())
                } else {
                    let e = InvoiceError::AttemptsExhausted {
                        attempts: self.config.max_attempts,
                        detail: "service returned no valid result".into(),
                    };
                    ExtractionResult::failure(e.to_string(), pattern.key())
                }
            }
        }
    }
}

/// Merge a failed pass with its generic-pattern fallback so the attempt
/// history from both passes survives into diagnostics.
fn merge_orchestrations(
    mut first: orchestrate::Orchestration,
    second: orchestrate::Orchestration,
) -> orchestrate::Orchestration {
    first.attempts.extend(second.attempts);
    orchestrate::Orchestration {
        record: second.record,
        attempts: first.attempts,
    }
}

/// Process a single invoice with the default stack: Gemini model from the
/// environment, fresh limiter, no cache.
///
/// This is the convenience entry point for callers that do not need to
/// share a limiter across documents; batch workloads should build one
/// [`InvoiceProcessor`] and reuse it.
pub async fn process_invoice(path: impl AsRef<Path>) -> ExtractionResult {
    let config = ProcessingConfig::default();
    let model = match GeminiClient::from_env(config.model.clone(), config.api_timeout_secs) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            return ExtractionResult::failure(
                format!("document model not configured: {e}"),
                "generic",
            );
        }
    };
    InvoiceProcessor::new(model, config).process(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use async_trait::async_trait;

    struct NeverCalledModel;

    #[async_trait]
    impl DocumentModel for NeverCalledModel {
        async fn generate(&self, _prompt: &str) -> Result<String, ServiceError> {
            panic!("model must not be called for unreadable input");
        }
    }

    fn processor() -> InvoiceProcessor {
        InvoiceProcessor::new(Arc::new(NeverCalledModel), ProcessingConfig::default())
    }

    #[tokio::test]
    async fn missing_file_yields_failure_record() {
        let result = processor().process("/no/such/invoice.pdf").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
        assert!(result.rate_limited.is_none());
    }

    #[tokio::test]
    async fn non_pdf_bytes_yield_failure_record() {
        let result = processor().process_bytes(b"plain text, not a pdf").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not a valid PDF"));
    }

    #[tokio::test]
    async fn processing_time_is_stamped() {
        let result = processor().process("/no/such/invoice.pdf").await;
        assert!(result.processing_time >= 0.0);
    }
}
