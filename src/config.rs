//! Configuration for the invoice extraction pipeline.
//!
//! All pipeline behaviour is controlled through [`ProcessingConfig`], built
//! via its [`ProcessingConfigBuilder`]. Keeping every knob in one struct
//! makes it trivial to share configs across tasks, log them, and diff two
//! runs to understand why their outputs differ.
//!
//! Several values here are empirical tuning constants inherited from
//! production use (attempt budget, rate-limit cap, OCR page bound). They are
//! exposed as named fields rather than re-derived; changing them shifts the
//! throughput/accuracy trade-off, not correctness.

use crate::error::InvoiceError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for invoice processing.
///
/// Built via [`ProcessingConfig::builder()`] or using
/// [`ProcessingConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2invoice::ProcessingConfig;
///
/// let config = ProcessingConfig::builder()
///     .max_attempts(2)
///     .max_calls_per_window(15)
///     .model("gemini-1.5-flash")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum extraction attempts per orchestration pass. Default: 3.
    ///
    /// Each attempt costs one rate-limited service call. Validation failures
    /// refine the prompt between attempts, so two retries recover the large
    /// majority of incomplete first answers; beyond three the marginal
    /// success rate does not pay for the extra quota.
    pub max_attempts: u32,

    /// Service calls admitted per sliding window. Default: 15.
    ///
    /// Matches the free-tier quota of the default provider. The rate limiter
    /// is shared by every concurrent document, so this caps the whole
    /// process, not one worker.
    pub max_calls_per_window: usize,

    /// Sliding-window length. Default: 60 s.
    pub window: Duration,

    /// Rendering DPI for the OCR fallback. Range 72–400. Default: 200.
    ///
    /// 200 DPI keeps Tesseract accurate on typical invoice font sizes while
    /// staying fast; raise it for small print, lower it for very large
    /// scanned pages.
    pub ocr_dpi: u32,

    /// Page bound for the OCR fallback. Default: 3.
    ///
    /// Invoice metadata and the product table live on the first pages;
    /// OCR-ing a long tail of terms-and-conditions pages wastes seconds per
    /// document for no extractable fields.
    pub ocr_max_pages: usize,

    /// Maximum source-text characters included in a prompt. Default: 6000.
    ///
    /// Protects the service's input budget. Truncation always preserves the
    /// head of the document (where the seller block and invoice metadata
    /// live) and marks the cut with an ellipsis.
    pub max_source_chars: usize,

    /// Model identifier passed to the bundled Gemini client. Default:
    /// "gemini-1.5-flash". Ignored by custom [`crate::service::DocumentModel`]
    /// implementations.
    pub model: String,

    /// Per-service-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Concurrent documents in a batch run. Default: 3.
    ///
    /// This bounds in-flight pipelines; actual call admission is always the
    /// rate limiter's decision regardless of this width.
    pub concurrency: usize,

    /// Time-to-live for cached extracted text. Default: 1800 s.
    pub cache_ttl: Duration,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_calls_per_window: 15,
            window: Duration::from_secs(60),
            ocr_dpi: 200,
            ocr_max_pages: 3,
            max_source_chars: 6000,
            model: "gemini-1.5-flash".to_string(),
            api_timeout_secs: 60,
            concurrency: 3,
            cache_ttl: Duration::from_secs(1800),
        }
    }
}

impl ProcessingConfig {
    /// Create a new builder for `ProcessingConfig`.
    pub fn builder() -> ProcessingConfigBuilder {
        ProcessingConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ProcessingConfig`].
#[derive(Debug)]
pub struct ProcessingConfigBuilder {
    config: ProcessingConfig,
}

impl ProcessingConfigBuilder {
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn max_calls_per_window(mut self, n: usize) -> Self {
        self.config.max_calls_per_window = n.max(1);
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    pub fn ocr_dpi(mut self, dpi: u32) -> Self {
        self.config.ocr_dpi = dpi.clamp(72, 400);
        self
    }

    pub fn ocr_max_pages(mut self, n: usize) -> Self {
        self.config.ocr_max_pages = n.max(1);
        self
    }

    pub fn max_source_chars(mut self, n: usize) -> Self {
        self.config.max_source_chars = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProcessingConfig, InvoiceError> {
        let c = &self.config;
        if c.window.is_zero() {
            return Err(InvoiceError::InvalidConfig(
                "rate-limit window must be non-zero".into(),
            ));
        }
        if c.max_source_chars < 500 {
            return Err(InvoiceError::InvalidConfig(format!(
                "max_source_chars must be at least 500, got {}",
                c.max_source_chars
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = ProcessingConfig::builder().build().unwrap();
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.max_calls_per_window, 15);
        assert_eq!(c.window, Duration::from_secs(60));
        assert_eq!(c.ocr_dpi, 200);
    }

    #[test]
    fn dpi_clamped_to_range() {
        let c = ProcessingConfig::builder().ocr_dpi(1000).build().unwrap();
        assert_eq!(c.ocr_dpi, 400);
        let c = ProcessingConfig::builder().ocr_dpi(10).build().unwrap();
        assert_eq!(c.ocr_dpi, 72);
    }

    #[test]
    fn zero_window_rejected() {
        let err = ProcessingConfig::builder()
            .window(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("window"));
    }

    #[test]
    fn tiny_prompt_budget_rejected() {
        assert!(ProcessingConfig::builder()
            .max_source_chars(100)
            .build()
            .is_err());
    }
}
