//! Error types for the pdf2invoice library.
//!
//! Two distinct error types reflect two distinct failure boundaries:
//!
//! * [`InvoiceError`] — pipeline failures (unreadable input, no recoverable
//!   text, exhausted attempt budget). These never cross the public
//!   `process_invoice` boundary as `Err`: the processor converts every one
//!   of them into a structured [`crate::record::ExtractionResult`] with
//!   `success = false`, so batch callers inspect `success`/`error`/
//!   `rate_limited` instead of catching anything.
//!
//! * [`ServiceError`] — the document-understanding service boundary.
//!   [`ServiceError::Throttled`] is the distinguished condition the
//!   orchestrator keys its backoff and failed-file bookkeeping on; every
//!   other variant is a generic transient failure.

use std::path::PathBuf;
use thiserror::Error;

/// Failures internal to the extraction pipeline.
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("invoice file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("file is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// pdfium could not open or parse the document.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// No text recoverable from any strategy (text layer, tables, OCR).
    /// Terminal: returned immediately, no retry.
    #[error("could not extract any text from '{path}'")]
    TextExtractionFailed { path: PathBuf },

    /// The attempt budget ran out without a validated record.
    #[error("extraction failed after {attempts} attempts: {detail}")]
    AttemptsExhausted { attempts: u32, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, tempfile failure, ...).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures reported by a [`crate::service::DocumentModel`] implementation.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The service enforced its call-rate limit (HTTP 429 or a
    /// resource-exhaustion message). The orchestrator backs off
    /// exponentially and records the document for deferred retry.
    #[error("service throttled the request{}", retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    Throttled { retry_after: Option<u64> },

    /// Network-level failure (connect, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status other than throttling.
    #[error("service returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    /// The service answered but the body carried no generated text.
    #[error("service returned an empty response")]
    EmptyResponse,
}

impl ServiceError {
    /// Whether this failure is the throttling condition (as opposed to a
    /// generic transient error).
    pub fn is_throttled(&self) -> bool {
        matches!(self, ServiceError::Throttled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_display_with_retry_after() {
        let e = ServiceError::Throttled {
            retry_after: Some(30),
        };
        assert!(e.to_string().contains("30s"));
        assert!(e.is_throttled());
    }

    #[test]
    fn throttled_display_without_retry_after() {
        let e = ServiceError::Throttled { retry_after: None };
        assert!(e.to_string().contains("throttled"));
    }

    #[test]
    fn transport_is_not_throttled() {
        assert!(!ServiceError::Transport("connection reset".into()).is_throttled());
    }

    #[test]
    fn attempts_exhausted_display() {
        let e = InvoiceError::AttemptsExhausted {
            attempts: 3,
            detail: "validation never passed".into(),
        };
        assert!(e.to_string().contains("3 attempts"));
    }
}
