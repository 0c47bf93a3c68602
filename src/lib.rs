//! # pdf2invoice
//!
//! Convert heterogeneous PDF invoices — mixed layouts, digital or scanned —
//! into structured line-item records.
//!
//! ## Why this crate?
//!
//! Invoice PDFs do not share a schema: the same quantity lives in a "QTY",
//! "BAGS" or metric-ton "QUANTITY" column depending on who printed the
//! document, and scanned copies have no text layer at all. This crate pairs
//! deterministic structure recovery (text layer, positional table
//! reconstruction, OCR fallback, layout classification) with an external
//! document-understanding service driven through a validate-and-refine loop
//! under a shared rate limit, then normalizes the answer into one canonical
//! record.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Extract    text layer + tables via pdfium; OCR fallback (tesseract)
//!  ├─ 2. Classify   score against the layout catalog + semantic column roles
//!  ├─ 3. Prompt     base instructions + layout rules + column hints
//!  ├─ 4. Orchestrate attempt → validate → refine, behind the rate limiter
//!  └─ 5. Normalize  company/date/number cleanup, weights → kg, confidence
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2invoice::process_invoice;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Model auto-configured from GEMINI_API_KEY
//!     let result = process_invoice("invoice.pdf").await;
//!     if result.success {
//!         println!("{} — {} products", result.company_name, result.products.len());
//!     } else {
//!         eprintln!("failed: {:?}", result.error);
//!     }
//! }
//! ```
//!
//! Batch workloads should construct one [`InvoiceProcessor`] (optionally
//! with a custom [`service::DocumentModel`] and [`cache::ResponseCache`])
//! and reuse it so every document shares the same rate-limit window:
//!
//! ```rust,no_run
//! use pdf2invoice::{InvoiceProcessor, ProcessingConfig, service::GeminiClient};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProcessingConfig::default();
//! let model = Arc::new(GeminiClient::from_env(config.model.clone(), 60)?);
//! let processor = InvoiceProcessor::new(model, config);
//! let results = processor.process_batch(&["a.pdf", "b.pdf"]).await;
//! for failed in processor.failed_files() {
//!     eprintln!("throttled, retry later: {failed}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2invoice` binary (clap + anyhow + tracing-subscriber) |
//! | `ocr`   | on      | Tesseract fallback for scanned invoices (links libtesseract) |
//!
//! Disable both when using only the library against digital PDFs:
//! ```toml
//! pdf2invoice = { version = "0.4", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod orchestrate;
pub mod postprocess;
pub mod process;
pub mod prompts;
pub mod ratelimit;
pub mod record;
pub mod service;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{MemoryCache, ResponseCache};
pub use classify::{classify, ColumnRole, LayoutPattern, PatternFamily};
pub use config::{ProcessingConfig, ProcessingConfigBuilder};
pub use error::{InvoiceError, ServiceError};
pub use extract::{ExtractedText, RawDocument, TableBlock};
pub use process::{process_invoice, InvoiceProcessor};
pub use ratelimit::RateLimiter;
pub use record::{ConfidenceScores, ExtractionResult, ProductLine};
