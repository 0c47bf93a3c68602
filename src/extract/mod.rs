//! Text extraction: PDF file → plain text plus detected tables.
//!
//! Strategy, in order:
//!
//! 1. **Text layer** — read embedded text page by page via pdfium,
//!    concatenating non-empty pages.
//! 2. **Tables** — reconstruct tabular regions from character positions and
//!    append them as delimited blocks (`--- TABLE <page>.<index> ---`,
//!    cells joined by `" | "`) so downstream text-only consumers see them.
//! 3. **OCR fallback** — when the combined text is blank, rasterise the
//!    leading pages and recognize them with Tesseract.
//!
//! Per-page failures are logged and treated as empty text for that page;
//! extraction returns an empty string only when every strategy failed,
//! which callers treat as a terminal failure for the document.

pub mod input;
mod ocr;
mod text;

pub use input::RawDocument;

use crate::config::ProcessingConfig;
use crate::error::InvoiceError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A reconstructed table: a matrix of string cells, attributed with the
/// page and per-page table index it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableBlock {
    /// 1-based page number.
    pub page: usize,
    /// 1-based table index within the page.
    pub index: usize,
    pub rows: Vec<Vec<String>>,
}

impl TableBlock {
    /// Render the block in the delimited text form downstream stages parse.
    fn to_text(&self) -> String {
        let mut out = format!("\n--- TABLE {}.{} ---\n", self.page, self.index);
        for row in &self.rows {
            out.push_str(&row.join(" | "));
            out.push('\n');
        }
        out
    }
}

/// Everything recovered from one document. Produced once; never mutated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedText {
    /// Full text: concatenated page text plus rendered table blocks.
    pub text: String,
    pub tables: Vec<TableBlock>,
    /// Whether the OCR fallback produced the text.
    pub via_ocr: bool,
}

impl ExtractedText {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Extract text and tables from a document.
///
/// Never fails on per-page problems; returns an [`ExtractedText`] whose
/// emptiness the caller checks. Errors are reserved for documents pdfium
/// cannot open at all.
pub async fn extract(
    doc: &RawDocument,
    config: &ProcessingConfig,
) -> Result<ExtractedText, InvoiceError> {
    let path = doc.path().to_path_buf();
    let bytes = doc.bytes().to_vec();

    let (page_texts, tables) =
        tokio::task::spawn_blocking(move || text::extract_blocking(&path, &bytes))
            .await
            .map_err(|e| InvoiceError::Internal(format!("extraction task panicked: {e}")))??;

    let mut combined = page_texts
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n");

    if !tables.is_empty() {
        combined.push('\n');
        for table in &tables {
            combined.push_str(&table.to_text());
        }
    }

    if !combined.trim().is_empty() {
        debug!(
            chars = combined.len(),
            tables = tables.len(),
            "text layer extraction succeeded"
        );
        return Ok(ExtractedText {
            text: combined,
            tables,
            via_ocr: false,
        });
    }

    info!(path = %doc.path().display(), "no text layer found; switching to OCR");
    let ocr_text = ocr::recognize(
        doc.path(),
        doc.bytes().to_vec(),
        config.ocr_dpi,
        config.ocr_max_pages,
    )
    .await?;

    Ok(ExtractedText {
        text: ocr_text,
        tables: Vec::new(),
        via_ocr: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_block_renders_delimited_text() {
        let block = TableBlock {
            page: 2,
            index: 1,
            rows: vec![
                vec!["DESCRIPTION".into(), "QTY".into()],
                vec!["RICE".into(), "500".into()],
            ],
        };
        let text = block.to_text();
        assert!(text.starts_with("\n--- TABLE 2.1 ---\n"));
        assert!(text.contains("DESCRIPTION | QTY\n"));
        assert!(text.contains("RICE | 500\n"));
    }

    #[test]
    fn rendered_blocks_round_trip_through_classifier_parsing() {
        let block = TableBlock {
            page: 1,
            index: 1,
            rows: vec![
                vec!["DESCRIPTION".into(), "QTY".into(), "RATE".into()],
                vec!["RICE".into(), "500".into(), "4300".into()],
            ],
        };
        let text = format!("Some invoice header{}", block.to_text());
        let parsed = crate::classify::tables_from_text(&text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0], block.rows);
    }

    #[test]
    fn empty_extracted_text_detection() {
        let e = ExtractedText {
            text: "  \n ".into(),
            tables: Vec::new(),
            via_ocr: false,
        };
        assert!(e.is_empty());
    }
}
