//! Text-layer extraction and positional table reconstruction via pdfium.
//!
//! ## Why character positions?
//!
//! Invoice tables rarely survive a plain text dump: cell order scrambles
//! and column boundaries vanish. pdfium exposes per-character bounds, so we
//! rebuild structure bottom-up — characters into words by spacing, words
//! into rows by baseline, rows into cells by horizontal gaps — and treat a
//! run of multi-cell rows as a table. The result is attributed with page
//! and table index so downstream stages can reference it.
//!
//! All pdfium work runs inside `spawn_blocking` (driven by the caller in
//! `extract::extract`): the library wraps a C++ engine with thread-local
//! state that must not run on async worker threads.

use crate::error::InvoiceError;
use crate::extract::TableBlock;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, warn};

/// Characters separated by more than this distance (PDF units) belong to
/// different words.
const WORD_SPACING_THRESHOLD: f32 = 3.0;

/// Words separated by more than this distance belong to different cells.
const CELL_GAP_THRESHOLD: f32 = 12.0;

/// Words whose baselines differ by less than this share a row.
const ROW_BASELINE_TOLERANCE: f32 = 4.0;

/// Minimum cells per row for the row to count toward a table.
const MIN_TABLE_COLUMNS: usize = 3;

/// Minimum consecutive multi-cell rows to accept a table.
const MIN_TABLE_ROWS: usize = 2;

/// A positioned word reconstructed from pdfium characters.
#[derive(Debug, Clone)]
struct Word {
    text: String,
    x: f32,
    y: f32,
    width: f32,
}

impl Word {
    fn right(&self) -> f32 {
        self.x + self.width
    }
}

/// Read the text layer and reconstruct tables for every page.
///
/// Returns per-page text (empty string for pages that failed — a single
/// bad page never aborts the document) and all detected tables.
pub(super) fn extract_blocking(
    pdf_path: &Path,
    bytes: &[u8],
) -> Result<(Vec<String>, Vec<TableBlock>), InvoiceError> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| InvoiceError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{e:?}"),
        })?;

    let mut page_texts = Vec::new();
    let mut tables = Vec::new();

    for (page_idx, page) in document.pages().iter().enumerate() {
        let page_num = page_idx + 1;
        match page.text() {
            Ok(text) => {
                page_texts.push(text.all());

                let words = match words_from_page(&text) {
                    Ok(words) => words,
                    Err(e) => {
                        warn!(page = page_num, error = %e, "word extraction failed; skipping tables");
                        Vec::new()
                    }
                };
                let page_tables = tables_from_words(&words);
                debug!(
                    page = page_num,
                    tables = page_tables.len(),
                    "page processed"
                );
                for (index, rows) in page_tables.into_iter().enumerate() {
                    tables.push(TableBlock {
                        page: page_num,
                        index: index + 1,
                        rows,
                    });
                }
            }
            Err(e) => {
                warn!(page = page_num, error = ?e, "text layer unreadable; treating page as empty");
                page_texts.push(String::new());
            }
        }
    }

    Ok((page_texts, tables))
}

/// Group a page's characters into positioned words.
fn words_from_page(text: &PdfPageText) -> Result<Vec<Word>, String> {
    let mut words = Vec::new();
    let mut current: Vec<(char, f32, f32, f32, f32)> = Vec::new();

    for ch in text.chars().iter() {
        let bounds = ch.loose_bounds().map_err(|e| format!("{e:?}"))?;
        let Some(unicode) = ch.unicode_char() else {
            continue;
        };

        let (x, y, w, h) = (
            bounds.left().value,
            bounds.bottom().value,
            bounds.width().value,
            bounds.height().value,
        );

        if unicode.is_whitespace() {
            flush_word(&mut current, &mut words);
            continue;
        }

        if let Some(&(_, last_x, last_y, last_w, last_h)) = current.last() {
            let new_line = (y - last_y).abs() > last_h * 0.5;
            let gap = x - (last_x + last_w);
            if new_line || gap > WORD_SPACING_THRESHOLD {
                flush_word(&mut current, &mut words);
            }
        }

        current.push((unicode, x, y, w, h));
    }
    flush_word(&mut current, &mut words);

    Ok(words)
}

fn flush_word(chars: &mut Vec<(char, f32, f32, f32, f32)>, words: &mut Vec<Word>) {
    if chars.is_empty() {
        return;
    }
    let text: String = chars.iter().map(|(c, ..)| *c).collect();
    let x = chars
        .iter()
        .map(|&(_, x, ..)| x)
        .fold(f32::INFINITY, f32::min);
    let right = chars
        .iter()
        .map(|&(_, x, _, w, _)| x + w)
        .fold(f32::NEG_INFINITY, f32::max);
    let y = chars.iter().map(|&(_, _, y, ..)| y).sum::<f32>() / chars.len() as f32;
    words.push(Word {
        text,
        x,
        y,
        width: right - x,
    });
    chars.clear();
}

/// Cluster words into rows, rows into cells, and keep runs of multi-cell
/// rows as tables.
fn tables_from_words(words: &[Word]) -> Vec<Vec<Vec<String>>> {
    if words.is_empty() {
        return Vec::new();
    }

    // Rows: top of the page first (PDF y grows upward).
    let mut sorted: Vec<&Word> = words.iter().collect();
    sorted.sort_by(|a, b| b.y.partial_cmp(&a.y).unwrap_or(std::cmp::Ordering::Equal));

    let mut rows: Vec<Vec<&Word>> = Vec::new();
    for word in sorted {
        match rows.last_mut() {
            Some(row)
                if (row[0].y - word.y).abs() <= ROW_BASELINE_TOLERANCE =>
            {
                row.push(word);
            }
            _ => rows.push(vec![word]),
        }
    }

    // Cells: split each row at large horizontal gaps.
    let row_cells: Vec<Vec<String>> = rows
        .into_iter()
        .map(|mut row| {
            row.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));
            let mut cells: Vec<String> = Vec::new();
            let mut last_right = f32::NEG_INFINITY;
            for word in row {
                let starts_new_cell =
                    cells.is_empty() || word.x - last_right > CELL_GAP_THRESHOLD;
                if starts_new_cell {
                    cells.push(word.text.clone());
                } else {
                    let cell = cells.last_mut().expect("cells non-empty");
                    cell.push(' ');
                    cell.push_str(&word.text);
                }
                last_right = last_right.max(word.right());
            }
            cells
        })
        .collect();

    // Tables: maximal runs of consecutive rows with enough columns.
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();
    for cells in row_cells {
        if cells.len() >= MIN_TABLE_COLUMNS {
            run.push(cells);
        } else {
            if run.len() >= MIN_TABLE_ROWS {
                tables.push(std::mem::take(&mut run));
            }
            run.clear();
        }
    }
    if run.len() >= MIN_TABLE_ROWS {
        tables.push(run);
    }

    tables
}
