//! OCR fallback for scanned invoices.
//!
//! When a document carries no embedded text layer we rasterise its leading
//! pages with pdfium, boost contrast, and hand the images to Tesseract.
//! Rendering and recognition are CPU-bound and run in `spawn_blocking`;
//! pages are recognized concurrently. A failure on one page logs and
//! contributes empty text — OCR never aborts the document.
//!
//! Gated behind the `ocr` feature because it links against
//! libtesseract/libleptonica; without it this module degrades to an empty
//! result so extraction still fails cleanly for scanned input.

use crate::error::InvoiceError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// Contrast boost applied before recognition; scanned invoices are
/// frequently low-contrast thermal or carbon copies.
#[cfg(feature = "ocr")]
const CONTRAST_BOOST: f32 = 50.0;

/// Rasterise the first `max_pages` pages and recognize them with OCR.
///
/// Returns the concatenated page texts; empty when every strategy failed.
pub(super) async fn recognize(
    pdf_path: &Path,
    bytes: Vec<u8>,
    dpi: u32,
    max_pages: usize,
) -> Result<String, InvoiceError> {
    let path = pdf_path.to_path_buf();
    let rendered = tokio::task::spawn_blocking(move || render_blocking(&path, &bytes, dpi, max_pages))
        .await
        .map_err(|e| InvoiceError::Internal(format!("render task panicked: {e}")))??;

    info!(pages = rendered.len(), dpi, "running OCR fallback");

    let mut tasks = Vec::with_capacity(rendered.len());
    for (page_num, image) in rendered {
        tasks.push(tokio::task::spawn_blocking(move || {
            let text = recognize_image(&image).unwrap_or_else(|e| {
                warn!(page = page_num, error = %e, "OCR failed; treating page as empty");
                String::new()
            });
            (page_num, text)
        }));
    }

    let mut pages: Vec<(usize, String)> = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await {
            Ok(result) => pages.push(result),
            Err(e) => warn!(error = %e, "OCR task panicked; page dropped"),
        }
    }
    pages.sort_by_key(|(page_num, _)| *page_num);

    let text = pages
        .into_iter()
        .map(|(_, text)| text)
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    Ok(text)
}

/// Blocking rasterisation of the leading pages.
fn render_blocking(
    pdf_path: &Path,
    bytes: &[u8],
    dpi: u32,
    max_pages: usize,
) -> Result<Vec<(usize, DynamicImage)>, InvoiceError> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| InvoiceError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{e:?}"),
        })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    let wanted = total.min(max_pages);

    let mut rendered = Vec::with_capacity(wanted);
    for idx in 0..wanted {
        let page = match pages.get(idx as u16) {
            Ok(page) => page,
            Err(e) => {
                warn!(page = idx + 1, error = ?e, "page unavailable for rendering");
                continue;
            }
        };

        // Scale so the raster hits the requested DPI (PDF units are 1/72").
        let target_width = (page.width().value * dpi as f32 / 72.0) as i32;
        let target_height = (page.height().value * dpi as f32 / 72.0) as i32;
        let render_config = PdfRenderConfig::new()
            .set_target_width(target_width.max(1))
            .set_maximum_height(target_height.max(1));

        match page.render_with_config(&render_config) {
            Ok(bitmap) => {
                let image = bitmap.as_image();
                debug!(
                    page = idx + 1,
                    width = image.width(),
                    height = image.height(),
                    "page rendered for OCR"
                );
                rendered.push((idx + 1, image));
            }
            Err(e) => warn!(page = idx + 1, error = ?e, "rasterisation failed; page skipped"),
        };
    }

    Ok(rendered)
}

/// Recognize one rendered page.
#[cfg(feature = "ocr")]
fn recognize_image(image: &DynamicImage) -> Result<String, String> {
    use std::io::Cursor;

    let prepared = image.grayscale().adjust_contrast(CONTRAST_BOOST);

    let mut png = Vec::new();
    prepared
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| format!("png encode: {e}"))?;

    let mut tess =
        leptess::LepTess::new(None, "eng").map_err(|e| format!("tesseract init: {e}"))?;
    tess.set_image_from_mem(&png)
        .map_err(|e| format!("set image: {e}"))?;
    tess.get_utf8_text().map_err(|e| format!("recognition: {e}"))
}

#[cfg(not(feature = "ocr"))]
fn recognize_image(_image: &DynamicImage) -> Result<String, String> {
    warn!("OCR feature disabled; scanned pages yield no text");
    Ok(String::new())
}
