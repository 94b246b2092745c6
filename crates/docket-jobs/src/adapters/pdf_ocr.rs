//! PdfOcrAdapter: OCRs scanned PDFs using pdftoppm + tesseract.
//!
//! Pipeline: PDF → pdftoppm (render pages to PNG) → tesseract (OCR each page)
//! → concatenate. Used when [`super::PdfTextAdapter`] flags `needs_ocr`.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

use docket_core::defaults::{EXTRACTION_CMD_TIMEOUT_SECS, PDF_OCR_MAX_PAGES};
use docket_core::{Error, ExtractionAdapter, ExtractionResult, ExtractionStrategy, Result};

use super::{check_pdf, ocr_language, run_cmd_with_timeout, spill_to_tempfile, tool_available};

pub struct PdfOcrAdapter;

/// Rendered page images in page order (`page-01.png`, `page-02.png`, ...).
async fn rendered_pages(dir: &TempDir) -> Result<Vec<String>> {
    let mut pages = Vec::new();
    let mut entries = tokio::fs::read_dir(dir.path())
        .await
        .map_err(|e| Error::ExtractionFailed(format!("Failed to read temp dir: {}", e)))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::ExtractionFailed(format!("Failed to read dir entry: {}", e)))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("png") {
            pages.push(path.to_string_lossy().to_string());
        }
    }
    pages.sort();
    Ok(pages)
}

#[async_trait]
impl ExtractionAdapter for PdfOcrAdapter {
    fn strategy(&self) -> ExtractionStrategy {
        ExtractionStrategy::PdfOcr
    }

    async fn extract(
        &self,
        data: &[u8],
        filename: &str,
        _mime_type: &str,
        config: &JsonValue,
    ) -> Result<ExtractionResult> {
        check_pdf(data, filename)?;

        let dpi = config.get("dpi").and_then(|v| v.as_u64()).unwrap_or(300);
        let max_pages = config
            .get("max_pages")
            .and_then(|v| v.as_u64())
            .unwrap_or(PDF_OCR_MAX_PAGES as u64);
        let language = ocr_language(config);

        let tmpfile = spill_to_tempfile(data)?;
        let pdf_path = tmpfile.path().to_string_lossy().to_string();
        let img_dir = TempDir::new()
            .map_err(|e| Error::ExtractionFailed(format!("Failed to create temp dir: {}", e)))?;
        let img_prefix = img_dir.path().join("page").to_string_lossy().to_string();

        debug!(filename, dpi, max_pages, %language, "Rendering PDF pages for OCR");

        run_cmd_with_timeout(
            Command::new("pdftoppm")
                .arg("-png")
                .arg("-r")
                .arg(dpi.to_string())
                .arg("-l")
                .arg(max_pages.to_string())
                .arg(&pdf_path)
                .arg(&img_prefix),
            EXTRACTION_CMD_TIMEOUT_SECS * 3,
        )
        .await?;

        let pages = rendered_pages(&img_dir).await?;
        if pages.is_empty() {
            return Err(Error::ExtractionFailed(format!(
                "No pages rendered from '{}'",
                filename
            )));
        }

        debug!(filename, pages = pages.len(), "OCRing rendered pages");

        let mut page_texts = Vec::with_capacity(pages.len());
        let mut failed_pages = 0usize;
        for (i, img_path) in pages.iter().enumerate() {
            // "stdout" as output base makes tesseract print instead of writing a file
            match run_cmd_with_timeout(
                Command::new("tesseract")
                    .arg(img_path)
                    .arg("stdout")
                    .arg("-l")
                    .arg(&language),
                EXTRACTION_CMD_TIMEOUT_SECS,
            )
            .await
            {
                Ok(text) => page_texts.push(text),
                Err(e) => {
                    warn!(page = i + 1, error = %e, "OCR failed for page, skipping");
                    failed_pages += 1;
                }
            }
        }

        if page_texts.is_empty() {
            return Err(Error::ExtractionFailed(format!(
                "OCR failed on every page of '{}'",
                filename
            )));
        }

        let full_text = page_texts.join("\n\n");
        Ok(ExtractionResult {
            metadata: json!({
                "ocr_pages": pages.len(),
                "failed_pages": failed_pages,
                "dpi": dpi,
                "language": language,
                "char_count": full_text.chars().count(),
                "engine": "tesseract",
            }),
            extracted_text: Some(full_text),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let pdftoppm_ok = tool_available("pdftoppm", "-v").await;
        let tesseract_ok = tool_available("tesseract", "--version").await;
        Ok(pdftoppm_ok && tesseract_ok)
    }

    fn name(&self) -> &str {
        "pdf_ocr"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_ocr_identity() {
        assert_eq!(PdfOcrAdapter.strategy(), ExtractionStrategy::PdfOcr);
        assert_eq!(PdfOcrAdapter.name(), "pdf_ocr");
    }

    #[tokio::test]
    async fn test_pdf_ocr_health_check() {
        // Result depends on whether tesseract/pdftoppm are installed
        assert!(PdfOcrAdapter.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_pdf_ocr_empty_input() {
        let err = PdfOcrAdapter
            .extract(b"", "empty.pdf", "application/pdf", &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_pdf_ocr_invalid_pdf() {
        let err = PdfOcrAdapter
            .extract(b"not a pdf", "bad.pdf", "application/pdf", &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a valid PDF"));
    }

    #[tokio::test]
    async fn test_rendered_pages_sorted_png_only() {
        let dir = TempDir::new().unwrap();
        for name in ["page-2.png", "page-1.png", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let pages = rendered_pages(&dir).await.unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages[0].ends_with("page-1.png"));
    }
}
