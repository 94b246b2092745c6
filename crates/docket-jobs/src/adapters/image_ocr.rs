//! ImageOcrAdapter: OCRs single images with tesseract.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tokio::process::Command;
use tracing::debug;

use docket_core::defaults::EXTRACTION_CMD_TIMEOUT_SECS;
use docket_core::{Error, ExtractionAdapter, ExtractionResult, ExtractionStrategy, Result};

use super::{ocr_language, run_cmd_with_timeout, spill_to_tempfile, tool_available};

/// Adapter for scanned pages delivered as PNG, JPEG, TIFF, BMP, GIF or WebP.
pub struct ImageOcrAdapter;

#[async_trait]
impl ExtractionAdapter for ImageOcrAdapter {
    fn strategy(&self) -> ExtractionStrategy {
        ExtractionStrategy::ImageOcr
    }

    async fn extract(
        &self,
        data: &[u8],
        filename: &str,
        mime_type: &str,
        config: &JsonValue,
    ) -> Result<ExtractionResult> {
        if data.is_empty() {
            return Err(Error::ExtractionFailed(format!(
                "Cannot OCR empty image '{}'",
                filename
            )));
        }

        let language = ocr_language(config);
        let tmpfile = spill_to_tempfile(data)?;
        let path = tmpfile.path().to_string_lossy().to_string();

        debug!(filename, mime_type, %language, "OCRing image");
        let text = run_cmd_with_timeout(
            Command::new("tesseract")
                .arg(&path)
                .arg("stdout")
                .arg("-l")
                .arg(&language),
            EXTRACTION_CMD_TIMEOUT_SECS,
        )
        .await?;

        Ok(ExtractionResult {
            metadata: json!({
                "language": language,
                "mime_type": mime_type,
                "char_count": text.chars().count(),
                "engine": "tesseract",
            }),
            extracted_text: Some(text),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(tool_available("tesseract", "--version").await)
    }

    fn name(&self) -> &str {
        "image_ocr"
    }
}
