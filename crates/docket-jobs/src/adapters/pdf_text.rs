//! PdfText extraction adapter: reads the text layer with `pdftotext` (poppler-utils).

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::process::Command;
use tracing::{debug, warn};

use docket_core::defaults::{EXTRACTION_CMD_TIMEOUT_SECS, PDF_MIN_TEXT_CHARS};
use docket_core::{ExtractionAdapter, ExtractionResult, ExtractionStrategy, Result};

use super::{check_pdf, run_cmd_with_timeout, spill_to_tempfile, tool_available};

/// Adapter for PDFs with a text layer.
///
/// When the text layer is near-empty (a scanned document), the result
/// carries `metadata["needs_ocr"] = true` and the dispatcher falls back to
/// [`super::PdfOcrAdapter`].
pub struct PdfTextAdapter;

/// Parse `pdfinfo` output into a JSON metadata object.
fn parse_pdfinfo(output: &str) -> JsonValue {
    let mut metadata = serde_json::Map::new();

    for line in output.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_lowercase().replace(' ', "_");
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            if key == "pages" {
                if let Ok(pages) = value.parse::<u64>() {
                    metadata.insert(key, JsonValue::Number(pages.into()));
                    continue;
                }
            }
            metadata.insert(key, JsonValue::String(value.to_string()));
        }
    }

    JsonValue::Object(metadata)
}

/// Get page count from pdfinfo metadata, defaulting to 0.
fn page_count(metadata: &JsonValue) -> u64 {
    metadata.get("pages").and_then(|v| v.as_u64()).unwrap_or(0)
}

/// Scanned PDFs yield little beyond whitespace and form feeds.
fn needs_ocr(text: &str) -> bool {
    text.chars().filter(|c| !c.is_whitespace()).count() < PDF_MIN_TEXT_CHARS
}

#[async_trait]
impl ExtractionAdapter for PdfTextAdapter {
    fn strategy(&self) -> ExtractionStrategy {
        ExtractionStrategy::PdfText
    }

    async fn extract(
        &self,
        data: &[u8],
        filename: &str,
        _mime_type: &str,
        _config: &JsonValue,
    ) -> Result<ExtractionResult> {
        check_pdf(data, filename)?;

        let tmpfile = spill_to_tempfile(data)?;
        let tmp_path = tmpfile.path().to_string_lossy().to_string();

        let mut metadata = match run_cmd_with_timeout(
            Command::new("pdfinfo").arg(&tmp_path),
            EXTRACTION_CMD_TIMEOUT_SECS,
        )
        .await
        {
            Ok(output) => parse_pdfinfo(&output),
            Err(e) => {
                warn!(filename, error = %e, "pdfinfo failed, continuing without metadata");
                serde_json::json!({})
            }
        };

        let text = run_cmd_with_timeout(
            Command::new("pdftotext")
                .arg("-layout")
                .arg(&tmp_path)
                .arg("-"),
            EXTRACTION_CMD_TIMEOUT_SECS,
        )
        .await?;

        let ocr = needs_ocr(&text);
        debug!(
            filename,
            pages = page_count(&metadata),
            text_len = text.len(),
            needs_ocr = ocr,
            "pdftotext finished"
        );

        if let Some(obj) = metadata.as_object_mut() {
            obj.insert("needs_ocr".to_string(), JsonValue::Bool(ocr));
            obj.insert(
                "char_count".to_string(),
                JsonValue::Number(text.chars().count().into()),
            );
            obj.insert(
                "line_count".to_string(),
                JsonValue::Number(text.lines().count().into()),
            );
        }

        Ok(ExtractionResult {
            extracted_text: Some(text),
            metadata,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(tool_available("pdftotext", "-v").await)
    }

    fn name(&self) -> &str {
        "pdf_text"
    }
}
