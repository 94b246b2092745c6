//! TextNative extraction adapter - handles plain text, markdown, CSV and HTML.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use docket_core::{ExtractionAdapter, ExtractionResult, ExtractionStrategy, Result};

/// Adapter for text-based documents.
///
/// Reads bytes as UTF-8 (with lossy conversion for invalid sequences) and
/// strips a leading byte-order mark.
pub struct TextNativeAdapter;

#[async_trait]
impl ExtractionAdapter for TextNativeAdapter {
    fn strategy(&self) -> ExtractionStrategy {
        ExtractionStrategy::TextNative
    }

    async fn extract(
        &self,
        data: &[u8],
        _filename: &str,
        mime_type: &str,
        _config: &JsonValue,
    ) -> Result<ExtractionResult> {
        let text = String::from_utf8_lossy(data);
        let text = text.strip_prefix('\u{FEFF}').unwrap_or(&text).to_string();
        let char_count = text.chars().count();
        let line_count = text.lines().count();

        Ok(ExtractionResult {
            extracted_text: Some(text),
            metadata: serde_json::json!({
                "char_count": char_count,
                "line_count": line_count,
                "mime_type": mime_type,
            }),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "text_native"
    }
}
