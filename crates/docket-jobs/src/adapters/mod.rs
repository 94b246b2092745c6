//! Extraction adapter implementations.

pub mod image_ocr;
pub mod pdf_ocr;
pub mod pdf_text;
pub mod text_native;

pub use image_ocr::ImageOcrAdapter;
pub use pdf_ocr::PdfOcrAdapter;
pub use pdf_text::PdfTextAdapter;
pub use text_native::TextNativeAdapter;

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::process::Command;

use docket_core::{Error, Result};

/// Run a command with a timeout, returning stdout as a string.
pub(crate) async fn run_cmd_with_timeout(cmd: &mut Command, timeout_secs: u64) -> Result<String> {
    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| {
            Error::ExtractionFailed(format!("External command timed out after {}s", timeout_secs))
        })?
        .map_err(|e| Error::ExtractionFailed(format!("Failed to execute command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::ExtractionFailed(format!(
            "Command failed (exit {}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Whether a tool is on `PATH`. Poppler tools exit 99 on `-v`.
pub(crate) async fn tool_available(program: &str, version_arg: &str) -> bool {
    match Command::new(program).arg(version_arg).output().await {
        Ok(output) => output.status.success() || output.status.code() == Some(99),
        Err(_) => false,
    }
}

/// Spill input bytes to a temp file for tools that only read paths.
pub(crate) fn spill_to_tempfile(data: &[u8]) -> Result<NamedTempFile> {
    let mut tmpfile = NamedTempFile::new()
        .map_err(|e| Error::ExtractionFailed(format!("Failed to create temp file: {}", e)))?;
    tmpfile
        .write_all(data)
        .map_err(|e| Error::ExtractionFailed(format!("Failed to write temp file: {}", e)))?;
    Ok(tmpfile)
}

/// Reject empty input and anything without a PDF header.
pub(crate) fn check_pdf(data: &[u8], filename: &str) -> Result<()> {
    if data.is_empty() {
        return Err(Error::ExtractionFailed(format!(
            "Cannot extract text from empty PDF '{}'",
            filename
        )));
    }
    if !data.starts_with(b"%PDF") {
        return Err(Error::ExtractionFailed(format!(
            "File '{}' is not a valid PDF (missing %PDF header)",
            filename
        )));
    }
    Ok(())
}

/// OCR language string from adapter config (`{"language": "eng+ara"}`).
pub(crate) fn ocr_language(config: &serde_json::Value) -> String {
    config
        .get("language")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| std::env::var("OCR_LANGUAGES").ok())
        .unwrap_or_else(|| docket_core::defaults::OCR_LANGUAGES.to_string())
}
