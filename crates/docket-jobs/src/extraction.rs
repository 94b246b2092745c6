//! OCR dispatcher: maps a document's media type to an extraction strategy
//! and routes the bytes to the adapter registered for it.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};

use docket_core::{
    normalize_mime, Error, ExtractionAdapter, ExtractionResult, ExtractionStrategy, Result,
    SUPPORTED_MIME_TYPES,
};

use crate::adapters::{ImageOcrAdapter, PdfOcrAdapter, PdfTextAdapter, TextNativeAdapter};

/// Registry mapping extraction strategies to their adapter implementations.
pub struct OcrDispatcher {
    adapters: HashMap<ExtractionStrategy, Arc<dyn ExtractionAdapter>>,
    config: JsonValue,
}

impl OcrDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            config: JsonValue::Object(Default::default()),
        }
    }

    /// Dispatcher with the text, PDF and OCR adapters registered.
    pub fn with_default_adapters() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Arc::new(TextNativeAdapter));
        dispatcher.register(Arc::new(PdfTextAdapter));
        dispatcher.register(Arc::new(PdfOcrAdapter));
        dispatcher.register(Arc::new(ImageOcrAdapter));
        dispatcher
    }

    /// Adapter configuration passed on every call (e.g. `{"language": "eng"}`).
    pub fn with_config(mut self, config: JsonValue) -> Self {
        self.config = config;
        self
    }

    /// Register an adapter. Replaces any existing adapter for the same strategy.
    pub fn register(&mut self, adapter: Arc<dyn ExtractionAdapter>) {
        self.adapters.insert(adapter.strategy(), adapter);
    }

    /// Check if an adapter is registered for the given strategy.
    pub fn has_adapter(&self, strategy: ExtractionStrategy) -> bool {
        self.adapters.contains_key(&strategy)
    }

    /// Whether documents of this media type can be extracted.
    ///
    /// Audio and video are never supported.
    pub fn is_supported(&self, mime_type: &str) -> bool {
        ExtractionStrategy::from_mime_type(mime_type).is_some_and(|s| self.has_adapter(s))
    }

    /// MIME types with a registered adapter.
    pub fn supported_types(&self) -> Vec<&'static str> {
        SUPPORTED_MIME_TYPES
            .iter()
            .copied()
            .filter(|m| self.is_supported(m))
            .collect()
    }

    /// Strategy for a media type, or `UnsupportedType`.
    pub fn strategy_for(&self, mime_type: &str) -> Result<ExtractionStrategy> {
        ExtractionStrategy::from_mime_type(mime_type)
            .filter(|s| self.has_adapter(*s))
            .ok_or_else(|| Error::UnsupportedType(normalize_mime(mime_type)))
    }

    /// Extract text from a document's bytes.
    ///
    /// Fails with `UnsupportedType` (permanent) for types without a strategy,
    /// and `ExtractionFailed` (retryable) for empty, mislabelled or unreadable
    /// input. A PDF whose text layer is near-empty is OCRed instead.
    #[instrument(skip(self, data), fields(subsystem = "jobs", component = "ocr_dispatcher", size = data.len()))]
    pub async fn extract(
        &self,
        data: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<ExtractionResult> {
        let strategy = self.strategy_for(mime_type)?;
        let mime = normalize_mime(mime_type);
        check_magic_bytes(data, filename, &mime)?;

        debug!(%strategy, "Strategy chosen");
        let mut result = self.run(strategy, data, filename, &mime).await?;

        if strategy == ExtractionStrategy::PdfText
            && result.needs_ocr()
            && self.has_adapter(ExtractionStrategy::PdfOcr)
        {
            info!(filename, "PDF text layer is near-empty, falling back to OCR");
            result = self
                .run(ExtractionStrategy::PdfOcr, data, filename, &mime)
                .await?;
        }

        match result.extracted_text.as_deref() {
            Some(text) if !text.trim().is_empty() => Ok(result),
            _ => Err(Error::ExtractionFailed(format!(
                "No text could be extracted from '{}'",
                filename
            ))),
        }
    }

    async fn run(
        &self,
        strategy: ExtractionStrategy,
        data: &[u8],
        filename: &str,
        mime: &str,
    ) -> Result<ExtractionResult> {
        let adapter = self.adapters.get(&strategy).ok_or_else(|| {
            Error::Internal(format!(
                "No extraction adapter registered for strategy: {}",
                strategy
            ))
        })?;
        adapter.extract(data, filename, mime, &self.config).await
    }

    /// Run health checks on all registered adapters.
    pub async fn health_check_all(&self) -> HashMap<ExtractionStrategy, bool> {
        let mut results = HashMap::new();
        for (strategy, adapter) in &self.adapters {
            let healthy = adapter.health_check().await.unwrap_or(false);
            results.insert(*strategy, healthy);
        }
        results
    }
}

impl Default for OcrDispatcher {
    fn default() -> Self {
        Self::with_default_adapters()
    }
}

/// Validate declared binary types against their magic bytes.
///
/// Text types have no signature and are accepted as-is.
fn check_magic_bytes(data: &[u8], filename: &str, mime: &str) -> Result<()> {
    if data.is_empty() {
        return Err(Error::ExtractionFailed(format!("'{}' is empty", filename)));
    }
    if mime.starts_with("text/") {
        return Ok(());
    }

    let detected = infer::get(data).map(|k| k.mime_type());
    let matches = match detected {
        Some(found) if mime.starts_with("image/") => found.starts_with("image/"),
        Some(found) => found == mime,
        None => false,
    };
    if matches {
        Ok(())
    } else {
        Err(Error::ExtractionFailed(format!(
            "'{}' is declared as {} but its content is {}",
            filename,
            mime,
            detected.unwrap_or("unrecognized")
        )))
    }
}
