//! Ollama enrichment backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use docket_core::{defaults, EnrichmentBackend, Error, Language, Result, TimelineEvent};

use crate::parse::{parse_timeline, split_into_chunks};
use crate::prompts;

/// Ollama-backed implementation of [`EnrichmentBackend`] over `/api/chat`.
pub struct OllamaEnrichmentBackend {
    client: Client,
    base_url: String,
    gen_model: String,
    gen_timeout: Duration,
    temperature: f32,
    chunk_chars: usize,
    combine_fan_in: usize,
}

/// Connection settings for [`OllamaEnrichmentBackend`].
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub gen_model: String,
    pub gen_timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::OLLAMA_URL.to_string(),
            gen_model: defaults::GEN_MODEL.to_string(),
            gen_timeout: Duration::from_secs(defaults::GEN_TIMEOUT_SECS),
        }
    }
}

impl OllamaConfig {
    /// Read `OLLAMA_URL`, `GEN_MODEL` and `GEN_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let base_url = std::env::var("OLLAMA_URL")
            .or_else(|_| std::env::var("OLLAMA_BASE"))
            .unwrap_or_else(|_| defaults::OLLAMA_URL.to_string());
        let gen_model = std::env::var("GEN_MODEL")
            .or_else(|_| std::env::var("OLLAMA_GEN_MODEL"))
            .unwrap_or_else(|_| defaults::GEN_MODEL.to_string());
        let gen_timeout = std::env::var("GEN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::GEN_TIMEOUT_SECS);

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            gen_model,
            gen_timeout: Duration::from_secs(gen_timeout),
        }
    }
}

/// Chat API message for `/api/chat`.
#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Request payload for the Ollama `/api/chat` endpoint.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    /// Set to `"json"` to force valid JSON output.
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<JsonValue>,
    options: ChatOptions,
}

/// Response from the Ollama `/api/chat` endpoint.
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

impl OllamaEnrichmentBackend {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.gen_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "ollama",
            url = %config.base_url,
            model = %config.gen_model,
            "Initializing Ollama enrichment backend"
        );

        Ok(Self {
            client,
            base_url: config.base_url,
            gen_model: config.gen_model,
            gen_timeout: config.gen_timeout,
            temperature: defaults::GEN_TEMPERATURE,
            chunk_chars: defaults::SUMMARY_CHUNK_CHARS,
            combine_fan_in: defaults::SUMMARY_COMBINE_FAN_IN,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(OllamaConfig::from_env())
    }

    /// Override chunking of long inputs: characters per chunk, and how many
    /// partial summaries one combine call may merge (at least 2).
    pub fn with_chunking(mut self, chunk_chars: usize, combine_fan_in: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self.combine_fan_in = combine_fan_in.max(2);
        self
    }

    /// Every chunk of the input. Nothing is dropped, however long the text.
    fn chunks(&self, text: &str) -> Vec<String> {
        let chunks = split_into_chunks(text, self.chunk_chars);
        if chunks.len() > 1 {
            debug!(chunks = chunks.len(), chunk_chars = self.chunk_chars, "Input split into chunks");
        }
        chunks
    }

    /// One non-streaming chat round-trip with failure classification.
    async fn chat(&self, system: &str, prompt: &str, json: bool) -> Result<String> {
        let start = Instant::now();

        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request = ChatRequest {
            model: self.gen_model.clone(),
            messages,
            stream: false,
            format: json.then(|| serde_json::json!("json")),
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(self.gen_timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            Error::InvalidResponse(format!("unexpected Ollama response shape: {}", e))
        })?;

        let content = parsed.message.content.trim().to_string();
        if content.is_empty() {
            return Err(Error::InvalidResponse("model returned empty content".to_string()));
        }

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            response_len = content.len(),
            duration_ms = elapsed,
            "Generation complete"
        );
        if elapsed > 30_000 {
            warn!(
                duration_ms = elapsed,
                prompt_len = prompt.len(),
                "Slow generation operation"
            );
        }
        Ok(content)
    }
}

/// Map a non-success HTTP status to the enrichment error taxonomy.
fn classify_status(status: StatusCode, body: &str) -> Error {
    let detail = format!("Ollama returned {}: {}", status, body.trim());
    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Error::Timeout(detail),
        _ => Error::EnrichmentFailed(detail),
    }
}

#[async_trait]
impl EnrichmentBackend for OllamaEnrichmentBackend {
    /// Map-reduce over chunks for long documents. Partials are combined in
    /// groups of `combine_fan_in` until one summary is left.
    #[instrument(skip(self, text), fields(subsystem = "inference", component = "ollama", op = "summarize", model = %self.gen_model, prompt_len = text.len()))]
    async fn summarize(&self, text: &str) -> Result<String> {
        let chunks = self.chunks(text);
        if chunks.len() <= 1 {
            return self.chat(prompts::SUMMARY_SYSTEM, text, false).await;
        }

        let mut partials = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let prompt = prompts::summary_chunk(i + 1, chunks.len(), chunk);
            partials.push(self.chat(prompts::SUMMARY_SYSTEM, &prompt, false).await?);
        }

        while partials.len() > 1 {
            let mut merged = Vec::with_capacity(partials.len().div_ceil(self.combine_fan_in));
            for group in partials.chunks(self.combine_fan_in) {
                if let [single] = group {
                    merged.push(single.clone());
                    continue;
                }
                let combined = prompts::summary_combine(group);
                merged.push(self.chat(prompts::SUMMARY_SYSTEM, &combined, false).await?);
            }
            partials = merged;
        }
        partials
            .pop()
            .ok_or_else(|| Error::InvalidResponse("no summary produced".to_string()))
    }

    #[instrument(skip(self, text), fields(subsystem = "inference", component = "ollama", op = "extract_timeline", model = %self.gen_model, prompt_len = text.len()))]
    async fn extract_timeline(&self, text: &str) -> Result<Vec<TimelineEvent>> {
        let mut events = Vec::new();
        for chunk in self.chunks(text) {
            let raw = self.chat(prompts::TIMELINE_SYSTEM, &chunk, true).await?;
            events.extend(parse_timeline(&raw, "document")?);
        }
        events.sort_by(|a, b| a.date.cmp(&b.date));
        events.dedup();
        Ok(events)
    }

    #[instrument(skip(self, text), fields(subsystem = "inference", component = "ollama", op = "translate", model = %self.gen_model))]
    async fn translate(&self, text: &str, target: Language) -> Result<String> {
        let system = prompts::translate_system(target);
        let mut parts = Vec::new();
        for chunk in self.chunks(text) {
            parts.push(self.chat(&system, &chunk, false).await?);
        }
        Ok(parts.join("\n"))
    }

    #[instrument(skip(self, content, context), fields(subsystem = "inference", component = "ollama", op = "analyze", model = %self.gen_model))]
    async fn analyze(
        &self,
        content: &str,
        analysis_type: &str,
        context: &JsonValue,
    ) -> Result<String> {
        let system = prompts::analysis_system(analysis_type);
        let prompt = prompts::analysis_prompt(content, context);
        self.chat(&system, &prompt, false).await
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => Ok(true),
            Ok(resp) => {
                warn!("Ollama health check failed: {}", resp.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Ollama health check error: {}", e);
                Ok(false)
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.gen_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url, defaults::OLLAMA_URL);
        assert_eq!(config.gen_model, defaults::GEN_MODEL);
        assert_eq!(config.gen_timeout, Duration::from_secs(defaults::GEN_TIMEOUT_SECS));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, ""),
            Error::Timeout(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            Error::EnrichmentFailed(msg) if msg.contains("boom")
        ));
    }

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatRequest {
            model: "llama3.1:8b".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "Hello".to_string(),
            }],
            stream: false,
            format: Some(serde_json::json!("json")),
            options: ChatOptions { temperature: 0.2 },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama3.1:8b");
        assert_eq!(json["stream"], false);
        assert_eq!(json["format"], "json");
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_chat_request_without_format() {
        let request = ChatRequest {
            model: "m".to_string(),
            messages: vec![],
            stream: false,
            format: None,
            options: ChatOptions { temperature: 0.2 },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("format"));
    }

    #[test]
    fn test_long_input_keeps_every_chunk() {
        let backend = OllamaEnrichmentBackend::new(OllamaConfig::default())
            .unwrap()
            .with_chunking(10, 2);
        let text = "abcdefghij".repeat(5);
        let chunks = backend.chunks(&text);
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks.concat(), text);
    }
}
