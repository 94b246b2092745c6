//! # docket-inference
//!
//! AI enrichment client for docket.
//!
//! This crate provides:
//! - Ollama implementation of [`EnrichmentBackend`] (default)
//! - Prompt templates for summary, timeline, translation and analysis
//! - Tolerant parsing of model output (code fences, wrapped or bare arrays)
//! - A deterministic mock backend with failure injection (feature `mock`)
//!
//! # Feature Flags
//!
//! - `ollama` (default): Enable Ollama backend
//! - `mock`: Expose [`mock::MockEnrichmentBackend`] to dependent crates
//!
//! # Example
//!
//! ```rust,no_run
//! use docket_inference::{EnrichmentBackend, OllamaEnrichmentBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OllamaEnrichmentBackend::from_env().unwrap();
//!     let summary = backend.summarize("The parties signed on 2021-03-04.").await.unwrap();
//!     println!("{}", summary);
//! }
//! ```

pub mod parse;
pub mod prompts;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use docket_core::*;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaEnrichmentBackend};

pub use parse::{parse_timeline, split_into_chunks, strip_code_fences};
