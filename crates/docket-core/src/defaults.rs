//! Centralized default constants for docket.
//!
//! **This module is the single source of truth** for shared default values.
//! `from_env()` constructors across the workspace fall back to these.

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP bind host.
pub const SERVER_HOST: &str = "0.0.0.0";

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Maximum JSON request body size in bytes (1 MB).
pub const MAX_BODY_SIZE_BYTES: usize = 1024 * 1024;

/// Default root directory of the filesystem blob store.
pub const STORAGE_ROOT: &str = "./data/blobs";

// =============================================================================
// DATABASE
// =============================================================================

/// Maximum connections in the Postgres pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Timeout for acquiring a pooled connection in seconds.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Attempts per job before it is dead-lettered.
pub const JOB_MAX_ATTEMPTS: i32 = 3;

/// Lease duration in seconds. Also bounds a single handler invocation.
pub const JOB_LEASE_SECS: u64 = 300;

/// Idle poll interval of a worker in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// First retry delay in milliseconds.
pub const JOB_BACKOFF_BASE_MS: u64 = 1000;

/// Retry delay cap in milliseconds.
pub const JOB_BACKOFF_MAX_MS: u64 = 60_000;

/// Worker slots for `document-processing` (OCR is CPU heavy).
pub const CONCURRENCY_DOCUMENT_PROCESSING: usize = 2;

/// Worker slots for `user-requests`.
pub const CONCURRENCY_USER_REQUESTS: usize = 4;

/// Worker slots for `ai-analysis`.
pub const CONCURRENCY_AI_ANALYSIS: usize = 4;

/// Waiting jobs above which a queue reports as degraded.
pub const QUEUE_BACKLOG_WARNING: i64 = 1000;

/// Capacity of the worker event broadcast channel.
pub const WORKER_EVENT_CAPACITY: usize = 100;

/// Default page size when listing jobs.
pub const JOB_LIST_LIMIT: i64 = 50;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default generation model name (Ollama).
pub const GEN_MODEL: &str = "llama3.1:8b";

/// Timeout for generation requests in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 120;

/// Sampling temperature for enrichment prompts.
pub const GEN_TEMPERATURE: f32 = 0.2;

/// Characters per chunk when summarizing long documents map-reduce style.
pub const SUMMARY_CHUNK_CHARS: usize = 12_000;

/// Partial summaries merged by a single combine call. Longer documents are
/// reduced in several rounds.
pub const SUMMARY_COMBINE_FAN_IN: usize = 8;

// =============================================================================
// EXTRACTION
// =============================================================================

/// Timeout for external extraction tools (pdftotext, tesseract) in seconds.
pub const EXTRACTION_CMD_TIMEOUT_SECS: u64 = 60;

/// Below this many non-whitespace characters a PDF text layer is treated as
/// missing and OCR is requested.
pub const PDF_MIN_TEXT_CHARS: usize = 32;

/// Maximum pages rasterized for PDF OCR.
pub const PDF_OCR_MAX_PAGES: usize = 50;

/// Tesseract language pack(s).
pub const OCR_LANGUAGES: &str = "eng+ara";
