//! Structured logging schema and field name constants for docket.
//!
//! All crates use these constants for structured logging fields so log
//! aggregation can query every subsystem by the same names.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue: retry scheduled, lease reclaimed, fallback applied |
//! | INFO  | Lifecycle events (worker start/stop), job completions |
//! | DEBUG | Decision points (dedup hit, extraction strategy chosen) |
//! | TRACE | Per-item iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "db", "inference", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "worker", "queue", "pipeline", "ollama", "ocr"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "enqueue", "lease", "reclaim", "summarize"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Queue name.
pub const QUEUE: &str = "queue";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Document id being processed.
pub const DOCUMENT_ID: &str = "document_id";

/// Attempt number of the current lease (1-based).
pub const ATTEMPT: &str = "attempt";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

/// Database table affected.
pub const DB_TABLE: &str = "db_table";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
