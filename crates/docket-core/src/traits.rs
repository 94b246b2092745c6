//! Core traits for docket abstractions.
//!
//! These traits define the seams between the job-queue core and its
//! collaborators (queue storage, document storage, blob storage, AI
//! enrichment, text extraction), so backends are pluggable and testable.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// QUEUE STORE
// =============================================================================

/// Durable storage for job records organized into named queues.
///
/// Every state transition is atomic with respect to concurrent callers.
/// `complete` and `fail` are compare-and-set on the lease token: a caller whose
/// lease was reclaimed gets [`crate::Error::LeaseLost`] and changes nothing.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Make a queue known to the store. Idempotent.
    async fn register_queue(&self, queue: &QueueName) -> Result<()>;

    /// Insert a job, or return the in-flight job sharing its dedup key.
    async fn enqueue(&self, job: NewJob) -> Result<EnqueueOutcome>;

    /// Lease the next available job: highest priority first, then oldest.
    ///
    /// Increments `attempts`, sets `state = active` and rotates the lease token.
    async fn lease(&self, queue: &QueueName, lease_duration: Duration) -> Result<Option<Job>>;

    /// Mark a leased job completed.
    async fn complete(&self, job_id: Uuid, lease_token: Uuid, result: Option<JsonValue>)
        -> Result<()>;

    /// Record a failure of a leased job.
    ///
    /// With `retry = Some(delay)` and attempts remaining, the job becomes
    /// `delayed` (or `waiting` for a zero delay). Otherwise it becomes `failed`.
    /// Returns the resulting state.
    async fn fail(
        &self,
        job_id: Uuid,
        lease_token: Uuid,
        error: &str,
        retry: Option<Duration>,
    ) -> Result<JobState>;

    /// Return jobs whose lease expired to the queue, or dead-letter them when
    /// no attempts remain.
    async fn reclaim_expired(&self, queue: &QueueName, backoff: &RetryPolicy)
        -> Result<ReclaimReport>;

    /// Fetch a job by id within a queue.
    async fn get(&self, queue: &QueueName, job_id: Uuid) -> Result<Option<Job>>;

    /// Per-state counts, or `None` if the queue was never registered.
    async fn counts(&self, queue: &QueueName) -> Result<Option<QueueCounts>>;

    /// List jobs, newest first, optionally filtered by state.
    async fn list(&self, queue: &QueueName, state: Option<JobState>, limit: i64)
        -> Result<Vec<Job>>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<()>;
}

// =============================================================================
// DOCUMENT STORAGE
// =============================================================================

/// Document rows owned by the document-storage collaborator.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Create a `PENDING` document row.
    async fn insert(&self, doc: NewDocument) -> Result<i64>;

    /// Fetch a document.
    async fn get(&self, id: i64) -> Result<Option<Document>>;

    /// Apply a partial update. Fails with `DocumentNotFound` for unknown ids.
    async fn update(&self, id: i64, update: DocumentUpdate) -> Result<()>;
}

/// Key-value store for raw document bytes, addressed by storage path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn read(&self, storage_path: &str) -> Result<Vec<u8>>;

    async fn write(&self, storage_path: &str, data: &[u8]) -> Result<()>;

    async fn exists(&self, storage_path: &str) -> Result<bool>;
}

// =============================================================================
// AI ENRICHMENT
// =============================================================================

/// Capability boundary for AI-generated document artifacts.
///
/// Each call may fail with `RateLimited`, `Timeout`, `InvalidResponse` or
/// `EnrichmentFailed`; all of them are retryable.
#[async_trait]
pub trait EnrichmentBackend: Send + Sync {
    /// Produce a concise summary of the text.
    async fn summarize(&self, text: &str) -> Result<String>;

    /// Extract dated events, ordered by date.
    async fn extract_timeline(&self, text: &str) -> Result<Vec<TimelineEvent>>;

    /// Translate the text into the target language.
    async fn translate(&self, text: &str, target: Language) -> Result<String>;

    /// Free-form analysis of caller-supplied content.
    async fn analyze(&self, content: &str, analysis_type: &str, context: &JsonValue)
        -> Result<String>;

    /// Check if the backend is reachable.
    async fn health_check(&self) -> Result<bool>;

    /// Model identifier reported in job results.
    fn model_name(&self) -> &str;
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// Adapter that turns raw document bytes into text for one strategy.
#[async_trait]
pub trait ExtractionAdapter: Send + Sync {
    /// The extraction strategy this adapter handles.
    fn strategy(&self) -> ExtractionStrategy;

    /// Extract text from raw file data.
    async fn extract(
        &self,
        data: &[u8],
        filename: &str,
        mime_type: &str,
        config: &JsonValue,
    ) -> Result<ExtractionResult>;

    /// Check if the adapter's external tools are available.
    async fn health_check(&self) -> Result<bool>;

    fn name(&self) -> &str;
}
