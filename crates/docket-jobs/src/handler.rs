//! Job handlers for each queue.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use docket_core::{Error, Job, QueueName};

/// Context provided to job handlers.
pub struct JobContext {
    /// The leased job being processed.
    pub job: Job,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    /// 1-based attempt number of this execution.
    pub fn attempt(&self) -> i32 {
        self.job.attempts
    }

    /// Whether a retry would exceed the job's attempt budget.
    pub fn is_final_attempt(&self) -> bool {
        self.job.is_final_attempt()
    }

    /// Get the job payload.
    pub fn payload(&self) -> &JsonValue {
        &self.job.payload
    }

    /// Deserialize the payload into a queue-specific type.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_value(self.job.payload.clone())
            .map_err(|e| format!("Malformed {} payload: {}", self.job.queue, e))
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed permanently; it is dead-lettered without further attempts.
    Failed(String),
    /// Job should be retried after a backoff delay, if attempts remain.
    Retry(String),
}

impl JobResult {
    /// Retry for transient errors, fail permanently otherwise.
    pub fn from_error(err: &Error) -> Self {
        if err.is_retryable() {
            JobResult::Retry(err.to_string())
        } else {
            JobResult::Failed(err.to_string())
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success(_))
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The queue this handler consumes.
    fn queue(&self) -> QueueName;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Called after the job reached `failed` for good, whether through a
    /// permanent failure, exhausted retries, or an expired final lease.
    async fn on_dead_letter(&self, _job: &Job, _error: &str) {}

    /// Check if this handler can process jobs of the given queue.
    fn can_handle(&self, queue: &QueueName) -> bool {
        self.queue() == *queue
    }
}

/// No-op handler for testing.
pub struct NoOpHandler {
    queue: QueueName,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given queue.
    pub fn new(queue: QueueName) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn queue(&self) -> QueueName {
        self.queue.clone()
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Success(None)
    }
}
