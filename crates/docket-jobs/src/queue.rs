//! Job queue facade: submission, status, statistics, health and consumption
//! across named queues sharing one [`QueueStore`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use docket_core::{
    defaults, EnqueueOutcome, Error, HealthStatus, Job, JobState, JobStatusView, NewJob,
    QueueHealth, QueueName, QueueSnapshot, QueueStats, QueueStore, Result, RetryPolicy,
    SubmitOptions,
};

use crate::handler::JobHandler;
use crate::worker::{WorkerBuilder, WorkerConfig, WorkerHandle};

/// Queue-wide policy.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Attempts allowed when a submission does not say otherwise.
    pub max_attempts: i32,
    pub lease_duration: Duration,
    pub retry: RetryPolicy,
    /// Waiting jobs above which a queue reports degraded health.
    pub backlog_warning: i64,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
            lease_duration: Duration::from_secs(defaults::JOB_LEASE_SECS),
            retry: RetryPolicy::default(),
            backlog_warning: defaults::QUEUE_BACKLOG_WARNING,
        }
    }
}

impl QueueOptions {
    /// Read `JOB_MAX_ATTEMPTS`, `JOB_LEASE_SECS`, `JOB_BACKOFF_BASE_MS`,
    /// `JOB_BACKOFF_MAX_MS` and `QUEUE_BACKLOG_WARNING`.
    pub fn from_env() -> Self {
        let worker = WorkerConfig::from_env();
        let max_attempts = std::env::var("JOB_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(defaults::JOB_MAX_ATTEMPTS)
            .max(1);
        let backlog_warning = std::env::var("QUEUE_BACKLOG_WARNING")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::QUEUE_BACKLOG_WARNING);

        Self {
            max_attempts,
            lease_duration: worker.lease_duration,
            retry: worker.retry,
            backlog_warning,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_backlog_warning(mut self, backlog: i64) -> Self {
        self.backlog_warning = backlog;
        self
    }
}

/// The multi-queue job engine.
///
/// Cheap to clone; clones share the store and the wake-up notifier.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn QueueStore>,
    options: QueueOptions,
    queues: Vec<QueueName>,
    notify: Arc<Notify>,
}

impl JobQueue {
    /// Engine over the built-in queues.
    pub fn new(store: Arc<dyn QueueStore>, options: QueueOptions) -> Self {
        Self {
            store,
            options,
            queues: QueueName::builtin().to_vec(),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Add a queue to the set reported by [`stats`](Self::stats) and
    /// [`health`](Self::health).
    pub fn with_queue(mut self, queue: QueueName) -> Self {
        if !self.queues.contains(&queue) {
            self.queues.push(queue);
        }
        self
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn queues(&self) -> &[QueueName] {
        &self.queues
    }

    /// Register every known queue with the store.
    pub async fn register_queues(&self) -> Result<()> {
        for queue in &self.queues {
            self.store.register_queue(queue).await?;
        }
        Ok(())
    }

    /// Submit a job.
    ///
    /// With a dedup key, an in-flight job on the same queue sharing the key is
    /// returned instead of creating a new one. Fails with `QueueUnavailable`
    /// when the store cannot be reached; a job is never silently dropped.
    #[instrument(skip(self, payload, options), fields(subsystem = "jobs", component = "queue", op = "submit", queue = %queue))]
    pub async fn submit(
        &self,
        queue: &QueueName,
        payload: JsonValue,
        options: SubmitOptions,
    ) -> Result<EnqueueOutcome> {
        let max_attempts = options.max_attempts.unwrap_or(self.options.max_attempts);
        if max_attempts < 1 {
            return Err(Error::InvalidInput(format!(
                "max_attempts must be at least 1, got {}",
                max_attempts
            )));
        }
        if options.dedup_key.as_deref().is_some_and(|k| k.is_empty()) {
            return Err(Error::InvalidInput("dedup key must not be empty".to_string()));
        }

        let outcome = self
            .store
            .enqueue(NewJob {
                queue: queue.clone(),
                payload,
                priority: options.priority,
                max_attempts,
                dedup_key: options.dedup_key,
            })
            .await?;

        if outcome.deduplicated {
            debug!(job_id = %outcome.job_id, "Submission deduplicated");
        } else {
            debug!(job_id = %outcome.job_id, priority = ?options.priority, "Job submitted");
            self.notify.notify_waiters();
        }
        Ok(outcome)
    }

    /// Fetch a job record.
    pub async fn get_job(&self, queue: &QueueName, job_id: Uuid) -> Result<Job> {
        self.store
            .get(queue, job_id)
            .await?
            .ok_or_else(|| Error::JobNotFound {
                queue: queue.clone(),
                job_id,
            })
    }

    /// Status of a job. Fails with `JobNotFound` if unknown.
    pub async fn get_status(&self, queue: &QueueName, job_id: Uuid) -> Result<JobStatusView> {
        self.get_job(queue, job_id)
            .await
            .map(|job| JobStatusView::from(&job))
    }

    /// List jobs of a queue, newest first.
    pub async fn list(
        &self,
        queue: &QueueName,
        state: Option<JobState>,
        limit: Option<i64>,
    ) -> Result<Vec<Job>> {
        let limit = limit.unwrap_or(defaults::JOB_LIST_LIMIT).clamp(1, 1000);
        self.store.list(queue, state, limit).await
    }

    async fn snapshots(&self) -> Result<BTreeMap<QueueName, QueueSnapshot>> {
        let mut queues = BTreeMap::new();
        for queue in &self.queues {
            let snapshot = match self.store.counts(queue).await? {
                Some(counts) => QueueSnapshot {
                    counts,
                    degraded: false,
                },
                None => QueueSnapshot {
                    degraded: true,
                    ..Default::default()
                },
            };
            queues.insert(queue.clone(), snapshot);
        }
        Ok(queues)
    }

    /// Per-queue counts. Queues the store has never seen are zeroed and
    /// flagged degraded.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "queue", op = "stats"))]
    pub async fn stats(&self) -> Result<QueueStats> {
        let queues = self.snapshots().await?;
        let degraded = queues.values().any(|s| s.degraded);
        Ok(QueueStats { queues, degraded })
    }

    /// Structured health report. Never fails: store errors become
    /// `unreachable` with the error message attached.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "queue", op = "health"))]
    pub async fn health(&self) -> QueueHealth {
        let checked_at = Utc::now();
        let probe = match self.store.ping().await {
            Ok(()) => self.snapshots().await,
            Err(e) => Err(e),
        };

        match probe {
            Ok(queues) => {
                let backlogged: Vec<&QueueName> = queues
                    .iter()
                    .filter(|(_, s)| s.counts.waiting > self.options.backlog_warning)
                    .map(|(q, _)| q)
                    .collect();
                let status = if queues.values().any(|s| s.degraded) || !backlogged.is_empty() {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                if !backlogged.is_empty() {
                    warn!(queues = ?backlogged, threshold = self.options.backlog_warning, "Queue backlog above warning threshold");
                }
                QueueHealth {
                    status,
                    queues,
                    error: None,
                    checked_at,
                }
            }
            Err(e) => {
                warn!(error = %e, "Queue store unreachable");
                let message = e.to_string();
                QueueHealth {
                    status: HealthStatus::Unreachable,
                    queues: BTreeMap::new(),
                    error: Some(if message.is_empty() {
                        "queue store unreachable".to_string()
                    } else {
                        message
                    }),
                    checked_at,
                }
            }
        }
    }

    /// Start a worker for the handler's queue with `concurrency` slots.
    ///
    /// Each job is delivered to exactly one handler invocation at a time.
    pub fn consume(&self, handler: Arc<dyn JobHandler>, concurrency: usize) -> WorkerHandle {
        let config = WorkerConfig::from_env()
            .with_concurrency(concurrency)
            .with_lease_duration(self.options.lease_duration)
            .with_retry(self.options.retry);
        self.consume_with_config(handler, config)
    }

    /// Start a worker with an explicit configuration.
    pub fn consume_with_config(
        &self,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
    ) -> WorkerHandle {
        info!(
            queue = %handler.queue(),
            concurrency = config.concurrency,
            "Starting consumer"
        );
        WorkerBuilder::new(self.store.clone(), handler)
            .with_config(config)
            .with_notify(self.notify.clone())
            .build()
            .start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::JobPriority;
    use docket_db::MemoryQueueStore;
    use serde_json::json;

    fn engine() -> (Arc<MemoryQueueStore>, JobQueue) {
        let store = Arc::new(MemoryQueueStore::new());
        let queue = JobQueue::new(store.clone(), QueueOptions::default());
        (store, queue)
    }

    #[tokio::test]
    async fn test_submit_and_status() {
        let (_, jq) = engine();
        let outcome = jq
            .submit(&QueueName::USER_REQUESTS, json!({"x": 1}), SubmitOptions::new())
            .await
            .unwrap();
        assert!(!outcome.deduplicated);

        let status = jq
            .get_status(&QueueName::USER_REQUESTS, outcome.job_id)
            .await
            .unwrap();
        assert_eq!(status.state, JobState::Waiting);
        assert_eq!(status.attempts, 0);
        assert_eq!(status.max_attempts, defaults::JOB_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_status_unknown_job() {
        let (_, jq) = engine();
        let err = jq
            .get_status(&QueueName::AI_ANALYSIS, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_status_is_scoped_to_queue() {
        let (_, jq) = engine();
        let id = jq
            .submit(&QueueName::USER_REQUESTS, json!({}), SubmitOptions::new())
            .await
            .unwrap()
            .job_id;
        assert!(jq.get_status(&QueueName::AI_ANALYSIS, id).await.is_err());
    }

    #[tokio::test]
    async fn test_submit_rejects_zero_attempts() {
        let (_, jq) = engine();
        let err = jq
            .submit(
                &QueueName::USER_REQUESTS,
                json!({}),
                SubmitOptions::new().with_max_attempts(0),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_submit_unreachable_store_fails_fast() {
        let (store, jq) = engine();
        store.set_reachable(false);
        let err = jq
            .submit(&QueueName::USER_REQUESTS, json!({}), SubmitOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueueUnavailable(_)));
    }

    #[tokio::test]
    async fn test_stats_flags_unregistered_queues() {
        let (_, jq) = engine();
        jq.submit(
            &QueueName::AI_ANALYSIS,
            json!({}),
            SubmitOptions::new().with_priority(JobPriority::High),
        )
        .await
        .unwrap();

        let stats = jq.stats().await.unwrap();
        assert!(stats.degraded);
        let ai = stats.get(&QueueName::AI_ANALYSIS).unwrap();
        assert!(!ai.degraded);
        assert_eq!(ai.counts.waiting, 1);
        let docs = stats.get(&QueueName::DOCUMENT_PROCESSING).unwrap();
        assert!(docs.degraded);
        assert_eq!(docs.counts.total, 0);

        jq.register_queues().await.unwrap();
        assert!(!jq.stats().await.unwrap().degraded);
    }

    #[tokio::test]
    async fn test_health_states() {
        let (store, jq) = engine();
        assert_eq!(jq.health().await.status, HealthStatus::Degraded);

        jq.register_queues().await.unwrap();
        let health = jq.health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.queues.len(), 3);
        assert!(health.error.is_none());

        store.set_reachable(false);
        let health = jq.health().await;
        assert_eq!(health.status, HealthStatus::Unreachable);
        assert!(!health.error.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_health_degraded_on_backlog() {
        let store = Arc::new(MemoryQueueStore::new());
        let jq = JobQueue::new(store, QueueOptions::default().with_backlog_warning(1));
        jq.register_queues().await.unwrap();
        for _ in 0..2 {
            jq.submit(&QueueName::USER_REQUESTS, json!({}), SubmitOptions::new())
                .await
                .unwrap();
        }
        assert_eq!(jq.health().await.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_custom_queue_reported() {
        let (_, jq) = engine();
        let custom = QueueName::new("exports").unwrap();
        let jq = jq.with_queue(custom.clone());
        jq.submit(&custom, json!({}), SubmitOptions::new())
            .await
            .unwrap();
        let stats = jq.stats().await.unwrap();
        assert_eq!(stats.get(&custom).unwrap().counts.waiting, 1);
    }
}
