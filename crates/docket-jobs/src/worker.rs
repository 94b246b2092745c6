//! Job worker: the lease-based consume loop for one queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use docket_core::{defaults, Error, Job, JobState, QueueName, QueueStore, Result, RetryPolicy};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
    /// Maximum number of jobs leased at once.
    pub concurrency: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Lease length; also the hard bound on one handler execution.
    pub lease_duration: Duration,
    /// Backoff applied between attempts of the same job.
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            concurrency: 1,
            enabled: true,
            lease_duration: Duration::from_secs(defaults::JOB_LEASE_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

/// Default concurrency for the built-in queues.
pub fn default_concurrency(queue: &QueueName) -> usize {
    if *queue == QueueName::DOCUMENT_PROCESSING {
        defaults::CONCURRENCY_DOCUMENT_PROCESSING
    } else if *queue == QueueName::USER_REQUESTS {
        defaults::CONCURRENCY_USER_REQUESTS
    } else if *queue == QueueName::AI_ANALYSIS {
        defaults::CONCURRENCY_AI_ANALYSIS
    } else {
        1
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    /// | `JOB_LEASE_SECS` | `300` | Lease length and handler timeout |
    /// | `JOB_BACKOFF_BASE_MS` | `1000` | First retry delay |
    /// | `JOB_BACKOFF_MAX_MS` | `60000` | Retry delay cap |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let poll_interval_ms =
            env_parse("JOB_POLL_INTERVAL_MS").unwrap_or(defaults::JOB_POLL_INTERVAL_MS);
        let lease_secs = env_parse("JOB_LEASE_SECS").unwrap_or(defaults::JOB_LEASE_SECS);
        let base_ms = env_parse("JOB_BACKOFF_BASE_MS").unwrap_or(defaults::JOB_BACKOFF_BASE_MS);
        let max_ms = env_parse("JOB_BACKOFF_MAX_MS").unwrap_or(defaults::JOB_BACKOFF_MAX_MS);

        Self {
            poll_interval_ms,
            concurrency: 1,
            enabled,
            lease_duration: Duration::from_secs(lease_secs),
            retry: RetryPolicy::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms)),
        }
    }

    /// Environment config for one queue, with concurrency read from
    /// `JOB_CONCURRENCY_<QUEUE>` (e.g. `JOB_CONCURRENCY_DOCUMENT_PROCESSING`).
    pub fn for_queue(queue: &QueueName) -> Self {
        let var = format!(
            "JOB_CONCURRENCY_{}",
            queue.as_str().to_uppercase().replace('-', "_")
        );
        let concurrency = env_parse::<usize>(&var).unwrap_or_else(|| default_concurrency(queue));
        Self::from_env().with_concurrency(concurrency)
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the number of concurrently leased jobs (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
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
}

/// Event emitted by the job worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A job was leased and handed to the handler.
    JobStarted {
        job_id: Uuid,
        queue: QueueName,
        attempt: i32,
    },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, queue: QueueName },
    /// A job failed and was scheduled for another attempt.
    JobRetrying {
        job_id: Uuid,
        queue: QueueName,
        attempt: i32,
        delay_ms: u64,
        error: String,
    },
    /// A job was dead-lettered.
    JobFailed {
        job_id: Uuid,
        queue: QueueName,
        error: String,
    },
    /// An expired lease was taken back and the job requeued.
    LeaseReclaimed { job_id: Uuid, queue: QueueName },
    /// Worker started.
    WorkerStarted { queue: QueueName },
    /// Worker stopped.
    WorkerStopped { queue: QueueName },
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    queue: QueueName,
    shutdown_tx: mpsc::Sender<()>,
    event_tx: broadcast::Sender<WorkerEvent>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop leasing and wait for in-flight jobs to finish.
    pub async fn shutdown(self) -> Result<()> {
        // A disabled worker has already returned and dropped the receiver.
        let _ = self.shutdown_tx.send(()).await;
        self.join
            .await
            .map_err(|e| Error::Internal(format!("Worker task for {} failed: {}", self.queue, e)))
    }
}

/// Job worker that processes jobs from one queue.
pub struct JobWorker {
    queue: QueueName,
    config: WorkerConfig,
    notify: Arc<Notify>,
    runner: JobRunner,
}

impl JobWorker {
    /// Create a new job worker for the handler's queue.
    pub fn new(store: Arc<dyn QueueStore>, handler: Arc<dyn JobHandler>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::WORKER_EVENT_CAPACITY);
        Self {
            queue: handler.queue(),
            notify: Arc::new(Notify::new()),
            runner: JobRunner {
                store,
                handler,
                event_tx,
                lease_duration: config.lease_duration,
                retry: config.retry,
            },
            config,
        }
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Get a receiver for worker events. Subscribe before `start` to see
    /// `WorkerStarted`.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.runner.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_tx = self.runner.event_tx.clone();
        let queue = self.queue.clone();

        let join = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            queue,
            shutdown_tx,
            event_tx,
            join,
        }
    }

    /// Run the consume loop.
    ///
    /// Each iteration reclaims expired leases, then leases jobs while permits
    /// are free. Each leased job runs in its own task holding one permit, so a
    /// slow job never blocks the other slots.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker", queue = %self.queue))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        if let Err(e) = self.runner.store.register_queue(&self.queue).await {
            warn!(error = %e, "Failed to register queue, continuing");
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            concurrency = self.config.concurrency,
            lease_secs = self.config.lease_duration.as_secs(),
            "Job worker started"
        );
        let _ = self.runner.event_tx.send(WorkerEvent::WorkerStarted {
            queue: self.queue.clone(),
        });

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker received shutdown signal");
                break;
            }

            self.reclaim().await;

            let mut leased = 0usize;
            while let Ok(permit) = permits.clone().try_acquire_owned() {
                match self
                    .runner
                    .store
                    .lease(&self.queue, self.config.lease_duration)
                    .await
                {
                    Ok(Some(job)) => {
                        leased += 1;
                        let runner = self.runner.clone();
                        tasks.spawn(async move {
                            runner.execute_job(job).await;
                            drop(permit);
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to lease job");
                        break;
                    }
                }
            }
            if leased > 0 {
                debug!(leased, in_flight = tasks.len(), "Leased jobs");
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Job worker received shutdown signal");
                    break;
                }
                _ = self.notify.notified() => {}
                _ = sleep(poll_interval) => {}
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
            }
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Job task panicked");
            }
        }

        let _ = self.runner.event_tx.send(WorkerEvent::WorkerStopped {
            queue: self.queue.clone(),
        });
        info!("Job worker stopped");
    }

    /// Return expired leases to the queue and dead-letter exhausted ones.
    async fn reclaim(&self) {
        let report = match self
            .runner
            .store
            .reclaim_expired(&self.queue, &self.runner.retry)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Failed to reclaim expired leases");
                return;
            }
        };

        for job_id in report.requeued {
            let _ = self.runner.event_tx.send(WorkerEvent::LeaseReclaimed {
                job_id,
                queue: self.queue.clone(),
            });
        }
        for job in report.dead_lettered {
            let error = job
                .last_error
                .clone()
                .unwrap_or_else(|| "lease expired".to_string());
            self.runner.dead_lettered(&job, error).await;
        }
    }
}

/// Everything a spawned job task needs, cheap to clone.
#[derive(Clone)]
struct JobRunner {
    store: Arc<dyn QueueStore>,
    handler: Arc<dyn JobHandler>,
    event_tx: broadcast::Sender<WorkerEvent>,
    lease_duration: Duration,
    retry: RetryPolicy,
}

impl JobRunner {
    /// Execute a single leased job and record its outcome.
    #[instrument(skip(self, job), fields(subsystem = "jobs", component = "worker", queue = %job.queue, job_id = %job.id, attempt = job.attempts))]
    async fn execute_job(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let queue = job.queue.clone();
        let Some(lease_token) = job.lease_token else {
            error!("Leased job has no lease token, skipping");
            return;
        };

        debug!("Processing job");
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            queue: queue.clone(),
            attempt: job.attempts,
        });

        let ctx = JobContext::new(job.clone());
        let result = match tokio::time::timeout(self.lease_duration, self.handler.execute(ctx)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    lease_secs = self.lease_duration.as_secs(),
                    "Job exceeded its lease"
                );
                JobResult::Retry(format!(
                    "Job exceeded lease of {}s",
                    self.lease_duration.as_secs()
                ))
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            JobResult::Success(result_data) => {
                match self.store.complete(job_id, lease_token, result_data).await {
                    Ok(()) => {
                        info!(duration_ms, "Job completed successfully");
                        let _ = self
                            .event_tx
                            .send(WorkerEvent::JobCompleted { job_id, queue });
                    }
                    Err(Error::LeaseLost(_)) => {
                        warn!(duration_ms, "Lease lost before completion, discarding result");
                    }
                    Err(e) => error!(error = %e, "Failed to mark job as completed"),
                }
            }
            JobResult::Retry(err) => {
                let delay = self.retry.delay_for(job.attempts);
                self.record_failure(&job, lease_token, err, Some(delay), duration_ms)
                    .await;
            }
            JobResult::Failed(err) => {
                self.record_failure(&job, lease_token, err, None, duration_ms)
                    .await;
            }
        }
    }

    async fn record_failure(
        &self,
        job: &Job,
        lease_token: Uuid,
        error: String,
        retry: Option<Duration>,
        duration_ms: u64,
    ) {
        match self.store.fail(job.id, lease_token, &error, retry).await {
            Ok(JobState::Failed) => {
                let mut dead = job.clone();
                dead.state = JobState::Failed;
                dead.last_error = Some(error.clone());
                dead.lease_token = None;
                self.dead_lettered(&dead, error).await;
            }
            Ok(_) => {
                let delay_ms = retry.map_or(0, |d| d.as_millis() as u64);
                warn!(%error, delay_ms, duration_ms, "Job failed, will retry");
                let _ = self.event_tx.send(WorkerEvent::JobRetrying {
                    job_id: job.id,
                    queue: job.queue.clone(),
                    attempt: job.attempts,
                    delay_ms,
                    error,
                });
            }
            Err(Error::LeaseLost(_)) => {
                warn!(%error, "Lease lost before failure was recorded, discarding outcome");
            }
            Err(e) => error!(error = %e, "Failed to mark job as failed"),
        }
    }

    async fn dead_lettered(&self, job: &Job, error: String) {
        warn!(
            queue = %job.queue,
            job_id = %job.id,
            attempts = job.attempts,
            %error,
            "Job dead-lettered"
        );
        self.handler.on_dead_letter(job, &error).await;
        let _ = self.event_tx.send(WorkerEvent::JobFailed {
            job_id: job.id,
            queue: job.queue.clone(),
            error,
        });
    }
}

/// Builder for creating a job worker.
pub struct WorkerBuilder {
    store: Arc<dyn QueueStore>,
    handler: Arc<dyn JobHandler>,
    config: Option<WorkerConfig>,
    notify: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new(store: Arc<dyn QueueStore>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            store,
            handler,
            config: None,
            notify: None,
        }
    }

    /// Set the worker configuration. Defaults to [`WorkerConfig::for_queue`].
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Wake the worker through this notifier instead of waiting for the poll.
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    /// Build and return the worker.
    pub fn build(self) -> JobWorker {
        let config = self
            .config
            .unwrap_or_else(|| WorkerConfig::for_queue(&self.handler.queue()));
        let mut worker = JobWorker::new(self.store, self.handler, config);
        if let Some(notify) = self.notify {
            worker.notify = notify;
        }
        worker
    }
}
