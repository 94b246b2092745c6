//! PostgreSQL queue store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use docket_core::{
    new_v7, EnqueueOutcome, Error, Job, JobPriority, JobState, NewJob, QueueCounts, QueueName,
    QueueStore, ReclaimReport, Result, RetryPolicy,
};

use crate::pool::classify;
use crate::time_after;

const JOB_COLUMNS: &str = "id, queue, payload, state, priority, attempts, max_attempts, dedup_key, \
     result, last_error, created_at, available_at, started_at, finished_at, lease_expires_at, \
     lease_token";

/// Attempts at resolving an insert/dedup race before giving up.
const ENQUEUE_RACE_RETRIES: usize = 3;

/// PostgreSQL implementation of [`QueueStore`].
///
/// Leasing uses `FOR UPDATE SKIP LOCKED` so concurrent workers never block on
/// or double-claim the same row. Deduplication relies on the partial unique
/// index `job_inflight_dedup_idx`.
#[derive(Clone)]
pub struct PgQueueStore {
    pool: Pool<Postgres>,
}

impl PgQueueStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: PgRow) -> Result<Job> {
        let queue: String = row.try_get("queue")?;
        let state: String = row.try_get("state")?;
        let priority: i16 = row.try_get("priority")?;
        Ok(Job {
            id: row.try_get("id")?,
            queue: QueueName::new(queue)?,
            payload: row.try_get("payload")?,
            state: state.parse()?,
            priority: JobPriority::from_rank(priority),
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            dedup_key: row.try_get("dedup_key")?,
            result: row.try_get("result")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            available_at: row.try_get("available_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            lease_token: row.try_get("lease_token")?,
        })
    }

    /// Find the in-flight job holding a dedup key, if any.
    async fn find_in_flight(&self, queue: &QueueName, dedup_key: &str) -> Result<Option<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM job
             WHERE queue = $1 AND dedup_key = $2
               AND state IN ('waiting', 'active', 'delayed')",
        )
        .bind(queue.as_str())
        .bind(dedup_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)
    }
}

/// State a retried job lands in.
fn retry_state(delay: Duration) -> JobState {
    if delay.is_zero() {
        JobState::Waiting
    } else {
        JobState::Delayed
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn register_queue(&self, queue: &QueueName) -> Result<()> {
        sqlx::query("INSERT INTO job_queue_name (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(queue.as_str())
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    #[instrument(skip(self, job), fields(subsystem = "db", component = "queue_store", op = "enqueue", queue = %job.queue))]
    async fn enqueue(&self, job: NewJob) -> Result<EnqueueOutcome> {
        self.register_queue(&job.queue).await?;

        for _ in 0..ENQUEUE_RACE_RETRIES {
            let job_id = new_v7();
            let now = Utc::now();

            // Conflicts only on the partial index, i.e. an in-flight job with
            // the same (queue, dedup_key).
            let inserted = sqlx::query_scalar::<_, Uuid>(
                "INSERT INTO job (id, queue, payload, state, priority, attempts, max_attempts,
                                  dedup_key, created_at, available_at)
                 VALUES ($1, $2, $3, 'waiting', $4, 0, $5, $6, $7, $7)
                 ON CONFLICT (queue, dedup_key)
                     WHERE dedup_key IS NOT NULL AND state IN ('waiting', 'active', 'delayed')
                 DO NOTHING
                 RETURNING id",
            )
            .bind(job_id)
            .bind(job.queue.as_str())
            .bind(&job.payload)
            .bind(job.priority.rank())
            .bind(job.max_attempts)
            .bind(&job.dedup_key)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

            if let Some(job_id) = inserted {
                return Ok(EnqueueOutcome {
                    job_id,
                    deduplicated: false,
                });
            }

            let Some(key) = job.dedup_key.as_deref() else {
                return Err(Error::Internal(
                    "insert without dedup key returned no row".to_string(),
                ));
            };
            if let Some(existing) = self.find_in_flight(&job.queue, key).await? {
                debug!(job_id = %existing, dedup_key = key, "Dedup hit, returning in-flight job");
                return Ok(EnqueueOutcome {
                    job_id: existing,
                    deduplicated: true,
                });
            }
            // The conflicting job reached a terminal state in between; insert again.
        }

        Err(Error::Internal(format!(
            "could not resolve dedup race on queue {}",
            job.queue
        )))
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "queue_store", op = "lease"))]
    async fn lease(&self, queue: &QueueName, lease_duration: Duration) -> Result<Option<Job>> {
        let now = Utc::now();
        let query = format!(
            "UPDATE job
             SET state = 'active', attempts = attempts + 1,
                 started_at = COALESCE(started_at, $2),
                 lease_expires_at = $3, lease_token = $4
             WHERE id = (
                 SELECT id FROM job
                 WHERE queue = $1
                   AND state IN ('waiting', 'delayed')
                   AND available_at <= $2
                   AND attempts < max_attempts
                 ORDER BY priority DESC, created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(queue.as_str())
            .bind(now)
            .bind(time_after(now, lease_duration))
            .bind(Uuid::new_v4())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn complete(
        &self,
        job_id: Uuid,
        lease_token: Uuid,
        result: Option<JsonValue>,
    ) -> Result<()> {
        let done = sqlx::query(
            "UPDATE job
             SET state = 'completed', result = $3, finished_at = $4,
                 lease_expires_at = NULL, lease_token = NULL
             WHERE id = $1 AND lease_token = $2 AND state = 'active'",
        )
        .bind(job_id)
        .bind(lease_token)
        .bind(&result)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        if done.rows_affected() == 0 {
            return Err(Error::LeaseLost(job_id));
        }
        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        lease_token: Uuid,
        error: &str,
        retry: Option<Duration>,
    ) -> Result<JobState> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let row: Option<(i32, i32)> = sqlx::query_as(
            "SELECT attempts, max_attempts FROM job
             WHERE id = $1 AND lease_token = $2 AND state = 'active'
             FOR UPDATE",
        )
        .bind(job_id)
        .bind(lease_token)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?;

        let Some((attempts, max_attempts)) = row else {
            return Err(Error::LeaseLost(job_id));
        };

        let next = match retry {
            Some(delay) if attempts < max_attempts => {
                sqlx::query(
                    "UPDATE job
                     SET state = $2, available_at = $3, last_error = $4,
                         lease_expires_at = NULL, lease_token = NULL
                     WHERE id = $1",
                )
                .bind(job_id)
                .bind(retry_state(delay).as_str())
                .bind(time_after(now, delay))
                .bind(error)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
                retry_state(delay)
            }
            _ => {
                sqlx::query(
                    "UPDATE job
                     SET state = 'failed', finished_at = $2, last_error = $3,
                         lease_expires_at = NULL, lease_token = NULL
                     WHERE id = $1",
                )
                .bind(job_id)
                .bind(now)
                .bind(error)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
                JobState::Failed
            }
        };

        tx.commit().await.map_err(classify)?;
        Ok(next)
    }

    #[instrument(skip(self, backoff), fields(subsystem = "db", component = "queue_store", op = "reclaim"))]
    async fn reclaim_expired(
        &self,
        queue: &QueueName,
        backoff: &RetryPolicy,
    ) -> Result<ReclaimReport> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let expired: Vec<(Uuid, i32, i32)> = sqlx::query_as(
            "SELECT id, attempts, max_attempts FROM job
             WHERE queue = $1 AND state = 'active' AND lease_expires_at < $2
             FOR UPDATE SKIP LOCKED",
        )
        .bind(queue.as_str())
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(classify)?;

        let mut report = ReclaimReport::default();
        for (job_id, attempts, max_attempts) in expired {
            if attempts < max_attempts {
                let delay = backoff.delay_for(attempts);
                sqlx::query(
                    "UPDATE job
                     SET state = $2, available_at = $3, last_error = 'lease expired',
                         lease_expires_at = NULL, lease_token = NULL
                     WHERE id = $1",
                )
                .bind(job_id)
                .bind(retry_state(delay).as_str())
                .bind(time_after(now, delay))
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
                report.requeued.push(job_id);
            } else {
                let query = format!(
                    "UPDATE job
                     SET state = 'failed', finished_at = $2,
                         last_error = 'lease expired after final attempt',
                         lease_expires_at = NULL, lease_token = NULL
                     WHERE id = $1
                     RETURNING {JOB_COLUMNS}"
                );
                let row = sqlx::query(&query)
                    .bind(job_id)
                    .bind(now)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(classify)?;
                report.dead_lettered.push(Self::parse_job_row(row)?);
            }
        }

        tx.commit().await.map_err(classify)?;

        if !report.is_empty() {
            warn!(
                requeued = report.requeued.len(),
                dead_lettered = report.dead_lettered.len(),
                "Reclaimed expired leases"
            );
        }
        Ok(report)
    }

    async fn get(&self, queue: &QueueName, job_id: Uuid) -> Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM job WHERE id = $1 AND queue = $2");
        let row = sqlx::query(&query)
            .bind(job_id)
            .bind(queue.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn counts(&self, queue: &QueueName) -> Result<Option<QueueCounts>> {
        let registered: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM job_queue_name WHERE name = $1)")
                .bind(queue.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(classify)?;
        if !registered {
            return Ok(None);
        }

        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM job WHERE queue = $1 GROUP BY state")
                .bind(queue.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(classify)?;

        let (mut waiting, mut active, mut delayed, mut completed, mut failed) = (0, 0, 0, 0, 0);
        for (state, count) in rows {
            match state.parse::<JobState>()? {
                JobState::Waiting => waiting = count,
                JobState::Active => active = count,
                JobState::Delayed => delayed = count,
                JobState::Completed => completed = count,
                JobState::Failed => failed = count,
            }
        }
        Ok(Some(QueueCounts::from_states(
            waiting, active, delayed, completed, failed,
        )))
    }

    async fn list(
        &self,
        queue: &QueueName,
        state: Option<JobState>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM job
             WHERE queue = $1 AND ($2::text IS NULL OR state = $2)
             ORDER BY created_at DESC
             LIMIT $3"
        );
        let rows = sqlx::query(&query)
            .bind(queue.as_str())
            .bind(state.map(|s| s.as_str()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}
