//! In-process backends.
//!
//! Same contracts as the PostgreSQL backends, with a single `tokio` mutex per
//! store providing the atomicity the database gets from row locks. Used for
//! single-node deployments without `DATABASE_URL` and throughout the tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use docket_core::{
    new_v7, BlobStore, Document, DocumentRepository, DocumentUpdate, EnqueueOutcome, Error, Job,
    JobState, NewDocument, NewJob, ProcessingStatus, QueueCounts, QueueName, QueueStore,
    ReclaimReport, Result, RetryPolicy,
};

use crate::time_after;

// =============================================================================
// QUEUE STORE
// =============================================================================

struct Entry {
    job: Job,
    /// Insertion order; breaks created_at ties for FIFO.
    seq: u64,
}

#[derive(Default)]
struct QueueTable {
    jobs: HashMap<Uuid, Entry>,
    registered: HashSet<QueueName>,
    next_seq: u64,
}

impl QueueTable {
    fn in_flight_with_key(&self, queue: &QueueName, key: &str) -> Option<Uuid> {
        self.jobs.values().find_map(|e| {
            let j = &e.job;
            (j.queue == *queue && j.state.is_in_flight() && j.dedup_key.as_deref() == Some(key))
                .then_some(j.id)
        })
    }

    fn leased_mut(&mut self, job_id: Uuid, lease_token: Uuid) -> Result<&mut Job> {
        match self.jobs.get_mut(&job_id) {
            Some(e) if e.job.state == JobState::Active && e.job.lease_token == Some(lease_token) => {
                Ok(&mut e.job)
            }
            _ => Err(Error::LeaseLost(job_id)),
        }
    }
}

/// Park a leased job for another attempt after `delay`.
fn requeue(job: &mut Job, delay: Duration, error: &str) -> JobState {
    let now = Utc::now();
    job.state = if delay.is_zero() {
        JobState::Waiting
    } else {
        JobState::Delayed
    };
    job.available_at = time_after(now, delay);
    job.last_error = Some(error.to_string());
    job.lease_expires_at = None;
    job.lease_token = None;
    job.state
}

fn dead_letter(job: &mut Job, error: &str) {
    job.state = JobState::Failed;
    job.finished_at = Some(Utc::now());
    job.last_error = Some(error.to_string());
    job.lease_expires_at = None;
    job.lease_token = None;
}

/// In-memory implementation of [`QueueStore`].
pub struct MemoryQueueStore {
    table: Mutex<QueueTable>,
    reachable: AtomicBool,
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(QueueTable::default()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Simulate the backing service going away (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::QueueUnavailable(
                "memory queue store is unreachable".to_string(),
            ))
        }
    }

    /// Total jobs stored for a queue, regardless of state.
    pub async fn job_count(&self, queue: &QueueName) -> usize {
        let table = self.table.lock().await;
        table.jobs.values().filter(|e| e.job.queue == *queue).count()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn register_queue(&self, queue: &QueueName) -> Result<()> {
        self.check_reachable()?;
        self.table.lock().await.registered.insert(queue.clone());
        Ok(())
    }

    async fn enqueue(&self, new: NewJob) -> Result<EnqueueOutcome> {
        self.check_reachable()?;
        let mut table = self.table.lock().await;
        table.registered.insert(new.queue.clone());

        if let Some(key) = new.dedup_key.as_deref() {
            if let Some(existing) = table.in_flight_with_key(&new.queue, key) {
                debug!(queue = %new.queue, job_id = %existing, dedup_key = key, "Dedup hit, returning in-flight job");
                return Ok(EnqueueOutcome {
                    job_id: existing,
                    deduplicated: true,
                });
            }
        }

        let now = Utc::now();
        let job = Job {
            id: new_v7(),
            queue: new.queue,
            payload: new.payload,
            state: JobState::Waiting,
            priority: new.priority,
            attempts: 0,
            max_attempts: new.max_attempts,
            dedup_key: new.dedup_key,
            result: None,
            last_error: None,
            created_at: now,
            available_at: now,
            started_at: None,
            finished_at: None,
            lease_expires_at: None,
            lease_token: None,
        };
        let job_id = job.id;
        let seq = table.next_seq;
        table.next_seq += 1;
        table.jobs.insert(job_id, Entry { job, seq });

        Ok(EnqueueOutcome {
            job_id,
            deduplicated: false,
        })
    }

    async fn lease(&self, queue: &QueueName, lease_duration: Duration) -> Result<Option<Job>> {
        self.check_reachable()?;
        let now = Utc::now();
        let mut table = self.table.lock().await;

        let next = table
            .jobs
            .values()
            .filter(|e| {
                let j = &e.job;
                j.queue == *queue
                    && matches!(j.state, JobState::Waiting | JobState::Delayed)
                    && j.available_at <= now
                    && j.attempts < j.max_attempts
            })
            .min_by_key(|e| (std::cmp::Reverse(e.job.priority), e.seq))
            .map(|e| e.job.id);

        let Some(job_id) = next else {
            return Ok(None);
        };
        let Some(entry) = table.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        let job = &mut entry.job;
        job.state = JobState::Active;
        job.attempts += 1;
        job.started_at.get_or_insert(now);
        job.lease_expires_at = Some(time_after(now, lease_duration));
        job.lease_token = Some(Uuid::new_v4());
        Ok(Some(job.clone()))
    }

    async fn complete(
        &self,
        job_id: Uuid,
        lease_token: Uuid,
        result: Option<JsonValue>,
    ) -> Result<()> {
        self.check_reachable()?;
        let mut table = self.table.lock().await;
        let job = table.leased_mut(job_id, lease_token)?;
        job.state = JobState::Completed;
        job.result = result;
        job.finished_at = Some(Utc::now());
        job.lease_expires_at = None;
        job.lease_token = None;
        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        lease_token: Uuid,
        error: &str,
        retry: Option<Duration>,
    ) -> Result<JobState> {
        self.check_reachable()?;
        let mut table = self.table.lock().await;
        let job = table.leased_mut(job_id, lease_token)?;
        match retry {
            Some(delay) if job.attempts < job.max_attempts => Ok(requeue(job, delay, error)),
            _ => {
                dead_letter(job, error);
                Ok(JobState::Failed)
            }
        }
    }

    async fn reclaim_expired(
        &self,
        queue: &QueueName,
        backoff: &RetryPolicy,
    ) -> Result<ReclaimReport> {
        self.check_reachable()?;
        let now = Utc::now();
        let mut table = self.table.lock().await;
        let mut report = ReclaimReport::default();

        for entry in table.jobs.values_mut() {
            let job = &mut entry.job;
            let expired = job.queue == *queue
                && job.state == JobState::Active
                && job.lease_expires_at.is_some_and(|t| t <= now);
            if !expired {
                continue;
            }
            if job.attempts < job.max_attempts {
                requeue(job, backoff.delay_for(job.attempts), "lease expired");
                report.requeued.push(job.id);
            } else {
                dead_letter(job, "lease expired after final attempt");
                report.dead_lettered.push(job.clone());
            }
        }

        if !report.is_empty() {
            warn!(
                queue = %queue,
                requeued = report.requeued.len(),
                dead_lettered = report.dead_lettered.len(),
                "Reclaimed expired leases"
            );
        }
        Ok(report)
    }

    async fn get(&self, queue: &QueueName, job_id: Uuid) -> Result<Option<Job>> {
        self.check_reachable()?;
        let table = self.table.lock().await;
        Ok(table
            .jobs
            .get(&job_id)
            .filter(|e| e.job.queue == *queue)
            .map(|e| e.job.clone()))
    }

    async fn counts(&self, queue: &QueueName) -> Result<Option<QueueCounts>> {
        self.check_reachable()?;
        let table = self.table.lock().await;
        if !table.registered.contains(queue) {
            return Ok(None);
        }
        let (mut waiting, mut active, mut delayed, mut completed, mut failed) = (0, 0, 0, 0, 0);
        for e in table.jobs.values().filter(|e| e.job.queue == *queue) {
            match e.job.state {
                JobState::Waiting => waiting += 1,
                JobState::Active => active += 1,
                JobState::Delayed => delayed += 1,
                JobState::Completed => completed += 1,
                JobState::Failed => failed += 1,
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
        self.check_reachable()?;
        let table = self.table.lock().await;
        let mut entries: Vec<&Entry> = table
            .jobs
            .values()
            .filter(|e| e.job.queue == *queue && state.map_or(true, |s| e.job.state == s))
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.seq));
        Ok(entries
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|e| e.job.clone())
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }
}

// =============================================================================
// DOCUMENTS
// =============================================================================

/// In-memory implementation of [`DocumentRepository`].
#[derive(Default)]
pub struct MemoryDocumentRepository {
    docs: Mutex<HashMap<i64, Document>>,
    next_id: AtomicI64,
}

impl MemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentRepository for MemoryDocumentRepository {
    async fn insert(&self, doc: NewDocument) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let document = Document {
            id,
            case_id: doc.case_id,
            file_name: doc.file_name,
            storage_path: doc.storage_path,
            file_type: doc.file_type,
            processing_status: ProcessingStatus::Pending,
            extracted_text: None,
            summary: None,
            timeline: None,
            translation_en: None,
            translation_ar: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.docs.lock().await.insert(id, document);
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<Document>> {
        Ok(self.docs.lock().await.get(&id).cloned())
    }

    async fn update(&self, id: i64, update: DocumentUpdate) -> Result<()> {
        let mut docs = self.docs.lock().await;
        let doc = docs.get_mut(&id).ok_or(Error::DocumentNotFound(id))?;

        if let Some(status) = update.processing_status {
            doc.processing_status = status;
        }
        if let Some(text) = update.extracted_text {
            doc.extracted_text = Some(text);
        }
        if let Some(summary) = update.summary {
            doc.summary = Some(summary);
        }
        if let Some(timeline) = update.timeline {
            doc.timeline = Some(timeline);
        }
        if let Some(en) = update.translation_en {
            doc.translation_en = Some(en);
        }
        if let Some(ar) = update.translation_ar {
            doc.translation_ar = Some(ar);
        }
        if let Some(last_error) = update.last_error {
            doc.last_error = last_error;
        }
        doc.updated_at = Utc::now();
        Ok(())
    }
}

// =============================================================================
// BLOBS
// =============================================================================

/// In-memory implementation of [`BlobStore`].
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, storage_path: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .await
            .get(storage_path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("blob {}", storage_path)))
    }

    async fn write(&self, storage_path: &str, data: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .await
            .insert(storage_path.to_string(), data.to_vec());
        Ok(())
    }

    async fn exists(&self, storage_path: &str) -> Result<bool> {
        Ok(self.blobs.lock().await.contains_key(storage_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::JobPriority;
    use serde_json::json;

    fn new_job(queue: QueueName, priority: JobPriority, dedup: Option<&str>) -> NewJob {
        NewJob {
            queue,
            payload: json!({}),
            priority,
            max_attempts: 3,
            dedup_key: dedup.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_lease_orders_by_priority_then_fifo() {
        let store = MemoryQueueStore::new();
        let q = QueueName::USER_REQUESTS;
        let low = store.enqueue(new_job(q.clone(), JobPriority::Low, None)).await.unwrap();
        let med1 = store.enqueue(new_job(q.clone(), JobPriority::Medium, None)).await.unwrap();
        let high = store.enqueue(new_job(q.clone(), JobPriority::High, None)).await.unwrap();
        let med2 = store.enqueue(new_job(q.clone(), JobPriority::Medium, None)).await.unwrap();

        let lease = Duration::from_secs(60);
        let mut order = Vec::new();
        while let Some(job) = store.lease(&q, lease).await.unwrap() {
            order.push(job.id);
        }
        assert_eq!(order, vec![high.job_id, med1.job_id, med2.job_id, low.job_id]);
    }

    #[tokio::test]
    async fn test_dedup_returns_in_flight_job() {
        let store = MemoryQueueStore::new();
        let q = QueueName::DOCUMENT_PROCESSING;
        let first = store.enqueue(new_job(q.clone(), JobPriority::Medium, Some("7"))).await.unwrap();
        let second = store.enqueue(new_job(q.clone(), JobPriority::Medium, Some("7"))).await.unwrap();
        assert_eq!(first.job_id, second.job_id);
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(store.job_count(&q).await, 1);

        // Same key on another queue is independent.
        let other = store
            .enqueue(new_job(QueueName::AI_ANALYSIS, JobPriority::Medium, Some("7")))
            .await
            .unwrap();
        assert_ne!(other.job_id, first.job_id);
    }

    #[tokio::test]
    async fn test_dedup_released_after_terminal_state() {
        let store = MemoryQueueStore::new();
        let q = QueueName::DOCUMENT_PROCESSING;
        let first = store.enqueue(new_job(q.clone(), JobPriority::Medium, Some("9"))).await.unwrap();
        let job = store.lease(&q, Duration::from_secs(60)).await.unwrap().unwrap();
        store
            .complete(job.id, job.lease_token.unwrap(), None)
            .await
            .unwrap();

        let again = store.enqueue(new_job(q.clone(), JobPriority::Medium, Some("9"))).await.unwrap();
        assert_ne!(again.job_id, first.job_id);
        assert!(!again.deduplicated);
    }

    #[tokio::test]
    async fn test_stale_lease_token_is_rejected() {
        let store = MemoryQueueStore::new();
        let q = QueueName::AI_ANALYSIS;
        store.enqueue(new_job(q.clone(), JobPriority::Medium, None)).await.unwrap();
        let job = store.lease(&q, Duration::from_secs(60)).await.unwrap().unwrap();

        let err = store.complete(job.id, Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, Error::LeaseLost(id) if id == job.id));
        let err = store
            .fail(job.id, Uuid::new_v4(), "boom", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LeaseLost(_)));
    }

    #[tokio::test]
    async fn test_fail_with_retry_then_dead_letter() {
        let store = MemoryQueueStore::new();
        let q = QueueName::USER_REQUESTS;
        let mut nj = new_job(q.clone(), JobPriority::Medium, None);
        nj.max_attempts = 2;
        let id = store.enqueue(nj).await.unwrap().job_id;
        let lease = Duration::from_secs(60);

        let job = store.lease(&q, lease).await.unwrap().unwrap();
        let state = store
            .fail(job.id, job.lease_token.unwrap(), "transient", Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(state, JobState::Waiting);

        let job = store.lease(&q, lease).await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        let state = store
            .fail(job.id, job.lease_token.unwrap(), "transient", Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(state, JobState::Failed);

        let stored = store.get(&q, id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.attempts, 2);
        assert!(store.lease(&q, lease).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delayed_job_not_leased_early() {
        let store = MemoryQueueStore::new();
        let q = QueueName::USER_REQUESTS;
        store.enqueue(new_job(q.clone(), JobPriority::Medium, None)).await.unwrap();
        let job = store.lease(&q, Duration::from_secs(60)).await.unwrap().unwrap();
        let state = store
            .fail(job.id, job.lease_token.unwrap(), "later", Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(state, JobState::Delayed);
        assert!(store.lease(&q, Duration::from_secs(60)).await.unwrap().is_none());

        let counts = store.counts(&q).await.unwrap().unwrap();
        assert_eq!(counts.delayed, 1);
        assert_eq!(counts.total, 1);
    }

    #[tokio::test]
    async fn test_reclaim_expired_leases() {
        let store = MemoryQueueStore::new();
        let q = QueueName::AI_ANALYSIS;
        let mut nj = new_job(q.clone(), JobPriority::Medium, None);
        nj.max_attempts = 2;
        store.enqueue(nj).await.unwrap();
        let policy = RetryPolicy::new(Duration::ZERO, Duration::ZERO);

        let first = store.lease(&q, Duration::ZERO).await.unwrap().unwrap();
        let report = store.reclaim_expired(&q, &policy).await.unwrap();
        assert_eq!(report.requeued, vec![first.id]);
        assert!(report.dead_lettered.is_empty());

        // The stale holder can no longer complete.
        assert!(store
            .complete(first.id, first.lease_token.unwrap(), None)
            .await
            .is_err());

        let second = store.lease(&q, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(second.attempts, 2);
        let report = store.reclaim_expired(&q, &policy).await.unwrap();
        assert!(report.requeued.is_empty());
        assert_eq!(report.dead_lettered.len(), 1);
        assert_eq!(report.dead_lettered[0].state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_counts_unregistered_queue_is_none() {
        let store = MemoryQueueStore::new();
        let q = QueueName::new("exports").unwrap();
        assert!(store.counts(&q).await.unwrap().is_none());
        store.register_queue(&q).await.unwrap();
        assert_eq!(store.counts(&q).await.unwrap(), Some(QueueCounts::default()));
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_fast() {
        let store = MemoryQueueStore::new();
        store.set_reachable(false);
        let err = store
            .enqueue(new_job(QueueName::USER_REQUESTS, JobPriority::Medium, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueueUnavailable(_)));
        assert!(store.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_list_newest_first_with_state_filter() {
        let store = MemoryQueueStore::new();
        let q = QueueName::USER_REQUESTS;
        let a = store.enqueue(new_job(q.clone(), JobPriority::Medium, None)).await.unwrap();
        let b = store.enqueue(new_job(q.clone(), JobPriority::Medium, None)).await.unwrap();

        let all = store.list(&q, None, 10).await.unwrap();
        assert_eq!(
            all.iter().map(|j| j.id).collect::<Vec<_>>(),
            vec![b.job_id, a.job_id]
        );
        assert!(store
            .list(&q, Some(JobState::Completed), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_document_partial_update() {
        let repo = MemoryDocumentRepository::new();
        let id = repo
            .insert(NewDocument {
                case_id: Some(1),
                file_name: "a.txt".into(),
                storage_path: "a.txt".into(),
                file_type: "text/plain".into(),
            })
            .await
            .unwrap();

        repo.update(
            id,
            DocumentUpdate {
                summary: Some("short".into()),
                last_error: Some(Some("boom".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        repo.update(id, DocumentUpdate::default().with_last_error(None))
            .await
            .unwrap();

        let doc = repo.get(id).await.unwrap().unwrap();
        assert_eq!(doc.summary.as_deref(), Some("short"));
        assert_eq!(doc.processing_status, ProcessingStatus::Pending);
        assert!(doc.last_error.is_none());

        assert!(matches!(
            repo.update(999, DocumentUpdate::default()).await,
            Err(Error::DocumentNotFound(999))
        ));
    }
}
