//! End-to-end document pipeline tests: upload, submit, consume, enrich.
//!
//! Runs a real worker over the in-memory stores with the mock enrichment
//! backend, so no external tools or model server are needed. Only text
//! documents are exercised end to end; PDF and image paths need poppler and
//! tesseract on the host.

use std::sync::Arc;
use std::time::{Duration, Instant};

use docket_db::{MemoryBlobStore, MemoryDocumentRepository, MemoryQueueStore};
use docket_inference::mock::{MockEnrichmentBackend, MockFailure, MockOp};
use docket_jobs::{
    BlobStore, Document, DocumentPipeline, DocumentRepository, JobPriority, JobQueue, JobState,
    JobStatusView, NewDocument, OcrDispatcher, ProcessingStatus, QueueName, QueueOptions, RetryPolicy,
    WorkerConfig, WorkerHandle,
};
use tokio::time::sleep;

struct Harness {
    queue: JobQueue,
    pipeline: DocumentPipeline,
    documents: Arc<MemoryDocumentRepository>,
    blobs: Arc<MemoryBlobStore>,
    backend: MockEnrichmentBackend,
}

impl Harness {
    fn new(max_attempts: i32) -> Self {
        let queue = JobQueue::new(
            Arc::new(MemoryQueueStore::new()),
            QueueOptions::default().with_max_attempts(max_attempts),
        );
        let documents = Arc::new(MemoryDocumentRepository::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let backend = MockEnrichmentBackend::new();
        let pipeline = DocumentPipeline::new(
            queue.clone(),
            documents.clone(),
            blobs.clone(),
            Arc::new(OcrDispatcher::with_default_adapters()),
            Arc::new(backend.clone()),
        );
        Self {
            queue,
            pipeline,
            documents,
            blobs,
            backend,
        }
    }

    fn start(&self) -> WorkerHandle {
        let config = WorkerConfig::default()
            .with_poll_interval(10)
            .with_concurrency(2)
            .with_retry(RetryPolicy::new(
                Duration::from_millis(5),
                Duration::from_millis(20),
            ));
        self.queue
            .consume_with_config(Arc::new(self.pipeline.clone()), config)
    }

    /// Store the bytes and create a `PENDING` row, as the upload handler does.
    async fn upload(&self, file_name: &str, file_type: &str, data: &[u8]) -> i64 {
        let storage_path = format!("cases/1/{}", file_name);
        self.blobs.write(&storage_path, data).await.unwrap();
        self.documents
            .insert(NewDocument {
                case_id: Some(1),
                file_name: file_name.to_string(),
                storage_path,
                file_type: file_type.to_string(),
            })
            .await
            .unwrap()
    }

    async fn wait_for_status(&self, id: i64, status: ProcessingStatus) -> Document {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let doc = self.documents.get(id).await.unwrap().unwrap();
            if doc.processing_status == status {
                return doc;
            }
            assert!(
                Instant::now() < deadline,
                "document {} stuck in {} waiting for {}",
                id,
                doc.processing_status,
                status
            );
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// The document row is written before the job is acknowledged, so wait
    /// for the job itself to settle.
    async fn wait_for_job(&self, job_id: uuid::Uuid) -> JobStatusView {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let status = self
                .queue
                .get_status(&QueueName::DOCUMENT_PROCESSING, job_id)
                .await
                .unwrap();
            if status.state.is_terminal() {
                return status;
            }
            assert!(Instant::now() < deadline, "job {} never settled", job_id);
            sleep(Duration::from_millis(10)).await;
        }
    }
}

#[tokio::test]
async fn test_supported_document_reaches_processed() {
    let h = Harness::new(3);
    let worker = h.start();
    assert!(h.pipeline.dispatcher().supported_types().contains(&"text/plain"));

    let id = h
        .upload(
            "claim.txt",
            "text/plain",
            b"On 2022-01-15 the claimant filed suit. A hearing followed on 2022-03-02.",
        )
        .await;
    let outcome = h.pipeline.submit(id, JobPriority::Medium).await.unwrap();

    let doc = h.wait_for_status(id, ProcessingStatus::Processed).await;
    assert!(doc.has_extracted_text());
    assert!(doc.summary.as_deref().is_some_and(|s| !s.is_empty()));
    assert!(doc.timeline.as_ref().is_some_and(|t| !t.is_empty()));
    assert!(doc.translation_en.as_deref().is_some_and(|s| !s.is_empty()));
    assert!(doc.translation_ar.as_deref().is_some_and(|s| !s.is_empty()));
    assert!(doc.last_error.is_none());

    let status = h.wait_for_job(outcome.job_id).await;
    assert_eq!(status.state, JobState::Completed);
    let result = status.result.unwrap();
    assert_eq!(result["document_id"], id);
    assert_eq!(result["timeline_events"], 1);

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_video_fails_without_retry() {
    let h = Harness::new(3);
    let worker = h.start();

    let id = h
        .upload("deposition.mp4", "video/mp4", b"\x00\x00\x00\x18ftypmp42")
        .await;
    let outcome = h.pipeline.submit(id, JobPriority::Medium).await.unwrap();

    let doc = h.wait_for_status(id, ProcessingStatus::Failed).await;
    assert!(doc.last_error.unwrap().contains("video/mp4"));

    let status = h.wait_for_job(outcome.job_id).await;
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.attempts, 1);
    assert_eq!(h.backend.total_calls(), 0);

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_same_document_submitted_twice_shares_job() {
    let h = Harness::new(3);
    let mut id = 0;
    for n in 1..=7 {
        id = h
            .upload(&format!("doc-{}.txt", n), "text/plain", b"text")
            .await;
    }
    assert_eq!(id, 7);

    let first = h.pipeline.submit(7, JobPriority::Medium).await.unwrap();
    let second = h.pipeline.submit(7, JobPriority::High).await.unwrap();
    assert_eq!(first.job_id, second.job_id);
}

#[tokio::test]
async fn test_partial_enrichment_retries_only_missing_aspect() {
    let h = Harness::new(3);
    h.backend
        .fail_next(MockOp::ExtractTimeline, 1, MockFailure::Timeout);
    let worker = h.start();

    let id = h.upload("order.txt", "text/plain", b"Order dated 2021-06-30.").await;
    let outcome = h.pipeline.submit(id, JobPriority::High).await.unwrap();

    let doc = h.wait_for_status(id, ProcessingStatus::Processed).await;
    assert!(doc.timeline.is_some());

    // Summary and translations were produced once; only the timeline ran twice.
    assert_eq!(h.backend.call_count(MockOp::Summarize), 1);
    assert_eq!(h.backend.call_count(MockOp::Translate), 2);
    assert_eq!(h.backend.call_count(MockOp::ExtractTimeline), 2);

    let status = h.wait_for_job(outcome.job_id).await;
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.attempts, 2);

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_retries_then_explicit_resubmit() {
    let h = Harness::new(2);
    h.backend
        .fail_always(MockOp::Summarize, MockFailure::RateLimited);
    let worker = h.start();

    let id = h.upload("brief.txt", "text/plain", b"Brief in support.").await;
    let first = h.pipeline.submit(id, JobPriority::Medium).await.unwrap();

    let failed = h.wait_for_status(id, ProcessingStatus::Failed).await;
    assert!(failed.last_error.unwrap().contains("summary"));
    // Successful aspects from the failed attempts are kept.
    assert!(failed.translation_en.is_some());
    assert_eq!(h.backend.call_count(MockOp::Summarize), 2);

    // Nothing brings the document back on its own.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        h.documents.get(id).await.unwrap().unwrap().processing_status,
        ProcessingStatus::Failed
    );

    h.backend.clear_failures();
    let second = h.pipeline.resubmit(id).await.unwrap();
    assert_ne!(first.job_id, second.job_id);

    let doc = h.wait_for_status(id, ProcessingStatus::Processed).await;
    assert!(doc.summary.is_some());
    assert_eq!(h.backend.call_count(MockOp::Translate), 2);

    worker.shutdown().await.unwrap();
}
