//! Document pipeline: drives an uploaded document from `PENDING` through
//! text extraction and AI enrichment to `PROCESSED` or `FAILED`.
//!
//! One `document-processing` job carries one document id. The job system's
//! dedup key (the document id) keeps at most one job in flight per document,
//! so the document row is only ever written by the worker holding that lease.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use docket_core::{
    BlobStore, Document, DocumentJobPayload, DocumentRepository, DocumentUpdate, EnqueueOutcome,
    EnrichmentAspect, EnrichmentBackend, Error, Job, JobPriority, Language, ProcessingStatus,
    QueueName, Result, SubmitOptions,
};

use crate::extraction::OcrDispatcher;
use crate::handler::{JobContext, JobHandler, JobResult};
use crate::queue::JobQueue;
use crate::worker::WorkerHandle;

/// Orchestrates extraction and enrichment for stored documents.
#[derive(Clone)]
pub struct DocumentPipeline {
    queue: JobQueue,
    documents: Arc<dyn DocumentRepository>,
    blobs: Arc<dyn BlobStore>,
    dispatcher: Arc<OcrDispatcher>,
    enrichment: Arc<dyn EnrichmentBackend>,
}

impl DocumentPipeline {
    pub fn new(
        queue: JobQueue,
        documents: Arc<dyn DocumentRepository>,
        blobs: Arc<dyn BlobStore>,
        dispatcher: Arc<OcrDispatcher>,
        enrichment: Arc<dyn EnrichmentBackend>,
    ) -> Self {
        Self {
            queue,
            documents,
            blobs,
            dispatcher,
            enrichment,
        }
    }

    pub fn dispatcher(&self) -> &OcrDispatcher {
        &self.dispatcher
    }

    /// Enqueue processing for an uploaded document.
    ///
    /// Submitting while a job for the document is still in flight returns
    /// that job's id. The document is not looked up here; an unknown id
    /// fails when the job runs.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "pipeline", op = "submit"))]
    pub async fn submit(&self, document_id: i64, priority: JobPriority) -> Result<EnqueueOutcome> {
        self.enqueue(document_id, priority).await
    }

    /// Explicit re-submission.
    ///
    /// A `FAILED` document is reset to `PENDING` with its error cleared before
    /// a new job is created. `PENDING` and `PROCESSING` documents get their
    /// in-flight job back. `PROCESSED` documents are rejected.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "pipeline", op = "resubmit"))]
    pub async fn resubmit(&self, document_id: i64) -> Result<EnqueueOutcome> {
        let doc = self.load(document_id).await?;
        match doc.processing_status {
            ProcessingStatus::Processed => Err(Error::InvalidState(format!(
                "Document {} is already PROCESSED",
                document_id
            ))),
            ProcessingStatus::Failed => {
                info!(document_id, "Resetting failed document for re-processing");
                self.transition(
                    document_id,
                    doc.processing_status,
                    DocumentUpdate::status(ProcessingStatus::Pending).with_last_error(None),
                )
                .await?;
                self.enqueue(document_id, JobPriority::default()).await
            }
            ProcessingStatus::Pending | ProcessingStatus::Processing => {
                self.enqueue(document_id, JobPriority::default()).await
            }
        }
    }

    /// Start consuming `document-processing` jobs.
    pub fn consume(&self, concurrency: usize) -> WorkerHandle {
        self.queue.consume(Arc::new(self.clone()), concurrency)
    }

    async fn enqueue(&self, document_id: i64, priority: JobPriority) -> Result<EnqueueOutcome> {
        let job = DocumentJobPayload { document_id };
        self.queue
            .submit(
                &QueueName::DOCUMENT_PROCESSING,
                serde_json::to_value(job)?,
                SubmitOptions::new()
                    .with_priority(priority)
                    .with_dedup_key(job.dedup_key()),
            )
            .await
    }

    async fn load(&self, document_id: i64) -> Result<Document> {
        self.documents
            .get(document_id)
            .await?
            .ok_or(Error::DocumentNotFound(document_id))
    }

    /// Write an update whose status change, if any, must be a legal move
    /// from `from`.
    async fn transition(
        &self,
        document_id: i64,
        from: ProcessingStatus,
        update: DocumentUpdate,
    ) -> Result<()> {
        if let Some(next) = update.processing_status {
            if !from.can_transition_to(next) {
                return Err(Error::InvalidState(format!(
                    "Document {} cannot move from {} to {}",
                    document_id, from, next
                )));
            }
        }
        self.documents.update(document_id, update).await
    }

    /// Run one attempt for a document.
    async fn process(&self, document_id: i64) -> Result<JobResult> {
        let doc = match self.documents.get(document_id).await? {
            Some(doc) => doc,
            None => {
                return Ok(JobResult::Failed(
                    Error::DocumentNotFound(document_id).to_string(),
                ))
            }
        };

        match doc.processing_status {
            ProcessingStatus::Processed => {
                debug!(document_id, "Document already processed");
                return Ok(JobResult::Success(Some(json!({
                    "document_id": document_id,
                    "already_processed": true,
                }))));
            }
            ProcessingStatus::Failed => {
                return Ok(JobResult::Failed(format!(
                    "Document {} is FAILED and must be re-submitted",
                    document_id
                )));
            }
            ProcessingStatus::Pending | ProcessingStatus::Processing => {}
        }

        // Static file types never become supported on retry.
        if let Err(e) = self.dispatcher.strategy_for(&doc.file_type) {
            warn!(document_id, file_type = %doc.file_type, "Unsupported document type");
            let message = e.to_string();
            self.transition(
                document_id,
                doc.processing_status,
                DocumentUpdate::failed(&message),
            )
            .await?;
            return Ok(JobResult::Failed(message));
        }

        if doc.processing_status == ProcessingStatus::Pending {
            self.transition(
                document_id,
                ProcessingStatus::Pending,
                DocumentUpdate::status(ProcessingStatus::Processing),
            )
            .await?;
        }

        let text = match doc.extracted_text.clone().filter(|_| doc.has_extracted_text()) {
            Some(text) => {
                debug!(document_id, "Reusing extracted text from a previous attempt");
                text
            }
            None => self.extract(&doc).await?,
        };

        let missing = doc.missing_aspects();
        let outcomes = join_all(
            missing
                .iter()
                .map(|aspect| self.enrich(document_id, *aspect, &text)),
        )
        .await;

        let mut timeline_events = doc.timeline.as_ref().map_or(0, Vec::len);
        let mut enriched = Vec::new();
        let mut failures = Vec::new();
        for (aspect, outcome) in missing.iter().zip(outcomes) {
            match outcome {
                Ok(update) => {
                    if let Some(events) = &update.timeline {
                        timeline_events = events.len();
                    }
                    enriched.push(aspect.as_str());
                }
                Err(e) => {
                    warn!(document_id, %aspect, error = %e, "Enrichment aspect failed");
                    failures.push((*aspect, e));
                }
            }
        }

        if failures.is_empty() {
            self.transition(
                document_id,
                ProcessingStatus::Processing,
                DocumentUpdate::status(ProcessingStatus::Processed).with_last_error(None),
            )
            .await?;
            info!(document_id, enriched = enriched.len(), "Document processed");
            return Ok(JobResult::Success(Some(json!({
                "document_id": document_id,
                "text_length": text.chars().count(),
                "timeline_events": timeline_events,
                "enriched": enriched,
            }))));
        }

        let message = failures
            .iter()
            .map(|(aspect, e)| format!("{}: {}", aspect, e))
            .collect::<Vec<_>>()
            .join("; ");
        self.record_error(document_id, &message).await;

        if failures.iter().all(|(_, e)| e.is_retryable()) {
            Ok(JobResult::Retry(message))
        } else {
            Ok(JobResult::Failed(message))
        }
    }

    /// Read the stored bytes, extract text and persist it.
    ///
    /// Unreadable input counts as an extraction failure so the attempt is
    /// retried.
    async fn extract(&self, doc: &Document) -> Result<String> {
        let data = self.blobs.read(&doc.storage_path).await.map_err(|e| {
            Error::ExtractionFailed(format!("Cannot read {}: {}", doc.storage_path, e))
        })?;
        let result = self
            .dispatcher
            .extract(&data, &doc.file_name, &doc.file_type)
            .await?;
        let text = result.extracted_text.unwrap_or_default();

        self.documents
            .update(
                doc.id,
                DocumentUpdate {
                    extracted_text: Some(text.clone()),
                    ..Default::default()
                },
            )
            .await?;
        info!(document_id = doc.id, text_len = text.len(), "Extracted text persisted");
        Ok(text)
    }

    /// Produce one aspect and write it as its own partial update.
    async fn enrich(
        &self,
        document_id: i64,
        aspect: EnrichmentAspect,
        text: &str,
    ) -> Result<DocumentUpdate> {
        let update = match aspect {
            EnrichmentAspect::Summary => DocumentUpdate {
                summary: Some(non_empty(aspect, self.enrichment.summarize(text).await?)?),
                ..Default::default()
            },
            EnrichmentAspect::Timeline => {
                let mut events = self.enrichment.extract_timeline(text).await?;
                for event in &mut events {
                    if event.source_id.is_empty() {
                        event.source_id = document_id.to_string();
                    }
                }
                DocumentUpdate {
                    timeline: Some(events),
                    ..Default::default()
                }
            }
            EnrichmentAspect::TranslationEn => DocumentUpdate {
                translation_en: Some(non_empty(
                    aspect,
                    self.enrichment.translate(text, Language::English).await?,
                )?),
                ..Default::default()
            },
            EnrichmentAspect::TranslationAr => DocumentUpdate {
                translation_ar: Some(non_empty(
                    aspect,
                    self.enrichment.translate(text, Language::Arabic).await?,
                )?),
                ..Default::default()
            },
        };

        self.documents.update(document_id, update.clone()).await?;
        Ok(update)
    }

    async fn record_error(&self, document_id: i64, message: &str) {
        let update = DocumentUpdate::default().with_last_error(Some(message.to_string()));
        if let Err(e) = self.documents.update(document_id, update).await {
            warn!(document_id, error = %e, "Failed to record document error");
        }
    }
}

fn non_empty(aspect: EnrichmentAspect, output: String) -> Result<String> {
    if output.trim().is_empty() {
        Err(Error::InvalidResponse(format!("Model returned an empty {}", aspect)))
    } else {
        Ok(output)
    }
}

#[async_trait]
impl JobHandler for DocumentPipeline {
    fn queue(&self) -> QueueName {
        QueueName::DOCUMENT_PROCESSING
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "pipeline", job_id = %ctx.job_id(), attempt = ctx.attempt()))]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: DocumentJobPayload = match ctx.parse_payload() {
            Ok(p) => p,
            Err(e) => return JobResult::Failed(e),
        };
        let document_id = payload.document_id;

        match self.process(document_id).await {
            Ok(result) => result,
            Err(e) => {
                error!(document_id, error = %e, "Document processing attempt failed");
                self.record_error(document_id, &e.to_string()).await;
                match e {
                    // Store hiccups are transient from the job's point of view.
                    Error::Database(_) => JobResult::Retry(e.to_string()),
                    _ => JobResult::from_error(&e),
                }
            }
        }
    }

    async fn on_dead_letter(&self, job: &Job, error: &str) {
        let Ok(payload) = serde_json::from_value::<DocumentJobPayload>(job.payload.clone()) else {
            return;
        };
        let document_id = payload.document_id;

        match self.documents.get(document_id).await {
            Ok(Some(doc)) if doc.processing_status != ProcessingStatus::Processed => {
                if let Err(e) = self
                    .transition(
                        document_id,
                        doc.processing_status,
                        DocumentUpdate::failed(error),
                    )
                    .await
                {
                    error!(document_id, error = %e, "Failed to mark document FAILED");
                } else {
                    warn!(document_id, job_id = %job.id, error, "Document marked FAILED");
                }
            }
            Ok(_) => {}
            Err(e) => error!(document_id, error = %e, "Failed to load dead-lettered document"),
        }
    }
}
