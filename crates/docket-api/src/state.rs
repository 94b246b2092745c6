//! Shared application state.

use std::sync::Arc;

use docket_core::{BlobStore, DocumentRepository, EnrichmentBackend};
use docket_jobs::{
    AiAnalysisOrchestrator, DocumentPipeline, JobQueue, OcrDispatcher, UserRequestOrchestrator,
};

/// Everything a request handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub queue: JobQueue,
    pub pipeline: DocumentPipeline,
    pub user_requests: UserRequestOrchestrator,
    pub ai_analysis: AiAnalysisOrchestrator,
}

impl AppState {
    /// Wire the orchestrators over one queue engine.
    pub fn new(
        queue: JobQueue,
        documents: Arc<dyn DocumentRepository>,
        blobs: Arc<dyn BlobStore>,
        dispatcher: Arc<OcrDispatcher>,
        enrichment: Arc<dyn EnrichmentBackend>,
    ) -> Self {
        let pipeline = DocumentPipeline::new(
            queue.clone(),
            documents,
            blobs,
            dispatcher,
            enrichment.clone(),
        );
        Self {
            user_requests: UserRequestOrchestrator::new(queue.clone(), enrichment.clone()),
            ai_analysis: AiAnalysisOrchestrator::new(queue.clone(), enrichment),
            pipeline,
            queue,
        }
    }
}
