//! AI-analysis orchestrator for the `ai-analysis` queue.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument};
use uuid::Uuid;

use docket_core::{
    AiAnalysisPayload, EnqueueOutcome, EnrichmentBackend, Error, JobStatusView, QueueName,
    Result, SubmitOptions,
};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::queue::JobQueue;
use crate::worker::WorkerHandle;

/// Runs analyses over caller-supplied content.
///
/// `summary` and `timeline` use the dedicated enrichment calls; every other
/// analysis type is passed through to the backend's generic analysis.
#[derive(Clone)]
pub struct AiAnalysisOrchestrator {
    queue: JobQueue,
    enrichment: Arc<dyn EnrichmentBackend>,
}

impl AiAnalysisOrchestrator {
    pub fn new(queue: JobQueue, enrichment: Arc<dyn EnrichmentBackend>) -> Self {
        Self { queue, enrichment }
    }

    /// Enqueue an analysis, deduplicated by `analysis_id`. Invalid analyses
    /// are accepted and fail when the job runs.
    #[instrument(skip(self, analysis), fields(subsystem = "jobs", component = "ai_analysis", op = "submit", analysis_id = %analysis.analysis_id))]
    pub async fn submit(&self, analysis: AiAnalysisPayload) -> Result<EnqueueOutcome> {
        let mut options = SubmitOptions::new();
        if !analysis.analysis_id.trim().is_empty() {
            options = options.with_dedup_key(analysis.analysis_id.clone());
        }
        let payload = serde_json::to_value(&analysis)?;
        self.queue
            .submit(&QueueName::AI_ANALYSIS, payload, options)
            .await
    }

    pub async fn status(&self, job_id: Uuid) -> Result<JobStatusView> {
        self.queue.get_status(&QueueName::AI_ANALYSIS, job_id).await
    }

    pub fn consume(&self, concurrency: usize) -> WorkerHandle {
        self.queue.consume(Arc::new(self.clone()), concurrency)
    }

    async fn run(&self, analysis: &AiAnalysisPayload) -> Result<JsonValue> {
        if analysis.analysis_id.trim().is_empty() {
            return Err(Error::InvalidInput("analysis_id must not be empty".to_string()));
        }
        if analysis.analysis_type.trim().is_empty() {
            return Err(Error::InvalidInput("analysis_type must not be empty".to_string()));
        }
        if analysis.content.trim().is_empty() {
            return Err(Error::InvalidInput("content is required".to_string()));
        }

        let output = match analysis.analysis_type.as_str() {
            "summary" => JsonValue::String(self.enrichment.summarize(&analysis.content).await?),
            "timeline" => {
                serde_json::to_value(self.enrichment.extract_timeline(&analysis.content).await?)?
            }
            other => JsonValue::String(
                self.enrichment
                    .analyze(&analysis.content, other, &analysis.context)
                    .await?,
            ),
        };

        Ok(json!({
            "analysis_id": analysis.analysis_id,
            "type": analysis.analysis_type,
            "output": output,
            "model": self.enrichment.model_name(),
            "completed_at": Utc::now(),
        }))
    }
}

#[async_trait]
impl JobHandler for AiAnalysisOrchestrator {
    fn queue(&self) -> QueueName {
        QueueName::AI_ANALYSIS
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "ai_analysis", job_id = %ctx.job_id()))]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let analysis: AiAnalysisPayload = match ctx.parse_payload() {
            Ok(a) => a,
            Err(e) => return JobResult::Failed(e),
        };

        match self.run(&analysis).await {
            Ok(result) => {
                info!(
                    analysis_id = %analysis.analysis_id,
                    document_id = analysis.document_id,
                    analysis_type = %analysis.analysis_type,
                    "Analysis completed"
                );
                JobResult::Success(Some(result))
            }
            Err(e) => JobResult::from_error(&e),
        }
    }
}
