//! User-request orchestrator: ad-hoc analytical requests on caller-supplied
//! content, consumed from the `user-requests` queue.
//!
//! Output is only ever returned through the job result; no document row is
//! touched.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument};
use uuid::Uuid;

use docket_core::{
    EnqueueOutcome, EnrichmentBackend, Error, JobStatusView, Language, QueueName, RequestType,
    Result, SubmitOptions, UserRequestPayload,
};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::queue::JobQueue;
use crate::worker::WorkerHandle;

#[derive(Clone)]
pub struct UserRequestOrchestrator {
    queue: JobQueue,
    enrichment: Arc<dyn EnrichmentBackend>,
}

impl UserRequestOrchestrator {
    pub fn new(queue: JobQueue, enrichment: Arc<dyn EnrichmentBackend>) -> Self {
        Self { queue, enrichment }
    }

    /// Enqueue a request. Resubmitting the same `request_id` while the first
    /// job is in flight returns that job.
    ///
    /// The payload is not validated here: a bad request still gets a job id
    /// and fails permanently when the job runs.
    #[instrument(skip(self, request), fields(subsystem = "jobs", component = "user_requests", op = "submit", request_id = %request.request_id))]
    pub async fn submit(&self, request: UserRequestPayload) -> Result<EnqueueOutcome> {
        let mut options = SubmitOptions::new().with_priority(request.priority);
        // A blank id cannot name an in-flight job, so it is not deduplicated.
        if !request.request_id.trim().is_empty() {
            options = options.with_dedup_key(request.request_id.clone());
        }
        let payload = serde_json::to_value(&request)?;
        self.queue
            .submit(&QueueName::USER_REQUESTS, payload, options)
            .await
    }

    pub async fn status(&self, job_id: Uuid) -> Result<JobStatusView> {
        self.queue.get_status(&QueueName::USER_REQUESTS, job_id).await
    }

    pub fn consume(&self, concurrency: usize) -> WorkerHandle {
        self.queue.consume(Arc::new(self.clone()), concurrency)
    }

    async fn run(&self, request: &UserRequestPayload) -> Result<JsonValue> {
        if request.request_id.trim().is_empty() {
            return Err(Error::InvalidInput("request_id must not be empty".to_string()));
        }
        let content = required_str(&request.request_data, "content")?;

        let output = match request.request_type {
            RequestType::Summary => JsonValue::String(self.enrichment.summarize(content).await?),
            RequestType::Timeline => {
                serde_json::to_value(self.enrichment.extract_timeline(content).await?)?
            }
            RequestType::Translation => {
                let target = match request.request_data.get("target_language") {
                    Some(JsonValue::String(lang)) => lang.parse::<Language>()?,
                    _ => Language::English,
                };
                JsonValue::String(self.enrichment.translate(content, target).await?)
            }
            RequestType::Question => {
                let question = required_str(&request.request_data, "question")?;
                JsonValue::String(
                    self.enrichment
                        .analyze(content, "question", &json!({ "question": question }))
                        .await?,
                )
            }
        };

        Ok(json!({
            "request_id": request.request_id,
            "type": request.request_type.as_str(),
            "output": output,
            "model": self.enrichment.model_name(),
            "completed_at": Utc::now(),
        }))
    }
}

/// A non-blank string field of the request data.
fn required_str<'a>(data: &'a JsonValue, field: &str) -> Result<&'a str> {
    data.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("request_data.{} is required", field)))
}

#[async_trait]
impl JobHandler for UserRequestOrchestrator {
    fn queue(&self) -> QueueName {
        QueueName::USER_REQUESTS
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "user_requests", job_id = %ctx.job_id()))]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let request: UserRequestPayload = match ctx.parse_payload() {
            Ok(r) => r,
            Err(e) => return JobResult::Failed(e),
        };

        match self.run(&request).await {
            Ok(result) => {
                info!(
                    request_id = %request.request_id,
                    request_type = request.request_type.as_str(),
                    "User request completed"
                );
                JobResult::Success(Some(result))
            }
            Err(e) => JobResult::from_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::{JobPriority, JobState};
    use docket_db::MemoryQueueStore;
    use docket_inference::mock::{MockEnrichmentBackend, MockFailure, MockOp};

    use crate::queue::QueueOptions;

    fn orchestrator() -> (UserRequestOrchestrator, MockEnrichmentBackend) {
        let backend = MockEnrichmentBackend::new();
        let queue = JobQueue::new(Arc::new(MemoryQueueStore::new()), QueueOptions::default());
        (
            UserRequestOrchestrator::new(queue, Arc::new(backend.clone())),
            backend,
        )
    }

    fn request(request_type: RequestType, data: JsonValue) -> UserRequestPayload {
        UserRequestPayload {
            request_id: "r1".to_string(),
            user_id: 5,
            case_id: 9,
            request_type,
            request_data: data,
            priority: JobPriority::High,
        }
    }

    async fn run_job(orch: &UserRequestOrchestrator, req: &UserRequestPayload) -> JobResult {
        let outcome = orch.submit(req.clone()).await.unwrap();
        let store = orch.queue.store();
        let job = store
            .lease(&QueueName::USER_REQUESTS, std::time::Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.id, outcome.job_id);
        orch.execute(JobContext::new(job)).await
    }

    #[tokio::test]
    async fn test_summary_request() {
        let (orch, _) = orchestrator();
        let req = request(RequestType::Summary, json!({"content": "Long filing"}));
        let JobResult::Success(Some(result)) = run_job(&orch, &req).await else {
            panic!("expected success");
        };
        assert_eq!(result["request_id"], "r1");
        assert_eq!(result["type"], "summary");
        assert_eq!(result["output"], "Summary: Long filing");
        assert_eq!(result["model"], "mock");
    }

    #[tokio::test]
    async fn test_translation_defaults_to_english() {
        let (orch, _) = orchestrator();
        let req = request(RequestType::Translation, json!({"content": "نص"}));
        let JobResult::Success(Some(result)) = run_job(&orch, &req).await else {
            panic!("expected success");
        };
        assert_eq!(result["output"], "[en] نص");
    }

    #[tokio::test]
    async fn test_translation_to_arabic() {
        let (orch, _) = orchestrator();
        let req = request(
            RequestType::Translation,
            json!({"content": "text", "target_language": "ar"}),
        );
        let JobResult::Success(Some(result)) = run_job(&orch, &req).await else {
            panic!("expected success");
        };
        assert_eq!(result["output"], "[ar] text");
    }

    #[tokio::test]
    async fn test_timeline_output_is_array() {
        let (orch, _) = orchestrator();
        let req = request(RequestType::Timeline, json!({"content": "Filed 2024-01-01"}));
        let JobResult::Success(Some(result)) = run_job(&orch, &req).await else {
            panic!("expected success");
        };
        assert_eq!(result["output"][0]["date"], "2024-01-01");
    }

    #[tokio::test]
    async fn test_question_requires_question() {
        let (orch, backend) = orchestrator();
        let req = request(RequestType::Question, json!({"content": "text"}));
        assert!(matches!(run_job(&orch, &req).await, JobResult::Failed(_)));
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_question_routes_to_analyze() {
        let (orch, backend) = orchestrator();
        let req = request(
            RequestType::Question,
            json!({"content": "text", "question": "Who filed?"}),
        );
        assert!(run_job(&orch, &req).await.is_success());
        assert_eq!(backend.call_count(MockOp::Analyze), 1);
    }

    #[tokio::test]
    async fn test_missing_content_is_permanent() {
        let (orch, _) = orchestrator();
        let req = request(RequestType::Summary, json!({}));
        assert!(matches!(run_job(&orch, &req).await, JobResult::Failed(ref m) if m.contains("content")));
    }

    #[tokio::test]
    async fn test_rate_limit_retries() {
        let (orch, backend) = orchestrator();
        backend.fail_next(MockOp::Summarize, 1, MockFailure::RateLimited);
        let req = request(RequestType::Summary, json!({"content": "x"}));
        assert!(matches!(run_job(&orch, &req).await, JobResult::Retry(_)));
    }

    #[tokio::test]
    async fn test_submit_dedups_by_request_id() {
        let (orch, _) = orchestrator();
        let req = request(RequestType::Summary, json!({"content": "x"}));
        let first = orch.submit(req.clone()).await.unwrap();
        let second = orch.submit(req).await.unwrap();
        assert_eq!(first.job_id, second.job_id);

        let status = orch.status(first.job_id).await.unwrap();
        assert_eq!(status.state, JobState::Waiting);
    }

    #[tokio::test]
    async fn test_blank_request_id_accepted_then_fails() {
        let (orch, backend) = orchestrator();
        let mut req = request(RequestType::Summary, json!({"content": "x"}));
        req.request_id = " ".to_string();

        let first = orch.submit(req.clone()).await.unwrap();
        let second = orch.submit(req.clone()).await.unwrap();
        assert_ne!(first.job_id, second.job_id);

        let job = orch
            .queue
            .store()
            .lease(&QueueName::USER_REQUESTS, std::time::Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            orch.execute(JobContext::new(job)).await,
            JobResult::Failed(ref m) if m.contains("request_id")
        ));
        assert_eq!(backend.total_calls(), 0);
    }
}
