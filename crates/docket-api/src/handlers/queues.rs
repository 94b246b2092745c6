//! Generic queue endpoints: submit, status, stats.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use docket_core::{DocumentJobPayload, JobPriority, QueueName, SubmitOptions};

use super::enqueued;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitJobBody {
    #[serde(default)]
    pub payload: JsonValue,
    pub priority: Option<JobPriority>,
    pub max_attempts: Option<i32>,
    pub dedup_key: Option<String>,
}

/// Resolve a path segment to a queue this engine serves.
fn known_queue(state: &AppState, raw: &str) -> Result<QueueName, ApiError> {
    let queue: QueueName = raw.parse()?;
    if !state.queue.queues().contains(&queue) {
        return Err(ApiError::NotFound(format!("Unknown queue: {}", queue)));
    }
    Ok(queue)
}

pub async fn submit_job(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Json(body): Json<SubmitJobBody>,
) -> Result<Response, ApiError> {
    let queue = known_queue(&state, &queue)?;

    let mut options = SubmitOptions::new();
    if let Some(priority) = body.priority {
        options = options.with_priority(priority);
    }
    if let Some(max_attempts) = body.max_attempts {
        options = options.with_max_attempts(max_attempts);
    }
    if let Some(key) = body.dedup_key {
        options = options.with_dedup_key(key);
    }
    // One in-flight job per document, whatever key the caller sent.
    if queue == QueueName::DOCUMENT_PROCESSING {
        if let Ok(job) = serde_json::from_value::<DocumentJobPayload>(body.payload.clone()) {
            options = options.with_dedup_key(job.dedup_key());
        }
    }

    let outcome = state.queue.submit(&queue, body.payload, options).await?;
    debug!(queue = %queue, job_id = %outcome.job_id, deduplicated = outcome.deduplicated, "Job accepted");
    Ok(enqueued(outcome))
}

pub async fn get_job_status(
    State(state): State<AppState>,
    Path((queue, job_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let queue = known_queue(&state, &queue)?;
    let status = state.queue.get_status(&queue, job_id).await?;
    Ok(Json(status))
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.queue.stats().await?;
    Ok(Json(stats))
}
