//! Document processing trigger.

use axum::extract::{Path, State};
use axum::response::Response;
use tracing::info;

use super::enqueued;
use crate::error::ApiError;
use crate::state::AppState;

/// Queue a stored document for extraction and enrichment.
///
/// Used both for the first submission after upload and to bring a `FAILED`
/// document back. Answers 400 for a document that is already `PROCESSED`.
pub async fn process_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let outcome = state.pipeline.resubmit(id).await?;
    info!(document_id = id, job_id = %outcome.job_id, "Document queued for processing");
    Ok(enqueued(outcome))
}
