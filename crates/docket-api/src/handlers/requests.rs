//! User-request and AI-analysis submission.

use axum::extract::State;
use axum::response::Response;
use axum::Json;

use docket_core::{AiAnalysisPayload, UserRequestPayload};

use super::enqueued;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn submit_user_request(
    State(state): State<AppState>,
    Json(body): Json<UserRequestPayload>,
) -> Result<Response, ApiError> {
    let outcome = state.user_requests.submit(body).await?;
    Ok(enqueued(outcome))
}

pub async fn submit_ai_analysis(
    State(state): State<AppState>,
    Json(body): Json<AiAnalysisPayload>,
) -> Result<Response, ApiError> {
    let outcome = state.ai_analysis.submit(body).await?;
    Ok(enqueued(outcome))
}
