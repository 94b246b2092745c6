//! HTTP handlers for docket-api.

pub mod documents;
pub mod health;
pub mod queues;
pub mod requests;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use docket_core::EnqueueOutcome;

/// `201 Created` for a new job, `200 OK` when an in-flight job was returned.
pub(crate) fn enqueued(outcome: EnqueueOutcome) -> Response {
    let status = if outcome.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    (status, Json(outcome)).into_response()
}
