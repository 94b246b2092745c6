//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

/// Error returned by API handlers.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Internal(docket_core::Error),
}

impl From<docket_core::Error> for ApiError {
    fn from(err: docket_core::Error) -> Self {
        use docket_core::Error;
        match err {
            Error::JobNotFound { .. } | Error::DocumentNotFound(_) | Error::NotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            Error::InvalidInput(_) | Error::InvalidState(_) => ApiError::BadRequest(err.to_string()),
            Error::QueueUnavailable(_) => ApiError::Unavailable(err.to_string()),
            _ => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(err) => {
                error!(error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::{Error, QueueName};
    use uuid::Uuid;

    fn status_of(err: Error) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(Error::JobNotFound {
                queue: QueueName::AI_ANALYSIS,
                job_id: Uuid::nil(),
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_of(Error::DocumentNotFound(9)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(Error::InvalidState("processed".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(Error::InvalidInput("empty".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(Error::QueueUnavailable("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(Error::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
