//! # docket-api
//!
//! HTTP surface over the docket job queue and processing pipeline.
//!
//! The binary in `main.rs` loads configuration, initializes logging, picks a
//! storage backend and starts one worker per queue; this library holds the
//! router so tests can drive it without a socket.

pub mod config;
pub mod error;
pub mod handlers;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::{
    catch_panic::CatchPanicLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};

pub use config::{ApiConfig, QueueBackend};
pub use error::ApiError;
pub use state::AppState;

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = docket_core::new_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Build the application router.
pub fn router(state: AppState, max_body_size: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/queues", get(handlers::health::queue_health))
        .route("/api/v1/queues/stats", get(handlers::queues::queue_stats))
        .route("/api/v1/queues/:queue/jobs", post(handlers::queues::submit_job))
        .route(
            "/api/v1/queues/:queue/jobs/:job_id",
            get(handlers::queues::get_job_status),
        )
        .route(
            "/api/v1/documents/:id/process",
            post(handlers::documents::process_document),
        )
        .route(
            "/api/v1/user-requests",
            post(handlers::requests::submit_user_request),
        )
        .route(
            "/api/v1/ai-analysis",
            post(handlers::requests::submit_ai_analysis),
        )
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(CatchPanicLayer::new())
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .with_state(state)
}
