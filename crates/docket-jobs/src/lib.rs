//! # docket-jobs
//!
//! Background job processing for docket.
//!
//! This crate provides:
//! - A multi-queue job facade with priority ordering and idempotent submission
//! - Lease-based concurrent workers with retry, backoff and dead-lettering
//! - OCR dispatch from media type to text-extraction adapter
//! - The document pipeline and the user-request / AI-analysis orchestrators
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use docket_jobs::{JobQueue, QueueOptions, QueueName, SubmitOptions, NoOpHandler};
//! use docket_db::MemoryQueueStore;
//!
//! let queue = JobQueue::new(Arc::new(MemoryQueueStore::new()), QueueOptions::default());
//!
//! let outcome = queue
//!     .submit(&QueueName::USER_REQUESTS, serde_json::json!({}), SubmitOptions::new())
//!     .await?;
//!
//! // Start a consumer with two slots and listen for events
//! let handle = queue.consume(Arc::new(NoOpHandler::new(QueueName::USER_REQUESTS)), 2);
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod adapters;
pub mod ai_analysis;
pub mod extraction;
pub mod handler;
pub mod pipeline;
pub mod queue;
pub mod user_request;
pub mod worker;

// Re-export core types
pub use docket_core::*;

pub use ai_analysis::AiAnalysisOrchestrator;
pub use extraction::OcrDispatcher;
pub use handler::{JobContext, JobHandler, JobResult, NoOpHandler};
pub use pipeline::DocumentPipeline;
pub use queue::{JobQueue, QueueOptions};
pub use user_request::UserRequestOrchestrator;
pub use worker::{
    default_concurrency, JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle,
};

pub use adapters::{ImageOcrAdapter, PdfOcrAdapter, PdfTextAdapter, TextNativeAdapter};

/// Default maximum attempts for a job.
pub const DEFAULT_MAX_ATTEMPTS: i32 = docket_core::defaults::JOB_MAX_ATTEMPTS;

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = docket_core::defaults::JOB_POLL_INTERVAL_MS;
