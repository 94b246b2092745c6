//! Mock enrichment backend for deterministic testing.
//!
//! Produces predictable output for every operation and can be told to fail
//! specific operations, either for the next `n` calls or permanently.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docket_inference::mock::{MockEnrichmentBackend, MockFailure, MockOp};
//!
//! let backend = MockEnrichmentBackend::new();
//! backend.fail_next(MockOp::Summarize, 1, MockFailure::RateLimited);
//!
//! assert!(backend.summarize("text").await.is_err());
//! assert_eq!(backend.summarize("text").await.unwrap(), "Summary: text");
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use docket_core::{EnrichmentBackend, Error, Language, Result, TimelineEvent};

/// Operations of [`EnrichmentBackend`] that can be observed and failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Summarize,
    ExtractTimeline,
    Translate,
    Analyze,
}

/// Error kind to return from an injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    RateLimited,
    Timeout,
    InvalidResponse,
    Failed,
}

impl MockFailure {
    fn to_error(self, op: MockOp) -> Error {
        let msg = format!("simulated failure in {:?}", op);
        match self {
            MockFailure::RateLimited => Error::RateLimited(msg),
            MockFailure::Timeout => Error::Timeout(msg),
            MockFailure::InvalidResponse => Error::InvalidResponse(msg),
            MockFailure::Failed => Error::EnrichmentFailed(msg),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FailurePlan {
    Next(usize, MockFailure),
    Always(MockFailure),
}

/// A recorded call, for assertions.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub op: MockOp,
    pub input: String,
    pub timestamp: Instant,
}

/// Mock enrichment backend for testing.
#[derive(Clone)]
pub struct MockEnrichmentBackend {
    latency: Duration,
    healthy: bool,
    call_log: Arc<Mutex<Vec<MockCall>>>,
    failures: Arc<Mutex<HashMap<MockOp, FailurePlan>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockEnrichmentBackend {
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            healthy: true,
            call_log: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Set simulated latency for all operations.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Report unhealthy from `health_check`.
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Fail the next `count` calls of `op`, then behave normally.
    pub fn fail_next(&self, op: MockOp, count: usize, kind: MockFailure) {
        lock(&self.failures).insert(op, FailurePlan::Next(count, kind));
    }

    /// Fail every call of `op` until [`clear_failures`](Self::clear_failures).
    pub fn fail_always(&self, op: MockOp, kind: MockFailure) {
        lock(&self.failures).insert(op, FailurePlan::Always(kind));
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.call_log).clone()
    }

    pub fn call_count(&self, op: MockOp) -> usize {
        lock(&self.call_log).iter().filter(|c| c.op == op).count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.call_log).len()
    }

    async fn enter(&self, op: MockOp, input: &str) -> Result<()> {
        lock(&self.call_log).push(MockCall {
            op,
            input: input.to_string(),
            timestamp: Instant::now(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut failures = lock(&self.failures);
        match failures.get(&op).copied() {
            Some(FailurePlan::Always(kind)) => Err(kind.to_error(op)),
            Some(FailurePlan::Next(n, kind)) if n > 0 => {
                if n == 1 {
                    failures.remove(&op);
                } else {
                    failures.insert(op, FailurePlan::Next(n - 1, kind));
                }
                Err(kind.to_error(op))
            }
            _ => Ok(()),
        }
    }
}

impl Default for MockEnrichmentBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnrichmentBackend for MockEnrichmentBackend {
    async fn summarize(&self, text: &str) -> Result<String> {
        self.enter(MockOp::Summarize, text).await?;
        Ok(format!("Summary: {}", text))
    }

    async fn extract_timeline(&self, text: &str) -> Result<Vec<TimelineEvent>> {
        self.enter(MockOp::ExtractTimeline, text).await?;
        Ok(vec![TimelineEvent {
            date: "2024-01-01".to_string(),
            description: text.chars().take(80).collect(),
            source_type: "document".to_string(),
            source_id: String::new(),
        }])
    }

    async fn translate(&self, text: &str, target: Language) -> Result<String> {
        self.enter(MockOp::Translate, text).await?;
        Ok(format!("[{}] {}", target.code(), text))
    }

    async fn analyze(
        &self,
        content: &str,
        analysis_type: &str,
        _context: &JsonValue,
    ) -> Result<String> {
        self.enter(MockOp::Analyze, content).await?;
        Ok(format!("{} analysis: {}", analysis_type, content))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.healthy)
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic_outputs() {
        let backend = MockEnrichmentBackend::new();
        assert_eq!(backend.summarize("abc").await.unwrap(), "Summary: abc");
        assert_eq!(
            backend.translate("abc", Language::Arabic).await.unwrap(),
            "[ar] abc"
        );
        assert_eq!(
            backend
                .analyze("abc", "legal_review", &JsonValue::Null)
                .await
                .unwrap(),
            "legal_review analysis: abc"
        );
        let events = backend.extract_timeline("abc").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].date, "2024-01-01");
    }

    #[tokio::test]
    async fn test_fail_next_then_recovers() {
        let backend = MockEnrichmentBackend::new();
        backend.fail_next(MockOp::Summarize, 2, MockFailure::RateLimited);

        assert!(matches!(
            backend.summarize("x").await,
            Err(Error::RateLimited(_))
        ));
        assert!(backend.summarize("x").await.is_err());
        assert!(backend.summarize("x").await.is_ok());
        assert_eq!(backend.call_count(MockOp::Summarize), 3);
    }

    #[tokio::test]
    async fn test_fail_always_is_scoped_to_operation() {
        let backend = MockEnrichmentBackend::new();
        backend.fail_always(MockOp::Translate, MockFailure::Timeout);

        assert!(matches!(
            backend.translate("x", Language::English).await,
            Err(Error::Timeout(_))
        ));
        assert!(backend.summarize("x").await.is_ok());

        backend.clear_failures();
        assert!(backend.translate("x", Language::English).await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let backend = MockEnrichmentBackend::new();
        let clone = backend.clone();
        clone.summarize("x").await.unwrap();
        assert_eq!(backend.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_health() {
        assert!(MockEnrichmentBackend::new().health_check().await.unwrap());
        assert!(!MockEnrichmentBackend::new()
            .unhealthy()
            .health_check()
            .await
            .unwrap());
    }
}
