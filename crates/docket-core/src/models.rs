//! Core data models for docket.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// QUEUES
// =============================================================================

/// Name of a job queue.
///
/// The three queues the system ships with are associated constants; any other
/// name made of lowercase ASCII letters, digits and dashes is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(Cow<'static, str>);

impl QueueName {
    pub const DOCUMENT_PROCESSING: QueueName = QueueName(Cow::Borrowed("document-processing"));
    pub const USER_REQUESTS: QueueName = QueueName(Cow::Borrowed("user-requests"));
    pub const AI_ANALYSIS: QueueName = QueueName(Cow::Borrowed("ai-analysis"));

    /// Validate and build a queue name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 64
            && name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if !valid {
            return Err(Error::InvalidInput(format!(
                "Invalid queue name '{}': expected lowercase letters, digits and dashes",
                name
            )));
        }
        Ok(Self(Cow::Owned(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Queues every deployment carries.
    pub fn builtin() -> [QueueName; 3] {
        [
            Self::DOCUMENT_PROCESSING,
            Self::USER_REQUESTS,
            Self::AI_ANALYSIS,
        ]
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for QueueName {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for QueueName {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(value: QueueName) -> Self {
        value.0.into_owned()
    }
}

// =============================================================================
// JOB TYPES
// =============================================================================

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    /// Waiting, but not leaseable before `available_at` (retry backoff).
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }

    /// Terminal states are never modified again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// States that count as "in flight" for deduplication.
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "delayed" => Ok(JobState::Delayed),
            other => Err(Error::InvalidInput(format!("Invalid job state: {}", other))),
        }
    }
}

/// Ordering hint among waiting jobs of the same queue.
///
/// Variant order matters: `High` compares greatest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl JobPriority {
    /// Numeric rank stored by the Postgres backend (higher = dequeued first).
    pub fn rank(&self) -> i16 {
        match self {
            JobPriority::Low => 1,
            JobPriority::Medium => 2,
            JobPriority::High => 3,
        }
    }

    pub fn from_rank(rank: i16) -> Self {
        match rank {
            r if r >= 3 => JobPriority::High,
            2 => JobPriority::Medium,
            _ => JobPriority::Low,
        }
    }
}

impl FromStr for JobPriority {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "high" => Ok(JobPriority::High),
            "medium" | "normal" => Ok(JobPriority::Medium),
            "low" => Ok(JobPriority::Low),
            other => Err(Error::InvalidInput(format!("Invalid priority: {}", other))),
        }
    }
}

/// A job in a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: QueueName,
    pub payload: JsonValue,
    pub state: JobState,
    pub priority: JobPriority,
    /// Number of times the job has been leased so far.
    pub attempts: i32,
    pub max_attempts: i32,
    pub dedup_key: Option<String>,
    pub result: Option<JsonValue>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be leased.
    pub available_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Proof of lease ownership; rotated on every lease.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_token: Option<Uuid>,
}

impl Job {
    /// True when a failure of the current lease leaves no attempts for a retry.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Number of retries performed (dequeues after the first one).
    pub fn retries(&self) -> i32 {
        (self.attempts - 1).max(0)
    }
}

/// Caller-tunable options for a submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitOptions {
    #[serde(default)]
    pub priority: JobPriority,
    /// Overrides the queue default when set.
    #[serde(default)]
    pub max_attempts: Option<i32>,
    /// While a job with this key is waiting, delayed or active on the same
    /// queue, submissions return that job instead of creating another one.
    #[serde(default)]
    pub dedup_key: Option<String>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}

/// A fully resolved job about to be written to the queue store.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: QueueName,
    pub payload: JsonValue,
    pub priority: JobPriority,
    pub max_attempts: i32,
    pub dedup_key: Option<String>,
}

/// Outcome of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    pub job_id: Uuid,
    /// True when an in-flight job with the same dedup key was returned.
    pub deduplicated: bool,
}

/// Externally visible status of a job (`getJobStatus`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub queue: QueueName,
    pub state: JobState,
    pub attempts: i32,
    pub max_attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            queue: job.queue.clone(),
            state: job.state,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            last_error: job.last_error.clone(),
            result: job.result.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// Jobs touched by a sweep over expired leases.
#[derive(Debug, Clone, Default)]
pub struct ReclaimReport {
    /// Returned to waiting/delayed.
    pub requeued: Vec<Uuid>,
    /// Moved to failed because no attempts were left.
    pub dead_lettered: Vec<Job>,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.dead_lettered.is_empty()
    }
}

/// Exponential backoff between attempts of the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(crate::defaults::JOB_BACKOFF_BASE_MS),
            max: Duration::from_millis(crate::defaults::JOB_BACKOFF_MAX_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the retry that follows `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    pub fn delay_for(&self, attempt: i32) -> Duration {
        let exp = attempt.saturating_sub(1).clamp(0, 31) as u32;
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }
}

// =============================================================================
// QUEUE STATS & HEALTH
// =============================================================================

/// Per-queue job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: i64,
    pub active: i64,
    pub delayed: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

impl QueueCounts {
    /// Build counts from per-state tallies; `total` is derived.
    pub fn from_states(waiting: i64, active: i64, delayed: i64, completed: i64, failed: i64) -> Self {
        Self {
            waiting,
            active,
            delayed,
            completed,
            failed,
            total: waiting + active + delayed + completed + failed,
        }
    }

    /// Jobs not yet in a terminal state.
    pub fn in_flight(&self) -> i64 {
        self.waiting + self.active + self.delayed
    }
}

/// Counts for one queue plus whether the store knows the queue at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(flatten)]
    pub counts: QueueCounts,
    /// Queue has never been registered in the store (counts are zeroed).
    pub degraded: bool,
}

/// Read-only statistics snapshot across queues (`getQueueStats`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub queues: BTreeMap<QueueName, QueueSnapshot>,
    pub degraded: bool,
}

impl QueueStats {
    pub fn get(&self, queue: &QueueName) -> Option<&QueueSnapshot> {
        self.queues.get(queue)
    }
}

/// Overall queue health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unreachable,
}

/// Structured health report (`checkQueueHealth`). Never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueHealth {
    pub status: HealthStatus,
    pub queues: BTreeMap<QueueName, QueueSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

// =============================================================================
// DOCUMENTS
// =============================================================================

/// Processing state of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Processed => "PROCESSED",
            ProcessingStatus::Failed => "FAILED",
        }
    }

    /// Forward-only transitions, plus `FAILED -> PENDING` for explicit
    /// re-submission. Staying in the same state is always allowed.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(ProcessingStatus::Pending),
            "PROCESSING" => Ok(ProcessingStatus::Processing),
            "PROCESSED" => Ok(ProcessingStatus::Processed),
            "FAILED" => Ok(ProcessingStatus::Failed),
            other => Err(Error::InvalidInput(format!(
                "Invalid processing status: {}",
                other
            ))),
        }
    }
}

/// One dated event in a document timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// ISO-8601 date, possibly partial ("2021-03").
    pub date: String,
    pub description: String,
    pub source_type: String,
    pub source_id: String,
}

/// Target language for translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Arabic,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Arabic => "ar",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Arabic => "Arabic",
        }
    }
}

impl FromStr for Language {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "en" | "english" => Ok(Language::English),
            "ar" | "arabic" => Ok(Language::Arabic),
            other => Err(Error::InvalidInput(format!("Unsupported language: {}", other))),
        }
    }
}

/// Derived column produced by AI enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentAspect {
    Summary,
    Timeline,
    TranslationEn,
    TranslationAr,
}

impl EnrichmentAspect {
    pub const ALL: [EnrichmentAspect; 4] = [
        EnrichmentAspect::Summary,
        EnrichmentAspect::Timeline,
        EnrichmentAspect::TranslationEn,
        EnrichmentAspect::TranslationAr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentAspect::Summary => "summary",
            EnrichmentAspect::Timeline => "timeline",
            EnrichmentAspect::TranslationEn => "translation_en",
            EnrichmentAspect::TranslationAr => "translation_ar",
        }
    }
}

impl fmt::Display for EnrichmentAspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded case document as seen by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub case_id: Option<i64>,
    pub file_name: String,
    pub storage_path: String,
    /// Declared MIME type.
    pub file_type: String,
    pub processing_status: ProcessingStatus,
    pub extracted_text: Option<String>,
    pub summary: Option<String>,
    pub timeline: Option<Vec<TimelineEvent>>,
    pub translation_en: Option<String>,
    pub translation_ar: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn has_extracted_text(&self) -> bool {
        self.extracted_text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// Whether an aspect has been produced. Text aspects must be non-blank.
    /// A timeline counts once written, even when empty: a filing that
    /// mentions no dates yields `Some(vec![])` and is not re-enriched.
    pub fn has_aspect(&self, aspect: EnrichmentAspect) -> bool {
        fn filled(s: &Option<String>) -> bool {
            s.as_deref().is_some_and(|s| !s.trim().is_empty())
        }
        match aspect {
            EnrichmentAspect::Summary => filled(&self.summary),
            EnrichmentAspect::Timeline => self.timeline.is_some(),
            EnrichmentAspect::TranslationEn => filled(&self.translation_en),
            EnrichmentAspect::TranslationAr => filled(&self.translation_ar),
        }
    }

    /// Aspects still to be produced, in a stable order.
    pub fn missing_aspects(&self) -> Vec<EnrichmentAspect> {
        EnrichmentAspect::ALL
            .into_iter()
            .filter(|a| !self.has_aspect(*a))
            .collect()
    }
}

/// Row created by the upload collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub case_id: Option<i64>,
    pub file_name: String,
    pub storage_path: String,
    pub file_type: String,
}

/// Partial update of a document row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    pub processing_status: Option<ProcessingStatus>,
    pub extracted_text: Option<String>,
    pub summary: Option<String>,
    pub timeline: Option<Vec<TimelineEvent>>,
    pub translation_en: Option<String>,
    pub translation_ar: Option<String>,
    /// `Some(None)` clears the column.
    pub last_error: Option<Option<String>>,
}

impl DocumentUpdate {
    pub fn status(status: ProcessingStatus) -> Self {
        Self {
            processing_status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            processing_status: Some(ProcessingStatus::Failed),
            last_error: Some(Some(error.into())),
            ..Default::default()
        }
    }

    pub fn with_last_error(mut self, error: Option<String>) -> Self {
        self.last_error = Some(error);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// How text is pulled out of a document of a given media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Plain text read as UTF-8.
    TextNative,
    /// PDF text layer via pdftotext.
    PdfText,
    /// Scanned PDF: rasterize pages, then OCR.
    PdfOcr,
    /// Image OCR via tesseract.
    ImageOcr,
}

/// MIME patterns the dispatcher accepts. A trailing `*` matches any subtype.
pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/tiff",
    "image/bmp",
    "image/gif",
    "image/webp",
    "text/plain",
    "text/markdown",
    "text/csv",
    "text/html",
];

/// Lowercase a MIME type and drop any parameters (`; charset=...`).
pub fn normalize_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

impl ExtractionStrategy {
    /// Pick the strategy for a declared MIME type. `None` means unsupported.
    ///
    /// Pure function. Audio and video are never supported.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        let mime = normalize_mime(mime);
        if mime.starts_with("video/") || mime.starts_with("audio/") {
            return None;
        }
        if !SUPPORTED_MIME_TYPES.iter().any(|p| mime_matches(p, &mime)) {
            return None;
        }
        if mime == "application/pdf" {
            Some(Self::PdfText)
        } else if mime.starts_with("image/") {
            Some(Self::ImageOcr)
        } else {
            Some(Self::TextNative)
        }
    }
}

fn mime_matches(pattern: &str, mime: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => mime.starts_with(prefix),
        None => pattern == mime,
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TextNative => write!(f, "text_native"),
            Self::PdfText => write!(f, "pdf_text"),
            Self::PdfOcr => write!(f, "pdf_ocr"),
            Self::ImageOcr => write!(f, "image_ocr"),
        }
    }
}

/// Output of an extraction adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub extracted_text: Option<String>,
    pub metadata: JsonValue,
}

impl ExtractionResult {
    /// Whether the adapter asks for an OCR pass over the same input.
    pub fn needs_ocr(&self) -> bool {
        self.metadata
            .get("needs_ocr")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

// =============================================================================
// JOB PAYLOADS
// =============================================================================

/// Payload of a `document-processing` job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentJobPayload {
    pub document_id: i64,
}

impl DocumentJobPayload {
    /// Dedup key shared by every job for this document.
    pub fn dedup_key(&self) -> String {
        self.document_id.to_string()
    }
}

/// Kind of ad-hoc user request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Summary,
    Timeline,
    Translation,
    Question,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Summary => "summary",
            RequestType::Timeline => "timeline",
            RequestType::Translation => "translation",
            RequestType::Question => "question",
        }
    }
}

/// Payload of a `user-requests` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequestPayload {
    pub request_id: String,
    pub user_id: i64,
    pub case_id: i64,
    pub request_type: RequestType,
    #[serde(default)]
    pub request_data: JsonValue,
    #[serde(default)]
    pub priority: JobPriority,
}

/// Payload of an `ai-analysis` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysisPayload {
    pub analysis_id: String,
    pub document_id: i64,
    pub case_id: i64,
    pub analysis_type: String,
    pub content: String,
    #[serde(default)]
    pub context: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_queue_name_constants() {
        assert_eq!(QueueName::DOCUMENT_PROCESSING.as_str(), "document-processing");
        assert_eq!(QueueName::USER_REQUESTS.as_str(), "user-requests");
        assert_eq!(QueueName::AI_ANALYSIS.as_str(), "ai-analysis");
    }

    #[test]
    fn test_queue_name_validation() {
        assert!(QueueName::new("exports").is_ok());
        assert!(QueueName::new("bulk-ocr-2").is_ok());
        assert!(QueueName::new("").is_err());
        assert!(QueueName::new("Upper").is_err());
        assert!(QueueName::new("with space").is_err());
        assert!(QueueName::new("a/b").is_err());
    }

    #[test]
    fn test_queue_name_parsed_equals_constant() {
        let parsed: QueueName = "user-requests".parse().unwrap();
        assert_eq!(parsed, QueueName::USER_REQUESTS);
    }

    #[test]
    fn test_queue_name_serde_rejects_invalid() {
        let ok: QueueName = serde_json::from_value(json!("ai-analysis")).unwrap();
        assert_eq!(ok, QueueName::AI_ANALYSIS);
        assert!(serde_json::from_value::<QueueName>(json!("Bad Name")).is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::High > JobPriority::Medium);
        assert!(JobPriority::Medium > JobPriority::Low);
        assert_eq!(JobPriority::default(), JobPriority::Medium);
    }

    #[test]
    fn test_priority_rank_round_trip() {
        for p in [JobPriority::Low, JobPriority::Medium, JobPriority::High] {
            assert_eq!(JobPriority::from_rank(p.rank()), p);
        }
    }

    #[test]
    fn test_job_state_terminal() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(!JobState::Delayed.is_terminal());
    }

    #[test]
    fn test_job_state_parse() {
        assert_eq!("delayed".parse::<JobState>().unwrap(), JobState::Delayed);
        assert!("pending".parse::<JobState>().is_err());
    }

    #[test]
    fn test_processing_status_transitions() {
        use ProcessingStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));

        assert!(!Processed.can_transition_to(Pending));
        assert!(!Processed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Processed));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn test_processing_status_serde() {
        let s = serde_json::to_string(&ProcessingStatus::Processed).unwrap();
        assert_eq!(s, "\"PROCESSED\"");
    }

    #[test]
    fn test_strategy_from_mime() {
        assert_eq!(
            ExtractionStrategy::from_mime_type("application/pdf"),
            Some(ExtractionStrategy::PdfText)
        );
        assert_eq!(
            ExtractionStrategy::from_mime_type("IMAGE/PNG"),
            Some(ExtractionStrategy::ImageOcr)
        );
        assert_eq!(
            ExtractionStrategy::from_mime_type("text/plain; charset=utf-8"),
            Some(ExtractionStrategy::TextNative)
        );
        assert_eq!(ExtractionStrategy::from_mime_type("video/mp4"), None);
        assert_eq!(ExtractionStrategy::from_mime_type("audio/mpeg"), None);
        assert_eq!(
            ExtractionStrategy::from_mime_type("application/octet-stream"),
            None
        );
    }

    #[test]
    fn test_mime_pattern_wildcard() {
        assert!(mime_matches("text/*", "text/x-rst"));
        assert!(!mime_matches("text/plain", "text/csv"));
    }

    #[test]
    fn test_document_missing_aspects() {
        let now = Utc::now();
        let mut doc = Document {
            id: 1,
            case_id: Some(1),
            file_name: "brief.txt".into(),
            storage_path: "cases/1/brief.txt".into(),
            file_type: "text/plain".into(),
            processing_status: ProcessingStatus::Processing,
            extracted_text: Some("text".into()),
            summary: Some("summary".into()),
            timeline: None,
            translation_en: Some("   ".into()),
            translation_ar: Some("ترجمة".into()),
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(
            doc.missing_aspects(),
            vec![EnrichmentAspect::Timeline, EnrichmentAspect::TranslationEn]
        );

        // An empty timeline is a valid result.
        doc.timeline = Some(vec![]);
        doc.translation_en = Some("translation".into());
        assert!(doc.missing_aspects().is_empty());
    }

    #[test]
    fn test_retry_policy_exponential_with_cap() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
        // Attempt 0 is treated like the first attempt.
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
    }

    #[test]
    fn test_queue_counts_total() {
        let c = QueueCounts::from_states(1, 2, 3, 4, 5);
        assert_eq!(c.total, 15);
        assert_eq!(c.in_flight(), 6);
    }

    #[test]
    fn test_job_final_attempt() {
        let now = Utc::now();
        let mut job = Job {
            id: Uuid::new_v4(),
            queue: QueueName::USER_REQUESTS,
            payload: json!({}),
            state: JobState::Active,
            priority: JobPriority::Medium,
            attempts: 1,
            max_attempts: 3,
            dedup_key: None,
            result: None,
            last_error: None,
            created_at: now,
            available_at: now,
            started_at: Some(now),
            finished_at: None,
            lease_expires_at: None,
            lease_token: None,
        };
        assert!(!job.is_final_attempt());
        assert_eq!(job.retries(), 0);
        job.attempts = 3;
        assert!(job.is_final_attempt());
        assert_eq!(job.retries(), 2);
    }

    #[test]
    fn test_user_request_payload_defaults() {
        let payload: UserRequestPayload = serde_json::from_value(json!({
            "request_id": "r1",
            "user_id": 3,
            "case_id": 9,
            "request_type": "question",
        }))
        .unwrap();
        assert_eq!(payload.request_type, RequestType::Question);
        assert_eq!(payload.priority, JobPriority::Medium);
        assert!(payload.request_data.is_null());
    }
}
