//! Job definitions

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

/// Job Identifier
///
/// Built from the queue name, the enqueue timestamp and a random base36
/// suffix. Unique within a process, not globally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub(crate) fn generate(queue: &str, now: DateTime<Utc>) -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..ID_SUFFIX_LEN)
            .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
            .collect();
        Self(format!("{}-{}-{}", queue, now.timestamp_millis(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Job Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in queue (new or requeued for retry)
    Waiting,
    /// Currently being processed
    Active,
    /// Successfully completed
    Completed,
    /// Permanently failed after max attempts
    Failed,
}

impl JobStatus {
    /// Completed and failed jobs never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single attempt of a job failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("No processor found for job \"{0}\"")]
    NoProcessor(String),
    #[error("{0}")]
    Processor(String),
    #[error("Processor panicked: {0}")]
    Panicked(String),
}

/// What happens to a job after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureOutcome {
    Requeued,
    Exhausted,
}

/// One unit of deferred work and its lifecycle state.
///
/// The owning queue mutates the record in place; everything handed out to
/// callers is a snapshot. The payload is shared, not copied, between the
/// record and its snapshots.
#[derive(Debug)]
pub struct Job<T> {
    pub id: JobId,
    pub name: String,
    pub data: Arc<T>,
    pub status: JobStatus,
    /// UI hint in `0..=100`, not a completion guarantee
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Failed attempts so far
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Start of the latest attempt
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl<T> Clone for Job<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            data: Arc::clone(&self.data),
            status: self.status,
            progress: self.progress,
            result: self.result.clone(),
            error: self.error.clone(),
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

impl<T> Job<T> {
    pub(crate) fn new(queue: &str, name: impl Into<String>, data: T, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(queue, now),
            name: name.into(),
            data: Arc::new(data),
            status: JobStatus::Waiting,
            progress: 0,
            result: None,
            error: None,
            attempts: 0,
            max_attempts,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = JobStatus::Active;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn complete(&mut self, result: serde_json::Value) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.progress = 100;
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: &JobError) -> FailureOutcome {
        self.attempts += 1;
        if self.attempts < self.max_attempts {
            self.status = JobStatus::Waiting;
            FailureOutcome::Requeued
        } else {
            self.status = JobStatus::Failed;
            self.error = Some(error.to_string());
            self.completed_at = Some(Utc::now());
            FailureOutcome::Exhausted
        }
    }

    /// Clamp and store a progress report, returning the stored value.
    pub(crate) fn set_progress(&mut self, progress: i64) -> u8 {
        self.progress = progress.clamp(0, 100) as u8;
        self.progress
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

/// Status snapshot served to pollers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_id_format() {
        let now = Utc::now();
        let id = JobId::generate("scoring-jobs", now);
        let rest = id
            .as_str()
            .strip_prefix("scoring-jobs-")
            .expect("queue prefix");
        let (millis, suffix) = rest.rsplit_once('-').expect("suffix separator");

        assert_eq!(millis, now.timestamp_millis().to_string());
        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_new_job_is_waiting() {
        let job = Job::new("q", "score-deal", json!({"deal": "X"}), 3);
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.progress, 0);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_fail_requeues_until_exhausted() {
        let mut job = Job::new("q", "sync", (), 2);
        let err = JobError::Processor("network error".to_string());

        job.start();
        assert_eq!(job.fail(&err), FailureOutcome::Requeued);
        assert_eq!(job.status, JobStatus::Waiting);
        assert!(job.error.is_none());

        job.start();
        assert_eq!(job.fail(&err), FailureOutcome::Exhausted);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.error.as_deref(), Some("network error"));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_complete_forces_full_progress() {
        let mut job = Job::new("q", "report", (), 3);
        job.start();
        job.set_progress(40);
        job.complete(json!({"ok": true}));

        assert_eq!(job.progress, 100);
        assert!(job.error.is_none());
        assert_eq!(job.result, Some(json!({"ok": true})));
    }

    #[test]
    fn test_progress_clamping() {
        let mut job = Job::new("q", "report", (), 3);
        assert_eq!(job.set_progress(-5), 0);
        assert_eq!(job.set_progress(150), 100);
        assert_eq!(job.set_progress(42), 42);
    }

    #[test]
    fn test_status_view_omits_missing_fields() {
        let job = Job::new("q", "report", (), 3);
        let value = serde_json::to_value(job.status_view()).unwrap();

        assert_eq!(value["status"], "waiting");
        assert_eq!(value["progress"], 0);
        assert!(value.get("result").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_no_processor_message() {
        let err = JobError::NoProcessor("unregistered-job".to_string());
        assert_eq!(
            err.to_string(),
            "No processor found for job \"unregistered-job\""
        );
    }
}
