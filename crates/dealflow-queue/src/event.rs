//! Queue event stream

use crate::job::{Job, JobError};

/// Lifecycle notification. Each event carries the job as it was right after
/// the transition.
#[derive(Debug)]
pub enum QueueEvent<T> {
    /// An attempt started
    Active { job: Job<T> },
    /// A processor reported progress
    Progress { job: Job<T>, progress: u8 },
    /// The job finished successfully
    Completed {
        job: Job<T>,
        result: serde_json::Value,
    },
    /// The job ran out of attempts
    Failed { job: Job<T>, error: JobError },
}

impl<T> Clone for QueueEvent<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Active { job } => Self::Active { job: job.clone() },
            Self::Progress { job, progress } => Self::Progress {
                job: job.clone(),
                progress: *progress,
            },
            Self::Completed { job, result } => Self::Completed {
                job: job.clone(),
                result: result.clone(),
            },
            Self::Failed { job, error } => Self::Failed {
                job: job.clone(),
                error: error.clone(),
            },
        }
    }
}

impl<T> QueueEvent<T> {
    pub fn job(&self) -> &Job<T> {
        match self {
            Self::Active { job }
            | Self::Progress { job, .. }
            | Self::Completed { job, .. }
            | Self::Failed { job, .. } => job,
        }
    }

    /// Event name as observers know it
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Active { .. } => "active",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}
