//! Processor contract
//!
//! A processor is the handler registered for one job name in one queue.
//! Closures returning a future are processors; so is anything implementing
//! [`Processor`].

use async_trait::async_trait;
use std::future::Future;

use crate::job::{Job, JobId};
use crate::queue::Queue;

/// Boxed error returned by processors; only its message is kept
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of one processor invocation
pub type ProcessResult = Result<serde_json::Value, BoxError>;

/// Job handler
///
/// Every error is retried the same way until the job runs out of attempts.
#[async_trait]
pub trait Processor<T: Send + Sync + 'static>: Send + Sync + 'static {
    async fn process(&self, ctx: JobContext<T>) -> ProcessResult;
}

/// Adapter so plain async closures can be registered
pub(crate) struct FnProcessor<F>(pub(crate) F);

#[async_trait]
impl<T, F, Fut> Processor<T> for FnProcessor<F>
where
    T: Send + Sync + 'static,
    F: Fn(JobContext<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessResult> + Send + 'static,
{
    async fn process(&self, ctx: JobContext<T>) -> ProcessResult {
        (self.0)(ctx).await
    }
}

/// What a processor sees of the job it is running
pub struct JobContext<T> {
    job: Job<T>,
    queue: Queue<T>,
}

impl<T: Send + Sync + 'static> JobContext<T> {
    pub(crate) fn new(job: Job<T>, queue: Queue<T>) -> Self {
        Self { job, queue }
    }

    pub fn id(&self) -> &JobId {
        &self.job.id
    }

    pub fn name(&self) -> &str {
        &self.job.name
    }

    pub fn data(&self) -> &T {
        &self.job.data
    }

    /// Failed attempts before this one
    pub fn attempts(&self) -> u32 {
        self.job.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.job.max_attempts
    }

    /// Snapshot taken when this attempt started
    pub fn job(&self) -> &Job<T> {
        &self.job
    }

    /// Report progress on the owning queue. Clamped into `0..=100`.
    pub fn update_progress(&self, progress: i64) -> Option<u8> {
        self.queue.update_progress(&self.job.id, progress)
    }
}
