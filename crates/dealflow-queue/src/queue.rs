//! Named job queue with bounded concurrency
//!
//! Each queue owns its job table, a FIFO of waiting ids and the set of
//! active ids, all behind one mutex that is never held across an await.
//! A single dispatcher task per queue starts waiting jobs while slots are
//! free; every enqueue and every settled attempt wakes it again, so the
//! queue drains without an external driver loop.
//!
//! There is no cancellation and no timeout: once an attempt starts it runs
//! until the processor returns.

use chrono::{Duration as ChronoDuration, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

use crate::config::QueueOptions;
use crate::error::QueueError;
use crate::event::QueueEvent;
use crate::job::{FailureOutcome, Job, JobError, JobId, JobStatus, JobStatusView};
use crate::processor::{FnProcessor, JobContext, ProcessResult, Processor};

/// Job counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

struct QueueState<T> {
    jobs: HashMap<JobId, Job<T>>,
    waiting: VecDeque<JobId>,
    active: HashSet<JobId>,
}

struct QueueInner<T> {
    name: String,
    options: QueueOptions,
    state: Mutex<QueueState<T>>,
    processors: RwLock<HashMap<String, Arc<dyn Processor<T>>>>,
    events: broadcast::Sender<QueueEvent<T>>,
    wake: Arc<Notify>,
}

impl<T> QueueInner<T> {
    // State updates are single assignments, so a panic elsewhere can't leave
    // them half-applied; recover the guard instead of propagating poison.
    fn lock_state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for QueueInner<T> {
    fn drop(&mut self) {
        // Lets the dispatcher notice the queue is gone.
        self.wake.notify_one();
    }
}

/// Handle to a named queue. Clones share the same queue.
pub struct Queue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.inner.name)
            .field("options", &self.inner.options)
            .finish()
    }
}

impl<T: Send + Sync + 'static> Queue<T> {
    /// Create a queue and start its dispatcher on the current Tokio runtime.
    pub fn new(name: impl Into<String>, options: QueueOptions) -> Result<Self, QueueError> {
        let name = name.into();
        options.validate()?;
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime(name.clone()))?;

        let (events, _) = broadcast::channel(options.event_capacity);
        let wake = Arc::new(Notify::new());
        let inner = Arc::new(QueueInner {
            name,
            options,
            state: Mutex::new(QueueState {
                jobs: HashMap::new(),
                waiting: VecDeque::new(),
                active: HashSet::new(),
            }),
            processors: RwLock::new(HashMap::new()),
            events,
            wake: Arc::clone(&wake),
        });

        runtime.spawn(dispatch_loop(Arc::downgrade(&inner), wake));

        info!(
            queue = %inner.name,
            concurrency = options.concurrency,
            max_attempts = options.max_attempts,
            "Queue initialized"
        );

        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> QueueOptions {
        self.inner.options
    }

    /// Register an async closure as the processor for `job_name`.
    ///
    /// Registering the same name twice replaces the earlier processor.
    pub fn process<F, Fut>(&self, job_name: impl Into<String>, handler: F)
    where
        F: Fn(JobContext<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcessResult> + Send + 'static,
    {
        self.register(job_name, FnProcessor(handler));
    }

    /// Register a [`Processor`] implementation for `job_name`.
    pub fn register<P: Processor<T>>(&self, job_name: impl Into<String>, processor: P) {
        let job_name = job_name.into();
        let previous = self
            .inner
            .processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_name.clone(), Arc::new(processor));

        if previous.is_some() {
            warn!(queue = %self.inner.name, job_name = %job_name, "Processor replaced");
        } else {
            info!(queue = %self.inner.name, job_name = %job_name, "Processor registered");
        }
    }

    /// Enqueue a job. Returns the new record right away; it runs later.
    pub fn add(&self, job_name: impl Into<String>, data: T) -> Job<T> {
        let job = Job::new(
            &self.inner.name,
            job_name,
            data,
            self.inner.options.max_attempts,
        );
        let snapshot = job.clone();

        {
            let mut state = self.inner.lock_state();
            state.waiting.push_back(job.id.clone());
            state.jobs.insert(job.id.clone(), job);
        }

        debug!(queue = %self.inner.name, job_id = %snapshot.id, job_name = %snapshot.name, "Job added");
        self.inner.wake.notify_one();
        snapshot
    }

    pub fn get_job(&self, id: &JobId) -> Option<Job<T>> {
        self.inner.lock_state().jobs.get(id).cloned()
    }

    pub fn get_job_status(&self, id: &JobId) -> Option<JobStatusView> {
        self.inner.lock_state().jobs.get(id).map(Job::status_view)
    }

    /// Every retained job, oldest first
    pub fn get_all_jobs(&self) -> Vec<Job<T>> {
        self.collect_jobs(|_| true)
    }

    pub fn get_jobs_by_name(&self, job_name: &str) -> Vec<Job<T>> {
        self.collect_jobs(|job| job.name == job_name)
    }

    pub fn get_jobs_by_status(&self, status: JobStatus) -> Vec<Job<T>> {
        self.collect_jobs(|job| job.status == status)
    }

    fn collect_jobs(&self, filter: impl Fn(&Job<T>) -> bool) -> Vec<Job<T>> {
        let mut jobs: Vec<Job<T>> = self
            .inner
            .lock_state()
            .jobs
            .values()
            .filter(|job| filter(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Store a progress report and emit `progress`.
    ///
    /// Not restricted to active jobs; a processor may report at any time.
    /// Returns the stored (clamped) value, or `None` for an unknown id.
    pub fn update_progress(&self, id: &JobId, progress: i64) -> Option<u8> {
        let (job, stored) = {
            let mut state = self.inner.lock_state();
            let job = state.jobs.get_mut(id)?;
            let stored = job.set_progress(progress);
            (job.clone(), stored)
        };

        self.emit(QueueEvent::Progress {
            job,
            progress: stored,
        });
        Some(stored)
    }

    pub fn get_stats(&self) -> QueueStats {
        let state = self.inner.lock_state();
        let mut stats = QueueStats {
            total: state.jobs.len(),
            ..QueueStats::default()
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Waiting => stats.waiting += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Drop terminal jobs that finished more than `max_age` ago.
    ///
    /// Waiting and active jobs are kept regardless of age. An age reaching
    /// past the earliest representable time removes nothing.
    pub fn clean_old_jobs(&self, max_age: ChronoDuration) -> usize {
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return 0;
        };
        let cleaned = {
            let mut state = self.inner.lock_state();
            let before = state.jobs.len();
            state.jobs.retain(|_, job| {
                !(job.is_terminal() && job.completed_at.is_some_and(|done| done < cutoff))
            });
            before - state.jobs.len()
        };

        if cleaned > 0 {
            info!(queue = %self.inner.name, cleaned, "Cleaned old jobs");
        }
        cleaned
    }

    /// Listen to this queue's lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent<T>> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: QueueEvent<T>) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Start waiting jobs until the queue is out of slots or work.
    fn dispatch_ready(&self) {
        loop {
            let job = {
                let mut guard = self.inner.lock_state();
                let state = &mut *guard;
                if state.active.len() >= self.inner.options.concurrency {
                    return;
                }
                let Some(id) = state.waiting.pop_front() else {
                    return;
                };
                let Some(job) = state.jobs.get_mut(&id) else {
                    continue;
                };
                job.start();
                state.active.insert(id);
                job.clone()
            };

            debug!(
                queue = %self.inner.name,
                job_id = %job.id,
                job_name = %job.name,
                attempt = job.attempts + 1,
                "Job started"
            );
            self.emit(QueueEvent::Active { job: job.clone() });
            tokio::spawn(self.clone().run_attempt(job));
        }
    }

    async fn run_attempt(self, job: Job<T>) {
        let id = job.id.clone();
        let processor = self
            .inner
            .processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job.name)
            .cloned();

        let outcome = match processor {
            Some(processor) => {
                let ctx = JobContext::new(job, self.clone());
                match AssertUnwindSafe(processor.process(ctx)).catch_unwind().await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => Err(JobError::Processor(e.to_string())),
                    Err(panic) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
                }
            }
            None => Err(JobError::NoProcessor(job.name.clone())),
        };

        self.settle(&id, outcome);
        self.inner.wake.notify_one();
    }

    fn settle(&self, id: &JobId, outcome: Result<serde_json::Value, JobError>) {
        let event = {
            let mut guard = self.inner.lock_state();
            let state = &mut *guard;
            state.active.remove(id);
            let Some(job) = state.jobs.get_mut(id) else {
                return;
            };

            match outcome {
                Ok(result) => {
                    job.complete(result.clone());
                    info!(queue = %self.inner.name, job_id = %id, job_name = %job.name, "Job completed");
                    Some(QueueEvent::Completed {
                        job: job.clone(),
                        result,
                    })
                }
                Err(failure) => match job.fail(&failure) {
                    FailureOutcome::Requeued => {
                        warn!(
                            queue = %self.inner.name,
                            job_id = %id,
                            attempt = job.attempts,
                            max_attempts = job.max_attempts,
                            error = %failure,
                            "Job failed, retrying"
                        );
                        state.waiting.push_back(id.clone());
                        None
                    }
                    FailureOutcome::Exhausted => {
                        error!(
                            queue = %self.inner.name,
                            job_id = %id,
                            job_name = %job.name,
                            attempts = job.attempts,
                            error = %failure,
                            "Job failed permanently"
                        );
                        Some(QueueEvent::Failed {
                            job: job.clone(),
                            error: failure,
                        })
                    }
                },
            }
        };

        if let Some(event) = event {
            self.emit(event);
        }
    }
}

async fn dispatch_loop<T: Send + Sync + 'static>(queue: Weak<QueueInner<T>>, wake: Arc<Notify>) {
    loop {
        match queue.upgrade() {
            Some(inner) => Queue { inner }.dispatch_ready(),
            None => break,
        }
        wake.notified().await;
    }
    debug!("Queue dropped, dispatcher stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
