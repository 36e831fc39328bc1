//! The deal-flow platform's standard queues
//!
//! Scoring, data sync and report generation each get their own queue. Sync
//! talks to flaky upstream sources, so it gets more attempts.

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::event::QueueEvent;
use crate::manager::QueueManager;
use crate::queue::Queue;

pub const SCORING_QUEUE: &str = "scoring-jobs";
pub const SYNC_QUEUE: &str = "sync-jobs";
pub const REPORT_QUEUE: &str = "report-jobs";

/// Handles to the three standard queues
#[derive(Debug, Clone)]
pub struct StandardQueues {
    pub scoring: Queue<Value>,
    pub sync: Queue<Value>,
    pub report: Queue<Value>,
}

impl StandardQueues {
    /// Create (or fetch) the standard queues from `manager`.
    pub fn init(manager: &QueueManager) -> Result<Self, QueueError> {
        let base = manager.config().default_queue_options();
        Ok(Self {
            scoring: manager.get_queue(SCORING_QUEUE, base.with_max_attempts(3))?,
            sync: manager.get_queue(SYNC_QUEUE, base.with_max_attempts(5))?,
            report: manager.get_queue(REPORT_QUEUE, base.with_max_attempts(3))?,
        })
    }

    pub fn all(&self) -> [&Queue<Value>; 3] {
        [&self.scoring, &self.sync, &self.report]
    }

    /// Attach an event logger to each queue.
    pub fn spawn_event_loggers(&self) -> Vec<JoinHandle<()>> {
        self.all().into_iter().map(spawn_event_logger).collect()
    }
}

/// Log terminal events of `queue` until the queue goes away.
pub fn spawn_event_logger<T: Send + Sync + 'static>(queue: &Queue<T>) -> JoinHandle<()> {
    let name = queue.name().to_string();
    let mut events = queue.subscribe();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(QueueEvent::Completed { job, result }) => {
                    info!(queue = %name, job_id = %job.id, job_name = %job.name, result = %result, "Job completed");
                }
                Ok(QueueEvent::Failed { job, error }) => {
                    error!(queue = %name, job_id = %job.id, job_name = %job.name, error = %error, "Job failed");
                }
                Ok(event) => {
                    debug!(queue = %name, job_id = %event.job().id, event = event.kind(), "Job event");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(queue = %name, skipped, "Event logger lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
