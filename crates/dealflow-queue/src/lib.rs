//! # Dealflow Queue
//!
//! In-process async job queue for the deal-flow platform's background work
//! (deal scoring, data-source sync, report generation).
//!
//! Features:
//! - Named queues with one processor per job name
//! - Bounded concurrency per queue
//! - Retry by requeueing at the tail, up to `max_attempts`
//! - Progress reporting and a per-queue event stream
//! - A registry of queues with a periodic sweep of old finished jobs
//!
//! Jobs live in memory only. Nothing survives a restart, and a started
//! attempt cannot be cancelled or timed out.
//!
//! ```no_run
//! use dealflow_queue::{ProcessResult, QueueManager, QueueOptions};
//! use serde_json::{json, Value};
//!
//! # async fn run() -> Result<(), dealflow_queue::QueueError> {
//! let manager = QueueManager::default();
//! let queue = manager.get_queue::<Value>("scoring-jobs", QueueOptions::default())?;
//!
//! queue.process("score-deal", |ctx| async move {
//!     ctx.update_progress(50);
//!     ProcessResult::Ok(json!({ "deal": ctx.data()["deal"].clone() }))
//! });
//!
//! let job = queue.add("score-deal", json!({ "deal": "X" }));
//! println!("{:?}", queue.get_job_status(&job.id));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod job;
pub mod manager;
pub mod processor;
pub mod queue;
pub mod queues;

pub use config::{ManagerConfig, QueueOptions};
pub use error::{ConfigError, QueueError};
pub use event::QueueEvent;
pub use job::{Job, JobError, JobId, JobStatus, JobStatusView};
pub use manager::{ManagedQueue, QueueManager};
pub use processor::{BoxError, JobContext, ProcessResult, Processor};
pub use queue::{Queue, QueueStats};
pub use queues::{spawn_event_logger, StandardQueues};
