//! Queue registry
//!
//! Maps queue names to queues, creating them on first request. Queues are
//! never removed; the sweep only trims their job history.

use chrono::Duration as ChronoDuration;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::{ManagerConfig, QueueOptions};
use crate::error::QueueError;
use crate::queue::{Queue, QueueStats};

/// Payload-independent view of a queue, used for diagnostics and the sweep
pub trait ManagedQueue: Send + Sync {
    fn name(&self) -> &str;
    fn options(&self) -> QueueOptions;
    fn stats(&self) -> QueueStats;
    fn clean_old_jobs(&self, max_age: ChronoDuration) -> usize;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Send + Sync + 'static> ManagedQueue for Queue<T> {
    fn name(&self) -> &str {
        Queue::name(self)
    }

    fn options(&self) -> QueueOptions {
        Queue::options(self)
    }

    fn stats(&self) -> QueueStats {
        self.get_stats()
    }

    fn clean_old_jobs(&self, max_age: ChronoDuration) -> usize {
        Queue::clean_old_jobs(self, max_age)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct ManagerInner {
    config: ManagerConfig,
    queues: RwLock<HashMap<String, Arc<dyn ManagedQueue>>>,
}

/// Registry of named queues.
///
/// Construct one at startup and hand clones to whoever needs a queue.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<ManagerInner>,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl QueueManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                queues: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Get the queue called `name`, creating it with `options` if needed.
    ///
    /// Options only apply on creation; later callers get the existing queue
    /// unchanged. Asking for an existing name with another payload type is an
    /// error.
    pub fn get_queue<T: Send + Sync + 'static>(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<Queue<T>, QueueError> {
        if let Some(existing) = self.read_queues().get(name) {
            return downcast(name, existing.as_ref());
        }

        let mut queues = self
            .inner
            .queues
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Someone may have created it between the two locks.
        if let Some(existing) = queues.get(name) {
            return downcast(name, existing.as_ref());
        }

        let queue = Queue::<T>::new(name, options)?;
        queues.insert(name.to_string(), Arc::new(queue.clone()));
        Ok(queue)
    }

    /// [`Self::get_queue`] with default options
    pub fn get_queue_default<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Queue<T>, QueueError> {
        self.get_queue(name, self.inner.config.default_queue_options())
    }

    pub fn get_all_queues(&self) -> HashMap<String, Arc<dyn ManagedQueue>> {
        self.read_queues().clone()
    }

    /// Stats of every queue, keyed by name
    pub fn stats(&self) -> HashMap<String, QueueStats> {
        self.read_queues()
            .iter()
            .map(|(name, queue)| (name.clone(), queue.stats()))
            .collect()
    }

    /// Evict terminal jobs older than the configured retention from every
    /// queue. Returns the number of jobs removed.
    pub fn cleanup(&self) -> usize {
        let queues: Vec<Arc<dyn ManagedQueue>> = self.read_queues().values().cloned().collect();
        let retention = self.inner.config.retention;

        let cleaned: usize = queues
            .iter()
            .map(|queue| queue.clean_old_jobs(retention))
            .sum();

        debug!(queues = queues.len(), cleaned, "Queue sweep finished");
        cleaned
    }

    /// Run [`Self::cleanup`] every `sweep_interval` in the background.
    ///
    /// The task ends once every handle to this manager is dropped.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        let manager: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        // tokio's interval rejects a zero period
        let period = self.inner.config.sweep_interval.max(Duration::from_millis(1));

        info!(interval_secs = period.as_secs(), "Queue sweeper started");

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; nothing is old yet.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = manager.upgrade() else {
                    break;
                };
                QueueManager { inner }.cleanup();
            }
            debug!("Queue manager dropped, sweeper stopped");
        })
    }

    fn read_queues(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn ManagedQueue>>> {
        self.inner
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn downcast<T: Send + Sync + 'static>(
    name: &str,
    queue: &dyn ManagedQueue,
) -> Result<Queue<T>, QueueError> {
    queue
        .as_any()
        .downcast_ref::<Queue<T>>()
        .cloned()
        .ok_or_else(|| QueueError::payload_mismatch::<T>(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn test_first_caller_wins() {
        let manager = QueueManager::default();
        let first = manager
            .get_queue::<Value>("scoring", QueueOptions::default().with_concurrency(5))
            .unwrap();
        let second = manager
            .get_queue::<Value>("scoring", QueueOptions::default().with_max_attempts(9))
            .unwrap();

        assert_eq!(second.options().concurrency, 5);
        assert_eq!(second.options().max_attempts, 3);

        // Same underlying queue
        let job = first.add("missing", Value::Null);
        assert!(second.get_job(&job.id).is_some());
        assert_eq!(manager.get_all_queues().len(), 1);
    }

    #[tokio::test]
    async fn test_payload_mismatch() {
        let manager = QueueManager::default();
        manager.get_queue_default::<Value>("reports").unwrap();

        let err = manager.get_queue_default::<String>("reports").unwrap_err();
        assert!(matches!(err, QueueError::PayloadMismatch { ref name, .. } if name == "reports"));
    }

    #[tokio::test]
    async fn test_invalid_options_not_registered() {
        let manager = QueueManager::default();
        let result =
            manager.get_queue::<Value>("broken", QueueOptions::default().with_max_attempts(0));

        assert!(result.is_err());
        assert!(manager.get_all_queues().is_empty());
    }

    #[tokio::test]
    async fn test_get_all_queues_exposes_stats() {
        let manager = QueueManager::default();
        let queue = manager.get_queue_default::<Value>("sync").unwrap();
        queue.add("pull", Value::Null);

        let all = manager.get_all_queues();
        let sync = all.get("sync").expect("queue registered");
        assert_eq!(sync.name(), "sync");
        assert_eq!(sync.stats().total, 1);
        assert_eq!(manager.stats()["sync"].total, 1);
    }
}
