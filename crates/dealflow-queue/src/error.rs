//! Queue error types
//!
//! Only programmer and configuration mistakes surface here. A failing job is
//! not an error of the queue: it ends up in the job's `error` field and in a
//! `failed` event.

use std::any::type_name;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
    #[error("Queue \"{0}\" must be created inside a Tokio runtime")]
    NoRuntime(String),
    #[error("Queue \"{name}\" already exists with a different payload type (requested {requested})")]
    PayloadMismatch {
        name: String,
        requested: &'static str,
    },
}

impl QueueError {
    pub(crate) fn payload_mismatch<T>(name: &str) -> Self {
        Self::PayloadMismatch {
            name: name.to_string(),
            requested: type_name::<T>(),
        }
    }
}

/// Error types for environment configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: String, value: String },
}
