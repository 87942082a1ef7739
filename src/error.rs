//! Error types for the dispatch layer.
//!
//! This module defines strongly-typed errors for better error handling
//! and more informative error messages. The split matters operationally:
//! configuration errors are fatal at registration, codec and handler errors
//! belong to a single delivery, and store errors are infrastructure.

use thiserror::Error;

/// Classification of handler failures.
///
/// Each task declares at registration which kinds trigger queue-owned retry;
/// every other kind is a terminal failure for the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network-level failure reaching an upstream service
    Network,
    /// Upstream service responded with a transient error
    ExternalService,
    /// Storage-layer failure
    Storage,
    /// Operation exceeded its deadline
    Timeout,
    /// Payload or state was invalid for the operation
    Invalid,
    /// Anything else
    Other,
}

/// Error returned by task handlers.
#[derive(Error, Debug)]
#[error("{kind:?}: {message}")]
pub struct TaskError {
    /// Kind used for retry classification against the task descriptor.
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Invalid registration parameters. Fatal at registration time; the task is
/// never registered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window size must be between 1 and {max} seconds exclusive, got {got}")]
    WindowSizeOutOfBounds { got: u32, max: u32 },

    #[error("quota per window must be above 0, got {got}")]
    NonPositiveQuota { got: i64 },

    #[error("task already registered: {0}")]
    DuplicateTask(String),
}

/// Counter store failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("counter store unreachable: {0}")]
    Unreachable(String),

    #[error("counter store protocol error: {0}")]
    Protocol(String),
}

/// Rate limiter failure modes.
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Payload codec failure.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Payload does not conform to the task's schema.
    #[error("payload does not match schema: {0}")]
    Validation(#[source] serde_json::Error),

    /// Parsed payload could not be written back to the wire format.
    #[error("payload could not be serialized: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Terminal failure of a single delivery.
///
/// A rate-limit denial is never an error; it surfaces as
/// [`Delivery::Reschedule`](crate::task::Delivery::Reschedule) instead.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Payload failed schema validation. The handler never runs.
    #[error("payload validation failed for task {task}: {source}")]
    Validation {
        task: String,
        #[source]
        source: CodecError,
    },

    /// Rate limit invoked with configuration that should have been rejected
    /// at registration.
    #[error("invalid rate limit configuration for task {task}: {source}")]
    Config {
        task: String,
        #[source]
        source: ConfigError,
    },

    /// Counter store unreachable. Rate limiting fails closed: the handler
    /// does not run and the queue redelivers under its own policy.
    #[error("rate limiter infrastructure error for task {task}: {source}")]
    Infrastructure {
        task: String,
        #[source]
        source: StoreError,
    },

    /// Handler error whose kind the task did not declare retryable.
    #[error("task {task} failed terminally: {source}")]
    Terminal {
        task: String,
        #[source]
        source: TaskError,
    },
}

/// Result type alias for delivery processing.
pub type DispatchResult<T> = Result<T, DispatchError>;
