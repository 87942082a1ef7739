//! Deferred task dispatch with global windowed rate limiting.
//!
//! The crate is the policy layer between an at-least-once durable queue and
//! user task handlers: payloads are canonicalized through the wire format
//! before a handler sees them, a per-task quota is enforced over fixed time
//! windows shared by every worker process, and denied deliveries come back
//! with a bounded redelivery delay instead of running.
//!
//! Register tasks on a [`Dispatcher`] backed by an atomic counter store and
//! hand the resulting [`task::InvocableTask`] values to your queue; the
//! bundled [`LocalQueue`] covers tests and single-process setups.

pub mod codec;
pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod rate_limit;
pub mod store;
pub mod task;
pub mod window;

pub use config::DispatchLimits;
pub use error::{ConfigError, DispatchError, ErrorKind, StoreError, TaskError};
pub use queue::{BackoffConfig, LocalQueue};
pub use rate_limit::{RateLimitOutcome, RateLimiter, RetryPlan};
pub use store::{CounterStore, MemoryCounterStore};
pub use task::{Delivery, Dispatcher, InvocableTask, QueueTask, TaskDescriptor};
