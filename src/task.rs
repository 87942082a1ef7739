//! Task registration and the delivery boundary.
//!
//! A [`Dispatcher`] turns a descriptor plus a handler function into an
//! [`InvocableTask`], the unit the durable queue delivers payloads to. One
//! delivery runs through up to three stages: payload canonicalization,
//! rate-limit admission, handler execution. The queue consumes the
//! resulting [`Delivery`] (or terminal error) and owns everything after
//! that: redelivery, backoff, dead-lettering.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec;
use crate::config::{DEFAULT_WINDOW_SIZE_SECONDS, DispatchLimits};
use crate::error::{
    ConfigError, DispatchError, DispatchResult, ErrorKind, RateLimitError, TaskError,
};
use crate::metrics;
use crate::rate_limit::{RateLimiter, RetryPlan};
use crate::store::CounterStore;

/// Immutable per-task configuration, created once at registration.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    /// Unique task name; also selects the execution route on the queue
    pub name: String,

    /// Handler error kinds that trigger queue-owned retry instead of
    /// terminal failure
    pub retryable_kinds: HashSet<ErrorKind>,

    /// Rate-limit window size in seconds
    pub window_size_seconds: u32,

    /// Maximum admitted calls per window; `None` disables rate limiting
    pub quota_per_window: Option<i64>,
}

impl TaskDescriptor {
    /// Descriptor with the crate-default 60 second window and no rate limit.
    ///
    /// When a dispatcher runs with custom [`DispatchLimits`], build through
    /// [`Dispatcher::descriptor`] instead so its configured default window
    /// applies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retryable_kinds: HashSet::new(),
            window_size_seconds: DEFAULT_WINDOW_SIZE_SECONDS,
            quota_per_window: None,
        }
    }

    /// Declare a handler error kind as retryable.
    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.retryable_kinds.insert(kind);
        self
    }

    /// Set the rate-limit window size in seconds.
    pub fn window_size(mut self, seconds: u32) -> Self {
        self.window_size_seconds = seconds;
        self
    }

    /// Enable rate limiting with the given quota per window.
    pub fn quota_per_window(mut self, quota: i64) -> Self {
        self.quota_per_window = Some(quota);
        self
    }
}

/// Outcome of one delivery attempt, consumed by the durable queue.
#[derive(Debug)]
pub enum Delivery {
    /// Handler ran to completion.
    Completed,

    /// Rate limited: redeliver this exact payload after `delay`. The handler
    /// did not run and this attempt is over.
    Reschedule { delay: Duration },

    /// Handler failed with a declared-retryable kind; the queue applies its
    /// own backoff before redelivering.
    Retry { error: TaskError },
}

/// Invocation boundary between the durable queue and a registered task.
pub trait QueueTask: Send + Sync {
    /// Registered task name.
    fn name(&self) -> &str;

    /// Process one delivery of `payload`.
    fn deliver(&self, payload: Value) -> BoxFuture<'_, DispatchResult<Delivery>>;
}

/// A registered task, shareable with the queue.
pub type InvocableTask = Arc<dyn QueueTask>;

type BoxHandler<T> = Box<dyn Fn(T) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

struct RegisteredTask<T, S> {
    descriptor: TaskDescriptor,
    limiter: RateLimiter<S>,
    max_retry: Duration,
    handler: BoxHandler<T>,
    /// Schema-less tasks (`T` = [`Value`]) skip the codec and pass the raw
    /// payload through untouched.
    validate: bool,
}

impl<T, S> RegisteredTask<T, S>
where
    T: DeserializeOwned + Serialize + Send + 'static,
    S: CounterStore,
{
    async fn decode_payload(&self, payload: Value) -> Result<T, DispatchError> {
        if self.validate {
            codec::decode(&payload).map_err(|source| {
                log::error!(
                    "task {}: payload validation failed: {}",
                    self.descriptor.name,
                    source
                );
                metrics::record_delivery(&self.descriptor.name, "validation_failed");
                DispatchError::Validation {
                    task: self.descriptor.name.clone(),
                    source,
                }
            })
        } else {
            // T is Value here; this is a move, not a parse
            serde_json::from_value(payload).map_err(|err| DispatchError::Validation {
                task: self.descriptor.name.clone(),
                source: crate::error::CodecError::Validation(err),
            })
        }
    }

    async fn check_rate_limit(&self, quota: i64) -> Result<Option<RetryPlan>, DispatchError> {
        let outcome = self
            .limiter
            .check_and_increment(
                &self.descriptor.name,
                self.descriptor.window_size_seconds,
                quota,
            )
            .await
            .map_err(|err| match err {
                RateLimitError::Store(source) => {
                    log::error!(
                        "task {}: counter store error: {}",
                        self.descriptor.name,
                        source
                    );
                    metrics::record_delivery(&self.descriptor.name, "infrastructure_error");
                    DispatchError::Infrastructure {
                        task: self.descriptor.name.clone(),
                        source,
                    }
                }
                RateLimitError::Config(source) => DispatchError::Config {
                    task: self.descriptor.name.clone(),
                    source,
                },
            })?;

        if outcome.admitted {
            return Ok(None);
        }

        let plan = RetryPlan::for_denial(&outcome, self.max_retry);
        log::info!(
            "task {} rate-limited: window_size={} quota={} current={}",
            self.descriptor.name,
            outcome.window_size_seconds,
            outcome.quota,
            outcome.current
        );
        metrics::record_rate_limit_denial(&self.descriptor.name);
        metrics::record_delivery(&self.descriptor.name, "rescheduled");
        Ok(Some(plan))
    }
}

impl<T, S> QueueTask for RegisteredTask<T, S>
where
    T: DeserializeOwned + Serialize + Send + 'static,
    S: CounterStore,
{
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn deliver(&self, payload: Value) -> BoxFuture<'_, DispatchResult<Delivery>> {
        Box::pin(async move {
            let decoded = self.decode_payload(payload).await?;

            if let Some(quota) = self.descriptor.quota_per_window {
                if let Some(plan) = self.check_rate_limit(quota).await? {
                    return Ok(Delivery::Reschedule { delay: plan.delay });
                }
            }

            match (self.handler)(decoded).await {
                Ok(()) => {
                    metrics::record_delivery(&self.descriptor.name, "completed");
                    Ok(Delivery::Completed)
                }
                Err(error) if self.descriptor.retryable_kinds.contains(&error.kind) => {
                    log::warn!(
                        "task {} failed with retryable {:?}: {}",
                        self.descriptor.name,
                        error.kind,
                        error.message
                    );
                    metrics::record_delivery(&self.descriptor.name, "retryable_failure");
                    Ok(Delivery::Retry { error })
                }
                Err(error) => {
                    log::error!("task {} failed terminally: {}", self.descriptor.name, error);
                    metrics::record_delivery(&self.descriptor.name, "terminal_failure");
                    Err(DispatchError::Terminal {
                        task: self.descriptor.name.clone(),
                        source: error,
                    })
                }
            }
        })
    }
}

/// Registry of tasks sharing one counter store and one set of limits.
pub struct Dispatcher<S> {
    store: Arc<S>,
    limits: DispatchLimits,
    tasks: DashMap<String, InvocableTask>,
}

impl<S: CounterStore + 'static> Dispatcher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_limits(store, DispatchLimits::default())
    }

    pub fn with_limits(store: Arc<S>, limits: DispatchLimits) -> Self {
        Self {
            store,
            limits,
            tasks: DashMap::new(),
        }
    }

    /// Register a schema-validated task.
    ///
    /// The payload type `T` is the task's schema: every delivery is parsed
    /// against it and canonicalized through the wire format before the
    /// handler runs. Fails fast when the descriptor's window size or quota
    /// is out of bounds, or the name is taken.
    pub fn register<T, F, Fut>(
        &self,
        descriptor: TaskDescriptor,
        handler: F,
    ) -> Result<InvocableTask, ConfigError>
    where
        T: DeserializeOwned + Serialize + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.insert(descriptor, handler, true)
    }

    /// Register a task without a payload schema.
    ///
    /// The raw value reaches the handler unvalidated and uncanonicalized;
    /// the codec is never invoked.
    pub fn register_unchecked<F, Fut>(
        &self,
        descriptor: TaskDescriptor,
        handler: F,
    ) -> Result<InvocableTask, ConfigError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.insert(descriptor, handler, false)
    }

    /// Descriptor seeded with this dispatcher's configured default window
    /// size.
    ///
    /// [`TaskDescriptor::new`] uses the crate-level default; go through this
    /// constructor when the dispatcher runs with custom [`DispatchLimits`].
    pub fn descriptor(&self, name: impl Into<String>) -> TaskDescriptor {
        TaskDescriptor::new(name).window_size(self.limits.default_window_size_seconds)
    }

    /// Look up a registered task by name, as a queue adapter does on delivery.
    pub fn task(&self, name: &str) -> Option<InvocableTask> {
        self.tasks.get(name).map(|task| Arc::clone(task.value()))
    }

    fn validate_descriptor(&self, descriptor: &TaskDescriptor) -> Result<(), ConfigError> {
        if descriptor.window_size_seconds == 0
            || descriptor.window_size_seconds >= self.limits.max_window_size_seconds
        {
            return Err(ConfigError::WindowSizeOutOfBounds {
                got: descriptor.window_size_seconds,
                max: self.limits.max_window_size_seconds,
            });
        }
        if let Some(quota) = descriptor.quota_per_window {
            if quota <= 0 {
                return Err(ConfigError::NonPositiveQuota { got: quota });
            }
        }
        Ok(())
    }

    fn insert<T, F, Fut>(
        &self,
        descriptor: TaskDescriptor,
        handler: F,
        validate: bool,
    ) -> Result<InvocableTask, ConfigError>
    where
        T: DeserializeOwned + Serialize + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.validate_descriptor(&descriptor)?;

        let name = descriptor.name.clone();
        let handler: BoxHandler<T> =
            Box::new(move |payload| -> BoxFuture<'static, Result<(), TaskError>> {
                Box::pin(handler(payload))
            });
        let task: InvocableTask = Arc::new(RegisteredTask {
            limiter: RateLimiter::new(Arc::clone(&self.store), self.limits),
            max_retry: Duration::from_secs(self.limits.max_retry_duration_seconds),
            descriptor,
            handler,
            validate,
        });

        match self.tasks.entry(name) {
            Entry::Occupied(slot) => Err(ConfigError::DuplicateTask(slot.key().clone())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&task));
                Ok(task)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCounterStore;

    fn dispatcher() -> Dispatcher<MemoryCounterStore> {
        Dispatcher::new(Arc::new(MemoryCounterStore::new()))
    }

    async fn noop(_payload: Value) -> Result<(), TaskError> {
        Ok(())
    }

    #[test]
    fn test_register_rejects_window_at_maximum() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .register_unchecked(TaskDescriptor::new("t").window_size(600), noop)
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::WindowSizeOutOfBounds { got: 600, max: 600 });
    }

    #[test]
    fn test_register_rejects_zero_window() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .register_unchecked(TaskDescriptor::new("t").window_size(0), noop)
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::WindowSizeOutOfBounds { got: 0, max: 600 });
    }

    #[test]
    fn test_register_accepts_window_below_maximum() {
        let dispatcher = dispatcher();
        assert!(
            dispatcher
                .register_unchecked(TaskDescriptor::new("t").window_size(599), noop)
                .is_ok()
        );
    }

    #[test]
    fn test_register_rejects_non_positive_quota() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .register_unchecked(TaskDescriptor::new("t").quota_per_window(0), noop)
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::NonPositiveQuota { got: 0 });
    }

    #[test]
    fn test_register_rejects_duplicate_name() {
        let dispatcher = dispatcher();
        dispatcher
            .register_unchecked(TaskDescriptor::new("t"), noop)
            .unwrap();
        let err = dispatcher
            .register_unchecked(TaskDescriptor::new("t"), noop)
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::DuplicateTask("t".to_string()));
    }

    #[test]
    fn test_dispatcher_descriptor_uses_configured_default_window() {
        let limits = DispatchLimits {
            default_window_size_seconds: 120,
            ..Default::default()
        };
        let dispatcher =
            Dispatcher::with_limits(Arc::new(MemoryCounterStore::new()), limits);

        let descriptor = dispatcher.descriptor("configured.default");
        assert_eq!(descriptor.window_size_seconds, 120);
        assert!(dispatcher.register_unchecked(descriptor, noop).is_ok());
    }

    #[test]
    fn test_registered_task_is_discoverable() {
        let dispatcher = dispatcher();
        dispatcher
            .register_unchecked(TaskDescriptor::new("lookup.me"), noop)
            .unwrap();
        assert!(dispatcher.task("lookup.me").is_some());
        assert!(dispatcher.task("lookup.other").is_none());
    }
}
