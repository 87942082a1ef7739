//! Prometheus metrics for dispatch observability.
//!
//! Provides counters for delivery outcomes and rate limiting; embedders
//! expose [`REGISTRY`] through whatever scrape endpoint they already run.

use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Delivery attempts by task and outcome
pub static DELIVERIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "task_deliveries_total",
            "Delivery attempts by task and outcome",
        ),
        &["task", "outcome"],
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Rate-limit denials by task
pub static RATE_LIMIT_DENIALS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "task_rate_limit_denials_total",
            "Deliveries denied by the rate limiter",
        ),
        &["task"],
    )
    .expect("metric can be created");
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Record one delivery attempt outcome.
///
/// Outcomes: `completed`, `rescheduled`, `retryable_failure`,
/// `terminal_failure`, `validation_failed`, `infrastructure_error`.
pub fn record_delivery(task: &str, outcome: &str) {
    DELIVERIES_TOTAL.with_label_values(&[task, outcome]).inc();
}

/// Record a rate-limit denial.
pub fn record_rate_limit_denial(task: &str) {
    RATE_LIMIT_DENIALS_TOTAL.with_label_values(&[task]).inc();
}
