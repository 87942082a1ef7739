//! Minimal in-process delivery queue.
//!
//! The deployment target is an external at-least-once queue; this one exists
//! so embedders and the integration tests can run the complete
//! submitted -> rate-limited -> delayed -> running state machine without
//! infrastructure. Delayed redeliveries are tokio sleeps, so submissions do
//! not survive the process.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::error::DispatchError;
use crate::task::{Delivery, InvocableTask};

/// Queue-owned backoff for retryable handler failures.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// First retry delay
    pub base: Duration,

    /// Upper bound on any backoff delay
    pub cap: Duration,

    /// Give up after this many delivery attempts of one submission
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
            max_attempts: 10,
        }
    }
}

impl BackoffConfig {
    /// Exponential delay for the given zero-based attempt number.
    fn delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.cap)
    }
}

struct Submission {
    task: InvocableTask,
    payload: Value,
    /// Attempts consumed by handler failures. Rate-limit reschedules
    /// redeliver the same attempt, they do not burn one.
    attempt: u32,
    submitted_at: DateTime<Utc>,
}

/// In-process at-least-once queue driving registered tasks.
pub struct LocalQueue {
    tx: mpsc::UnboundedSender<Submission>,
    shutdown: watch::Sender<bool>,
    worker: tokio::task::JoinHandle<()>,
}

impl LocalQueue {
    /// Start the worker loop on the current tokio runtime.
    pub fn start(backoff: BackoffConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(worker_loop(rx, tx.clone(), shutdown_rx, backoff));
        Self {
            tx,
            shutdown: shutdown_tx,
            worker,
        }
    }

    /// Submit one payload for asynchronous delivery.
    pub fn submit(&self, task: InvocableTask, payload: Value) {
        let submission = Submission {
            task,
            payload,
            attempt: 0,
            submitted_at: Utc::now(),
        };
        if self.tx.send(submission).is_err() {
            log::warn!("local queue closed, dropping submission");
        }
    }

    /// Stop accepting deliveries and wait for the worker loop to exit.
    ///
    /// In-flight deliveries finish on their own spawned tasks; redeliveries
    /// they schedule afterwards go nowhere.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.worker.await;
    }
}

async fn worker_loop(
    mut rx: mpsc::UnboundedReceiver<Submission>,
    tx: mpsc::UnboundedSender<Submission>,
    mut shutdown: watch::Receiver<bool>,
    backoff: BackoffConfig,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                log::info!("local queue: shutdown signal received, exiting");
                return;
            }
            msg = rx.recv() => {
                let Some(submission) = msg else { return };
                let tx = tx.clone();
                // every delivery runs on its own task, like an independent worker
                tokio::spawn(deliver_once(submission, tx, backoff));
            }
        }
    }
}

async fn deliver_once(
    submission: Submission,
    tx: mpsc::UnboundedSender<Submission>,
    backoff: BackoffConfig,
) {
    let Submission {
        task,
        payload,
        attempt,
        submitted_at,
    } = submission;

    let outcome = task.deliver(payload.clone()).await;
    let age_ms = Utc::now()
        .signed_duration_since(submitted_at)
        .num_milliseconds();

    match outcome {
        Ok(Delivery::Completed) => {
            log::debug!("task {}: completed after {}ms in queue", task.name(), age_ms);
        }
        Ok(Delivery::Reschedule { delay }) => {
            log::debug!("task {}: redelivery in {:?}", task.name(), delay);
            requeue(task, payload, attempt, submitted_at, delay, tx).await;
        }
        Ok(Delivery::Retry { error }) => {
            let attempts_used = attempt + 1;
            if attempts_used >= backoff.max_attempts {
                log::error!(
                    "task {}: giving up after {} attempts: {}",
                    task.name(),
                    attempts_used,
                    error
                );
                return;
            }
            let delay = backoff.delay(attempt);
            log::debug!(
                "task {}: retry {} in {:?} after {}",
                task.name(),
                attempts_used,
                delay,
                error
            );
            requeue(task, payload, attempts_used, submitted_at, delay, tx).await;
        }
        Err(DispatchError::Infrastructure { task: name, source }) => {
            // fail closed: the handler did not run, redeliver under our policy
            let attempts_used = attempt + 1;
            if attempts_used >= backoff.max_attempts {
                log::error!("task {name}: giving up after store errors: {source}");
                return;
            }
            requeue(
                task,
                payload,
                attempts_used,
                submitted_at,
                backoff.delay(attempt),
                tx,
            )
            .await;
        }
        Err(err) => {
            // terminal: already logged at the dispatch boundary, drop it
            log::error!("task {}: dropping failed delivery: {}", task.name(), err);
        }
    }
}

async fn requeue(
    task: InvocableTask,
    payload: Value,
    attempt: u32,
    submitted_at: DateTime<Utc>,
    delay: Duration,
    tx: mpsc::UnboundedSender<Submission>,
) {
    tokio::time::sleep(delay).await;
    let submission = Submission {
        task,
        payload,
        attempt,
        submitted_at,
    };
    if tx.send(submission).is_err() {
        log::debug!("local queue closed during redelivery delay");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let backoff = BackoffConfig {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(8),
            max_attempts: 10,
        };
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(20), Duration::from_secs(8));
    }
}
