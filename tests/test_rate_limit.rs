//! Rate limiter behavior across concurrent callers and whole windows.

use std::sync::Arc;
use std::time::Duration;

use task_dispatch::config::DispatchLimits;
use task_dispatch::rate_limit::{RateLimiter, RetryPlan};
use task_dispatch::store::MemoryCounterStore;

fn shared_limiter() -> Arc<RateLimiter<MemoryCounterStore>> {
    Arc::new(RateLimiter::new(
        Arc::new(MemoryCounterStore::new()),
        DispatchLimits::default(),
    ))
}

#[tokio::test]
async fn test_exactly_quota_admitted_under_concurrency() {
    let _ = env_logger::builder().is_test(true).try_init();
    let limiter = shared_limiter();

    // 100 concurrent calls racing on one fresh window, quota 50: the shared
    // counter must not lose updates, so exactly 50 are admitted
    let mut handles = Vec::new();
    for _ in 0..100 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move {
            limiter
                .check_and_increment("concurrent.send", 300, 50)
                .await
                .unwrap()
        }));
    }

    let mut admitted = 0;
    let mut seen_counts = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap();
        if outcome.admitted {
            admitted += 1;
        }
        seen_counts.push(outcome.current);
    }

    assert_eq!(admitted, 50);
    seen_counts.sort_unstable();
    let expected: Vec<i64> = (1..=100).collect();
    assert_eq!(seen_counts, expected);
}

#[tokio::test]
async fn test_eleventh_call_outcome_matches_reference_scenario() {
    let limiter = shared_limiter();

    for call in 1..=10 {
        let outcome = limiter
            .check_and_increment("notify.send", 60, 10)
            .await
            .unwrap();
        assert!(outcome.admitted, "call {call} should be admitted");
    }

    let denied = limiter
        .check_and_increment("notify.send", 60, 10)
        .await
        .unwrap();
    assert!(!denied.admitted);
    assert_eq!(denied.current, 11);
    assert_eq!(denied.quota, 10);
    assert_eq!(denied.calls_over_limit(), 1);

    let plan = RetryPlan::for_denial(&denied, Duration::from_secs(1200));
    assert_eq!(plan.delay, Duration::from_secs(60));
}

#[tokio::test]
async fn test_twenty_fifth_call_skips_two_windows() {
    let limiter = shared_limiter();

    let mut last = None;
    for _ in 0..25 {
        last = Some(
            limiter
                .check_and_increment("notify.burst", 60, 10)
                .await
                .unwrap(),
        );
    }

    let denied = last.unwrap();
    assert_eq!(denied.current, 25);
    assert_eq!(denied.calls_over_limit(), 15);

    let plan = RetryPlan::for_denial(&denied, Duration::from_secs(1200));
    assert_eq!(plan.delay, Duration::from_secs(120));
}

#[tokio::test]
async fn test_tasks_do_not_share_counters() {
    let limiter = shared_limiter();

    let first = limiter
        .check_and_increment("left.task", 300, 1)
        .await
        .unwrap();
    let second = limiter
        .check_and_increment("right.task", 300, 1)
        .await
        .unwrap();

    assert!(first.admitted);
    assert!(second.admitted);
    assert_eq!(second.current, 1);
}
