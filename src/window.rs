//! Window key derivation for the rate limiter.
//!
//! Rate limiting counts task calls inside fixed, time-aligned windows. With a
//! window size of 60 seconds, every call during a given minute shares one
//! counter. The window index is the unix timestamp divided by the window size,
//! so every worker process derives the same key for the same instant without
//! any coordination.

use std::time::{SystemTime, UNIX_EPOCH};

/// Namespace prefix shared by all counter keys.
pub const KEY_NAMESPACE: &str = "dispatch:bucket";

/// Current unix time in whole seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Derive the counter key for `name` in the window containing `now_unix`.
///
/// `window_size_seconds` must be positive and below the configured maximum;
/// callers validate bounds at registration time, before any key is derived.
pub fn window_key_at(name: &str, window_size_seconds: u32, now_unix: u64) -> String {
    let index = now_unix / u64::from(window_size_seconds);
    format!("{KEY_NAMESPACE}:{name}:{window_size_seconds}:{index}")
}

/// Derive the counter key for `name` in the current window.
pub fn window_key(name: &str, window_size_seconds: u32) -> String {
    window_key_at(name, window_size_seconds, unix_now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_window_same_key() {
        // 1_000_000 / 60 == 16_666; both instants sit inside that minute
        let a = window_key_at("notify.send", 60, 1_000_000);
        let b = window_key_at("notify.send", 60, 1_000_019);
        assert_eq!(a, b);
    }

    #[test]
    fn test_window_boundary_changes_key() {
        let before = window_key_at("notify.send", 60, 16_666 * 60 + 59);
        let after = window_key_at("notify.send", 60, 16_667 * 60);
        assert_ne!(before, after);
    }

    #[test]
    fn test_key_layout() {
        let key = window_key_at("notify.send", 60, 1_000_000);
        assert_eq!(key, "dispatch:bucket:notify.send:60:16666");
    }

    #[test]
    fn test_index_monotonic() {
        let mut previous = 0;
        for now in (0..100_000).step_by(7) {
            let key = window_key_at("t", 30, now);
            let index: u64 = key.rsplit(':').next().unwrap().parse().unwrap();
            assert!(index >= previous);
            previous = index;
        }
    }

    #[test]
    fn test_tasks_and_window_sizes_do_not_collide() {
        let now = 1_000_000;
        assert_ne!(
            window_key_at("notify.send", 60, now),
            window_key_at("notify.retry", 60, now)
        );
        assert_ne!(
            window_key_at("notify.send", 60, now),
            window_key_at("notify.send", 120, now)
        );
    }
}
