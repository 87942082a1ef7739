//! Dispatch limits and their environment overrides.
//!
//! Provides typed configuration loaded from environment variables with validation.

/// Exclusive upper bound on a rate-limit window size, in seconds.
///
/// Together with [`MAX_RETRY_DURATION_SECONDS`] this keeps a rescheduled
/// delivery inside the time the durable queue is willing to hold an
/// unacknowledged message in worker memory. Window sizes at or above this
/// bound are rejected at registration time, not at call time.
pub const MAX_WINDOW_SIZE_SECONDS: u32 = 600;

/// Cap on any computed redelivery delay, in seconds.
pub const MAX_RETRY_DURATION_SECONDS: u64 = 1200;

/// Window size applied when a descriptor does not set one.
pub const DEFAULT_WINDOW_SIZE_SECONDS: u32 = 60;

/// Hard limits on rate-limit windows and retry scheduling.
#[derive(Debug, Clone, Copy)]
pub struct DispatchLimits {
    /// Exclusive upper bound on a task's window size
    pub max_window_size_seconds: u32,

    /// Cap on any computed redelivery delay
    pub max_retry_duration_seconds: u64,

    /// Window size used when a descriptor does not set one
    pub default_window_size_seconds: u32,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self {
            max_window_size_seconds: MAX_WINDOW_SIZE_SECONDS,
            max_retry_duration_seconds: MAX_RETRY_DURATION_SECONDS,
            default_window_size_seconds: DEFAULT_WINDOW_SIZE_SECONDS,
        }
    }
}

impl DispatchLimits {
    /// Load limits from environment variables.
    ///
    /// Optional environment variables:
    /// - `DISPATCH_MAX_WINDOW_SIZE_SECS`: Exclusive window size bound (default: 600)
    /// - `DISPATCH_MAX_RETRY_DURATION_SECS`: Redelivery delay cap (default: 1200)
    /// - `DISPATCH_DEFAULT_WINDOW_SIZE_SECS`: Default window size (default: 60)
    pub fn from_env() -> Result<Self, LimitsError> {
        let limits = Self {
            max_window_size_seconds: parse_env_or(
                "DISPATCH_MAX_WINDOW_SIZE_SECS",
                MAX_WINDOW_SIZE_SECONDS,
            )?,
            max_retry_duration_seconds: parse_env_or(
                "DISPATCH_MAX_RETRY_DURATION_SECS",
                MAX_RETRY_DURATION_SECONDS,
            )?,
            default_window_size_seconds: parse_env_or(
                "DISPATCH_DEFAULT_WINDOW_SIZE_SECS",
                DEFAULT_WINDOW_SIZE_SECONDS,
            )?,
        };

        if limits.max_window_size_seconds == 0 {
            return Err(LimitsError {
                field: "DISPATCH_MAX_WINDOW_SIZE_SECS".to_string(),
                message: "must be above 0".to_string(),
            });
        }
        if limits.default_window_size_seconds == 0
            || limits.default_window_size_seconds >= limits.max_window_size_seconds
        {
            return Err(LimitsError {
                field: "DISPATCH_DEFAULT_WINDOW_SIZE_SECS".to_string(),
                message: format!(
                    "must be between 1 and {} exclusive",
                    limits.max_window_size_seconds
                ),
            });
        }

        Ok(limits)
    }
}

/// Configuration loading error.
#[derive(Debug)]
pub struct LimitsError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LimitsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error in {}: {}", self.field, self.message)
    }
}

impl std::error::Error for LimitsError {}

/// Parse an environment variable, falling back to a default when unset.
fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, LimitsError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| LimitsError {
            field: key.to_string(),
            message: format!("could not parse value: {raw}"),
        }),
        Err(_) => Ok(default),
    }
}
