//! Sync configuration constants

use std::time::Duration;

/// Maximum number of retries for failed requests.
/// 5 retries with exponential backoff ride out a short portal outage
/// (max total wait ~1 minute) without stalling a 15 minute schedule.
pub const MAX_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
/// Retry 5 would be 32s, capped to 30s.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// TCP connect timeout for provider APIs
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole-request timeout for provider APIs
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for one external login driver step
pub const DRIVER_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Budget for a complete interactive login, MFA included
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(120);

/// Default overlap re-fetched before the last stored reading
pub const DEFAULT_OVERLAP_HOURS: i64 = 24;

/// Default look-back for a first (full) collection
pub const DEFAULT_PERIOD_DAYS: u32 = 7;

/// Calculate exponential backoff delay
pub fn calculate_backoff(retry_count: u32) -> Duration {
    let delay_ms = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(retry_count));
    let delay_ms = delay_ms.min(MAX_BACKOFF_MS);
    Duration::from_millis(delay_ms)
}
