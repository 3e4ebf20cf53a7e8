//! Cadence, retry, and timeout constants for generation sessions.

use std::time::Duration;

/// Consecutive failed status polls tolerated before a session is failed.
pub const MAX_POLL_RETRIES: u32 = 4;

/// Poll cadence floor; shorter configured intervals are raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll cadence used when nothing is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// A connectivity probe that has not answered by now counts as "down".
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Upper bound on the best-effort remote cancel issued when a session is
/// terminated. The session reports `Terminated` either way.
pub const REMOTE_CANCEL_TIMEOUT: Duration = Duration::from_millis(5000);

/// Resolve a configured poll interval into the cadence actually used.
///
/// - `0` disables polling entirely (`None`).
/// - Anything else is clamped to at least [`MIN_POLL_INTERVAL`].
pub fn effective_poll_interval(configured: Duration) -> Option<Duration> {
    if configured.is_zero() {
        None
    } else {
        Some(configured.max(MIN_POLL_INTERVAL))
    }
}
