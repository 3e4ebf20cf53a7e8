//! Fixed-cadence status polling with bounded retry.
//!
//! [`PollScheduler::tick`] performs one poll per call. The scheduler keeps
//! the cadence baseline between calls, so the owner can drive it from a
//! `select!` loop next to other work and simply stop calling it (dropping
//! any outstanding poll) when the session ends.

use std::time::Duration;

use genctl_core::timing::{MAX_POLL_RETRIES, MIN_POLL_INTERVAL};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::{PollReport, RemoteBackend};
use crate::transport::TransportError;

/// Outcome of one [`PollScheduler::tick`].
#[derive(Debug)]
pub enum PollStep {
    /// The poll succeeded; the retry count is back to zero.
    Report(PollReport),
    /// The poll failed and will be retried on the next tick.
    Retry { attempt: u32, error: TransportError },
    /// Too many consecutive failures. The scheduler is stopped.
    Exhausted(TransportError),
    /// The cancellation token fired while waiting or polling.
    Cancelled,
}

/// Drives repeated status polls at a fixed cadence.
///
/// Each poll starts `interval` after the *start* of the previous one, or
/// immediately if the previous poll took longer than that. Polls never
/// overlap. Failed polls keep the same cadence.
#[derive(Debug)]
pub struct PollScheduler {
    interval: Duration,
    max_retries: u32,
    retries: u32,
    next_at: Instant,
    stopped: bool,
}

impl PollScheduler {
    /// Create a scheduler whose first poll is due immediately.
    ///
    /// `interval` is clamped to at least [`MIN_POLL_INTERVAL`].
    pub fn new(interval: Duration) -> Self {
        Self::with_max_retries(interval, MAX_POLL_RETRIES)
    }

    pub fn with_max_retries(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
            max_retries,
            retries: 0,
            next_at: Instant::now(),
            stopped: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Consecutive failures since the last successful poll.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Wait for the next cadence slot, then poll once.
    ///
    /// A stopped scheduler never resolves again. Dropping the returned
    /// future aborts the outstanding poll.
    pub async fn tick(
        &mut self,
        backend: &dyn RemoteBackend,
        cancel: &CancellationToken,
    ) -> PollStep {
        if self.stopped {
            return std::future::pending().await;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollStep::Cancelled,
            _ = tokio::time::sleep_until(self.next_at) => {}
        }

        let started = Instant::now();
        self.next_at = started + self.interval;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollStep::Cancelled,
            outcome = backend.poll_status() => outcome,
        };

        match outcome {
            Ok(report) => {
                self.retries = 0;
                tracing::debug!(percent = report.percent, "Status poll succeeded");
                PollStep::Report(report)
            }
            Err(error) => {
                self.retries += 1;
                if self.retries > self.max_retries {
                    self.stopped = true;
                    tracing::error!(
                        attempts = self.retries,
                        error = %error,
                        "Status polling gave up",
                    );
                    PollStep::Exhausted(error)
                } else {
                    tracing::warn!(
                        attempt = self.retries,
                        max_retries = self.max_retries,
                        error = %error,
                        "Status poll failed, retrying",
                    );
                    PollStep::Retry {
                        attempt: self.retries,
                        error,
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
