//! Debounced connectivity checks against the generation server.
//!
//! Only the most recently started check is honoured. Starting a new one
//! aborts the previous probe, which then resolves `false` without touching
//! the published [`ServerStatus`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use genctl_core::status::ServerStatus;
use genctl_core::timing::HEALTH_CHECK_TIMEOUT;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backend::HealthProbe;

/// Runs health probes and publishes the latest [`ServerStatus`].
pub struct HealthMonitor {
    probe: Arc<dyn HealthProbe>,
    timeout: Duration,
    /// Token of the check currently allowed to publish.
    current: Mutex<CancellationToken>,
    status_tx: watch::Sender<ServerStatus>,
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self::with_timeout(probe, HEALTH_CHECK_TIMEOUT)
    }

    pub fn with_timeout(probe: Arc<dyn HealthProbe>, timeout: Duration) -> Self {
        let (status_tx, _) = watch::channel(ServerStatus::default());
        Self {
            probe,
            timeout,
            current: Mutex::new(CancellationToken::new()),
            status_tx,
        }
    }

    /// Probe `endpoint`, superseding any check still in flight.
    ///
    /// Resolves `false` if the probe fails, does not answer within the
    /// timeout, or is superseded by a later call.
    pub async fn check(&self, endpoint: &str) -> bool {
        let token = CancellationToken::new();
        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            current.cancel();
            *current = token.clone();
            self.status_tx.send_replace(ServerStatus::Checking);
        }

        let available = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(endpoint, "Health check superseded");
                return false;
            }
            outcome = tokio::time::timeout(self.timeout, self.probe.health_check(endpoint)) => {
                match outcome {
                    Ok(available) => available,
                    Err(_) => {
                        tracing::warn!(
                            endpoint,
                            timeout_ms = self.timeout.as_millis() as u64,
                            "Health check timed out",
                        );
                        false
                    }
                }
            }
        };

        // Held across the supersede test and the send so a newer check
        // cannot start in between.
        let _current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            return false;
        }
        let status = ServerStatus::from_available(available);
        self.status_tx.send_replace(status);
        tracing::info!(endpoint, status = status.to_text(), "Health check finished");
        available
    }

    /// Receive every published [`ServerStatus`].
    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.status_tx.subscribe()
    }

    /// The last published status.
    pub fn status(&self) -> ServerStatus {
        *self.status_tx.borrow()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
