//! At-most-one-session entry point.
//!
//! [`SessionRegistry`] owns the "active session" slot. `submit` fills it,
//! the session task clears it just before publishing its terminal update,
//! and `terminate` only ever acts on the session currently in it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use genctl_core::request::GenerationRequest;
use genctl_core::types::{new_session_id, SessionId};

use crate::backend::{HealthProbe, RemoteBackend};
use crate::config::ControllerConfig;
use crate::health::HealthMonitor;
use crate::session::{Session, SessionHandle};
use crate::sink::ProgressSink;

/// `submit` was called while another session is still running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Generation session {active} is still running")]
pub struct Busy {
    pub active: SessionId,
}

/// Shared "active session" slot.
#[derive(Clone, Default)]
pub(crate) struct ActiveSlot(Arc<Mutex<Option<SessionHandle>>>);

impl ActiveSlot {
    fn lock(&self) -> MutexGuard<'_, Option<SessionHandle>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Free the slot if `handle` holds it.
    ///
    /// Returns whether termination had been requested by the time the slot
    /// was released. Cancellation through the registry happens under the
    /// same lock, so the answer cannot change afterwards.
    pub(crate) fn release(&self, handle: &SessionHandle) -> bool {
        let mut active = self.lock();
        if active.as_ref() == Some(handle) {
            *active = None;
        }
        handle.is_cancelled()
    }
}

/// Runs at most one generation session at a time against one server.
pub struct SessionRegistry {
    backend: Arc<dyn RemoteBackend>,
    health: Arc<HealthMonitor>,
    config: ControllerConfig,
    slot: ActiveSlot,
}

impl SessionRegistry {
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        probe: Arc<dyn HealthProbe>,
        config: ControllerConfig,
    ) -> Self {
        let health = Arc::new(HealthMonitor::with_timeout(probe, config.health_timeout));
        Self {
            backend,
            health,
            config,
            slot: ActiveSlot::default(),
        }
    }

    /// Start a new session for `request`, publishing its updates to `sink`.
    ///
    /// Fails fast with [`Busy`] if a session is already active; in that
    /// case nothing is submitted and `sink` receives nothing. Otherwise the
    /// `Beginning` update has been published by the time this returns.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn submit(
        &self,
        request: &GenerationRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<SessionHandle, Busy> {
        let handle = {
            let mut active = self.slot.lock();
            if let Some(current) = active.as_ref() {
                tracing::debug!(active = %current.id(), "Rejected submit, session busy");
                return Err(Busy {
                    active: current.id(),
                });
            }
            let handle = SessionHandle::new(new_session_id());
            *active = Some(handle.clone());
            handle
        };

        Session::new(
            handle.clone(),
            Arc::clone(&self.backend),
            sink,
            Arc::clone(&self.health),
            self.config.server_url.clone(),
            self.config.effective_poll_interval(),
            self.slot.clone(),
        )
        .start(request);

        Ok(handle)
    }

    /// Request cooperative cancellation of the session behind `handle`.
    ///
    /// Idempotent. Does nothing if `handle` is not the active session.
    pub fn terminate(&self, handle: &SessionHandle) {
        let active = self.slot.lock();
        match active.as_ref() {
            Some(current) if current == handle => {
                if !current.is_cancelled() {
                    tracing::info!(session_id = %current.id(), "Termination requested");
                }
                current.request_cancel();
            }
            _ => tracing::debug!(
                session_id = %handle.id(),
                "Terminate ignored, session not active",
            ),
        }
    }

    /// Handle of the running session, if any.
    pub fn active(&self) -> Option<SessionHandle> {
        self.slot.lock().clone()
    }

    /// Probe the configured server now.
    pub async fn check_health(&self) -> bool {
        self.health.check(&self.config.server_url).await
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }
}
