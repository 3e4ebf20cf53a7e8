//! One generation session, from submission to a terminal status.
//!
//! A session runs as a single spawned task. Every status update after
//! `Beginning` is published from that task, so the sink never sees two
//! updates of the same session concurrently. The task composes four event
//! sources in one biased `select!` loop, in priority order:
//!
//! 1. the session's cancellation token,
//! 2. upload progress from the transport,
//! 3. the final response,
//! 4. the upload-completed signal,
//! 5. the next status poll (only while generating with polling enabled).
//!
//! Leaving the loop drops the transfer's abort guard and any outstanding
//! poll, so every exit path releases the in-flight request. A session
//! task that panics (in the sink or the backend) is still settled by a
//! supervisor, which frees the registry slot and ends the session
//! `Terminated`.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use genctl_core::artifact::{Artifact, ArtifactError};
use genctl_core::request::GenerationRequest;
use genctl_core::status::{Phase, StatusUpdate};
use genctl_core::timing::REMOTE_CANCEL_TIMEOUT;
use genctl_core::types::SessionId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::RemoteBackend;
use crate::health::HealthMonitor;
use crate::poll::{PollScheduler, PollStep};
use crate::registry::ActiveSlot;
use crate::sink::ProgressSink;
use crate::transport::{RemoteResponse, Transfer, TransportError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unrecoverable session failures. Each one ends the session `Terminated`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The request body could not be delivered.
    #[error("Upload failed: {0}")]
    Upload(#[source] TransportError),

    /// The body was delivered but the connection failed before a response.
    #[error("No response from server: {0}")]
    Response(#[source] TransportError),

    #[error("Server answered with HTTP {status}")]
    NonSuccessStatus { status: u16 },

    /// A response arrived but its body is not a readable image.
    #[error("Server returned an unreadable artifact: {0}")]
    MalformedArtifact(#[from] ArtifactError),

    #[error("Status polling failed {attempts} times in a row: {source}")]
    PollRetriesExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Caller-side reference to a session returned by
/// [`SessionRegistry::submit`](crate::registry::SessionRegistry::submit).
///
/// Handles compare equal when they refer to the same session.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    cancel: CancellationToken,
    phase: Arc<watch::Sender<Phase>>,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId) -> Self {
        let (phase, _) = watch::channel(Phase::Beginning);
        Self {
            id,
            cancel: CancellationToken::new(),
            phase: Arc::new(phase),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current phase. Unlike the status stream this also shows
    /// `Terminating` while a cancelled session winds down.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Whether termination has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until the session reaches `Idle` or `Terminated`.
    ///
    /// Every status update of the session has been published to its sink
    /// by the time this resolves.
    pub async fn finished(&self) -> Phase {
        let mut rx = self.phase.subscribe();
        rx.wait_for(|phase| phase.is_terminal())
            .await
            .map(|phase| *phase)
            .unwrap_or(Phase::Terminated)
    }

    /// Fire the cancellation token and mark the session `Terminating`.
    ///
    /// Has no effect on a session that already finished.
    pub(crate) fn request_cancel(&self) {
        self.cancel.cancel();
        self.phase.send_if_modified(|phase| {
            if phase.is_active() && *phase != Phase::Terminating {
                *phase = Phase::Terminating;
                true
            } else {
                false
            }
        });
    }

    /// Advance the observable phase.
    ///
    /// Terminal phases are final, and `Terminating` only yields to a
    /// terminal phase.
    fn advance(&self, next: Phase) {
        self.phase.send_if_modified(|phase| {
            if phase.is_terminal() || (*phase == Phase::Terminating && !next.is_terminal()) {
                return false;
            }
            *phase = next;
            true
        });
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// How the event loop ended.
enum Outcome {
    Finished(Artifact),
    Cancelled,
    Failed(SessionError),
}

/// Everything a running session owns.
pub(crate) struct Session {
    handle: SessionHandle,
    backend: Arc<dyn RemoteBackend>,
    sink: Arc<dyn ProgressSink>,
    health: Arc<HealthMonitor>,
    endpoint: String,
    /// Effective cadence, `None` when polling is disabled.
    poll_interval: Option<Duration>,
    slot: ActiveSlot,
    /// Set once the terminal update has been handed to the sink.
    terminal_sent: Arc<AtomicBool>,
}

/// Frees the slot and marks the session `Terminated` when dropped.
///
/// Both steps are no-ops for a session that already finished normally.
struct SlotCleanup {
    handle: SessionHandle,
    slot: ActiveSlot,
}

impl Drop for SlotCleanup {
    fn drop(&mut self) {
        self.slot.release(&self.handle);
        self.handle.advance(Phase::Terminated);
    }
}

impl Session {
    pub(crate) fn new(
        handle: SessionHandle,
        backend: Arc<dyn RemoteBackend>,
        sink: Arc<dyn ProgressSink>,
        health: Arc<HealthMonitor>,
        endpoint: String,
        poll_interval: Option<Duration>,
        slot: ActiveSlot,
    ) -> Self {
        Self {
            handle,
            backend,
            sink,
            health,
            endpoint,
            poll_interval,
            slot,
            terminal_sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Emit `Beginning`, submit the request, and spawn the session task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub(crate) fn start(mut self, request: &GenerationRequest) {
        if !request.supports_previews() {
            self.poll_interval = None;
        }
        tracing::info!(
            session_id = %self.handle.id,
            sampling_method = %request.sampling_method,
            polling = self.poll_interval.is_some(),
            "Generation session started",
        );

        // Covers a panic in the sink or backend before the task exists.
        let cleanup = SlotCleanup {
            handle: self.handle.clone(),
            slot: self.slot.clone(),
        };
        let sink = Arc::clone(&self.sink);
        let terminal_sent = Arc::clone(&self.terminal_sent);

        self.emit(StatusUpdate::beginning(self.handle.id));
        let transfer = self.backend.submit_job(request);
        let task = tokio::spawn(self.run(transfer));
        tokio::spawn(supervise(task, cleanup, sink, terminal_sent));
    }

    async fn run(self, transfer: Transfer) {
        let outcome = self.drive(transfer).await;
        self.finish(outcome).await;
    }

    async fn drive(&self, transfer: Transfer) -> Outcome {
        let Transfer {
            mut progress,
            mut upload_completed,
            mut result,
            canceller,
        } = transfer;
        let _abort = canceller.abort_on_drop();

        let cancel = &self.handle.cancel;
        let mut progress_open = true;
        let mut uploading = false;
        let mut uploaded = false;
        let mut upload_failed = false;
        let mut poller: Option<PollScheduler> = None;
        // Lowest percent the next poll report may show.
        let mut floor = 0.0_f64;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Outcome::Cancelled,

                fraction = progress.recv(), if progress_open && !uploaded => {
                    match fraction {
                        Some(fraction) => {
                            if !uploading {
                                uploading = true;
                                self.handle.advance(Phase::Uploading);
                            }
                            self.emit(StatusUpdate::uploading(self.handle.id, fraction));
                        }
                        None => progress_open = false,
                    }
                }

                response = &mut result => {
                    return self.conclude(response, uploaded, &mut poller);
                }

                done = &mut upload_completed, if !uploaded && !upload_failed => {
                    match done {
                        Ok(()) => {
                            uploaded = true;
                            poller = self.enter_generating();
                        }
                        // The response branch reports the cause.
                        Err(_) => upload_failed = true,
                    }
                }

                step = next_poll(&mut poller, self.backend.as_ref(), cancel) => {
                    match step {
                        PollStep::Report(report) => {
                            if !report.percent.is_finite() {
                                continue;
                            }
                            let percent = report.percent.clamp(0.0, 100.0).max(floor);
                            floor = percent;
                            self.emit(StatusUpdate::generating(
                                self.handle.id,
                                percent,
                                report.preview,
                            ));
                        }
                        PollStep::Retry { .. } => floor = 0.0,
                        PollStep::Exhausted(source) => {
                            let attempts = poller.as_ref().map_or(0, PollScheduler::retries);
                            return Outcome::Failed(SessionError::PollRetriesExhausted {
                                attempts,
                                source,
                            });
                        }
                        PollStep::Cancelled => return Outcome::Cancelled,
                    }
                }
            }
        }
    }

    /// Turn the final response into an outcome.
    fn conclude(
        &self,
        response: Result<RemoteResponse, TransportError>,
        uploaded: bool,
        poller: &mut Option<PollScheduler>,
    ) -> Outcome {
        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_aborted() && self.handle.is_cancelled() => return Outcome::Cancelled,
            Err(e) if uploaded => return Outcome::Failed(SessionError::Response(e)),
            Err(e) => return Outcome::Failed(SessionError::Upload(e)),
        };

        if !response.is_success() {
            return Outcome::Failed(SessionError::NonSuccessStatus {
                status: response.status,
            });
        }

        if !uploaded {
            // A response implies the body was consumed.
            *poller = self.enter_generating();
        }
        // Stop polling before decoding.
        *poller = None;

        match self.backend.decode_artifact(response.body) {
            Ok(artifact) => Outcome::Finished(artifact),
            Err(e) => Outcome::Failed(e.into()),
        }
    }

    fn enter_generating(&self) -> Option<PollScheduler> {
        tracing::info!(session_id = %self.handle.id, "Upload complete, generating");
        self.handle.advance(Phase::Generating);
        self.emit(StatusUpdate::generating(self.handle.id, 0.0, None));
        self.poll_interval.map(PollScheduler::new)
    }

    async fn finish(self, outcome: Outcome) {
        let id = self.handle.id;

        let (update, failed) = match outcome {
            Outcome::Finished(artifact) => {
                // Termination requested while the result was in flight
                // wins over the result.
                if self.slot.release(&self.handle) {
                    tracing::info!(
                        session_id = %id,
                        "Result arrived after termination was requested, discarding",
                    );
                    (StatusUpdate::terminated(id), false)
                } else {
                    tracing::info!(
                        session_id = %id,
                        width = artifact.width,
                        height = artifact.height,
                        "Generation session finished",
                    );
                    (StatusUpdate::idle(id, artifact), false)
                }
            }
            Outcome::Cancelled => {
                let cancelled =
                    tokio::time::timeout(REMOTE_CANCEL_TIMEOUT, self.backend.cancel_job()).await;
                match cancelled {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(
                            session_id = %id,
                            error = %e,
                            "Remote cancel failed, ignoring",
                        );
                    }
                    Err(_) => {
                        tracing::warn!(session_id = %id, "Remote cancel timed out, ignoring");
                    }
                }
                self.slot.release(&self.handle);
                tracing::info!(session_id = %id, "Generation session terminated");
                (StatusUpdate::terminated(id), false)
            }
            Outcome::Failed(e) => {
                tracing::error!(session_id = %id, error = %e, "Generation session failed");
                self.slot.release(&self.handle);
                (StatusUpdate::terminated(id), true)
            }
        };

        let phase = update.phase;
        self.terminal_sent.store(true, Ordering::SeqCst);
        self.emit(update);
        self.handle.advance(phase);

        if failed {
            let health = Arc::clone(&self.health);
            let endpoint = self.endpoint.clone();
            tokio::spawn(async move {
                health.check(&endpoint).await;
            });
        }
    }

    /// Publish `update` unless the session was cancelled and the update is
    /// not terminal.
    fn emit(&self, update: StatusUpdate) {
        if self.handle.is_cancelled() && !update.phase.is_terminal() {
            return;
        }
        self.sink.publish(update);
    }
}

/// Settle a session whose task ended without finishing.
async fn supervise(
    task: JoinHandle<()>,
    cleanup: SlotCleanup,
    sink: Arc<dyn ProgressSink>,
    terminal_sent: Arc<AtomicBool>,
) {
    let Err(e) = task.await else {
        return;
    };
    let id = cleanup.handle.id;
    tracing::error!(session_id = %id, error = %e, "Generation session task aborted");

    cleanup.slot.release(&cleanup.handle);
    if !terminal_sent.swap(true, Ordering::SeqCst) {
        let update = StatusUpdate::terminated(id);
        if std::panic::catch_unwind(AssertUnwindSafe(|| sink.publish(update))).is_err() {
            tracing::warn!(session_id = %id, "Sink panicked on the terminal update");
        }
    }
    // Dropping `cleanup` marks the handle `Terminated`.
}

/// Next poll of `poller`, or never if there is none.
async fn next_poll(
    poller: &mut Option<PollScheduler>,
    backend: &dyn RemoteBackend,
    cancel: &CancellationToken,
) -> PollStep {
    match poller {
        Some(poller) => poller.tick(backend, cancel).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
