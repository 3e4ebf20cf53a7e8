//! One cancelable request with upload-progress reporting.
//!
//! [`Transfer::start`] spawns the request on the runtime and hands back
//! three independent observation points plus a canceller:
//!
//! - `progress`: upload fractions in `[0, 1)`, strictly increasing, closed
//!   once the upload completes.
//! - `upload_completed`: resolves exactly once when the body is fully sent.
//! - `result`: the final response.
//!
//! Cancelling aborts the in-flight request; every pending observation
//! then resolves to [`TransportError::Aborted`] instead of hanging.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};

// ---------------------------------------------------------------------------
// Response and errors
// ---------------------------------------------------------------------------

/// Raw final response of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RemoteResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// `true` for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Errors from talking to the generation server.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The server answered a status or progress call with a non-2xx code.
    #[error("Server returned HTTP {0}")]
    HttpStatus(u16),

    /// The server answered, but not in the expected shape.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The request was cancelled before it finished.
    #[error("Request aborted")]
    Aborted,
}

impl TransportError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

// ---------------------------------------------------------------------------
// UploadReporter
// ---------------------------------------------------------------------------

/// Handed to the request future so it can report how much of the body has
/// been sent.
///
/// Values that are not finite, negative, or not larger than the previous
/// value are dropped. A value of `1.0` or more counts as completion. After
/// completion every further call is ignored.
#[derive(Clone)]
pub struct UploadReporter {
    state: Arc<Mutex<ReporterState>>,
}

struct ReporterState {
    progress_tx: Option<mpsc::UnboundedSender<f64>>,
    completed_tx: Option<oneshot::Sender<()>>,
    last: Option<f64>,
}

impl ReporterState {
    fn complete(&mut self) {
        self.progress_tx = None;
        if let Some(tx) = self.completed_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Drop both senders without signalling completion.
    fn abandon(&mut self) {
        self.progress_tx = None;
        self.completed_tx = None;
    }
}

impl UploadReporter {
    fn channel() -> (Self, mpsc::UnboundedReceiver<f64>, oneshot::Receiver<()>) {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (completed_tx, completed_rx) = oneshot::channel();
        let reporter = Self {
            state: Arc::new(Mutex::new(ReporterState {
                progress_tx: Some(progress_tx),
                completed_tx: Some(completed_tx),
                last: None,
            })),
        };
        (reporter, progress_rx, completed_rx)
    }

    fn lock(&self) -> MutexGuard<'_, ReporterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report the fraction of the request body sent so far.
    pub fn progress(&self, fraction: f64) {
        let mut state = self.lock();
        if state.progress_tx.is_none() || !fraction.is_finite() || fraction < 0.0 {
            return;
        }
        if fraction >= 1.0 {
            state.complete();
            return;
        }
        if state.last.is_some_and(|last| fraction <= last) {
            return;
        }
        state.last = Some(fraction);
        if let Some(tx) = &state.progress_tx {
            let _ = tx.send(fraction);
        }
    }

    /// Signal that the whole body has been sent. Only the first call counts.
    pub fn complete(&self) {
        self.lock().complete();
    }

    pub fn is_complete(&self) -> bool {
        let state = self.lock();
        state.completed_tx.is_none() && state.progress_tx.is_none()
    }

    fn abandon(&self) {
        self.lock().abandon();
    }
}

// ---------------------------------------------------------------------------
// Transfer
// ---------------------------------------------------------------------------

/// An in-flight request, split into independently awaitable parts.
pub struct Transfer {
    pub progress: mpsc::UnboundedReceiver<f64>,
    pub upload_completed: UploadCompleted,
    pub result: TransferResult,
    pub canceller: TransferCanceller,
}

impl Transfer {
    /// Spawn the request produced by `send` onto the current Tokio runtime.
    ///
    /// `send` receives an [`UploadReporter`] for the body upload. If the
    /// request succeeds without ever reporting completion, completion is
    /// signalled just before the result is delivered, since a response
    /// implies the body was consumed.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start<F, Fut>(send: F) -> Self
    where
        F: FnOnce(UploadReporter) -> Fut,
        Fut: Future<Output = Result<RemoteResponse, TransportError>> + Send + 'static,
    {
        let (reporter, progress, completed_rx) = UploadReporter::channel();
        let (result_tx, result_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let request = send(reporter.clone());
        let token = cancel.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Err(TransportError::Aborted),
                outcome = request => outcome,
            };

            if outcome.is_ok() {
                reporter.complete();
            }
            if let Err(e) = &outcome {
                tracing::debug!(error = %e, "Transfer finished without a response");
            }

            let _ = result_tx.send(outcome);
            // Released after the result so a failed upload is always
            // observable through `result` first.
            reporter.abandon();
        });

        Self {
            progress,
            upload_completed: UploadCompleted(completed_rx),
            result: TransferResult(result_rx),
            canceller: TransferCanceller(cancel),
        }
    }

    /// Abort the request. Equivalent to `self.canceller.cancel()`.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }
}

/// Resolves once the request body has been fully sent, or with
/// [`TransportError::Aborted`] if that never happens.
///
/// Must not be polled again after it has resolved.
pub struct UploadCompleted(oneshot::Receiver<()>);

impl Future for UploadCompleted {
    type Output = Result<(), TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|r| r.map_err(|_| TransportError::Aborted))
    }
}

/// Resolves with the final response of the request.
///
/// Must not be polled again after it has resolved.
pub struct TransferResult(oneshot::Receiver<Result<RemoteResponse, TransportError>>);

impl Future for TransferResult {
    type Output = Result<RemoteResponse, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(TransportError::Aborted)))
    }
}

/// Cheaply cloneable abort switch for a [`Transfer`].
#[derive(Clone)]
pub struct TransferCanceller(CancellationToken);

impl TransferCanceller {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Abort the transfer when the returned guard is dropped.
    pub fn abort_on_drop(self) -> DropGuard {
        self.0.drop_guard()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
