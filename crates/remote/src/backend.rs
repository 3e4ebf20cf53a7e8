//! Capabilities the controller needs from a generation server.
//!
//! Sessions never talk to the network directly. They go through a
//! [`RemoteBackend`] (submit, poll, cancel) and the health monitor goes
//! through a [`HealthProbe`]. Tests substitute scripted in-memory
//! implementations; [`HttpBackend`](crate::http::HttpBackend) is the real one.

use async_trait::async_trait;
use genctl_core::artifact::{decode_artifact, Artifact, ArtifactError};
use genctl_core::request::GenerationRequest;

use crate::transport::{Transfer, TransportError};

/// One answer from the server's progress endpoint.
#[derive(Debug, Clone, Default)]
pub struct PollReport {
    /// Completion in `0..=100`.
    pub percent: f64,
    /// Intermediate image, if the server produced one.
    pub preview: Option<Artifact>,
}

impl PollReport {
    pub fn new(percent: f64) -> Self {
        Self {
            percent,
            preview: None,
        }
    }
}

/// Submission, progress, and cancellation for one generation server.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Start sending `request` to the server.
    ///
    /// Called from within a Tokio runtime; implementations typically build
    /// the returned value with [`Transfer::start`].
    fn submit_job(&self, request: &GenerationRequest) -> Transfer;

    /// Ask the server how far the current job has progressed.
    async fn poll_status(&self) -> Result<PollReport, TransportError>;

    /// Ask the server to stop the current job. Callers treat failure as
    /// non-fatal.
    async fn cancel_job(&self) -> Result<(), TransportError>;

    /// Turn the final response body into an artifact.
    fn decode_artifact(&self, body: Vec<u8>) -> Result<Artifact, ArtifactError> {
        decode_artifact(body)
    }
}

/// Connectivity probe for a generation server.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` if the server at `endpoint` answered and looks healthy.
    async fn health_check(&self, endpoint: &str) -> bool;
}
