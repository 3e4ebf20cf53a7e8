//! Shared fixtures for controller integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use genctl_core::artifact::{decode_artifact, Artifact, ArtifactError};
use genctl_core::request::GenerationRequest;
use genctl_core::status::{Phase, StatusUpdate};
use genctl_remote::backend::{HealthProbe, PollReport, RemoteBackend};
use genctl_remote::config::ControllerConfig;
use genctl_remote::registry::SessionRegistry;
use genctl_remote::sink::ProgressSink;
use genctl_remote::transport::{RemoteResponse, Transfer, TransportError};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Requests and artifacts
// ---------------------------------------------------------------------------

/// A 2x2 PNG.
pub fn tiny_png() -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image::RgbaImage::new(2, 2)
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

/// A 64x64 PNG cut off halfway through its pixel data. The header still
/// parses, so only a full decode notices.
pub fn truncated_png() -> Vec<u8> {
    let image = image::RgbaImage::from_fn(64, 64, |x, y| {
        image::Rgba([(x * 4) as u8, (y * 4) as u8, (x ^ y) as u8, 255])
    });
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    let mut bytes = bytes.into_inner();
    bytes.truncate(bytes.len() / 2);
    bytes
}

pub fn request() -> GenerationRequest {
    GenerationRequest::new("a lighthouse at dusk").with_seed(42)
}

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

/// Marks the request future as torn down unless it ran to completion.
struct AbortFlag {
    aborted: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for AbortFlag {
    fn drop(&mut self) {
        if self.armed {
            self.aborted.store(true, Ordering::SeqCst);
        }
    }
}

type DecodeHook = Box<dyn FnOnce() + Send>;

/// In-memory server whose timing and answers are set up per test.
///
/// A submitted job reports each of `upload_steps` after `step_delay`,
/// finishes the upload after one more `step_delay`, then answers with
/// `final_status`/`final_body` after `generation_time`.
pub struct ScriptedBackend {
    pub upload_steps: Vec<f64>,
    pub step_delay: Duration,
    /// Fail the upload with this HTTP status instead of completing it.
    pub upload_error: Option<u16>,
    pub generation_time: Duration,
    pub final_status: u16,
    pub final_body: Vec<u8>,
    pub cancel_fails: bool,
    pub(crate) polls: Mutex<VecDeque<Result<f64, u16>>>,
    pub(crate) poll_starts: Mutex<Vec<Instant>>,
    pub(crate) upload_completed_at: Arc<Mutex<Option<Instant>>>,
    pub(crate) submits: AtomicUsize,
    pub(crate) cancel_calls: AtomicUsize,
    pub(crate) aborted: Arc<AtomicBool>,
    pub(crate) on_decode: Mutex<Option<DecodeHook>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            upload_steps: vec![0.0, 0.5],
            step_delay: Duration::from_millis(10),
            upload_error: None,
            generation_time: Duration::from_millis(100),
            final_status: 200,
            final_body: tiny_png(),
            cancel_fails: false,
            polls: Mutex::new(VecDeque::new()),
            poll_starts: Mutex::new(Vec::new()),
            upload_completed_at: Arc::new(Mutex::new(None)),
            submits: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            aborted: Arc::new(AtomicBool::new(false)),
            on_decode: Mutex::new(None),
        }
    }
}

impl ScriptedBackend {
    /// Answers for successive polls; once exhausted every poll fails with 503.
    pub fn with_polls(self, polls: Vec<Result<f64, u16>>) -> Self {
        *self.polls.lock().unwrap() = polls.into();
        self
    }

    /// Run `hook` when the final body is handed over for decoding.
    pub fn on_decode(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_decode.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn poll_starts(&self) -> Vec<Instant> {
        self.poll_starts.lock().unwrap().clone()
    }

    pub fn upload_completed_at(&self) -> Option<Instant> {
        *self.upload_completed_at.lock().unwrap()
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Whether the in-flight request was dropped before it finished.
    pub fn request_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteBackend for ScriptedBackend {
    fn submit_job(&self, _request: &GenerationRequest) -> Transfer {
        self.submits.fetch_add(1, Ordering::SeqCst);

        let steps = self.upload_steps.clone();
        let step_delay = self.step_delay;
        let upload_error = self.upload_error;
        let generation_time = self.generation_time;
        let response = RemoteResponse::new(self.final_status, self.final_body.clone());
        let aborted = Arc::clone(&self.aborted);
        let completed_at = Arc::clone(&self.upload_completed_at);

        Transfer::start(move |reporter| async move {
            let mut flag = AbortFlag {
                aborted,
                armed: true,
            };
            for step in steps {
                tokio::time::sleep(step_delay).await;
                reporter.progress(step);
            }
            tokio::time::sleep(step_delay).await;
            if let Some(status) = upload_error {
                flag.armed = false;
                return Err(TransportError::HttpStatus(status));
            }
            reporter.complete();
            *completed_at.lock().unwrap() = Some(Instant::now());

            tokio::time::sleep(generation_time).await;
            flag.armed = false;
            Ok(response)
        })
    }

    async fn poll_status(&self) -> Result<PollReport, TransportError> {
        self.poll_starts.lock().unwrap().push(Instant::now());
        let next = self.polls.lock().unwrap().pop_front().unwrap_or(Err(503));
        next.map(PollReport::new).map_err(TransportError::HttpStatus)
    }

    async fn cancel_job(&self) -> Result<(), TransportError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if self.cancel_fails {
            Err(TransportError::HttpStatus(500))
        } else {
            Ok(())
        }
    }

    fn decode_artifact(&self, body: Vec<u8>) -> Result<Artifact, ArtifactError> {
        if let Some(hook) = self.on_decode.lock().unwrap().take() {
            hook();
        }
        decode_artifact(body)
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Keeps every update it receives.
#[derive(Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.updates().iter().map(|u| u.phase).collect()
    }

    /// Percent values of every update in `phase`, in order.
    pub fn percents(&self, phase: Phase) -> Vec<f64> {
        self.updates()
            .iter()
            .filter(|u| u.phase == phase)
            .filter_map(|u| u.percent)
            .collect()
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.phases().iter().filter(|p| **p == phase).count()
    }
}

impl ProgressSink for RecordingSink {
    fn publish(&self, update: StatusUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

/// Records every update, then panics on the first update in `phase`.
pub struct PanickingSink {
    phase: Phase,
    recorded: RecordingSink,
}

impl PanickingSink {
    pub fn new(phase: Phase) -> Arc<Self> {
        Arc::new(Self {
            phase,
            recorded: RecordingSink::default(),
        })
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.recorded.phases()
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.recorded.count(phase)
    }
}

impl ProgressSink for PanickingSink {
    fn publish(&self, update: StatusUpdate) {
        let phase = update.phase;
        self.recorded.publish(update);
        if phase == self.phase {
            panic!("sink rejected {phase} update");
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingProbe
// ---------------------------------------------------------------------------

/// Health probe with a fixed answer that counts its calls.
pub struct RecordingProbe {
    answer: bool,
    calls: AtomicUsize,
}

impl RecordingProbe {
    pub fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for RecordingProbe {
    async fn health_check(&self, _endpoint: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Registry over `backend` and `probe` polling every `poll_interval_ms`.
pub fn registry(
    backend: &Arc<ScriptedBackend>,
    probe: &Arc<RecordingProbe>,
    poll_interval_ms: u64,
) -> Arc<SessionRegistry> {
    let config = ControllerConfig {
        poll_interval: Duration::from_millis(poll_interval_ms),
        ..ControllerConfig::default()
    };
    Arc::new(SessionRegistry::new(
        Arc::clone(backend) as Arc<dyn RemoteBackend>,
        Arc::clone(probe) as Arc<dyn HealthProbe>,
        config,
    ))
}

/// Let spawned follow-up work (e.g. the diagnostic health check) run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
