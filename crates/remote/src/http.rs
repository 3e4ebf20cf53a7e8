//! HTTP implementation of the server capabilities, using [`reqwest`].
//!
//! The server contract is deliberately small:
//!
//! | Capability | Request           | Success response                       |
//! |------------|-------------------|----------------------------------------|
//! | submit     | `POST generate`   | raw artifact bytes                     |
//! | poll       | `GET progress`    | `{"progress": 0.0..1.0, "preview": ..}` |
//! | cancel     | `POST interrupt`  | any 2xx                                |
//! | health     | `GET health`      | any 2xx                                |
//!
//! Paths are relative to the configured base URL and can be overridden with
//! [`HttpBackend::with_paths`].

use async_trait::async_trait;
use futures::stream;
use genctl_core::request::GenerationRequest;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use crate::backend::{HealthProbe, PollReport, RemoteBackend};
use crate::config::ControllerConfig;
use crate::transport::{RemoteResponse, Transfer, TransportError, UploadReporter};

/// Server paths, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPaths {
    pub generate: String,
    pub progress: String,
    pub interrupt: String,
    pub health: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            generate: "generate".to_string(),
            progress: "progress".to_string(),
            interrupt: "interrupt".to_string(),
            health: "health".to_string(),
        }
    }
}

/// Body of the progress endpoint. Previews are not decoded.
#[derive(Debug, Deserialize)]
struct ProgressDocument {
    progress: f64,
}

/// HTTP client for one generation server.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    paths: EndpointPaths,
    upload_chunk_bytes: usize,
}

impl HttpBackend {
    /// Create a backend for the server in `config`.
    ///
    /// Fails if the configured URL is not an absolute http(s) URL.
    pub fn new(config: &ControllerConfig) -> Result<Self, TransportError> {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Create a backend reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        config: &ControllerConfig,
    ) -> Result<Self, TransportError> {
        let base_url = normalize_base_url(&config.server_url)?;
        Ok(Self {
            client,
            base_url,
            paths: EndpointPaths::default(),
            upload_chunk_bytes: config.upload_chunk_bytes.max(1),
        })
    }

    pub fn with_paths(mut self, paths: EndpointPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        join(&self.base_url, path)
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    fn submit_job(&self, request: &GenerationRequest) -> Transfer {
        let body =
            serde_json::to_vec(request).map_err(|e| TransportError::Malformed(e.to_string()));
        let client = self.client.clone();
        let url = self.url(&self.paths.generate);
        let chunk_bytes = self.upload_chunk_bytes;

        Transfer::start(move |reporter| async move {
            let body = body?;
            tracing::debug!(url = %url, bytes = body.len(), "Submitting generation request");

            let response = client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .body(chunked_body(body, chunk_bytes, reporter))
                .send()
                .await?;

            let status = response.status().as_u16();
            let bytes = response.bytes().await?;
            Ok(RemoteResponse::new(status, bytes.to_vec()))
        })
    }

    async fn poll_status(&self) -> Result<PollReport, TransportError> {
        let response = self
            .client
            .get(self.url(&self.paths.progress))
            .send()
            .await?;
        let response = ensure_success(response)?;

        let bytes = response.bytes().await?;
        let document: ProgressDocument = serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::Malformed(format!("progress document: {e}")))?;

        Ok(PollReport::new((document.progress * 100.0).clamp(0.0, 100.0)))
    }

    async fn cancel_job(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url(&self.paths.interrupt))
            .send()
            .await?;
        ensure_success(response)?;
        Ok(())
    }
}

#[async_trait]
impl HealthProbe for HttpBackend {
    async fn health_check(&self, endpoint: &str) -> bool {
        let url = match normalize_base_url(endpoint) {
            Ok(base) => join(&base, &self.paths.health),
            Err(e) => {
                tracing::warn!(endpoint, error = %e, "Health check skipped");
                return false;
            }
        };

        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Health probe failed");
                false
            }
        }
    }
}

// ---- private helpers ----

/// Map a non-2xx response to [`TransportError::HttpStatus`].
fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::HttpStatus(status.as_u16()));
    }
    Ok(response)
}

/// Validate `raw` and give it exactly one trailing slash.
fn normalize_base_url(raw: &str) -> Result<String, TransportError> {
    let parsed = reqwest::Url::parse(raw.trim()).map_err(|e| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(TransportError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(format!("{}/", parsed.as_str().trim_end_matches('/')))
}

fn join(base: &str, path: &str) -> String {
    format!("{base}{}", path.trim_start_matches('/'))
}

/// Stream `body` in `chunk_bytes` pieces, reporting the fraction sent
/// before each piece and completion once the last one is handed over.
fn chunked_body(body: Vec<u8>, chunk_bytes: usize, reporter: UploadReporter) -> reqwest::Body {
    let total = body.len();
    let chunks = stream::unfold(0usize, move |offset| {
        let piece = if offset < total {
            let end = (offset + chunk_bytes).min(total);
            reporter.progress(offset as f64 / total as f64);
            Some((Ok::<_, std::io::Error>(body[offset..end].to_vec()), end))
        } else {
            reporter.complete();
            None
        };
        async move { piece }
    });
    reqwest::Body::wrap_stream(chunks)
}
