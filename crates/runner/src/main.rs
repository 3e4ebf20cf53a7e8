//! `genctl-runner` -- drives one generation against a remote server.
//!
//! Checks the server's health, then (if a request file is given) submits
//! it, logs every status update, and writes the final image to disk.
//! Ctrl-C terminates the running session.
//!
//! # Environment variables
//!
//! | Variable                | Required | Default | Description                                |
//! |-------------------------|----------|---------|--------------------------------------------|
//! | `GENCTL_REQUEST_FILE`   | no       | --      | JSON-encoded generation request to submit  |
//! | `GENCTL_RANDOMIZE_SEED` | no       | `false` | Replace the request's seed with a random one |
//! | `GENCTL_OUTPUT_FILE`    | no       | --      | Where to write the finished image          |
//!
//! Server settings are read by [`ControllerConfig::from_env`].

use std::sync::{Arc, Mutex};

use genctl_core::artifact::Artifact;
use genctl_core::request::{random_seed, GenerationRequest};
use genctl_core::status::{Phase, StatusUpdate};
use genctl_remote::config::ControllerConfig;
use genctl_remote::http::HttpBackend;
use genctl_remote::registry::SessionRegistry;
use genctl_remote::sink::ProgressSink;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genctl_runner=info,genctl_remote=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ControllerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let backend = Arc::new(HttpBackend::new(&config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Cannot create server client");
        std::process::exit(1);
    }));

    tracing::info!(
        server_url = %config.server_url,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Starting genctl-runner",
    );

    let registry = SessionRegistry::new(backend.clone(), backend, config);

    let available = registry.check_health().await;
    tracing::info!(
        status = registry.health().status().to_text(),
        "Server health checked",
    );

    let Some(mut request) = load_request() else {
        tracing::info!("No GENCTL_REQUEST_FILE set, nothing to generate");
        return;
    };
    if !available {
        tracing::warn!("Server looks unavailable, submitting anyway");
    }

    if env_flag("GENCTL_RANDOMIZE_SEED") {
        request.seed = random_seed();
        tracing::info!(seed = request.seed, "Randomized seed");
    }

    let result: Arc<Mutex<Option<Artifact>>> = Arc::new(Mutex::new(None));
    let sink: Arc<dyn ProgressSink> = {
        let result = Arc::clone(&result);
        Arc::new(move |update: StatusUpdate| {
            tracing::info!(session_id = %update.session_id, "{}", update.to_text());
            if update.phase == Phase::Idle {
                if let Ok(mut slot) = result.lock() {
                    *slot = update.artifact;
                }
            }
        })
    };

    let handle = match registry.submit(&request, sink) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Submit rejected");
            std::process::exit(1);
        }
    };

    let phase = tokio::select! {
        phase = handle.finished() => phase,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, terminating session");
            registry.terminate(&handle);
            handle.finished().await
        }
    };

    if phase != Phase::Idle {
        tracing::error!(phase = %phase, "Generation did not complete");
        std::process::exit(1);
    }

    let artifact = result.lock().ok().and_then(|slot| slot.clone());
    match (artifact, std::env::var("GENCTL_OUTPUT_FILE").ok()) {
        (Some(artifact), Some(path)) => {
            if let Err(e) = tokio::fs::write(&path, artifact.data.as_slice()).await {
                tracing::error!(path = %path, error = %e, "Failed to write image");
                std::process::exit(1);
            }
            tracing::info!(
                path = %path,
                width = artifact.width,
                height = artifact.height,
                "Image written",
            );
        }
        (Some(artifact), None) => {
            tracing::info!(
                mime = %artifact.mime,
                width = artifact.width,
                height = artifact.height,
                "Generation complete, GENCTL_OUTPUT_FILE not set",
            );
        }
        (None, _) => tracing::warn!("Generation finished without an image"),
    }
}

/// Read and validate the request named by `GENCTL_REQUEST_FILE`.
///
/// Exits the process on unreadable or invalid input.
fn load_request() -> Option<GenerationRequest> {
    let path = std::env::var("GENCTL_REQUEST_FILE").ok()?;

    let raw = std::fs::read(&path).unwrap_or_else(|e| {
        tracing::error!(path = %path, error = %e, "Cannot read request file");
        std::process::exit(1);
    });
    let request: GenerationRequest = serde_json::from_slice(&raw).unwrap_or_else(|e| {
        tracing::error!(path = %path, error = %e, "Request file is not a valid request");
        std::process::exit(1);
    });
    if let Err(e) = request.validate() {
        tracing::error!(path = %path, error = %e, "Request rejected");
        std::process::exit(1);
    }
    Some(request)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
