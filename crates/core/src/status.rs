//! Phases, status updates, and server connectivity states.
//!
//! [`StatusUpdate`]s are what observers of a generation session see.
//! [`ServerStatus`] is published separately by the health monitor and
//! never flows through a session's update stream.

use chrono::Utc;
use serde::Serialize;

use crate::artifact::Artifact;
use crate::types::{SessionId, Timestamp};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Coarse lifecycle label of a generation session.
///
/// ```text
/// Beginning -> Uploading -> Generating -> Idle
///                                      \-> Terminating -> Terminated
/// (any active phase) ----------------------------------> Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Finished successfully, or never started.
    Idle,
    Beginning,
    Uploading,
    Generating,
    Terminating,
    Terminated,
}

impl Phase {
    /// Phases during which a session occupies its registry.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Beginning | Self::Uploading | Self::Generating | Self::Terminating
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle | Self::Terminated)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Beginning => "Beginning",
            Self::Uploading => "Uploading",
            Self::Generating => "Generating",
            Self::Terminating => "Terminating",
            Self::Terminated => "Terminated",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// StatusUpdate
// ---------------------------------------------------------------------------

/// One observation of a session's progress, delivered to its sink.
///
/// `percent` means different things per phase:
/// - `Uploading`: the request-body upload fraction in `[0, 1)`, verbatim
///   from the transport.
/// - `Beginning`, `Generating`, `Idle`: completion in `0..=100`.
/// - `Terminated`: always `None`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub session_id: SessionId,
    pub phase: Phase,
    pub percent: Option<f64>,
    /// Preview while generating, or the final image on `Idle`.
    pub artifact: Option<Artifact>,
    pub timestamp: Timestamp,
}

impl StatusUpdate {
    fn new(session_id: SessionId, phase: Phase, percent: Option<f64>) -> Self {
        Self {
            session_id,
            phase,
            percent,
            artifact: None,
            timestamp: Utc::now(),
        }
    }

    pub fn beginning(session_id: SessionId) -> Self {
        Self::new(session_id, Phase::Beginning, Some(0.0))
    }

    pub fn uploading(session_id: SessionId, fraction: f64) -> Self {
        Self::new(session_id, Phase::Uploading, Some(fraction))
    }

    pub fn generating(session_id: SessionId, percent: f64, preview: Option<Artifact>) -> Self {
        Self {
            artifact: preview,
            ..Self::new(session_id, Phase::Generating, Some(percent))
        }
    }

    pub fn idle(session_id: SessionId, artifact: Artifact) -> Self {
        Self {
            artifact: Some(artifact),
            ..Self::new(session_id, Phase::Idle, Some(100.0))
        }
    }

    pub fn terminated(session_id: SessionId) -> Self {
        Self::new(session_id, Phase::Terminated, None)
    }

    /// Human-readable status line, e.g. `"Generating: 40%"`.
    pub fn to_text(&self) -> String {
        match self.phase {
            Phase::Idle => "Ready".to_string(),
            Phase::Beginning => "Beginning...".to_string(),
            Phase::Uploading => format!(
                "Uploading Input Image: {:.0}%",
                self.percent.unwrap_or(0.0) * 100.0
            ),
            Phase::Generating => format!("Generating: {:.0}%", self.percent.unwrap_or(0.0)),
            Phase::Terminating => "Terminating...".to_string(),
            Phase::Terminated => "Terminated".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerStatus
// ---------------------------------------------------------------------------

/// Last known reachability of the generation server.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    #[default]
    Unknown,
    Checking,
    Connected,
    Unavailable,
}

impl ServerStatus {
    pub fn from_available(available: bool) -> Self {
        if available {
            Self::Connected
        } else {
            Self::Unavailable
        }
    }

    pub fn to_text(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Checking => "Checking...",
            Self::Connected => "Connected",
            Self::Unavailable => "Unavailable",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
