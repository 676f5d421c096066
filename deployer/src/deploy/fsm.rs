//! Finite State Machine for the deployment pipeline

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// FSM settings
#[derive(Debug, Clone)]
pub struct FsmSettings {
    /// Deadline for the source fetch
    pub fetch_timeout: Duration,

    /// Deadline for install + build
    pub build_timeout: Duration,

    /// Deadline for the artifact upload
    pub publish_timeout: Duration,
}

impl Default for FsmSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(600),
            build_timeout: Duration::from_secs(1800),
            publish_timeout: Duration::from_secs(600),
        }
    }
}

/// Deployment phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Queued, not yet picked up by the worker
    Pending,

    /// Fetching the source
    Cloning,

    /// Installing dependencies and running the build command
    Building,

    /// Publishing the build output
    Uploading,

    /// Published successfully
    Deployed,

    /// Deployment failed or was cancelled
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Cloning => "cloning",
            Phase::Building => "building",
            Phase::Uploading => "uploading",
            Phase::Deployed => "deployed",
            Phase::Failed => "failed",
        }
    }

    /// `deployed` and `failed` accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Deployed | Phase::Failed)
    }

    /// The next phase on the success path
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Pending => Some(Phase::Cloning),
            Phase::Cloning => Some(Phase::Building),
            Phase::Building => Some(Phase::Uploading),
            Phase::Uploading => Some(Phase::Deployed),
            Phase::Deployed | Phase::Failed => None,
        }
    }

    /// Check an edge of the pipeline graph
    pub fn can_transition_to(&self, to: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Phase::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Phase::Pending),
            "cloning" => Ok(Phase::Cloning),
            "building" => Ok(Phase::Building),
            "uploading" => Ok(Phase::Uploading),
            "deployed" => Ok(Phase::Deployed),
            "failed" => Ok(Phase::Failed),
            _ => Err(format!("Invalid phase: {}", s)),
        }
    }
}

/// Fallback error text when a failure carries no message
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// A requested phase change, applied by the status store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    phase: Phase,
    log_line: Option<String>,
    error: Option<String>,
    artifact_url: Option<String>,
}

impl Transition {
    /// Advance along the success path (`cloning`, `building`, `uploading`).
    /// Terminal phases have their own constructors.
    pub fn advance(phase: Phase) -> Self {
        Self {
            phase,
            log_line: None,
            error: None,
            artifact_url: None,
        }
    }

    /// Terminal success carrying the published artifact URL
    pub fn deployed(artifact_url: impl Into<String>) -> Self {
        Self {
            phase: Phase::Deployed,
            log_line: None,
            error: None,
            artifact_url: Some(artifact_url.into()),
        }
    }

    /// Terminal failure. An empty message is replaced with "Unknown error".
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            error
        };
        Self {
            phase: Phase::Failed,
            log_line: None,
            error: Some(error),
            artifact_url: None,
        }
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.log_line = Some(line.into());
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn log_line(&self) -> Option<&str> {
        self.log_line.as_deref()
    }

    /// Error text, only ever set on `failed`
    pub fn error(&self) -> Option<&str> {
        match self.phase {
            Phase::Failed => self.error.as_deref().or(Some(UNKNOWN_ERROR)),
            _ => None,
        }
    }

    /// Artifact URL, only ever set on `deployed`
    pub fn artifact_url(&self) -> Option<&str> {
        match self.phase {
            Phase::Deployed => self.artifact_url.as_deref(),
            _ => None,
        }
    }
}
