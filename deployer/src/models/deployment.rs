//! Deployment models

use chrono::{DateTime, SecondsFormat, Utc};
use openapi_server::models::DeploymentStatusResponse;
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{Phase, Transition};
use crate::errors::{QueueError, StatusError};

/// Build command used when a submission does not name one
pub const DEFAULT_BUILD_COMMAND: &str = "npm run build";

/// A deployment request as it travels through the job queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentJob {
    /// Short unique deployment ID
    pub id: String,

    /// Repository to fetch
    pub repo_url: String,

    /// Command run after the dependency install
    pub build_command: String,

    /// Owning project, opaque to the pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Identity that requested the deployment
    pub submitter_id: String,
}

/// Loose shape of a queue message before validation
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJob {
    id: Option<String>,
    repo_url: Option<String>,
    build_command: Option<String>,
    project_id: Option<String>,
    #[serde(alias = "userId")]
    submitter_id: Option<String>,
}

impl DeploymentJob {
    /// Decode and validate a raw queue message
    pub fn from_payload(payload: &str) -> Result<Self, QueueError> {
        let raw: RawJob = serde_json::from_str(payload).map_err(|e| QueueError::MalformedJob {
            id: None,
            reason: format!("invalid JSON: {}", e),
        })?;

        let id = non_blank(raw.id).ok_or_else(|| QueueError::MalformedJob {
            id: None,
            reason: "missing id".to_string(),
        })?;

        let malformed = |reason: &str| QueueError::MalformedJob {
            id: Some(id.clone()),
            reason: reason.to_string(),
        };

        let repo_url = non_blank(raw.repo_url).ok_or_else(|| malformed("missing repoUrl"))?;
        let submitter_id =
            non_blank(raw.submitter_id).ok_or_else(|| malformed("missing submitterId"))?;
        let build_command = non_blank(raw.build_command)
            .unwrap_or_else(|| DEFAULT_BUILD_COMMAND.to_string());

        Ok(Self {
            id,
            repo_url,
            build_command,
            project_id: non_blank(raw.project_id),
            submitter_id,
        })
    }

    /// Encode for the queue
    pub fn to_payload(&self) -> Result<String, QueueError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Observable record of a deployment's progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStatus {
    pub id: String,
    pub phase: Phase,
    pub log_lines: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub artifact_url: Option<String>,
}

impl DeploymentStatus {
    /// A fresh `pending` record with no logs
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase: Phase::Pending,
            log_lines: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            error_message: None,
            artifact_url: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Apply a transition in place. The record is untouched on error.
    pub fn apply(&mut self, transition: &Transition, now: DateTime<Utc>) -> Result<(), StatusError> {
        let to = transition.phase();
        if !self.phase.can_transition_to(to) {
            return Err(StatusError::InvalidState {
                id: self.id.clone(),
                reason: format!("cannot move from {} to {}", self.phase, to),
            });
        }

        if let Some(line) = transition.log_line() {
            self.log_lines.push(format_log_line(now, line));
        }
        self.phase = to;
        if to.is_terminal() {
            self.ended_at = Some(now);
        }
        self.error_message = transition.error().map(str::to_string);
        self.artifact_url = transition.artifact_url().map(str::to_string);

        Ok(())
    }
}

/// Timestamp a log line. Line breaks are flattened so the transcript survives
/// the newline-joined durable column unchanged.
pub fn format_log_line(now: DateTime<Utc>, line: &str) -> String {
    let flat: String = line
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    format!("[{}] {}", now.to_rfc3339_opts(SecondsFormat::Millis, true), flat)
}

impl From<DeploymentStatus> for DeploymentStatusResponse {
    fn from(status: DeploymentStatus) -> Self {
        Self {
            id: status.id,
            phase: status.phase.as_str().to_string(),
            log_lines: status.log_lines,
            started_at: status.started_at,
            ended_at: status.ended_at,
            error_message: status.error_message,
            artifact_url: status.artifact_url,
        }
    }
}
