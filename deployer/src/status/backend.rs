//! Durable status backends

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::deploy::fsm::Phase;
use crate::errors::StatusError;
use crate::models::deployment::DeploymentStatus;

/// Durable storage behind the status cache
#[async_trait]
pub trait StatusBackend: Send + Sync {
    /// Insert a new record; `AlreadyExists` if the id is taken
    async fn insert(&self, status: &DeploymentStatus) -> Result<(), StatusError>;

    /// Overwrite an existing record; `NotFound` if there is none
    async fn update(&self, status: &DeploymentStatus) -> Result<(), StatusError>;

    /// Load a record by id
    async fn load(&self, id: &str) -> Result<Option<DeploymentStatus>, StatusError>;
}

/// Column layout of the `deployments` table. Logs are one newline-joined
/// text column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub id: String,
    pub status: String,
    pub logs: String,
    pub error_message: Option<String>,
    pub deployment_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusRow {
    pub fn from_status(status: &DeploymentStatus) -> Self {
        Self {
            id: status.id.clone(),
            status: status.phase.as_str().to_string(),
            logs: status.log_lines.join("\n"),
            error_message: status.error_message.clone(),
            deployment_url: status.artifact_url.clone(),
            started_at: status.started_at,
            completed_at: status.ended_at,
        }
    }

    pub fn into_status(self) -> Result<DeploymentStatus, StatusError> {
        let phase: Phase = self.status.parse().map_err(|e| {
            StatusError::Durable(format!("failed to parse status '{}': {}", self.status, e))
        })?;

        let log_lines = if self.logs.is_empty() {
            Vec::new()
        } else {
            self.logs.split('\n').map(str::to_string).collect()
        };

        Ok(DeploymentStatus {
            id: self.id,
            phase,
            log_lines,
            started_at: self.started_at,
            ended_at: self.completed_at,
            error_message: self.error_message,
            artifact_url: self.deployment_url,
        })
    }
}

/// In-memory backend, stores the same row shape as Postgres
#[derive(Default)]
pub struct MemoryBackend {
    rows: RwLock<HashMap<String, StatusRow>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw row, for inspecting what was persisted
    pub async fn row(&self, id: &str) -> Option<StatusRow> {
        self.rows.read().await.get(id).cloned()
    }
}

#[async_trait]
impl StatusBackend for MemoryBackend {
    async fn insert(&self, status: &DeploymentStatus) -> Result<(), StatusError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&status.id) {
            return Err(StatusError::AlreadyExists(status.id.clone()));
        }
        rows.insert(status.id.clone(), StatusRow::from_status(status));
        Ok(())
    }

    async fn update(&self, status: &DeploymentStatus) -> Result<(), StatusError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&status.id) {
            Some(row) => {
                *row = StatusRow::from_status(status);
                Ok(())
            }
            None => Err(StatusError::NotFound(status.id.clone())),
        }
    }

    async fn load(&self, id: &str) -> Result<Option<DeploymentStatus>, StatusError> {
        let row = self.rows.read().await.get(id).cloned();
        row.map(StatusRow::into_status).transpose()
    }
}
