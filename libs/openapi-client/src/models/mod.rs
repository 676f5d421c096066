//! API models

use serde::{Deserialize, Serialize};

/// Upload service request: publish every file below a directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDirectoryRequest {
    pub directory_path: String,
    pub deployment_id: String,
}

/// Upload service response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDirectoryResponse {
    #[serde(default)]
    pub success: bool,
    pub base_url: String,
    #[serde(default)]
    pub uploaded_files: Option<u64>,
}

/// Terminal outcome reported to the request handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Deployed,
    Failed,
}

/// Completion webhook body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCompleteRequest {
    pub status: CompletionStatus,

    /// Published artifact base URL, present on success only
    #[serde(rename = "deploymentUrl", skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeploymentCompleteRequest {
    pub fn deployed(artifact_url: impl Into<String>) -> Self {
        Self {
            status: CompletionStatus::Deployed,
            artifact_url: Some(artifact_url.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: CompletionStatus::Failed,
            artifact_url: None,
            error: Some(error.into()),
        }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
