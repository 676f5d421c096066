//! Artifact publishing through the upload service

use std::path::Path;

use async_trait::async_trait;
use openapi_client::models::{UploadDirectoryRequest, UploadDirectoryResponse};
use tracing::info;

use crate::errors::PipelineError;
use crate::http::client::HttpClient;

const UPLOAD_DIRECTORY_PATH: &str = "/api/upload/directory";

/// Publishes a build output directory and returns its base URL
#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    async fn publish(&self, output_dir: &Path, deployment_id: &str) -> Result<String, PipelineError>;
}

/// Publisher backed by the upload service HTTP API
pub struct UploadServicePublisher {
    client: HttpClient,
}

impl UploadServicePublisher {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactPublisher for UploadServicePublisher {
    async fn publish(&self, output_dir: &Path, deployment_id: &str) -> Result<String, PipelineError> {
        let request = UploadDirectoryRequest {
            directory_path: output_dir.to_string_lossy().into_owned(),
            deployment_id: deployment_id.to_string(),
        };

        let response: UploadDirectoryResponse = self
            .client
            .post(UPLOAD_DIRECTORY_PATH, &request)
            .await
            .map_err(|e| PipelineError::PublishFailure(format!("Upload failed: {}", e)))?;

        if response.base_url.trim().is_empty() {
            return Err(PipelineError::PublishFailure(
                "Upload failed: upload service returned no base URL".to_string(),
            ));
        }

        info!(
            deployment_id = %deployment_id,
            uploaded_files = ?response.uploaded_files,
            "Uploaded build output to {}",
            response.base_url
        );
        Ok(response.base_url)
    }
}
