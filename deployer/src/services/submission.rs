//! Deployment submission

use std::sync::Arc;

use openapi_server::models::CreateDeploymentRequest;
use tracing::{error, info};

use crate::deploy::fsm::Transition;
use crate::errors::ServiceError;
use crate::models::deployment::{DeploymentJob, DEFAULT_BUILD_COMMAND};
use crate::queue::JobQueue;
use crate::status::StatusStore;
use crate::utils::generate_deployment_id;

/// Creates status records and enqueues jobs
pub struct SubmissionService {
    queue: Arc<dyn JobQueue>,
    store: Arc<StatusStore>,
    default_build_command: String,
}

impl SubmissionService {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<StatusStore>) -> Self {
        Self {
            queue,
            store,
            default_build_command: DEFAULT_BUILD_COMMAND.to_string(),
        }
    }

    pub fn with_default_build_command(mut self, command: impl Into<String>) -> Self {
        self.default_build_command = command.into();
        self
    }

    /// Validate and enqueue a deployment, returning the queued job.
    ///
    /// The status record exists before the job is visible to the worker, so
    /// a status query right after this returns never sees `NotFound`.
    pub async fn submit(
        &self,
        request: CreateDeploymentRequest,
        submitter_id: &str,
    ) -> Result<DeploymentJob, ServiceError> {
        let repo_url = request
            .repo_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ServiceError::ValidationError("Repository URL is required".to_string()))?;
        validate_repo_url(repo_url)?;

        let build_command = request
            .build_command
            .as_deref()
            .map(str::trim)
            .filter(|cmd| !cmd.is_empty())
            .unwrap_or(&self.default_build_command)
            .to_string();

        let job = DeploymentJob {
            id: generate_deployment_id(),
            repo_url: repo_url.to_string(),
            build_command,
            project_id: request.project_id.filter(|p| !p.trim().is_empty()),
            submitter_id: submitter_id.to_string(),
        };

        self.store.create(&job.id).await?;

        if let Err(e) = self.queue.enqueue(&job).await {
            error!(deployment_id = %job.id, "Failed to enqueue deployment: {}", e);
            let transition =
                Transition::failed(e.to_string()).with_log("Failed to queue deployment");
            if let Err(status_err) = self.store.transition(&job.id, transition).await {
                error!(deployment_id = %job.id, "Failed to record enqueue failure: {}", status_err);
            }
            return Err(e.into());
        }

        info!(deployment_id = %job.id, "Deployment queued: {}", job.repo_url);
        Ok(job)
    }
}

/// Accepts absolute URLs and scp-style `user@host:path` addresses
pub fn validate_repo_url(repo_url: &str) -> Result<(), ServiceError> {
    if let Ok(url) = url::Url::parse(repo_url) {
        if url.has_host() || url.scheme() == "file" {
            return Ok(());
        }
    }

    if is_scp_address(repo_url) {
        return Ok(());
    }

    Err(ServiceError::ValidationError(format!(
        "Invalid repository URL: {}",
        repo_url
    )))
}

fn is_scp_address(repo_url: &str) -> bool {
    let Some((host_part, path)) = repo_url.split_once(':') else {
        return false;
    };
    let host = host_part.rsplit('@').next().unwrap_or(host_part);

    // git would read a leading dash as an option
    !repo_url.starts_with('-')
        && !host.is_empty()
        && !path.is_empty()
        && !path.starts_with("//")
        && !repo_url.chars().any(char::is_whitespace)
}
