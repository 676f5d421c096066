//! Deployment pipeline executor
//!
//! Drives one job from `pending` to a terminal phase. Each stage runs under a
//! deadline inside a job-scoped workspace that is removed on both terminal
//! paths before the completion callback goes out.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use openapi_client::models::DeploymentCompleteRequest;
use tracing::{error, info, warn};

use crate::deploy::build::{self, BuildRunner};
use crate::deploy::fsm::{FsmSettings, Phase, Transition};
use crate::deploy::git::SourceFetcher;
use crate::errors::{PipelineError, StatusError};
use crate::filesys::dir::{Dir, JobWorkspace};
use crate::http::callbacks::CompletionNotifier;
use crate::http::uploads::ArtifactPublisher;
use crate::models::deployment::DeploymentJob;
use crate::status::{StatusStore, CANCELLED_MESSAGE};

/// Terminal result of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentOutcome {
    Deployed { artifact_url: String },
    Failed { error: String },
}

impl DeploymentOutcome {
    pub fn phase(&self) -> Phase {
        match self {
            DeploymentOutcome::Deployed { .. } => Phase::Deployed,
            DeploymentOutcome::Failed { .. } => Phase::Failed,
        }
    }
}

/// External collaborators invoked by the pipeline
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn SourceFetcher>,
    pub builder: Arc<dyn BuildRunner>,
    pub publisher: Arc<dyn ArtifactPublisher>,
    pub notifier: Arc<dyn CompletionNotifier>,
}

/// Executor options
#[derive(Debug, Clone)]
pub struct Options {
    /// Root under which each job gets its own directory
    pub workspace_root: PathBuf,

    /// Build output candidates, tried in order
    pub output_dirs: Vec<String>,

    pub fsm: FsmSettings,

    /// Attempts at recording a terminal phase while the durable store fails
    pub terminal_write_attempts: u32,

    /// First wait between those attempts, doubled after each failure
    pub terminal_write_backoff: Duration,
}

/// Upper bound on the wait between terminal write attempts
const MAX_TERMINAL_WRITE_BACKOFF: Duration = Duration::from_secs(30);

impl Default for Options {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("deployflow"),
            output_dirs: build::DEFAULT_OUTPUT_DIRS
                .iter()
                .map(|d| d.to_string())
                .collect(),
            fsm: FsmSettings::default(),
            terminal_write_attempts: 8,
            terminal_write_backoff: Duration::from_millis(500),
        }
    }
}

/// Runs deployment jobs end to end
pub struct DeploymentExecutor {
    store: Arc<StatusStore>,
    collaborators: Collaborators,
    workspace_root: Dir,
    output_dirs: Vec<String>,
    fsm: FsmSettings,
    terminal_write_attempts: u32,
    terminal_write_backoff: Duration,
}

impl DeploymentExecutor {
    pub fn new(options: Options, store: Arc<StatusStore>, collaborators: Collaborators) -> Self {
        Self {
            store,
            collaborators,
            workspace_root: Dir::new(options.workspace_root),
            output_dirs: options.output_dirs,
            fsm: options.fsm,
            terminal_write_attempts: options.terminal_write_attempts.max(1),
            terminal_write_backoff: options.terminal_write_backoff,
        }
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    /// Run a job to a terminal phase and send the completion callback.
    ///
    /// Returns `None` when the job never started because its record was
    /// already terminal (cancelled while queued) or missing. A durable store
    /// failure on the first transition fails the job instead.
    pub async fn process(&self, job: &DeploymentJob) -> Option<DeploymentOutcome> {
        info!(deployment_id = %job.id, "Processing deployment: {}", job.repo_url);

        let started = Transition::advance(Phase::Cloning)
            .with_log(format!("Cloning repository {}...", job.repo_url));
        match self.store.transition(&job.id, started).await {
            Ok(_) => {}
            Err(StatusError::InvalidState { .. }) => {
                info!(deployment_id = %job.id, "Deployment no longer pending, skipping");
                return None;
            }
            Err(StatusError::NotFound(_)) => {
                warn!(deployment_id = %job.id, "No status record for deployment, skipping");
                return None;
            }
            Err(e) => {
                error!(deployment_id = %job.id, "Failed to start deployment: {}", e);
                let outcome = self.fail(job, PipelineError::Status(e)).await;
                self.notify(job, &outcome).await;
                return Some(outcome);
            }
        }

        let workspace = match JobWorkspace::acquire(&self.workspace_root, &job.id).await {
            Ok(ws) => ws,
            Err(e) => {
                let outcome = self.fail(job, PipelineError::Workspace(e)).await;
                self.notify(job, &outcome).await;
                return Some(outcome);
            }
        };

        let outcome = match self.run_stages(job, workspace.path()).await {
            Ok(artifact_url) => {
                info!(deployment_id = %job.id, "Deployment completed: {}", artifact_url);
                DeploymentOutcome::Deployed { artifact_url }
            }
            Err(e) => self.fail(job, e).await,
        };

        if let Err(e) = workspace.release().await {
            warn!(deployment_id = %job.id, "Failed to remove workspace: {}", e);
        }

        self.notify(job, &outcome).await;
        Some(outcome)
    }

    async fn run_stages(&self, job: &DeploymentJob, workdir: &Path) -> Result<String, PipelineError> {
        let fetcher = &self.collaborators.fetcher;
        with_deadline(
            "Clone",
            self.fsm.fetch_timeout,
            fetcher.fetch(&job.repo_url, workdir),
        )
        .await?;

        self.advance(
            job,
            Transition::advance(Phase::Building)
                .with_log("Installing dependencies and building..."),
        )
        .await?;

        let builder = &self.collaborators.builder;
        with_deadline(
            "Build",
            self.fsm.build_timeout,
            builder.build(workdir, &job.build_command),
        )
        .await?;
        let output_dir = build::resolve_output_dir(workdir, &self.output_dirs).await?;

        self.advance(
            job,
            Transition::advance(Phase::Uploading).with_log("Uploading build files..."),
        )
        .await?;

        let publisher = &self.collaborators.publisher;
        let artifact_url = with_deadline(
            "Upload",
            self.fsm.publish_timeout,
            publisher.publish(&output_dir, &job.id),
        )
        .await?;

        let deployed = Transition::deployed(artifact_url.clone())
            .with_log("Deployment completed successfully!");
        match self.record_terminal(job, deployed).await {
            Ok(()) => Ok(artifact_url),
            Err(StatusError::InvalidState { .. }) => Err(PipelineError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    /// A rejected edge means the record went terminal underneath us.
    async fn advance(&self, job: &DeploymentJob, transition: Transition) -> Result<(), PipelineError> {
        match self.store.transition(&job.id, transition).await {
            Ok(_) => Ok(()),
            Err(StatusError::InvalidState { .. }) => Err(PipelineError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    async fn fail(&self, job: &DeploymentJob, err: PipelineError) -> DeploymentOutcome {
        if matches!(err, PipelineError::Cancelled) {
            info!(deployment_id = %job.id, "Deployment cancelled, stopping pipeline");
            return DeploymentOutcome::Failed {
                error: CANCELLED_MESSAGE.to_string(),
            };
        }

        error!(deployment_id = %job.id, "Deployment failed: {}", err);

        let transition = Transition::failed(err.to_string()).with_log("Deployment failed");
        let message = transition.error().map(str::to_string).unwrap_or_default();

        match self.record_terminal(job, transition).await {
            Ok(()) => {}
            Err(StatusError::InvalidState { .. }) => {
                return DeploymentOutcome::Failed {
                    error: CANCELLED_MESSAGE.to_string(),
                };
            }
            Err(e) => {
                error!(deployment_id = %job.id, "Failed to record failure: {}", e);
            }
        }

        DeploymentOutcome::Failed { error: message }
    }

    /// The worker only moves on once the current record is terminal, so a
    /// failing durable store is retried with a doubling backoff.
    async fn record_terminal(
        &self,
        job: &DeploymentJob,
        transition: Transition,
    ) -> Result<(), StatusError> {
        let mut backoff = self.terminal_write_backoff;
        let mut attempt = 1;

        loop {
            match self.store.transition(&job.id, transition.clone()).await {
                Ok(_) => return Ok(()),
                Err(StatusError::Durable(e)) if attempt < self.terminal_write_attempts => {
                    warn!(
                        deployment_id = %job.id,
                        attempt,
                        "Failed to record {} phase, retrying in {:?}: {}",
                        transition.phase(),
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_TERMINAL_WRITE_BACKOFF);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn notify(&self, job: &DeploymentJob, outcome: &DeploymentOutcome) {
        let request = match outcome {
            DeploymentOutcome::Deployed { artifact_url } => {
                DeploymentCompleteRequest::deployed(artifact_url.clone())
            }
            DeploymentOutcome::Failed { error } => DeploymentCompleteRequest::failed(error.clone()),
        };

        if let Err(e) = self.collaborators.notifier.notify(&job.id, &request).await {
            warn!(deployment_id = %job.id, "Completion callback failed: {}", e);
        }
    }
}

/// Dropping the stage future on timeout kills any child process it owns.
async fn with_deadline<T, F>(stage: &'static str, after: Duration, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::TimedOut { stage, after }),
    }
}
