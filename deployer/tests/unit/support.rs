//! Scripted collaborators and fixtures shared by the integration tests

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deployer::deploy::build::BuildRunner;
use deployer::deploy::executor::{Collaborators, DeploymentExecutor, Options};
use deployer::deploy::fsm::FsmSettings;
use deployer::deploy::git::SourceFetcher;
use deployer::errors::{PipelineError, ServiceError};
use deployer::http::callbacks::CompletionNotifier;
use deployer::http::uploads::ArtifactPublisher;
use deployer::models::deployment::DeploymentJob;
use deployer::status::StatusStore;
use openapi_client::models::DeploymentCompleteRequest;
use tokio::sync::Notify;

pub const ARTIFACT_BASE: &str = "http://localhost:3002";

/// Ordered record of collaborator calls across jobs
pub type Timeline = Arc<Mutex<Vec<String>>>;

pub fn job(id: &str) -> DeploymentJob {
    DeploymentJob {
        id: id.to_string(),
        repo_url: "https://example.com/r.git".to_string(),
        build_command: "npm run build".to_string(),
        project_id: None,
        submitter_id: "user-1".to_string(),
    }
}

/// Fetcher that writes a `package.json`, optionally failing or waiting on a gate
#[derive(Default)]
pub struct FakeFetcher {
    pub failure: Option<String>,
    pub gate: Option<Arc<Notify>>,
    pub fetched: Mutex<Vec<PathBuf>>,
    pub timeline: Timeline,
}

impl FakeFetcher {
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, _repo_url: &str, destination: &Path) -> Result<(), PipelineError> {
        self.fetched.lock().unwrap().push(destination.to_path_buf());
        let id = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.timeline.lock().unwrap().push(format!("fetch:{}", id));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.failure {
            return Err(PipelineError::FetchFailure(message.clone()));
        }
        std::fs::write(destination.join("package.json"), "{}")?;
        Ok(())
    }
}

/// Builder that creates the given output directories
pub struct FakeBuilder {
    pub outputs: Vec<&'static str>,
    pub failure: Option<String>,
    pub delay: Option<Duration>,
}

impl FakeBuilder {
    pub fn producing(outputs: &[&'static str]) -> Self {
        Self {
            outputs: outputs.to_vec(),
            failure: None,
            delay: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outputs: vec![],
            failure: Some(message.to_string()),
            delay: None,
        }
    }
}

#[async_trait]
impl BuildRunner for FakeBuilder {
    async fn build(&self, working_dir: &Path, _build_command: &str) -> Result<(), PipelineError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(PipelineError::BuildFailure(message.clone()));
        }
        for output in &self.outputs {
            std::fs::create_dir_all(working_dir.join(output))?;
            std::fs::write(working_dir.join(output).join("index.html"), "<html/>")?;
        }
        Ok(())
    }
}

/// Publisher returning `<base>/deployments/<id>/`
#[derive(Default)]
pub struct FakePublisher {
    pub failure: Option<String>,
    pub published: Mutex<Vec<(PathBuf, String)>>,
}

#[async_trait]
impl ArtifactPublisher for FakePublisher {
    async fn publish(&self, output_dir: &Path, deployment_id: &str) -> Result<String, PipelineError> {
        if let Some(message) = &self.failure {
            return Err(PipelineError::PublishFailure(message.clone()));
        }
        self.published
            .lock()
            .unwrap()
            .push((output_dir.to_path_buf(), deployment_id.to_string()));
        Ok(format!("{}/deployments/{}/", ARTIFACT_BASE, deployment_id))
    }
}

/// Notifier that records every callback
#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    pub calls: Mutex<Vec<(String, DeploymentCompleteRequest)>>,
    pub timeline: Timeline,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<(String, DeploymentCompleteRequest)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify(
        &self,
        deployment_id: &str,
        request: &DeploymentCompleteRequest,
    ) -> Result<(), ServiceError> {
        self.timeline
            .lock()
            .unwrap()
            .push(format!("notify:{}", deployment_id));
        self.calls
            .lock()
            .unwrap()
            .push((deployment_id.to_string(), request.clone()));
        if self.fail {
            return Err(ServiceError::ServerError("503 Service Unavailable".to_string()));
        }
        Ok(())
    }
}

/// A pipeline wired to scripted collaborators
pub struct Harness {
    pub store: Arc<StatusStore>,
    pub fetcher: Arc<FakeFetcher>,
    pub publisher: Arc<FakePublisher>,
    pub notifier: Arc<RecordingNotifier>,
    pub executor: Arc<DeploymentExecutor>,
    pub timeline: Timeline,
    pub workspace: tempfile::TempDir,
}

impl Harness {
    pub fn new(fetcher: FakeFetcher, builder: FakeBuilder) -> Self {
        Self::with(fetcher, builder, FakePublisher::default(), RecordingNotifier::default())
    }

    pub fn with(
        fetcher: FakeFetcher,
        builder: FakeBuilder,
        publisher: FakePublisher,
        notifier: RecordingNotifier,
    ) -> Self {
        Self::with_settings(fetcher, builder, publisher, notifier, FsmSettings::default())
    }

    pub fn with_settings(
        fetcher: FakeFetcher,
        builder: FakeBuilder,
        publisher: FakePublisher,
        notifier: RecordingNotifier,
        fsm: FsmSettings,
    ) -> Self {
        let store = Arc::new(StatusStore::in_memory());
        Self::with_store(store, fetcher, builder, publisher, notifier, fsm)
    }

    pub fn with_store(
        store: Arc<StatusStore>,
        mut fetcher: FakeFetcher,
        builder: FakeBuilder,
        publisher: FakePublisher,
        mut notifier: RecordingNotifier,
        fsm: FsmSettings,
    ) -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let timeline = Timeline::default();
        fetcher.timeline = timeline.clone();
        notifier.timeline = timeline.clone();
        let fetcher = Arc::new(fetcher);
        let publisher = Arc::new(publisher);
        let notifier = Arc::new(notifier);

        let options = Options {
            workspace_root: workspace.path().to_path_buf(),
            fsm,
            terminal_write_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let collaborators = Collaborators {
            fetcher: fetcher.clone(),
            builder: Arc::new(builder),
            publisher: publisher.clone(),
            notifier: notifier.clone(),
        };
        let executor = Arc::new(DeploymentExecutor::new(options, store.clone(), collaborators));

        Self {
            store,
            fetcher,
            publisher,
            notifier,
            executor,
            timeline,
            workspace,
        }
    }

    /// Directory the job would use
    pub fn job_dir(&self, id: &str) -> PathBuf {
        self.workspace.path().join(id)
    }
}
