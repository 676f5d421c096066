//! Source fetching with git

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::deploy::command;
use crate::errors::PipelineError;

/// Populates a directory with a full checkout of a repository
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, repo_url: &str, destination: &Path) -> Result<(), PipelineError>;
}

/// Fetcher that shells out to `git clone`
#[derive(Debug, Clone, Default)]
pub struct GitFetcher;

impl GitFetcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, repo_url: &str, destination: &Path) -> Result<(), PipelineError> {
        info!("Cloning repository: {} to {}", repo_url, destination.display());

        let mut cmd = Command::new("git");
        // Never wait on a credential prompt
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .arg("clone")
            .arg("--")
            .arg(repo_url)
            .arg(destination);

        command::run(cmd, &format!("git clone {}", repo_url))
            .await
            .map_err(PipelineError::FetchFailure)?;

        info!("Successfully cloned repository");
        Ok(())
    }
}
