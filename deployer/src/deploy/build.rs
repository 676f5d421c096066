//! Dependency install, build, and build output resolution

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::deploy::command;
use crate::errors::PipelineError;

/// Install step run before every build
pub const DEFAULT_INSTALL_COMMAND: &str = "npm install";

/// Output directories checked after a build, in order
pub const DEFAULT_OUTPUT_DIRS: [&str; 3] = ["dist", "build", "out"];

/// Runs the dependency install followed by the build command
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn build(&self, working_dir: &Path, build_command: &str) -> Result<(), PipelineError>;
}

/// Runner that executes both steps through `bash -c`
#[derive(Debug, Clone)]
pub struct ShellBuildRunner {
    install_command: String,
}

impl ShellBuildRunner {
    pub fn new(install_command: impl Into<String>) -> Self {
        Self {
            install_command: install_command.into(),
        }
    }
}

impl Default for ShellBuildRunner {
    fn default() -> Self {
        Self::new(DEFAULT_INSTALL_COMMAND)
    }
}

#[async_trait]
impl BuildRunner for ShellBuildRunner {
    async fn build(&self, working_dir: &Path, build_command: &str) -> Result<(), PipelineError> {
        if !self.install_command.trim().is_empty() {
            info!("Running install command: {}", self.install_command);
            command::run_shell(&self.install_command, working_dir)
                .await
                .map_err(PipelineError::BuildFailure)?;
        }

        info!("Running build command: {}", build_command);
        command::run_shell(build_command, working_dir)
            .await
            .map_err(PipelineError::BuildFailure)?;

        Ok(())
    }
}

/// First candidate directory that exists below `working_dir`
pub async fn resolve_output_dir(
    working_dir: &Path,
    candidates: &[String],
) -> Result<PathBuf, PipelineError> {
    for candidate in candidates {
        let path = working_dir.join(candidate);
        let is_dir = fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false);
        if is_dir {
            debug!("Resolved build output directory: {}", path.display());
            return Ok(path);
        }
    }

    Err(PipelineError::BuildOutputMissing)
}
