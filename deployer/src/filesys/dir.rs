//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;

use crate::errors::ServiceError;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), ServiceError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }
}

/// Job-scoped working directory.
///
/// `acquire` wipes whatever was left at the path and creates it fresh.
/// `release` removes it; if the guard is dropped without being released the
/// directory is removed synchronously in `Drop`.
#[derive(Debug)]
pub struct JobWorkspace {
    path: PathBuf,
    released: bool,
}

impl JobWorkspace {
    pub async fn acquire(root: &Dir, deployment_id: &str) -> std::io::Result<Self> {
        let path = root.path().join(deployment_id);

        match fs::remove_dir_all(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&path).await?;

        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory
    pub async fn release(mut self) -> std::io::Result<()> {
        self.released = true;
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove workspace {}: {}", self.path.display(), e);
            }
        }
    }
}
