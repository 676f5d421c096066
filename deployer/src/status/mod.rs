//! Deployment status store
//!
//! The in-process cache is the read path. Every mutation is written through
//! to the durable backend before the cache is touched and before the call
//! returns, so the two never disagree about an id. Cache misses hydrate from
//! the backend.

pub mod backend;
pub mod postgres;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::deploy::fsm::Transition;
use crate::errors::StatusError;
use crate::models::deployment::DeploymentStatus;

pub use self::backend::{MemoryBackend, StatusBackend};
pub use self::postgres::PostgresBackend;

/// Message recorded when a caller cancels a deployment
pub const CANCELLED_MESSAGE: &str = "Deployment cancelled by user";

/// Default number of cached records
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Status store with a write-through cache
pub struct StatusStore {
    cache: RwLock<HashMap<String, DeploymentStatus>>,
    backend: Arc<dyn StatusBackend>,

    /// Serializes every read-modify-write
    write_lock: Mutex<()>,

    capacity: usize,
}

impl StatusStore {
    pub fn new(backend: Arc<dyn StatusBackend>, capacity: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            backend,
            write_lock: Mutex::new(()),
            capacity: capacity.max(1),
        }
    }

    /// Store over an in-memory backend
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), DEFAULT_CACHE_CAPACITY)
    }

    /// Create a `pending` record with no logs
    pub async fn create(&self, id: &str) -> Result<DeploymentStatus, StatusError> {
        let _guard = self.write_lock.lock().await;

        if self.cached(id).is_some() {
            return Err(StatusError::AlreadyExists(id.to_string()));
        }

        let status = DeploymentStatus::new(id);
        self.backend.insert(&status).await?;
        self.cache_put(status.clone());

        debug!(deployment_id = %id, "Created deployment status");
        Ok(status)
    }

    /// Apply a phase transition and return the updated record
    pub async fn transition(
        &self,
        id: &str,
        transition: Transition,
    ) -> Result<DeploymentStatus, StatusError> {
        let _guard = self.write_lock.lock().await;

        let mut status = self.load(id).await?;
        status.apply(&transition, Utc::now())?;
        self.persist(status).await
    }

    /// Current record, hydrating from the durable backend on a cache miss
    pub async fn get(&self, id: &str) -> Result<DeploymentStatus, StatusError> {
        if let Some(status) = self.cached(id) {
            return Ok(status);
        }

        // Hydrate under the write lock so a copy read before a concurrent
        // write can never replace the newer record in the cache.
        let _guard = self.write_lock.lock().await;
        let status = self.load(id).await?;
        self.cache_put(status.clone());
        Ok(status)
    }

    /// Move a non-terminal deployment to `failed`. Terminal records are left
    /// untouched and yield `InvalidState`.
    pub async fn cancel(&self, id: &str) -> Result<DeploymentStatus, StatusError> {
        let _guard = self.write_lock.lock().await;

        let mut status = self.load(id).await?;
        if status.is_terminal() {
            return Err(StatusError::InvalidState {
                id: id.to_string(),
                reason: format!("deployment is already {}", status.phase),
            });
        }

        let transition = Transition::failed(CANCELLED_MESSAGE).with_log(CANCELLED_MESSAGE);
        status.apply(&transition, Utc::now())?;
        let status = self.persist(status).await?;

        info!(deployment_id = %id, "Deployment cancelled");
        Ok(status)
    }

    /// Drop a cached record; the next read hydrates it from the backend
    pub fn evict(&self, id: &str) -> Option<DeploymentStatus> {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.remove(id)
    }

    /// Number of cached records
    pub fn cached_len(&self) -> usize {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache.len()
    }

    // Callers hold the write lock.
    async fn load(&self, id: &str) -> Result<DeploymentStatus, StatusError> {
        if let Some(status) = self.cached(id) {
            return Ok(status);
        }
        self.backend
            .load(id)
            .await?
            .ok_or_else(|| StatusError::NotFound(id.to_string()))
    }

    async fn persist(&self, status: DeploymentStatus) -> Result<DeploymentStatus, StatusError> {
        self.backend.update(&status).await?;
        self.cache_put(status.clone());
        Ok(status)
    }

    fn cached(&self, id: &str) -> Option<DeploymentStatus> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache.get(id).cloned()
    }

    fn cache_put(&self, status: DeploymentStatus) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(status.id.clone(), status);
        Self::evict_over_capacity(&mut cache, self.capacity);
    }

    /// Evict the oldest finished records; in-flight ones always stay cached.
    fn evict_over_capacity(cache: &mut HashMap<String, DeploymentStatus>, capacity: usize) {
        while cache.len() > capacity {
            let oldest = cache
                .values()
                .filter(|s| s.is_terminal())
                .min_by_key(|s| s.ended_at)
                .map(|s| s.id.clone());

            match oldest {
                Some(id) => {
                    cache.remove(&id);
                }
                None => break,
            }
        }
    }
}
