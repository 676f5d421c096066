//! Deployment job queue
//!
//! Multi-producer, single-consumer FIFO. Producers append at the tail, the
//! worker blocks on the head. A dequeued job is gone from the queue: there is
//! no processing list and no redelivery.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::QueueError;
use crate::models::deployment::DeploymentJob;

pub use self::memory::MemoryQueue;
pub use self::redis::RedisQueue;

/// Queue contract shared by the submission path and the worker
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job at the tail
    async fn enqueue(&self, job: &DeploymentJob) -> Result<(), QueueError>;

    /// Block until a job is available or `timeout` elapses, then remove and
    /// return the head. `Ok(None)` on timeout.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<DeploymentJob>, QueueError>;

    /// Current queue depth
    async fn len(&self) -> Result<u64, QueueError>;
}
