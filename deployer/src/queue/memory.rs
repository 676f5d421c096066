//! In-process job queue
//!
//! Same contract as the Redis queue without the durability. Used by tests and
//! local runs without a Redis server.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::errors::QueueError;
use crate::models::deployment::DeploymentJob;
use crate::queue::JobQueue;

/// In-memory FIFO queue
#[derive(Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw message, bypassing job encoding
    pub async fn push_raw(&self, payload: impl Into<String>) {
        self.items.lock().await.push_back(payload.into());
        self.notify.notify_one();
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: &DeploymentJob) -> Result<(), QueueError> {
        let payload = job.to_payload()?;
        self.push_raw(payload).await;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<DeploymentJob>, QueueError> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(payload) = self.items.lock().await.pop_front() {
                return DeploymentJob::from_payload(&payload).map(Some);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> Result<u64, QueueError> {
        Ok(self.items.lock().await.len() as u64)
    }
}
