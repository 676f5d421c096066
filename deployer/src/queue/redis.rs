//! Redis list backed job queue
//!
//! Jobs are pushed on the left (LPUSH) and popped from the right (BRPOP), so
//! the list is FIFO across every producer. BRPOP removes the element
//! atomically; two consumers can never observe the same job.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::errors::QueueError;
use crate::models::deployment::DeploymentJob;
use crate::queue::JobQueue;

/// Default Redis list name
pub const DEFAULT_QUEUE_NAME: &str = "deployment-queue";

/// Redis job queue
pub struct RedisQueue {
    /// Connection for LPUSH / LLEN
    producer: ConnectionManager,

    /// BRPOP blocks the connection it runs on, so the consumer gets its own.
    consumer: ConnectionManager,

    queue_name: String,
}

impl RedisQueue {
    /// Connect to Redis
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let producer = ConnectionManager::new(client.clone()).await?;
        let consumer = ConnectionManager::new(client).await?;

        Ok(Self {
            producer,
            consumer,
            queue_name: queue_name.to_string(),
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job: &DeploymentJob) -> Result<(), QueueError> {
        let payload = job.to_payload()?;
        let mut conn = self.producer.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, payload).await?;
        debug!(deployment_id = %job.id, "Enqueued deployment job");
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<DeploymentJob>, QueueError> {
        let mut conn = self.consumer.clone();
        // BRPOP treats 0 as "wait forever"
        let timeout_secs = timeout.as_secs().max(1);

        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.queue_name)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        match popped {
            Some((_, payload)) => DeploymentJob::from_payload(&payload).map(Some),
            None => Ok(None),
        }
    }

    async fn len(&self) -> Result<u64, QueueError> {
        let mut conn = self.producer.clone();
        let len: u64 = conn.llen(&self.queue_name).await?;
        Ok(len)
    }
}
