//! Deployment worker: the single consumer of the job queue

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::deploy::executor::DeploymentExecutor;
use crate::deploy::fsm::Transition;
use crate::errors::{QueueError, StatusError};
use crate::queue::JobQueue;
use crate::status::StatusStore;

/// Deployer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Longest a single blocking dequeue waits
    pub dequeue_timeout: Duration,

    /// Wait after a queue transport failure
    pub error_backoff: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Run the deployer worker.
///
/// Jobs are processed one at a time in dequeue order. Shutdown is observed
/// between dequeues and while backing off, so it can take up to one
/// `dequeue_timeout` to land; an in-flight job always runs to its terminal
/// phase first.
pub async fn run<S, F>(
    options: &Options,
    queue: Arc<dyn JobQueue>,
    executor: Arc<DeploymentExecutor>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Deployer worker starting...");

    loop {
        // A BRPOP reply dropped mid-flight would lose a job Redis already
        // removed, so shutdown is only observed between dequeues.
        let stop = tokio::select! {
            biased;
            _ = &mut shutdown_signal => true,
            _ = std::future::ready(()) => false,
        };
        if stop {
            info!("Deployer worker shutting down...");
            return;
        }

        let dequeued = queue.dequeue(options.dequeue_timeout).await;

        match dequeued {
            Ok(Some(job)) => {
                if let Some(outcome) = executor.process(&job).await {
                    debug!(deployment_id = %job.id, phase = %outcome.phase(), "Deployment finished");
                }
            }
            Ok(None) => continue,
            Err(QueueError::MalformedJob { id, reason }) => {
                warn!("Discarding malformed deployment job: {}", reason);
                if let Some(id) = id {
                    reject_malformed(executor.store(), &id, &reason).await;
                }
            }
            Err(e) => {
                error!("Queue processing error: {}", e);
                tokio::select! {
                    _ = &mut shutdown_signal => {
                        info!("Deployer worker shutting down...");
                        return;
                    }
                    _ = sleep_fn(options.error_backoff) => {}
                }
            }
        }
    }
}

/// Fail the record of a job whose message could not be decoded, if the
/// record exists and is still open.
async fn reject_malformed(store: &StatusStore, id: &str, reason: &str) {
    let message = format!("Malformed deployment request: {}", reason);
    let transition = Transition::failed(message.clone()).with_log(message);

    match store.transition(id, transition).await {
        Ok(_) => info!(deployment_id = %id, "Marked malformed deployment as failed"),
        Err(StatusError::NotFound(_)) | Err(StatusError::InvalidState { .. }) => {
            debug!(deployment_id = %id, "No open record for malformed deployment");
        }
        Err(e) => error!(deployment_id = %id, "Failed to record malformed deployment: {}", e),
    }
}
