//! Pipeline executor tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deployer::deploy::executor::DeploymentOutcome;
use deployer::deploy::fsm::{FsmSettings, Phase};
use deployer::errors::StatusError;
use deployer::models::deployment::DeploymentStatus;
use deployer::status::{
    MemoryBackend, StatusBackend, StatusStore, CANCELLED_MESSAGE, DEFAULT_CACHE_CAPACITY,
};
use openapi_client::models::CompletionStatus;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

use crate::support::{
    job, FakeBuilder, FakeFetcher, FakePublisher, Harness, RecordingNotifier, ARTIFACT_BASE,
};

#[tokio::test]
async fn test_successful_deployment() {
    let harness = Harness::new(FakeFetcher::default(), FakeBuilder::producing(&["dist"]));
    assert_ok!(harness.store.create("ab12cd34").await);

    let outcome = harness.executor.process(&job("ab12cd34")).await;

    let expected_url = format!("{}/deployments/ab12cd34/", ARTIFACT_BASE);
    assert_eq!(
        outcome,
        Some(DeploymentOutcome::Deployed {
            artifact_url: expected_url.clone()
        })
    );

    let status = assert_ok!(harness.store.get("ab12cd34").await);
    assert_eq!(status.phase, Phase::Deployed);
    assert_eq!(status.artifact_url.as_deref(), Some(expected_url.as_str()));
    assert!(status.error_message.is_none());
    assert!(status.ended_at.is_some());
    assert_eq!(status.log_lines.len(), 4);
    assert!(status.log_lines[3].ends_with("Deployment completed successfully!"));

    // Publisher saw the resolved output directory
    let published = harness.publisher.published.lock().unwrap().clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, harness.job_dir("ab12cd34").join("dist"));

    // Workspace removed before the callback
    assert!(!harness.job_dir("ab12cd34").exists());

    let calls = harness.notifier.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "ab12cd34");
    assert_eq!(calls[0].1.status, CompletionStatus::Deployed);
    assert_eq!(calls[0].1.artifact_url.as_deref(), Some(expected_url.as_str()));
}

#[tokio::test]
async fn test_build_failure_records_tool_error() {
    let harness = Harness::new(
        FakeFetcher::default(),
        FakeBuilder::failing("npm ERR! missing script: build"),
    );
    assert_ok!(harness.store.create("ab12cd34").await);

    let outcome = harness.executor.process(&job("ab12cd34")).await;
    assert_eq!(
        outcome,
        Some(DeploymentOutcome::Failed {
            error: "npm ERR! missing script: build".to_string()
        })
    );

    let status = assert_ok!(harness.store.get("ab12cd34").await);
    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(
        status.error_message.as_deref(),
        Some("npm ERR! missing script: build")
    );
    assert!(status.artifact_url.is_none());
    assert!(status.ended_at.is_some());

    // Logs show the build stage was reached
    assert!(status
        .log_lines
        .iter()
        .any(|line| line.ends_with("Installing dependencies and building...")));

    // Cleanup on the failure path too
    assert!(!harness.job_dir("ab12cd34").exists());

    let calls = harness.notifier.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.status, CompletionStatus::Failed);
    assert_eq!(
        calls[0].1.error.as_deref(),
        Some("npm ERR! missing script: build")
    );
    assert!(calls[0].1.artifact_url.is_none());
}

#[tokio::test]
async fn test_missing_build_output() {
    let harness = Harness::new(FakeFetcher::default(), FakeBuilder::producing(&["public"]));
    assert_ok!(harness.store.create("ab12cd34").await);

    harness.executor.process(&job("ab12cd34")).await;

    let status = assert_ok!(harness.store.get("ab12cd34").await);
    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(
        status.error_message.as_deref(),
        Some("Build output directory not found")
    );
    assert!(harness.publisher.published.lock().unwrap().is_empty());
    assert!(!harness.job_dir("ab12cd34").exists());
}

#[tokio::test]
async fn test_output_candidates_tried_in_order() {
    let harness = Harness::new(
        FakeFetcher::default(),
        FakeBuilder::producing(&["out", "build"]),
    );
    assert_ok!(harness.store.create("ab12cd34").await);

    harness.executor.process(&job("ab12cd34")).await;

    let published = harness.publisher.published.lock().unwrap().clone();
    assert_eq!(published[0].0, harness.job_dir("ab12cd34").join("build"));
}

#[tokio::test]
async fn test_fetch_failure_skips_build() {
    let harness = Harness::new(
        FakeFetcher::failing("fatal: repository not found"),
        FakeBuilder::producing(&["dist"]),
    );
    assert_ok!(harness.store.create("ab12cd34").await);

    harness.executor.process(&job("ab12cd34")).await;

    let status = assert_ok!(harness.store.get("ab12cd34").await);
    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(
        status.error_message.as_deref(),
        Some("fatal: repository not found")
    );
    assert!(!status
        .log_lines
        .iter()
        .any(|line| line.contains("building")));
}

#[tokio::test]
async fn test_publish_failure() {
    let publisher = FakePublisher {
        failure: Some("Upload failed: connection refused".to_string()),
        ..Default::default()
    };
    let harness = Harness::with(
        FakeFetcher::default(),
        FakeBuilder::producing(&["dist"]),
        publisher,
        RecordingNotifier::default(),
    );
    assert_ok!(harness.store.create("ab12cd34").await);

    harness.executor.process(&job("ab12cd34")).await;

    let status = assert_ok!(harness.store.get("ab12cd34").await);
    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(
        status.error_message.as_deref(),
        Some("Upload failed: connection refused")
    );
    assert!(status.artifact_url.is_none());
}

#[tokio::test]
async fn test_empty_error_becomes_unknown_error() {
    let harness = Harness::new(FakeFetcher::default(), FakeBuilder::failing(""));
    assert_ok!(harness.store.create("ab12cd34").await);

    harness.executor.process(&job("ab12cd34")).await;

    let status = assert_ok!(harness.store.get("ab12cd34").await);
    assert_eq!(status.error_message.as_deref(), Some("Unknown error"));
}

#[tokio::test]
async fn test_stuck_build_times_out() {
    let builder = FakeBuilder {
        outputs: vec!["dist"],
        failure: None,
        delay: Some(Duration::from_secs(5)),
    };
    let fsm = FsmSettings {
        build_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let harness = Harness::with_settings(
        FakeFetcher::default(),
        builder,
        FakePublisher::default(),
        RecordingNotifier::default(),
        fsm,
    );
    assert_ok!(harness.store.create("ab12cd34").await);

    harness.executor.process(&job("ab12cd34")).await;

    let status = assert_ok!(harness.store.get("ab12cd34").await);
    assert_eq!(status.phase, Phase::Failed);
    let error = status.error_message.unwrap_or_default();
    assert!(error.starts_with("Build timed out"), "{}", error);
    assert!(!harness.job_dir("ab12cd34").exists());
}

#[tokio::test]
async fn test_notifier_failure_keeps_terminal_phase() {
    let notifier = RecordingNotifier {
        fail: true,
        ..Default::default()
    };
    let harness = Harness::with(
        FakeFetcher::default(),
        FakeBuilder::producing(&["dist"]),
        FakePublisher::default(),
        notifier,
    );
    assert_ok!(harness.store.create("ab12cd34").await);

    harness.executor.process(&job("ab12cd34")).await;

    let status = assert_ok!(harness.store.get("ab12cd34").await);
    assert_eq!(status.phase, Phase::Deployed);
    assert_eq!(harness.notifier.calls().len(), 1);
}

#[tokio::test]
async fn test_stale_workspace_is_replaced() {
    let harness = Harness::new(FakeFetcher::default(), FakeBuilder::producing(&["dist"]));
    let stale = harness.job_dir("ab12cd34").join("dist");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("old.html"), "stale").unwrap();
    assert_ok!(harness.store.create("ab12cd34").await);

    let fetcher = harness.fetcher.clone();
    harness.executor.process(&job("ab12cd34")).await;

    assert_eq!(fetcher.fetched.lock().unwrap().len(), 1);
    assert!(!harness.job_dir("ab12cd34").exists());
}

#[tokio::test]
async fn test_cancelled_while_queued_is_skipped() {
    let harness = Harness::new(FakeFetcher::default(), FakeBuilder::producing(&["dist"]));
    assert_ok!(harness.store.create("ab12cd34").await);
    assert_ok!(harness.store.cancel("ab12cd34").await);

    let outcome = harness.executor.process(&job("ab12cd34")).await;
    assert!(outcome.is_none());

    assert!(harness.fetcher.fetched.lock().unwrap().is_empty());
    assert!(harness.notifier.calls().is_empty());

    let status = assert_ok!(harness.store.get("ab12cd34").await);
    assert_eq!(status.error_message.as_deref(), Some(CANCELLED_MESSAGE));
}

#[tokio::test]
async fn test_cancel_during_clone_stops_pipeline() {
    let gate = Arc::new(Notify::new());
    let harness = Harness::new(
        FakeFetcher::gated(gate.clone()),
        FakeBuilder::producing(&["dist"]),
    );
    assert_ok!(harness.store.create("ab12cd34").await);

    let executor = harness.executor.clone();
    let task = tokio::spawn(async move { executor.process(&job("ab12cd34")).await });

    // Wait until the worker is cloning
    for _ in 0..100 {
        if harness.store.get("ab12cd34").await.unwrap().phase == Phase::Cloning {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let cancelled = assert_ok!(harness.store.cancel("ab12cd34").await);
    assert_eq!(cancelled.phase, Phase::Failed);
    gate.notify_one();

    let outcome = task.await.unwrap();
    assert_eq!(
        outcome,
        Some(DeploymentOutcome::Failed {
            error: CANCELLED_MESSAGE.to_string()
        })
    );

    // Status is still the cancellation, not overwritten
    let status = assert_ok!(harness.store.get("ab12cd34").await);
    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(status.error_message.as_deref(), Some(CANCELLED_MESSAGE));
    assert!(harness.publisher.published.lock().unwrap().is_empty());
    assert!(!harness.job_dir("ab12cd34").exists());

    let calls = harness.notifier.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.error.as_deref(), Some(CANCELLED_MESSAGE));

    // Terminal: a second cancel is rejected
    let err = assert_err!(harness.store.cancel("ab12cd34").await);
    assert!(matches!(err, StatusError::InvalidState { .. }));
}

#[tokio::test]
async fn test_unknown_deployment_is_skipped() {
    let harness = Harness::new(FakeFetcher::default(), FakeBuilder::producing(&["dist"]));

    let outcome = harness.executor.process(&job("missing1")).await;
    assert!(outcome.is_none());
    assert!(harness.notifier.calls().is_empty());
}

/// Backend whose updates fail a set number of times, counted separately for
/// terminal and in-flight records
#[derive(Default)]
struct ShakyBackend {
    inner: MemoryBackend,
    terminal_failures: AtomicUsize,
    progress_failures: AtomicUsize,
}

impl ShakyBackend {
    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StatusBackend for ShakyBackend {
    async fn insert(&self, status: &DeploymentStatus) -> Result<(), StatusError> {
        self.inner.insert(status).await
    }

    async fn update(&self, status: &DeploymentStatus) -> Result<(), StatusError> {
        let counter = if status.is_terminal() {
            &self.terminal_failures
        } else {
            &self.progress_failures
        };
        if Self::take_failure(counter) {
            return Err(StatusError::Durable("connection reset".to_string()));
        }
        self.inner.update(status).await
    }

    async fn load(&self, id: &str) -> Result<Option<DeploymentStatus>, StatusError> {
        self.inner.load(id).await
    }
}

fn shaky_harness(backend: Arc<ShakyBackend>, publisher: FakePublisher) -> Harness {
    let store = Arc::new(StatusStore::new(backend, DEFAULT_CACHE_CAPACITY));
    Harness::with_store(
        store,
        FakeFetcher::default(),
        FakeBuilder::producing(&["dist"]),
        publisher,
        RecordingNotifier::default(),
        FsmSettings::default(),
    )
}

#[tokio::test]
async fn test_failed_phase_recorded_despite_durable_errors() {
    let backend = Arc::new(ShakyBackend::default());
    let publisher = FakePublisher {
        failure: Some("Upload failed: connection refused".to_string()),
        ..Default::default()
    };
    let harness = shaky_harness(backend.clone(), publisher);
    assert_ok!(harness.store.create("aaaa0001").await);
    assert_ok!(harness.store.create("bbbb0002").await);

    backend.terminal_failures.store(3, Ordering::SeqCst);
    harness.executor.process(&job("aaaa0001")).await;

    // Terminal before the worker could move on
    let a = assert_ok!(harness.store.get("aaaa0001").await);
    assert_eq!(a.phase, Phase::Failed);
    assert!(a.ended_at.is_some());
    assert_eq!(backend.terminal_failures.load(Ordering::SeqCst), 0);

    let row = backend.inner.row("aaaa0001").await.unwrap();
    assert_eq!(row.status, "failed");
    assert!(row.completed_at.is_some());

    harness.executor.process(&job("bbbb0002")).await;
    harness.store.evict("aaaa0001");
    let a = assert_ok!(harness.store.get("aaaa0001").await);
    assert_eq!(a.phase, Phase::Failed);
}

#[tokio::test]
async fn test_deployed_phase_recorded_despite_durable_errors() {
    let backend = Arc::new(ShakyBackend::default());
    let harness = shaky_harness(backend.clone(), FakePublisher::default());
    assert_ok!(harness.store.create("ab12cd34").await);

    backend.terminal_failures.store(2, Ordering::SeqCst);
    let outcome = harness.executor.process(&job("ab12cd34")).await;

    assert_eq!(outcome.map(|o| o.phase()), Some(Phase::Deployed));
    let status = assert_ok!(harness.store.get("ab12cd34").await);
    assert_eq!(status.phase, Phase::Deployed);
    assert!(status.artifact_url.is_some());

    let calls = harness.notifier.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.status, CompletionStatus::Deployed);
}

#[tokio::test]
async fn test_durable_error_on_start_fails_the_job() {
    let backend = Arc::new(ShakyBackend::default());
    let harness = shaky_harness(backend.clone(), FakePublisher::default());
    assert_ok!(harness.store.create("ab12cd34").await);

    backend.progress_failures.store(1, Ordering::SeqCst);
    let outcome = harness.executor.process(&job("ab12cd34")).await;

    assert_eq!(
        outcome,
        Some(DeploymentOutcome::Failed {
            error: "Durable store error: connection reset".to_string()
        })
    );
    assert!(harness.fetcher.fetched.lock().unwrap().is_empty());

    let status = assert_ok!(harness.store.get("ab12cd34").await);
    assert_eq!(status.phase, Phase::Failed);
    assert!(status.ended_at.is_some());

    let calls = harness.notifier.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.status, CompletionStatus::Failed);
}
