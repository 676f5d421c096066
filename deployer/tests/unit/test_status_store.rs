//! Status store tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deployer::deploy::fsm::{Phase, Transition};
use deployer::errors::StatusError;
use deployer::models::deployment::DeploymentStatus;
use deployer::status::{MemoryBackend, StatusBackend, StatusStore, CANCELLED_MESSAGE};
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

async fn drive(store: &StatusStore, id: &str, phases: &[Phase]) {
    for phase in phases {
        let transition = Transition::advance(*phase).with_log(format!("entered {}", phase));
        assert_ok!(store.transition(id, transition).await);
    }
}

#[tokio::test]
async fn test_get_unknown_id_is_not_found() {
    let store = StatusStore::in_memory();
    let err = assert_err!(store.get("neverseen").await);
    assert!(matches!(err, StatusError::NotFound(_)));
}

#[tokio::test]
async fn test_create_is_immediately_visible() {
    let store = StatusStore::in_memory();
    for i in 0..20 {
        let id = format!("job{:05}", i);
        assert_ok!(store.create(&id).await);
        let status = assert_ok!(store.get(&id).await);
        assert_eq!(status.phase, Phase::Pending);
    }
}

#[tokio::test]
async fn test_round_trip_after_eviction() {
    let backend = Arc::new(MemoryBackend::new());
    let store = StatusStore::new(backend.clone(), 100);

    assert_ok!(store.create("ab12cd34").await);
    drive(&store, "ab12cd34", &[Phase::Cloning, Phase::Building]).await;
    assert_ok!(
        store
            .transition(
                "ab12cd34",
                Transition::failed("npm ERR! code ELIFECYCLE").with_log("Deployment failed"),
            )
            .await
    );
    let before = assert_ok!(store.get("ab12cd34").await);

    assert!(store.evict("ab12cd34").is_some());
    let after = assert_ok!(store.get("ab12cd34").await);

    assert_eq!(after, before);
    assert_eq!(after.log_lines.len(), 3);

    // Persisted row joins logs with newlines
    let row = backend.row("ab12cd34").await.unwrap();
    assert_eq!(row.logs.lines().count(), 3);
    assert_eq!(row.status, "failed");
}

#[tokio::test]
async fn test_round_trip_after_restart() {
    let backend = Arc::new(MemoryBackend::new());

    let before = {
        let store = StatusStore::new(backend.clone(), 100);
        assert_ok!(store.create("ab12cd34").await);
        drive(
            &store,
            "ab12cd34",
            &[Phase::Cloning, Phase::Building, Phase::Uploading],
        )
        .await;
        assert_ok!(
            store
                .transition(
                    "ab12cd34",
                    Transition::deployed("http://localhost:3002/deployments/ab12cd34/")
                        .with_log("Deployment completed successfully!"),
                )
                .await
        )
    };

    // A fresh store over the same durable backend
    let store = StatusStore::new(backend, 100);
    assert_eq!(store.cached_len(), 0);

    let after = assert_ok!(store.get("ab12cd34").await);
    assert_eq!(after, before);
    assert_eq!(after.phase, Phase::Deployed);
    assert_eq!(
        after.artifact_url.as_deref(),
        Some("http://localhost:3002/deployments/ab12cd34/")
    );
}

#[tokio::test]
async fn test_multiline_log_lines_survive_round_trip() {
    let backend = Arc::new(MemoryBackend::new());
    let store = StatusStore::new(backend.clone(), 100);

    assert_ok!(store.create("ab12cd34").await);
    assert_ok!(
        store
            .transition(
                "ab12cd34",
                Transition::advance(Phase::Cloning).with_log("first\nsecond\r\nthird"),
            )
            .await
    );
    let before = assert_ok!(store.get("ab12cd34").await);

    let reloaded = StatusStore::new(backend, 100);
    let after = assert_ok!(reloaded.get("ab12cd34").await);
    assert_eq!(after.log_lines, before.log_lines);
    assert_eq!(after.log_lines.len(), 1);
}

#[tokio::test]
async fn test_transition_after_restart_hydrates() {
    let backend = Arc::new(MemoryBackend::new());
    {
        let store = StatusStore::new(backend.clone(), 100);
        assert_ok!(store.create("ab12cd34").await);
    }

    let store = StatusStore::new(backend, 100);
    let status = assert_ok!(
        store
            .transition("ab12cd34", Transition::advance(Phase::Cloning))
            .await
    );
    assert_eq!(status.phase, Phase::Cloning);
}

#[tokio::test]
async fn test_cancel_non_terminal_phases() {
    for phases in [
        &[][..],
        &[Phase::Cloning][..],
        &[Phase::Cloning, Phase::Building][..],
        &[Phase::Cloning, Phase::Building, Phase::Uploading][..],
    ] {
        let store = StatusStore::in_memory();
        assert_ok!(store.create("ab12cd34").await);
        drive(&store, "ab12cd34", phases).await;

        let status = assert_ok!(store.cancel("ab12cd34").await);
        assert_eq!(status.phase, Phase::Failed);
        assert_eq!(status.error_message.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(status.ended_at.is_some());
        assert!(status.artifact_url.is_none());
        assert!(status.log_lines.last().unwrap().ends_with(CANCELLED_MESSAGE));
    }
}

#[tokio::test]
async fn test_cancel_terminal_is_invalid_and_unchanged() {
    let store = StatusStore::in_memory();

    assert_ok!(store.create("done0001").await);
    drive(
        &store,
        "done0001",
        &[Phase::Cloning, Phase::Building, Phase::Uploading],
    )
    .await;
    assert_ok!(
        store
            .transition("done0001", Transition::deployed("http://x/deployments/done0001/"))
            .await
    );

    assert_ok!(store.create("fail0001").await);
    assert_ok!(store.transition("fail0001", Transition::failed("boom")).await);

    for id in ["done0001", "fail0001"] {
        let before = assert_ok!(store.get(id).await);
        let err = assert_err!(store.cancel(id).await);
        assert!(matches!(err, StatusError::InvalidState { .. }));
        assert_eq!(assert_ok!(store.get(id).await), before);
    }
}

#[tokio::test]
async fn test_cancel_unknown_is_not_found() {
    let store = StatusStore::in_memory();
    let err = assert_err!(store.cancel("neverseen").await);
    assert!(matches!(err, StatusError::NotFound(_)));
}

#[tokio::test]
async fn test_concurrent_reads_see_whole_records() {
    let store = Arc::new(StatusStore::in_memory());
    assert_ok!(store.create("ab12cd34").await);

    let reader = {
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                let status = store.get("ab12cd34").await.unwrap();
                assert_eq!(status.ended_at.is_some(), status.phase.is_terminal());
                assert_eq!(status.error_message.is_some(), status.phase == Phase::Failed);
                tokio::task::yield_now().await;
            }
        })
    };

    drive(&store, "ab12cd34", &[Phase::Cloning, Phase::Building]).await;
    assert_ok!(store.transition("ab12cd34", Transition::failed("boom")).await);

    reader.await.unwrap();
}

/// Backend whose updates can be switched off
#[derive(Default)]
struct FlakyBackend {
    inner: MemoryBackend,
    fail_updates: AtomicBool,
}

#[async_trait]
impl StatusBackend for FlakyBackend {
    async fn insert(&self, status: &DeploymentStatus) -> Result<(), StatusError> {
        self.inner.insert(status).await
    }

    async fn update(&self, status: &DeploymentStatus) -> Result<(), StatusError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StatusError::Durable("connection reset".to_string()));
        }
        self.inner.update(status).await
    }

    async fn load(&self, id: &str) -> Result<Option<DeploymentStatus>, StatusError> {
        self.inner.load(id).await
    }
}

#[tokio::test]
async fn test_failed_durable_write_leaves_cache_untouched() {
    let backend = Arc::new(FlakyBackend::default());
    let store = StatusStore::new(backend.clone(), 100);
    assert_ok!(store.create("ab12cd34").await);

    backend.fail_updates.store(true, Ordering::SeqCst);
    let err = assert_err!(
        store
            .transition("ab12cd34", Transition::advance(Phase::Cloning))
            .await
    );
    assert!(matches!(err, StatusError::Durable(_)));

    let status = assert_ok!(store.get("ab12cd34").await);
    assert_eq!(status.phase, Phase::Pending);
}

/// Backend that holds the next load until released
#[derive(Default)]
struct GatedBackend {
    inner: MemoryBackend,
    armed: AtomicBool,
    entered: Notify,
    gate: Notify,
}

#[async_trait]
impl StatusBackend for GatedBackend {
    async fn insert(&self, status: &DeploymentStatus) -> Result<(), StatusError> {
        self.inner.insert(status).await
    }

    async fn update(&self, status: &DeploymentStatus) -> Result<(), StatusError> {
        self.inner.update(status).await
    }

    async fn load(&self, id: &str) -> Result<Option<DeploymentStatus>, StatusError> {
        let loaded = self.inner.load(id).await;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        loaded
    }
}

#[tokio::test]
async fn test_stale_hydration_cannot_resurrect_finished_record() {
    let backend = Arc::new(GatedBackend::default());
    let store = Arc::new(StatusStore::new(backend.clone(), 1));

    // "b" stays in flight so a finished "a" is the eviction candidate
    assert_ok!(store.create("b").await);
    drive(&store, "b", &[Phase::Cloning]).await;
    assert_ok!(store.create("a").await);
    drive(&store, "a", &[Phase::Cloning, Phase::Building, Phase::Uploading]).await;
    assert!(store.evict("a").is_some());

    // A reader misses the cache and reads "uploading" from the backend
    backend.armed.store(true, Ordering::SeqCst);
    let reader = {
        let store = store.clone();
        tokio::spawn(async move { store.get("a").await })
    };
    backend.entered.notified().await;

    // Meanwhile the worker finishes the deployment
    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .transition("a", Transition::deployed("http://x/deployments/a/"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    backend.gate.notify_one();
    assert_ok!(reader.await.unwrap());
    assert_ok!(writer.await.unwrap());

    let err = assert_err!(store.cancel("a").await);
    assert!(matches!(err, StatusError::InvalidState { .. }));
    assert_eq!(assert_ok!(store.get("a").await).phase, Phase::Deployed);
    assert_eq!(backend.inner.row("a").await.unwrap().status, "deployed");
}
