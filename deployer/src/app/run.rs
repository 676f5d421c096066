//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::ServiceError;
use crate::server::serve::serve;
use crate::workers::deployer;

/// Run the deploy service until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServiceError> {
    info!("Initializing deploy service...");

    let app_state = Arc::new(AppState::init(&options).await?);
    run_with_state(options, app_state, shutdown_signal).await
}

/// Run the worker and the HTTP API over prepared state
pub async fn run_with_state(
    options: AppOptions,
    app_state: Arc<AppState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServiceError> {
    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone(), app_state.clone());

    if let Err(e) = init(&options, app_state, &mut shutdown_manager, &shutdown_tx).await {
        error!("Failed to start deploy service: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<(), ServiceError> {
    init_deployer_worker(
        options.deployer.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_server(options, app_state, shutdown_manager, shutdown_tx.subscribe()).await
}

fn init_deployer_worker(
    options: deployer::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServiceError> {
    info!("Initializing deployer worker...");

    let queue = app_state.queue.clone();
    let executor = app_state.executor.clone();

    let deployer_handle = tokio::spawn(async move {
        deployer::run(
            &options,
            queue,
            executor,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_deployer_worker_handle(deployer_handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServiceError> {
    info!("Initializing HTTP server...");

    let server_state = Arc::new(app_state.server_state());
    let server_handle = serve(&options.server, server_state, async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Arc<AppState>,
    server_handle: Option<JoinHandle<Result<(), ServiceError>>>,
    deployer_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(
        shutdown_tx: broadcast::Sender<()>,
        lifecycle_options: LifecycleOptions,
        app_state: Arc<AppState>,
    ) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state,
            server_handle: None,
            deployer_worker_handle: None,
        }
    }

    fn with_deployer_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), ServiceError> {
        if self.deployer_worker_handle.is_some() {
            return Err(ServiceError::ShutdownError("deployer_handle already set".to_string()));
        }
        self.deployer_worker_handle = Some(handle);
        Ok(())
    }

    fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), ServiceError>>,
    ) -> Result<(), ServiceError> {
        if self.server_handle.is_some() {
            return Err(ServiceError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ServiceError> {
        let _ = self.shutdown_tx.send(());

        let max_delay = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(max_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}, forcing shutdown...", max_delay);
                Err(ServiceError::ShutdownError(format!(
                    "shutdown timed out after {:?}",
                    max_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), ServiceError> {
        info!("Shutting down deploy service...");

        // 1. Server stops accepting submissions
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| ServiceError::ShutdownError(e.to_string()))??;
        }

        // 2. Worker finishes its in-flight job
        if let Some(handle) = self.deployer_worker_handle.take() {
            handle
                .await
                .map_err(|e| ServiceError::ShutdownError(e.to_string()))?;
        }

        // 3. App state
        self.app_state.shutdown().await?;

        info!("Shutdown complete");
        Ok(())
    }
}
