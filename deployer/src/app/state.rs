//! Application state management

use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::info;

use crate::app::options::AppOptions;
use crate::authn::session_token::SessionVerifier;
use crate::deploy::build::ShellBuildRunner;
use crate::deploy::executor::{Collaborators, DeploymentExecutor};
use crate::deploy::git::GitFetcher;
use crate::errors::ServiceError;
use crate::filesys::dir::Dir;
use crate::http::callbacks::CallbackNotifier;
use crate::http::client::HttpClient;
use crate::http::uploads::UploadServicePublisher;
use crate::queue::{JobQueue, RedisQueue};
use crate::server::state::ServerState;
use crate::services::submission::SubmissionService;
use crate::status::{PostgresBackend, StatusStore};

/// Main application state
pub struct AppState {
    /// Job queue shared by the API and the worker
    pub queue: Arc<dyn JobQueue>,

    /// Status store shared by the API and the worker
    pub store: Arc<StatusStore>,

    pub submission: Arc<SubmissionService>,

    /// Pipeline driven by the deployment worker
    pub executor: Arc<DeploymentExecutor>,

    pub verifier: Arc<SessionVerifier>,

    database: Option<PostgresBackend>,
}

impl AppState {
    /// Connect to Redis and PostgreSQL and wire up the pipeline
    pub async fn init(options: &AppOptions) -> Result<Self, ServiceError> {
        info!("Initializing application state...");

        Dir::new(options.executor.workspace_root.clone()).create().await?;

        let queue = RedisQueue::connect(&options.queue.redis_url, &options.queue.queue_name).await?;
        info!("Connected to job queue '{}'", queue.queue_name());

        let database = PostgresBackend::connect(options.store.database_url.expose_secret()).await?;
        let store = Arc::new(StatusStore::new(
            Arc::new(database.clone()),
            options.store.cache_capacity,
        ));

        let upload_client = HttpClient::new(
            &options.services.upload_service_url,
            options.executor.fsm.publish_timeout,
        )?;
        let callback_client = HttpClient::new(
            &options.services.request_handler_url,
            options.services.callback_timeout,
        )?;

        let collaborators = Collaborators {
            fetcher: Arc::new(GitFetcher::new()),
            builder: Arc::new(ShellBuildRunner::new(options.install_command.clone())),
            publisher: Arc::new(UploadServicePublisher::new(upload_client)),
            notifier: Arc::new(CallbackNotifier::new(callback_client)),
        };

        let mut state = Self::from_parts(options, Arc::new(queue), store, collaborators);
        state.database = Some(database);
        Ok(state)
    }

    /// Assemble state from already-built components
    pub fn from_parts(
        options: &AppOptions,
        queue: Arc<dyn JobQueue>,
        store: Arc<StatusStore>,
        collaborators: Collaborators,
    ) -> Self {
        let submission = Arc::new(
            SubmissionService::new(queue.clone(), store.clone())
                .with_default_build_command(options.default_build_command.clone()),
        );
        let executor = Arc::new(DeploymentExecutor::new(
            options.executor.clone(),
            store.clone(),
            collaborators,
        ));

        Self {
            queue,
            store,
            submission,
            executor,
            verifier: Arc::new(SessionVerifier::new(&options.jwt_secret)),
            database: None,
        }
    }

    /// State for the HTTP handlers
    pub fn server_state(&self) -> ServerState {
        ServerState::new(
            self.submission.clone(),
            self.store.clone(),
            self.queue.clone(),
            self.verifier.clone(),
        )
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Shutting down application state...");
        if let Some(database) = &self.database {
            database.close().await;
        }
        Ok(())
    }
}
