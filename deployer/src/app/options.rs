//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::deploy::executor;
use crate::deploy::fsm::FsmSettings;
use crate::storage::settings::Settings;
use crate::workers::deployer;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// HTTP API configuration
    pub server: ServerOptions,

    pub queue: QueueOptions,

    pub store: StoreOptions,

    /// Pipeline executor options
    pub executor: executor::Options,

    pub install_command: String,

    pub default_build_command: String,

    /// Peer service addresses and client timeout
    pub services: ServiceOptions,

    /// Deployment worker options
    pub deployer: deployer::Options,

    /// HS256 secret for API tokens
    pub jwt_secret: SecretString,
}

impl From<&Settings> for AppOptions {
    fn from(settings: &Settings) -> Self {
        let pipeline = &settings.pipeline;

        Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            queue: QueueOptions {
                redis_url: settings.queue.redis_url.clone(),
                queue_name: settings.queue.queue_name.clone(),
            },
            store: StoreOptions {
                database_url: settings.store.database_url.clone(),
                cache_capacity: settings.store.cache_capacity,
            },
            executor: executor::Options {
                workspace_root: pipeline.workspace_dir.clone(),
                output_dirs: pipeline.output_dirs.clone(),
                fsm: FsmSettings {
                    fetch_timeout: Duration::from_secs(pipeline.fetch_timeout_secs),
                    build_timeout: Duration::from_secs(pipeline.build_timeout_secs),
                    publish_timeout: Duration::from_secs(pipeline.publish_timeout_secs),
                },
                ..Default::default()
            },
            install_command: pipeline.install_command.clone(),
            default_build_command: pipeline.default_build_command.clone(),
            services: ServiceOptions {
                request_handler_url: settings.services.request_handler_url.clone(),
                upload_service_url: settings.services.upload_service_url.clone(),
                ..Default::default()
            },
            deployer: deployer::Options::default(),
            jwt_secret: settings.auth.jwt_secret.clone(),
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, including the in-flight job
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(60),
        }
    }
}

/// HTTP API server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3003,
        }
    }
}

/// Job queue connection options
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub redis_url: String,
    pub queue_name: String,
}

/// Status store options
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub database_url: SecretString,
    pub cache_capacity: usize,
}

/// Peer service options
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub request_handler_url: String,
    pub upload_service_url: String,

    /// Timeout for completion callbacks
    pub callback_timeout: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            request_handler_url: "http://localhost:3001".to_string(),
            upload_service_url: "http://localhost:3002".to_string(),
            callback_timeout: Duration::from_secs(30),
        }
    }
}
