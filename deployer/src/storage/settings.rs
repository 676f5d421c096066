//! Deployer settings
//!
//! Settings come from an optional JSON file overlaid by environment
//! variables. Every key has a fallback default.

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::deploy::build::{DEFAULT_INSTALL_COMMAND, DEFAULT_OUTPUT_DIRS};
use crate::errors::ServiceError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::models::deployment::DEFAULT_BUILD_COMMAND;
use crate::queue::redis::DEFAULT_QUEUE_NAME;
use crate::status::DEFAULT_CACHE_CAPACITY;

/// Deployer settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Peer services
    #[serde(default)]
    pub services: ServiceSettings,

    #[serde(default)]
    pub auth: AuthSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            queue: QueueSettings::default(),
            store: StoreSettings::default(),
            pipeline: PipelineSettings::default(),
            services: ServiceSettings::default(),
            auth: AuthSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults overlaid by the process environment
    pub fn from_env() -> Result<Self, ServiceError> {
        let mut settings = Self::default();
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Settings file (when given) overlaid by the process environment
    pub async fn load(settings_file: Option<&File>) -> Result<Self, ServiceError> {
        let mut settings = match settings_file {
            Some(file) => file.read_json::<Settings>().await.map_err(|e| {
                ServiceError::ConfigError(format!(
                    "Unable to read settings file {}: {}",
                    file.path().display(),
                    e
                ))
            })?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Override fields from environment-style variables. Blank values are
    /// treated as unset.
    pub fn apply_env<L>(&mut self, lookup: L) -> Result<(), ServiceError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v.parse().map_err(ServiceError::ConfigError)?;
        }
        if let Some(v) = var("LOG_JSON") {
            self.log_json = parse_bool("LOG_JSON", &v)?;
        }
        if let Some(v) = var("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }

        if let Some(v) = var("HOST") {
            self.server.host = v;
        }
        if let Some(v) = var("PORT") {
            self.server.port = parse_num("PORT", &v)?;
        }

        if let Some(v) = var("REDIS_URL") {
            self.queue.redis_url = v;
        }
        if let Some(v) = var("DEPLOY_QUEUE_NAME") {
            self.queue.queue_name = v;
        }

        if let Some(v) = var("DATABASE_URL") {
            self.store.database_url = SecretString::from(v);
        }
        if let Some(v) = var("STATUS_CACHE_CAPACITY") {
            self.store.cache_capacity = parse_num("STATUS_CACHE_CAPACITY", &v)?;
        }

        if let Some(v) = var("DEFAULT_BUILD_COMMAND") {
            self.pipeline.default_build_command = v;
        }
        if let Some(v) = lookup("INSTALL_COMMAND") {
            // An explicitly empty install command skips the install step
            self.pipeline.install_command = v;
        }
        if let Some(v) = var("BUILD_OUTPUT_DIRS") {
            self.pipeline.output_dirs = v
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = var("WORKSPACE_DIR") {
            self.pipeline.workspace_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FETCH_TIMEOUT_SECS") {
            self.pipeline.fetch_timeout_secs = parse_num("FETCH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("BUILD_TIMEOUT_SECS") {
            self.pipeline.build_timeout_secs = parse_num("BUILD_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("PUBLISH_TIMEOUT_SECS") {
            self.pipeline.publish_timeout_secs = parse_num("PUBLISH_TIMEOUT_SECS", &v)?;
        }

        if let Some(v) = var("REQUEST_HANDLER_URL") {
            self.services.request_handler_url = v;
        }
        if let Some(v) = var("UPLOAD_SERVICE_URL") {
            self.services.upload_service_url = v;
        }

        if let Some(v) = var("JWT_SECRET") {
            self.auth.jwt_secret = SecretString::from(v);
        }

        if self.pipeline.output_dirs.is_empty() {
            return Err(ServiceError::ConfigError(
                "BUILD_OUTPUT_DIRS must name at least one directory".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ServiceError> {
    value
        .trim()
        .parse()
        .map_err(|_| ServiceError::ConfigError(format!("Invalid value for {}: {}", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ServiceError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ServiceError::ConfigError(format!(
            "Invalid value for {}: {}",
            key, value
        ))),
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

/// HTTP API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3003
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Job queue settings
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_queue_name")]
    pub queue_name: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_queue_name() -> String {
    DEFAULT_QUEUE_NAME.to_string()
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            queue_name: default_queue_name(),
        }
    }
}

/// Status store settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_database_url", deserialize_with = "deserialize_secret")]
    pub database_url: SecretString,

    /// Maximum cached status records
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_database_url() -> SecretString {
    SecretString::from("postgresql://localhost:5432/deployflow")
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Pipeline settings
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_build_command")]
    pub default_build_command: String,

    #[serde(default = "default_install_command")]
    pub install_command: String,

    /// Build output candidates, tried in order
    #[serde(default = "default_output_dirs")]
    pub output_dirs: Vec<String>,

    /// Root of the per-job working directories
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,

    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
}

fn default_build_command() -> String {
    DEFAULT_BUILD_COMMAND.to_string()
}

fn default_install_command() -> String {
    DEFAULT_INSTALL_COMMAND.to_string()
}

fn default_output_dirs() -> Vec<String> {
    DEFAULT_OUTPUT_DIRS.iter().map(|d| d.to_string()).collect()
}

fn default_workspace_dir() -> PathBuf {
    std::env::temp_dir().join("deployflow")
}

fn default_fetch_timeout_secs() -> u64 {
    600
}

fn default_build_timeout_secs() -> u64 {
    1800
}

fn default_publish_timeout_secs() -> u64 {
    600
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_build_command: default_build_command(),
            install_command: default_install_command(),
            output_dirs: default_output_dirs(),
            workspace_dir: default_workspace_dir(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            build_timeout_secs: default_build_timeout_secs(),
            publish_timeout_secs: default_publish_timeout_secs(),
        }
    }
}

/// Peer service addresses
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSettings {
    /// Receives completion callbacks
    #[serde(default = "default_request_handler_url")]
    pub request_handler_url: String,

    /// Publishes build output
    #[serde(default = "default_upload_service_url")]
    pub upload_service_url: String,
}

fn default_request_handler_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_upload_service_url() -> String {
    "http://localhost:3002".to_string()
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            request_handler_url: default_request_handler_url(),
            upload_service_url: default_upload_service_url(),
        }
    }
}

/// API authentication settings
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    /// HS256 secret shared with the request handler
    #[serde(default = "default_jwt_secret", deserialize_with = "deserialize_secret")]
    pub jwt_secret: SecretString,
}

fn default_jwt_secret() -> SecretString {
    SecretString::from("your-secret-key")
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
        }
    }
}
