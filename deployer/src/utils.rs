//! Utility functions

use serde::{Deserialize, Serialize};

/// Length of a deployment id
pub const DEPLOYMENT_ID_LEN: usize = 8;

/// Version information for the deployer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Generate a short deployment id: the first eight hex digits of a v4 UUID
pub fn generate_deployment_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(DEPLOYMENT_ID_LEN);
    id
}
