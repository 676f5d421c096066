//! Deployflow deploy service
//!
//! Accepts deployment requests over HTTP, queues them in Redis, and runs a
//! single worker that clones, builds, and publishes each project in order
//! while recording its progress in a write-through status store.

pub mod app;
pub mod authn;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod queue;
pub mod server;
pub mod services;
pub mod status;
pub mod storage;
pub mod telemetry;
pub mod utils;
pub mod workers;
