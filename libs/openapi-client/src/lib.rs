//! Models for outbound calls made by the deployer

pub mod models;
