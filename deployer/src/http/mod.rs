//! Outbound HTTP to peer services

pub mod callbacks;
pub mod client;
pub mod uploads;
