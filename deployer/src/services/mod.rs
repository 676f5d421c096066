//! Application services

pub mod submission;
