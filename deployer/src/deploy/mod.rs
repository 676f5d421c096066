//! Deployment pipeline

pub mod build;
pub mod command;
pub mod executor;
pub mod fsm;
pub mod git;
