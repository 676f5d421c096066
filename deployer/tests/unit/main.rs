//! Integration tests for the deployer

mod support;

mod test_executor;
mod test_status_store;
