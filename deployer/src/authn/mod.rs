//! API authentication

pub mod session_token;
