//! Server state

use std::sync::Arc;

use crate::authn::session_token::SessionVerifier;
use crate::queue::JobQueue;
use crate::services::submission::SubmissionService;
use crate::status::StatusStore;

/// Server state shared across handlers
pub struct ServerState {
    pub submission: Arc<SubmissionService>,
    pub store: Arc<StatusStore>,
    pub queue: Arc<dyn JobQueue>,
    pub verifier: Arc<SessionVerifier>,
}

impl ServerState {
    pub fn new(
        submission: Arc<SubmissionService>,
        store: Arc<StatusStore>,
        queue: Arc<dyn JobQueue>,
        verifier: Arc<SessionVerifier>,
    ) -> Self {
        Self {
            submission,
            store,
            queue,
            verifier,
        }
    }
}
