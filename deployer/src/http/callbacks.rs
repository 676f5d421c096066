//! Completion webhook to the request handler

use async_trait::async_trait;
use openapi_client::models::DeploymentCompleteRequest;
use tracing::info;

use crate::errors::ServiceError;
use crate::http::client::HttpClient;

/// Best-effort notification of a deployment's terminal phase. Failures are
/// reported to the caller but never change the recorded phase.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(
        &self,
        deployment_id: &str,
        request: &DeploymentCompleteRequest,
    ) -> Result<(), ServiceError>;
}

/// Notifier that posts to `/api/deployments/{id}/complete`
pub struct CallbackNotifier {
    client: HttpClient,
}

impl CallbackNotifier {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CompletionNotifier for CallbackNotifier {
    async fn notify(
        &self,
        deployment_id: &str,
        request: &DeploymentCompleteRequest,
    ) -> Result<(), ServiceError> {
        let path = format!("/api/deployments/{}/complete", deployment_id);
        self.client.post_discard(&path, request).await?;

        info!(deployment_id = %deployment_id, status = ?request.status, "Sent completion callback");
        Ok(())
    }
}
