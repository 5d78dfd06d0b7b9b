//! Workflow gateway: the controller's view of the process engine.

use async_trait::async_trait;

/// Error type for workflow engine calls.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("engine returned {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("unexpected engine response: {0}")]
    Decode(String),

    #[error("invalid engine URL: {0}")]
    InvalidUrl(String),

    #[error("engine error: {0}")]
    Engine(String),
}

/// Operations the controller needs from the workflow engine.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait WorkflowGateway: Send + Sync {
    /// Stop (delete) a running process instance.
    async fn stop_process_instance(
        &self,
        instance_id: &str,
        tenant_id: &str,
    ) -> Result<(), GatewayError>;

    /// Human-readable name of the deployment behind a process definition.
    async fn resolve_deployment_name(
        &self,
        definition_id: &str,
        tenant_id: &str,
    ) -> Result<String, GatewayError>;
}
