//! Camunda REST gateway.
//!
//! HTTP implementation of [`WorkflowGateway`] against a Camunda-compatible
//! engine. Each tenant may live on its own engine; tenants without an
//! explicit entry use the default engine URL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::gateway::{GatewayError, WorkflowGateway};

const ENGINE_REST: &str = "engine-rest";

/// Subset of the engine's process-definition resource that we read.
#[derive(Debug, Deserialize)]
struct ProcessDefinition {
    #[serde(default)]
    name: Option<String>,
}

pub struct CamundaGateway {
    client: Client,
    default_engine: Url,
    tenant_engines: HashMap<String, Url>,
}

impl CamundaGateway {
    /// Build a gateway whose requests are all bounded by `timeout`.
    pub fn new(engine_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            default_engine: parse_engine_url(engine_url)?,
            tenant_engines: HashMap::new(),
        })
    }

    /// Route `tenant_id` to a dedicated engine.
    pub fn with_tenant_engine(
        mut self,
        tenant_id: impl Into<String>,
        engine_url: &str,
    ) -> Result<Self, GatewayError> {
        self.tenant_engines
            .insert(tenant_id.into(), parse_engine_url(engine_url)?);
        Ok(self)
    }

    /// Engine base URL serving `tenant_id`.
    pub fn engine_for(&self, tenant_id: &str) -> &Url {
        self.tenant_engines
            .get(tenant_id)
            .unwrap_or(&self.default_engine)
    }

    fn endpoint(&self, tenant_id: &str, segments: &[&str]) -> Result<Url, GatewayError> {
        let base = self.engine_for(tenant_id);
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidUrl(base.to_string()))?
            .pop_if_empty()
            .push(ENGINE_REST)
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl WorkflowGateway for CamundaGateway {
    async fn stop_process_instance(
        &self,
        instance_id: &str,
        tenant_id: &str,
    ) -> Result<(), GatewayError> {
        let mut url = self.endpoint(tenant_id, &["process-instance", instance_id])?;
        url.query_pairs_mut().append_pair("skipIoMappings", "true");

        tracing::debug!(instance_id, tenant_id, %url, "Stopping process instance");
        let response = self.client.delete(url.clone()).send().await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            // Already gone: a redelivery after a successful stop, or an
            // instance the engine finished on its own.
            StatusCode::NOT_FOUND => {
                tracing::debug!(
                    instance_id,
                    tenant_id,
                    "Process instance already gone, treating as stopped"
                );
                Ok(())
            }
            _ => Err(status_error(response, &url).await),
        }
    }

    async fn resolve_deployment_name(
        &self,
        definition_id: &str,
        tenant_id: &str,
    ) -> Result<String, GatewayError> {
        let url = self.endpoint(tenant_id, &["process-definition", definition_id])?;

        tracing::debug!(definition_id, tenant_id, %url, "Resolving deployment name");
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response, &url).await);
        }

        let definition: ProcessDefinition = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        definition.name.filter(|n| !n.is_empty()).ok_or_else(|| {
            GatewayError::Decode(format!("process definition {definition_id} has no name"))
        })
    }
}

fn parse_engine_url(raw: &str) -> Result<Url, GatewayError> {
    let url = Url::parse(raw).map_err(|e| GatewayError::InvalidUrl(format!("{raw}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(GatewayError::InvalidUrl(raw.to_string()));
    }
    Ok(url)
}

async fn status_error(response: Response, url: &Url) -> GatewayError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    GatewayError::Status {
        status,
        url: url.to_string(),
        body,
    }
}
