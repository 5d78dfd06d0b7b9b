//! IncidentController: reconciles incident messages against the workflow
//! engine and the incident store.
//!
//! ## Command Effects
//!
//! | Command                     | Engine calls                      | Store call                  |
//! |-----------------------------|-----------------------------------|-----------------------------|
//! | `CreateOrReplace`           | stop instance, then resolve name  | upsert by `id`              |
//! | `DeleteByProcessInstance`   | none                              | delete where instance = id  |
//! | `DeleteByProcessDefinition` | none                              | delete where definition = id|
//!
//! The three `CreateOrReplace` steps run strictly in order. A failed stop
//! aborts before anything is persisted; a failed name lookup falls back to
//! the process definition id.
//!
//! The controller holds no state between messages and may be shared across
//! tasks behind an `Arc`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::decoder::{self, DecodeError};
use crate::gateway::{GatewayError, WorkflowGateway};
use crate::store::{IncidentStore, StoreError};
use crate::types::{CommandKind, DeleteField, IncidentCommand, IncidentRecord};

/// Default bound on every engine/store call.
pub const DEFAULT_DEPENDENCY_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Outcome & errors
// ---------------------------------------------------------------------------

/// Result of handling one inbound message.
#[derive(Debug)]
pub enum MessageOutcome {
    /// The command's effects were applied.
    Handled,
    /// The payload carried no actionable command. Not retried.
    Ignored(DecodeError),
    /// A collaborator failed or the call was cancelled. Redelivery is the
    /// caller's decision.
    Failed(ControllerError),
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handled => "handled",
            Self::Ignored(_) => "ignored",
            Self::Failed(_) => "failed",
        }
    }
}

/// Collaborator call a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    StopInstance,
    ResolveDeploymentName,
    Upsert,
    Delete,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::StopInstance => "stop_instance",
            Self::ResolveDeploymentName => "resolve_deployment_name",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(
        "stopping process instance {process_instance_id} (tenant {tenant_id:?}) \
         for incident {incident_id} failed: {source}"
    )]
    StopInstance {
        incident_id: String,
        process_instance_id: String,
        tenant_id: String,
        source: GatewayError,
    },

    #[error("storing incident {incident_id} (process instance {process_instance_id}) failed: {source}")]
    Upsert {
        incident_id: String,
        process_instance_id: String,
        source: StoreError,
    },

    #[error("{command} where {field} = {value} failed: {source}")]
    Delete {
        command: CommandKind,
        field: DeleteField,
        value: String,
        source: StoreError,
    },

    #[error("{command} for {target}: {step} timed out after {timeout:?}")]
    Timeout {
        command: CommandKind,
        step: Step,
        target: String,
        timeout: Duration,
    },

    #[error("{command} for {target}: cancelled during {step}")]
    Cancelled {
        command: CommandKind,
        step: Step,
        target: String,
    },
}

impl ControllerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

// ---------------------------------------------------------------------------
// IncidentController
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Upper bound on each individual gateway or store call.
    pub dependency_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            dependency_timeout: DEFAULT_DEPENDENCY_TIMEOUT,
        }
    }
}

/// Why a bounded call did not produce a result.
enum Interrupted {
    TimedOut,
    Cancelled,
}

pub struct IncidentController {
    gateway: Arc<dyn WorkflowGateway>,
    store: Arc<dyn IncidentStore>,
    options: ControllerOptions,
}

impl IncidentController {
    pub fn new(
        gateway: Arc<dyn WorkflowGateway>,
        store: Arc<dyn IncidentStore>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            gateway,
            store,
            options,
        }
    }

    /// Decode and apply one raw message.
    pub async fn handle_message(&self, payload: &[u8]) -> MessageOutcome {
        self.handle(payload, None).await
    }

    /// Like [`handle_message`](Self::handle_message), but aborts in-flight
    /// calls with `Failed(Cancelled)` once `shutdown` becomes `true`.
    pub async fn handle_message_with_shutdown(
        &self,
        payload: &[u8],
        shutdown: &watch::Receiver<bool>,
    ) -> MessageOutcome {
        self.handle(payload, Some(shutdown)).await
    }

    async fn handle(
        &self,
        payload: &[u8],
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> MessageOutcome {
        let command = match decoder::decode(payload) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    payload = %String::from_utf8_lossy(payload),
                    "Unable to decode incident message, ignoring"
                );
                return MessageOutcome::Ignored(e);
            }
        };

        let kind = command.kind();
        match self.execute(command, shutdown).await {
            Ok(()) => MessageOutcome::Handled,
            Err(e) => {
                if e.is_cancelled() {
                    tracing::info!(command = %kind, error = %e, "Incident command cancelled");
                } else {
                    tracing::error!(command = %kind, error = %e, "Incident command failed");
                }
                MessageOutcome::Failed(e)
            }
        }
    }

    /// Apply an already decoded command.
    pub async fn execute(
        &self,
        command: IncidentCommand,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<(), ControllerError> {
        match command {
            IncidentCommand::CreateOrReplace(record) => {
                self.create_or_replace(record, shutdown).await
            }
            IncidentCommand::DeleteByProcessInstance(id) => {
                self.delete(
                    CommandKind::DeleteByProcessInstance,
                    DeleteField::ProcessInstanceId,
                    id,
                    shutdown,
                )
                .await
            }
            IncidentCommand::DeleteByProcessDefinition(id) => {
                self.delete(
                    CommandKind::DeleteByProcessDefinition,
                    DeleteField::ProcessDefinitionId,
                    id,
                    shutdown,
                )
                .await
            }
        }
    }

    /// Stop the instance, resolve its deployment name, persist the incident.
    async fn create_or_replace(
        &self,
        mut record: IncidentRecord,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<(), ControllerError> {
        const COMMAND: CommandKind = CommandKind::CreateOrReplace;

        // 1. Stop the process instance. No incident is recorded for an
        //    instance that may still be running.
        let stopped = self
            .bounded(
                shutdown,
                self.gateway
                    .stop_process_instance(&record.process_instance_id, &record.tenant_id),
            )
            .await;
        match stopped {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(ControllerError::StopInstance {
                    incident_id: record.id,
                    process_instance_id: record.process_instance_id,
                    tenant_id: record.tenant_id,
                    source,
                });
            }
            Err(reason) => {
                return Err(self.interrupted(
                    reason,
                    COMMAND,
                    Step::StopInstance,
                    &record.process_instance_id,
                ));
            }
        }

        // 2. Resolve the display name; failure falls back to the definition id.
        let resolved = self
            .bounded(
                shutdown,
                self.gateway
                    .resolve_deployment_name(&record.process_definition_id, &record.tenant_id),
            )
            .await;
        record.deployment_name = match resolved {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                tracing::warn!(
                    incident_id = %record.id,
                    process_definition_id = %record.process_definition_id,
                    error = %e,
                    "Unable to resolve deployment name, using process definition id"
                );
                record.process_definition_id.clone()
            }
            Err(Interrupted::TimedOut) => {
                tracing::warn!(
                    incident_id = %record.id,
                    process_definition_id = %record.process_definition_id,
                    timeout_ms = self.options.dependency_timeout.as_millis() as u64,
                    "Deployment name lookup timed out, using process definition id"
                );
                record.process_definition_id.clone()
            }
            Err(Interrupted::Cancelled) => {
                return Err(ControllerError::Cancelled {
                    command: COMMAND,
                    step: Step::ResolveDeploymentName,
                    target: record.process_definition_id,
                });
            }
        };

        // 3. Persist.
        match self.bounded(shutdown, self.store.upsert(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(ControllerError::Upsert {
                    incident_id: record.id,
                    process_instance_id: record.process_instance_id,
                    source,
                });
            }
            Err(reason) => {
                return Err(self.interrupted(reason, COMMAND, Step::Upsert, &record.id));
            }
        }

        tracing::info!(
            incident_id = %record.id,
            process_instance_id = %record.process_instance_id,
            deployment_name = %record.deployment_name,
            "Incident recorded and process instance stopped"
        );
        Ok(())
    }

    async fn delete(
        &self,
        command: CommandKind,
        field: DeleteField,
        value: String,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<(), ControllerError> {
        match self
            .bounded(shutdown, self.store.delete_where(field, &value))
            .await
        {
            Ok(Ok(0)) => {
                tracing::debug!(%field, value = %value, "No incidents matched delete");
                Ok(())
            }
            Ok(Ok(removed)) => {
                tracing::info!(%field, value = %value, removed, "Deleted incidents");
                Ok(())
            }
            Ok(Err(source)) => Err(ControllerError::Delete {
                command,
                field,
                value,
                source,
            }),
            Err(reason) => Err(self.interrupted(reason, command, Step::Delete, &value)),
        }
    }

    /// Run a collaborator call under the dependency timeout, racing the
    /// shutdown signal. Cancellation wins ties.
    async fn bounded<T>(
        &self,
        shutdown: Option<&watch::Receiver<bool>>,
        call: impl Future<Output = T>,
    ) -> Result<T, Interrupted> {
        let cancelled = wait_for_shutdown(shutdown.cloned());
        tokio::select! {
            biased;
            _ = cancelled => Err(Interrupted::Cancelled),
            result = tokio::time::timeout(self.options.dependency_timeout, call) => {
                result.map_err(|_| Interrupted::TimedOut)
            }
        }
    }

    fn interrupted(
        &self,
        reason: Interrupted,
        command: CommandKind,
        step: Step,
        target: &str,
    ) -> ControllerError {
        match reason {
            Interrupted::TimedOut => ControllerError::Timeout {
                command,
                step,
                target: target.to_string(),
                timeout: self.options.dependency_timeout,
            },
            Interrupted::Cancelled => ControllerError::Cancelled {
                command,
                step,
                target: target.to_string(),
            },
        }
    }
}

/// Resolves once `shutdown` reads `true`. Never resolves without a signal
/// or after the sender is gone.
async fn wait_for_shutdown(shutdown: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = shutdown {
        if rx.wait_for(|stop| *stop).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}
