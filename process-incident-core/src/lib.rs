//! Incident reconciliation for workflow-engine incident events.
//!
//! Raw messages are decoded by [`decoder`] into an [`IncidentCommand`]; the
//! [`IncidentController`] applies it through a [`WorkflowGateway`] and an
//! [`IncidentStore`].

pub mod camunda;
pub mod controller;
pub mod decoder;
pub mod gateway;
pub mod store;
pub mod store_memory;
#[cfg(feature = "postgres")]
pub mod store_postgres;
pub mod types;

pub use controller::{ControllerError, ControllerOptions, IncidentController, MessageOutcome, Step};
pub use decoder::DecodeError;
pub use gateway::{GatewayError, WorkflowGateway};
pub use store::{IncidentStore, StoreError};
pub use types::{CommandKind, DeleteField, IncidentCommand, IncidentRecord};
