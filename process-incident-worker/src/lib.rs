//! Incident worker runtime: configuration, message source and the
//! sequential consumer that drives the incident controller.

pub mod config;
pub mod consumer;
pub mod source;

pub use config::{ConfigError, StoreBackend, WorkerConfig};
pub use consumer::{ConsumerError, ConsumerStats, IncidentConsumer, RedeliveryPolicy};
pub use source::{spawn_line_source, SourceError};
