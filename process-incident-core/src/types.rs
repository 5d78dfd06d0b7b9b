//! Core types for incident reconciliation.
//!
//! `IncidentRecord` is both the legacy (v1/v2) wire shape and the persisted
//! document. `IncidentCommand` is the decoded, in-flight form of one message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Incident Record ─────────────────────────────────────────────────────────

/// A failure reported by the workflow engine for one process instance.
///
/// Fields missing on the wire decode to empty strings (and the Unix epoch
/// for `time`), matching the zero values the engine side produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentRecord {
    /// Upsert key. Stable across redeliveries of the same incident.
    pub id: String,
    /// Wire format version that produced this record. Absent before v3
    /// unless the flat payload carried it.
    #[serde(rename = "msg_version", skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<i64>,
    pub external_task_id: String,
    pub process_instance_id: String,
    pub process_definition_id: String,
    pub worker_id: String,
    pub error_message: String,
    #[serde(rename = "time")]
    pub occurred_at: DateTime<Utc>,
    pub tenant_id: String,
    /// Display name resolved from the engine; falls back to
    /// `process_definition_id` when resolution fails.
    pub deployment_name: String,
}

impl IncidentRecord {
    /// Reject records that cannot be reconciled.
    ///
    /// `id` keys the upsert and `process_instance_id` names the instance to
    /// stop; neither may be empty.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.id.trim().is_empty() {
            return Err(RecordError::MissingField("id"));
        }
        if self.process_instance_id.trim().is_empty() {
            return Err(RecordError::MissingField("process_instance_id"));
        }
        Ok(())
    }
}

/// Why a decoded record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("incident record is missing required field `{0}`")]
    MissingField(&'static str),
}

// ─── Commands ────────────────────────────────────────────────────────────────

/// One decoded inbound message. Built per message, consumed once by the
/// controller, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncidentCommand {
    CreateOrReplace(IncidentRecord),
    DeleteByProcessInstance(String),
    DeleteByProcessDefinition(String),
}

impl IncidentCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::CreateOrReplace(_) => CommandKind::CreateOrReplace,
            Self::DeleteByProcessInstance(_) => CommandKind::DeleteByProcessInstance,
            Self::DeleteByProcessDefinition(_) => CommandKind::DeleteByProcessDefinition,
        }
    }
}

/// Discriminant of [`IncidentCommand`], used in logs and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    CreateOrReplace,
    DeleteByProcessInstance,
    DeleteByProcessDefinition,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateOrReplace => "create_or_replace",
            Self::DeleteByProcessInstance => "delete_by_process_instance",
            Self::DeleteByProcessDefinition => "delete_by_process_definition",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Delete Filters ──────────────────────────────────────────────────────────

/// Record field a bulk delete matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeleteField {
    ProcessInstanceId,
    ProcessDefinitionId,
}

impl DeleteField {
    /// Wire name, which is also the storage column name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessInstanceId => "process_instance_id",
            Self::ProcessDefinitionId => "process_definition_id",
        }
    }

    /// Whether `record` matches `value` on this field.
    pub fn matches(&self, record: &IncidentRecord, value: &str) -> bool {
        match self {
            Self::ProcessInstanceId => record.process_instance_id == value,
            Self::ProcessDefinitionId => record.process_definition_id == value,
        }
    }
}

impl std::fmt::Display for DeleteField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
